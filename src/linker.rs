//! Cross-modal association: figures printed on the same page as the selected clauses.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::collections::CollectionSchema;
use crate::error::ImageLinkWarning;
use crate::filter::LocationFilter;
use crate::index::VectorIndex;
use crate::model::{ImageRecord, ScoredCandidate};

/// Images found for a set of clauses, plus the warning raised if the lookup failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageLinks {
    /// Co-located images, unique by storage path.
    pub images: Vec<ImageRecord>,
    /// Set when the image query failed; `images` is then empty.
    pub warning: Option<ImageLinkWarning>,
}

/// Looks up images whose (document, page) matches a selected clause.
#[derive(Clone)]
pub struct CrossModalLinker {
    index: Arc<dyn VectorIndex>,
    schema: CollectionSchema,
    limit: usize,
}

impl CrossModalLinker {
    /// `limit` caps how many images one lookup may return.
    pub fn new(index: Arc<dyn VectorIndex>, schema: CollectionSchema, limit: usize) -> Self {
        Self {
            index,
            schema,
            limit,
        }
    }

    /// Best-effort lookup; never fails.
    ///
    /// A single filter covers every distinct location. Order among matches is whatever
    /// the index returns; only membership is meaningful.
    pub fn find_colocated_images(&self, selected: &[ScoredCandidate]) -> ImageLinks {
        let Some(filter) =
            LocationFilter::from_keys(selected.iter().map(|candidate| candidate.chunk.location()))
        else {
            return ImageLinks::default();
        };
        if self.limit == 0 {
            return ImageLinks::default();
        }

        let rows = match self.index.query(
            self.schema.images(),
            &filter,
            self.limit,
            &self.schema.image_output_fields(),
        ) {
            Ok(rows) => rows,
            Err(err) => {
                let warning = ImageLinkWarning {
                    locations: filter.keys().to_vec(),
                    message: format!("{err:#}"),
                };
                warn!(%warning, "continuing without images");
                return ImageLinks {
                    images: Vec::new(),
                    warning: Some(warning),
                };
            }
        };

        let mut seen_paths = HashSet::new();
        let mut images = Vec::new();
        for row in rows.iter().take(self.limit) {
            let image = match ImageRecord::from_payload(row, &self.schema) {
                Ok(image) => image,
                Err(err) => {
                    warn!(error = %err, "dropping malformed image record");
                    continue;
                }
            };
            if !filter.contains(&image.location()) {
                warn!(path = %image.storage_path, "index returned image outside the filter");
                continue;
            }
            if seen_paths.insert(image.storage_path.clone()) {
                images.push(image);
            }
        }
        debug!(
            locations = filter.keys().len(),
            images = images.len(),
            "image linking complete"
        );
        ImageLinks {
            images,
            warning: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::CollectionName;
    use crate::index::SearchHit;
    use crate::model::{LocationKey, Payload, TextChunk};
    use anyhow::{anyhow, Result};
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every filter it receives and replays canned rows.
    struct RecordingIndex {
        rows: Result<Vec<Payload>, String>,
        filters: Mutex<Vec<LocationFilter>>,
    }

    impl RecordingIndex {
        fn returning(rows: Vec<serde_json::Value>) -> Self {
            Self {
                rows: Ok(rows
                    .into_iter()
                    .map(|row| row.as_object().cloned().unwrap())
                    .collect()),
                filters: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                rows: Err("image collection not loaded".to_string()),
                filters: Mutex::new(Vec::new()),
            }
        }
    }

    impl VectorIndex for RecordingIndex {
        fn search(&self, _: &CollectionName, _: &[f32], _: usize, _: &[String]) -> Result<Vec<SearchHit>> {
            Ok(Vec::new())
        }

        fn query(&self, _: &CollectionName, filter: &LocationFilter, _: usize, _: &[String]) -> Result<Vec<Payload>> {
            self.filters.lock().unwrap().push(filter.clone());
            self.rows.clone().map_err(|msg| anyhow!(msg))
        }
    }

    fn candidate(doc: &str, page: u32, rank: usize) -> ScoredCandidate {
        ScoredCandidate {
            chunk: TextChunk {
                content: format!("{doc}:{page}"),
                source_document: doc.to_string(),
                page_number: page,
                clause_identifier: String::new(),
                embedding: Vec::new(),
            },
            coarse_rank: rank,
            rerank_score: 1.0 / rank as f32,
        }
    }

    fn linker(index: Arc<RecordingIndex>, limit: usize) -> CrossModalLinker {
        CrossModalLinker::new(index, CollectionSchema::default(), limit)
    }

    #[test]
    fn empty_selection_skips_index() {
        let index = Arc::new(RecordingIndex::failing());
        let links = linker(index.clone(), 10).find_colocated_images(&[]);
        assert_eq!(links, ImageLinks::default());
        assert!(index.filters.lock().unwrap().is_empty());
    }

    #[test]
    fn blank_documents_skip_index() {
        let index = Arc::new(RecordingIndex::failing());
        let links = linker(index.clone(), 10).find_colocated_images(&[candidate(" ", 3, 1)]);
        assert!(links.images.is_empty());
        assert!(links.warning.is_none());
        assert!(index.filters.lock().unwrap().is_empty());
    }

    #[test]
    fn shared_location_builds_single_predicate() {
        let index = Arc::new(RecordingIndex::returning(Vec::new()));
        linker(index.clone(), 10).find_colocated_images(&[
            candidate("A", 5, 1),
            candidate("A", 5, 2),
            candidate("A", 5, 3),
        ]);
        let filters = index.filters.lock().unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].keys(), &[LocationKey::new("A", 5)]);
    }

    #[test]
    fn dedups_paths_and_drops_orphans() {
        let index = Arc::new(RecordingIndex::returning(vec![
            json!({"image_path": "/a5.png", "doc_name": "A", "page": 5}),
            json!({"image_path": "/a5.png", "doc_name": "A", "page": 5}),
            json!({"image_path": "/b10.png", "doc_name": "B", "page": 10}),
            json!({"image_path": "/c1.png", "doc_name": "C", "page": 1}),
            json!({"doc_name": "A", "page": 5}),
        ]));
        let links = linker(index, 10)
            .find_colocated_images(&[candidate("A", 5, 1), candidate("B", 10, 2)]);
        let paths: Vec<_> = links.images.iter().map(|i| i.storage_path.as_str()).collect();
        assert_eq!(paths, vec!["/a5.png", "/b10.png"]);
        assert!(links.warning.is_none());
    }

    #[test]
    fn query_failure_degrades_to_warning() {
        let index = Arc::new(RecordingIndex::failing());
        let links = linker(index, 10).find_colocated_images(&[candidate("A", 5, 1)]);
        assert!(links.images.is_empty());
        let warning = links.warning.expect("warning");
        assert_eq!(warning.locations, vec![LocationKey::new("A", 5)]);
        assert!(warning.message.contains("not loaded"));
    }

    #[test]
    fn respects_result_cap() {
        let rows = (0..5)
            .map(|i| json!({"image_path": format!("/{i}.png"), "doc_name": "A", "page": 5}))
            .collect();
        let index = Arc::new(RecordingIndex::returning(rows));
        let links = linker(index, 2).find_colocated_images(&[candidate("A", 5, 1)]);
        assert_eq!(links.images.len(), 2);
    }
}
