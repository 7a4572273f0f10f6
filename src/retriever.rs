//! First-stage recall over the text collection.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::collections::CollectionSchema;
use crate::embedder::Embedder;
use crate::error::RetrievalError;
use crate::index::VectorIndex;
use crate::model::TextChunk;

/// Embeds a query and pulls the nearest chunks by ascending L2 distance.
#[derive(Clone)]
pub struct CoarseRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    schema: CollectionSchema,
}

impl CoarseRetriever {
    /// Wires the retriever to its collaborators.
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, schema: CollectionSchema) -> Self {
        Self {
            embedder,
            index,
            schema,
        }
    }

    /// Returns at most `k` chunks, closest first.
    ///
    /// `k == 0` returns an empty list without touching the embedder or the index.
    /// Collaborator failures surface as [`RetrievalError::RetrievalUnavailable`] so callers
    /// can tell "no matches" from "service down".
    pub fn retrieve(&self, query: &str, k: usize) -> Result<Vec<TextChunk>, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self
            .embedder
            .embed(query)
            .map_err(|err| RetrievalError::unavailable(err.context("query embedding failed")))?;
        let mut hits = self
            .index
            .search(self.schema.texts(), &vector, k, &self.schema.text_output_fields())
            .map_err(|err| RetrievalError::unavailable(err.context("text search failed")))?;
        // Stable: equal distances keep the index's order.
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);

        let mut chunks = Vec::with_capacity(hits.len());
        for hit in hits {
            match TextChunk::from_payload(&hit.payload, &self.schema) {
                Ok(chunk) => chunks.push(chunk),
                Err(err) => warn!(error = %err, distance = hit.distance, "dropping malformed text hit"),
            }
        }
        debug!(requested = k, returned = chunks.len(), "coarse retrieval complete");
        Ok(chunks)
    }
}
