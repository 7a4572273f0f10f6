//! Exact in-process index for fixtures and offline runs.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use serde_json::Value;

use super::{SearchHit, VectorIndex};
use crate::collections::{CollectionName, CollectionSchema};
use crate::filter::LocationFilter;
use crate::model::{ImageRecord, Payload, TextChunk};

struct Record {
    vector: Vec<f32>,
    payload: Payload,
}

/// Brute-force index holding the text and image collections of one schema.
pub struct InMemoryIndex {
    schema: CollectionSchema,
    collections: HashMap<String, Vec<Record>>,
}

impl InMemoryIndex {
    /// Creates both collections empty.
    pub fn new(schema: CollectionSchema) -> Self {
        let mut collections = HashMap::new();
        collections.insert(schema.texts().as_str().to_string(), Vec::new());
        collections.insert(schema.images().as_str().to_string(), Vec::new());
        Self {
            schema,
            collections,
        }
    }

    /// Adds a text chunk; its embedding is the searchable vector.
    pub fn insert_chunk(&mut self, chunk: &TextChunk) -> Result<()> {
        let fields = self.schema.fields();
        let mut payload = Payload::new();
        payload.insert(fields.content.clone(), Value::from(chunk.content.clone()));
        payload.insert(fields.document.clone(), Value::from(chunk.source_document.clone()));
        payload.insert(fields.page.clone(), Value::from(chunk.page_number));
        payload.insert(fields.clause.clone(), Value::from(chunk.clause_identifier.clone()));
        let collection = self.schema.texts().clone();
        self.insert(&collection, chunk.embedding.clone(), payload)
    }

    /// Adds an image record.
    pub fn insert_image(&mut self, image: &ImageRecord) -> Result<()> {
        let fields = self.schema.fields();
        let mut payload = Payload::new();
        payload.insert(fields.image_path.clone(), Value::from(image.storage_path.clone()));
        payload.insert(fields.document.clone(), Value::from(image.source_document.clone()));
        payload.insert(fields.page.clone(), Value::from(image.page_number));
        let collection = self.schema.images().clone();
        self.insert(&collection, image.embedding.clone(), payload)
    }

    /// Adds a raw record; vectors within a collection must share one dimension.
    pub fn insert(&mut self, collection: &CollectionName, vector: Vec<f32>, payload: Payload) -> Result<()> {
        let records = self.records_mut(collection)?;
        if let Some(first) = records.first() {
            anyhow::ensure!(
                first.vector.len() == vector.len(),
                "dimension mismatch in {}: expected {}, got {}",
                collection.as_str(),
                first.vector.len(),
                vector.len()
            );
        }
        records.push(Record { vector, payload });
        Ok(())
    }

    /// Number of records stored in `collection`.
    pub fn len(&self, collection: &CollectionName) -> usize {
        self.collections
            .get(collection.as_str())
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn records(&self, collection: &CollectionName) -> Result<&[Record]> {
        self.collections
            .get(collection.as_str())
            .map(Vec::as_slice)
            .ok_or_else(|| anyhow!("unknown collection {}", collection.as_str()))
    }

    fn records_mut(&mut self, collection: &CollectionName) -> Result<&mut Vec<Record>> {
        self.collections
            .get_mut(collection.as_str())
            .ok_or_else(|| anyhow!("unknown collection {}", collection.as_str()))
    }
}

impl VectorIndex for InMemoryIndex {
    fn search(
        &self,
        collection: &CollectionName,
        vector: &[f32],
        limit: usize,
        output_fields: &[String],
    ) -> Result<Vec<SearchHit>> {
        let records = self.records(collection)?;
        let mut scored = Vec::with_capacity(records.len());
        for record in records {
            anyhow::ensure!(
                record.vector.len() == vector.len(),
                "query dimension {} does not match collection dimension {}",
                vector.len(),
                record.vector.len()
            );
            scored.push((squared_l2(&record.vector, vector), record));
        }
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(distance, record)| SearchHit {
                distance,
                payload: project(&record.payload, output_fields),
            })
            .collect())
    }

    fn query(
        &self,
        collection: &CollectionName,
        filter: &LocationFilter,
        limit: usize,
        output_fields: &[String],
    ) -> Result<Vec<Payload>> {
        let fields = self.schema.fields();
        Ok(self
            .records(collection)?
            .iter()
            .filter(|record| filter.matches_payload(&record.payload, fields))
            .take(limit)
            .map(|record| project(&record.payload, output_fields))
            .collect())
    }
}

/// Squared Euclidean distance, the value Milvus reports for `L2`.
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn project(payload: &Payload, output_fields: &[String]) -> Payload {
    if output_fields.is_empty() {
        return payload.clone();
    }
    output_fields
        .iter()
        .filter_map(|field| payload.get(field).map(|value| (field.clone(), value.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LocationKey;

    fn chunk(doc: &str, page: u32, embedding: Vec<f32>) -> TextChunk {
        TextChunk {
            content: format!("{doc}-{page}"),
            source_document: doc.to_string(),
            page_number: page,
            clause_identifier: String::new(),
            embedding,
        }
    }

    #[test]
    fn search_orders_by_ascending_distance() {
        let schema = CollectionSchema::default();
        let mut index = InMemoryIndex::new(schema.clone());
        index.insert_chunk(&chunk("a", 1, vec![5.0, 0.0])).unwrap();
        index.insert_chunk(&chunk("a", 2, vec![1.0, 0.0])).unwrap();
        index.insert_chunk(&chunk("b", 1, vec![2.0, 0.0])).unwrap();
        let hits = index
            .search(schema.texts(), &[0.0, 0.0], 2, &schema.text_output_fields())
            .unwrap();
        let pages: Vec<_> = hits
            .iter()
            .map(|hit| hit.payload["chunk_text"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(pages, vec!["a-2", "b-1"]);
        assert_eq!(hits[0].distance, 1.0);
    }

    #[test]
    fn rejects_mixed_dimensions() {
        let schema = CollectionSchema::default();
        let mut index = InMemoryIndex::new(schema);
        index.insert_chunk(&chunk("a", 1, vec![1.0])).unwrap();
        assert!(index.insert_chunk(&chunk("a", 2, vec![1.0, 2.0])).is_err());
        assert_eq!(index.len(index.schema.texts()), 1);
        assert_eq!(index.len(index.schema.images()), 0);
    }

    #[test]
    fn query_applies_filter_and_limit() {
        let schema = CollectionSchema::default();
        let mut index = InMemoryIndex::new(schema.clone());
        for (path, page) in [("/1.png", 1), ("/2.png", 2), ("/3.png", 2)] {
            index
                .insert_image(&ImageRecord {
                    storage_path: path.to_string(),
                    source_document: "a".to_string(),
                    page_number: page,
                    embedding: vec![0.0],
                })
                .unwrap();
        }
        let filter = LocationFilter::from_keys(vec![LocationKey::new("a", 2)]).unwrap();
        let rows = index
            .query(schema.images(), &filter, 1, &schema.image_output_fields())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["image_path"], "/2.png");
    }
}
