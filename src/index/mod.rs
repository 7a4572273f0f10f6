//! Vector index access: nearest-neighbor search and exact payload filtering.

use anyhow::Result;

use crate::collections::CollectionName;
use crate::filter::LocationFilter;
use crate::model::Payload;

pub mod memory;
pub mod milvus;

pub use memory::InMemoryIndex;
pub use milvus::{MilvusIndex, MilvusSettings};

/// One nearest-neighbor hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// L2 distance to the query vector; smaller is closer.
    pub distance: f32,
    /// Projected payload fields.
    pub payload: Payload,
}

/// Read-only view of a two-collection vector store.
pub trait VectorIndex: Send + Sync {
    /// Up to `limit` records nearest to `vector`, ordered by ascending L2 distance.
    fn search(
        &self,
        collection: &CollectionName,
        vector: &[f32],
        limit: usize,
        output_fields: &[String],
    ) -> Result<Vec<SearchHit>>;

    /// Up to `limit` payloads matching `filter`, in index-defined order.
    fn query(
        &self,
        collection: &CollectionName,
        filter: &LocationFilter,
        limit: usize,
        output_fields: &[String],
    ) -> Result<Vec<Payload>>;
}
