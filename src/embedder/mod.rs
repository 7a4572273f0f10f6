//! Query embedding providers.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use anyhow::Result;
use lru::LruCache;

pub mod openai;

pub use openai::{OpenAiEmbedder, OpenAiSettings};

/// Maps text to a fixed-dimension vector. Identical input must give identical output.
pub trait Embedder: Send + Sync {
    /// Embeds a single query string.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Wraps an embedder with an in-memory LRU keyed on the exact query text.
pub struct CachedEmbedder<E> {
    inner: E,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl<E: Embedder> CachedEmbedder<E> {
    /// Builds the wrapper; a capacity of zero disables caching.
    pub fn new(inner: E, capacity: usize) -> Self {
        Self {
            inner,
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }
}

impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let Some(cache) = &self.cache else {
            return self.inner.embed(text);
        };
        if let Some(hit) = cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(text)
            .cloned()
        {
            return Ok(hit);
        }
        // Lock is not held across the model call.
        let embedding = self.inner.embed(text)?;
        cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .put(text.to_string(), embedding.clone());
        Ok(embedding)
    }
}
