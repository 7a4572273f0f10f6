//! Command-line / environment configuration shared by the binaries.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use crate::collections::{CollectionName, CollectionSchema};
use crate::embedder::{CachedEmbedder, OpenAiEmbedder, OpenAiSettings};
use crate::index::{MilvusIndex, MilvusSettings};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::reranker::{HttpScorer, HttpScorerSettings};

/// Collaborator endpoints and pipeline knobs. Flatten into a binary's `Parser`.
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    /// Milvus server URI.
    #[arg(long, env = "KNOWLEX_MILVUS_URI", default_value = "http://localhost:19530")]
    pub milvus_uri: String,

    /// Milvus token (`user:password` or API key).
    #[arg(long, env = "KNOWLEX_MILVUS_TOKEN")]
    pub milvus_token: Option<String>,

    /// Milvus database name.
    #[arg(long, env = "KNOWLEX_MILVUS_DB")]
    pub milvus_db: Option<String>,

    /// IVF probe count for text searches.
    #[arg(long, env = "KNOWLEX_MILVUS_NPROBE", default_value_t = 16)]
    pub milvus_nprobe: u32,

    /// Collection holding text chunks.
    #[arg(long, env = "KNOWLEX_TEXT_COLLECTION", default_value = "knowlex_texts")]
    pub text_collection: String,

    /// Collection holding page images.
    #[arg(long, env = "KNOWLEX_IMAGE_COLLECTION", default_value = "knowlex_images")]
    pub image_collection: String,

    /// Bearer token for the embedding endpoint.
    #[arg(long, env = "KNOWLEX_EMBED_API_KEY", default_value = "")]
    pub embed_api_key: String,

    /// Base URL of an OpenAI-compatible embeddings API.
    #[arg(long, env = "KNOWLEX_EMBED_BASE", default_value = "http://127.0.0.1:9997/v1")]
    pub embed_base_url: String,

    /// Embedding model identifier.
    #[arg(long, env = "KNOWLEX_EMBED_MODEL", default_value = "moka-ai/m3e-base")]
    pub embed_model: String,

    /// Expected embedding dimension, forwarded to the API when set.
    #[arg(long, env = "KNOWLEX_EMBED_DIMENSIONS")]
    pub embed_dimensions: Option<usize>,

    /// Max cached query embeddings (0 disables caching).
    #[arg(long, env = "KNOWLEX_EMBED_CACHE", default_value_t = 1024)]
    pub embedding_cache_size: usize,

    /// Cross-encoder rerank endpoint.
    #[arg(long, env = "KNOWLEX_RERANK_URL", default_value = "http://127.0.0.1:8081/rerank")]
    pub rerank_url: String,

    /// Bearer token for the rerank endpoint.
    #[arg(long, env = "KNOWLEX_RERANK_API_KEY")]
    pub rerank_api_key: Option<String>,

    /// Reranker model identifier sent with each request.
    #[arg(long, env = "KNOWLEX_RERANK_MODEL", default_value = "BAAI/bge-reranker-base")]
    pub rerank_model: String,

    /// Max passages per rerank request.
    #[arg(long, env = "KNOWLEX_RERANK_BATCH", default_value_t = 32)]
    pub rerank_batch_size: usize,

    /// Seconds before any collaborator request times out.
    #[arg(long, env = "KNOWLEX_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Attempts per collaborator request; values above 1 retry transient errors.
    #[arg(long, env = "KNOWLEX_MAX_RETRIES", default_value_t = 1)]
    pub max_retries: usize,

    /// Chunks pulled by coarse recall.
    #[arg(long, env = "KNOWLEX_COARSE_K", default_value_t = 10)]
    pub coarse_k: usize,

    /// Clauses kept after reranking (1 to 3).
    #[arg(long, env = "KNOWLEX_TOP_N", default_value_t = 3)]
    pub top_n: usize,

    /// Max images returned per query.
    #[arg(long, env = "KNOWLEX_IMAGE_LIMIT", default_value_t = 10)]
    pub image_limit: usize,
}

impl ServiceArgs {
    /// Stage sizes from the flags.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            coarse_k: self.coarse_k,
            top_n: self.top_n,
            image_limit: self.image_limit,
        }
    }

    /// Collection names from the flags.
    pub fn schema(&self) -> Result<CollectionSchema> {
        CollectionSchema::new(
            CollectionName::new(self.text_collection.clone())?,
            CollectionName::new(self.image_collection.clone())?,
        )
    }

    /// Builds the shared pipeline and its HTTP collaborators. Call off the async runtime:
    /// the clients are blocking.
    pub fn build_pipeline(&self) -> Result<Pipeline> {
        self.pipeline_config().validate()?;
        let timeout = Duration::from_secs(self.timeout_secs.max(1));
        let schema = self.schema()?;
        let embedder = OpenAiEmbedder::new(OpenAiSettings {
            api_key: self.embed_api_key.clone(),
            base_url: self.embed_base_url.clone(),
            model: self.embed_model.clone(),
            dimensions: self.embed_dimensions,
            timeout,
            max_retries: self.max_retries,
        })
        .context("invalid embedder configuration")?;
        let index = MilvusIndex::new(
            MilvusSettings {
                uri: self.milvus_uri.clone(),
                token: self.milvus_token.clone(),
                database: self.milvus_db.clone(),
                nprobe: self.milvus_nprobe,
                timeout,
                max_retries: self.max_retries,
            },
            schema.fields().clone(),
        )
        .context("invalid Milvus configuration")?;
        let scorer = HttpScorer::new(HttpScorerSettings {
            endpoint: self.rerank_url.clone(),
            api_key: self.rerank_api_key.clone(),
            model: Some(self.rerank_model.clone()),
            batch_size: self.rerank_batch_size,
            timeout,
            max_retries: self.max_retries,
        })
        .context("invalid reranker configuration")?;
        Pipeline::new(
            Arc::new(CachedEmbedder::new(embedder, self.embedding_cache_size)),
            Arc::new(index),
            Arc::new(scorer),
            schema,
            self.pipeline_config(),
        )
    }
}
