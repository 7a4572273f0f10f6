#![warn(missing_docs)]
//! Clause retrieval for engineering-standard corpora: coarse vector recall, cross-encoder
//! rerank, and lookup of figures printed on the same pages.

pub mod api;
pub mod collections;
pub mod config;
pub mod embedder;
pub mod error;
pub mod eval;
pub mod filter;
mod http;
pub mod index;
pub mod linker;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod reranker;
pub mod retriever;

pub use collections::{CollectionName, CollectionSchema};
pub use config::ServiceArgs;
pub use error::{ImageLinkWarning, PayloadError, RetrievalError};
pub use filter::LocationFilter;
pub use linker::{CrossModalLinker, ImageLinks};
pub use model::{ImageRecord, LocationKey, RetrievalResult, ScoredCandidate, TextChunk};
pub use pipeline::{Pipeline, PipelineConfig, Stage};
pub use reranker::Reranker;
pub use retriever::CoarseRetriever;
