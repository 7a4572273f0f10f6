//! Orchestrates recall, rerank and image linking for one query.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info_span};

use crate::collections::CollectionSchema;
use crate::embedder::Embedder;
use crate::error::RetrievalError;
use crate::index::VectorIndex;
use crate::linker::CrossModalLinker;
use crate::model::RetrievalResult;
use crate::reranker::{PassageScorer, Reranker};
use crate::retriever::CoarseRetriever;

/// Upper bound on clauses in a [`RetrievalResult`].
pub const MAX_CLAUSES: usize = 3;

/// Candidate counts for each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Chunks pulled by coarse recall.
    pub coarse_k: usize,
    /// Clauses kept after reranking.
    pub top_n: usize,
    /// Max images returned per query.
    pub image_limit: usize,
}

impl PipelineConfig {
    /// Rejects configurations where rerank could ask for more than recall provides.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.top_n >= 1, "top_n must be at least 1");
        anyhow::ensure!(
            self.top_n <= MAX_CLAUSES,
            "top_n ({}) must not exceed {MAX_CLAUSES}",
            self.top_n
        );
        anyhow::ensure!(
            self.coarse_k >= self.top_n,
            "coarse_k ({}) must be >= top_n ({})",
            self.coarse_k,
            self.top_n
        );
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            coarse_k: 10,
            top_n: 3,
            image_limit: 10,
        }
    }
}

/// Where a run currently is. `Failed` is only reachable from the two text stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Nothing started.
    Idle,
    /// Embedding the query and searching text chunks.
    CoarseRetrieving,
    /// Scoring candidates with the cross-encoder.
    Reranking,
    /// Looking up co-located images.
    LinkingImages,
    /// Result assembled.
    Done,
    /// Aborted by a fatal error.
    Failed,
}

impl Stage {
    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Idle, Stage::CoarseRetrieving)
                | (Stage::CoarseRetrieving, Stage::Reranking)
                | (Stage::CoarseRetrieving, Stage::Failed)
                | (Stage::Reranking, Stage::LinkingImages)
                | (Stage::Reranking, Stage::Failed)
                | (Stage::LinkingImages, Stage::Done)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Idle => "idle",
            Stage::CoarseRetrieving => "coarse_retrieving",
            Stage::Reranking => "reranking",
            Stage::LinkingImages => "linking_images",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(label)
    }
}

struct Progress {
    stage: Stage,
}

impl Progress {
    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal transition {} -> {}",
            self.stage,
            next
        );
        debug!(from = %self.stage, to = %next, "pipeline stage");
        self.stage = next;
    }

    fn fail(&mut self, err: RetrievalError) -> RetrievalError {
        error!(stage = %self.stage, error = %err, "pipeline failed");
        self.advance(Stage::Failed);
        err
    }
}

/// Long-lived, read-only retrieval pipeline. Cheap to clone and safe to share
/// across concurrent queries.
#[derive(Clone)]
pub struct Pipeline {
    retriever: CoarseRetriever,
    reranker: Reranker,
    linker: CrossModalLinker,
    config: PipelineConfig,
}

impl Pipeline {
    /// Wires the pipeline; fails if `config` is inconsistent.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        scorer: Arc<dyn PassageScorer>,
        schema: CollectionSchema,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            retriever: CoarseRetriever::new(embedder, Arc::clone(&index), schema.clone()),
            reranker: Reranker::new(scorer),
            linker: CrossModalLinker::new(index, schema, config.image_limit),
            config,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Answers one query with at most `top_n` clauses and their co-located images.
    ///
    /// Fatal errors come back unchanged and no result is built; image lookup problems
    /// only empty the `images` list.
    pub fn run(&self, query: &str) -> Result<RetrievalResult, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery);
        }
        let span = info_span!("retrieval", query_chars = query.chars().count());
        let _guard = span.enter();
        let mut progress = Progress { stage: Stage::Idle };

        progress.advance(Stage::CoarseRetrieving);
        let candidates = self
            .retriever
            .retrieve(query, self.config.coarse_k)
            .map_err(|err| progress.fail(err))?;

        progress.advance(Stage::Reranking);
        let clauses = self
            .reranker
            .rerank(query, candidates, self.config.top_n)
            .map_err(|err| progress.fail(err))?;

        progress.advance(Stage::LinkingImages);
        let links = self.linker.find_colocated_images(&clauses);

        progress.advance(Stage::Done);
        Ok(RetrievalResult {
            clauses,
            images: links.images,
        })
    }
}
