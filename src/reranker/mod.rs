//! Second-stage precision ranking with a cross-encoder.
//!
//! The scorer is a separate model from the query embedder: embeddings are tuned for
//! recall, the cross-encoder for precision at the head of the list.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::error::RetrievalError;
use crate::model::{ScoredCandidate, TextChunk};

pub mod http;

pub use http::{HttpScorer, HttpScorerSettings};

/// Scores (query, passage) pairs; higher is more relevant, range unspecified.
pub trait PassageScorer: Send + Sync {
    /// Returns exactly one score per passage, in passage order.
    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>>;
}

/// Reorders coarse candidates by cross-encoder score.
#[derive(Clone)]
pub struct Reranker {
    scorer: Arc<dyn PassageScorer>,
}

impl Reranker {
    /// Wraps a scorer.
    pub fn new(scorer: Arc<dyn PassageScorer>) -> Self {
        Self { scorer }
    }

    /// Scores every candidate and keeps the best `top_n`.
    ///
    /// Ties keep coarse order. Any scoring problem fails the whole call; a partially
    /// scored list is never returned.
    pub fn rerank(
        &self,
        query: &str,
        candidates: Vec<TextChunk>,
        top_n: usize,
    ) -> Result<Vec<ScoredCandidate>, RetrievalError> {
        if candidates.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }
        let passages: Vec<&str> = candidates.iter().map(|c| c.content.as_str()).collect();
        let scores = self
            .scorer
            .score(query, &passages)
            .map_err(|err| RetrievalError::rerank(format!("{err:#}")))?;
        if scores.len() != candidates.len() {
            return Err(RetrievalError::rerank(format!(
                "scorer returned {} scores for {} candidates",
                scores.len(),
                candidates.len()
            )));
        }
        if let Some(position) = scores.iter().position(|score| !score.is_finite()) {
            return Err(RetrievalError::rerank(format!(
                "non-finite score for candidate {}",
                position + 1
            )));
        }

        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .zip(scores)
            .enumerate()
            .map(|(idx, (chunk, rerank_score))| ScoredCandidate {
                chunk,
                coarse_rank: idx + 1,
                rerank_score,
            })
            .collect();
        scored.sort_by(|a, b| b.rerank_score.total_cmp(&a.rerank_score));
        scored.truncate(top_n);
        debug!(kept = scored.len(), "rerank complete");
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct TableScorer(Vec<f32>);

    impl PassageScorer for TableScorer {
        fn score(&self, _query: &str, passages: &[&str]) -> Result<Vec<f32>> {
            Ok(self.0.iter().copied().take(passages.len()).collect())
        }
    }

    struct BrokenScorer;

    impl PassageScorer for BrokenScorer {
        fn score(&self, _query: &str, _passages: &[&str]) -> Result<Vec<f32>> {
            Err(anyhow!("model crashed"))
        }
    }

    fn chunks(n: usize) -> Vec<TextChunk> {
        (0..n)
            .map(|i| TextChunk {
                content: format!("c{i}"),
                source_document: "a.pdf".into(),
                page_number: 1,
                clause_identifier: String::new(),
                embedding: Vec::new(),
            })
            .collect()
    }

    fn order(result: &[ScoredCandidate]) -> Vec<usize> {
        result.iter().map(|c| c.coarse_rank).collect()
    }

    #[test]
    fn sorts_descending_and_truncates() {
        let reranker = Reranker::new(Arc::new(TableScorer(vec![0.1, 0.9, -2.0, 0.5, 0.7])));
        let result = reranker.rerank("q", chunks(5), 3).unwrap();
        assert_eq!(order(&result), vec![2, 5, 4]);
        assert_eq!(result[0].chunk.content, "c1");
    }

    #[test]
    fn ties_keep_coarse_order() {
        let reranker = Reranker::new(Arc::new(TableScorer(vec![0.3, 0.8, 0.8, 0.8])));
        let result = reranker.rerank("q", chunks(4), 3).unwrap();
        assert_eq!(order(&result), vec![2, 3, 4]);
    }

    #[test]
    fn fewer_candidates_than_top_n() {
        let reranker = Reranker::new(Arc::new(TableScorer(vec![0.2, 0.4])));
        let result = reranker.rerank("q", chunks(2), 3).unwrap();
        assert_eq!(order(&result), vec![2, 1]);
    }

    #[test]
    fn empty_input_skips_scorer() {
        let reranker = Reranker::new(Arc::new(BrokenScorer));
        assert!(reranker.rerank("q", Vec::new(), 3).unwrap().is_empty());
        assert!(reranker.rerank("q", chunks(2), 0).unwrap().is_empty());
    }

    #[test]
    fn partial_scores_fail_whole_call() {
        let reranker = Reranker::new(Arc::new(TableScorer(vec![0.2, 0.4])));
        let err = reranker.rerank("q", chunks(3), 3).unwrap_err();
        assert!(matches!(err, RetrievalError::RerankFailure { .. }));
    }

    #[test]
    fn nan_scores_fail() {
        let reranker = Reranker::new(Arc::new(TableScorer(vec![0.2, f32::NAN])));
        assert!(matches!(
            reranker.rerank("q", chunks(2), 3),
            Err(RetrievalError::RerankFailure { .. })
        ));
    }

    #[test]
    fn scorer_error_is_rerank_failure() {
        let reranker = Reranker::new(Arc::new(BrokenScorer));
        let err = reranker.rerank("q", chunks(2), 3).unwrap_err();
        assert!(err.to_string().contains("model crashed"));
    }
}
