//! Cross-encoder scorer behind a Cohere/Jina-style `/rerank` endpoint, such as a
//! self-hosted `bge-reranker-base`.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::PassageScorer;
use crate::http::{json_client, normalize_base_url, RetryPolicy};

/// Connection settings for [`HttpScorer`].
#[derive(Debug, Clone)]
pub struct HttpScorerSettings {
    /// Full rerank endpoint, e.g. `http://127.0.0.1:8081/rerank`.
    pub endpoint: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Optional model name sent with each request.
    pub model: Option<String>,
    /// Max passages per request.
    pub batch_size: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts per request including the first.
    pub max_retries: usize,
}

/// Blocking client for a remote cross-encoder.
#[derive(Clone)]
pub struct HttpScorer {
    client: Client,
    endpoint: String,
    model: Option<String>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl HttpScorer {
    /// Builds a new scorer client.
    pub fn new(settings: HttpScorerSettings) -> Result<Self> {
        let endpoint = normalize_base_url("reranker", &settings.endpoint)?;
        let client = json_client("reranker", settings.api_key.as_deref(), settings.timeout)?;
        Ok(Self {
            client,
            endpoint,
            model: settings.model.filter(|m| !m.trim().is_empty()),
            batch_size: settings.batch_size.max(1),
            retry: RetryPolicy::new(settings.max_retries),
        })
    }

    fn score_batch(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        let request = RerankRequest {
            model: self.model.as_deref(),
            query,
            documents: passages,
            top_n: passages.len(),
            return_documents: false,
        };
        let resp = self
            .retry
            .send("reranker", || self.client.post(&self.endpoint).json(&request))?;
        let parsed: RerankResponse = resp.json().context("failed to parse rerank response")?;
        parsed.into_scores(passages.len())
    }
}

impl PassageScorer for HttpScorer {
    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(passages.len());
        for batch in passages.chunks(self.batch_size) {
            scores.extend(self.score_batch(query, batch)?);
        }
        Ok(scores)
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    query: &'a str,
    documents: &'a [&'a str],
    top_n: usize,
    return_documents: bool,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankEntry>,
}

#[derive(Debug, Deserialize)]
struct RerankEntry {
    index: usize,
    #[serde(alias = "score")]
    relevance_score: f32,
}

impl RerankResponse {
    /// Puts scores back in passage order; every passage must be scored exactly once.
    fn into_scores(self, expected: usize) -> Result<Vec<f32>> {
        let mut slots: Vec<Option<f32>> = vec![None; expected];
        for entry in self.results {
            let slot = slots.get_mut(entry.index).with_context(|| {
                format!("rerank index {} out of range for {expected} passages", entry.index)
            })?;
            anyhow::ensure!(slot.is_none(), "rerank index {} scored twice", entry.index);
            *slot = Some(entry.relevance_score);
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| slot.with_context(|| format!("passage {idx} was not scored")))
            .collect()
    }
}
