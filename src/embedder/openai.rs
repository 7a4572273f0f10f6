//! OpenAI-compatible embedding client (works with hosted OpenAI and local servers
//! exposing `/v1/embeddings`, e.g. for `moka-ai/m3e-base`).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::http::{json_client, normalize_base_url, RetryPolicy};

/// Connection settings for [`OpenAiEmbedder`].
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    /// Bearer token; may be empty for unauthenticated local servers.
    pub api_key: String,
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Optional dimension override forwarded to the API.
    pub dimensions: Option<usize>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts per request including the first.
    pub max_retries: usize,
}

/// Blocking embeddings client.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    /// Builds a new client.
    pub fn new(settings: OpenAiSettings) -> Result<Self> {
        anyhow::ensure!(!settings.model.trim().is_empty(), "missing embedding model name");
        let base = normalize_base_url("embedding", &settings.base_url)?;
        let client = json_client("embedding", Some(&settings.api_key), settings.timeout)?;
        Ok(Self {
            client,
            endpoint: format!("{base}/embeddings"),
            model: settings.model,
            dimensions: settings.dimensions,
            retry: RetryPolicy::new(settings.max_retries),
        })
    }

    /// Sends a batch of strings and returns one vector per input, in input order.
    pub fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions,
        };
        let resp = self.retry.send("embedding", || {
            self.client.post(&self.endpoint).json(&request)
        })?;
        let parsed: EmbeddingResponse = resp
            .json()
            .context("failed to parse embedding response")?;
        parsed.into_vectors(inputs.len(), self.dimensions)
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| anyhow!("embedding endpoint returned no vector"))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl EmbeddingResponse {
    fn into_vectors(mut self, expected: usize, dimensions: Option<usize>) -> Result<Vec<Vec<f32>>> {
        anyhow::ensure!(
            self.data.len() == expected,
            "embedding endpoint returned {} vectors for {} inputs",
            self.data.len(),
            expected
        );
        self.data.sort_by_key(|entry| entry.index);
        if let Some(dim) = dimensions {
            if let Some(bad) = self.data.iter().find(|entry| entry.embedding.len() != dim) {
                anyhow::bail!(
                    "embedding {} has dimension {}, expected {}",
                    bad.index,
                    bad.embedding.len(),
                    dim
                );
            }
        }
        Ok(self.data.into_iter().map(|entry| entry.embedding).collect())
    }
}
