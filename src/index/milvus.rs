//! Milvus REST (v2) client.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{SearchHit, VectorIndex};
use crate::collections::{CollectionName, FieldNames};
use crate::filter::LocationFilter;
use crate::http::{json_client, normalize_base_url, RetryPolicy};
use crate::model::Payload;

/// Connection settings for [`MilvusIndex`].
#[derive(Debug, Clone)]
pub struct MilvusSettings {
    /// Server URI, e.g. `http://localhost:19530`.
    pub uri: String,
    /// Optional `user:password` or API token.
    pub token: Option<String>,
    /// Optional database name.
    pub database: Option<String>,
    /// IVF probe count passed with every search.
    pub nprobe: u32,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts per request including the first.
    pub max_retries: usize,
}

impl Default for MilvusSettings {
    fn default() -> Self {
        Self {
            uri: "http://localhost:19530".to_string(),
            token: None,
            database: None,
            nprobe: 16,
            timeout: Duration::from_secs(10),
            max_retries: 1,
        }
    }
}

/// Blocking Milvus client speaking the `/v2/vectordb` REST API.
#[derive(Clone)]
pub struct MilvusIndex {
    client: Client,
    search_endpoint: String,
    query_endpoint: String,
    database: Option<String>,
    nprobe: u32,
    fields: FieldNames,
    retry: RetryPolicy,
}

impl MilvusIndex {
    /// Builds a client; no request is made until the first search.
    pub fn new(settings: MilvusSettings, fields: FieldNames) -> Result<Self> {
        let base = normalize_base_url("milvus", &settings.uri)?;
        let client = json_client("milvus", settings.token.as_deref(), settings.timeout)?;
        Ok(Self {
            client,
            search_endpoint: format!("{base}/v2/vectordb/entities/search"),
            query_endpoint: format!("{base}/v2/vectordb/entities/query"),
            database: settings.database,
            nprobe: settings.nprobe.max(1),
            fields,
            retry: RetryPolicy::new(settings.max_retries),
        })
    }

    fn post<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<Vec<Payload>> {
        let resp = self
            .retry
            .send("milvus", || self.client.post(endpoint).json(body))?;
        let envelope: Envelope = resp.json().context("failed to parse milvus response")?;
        envelope.into_rows()
    }
}

impl VectorIndex for MilvusIndex {
    fn search(
        &self,
        collection: &CollectionName,
        vector: &[f32],
        limit: usize,
        output_fields: &[String],
    ) -> Result<Vec<SearchHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let request = SearchRequest {
            db_name: self.database.as_deref(),
            collection_name: collection.as_str(),
            data: [vector],
            anns_field: &self.fields.embedding,
            limit,
            output_fields,
            search_params: SearchParams {
                metric_type: "L2",
                params: ProbeParams {
                    nprobe: self.nprobe,
                },
            },
        };
        let rows = self.post(&self.search_endpoint, &request)?;
        rows.into_iter().map(hit_from_row).collect()
    }

    fn query(
        &self,
        collection: &CollectionName,
        filter: &LocationFilter,
        limit: usize,
        output_fields: &[String],
    ) -> Result<Vec<Payload>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let expression = filter.to_expression(&self.fields);
        let request = QueryRequest {
            db_name: self.database.as_deref(),
            collection_name: collection.as_str(),
            filter: &expression,
            limit,
            output_fields,
        };
        self.post(&self.query_endpoint, &request)
    }
}

fn hit_from_row(mut row: Payload) -> Result<SearchHit> {
    let distance = row
        .remove("distance")
        .and_then(|value| value.as_f64())
        .ok_or_else(|| anyhow!("milvus search hit missing distance"))?;
    Ok(SearchHit {
        distance: distance as f32,
        payload: row,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    db_name: Option<&'a str>,
    collection_name: &'a str,
    data: [&'a [f32]; 1],
    anns_field: &'a str,
    limit: usize,
    output_fields: &'a [String],
    search_params: SearchParams,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    metric_type: &'static str,
    params: ProbeParams,
}

#[derive(Serialize)]
struct ProbeParams {
    nprobe: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    db_name: Option<&'a str>,
    collection_name: &'a str,
    filter: &'a str,
    limit: usize,
    output_fields: &'a [String],
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Vec<Value>,
}

impl Envelope {
    fn into_rows(self) -> Result<Vec<Payload>> {
        if self.code != 0 {
            anyhow::bail!(
                "milvus returned code {}: {}",
                self.code,
                self.message.unwrap_or_else(|| "<no message>".to_string())
            );
        }
        self.data
            .into_iter()
            .map(|row| match row {
                Value::Object(map) => Ok(map),
                other => Err(anyhow!("milvus row is not an object: {other}")),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LocationKey;
    use serde_json::json;

    #[test]
    fn search_request_uses_camel_case() {
        let fields = vec!["chunk_text".to_string()];
        let vector = [0.5f32, 1.0];
        let request = SearchRequest {
            db_name: None,
            collection_name: "knowlex_texts",
            data: [&vector[..]],
            anns_field: "embedding",
            limit: 10,
            output_fields: &fields,
            search_params: SearchParams {
                metric_type: "L2",
                params: ProbeParams { nprobe: 16 },
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        pretty_assertions::assert_eq!(
            value,
            json!({
                "collectionName": "knowlex_texts",
                "data": [[0.5, 1.0]],
                "annsField": "embedding",
                "limit": 10,
                "outputFields": ["chunk_text"],
                "searchParams": {"metricType": "L2", "params": {"nprobe": 16}},
            })
        );
    }

    #[test]
    fn query_request_carries_location_expression() {
        let fields = FieldNames::default();
        let filter = LocationFilter::from_keys(vec![
            LocationKey::new("GB50108.pdf", 12),
            LocationKey::new("GB50345.pdf", 3),
        ])
        .unwrap();
        let expression = filter.to_expression(&fields);
        let output_fields = vec!["image_path".to_string(), "doc_name".to_string()];
        let request = QueryRequest {
            db_name: Some("standards"),
            collection_name: "knowlex_images",
            filter: &expression,
            limit: 10,
            output_fields: &output_fields,
        };
        let value = serde_json::to_value(&request).unwrap();
        pretty_assertions::assert_eq!(
            value,
            json!({
                "dbName": "standards",
                "collectionName": "knowlex_images",
                "filter": r#"(doc_name == "GB50108.pdf" and page == 12) or (doc_name == "GB50345.pdf" and page == 3)"#,
                "limit": 10,
                "outputFields": ["image_path", "doc_name"],
            })
        );
    }

    #[test]
    fn parses_search_hits() {
        let envelope: Envelope = serde_json::from_value(json!({
            "code": 0,
            "data": [{"distance": 0.25, "doc_name": "a.pdf", "page": 1, "chunk_text": "x"}],
        }))
        .unwrap();
        let hits: Vec<SearchHit> = envelope
            .into_rows()
            .unwrap()
            .into_iter()
            .map(hit_from_row)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].distance, 0.25);
        assert!(!hits[0].payload.contains_key("distance"));
    }

    #[test]
    fn surfaces_error_codes() {
        let envelope: Envelope = serde_json::from_value(json!({
            "code": 100,
            "message": "collection not found",
        }))
        .unwrap();
        let err = envelope.into_rows().unwrap_err();
        assert!(err.to_string().contains("collection not found"));
    }
}
