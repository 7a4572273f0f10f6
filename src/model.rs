//! Typed records that flow through the retrieval pipeline.
//!
//! Index payloads arrive as loosely-typed JSON maps; they are converted here, at the
//! boundary, and rejected when a required field is missing or malformed.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::collections::CollectionSchema;
use crate::error::PayloadError;

/// Raw payload returned by the vector index for a single record.
pub type Payload = Map<String, Value>;

/// (document, page) pair joining text chunks to images on the same page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationKey {
    /// Source document name, compared exactly.
    #[serde(rename = "doc_name")]
    pub source_document: String,
    /// 1-based page number.
    #[serde(rename = "page")]
    pub page_number: u32,
}

impl LocationKey {
    /// Builds a key from its components.
    pub fn new(source_document: impl Into<String>, page_number: u32) -> Self {
        Self {
            source_document: source_document.into(),
            page_number,
        }
    }
}

/// Indexed text chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Chunk body.
    pub content: String,
    /// Document the chunk was cut from.
    pub source_document: String,
    /// 1-based page number.
    pub page_number: u32,
    /// Clause number such as `4.2.3`; empty when unknown.
    pub clause_identifier: String,
    /// Stored vector; empty unless the index projected it.
    pub embedding: Vec<f32>,
}

impl TextChunk {
    /// Location of the chunk inside the corpus.
    pub fn location(&self) -> LocationKey {
        LocationKey::new(self.source_document.clone(), self.page_number)
    }

    /// Converts a text-collection payload into a chunk.
    pub fn from_payload(payload: &Payload, schema: &CollectionSchema) -> Result<Self, PayloadError> {
        let fields = schema.fields();
        Ok(Self {
            content: required_str(payload, &fields.content)?,
            source_document: required_str(payload, &fields.document)?,
            page_number: required_page(payload, &fields.page)?,
            clause_identifier: optional_str(payload, &fields.clause)?,
            embedding: optional_vector(payload, &fields.embedding)?,
        })
    }
}

/// Indexed figure extracted from a document page.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// Where the image file lives.
    pub storage_path: String,
    /// Document the image was extracted from.
    pub source_document: String,
    /// 1-based page number.
    pub page_number: u32,
    /// Stored vector; empty unless the index projected it.
    pub embedding: Vec<f32>,
}

impl ImageRecord {
    /// Location of the image inside the corpus.
    pub fn location(&self) -> LocationKey {
        LocationKey::new(self.source_document.clone(), self.page_number)
    }

    /// Converts an image-collection payload into a record.
    pub fn from_payload(payload: &Payload, schema: &CollectionSchema) -> Result<Self, PayloadError> {
        let fields = schema.fields();
        Ok(Self {
            storage_path: required_str(payload, &fields.image_path)?,
            source_document: required_str(payload, &fields.document)?,
            page_number: required_page(payload, &fields.page)?,
            embedding: optional_vector(payload, &fields.embedding)?,
        })
    }
}

impl Serialize for ImageRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ImageRecord", 3)?;
        state.serialize_field("image_path", &self.storage_path)?;
        state.serialize_field("doc_name", &self.source_document)?;
        state.serialize_field("page", &self.page_number)?;
        state.end()
    }
}

/// Chunk paired with its reranker score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    /// Retrieved chunk.
    pub chunk: TextChunk,
    /// 1-based position in the coarse retrieval list.
    pub coarse_rank: usize,
    /// Cross-encoder relevance; only the ordering is meaningful.
    pub rerank_score: f32,
}

impl Serialize for ScoredCandidate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ScoredCandidate", 5)?;
        state.serialize_field("content", &self.chunk.content)?;
        state.serialize_field("doc_name", &self.chunk.source_document)?;
        state.serialize_field("page", &self.chunk.page_number)?;
        state.serialize_field("clause_id", &self.chunk.clause_identifier)?;
        state.serialize_field("rerank_score", &self.rerank_score)?;
        state.end()
    }
}

/// Final answer for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    /// Reranked clauses, best first.
    pub clauses: Vec<ScoredCandidate>,
    /// Figures sharing a page with one of the clauses.
    pub images: Vec<ImageRecord>,
}

fn required_str(payload: &Payload, field: &str) -> Result<String, PayloadError> {
    match payload.get(field) {
        None | Some(Value::Null) => Err(PayloadError::MissingField(field.to_string())),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Err(PayloadError::InvalidField {
            field: field.to_string(),
            reason: format!("expected string, found {other}"),
        }),
    }
}

fn optional_str(payload: &Payload, field: &str) -> Result<String, PayloadError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(_) => required_str(payload, field),
    }
}

fn required_page(payload: &Payload, field: &str) -> Result<u32, PayloadError> {
    let value = payload
        .get(field)
        .filter(|value| !value.is_null())
        .ok_or_else(|| PayloadError::MissingField(field.to_string()))?;
    let page = value
        .as_u64()
        .and_then(|page| u32::try_from(page).ok())
        .ok_or_else(|| PayloadError::InvalidField {
            field: field.to_string(),
            reason: format!("expected positive integer, found {value}"),
        })?;
    if page == 0 {
        return Err(PayloadError::InvalidField {
            field: field.to_string(),
            reason: "page numbers start at 1".to_string(),
        });
    }
    Ok(page)
}

fn optional_vector(payload: &Payload, field: &str) -> Result<Vec<f32>, PayloadError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_f64()
                    .map(|v| v as f32)
                    .ok_or_else(|| PayloadError::InvalidField {
                        field: field.to_string(),
                        reason: format!("non-numeric vector component {item}"),
                    })
            })
            .collect(),
        Some(other) => Err(PayloadError::InvalidField {
            field: field.to_string(),
            reason: format!("expected array, found {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn converts_text_payload() {
        let schema = CollectionSchema::default();
        let chunk = TextChunk::from_payload(
            &payload(json!({
                "chunk_text": "穿墙管应设置防水套管",
                "doc_name": "GB50108.pdf",
                "page": 12,
                "clause_id": "4.1.2",
            })),
            &schema,
        )
        .expect("valid payload");
        assert_eq!(chunk.page_number, 12);
        assert_eq!(chunk.clause_identifier, "4.1.2");
        assert!(chunk.embedding.is_empty());
        assert_eq!(chunk.location(), LocationKey::new("GB50108.pdf", 12));
    }

    #[test]
    fn missing_clause_defaults_to_empty() {
        let schema = CollectionSchema::default();
        let chunk = TextChunk::from_payload(
            &payload(json!({"chunk_text": "x", "doc_name": "a.pdf", "page": 1})),
            &schema,
        )
        .expect("clause is optional");
        assert_eq!(chunk.clause_identifier, "");
    }

    #[test]
    fn rejects_missing_document() {
        let schema = CollectionSchema::default();
        let err = TextChunk::from_payload(&payload(json!({"chunk_text": "x", "page": 3})), &schema)
            .unwrap_err();
        assert_eq!(err, PayloadError::MissingField("doc_name".to_string()));
    }

    #[test]
    fn rejects_zero_and_negative_pages() {
        let schema = CollectionSchema::default();
        for page in [json!(0), json!(-2), json!("7")] {
            let err = ImageRecord::from_payload(
                &payload(json!({"image_path": "/img/1.png", "doc_name": "a.pdf", "page": page})),
                &schema,
            )
            .unwrap_err();
            assert!(matches!(err, PayloadError::InvalidField { .. }));
        }
    }

    #[test]
    fn serializes_result_with_wire_keys() {
        let result = RetrievalResult {
            clauses: vec![ScoredCandidate {
                chunk: TextChunk {
                    content: "text".into(),
                    source_document: "a.pdf".into(),
                    page_number: 2,
                    clause_identifier: "3.1".into(),
                    embedding: vec![0.1, 0.2],
                },
                coarse_rank: 1,
                rerank_score: 0.5,
            }],
            images: vec![ImageRecord {
                storage_path: "/img/a-2.png".into(),
                source_document: "a.pdf".into(),
                page_number: 2,
                embedding: Vec::new(),
            }],
        };
        let value = serde_json::to_value(&result).expect("serialize");
        pretty_assertions::assert_eq!(
            value,
            json!({
                "clauses": [{
                    "content": "text",
                    "doc_name": "a.pdf",
                    "page": 2,
                    "clause_id": "3.1",
                    "rerank_score": 0.5,
                }],
                "images": [{"image_path": "/img/a-2.png", "doc_name": "a.pdf", "page": 2}],
            })
        );
    }
}
