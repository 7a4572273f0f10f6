//! Collection and field names shared by index backends and binaries.

use anyhow::Result;

/// Validated vector-index collection name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionName(String);

impl CollectionName {
    /// Builds a collection name; Milvus accepts `[A-Za-z_][A-Za-z0-9_]*`.
    pub fn new<S>(name: S) -> Result<Self>
    where
        S: Into<String>,
    {
        let name = name.into();
        let trimmed = name.trim();
        anyhow::ensure!(!trimmed.is_empty(), "collection name is required");
        let mut chars = trimmed.chars();
        let first_ok = chars
            .next()
            .map(|ch| ch.is_ascii_alphabetic() || ch == '_')
            .unwrap_or(false);
        anyhow::ensure!(
            first_ok && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_'),
            "invalid collection name {:?}",
            name
        );
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Payload field names used by both collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNames {
    /// Chunk text (text collection).
    pub content: String,
    /// Source document name (both collections).
    pub document: String,
    /// Page number (both collections).
    pub page: String,
    /// Clause identifier (text collection).
    pub clause: String,
    /// Image location (image collection).
    pub image_path: String,
    /// Vector field (both collections).
    pub embedding: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            content: "chunk_text".to_string(),
            document: "doc_name".to_string(),
            page: "page".to_string(),
            clause: "clause_id".to_string(),
            image_path: "image_path".to_string(),
            embedding: "embedding".to_string(),
        }
    }
}

/// Text and image collections plus the fields they expose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    texts: CollectionName,
    images: CollectionName,
    fields: FieldNames,
}

impl CollectionSchema {
    /// Builds a schema from explicit collection names with default field names.
    pub fn new(texts: CollectionName, images: CollectionName) -> Result<Self> {
        anyhow::ensure!(
            texts != images,
            "text and image collections must differ (both {:?})",
            texts.as_str()
        );
        Ok(Self {
            texts,
            images,
            fields: FieldNames::default(),
        })
    }

    /// Text-chunk collection.
    pub fn texts(&self) -> &CollectionName {
        &self.texts
    }

    /// Image collection.
    pub fn images(&self) -> &CollectionName {
        &self.images
    }

    /// Field names.
    pub fn fields(&self) -> &FieldNames {
        &self.fields
    }

    /// Fields projected from coarse search hits. The vector is left out.
    pub fn text_output_fields(&self) -> Vec<String> {
        vec![
            self.fields.content.clone(),
            self.fields.document.clone(),
            self.fields.page.clone(),
            self.fields.clause.clone(),
        ]
    }

    /// Fields projected from image filter queries.
    pub fn image_output_fields(&self) -> Vec<String> {
        vec![
            self.fields.image_path.clone(),
            self.fields.document.clone(),
            self.fields.page.clone(),
        ]
    }
}

impl Default for CollectionSchema {
    fn default() -> Self {
        Self {
            texts: CollectionName("knowlex_texts".to_string()),
            images: CollectionName("knowlex_images".to_string()),
            fields: FieldNames::default(),
        }
    }
}
