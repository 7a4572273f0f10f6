//! Disjunctive location filter used to pull co-located images.

use std::collections::HashSet;

use crate::collections::FieldNames;
use crate::model::{LocationKey, Payload};

/// Distinct set of locations, in first-seen order, rendered as
/// `(doc == D AND page == P) OR ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationFilter {
    keys: Vec<LocationKey>,
}

impl LocationFilter {
    /// Builds a filter, dropping duplicates and keys with a blank document.
    /// Returns `None` when nothing is left to match.
    pub fn from_keys<I>(keys: I) -> Option<Self>
    where
        I: IntoIterator<Item = LocationKey>,
    {
        let mut seen = HashSet::new();
        let keys: Vec<LocationKey> = keys
            .into_iter()
            .filter(|key| !key.source_document.trim().is_empty())
            .filter(|key| seen.insert(key.clone()))
            .collect();
        if keys.is_empty() {
            None
        } else {
            Some(Self { keys })
        }
    }

    /// Locations in the filter.
    pub fn keys(&self) -> &[LocationKey] {
        &self.keys
    }

    /// Exact, case-sensitive membership test.
    pub fn contains(&self, key: &LocationKey) -> bool {
        self.keys.iter().any(|candidate| candidate == key)
    }

    /// Evaluates the filter against a raw payload.
    pub fn matches_payload(&self, payload: &Payload, fields: &FieldNames) -> bool {
        let document = payload.get(&fields.document).and_then(|v| v.as_str());
        let page = payload
            .get(&fields.page)
            .and_then(|v| v.as_u64())
            .and_then(|p| u32::try_from(p).ok());
        match (document, page) {
            (Some(document), Some(page)) => self
                .keys
                .iter()
                .any(|key| key.source_document == document && key.page_number == page),
            _ => false,
        }
    }

    /// Renders the filter in Milvus boolean expression syntax.
    pub fn to_expression(&self, fields: &FieldNames) -> String {
        let terms: Vec<String> = self
            .keys
            .iter()
            .map(|key| {
                format!(
                    "{} == {} and {} == {}",
                    fields.document,
                    quote_literal(&key.source_document),
                    fields.page,
                    key.page_number
                )
            })
            .collect();
        if terms.len() == 1 {
            return terms.into_iter().next().unwrap_or_default();
        }
        terms
            .iter()
            .map(|term| format!("({term})"))
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

/// Double-quoted string literal with backslash escapes.
pub fn quote_literal(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    out.push('"');
    for ch in input.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
