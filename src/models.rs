//! Core data models that flow through the ingestion pipeline.
//!
//! A [`SourceDocument`] comes out of a document source, the chunker turns its
//! content into [`Chunk`]s, and each chunk plus its embedding becomes one
//! [`IndexRecord`], the unit persisted to the search index.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One file from the document store, with its extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Store-assigned, stable identifier.
    pub id: String,
    /// Full extracted text.
    pub content: String,
    pub name: String,
    pub created_datetime: DateTime<Utc>,
    pub created_by: String,
    pub last_modified_datetime: DateTime<Utc>,
    pub last_modified_by: String,
    /// Size of the stored file in bytes.
    pub size: i64,
    /// Folder path or URL the document was fetched from.
    pub source: String,
    /// Principal identifiers with read access.
    pub read_access_entity: BTreeSet<String>,
}

/// A bounded slice of a document's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position within the parent document.
    pub chunk_id: usize,
    pub text: String,
}

/// One entry of the nested access-control collection on an [`IndexRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub list_item: String,
}

/// The flat record upserted into the index store, one per chunk.
///
/// Serializes to the store's wire shape, including the camel-cased
/// `contentVector` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// `<doc_id>-<chunk_id>`; the index key.
    pub id: String,
    pub doc_id: String,
    pub chunk_id: usize,
    pub name: String,
    pub created_datetime: DateTime<Utc>,
    pub created_by: String,
    pub size: i64,
    pub last_modified_datetime: DateTime<Utc>,
    pub last_modified_by: String,
    pub source: String,
    pub content: String,
    #[serde(rename = "contentVector")]
    pub content_vector: Vec<f32>,
    pub read_access_entity: Vec<AccessEntry>,
}

/// A retrieval hit returned by a vector query against the index.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub doc_id: String,
    pub chunk_id: usize,
    pub name: String,
    pub source: String,
    pub content: String,
    #[serde(rename = "@search.score", default)]
    pub score: f64,
}
