//! Index store abstraction.
//!
//! The [`IndexStore`] trait is everything the pipeline needs from the search
//! service: index delete and create, batched record upsert with per-record
//! outcomes, and a vector query for the chat client. An instance is bound to
//! one index name.
//!
//! - [`azure::AzureSearchStore`] speaks the Azure AI Search REST API.
//! - [`memory::InMemoryIndexStore`] keeps everything in process, for tests
//!   and dry runs.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod azure;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;
use crate::models::{IndexRecord, SearchHit};
use crate::schema::IndexSchema;

/// The store's verdict on one record of an upload call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    /// The record's `id`.
    pub key: String,
    pub succeeded: bool,
    pub status_code: u16,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Delete the index called `name`. [`StoreError::NotFound`] if absent.
    async fn delete_index(&self, name: &str) -> Result<(), StoreError>;

    /// Create an index and return the schema as the store recorded it.
    async fn create_index(&self, schema: &IndexSchema) -> Result<IndexSchema, StoreError>;

    /// Upsert records, keyed by `id`. `Err` means the whole call failed;
    /// otherwise there is one [`UploadResult`] per record.
    async fn upload_documents(&self, records: &[IndexRecord]) -> Result<Vec<UploadResult>, StoreError>;

    /// The `top_k` records nearest to `vector`, best first.
    async fn vector_search(&self, vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>, StoreError>;
}
