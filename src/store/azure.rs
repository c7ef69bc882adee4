//! Azure AI Search REST client.
//!
//! All calls authenticate with the admin `api-key` header and pin the
//! configured `api-version`. No call is retried here; a failure goes straight
//! back to the caller.
//!
//! | Operation | Request |
//! |---|---|
//! | delete index | `DELETE /indexes/{name}` |
//! | create index | `POST /indexes` |
//! | upload | `POST /indexes/{name}/docs/index` with `@search.action = upload` |
//! | vector query | `POST /indexes/{name}/docs/search` with `vectorQueries` |

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::StoreError;
use crate::models::{IndexRecord, SearchHit};
use crate::schema::IndexSchema;

use super::{IndexStore, UploadResult};

pub struct AzureSearchStore {
    http: reqwest::Client,
    endpoint: String,
    index_name: String,
    api_version: String,
    api_key: String,
}

#[derive(Serialize)]
struct IndexAction<'a> {
    #[serde(rename = "@search.action")]
    action: &'static str,
    #[serde(flatten)]
    record: &'a IndexRecord,
}

#[derive(Serialize)]
struct IndexBatch<'a> {
    value: Vec<IndexAction<'a>>,
}

#[derive(Deserialize)]
struct IndexingResponse {
    value: Vec<IndexingResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexingResult {
    key: String,
    status: bool,
    #[serde(default)]
    error_message: Option<String>,
    status_code: u16,
}

#[derive(Deserialize)]
struct SearchResponse {
    value: Vec<SearchHit>,
}

impl AzureSearchStore {
    pub fn new(endpoint: &str, index_name: &str, api_version: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            index_name: index_name.to_string(),
            api_version: api_version.to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = config
            .secrets
            .search_api_key
            .as_deref()
            .context("SEARCH_ADMIN_API_KEY environment variable not set")?;
        Ok(Self::new(
            &config.index.endpoint,
            &config.index.name,
            &config.index.api_version,
            api_key,
        ))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, path, self.api_version)
    }

    async fn error_from(response: reqwest::Response) -> StoreError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        StoreError::Http { status, body }
    }
}

#[async_trait]
impl IndexStore for AzureSearchStore {
    async fn delete_index(&self, name: &str) -> Result<(), StoreError> {
        let response = self
            .http
            .delete(self.url(&format!("/indexes/{}", name)))
            .header("api-key", &self.api_key)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(name.to_string())),
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn create_index(&self, schema: &IndexSchema) -> Result<IndexSchema, StoreError> {
        let response = self
            .http
            .post(self.url("/indexes"))
            .header("api-key", &self.api_key)
            .json(schema)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        response
            .json::<IndexSchema>()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }

    async fn upload_documents(&self, records: &[IndexRecord]) -> Result<Vec<UploadResult>, StoreError> {
        let batch = IndexBatch {
            value: records
                .iter()
                .map(|record| IndexAction {
                    action: "upload",
                    record,
                })
                .collect(),
        };

        let response = self
            .http
            .post(self.url(&format!("/indexes/{}/docs/index", self.index_name)))
            .header("api-key", &self.api_key)
            .json(&batch)
            .send()
            .await?;

        // 207 means some records failed; the body still lists every record.
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::MULTI_STATUS {
            return Err(Self::error_from(response).await);
        }

        let parsed: IndexingResponse = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;

        Ok(parsed
            .value
            .into_iter()
            .map(|r| UploadResult {
                key: r.key,
                succeeded: r.status,
                status_code: r.status_code,
                error_message: r.error_message,
            })
            .collect())
    }

    async fn vector_search(&self, vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>, StoreError> {
        let body = serde_json::json!({
            "select": "id,doc_id,chunk_id,name,source,content",
            "top": top_k,
            "vectorQueries": [{
                "kind": "vector",
                "vector": vector,
                "fields": "contentVector",
                "k": top_k,
            }],
        });

        let response = self
            .http
            .post(self.url(&format!("/indexes/{}/docs/search", self.index_name)))
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
        Ok(parsed.value)
    }
}
