//! In-memory [`IndexStore`] implementation for tests and dry runs.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock`. Upserts replace by key the
//! way the real service does, records whose vector length doesn't match the
//! schema are rejected individually, and vector search is brute-force cosine
//! similarity.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{IndexRecord, SearchHit};
use crate::schema::IndexSchema;

use super::{IndexStore, UploadResult};

#[derive(Default)]
struct State {
    schema: Option<IndexSchema>,
    records: BTreeMap<String, IndexRecord>,
    upload_calls: usize,
}

#[derive(Default)]
pub struct InMemoryIndexStore {
    state: RwLock<State>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the current index, if one has been created.
    pub fn index_name(&self) -> Option<String> {
        self.read().schema.as_ref().map(|s| s.name.clone())
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record ids in key order.
    pub fn ids(&self) -> Vec<String> {
        self.read().records.keys().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<IndexRecord> {
        self.read().records.get(id).cloned()
    }

    /// Number of `upload_documents` calls, successful or not.
    pub fn upload_calls(&self) -> usize {
        self.read().upload_calls
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn delete_index(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.write();
        match &state.schema {
            Some(schema) if schema.name == name => {
                state.schema = None;
                state.records.clear();
                Ok(())
            }
            _ => Err(StoreError::NotFound(name.to_string())),
        }
    }

    async fn create_index(&self, schema: &IndexSchema) -> Result<IndexSchema, StoreError> {
        let mut state = self.write();
        if state.schema.is_some() {
            return Err(StoreError::Http {
                status: 409,
                body: format!("index '{}' already exists", schema.name),
            });
        }
        state.schema = Some(schema.clone());
        Ok(schema.clone())
    }

    async fn upload_documents(&self, records: &[IndexRecord]) -> Result<Vec<UploadResult>, StoreError> {
        let mut state = self.write();
        state.upload_calls += 1;
        let dims = match &state.schema {
            Some(schema) => schema.vector_dimensions(),
            None => return Err(StoreError::NotFound("no index has been created".into())),
        };

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let result = match dims {
                Some(d) if record.content_vector.len() != d => UploadResult {
                    key: record.id.clone(),
                    succeeded: false,
                    status_code: 400,
                    error_message: Some(format!(
                        "contentVector has {} dimensions, expected {}",
                        record.content_vector.len(),
                        d
                    )),
                },
                _ => {
                    let existed = state
                        .records
                        .insert(record.id.clone(), record.clone())
                        .is_some();
                    UploadResult {
                        key: record.id.clone(),
                        succeeded: true,
                        status_code: if existed { 200 } else { 201 },
                        error_message: None,
                    }
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn vector_search(&self, vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>, StoreError> {
        let state = self.read();
        if state.schema.is_none() {
            return Err(StoreError::NotFound("no index has been created".into()));
        }

        let mut scored: Vec<(f32, &IndexRecord)> = state
            .records
            .values()
            .map(|r| (cosine_sim(vector, &r.content_vector), r))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, r)| SearchHit {
                id: r.id.clone(),
                doc_id: r.doc_id.clone(),
                chunk_id: r.chunk_id,
                name: r.name.clone(),
                source: r.source.clone(),
                content: r.content.clone(),
                score: f64::from(score),
            })
            .collect())
    }
}
