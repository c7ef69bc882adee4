//! Batched upsert of index records.
//!
//! Records go to the store in contiguous batches of at most `batch_size`.
//! Each batch stands alone: if one call fails outright the error is logged
//! and recorded, and the remaining batches are still sent. Records the store
//! rejects inside a successful call are reported but never resubmitted.

use serde::Serialize;
use tracing::{debug, warn};

use crate::models::IndexRecord;
use crate::store::{IndexStore, UploadResult};

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    /// Zero-based position of the batch.
    pub index: usize,
    /// Records in the batch.
    pub size: usize,
    #[serde(flatten)]
    pub status: BatchStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    /// The store answered; one result per record.
    Completed { results: Vec<UploadResult> },
    /// The call itself failed. None of the batch's records are known to be indexed.
    Failed { error: String },
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        match &self.status {
            BatchStatus::Completed { results } => results.iter().filter(|r| r.succeeded).count(),
            BatchStatus::Failed { .. } => 0,
        }
    }

    pub fn rejected(&self) -> impl Iterator<Item = &UploadResult> {
        let results: &[UploadResult] = match &self.status {
            BatchStatus::Completed { results } => results,
            BatchStatus::Failed { .. } => &[],
        };
        results.iter().filter(|r| !r.succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, BatchStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UploadReport {
    pub batches: Vec<BatchOutcome>,
}

impl UploadReport {
    /// Records submitted, whether or not their batch went through.
    pub fn attempted(&self) -> usize {
        self.batches.iter().map(|b| b.size).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.batches.iter().map(BatchOutcome::succeeded).sum()
    }

    pub fn rejected(&self) -> usize {
        self.batches.iter().map(|b| b.rejected().count()).sum()
    }

    pub fn failed_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.is_failed()).count()
    }
}

/// Number of batches `n` records split into.
pub fn batch_count(n: usize, batch_size: usize) -> usize {
    n.div_ceil(batch_size.max(1))
}

/// Send `records` to `store` in order, `batch_size` at a time.
///
/// Never fails as a whole; per-batch errors land in the report.
pub async fn upload(store: &dyn IndexStore, records: &[IndexRecord], batch_size: usize) -> UploadReport {
    let mut report = UploadReport::default();

    for (index, batch) in records.chunks(batch_size.max(1)).enumerate() {
        debug!(batch = index, size = batch.len(), "uploading batch");
        let status = match store.upload_documents(batch).await {
            Ok(results) => {
                for rejected in results.iter().filter(|r| !r.succeeded) {
                    warn!(
                        key = %rejected.key,
                        status = rejected.status_code,
                        error = rejected.error_message.as_deref().unwrap_or(""),
                        "record rejected by index store"
                    );
                }
                BatchStatus::Completed { results }
            }
            Err(e) => {
                warn!(batch = index, size = batch.len(), error = %e, "batch upload failed");
                BatchStatus::Failed {
                    error: e.to_string(),
                }
            }
        };
        report.batches.push(BatchOutcome {
            index,
            size: batch.len(),
            status,
        });
    }

    report
}
