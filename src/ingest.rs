//! Ingestion pipeline orchestration.
//!
//! For each folder: fetch documents → chunk → embed each chunk → build
//! records → upload the folder's records in batches. Everything runs one
//! step at a time; a folder's documents and records are dropped once its
//! upload finishes.
//!
//! Only two things stop a run early: failing to list folders, and (when
//! `ingest.fail_on_embedding_error` is set) a chunk that cannot be
//! embedded. Empty folders, folder fetch errors, failed batches, and
//! rejected records are recorded in the [`IngestionReport`] and the run
//! carries on.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::models::{IndexRecord, SourceDocument};
use crate::progress::{IngestEvent, ProgressMode, ProgressReporter};
use crate::record::{self, record_id};
use crate::schema::{recreate, run_index_create, IndexSchema};
use crate::source::{create_source, DocumentSource};
use crate::store::azure::AzureSearchStore;
use crate::store::IndexStore;
use crate::upload::{upload, UploadReport};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub max_tokens: usize,
    pub batch_size: usize,
    pub formats: Vec<String>,
    pub fail_on_embedding_error: bool,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_tokens: config.chunking.max_tokens,
            batch_size: config.upload.batch_size,
            formats: config.source.file_formats.clone(),
            fail_on_embedding_error: config.ingest.fail_on_embedding_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FolderStatus {
    Ingested,
    Empty,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderReport {
    pub folder: String,
    #[serde(flatten)]
    pub status: FolderStatus,
    pub documents: usize,
    pub chunks: usize,
    /// Chunks left out because their embedding failed.
    pub skipped_chunks: usize,
    pub upload: UploadReport,
}

impl FolderReport {
    fn new(folder: &str, status: FolderStatus) -> Self {
        Self {
            folder: folder.to_string(),
            status,
            documents: 0,
            chunks: 0,
            skipped_chunks: 0,
            upload: UploadReport::default(),
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    pub folders: Vec<FolderReport>,
}

impl IngestionReport {
    /// Records submitted for upload across all folders.
    pub fn total_docs_uploaded(&self) -> usize {
        self.folders.iter().map(|f| f.upload.attempted()).sum()
    }

    pub fn total_indexed(&self) -> usize {
        self.folders.iter().map(|f| f.upload.succeeded()).sum()
    }

    pub fn total_rejected(&self) -> usize {
        self.folders.iter().map(|f| f.upload.rejected()).sum()
    }

    pub fn failed_batches(&self) -> usize {
        self.folders.iter().map(|f| f.upload.failed_batches()).sum()
    }

    pub fn skipped_chunks(&self) -> usize {
        self.folders.iter().map(|f| f.skipped_chunks).sum()
    }

    fn count(&self, pred: impl Fn(&FolderStatus) -> bool) -> usize {
        self.folders.iter().filter(|f| pred(&f.status)).count()
    }

    pub fn empty_folders(&self) -> usize {
        self.count(|s| *s == FolderStatus::Empty)
    }

    pub fn failed_folders(&self) -> usize {
        self.count(|s| matches!(s, FolderStatus::Failed { .. }))
    }
}

/// Drives one ingestion run over borrowed collaborators.
pub struct Ingestor<'a> {
    pub source: &'a dyn DocumentSource,
    pub embedder: &'a Embedder,
    pub store: &'a dyn IndexStore,
    pub reporter: &'a dyn ProgressReporter,
    pub options: IngestOptions,
}

impl Ingestor<'_> {
    /// Ingest `folders` in order.
    pub async fn run(&self, folders: &[String]) -> Result<IngestionReport> {
        let mut report = IngestionReport::default();
        for (i, folder) in folders.iter().enumerate() {
            self.reporter.report(&IngestEvent::FolderStarted {
                folder: folder.clone(),
                n: i + 1,
                total: folders.len(),
            });
            report.folders.push(self.ingest_folder(folder).await?);
        }
        info!(
            folders = folders.len(),
            uploaded = report.total_docs_uploaded(),
            "ingestion finished"
        );
        Ok(report)
    }

    pub async fn ingest_folder(&self, folder: &str) -> Result<FolderReport> {
        let documents = match self
            .source
            .fetch_documents(folder, &self.options.formats)
            .await
        {
            Ok(Some(docs)) if !docs.is_empty() => docs,
            Ok(_) => {
                info!(folder, "no documents found in folder");
                self.reporter.report(&IngestEvent::FolderEmpty {
                    folder: folder.to_string(),
                });
                return Ok(FolderReport::new(folder, FolderStatus::Empty));
            }
            Err(e) => {
                warn!(folder, error = %e, "failed to fetch folder, skipping");
                self.reporter.report(&IngestEvent::FolderFailed {
                    folder: folder.to_string(),
                    error: e.to_string(),
                });
                return Ok(FolderReport::new(
                    folder,
                    FolderStatus::Failed {
                        error: e.to_string(),
                    },
                ));
            }
        };

        let mut report = FolderReport::new(folder, FolderStatus::Ingested);
        report.documents = documents.len();

        let mut records = Vec::new();
        for doc in &documents {
            let (chunks, skipped) = self.build_records(folder, doc, &mut records).await?;
            report.chunks += chunks;
            report.skipped_chunks += skipped;
        }

        self.reporter.report(&IngestEvent::RecordsReady {
            folder: folder.to_string(),
            records: records.len(),
        });

        report.upload = upload(self.store, &records, self.options.batch_size).await;
        for batch in &report.upload.batches {
            self.reporter.report(&IngestEvent::BatchUploaded {
                folder: folder.to_string(),
                batch: batch.index,
                size: batch.size,
                succeeded: batch.succeeded(),
                failed: batch.is_failed(),
            });
        }
        Ok(report)
    }

    /// Chunk and embed one document, appending its records to `out`.
    /// Returns (chunks produced, chunks skipped).
    async fn build_records(
        &self,
        folder: &str,
        doc: &SourceDocument,
        out: &mut Vec<IndexRecord>,
    ) -> Result<(usize, usize)> {
        let chunks = chunk_document(&doc.content, self.options.max_tokens);
        self.reporter.report(&IngestEvent::DocumentChunked {
            folder: folder.to_string(),
            name: doc.name.clone(),
            chunks: chunks.len(),
        });

        let mut skipped = 0;
        for chunk in &chunks {
            match self.embedder.embed(&chunk.text).await {
                Ok(vector) => out.push(record::build(doc, chunk, vector)),
                Err(e) => {
                    let id = record_id(&doc.id, chunk.chunk_id);
                    if self.options.fail_on_embedding_error {
                        return Err(
                            anyhow::Error::new(e).context(format!("Failed to embed chunk {}", id))
                        );
                    }
                    warn!(record_id = %id, error = %e, "embedding failed, chunk left out");
                    self.reporter.report(&IngestEvent::ChunkSkipped {
                        record_id: id,
                        error: e.to_string(),
                    });
                    skipped += 1;
                }
            }
        }
        Ok((chunks.len(), skipped))
    }
}

/// Recreate the index, then ingest. Nothing is ingested if the index
/// cannot be created.
pub async fn recreate_and_ingest(
    ingestor: &Ingestor<'_>,
    schema: &IndexSchema,
    folders: &[String],
) -> Result<IngestionReport> {
    if !recreate(ingestor.store, schema).await {
        bail!("Failed to create index '{}'; nothing was ingested", schema.name);
    }
    ingestor.run(folders).await
}

/// The folders to ingest: the explicit list if any, else every folder the
/// source knows about.
pub async fn resolve_folders(source: &dyn DocumentSource, explicit: &[String]) -> Result<Vec<String>> {
    if !explicit.is_empty() {
        return Ok(explicit.to_vec());
    }
    source
        .list_folders()
        .await
        .with_context(|| format!("Failed to list {} folders", source.kind()))
}

/// Per-folder document and chunk counts, without embedding or uploading.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DryRunReport {
    pub folders: Vec<DryRunFolder>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DryRunFolder {
    pub folder: String,
    pub documents: usize,
    pub chunks: usize,
}

impl DryRunReport {
    pub fn documents(&self) -> usize {
        self.folders.iter().map(|f| f.documents).sum()
    }

    pub fn chunks(&self) -> usize {
        self.folders.iter().map(|f| f.chunks).sum()
    }
}

pub async fn preview(
    source: &dyn DocumentSource,
    folders: &[String],
    options: &IngestOptions,
) -> Result<DryRunReport> {
    let mut report = DryRunReport::default();
    for folder in folders {
        let documents = match source.fetch_documents(folder, &options.formats).await {
            Ok(docs) => docs.unwrap_or_default(),
            Err(e) => {
                warn!(folder, error = %e, "failed to fetch folder, skipping");
                Vec::new()
            }
        };
        let chunks = documents
            .iter()
            .map(|d| chunk_document(&d.content, options.max_tokens).len())
            .sum();
        report.folders.push(DryRunFolder {
            folder: folder.clone(),
            documents: documents.len(),
            chunks,
        });
    }
    Ok(report)
}

/// `docidx ingest`
pub async fn run_ingest(config: &Config, folders: &[String], dry_run: bool, progress: ProgressMode) -> Result<()> {
    let source = create_source(config).await?;
    let explicit = if folders.is_empty() {
        &config.source.folders[..]
    } else {
        folders
    };
    let folders = resolve_folders(source.as_ref(), explicit).await?;
    let options = IngestOptions::from_config(config);

    if dry_run {
        let report = preview(source.as_ref(), &folders, &options).await?;
        println!("ingest {} (dry-run)", source.kind());
        for f in &report.folders {
            println!("  {}  {} documents, {} chunks", f.folder, f.documents, f.chunks);
        }
        println!("  folders: {}", report.folders.len());
        println!("  documents: {}", report.documents());
        println!("  estimated chunks: {}", report.chunks());
        return Ok(());
    }

    let embedder = Embedder::from_config(config)?;
    let store = AzureSearchStore::from_config(config)?;
    let reporter = progress.reporter();
    reporter.report(&IngestEvent::FoldersListed { count: folders.len() });

    let ingestor = Ingestor {
        source: source.as_ref(),
        embedder: &embedder,
        store: &store,
        reporter: reporter.as_ref(),
        options,
    };
    let report = ingestor.run(&folders).await?;
    print_summary(source.kind(), &report);
    Ok(())
}

/// `docidx run`: recreate the index, then ingest.
pub async fn run_full(config: &Config, folders: &[String], progress: ProgressMode) -> Result<()> {
    let store = AzureSearchStore::from_config(config)?;
    let embedder = Embedder::from_config(config)?;
    run_index_create(config, &store)
        .await
        .context("Nothing was ingested")?;

    let source = create_source(config).await?;
    let explicit = if folders.is_empty() {
        &config.source.folders[..]
    } else {
        folders
    };
    let folders = resolve_folders(source.as_ref(), explicit).await?;
    let reporter = progress.reporter();
    reporter.report(&IngestEvent::FoldersListed { count: folders.len() });

    let ingestor = Ingestor {
        source: source.as_ref(),
        embedder: &embedder,
        store: &store,
        reporter: reporter.as_ref(),
        options: IngestOptions::from_config(config),
    };
    let report = ingestor.run(&folders).await?;
    print_summary(source.kind(), &report);
    Ok(())
}

fn print_summary(kind: &str, report: &IngestionReport) {
    println!("ingest {}", kind);
    println!(
        "  folders: {} ({} empty, {} failed)",
        report.folders.len(),
        report.empty_folders(),
        report.failed_folders()
    );
    if report.skipped_chunks() > 0 {
        println!("  chunks skipped (embedding failed): {}", report.skipped_chunks());
    }
    println!(
        "  records indexed: {} ({} rejected, {} failed batches)",
        report.total_indexed(),
        report.total_rejected(),
        report.failed_batches()
    );
    println!("Upload of {} documents complete.", report.total_docs_uploaded());
}

/// `docidx folders`
pub async fn run_folders(config: &Config) -> Result<()> {
    let source = create_source(config).await?;
    for folder in resolve_folders(source.as_ref(), &[]).await? {
        println!("{}", folder);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmbeddingError, SourceError};
    use crate::embedding::EmbeddingClient;
    use crate::progress::NoProgress;
    use crate::retry::RetryPolicy;
    use crate::schema::index_schema;
    use crate::store::memory::InMemoryIndexStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{BTreeSet, HashMap};

    struct MapSource(HashMap<String, Vec<SourceDocument>>);

    #[async_trait]
    impl DocumentSource for MapSource {
        fn kind(&self) -> &str {
            "map"
        }

        async fn list_folders(&self) -> Result<Vec<String>, SourceError> {
            let mut folders: Vec<String> = self.0.keys().cloned().collect();
            folders.sort();
            Ok(folders)
        }

        async fn fetch_documents(
            &self,
            folder: &str,
            _formats: &[String],
        ) -> Result<Option<Vec<SourceDocument>>, SourceError> {
            match folder {
                "/broken" => Err(SourceError::Http {
                    status: 500,
                    body: "boom".into(),
                }),
                _ => Ok(self.0.get(folder).cloned()),
            }
        }
    }

    /// Fails on any text containing "poison".
    struct PickyClient;

    #[async_trait]
    impl EmbeddingClient for PickyClient {
        async fn create_embedding(&self, _model: &str, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("poison") {
                Err(EmbeddingError::Rejected("content filtered".into()))
            } else {
                Ok(vec![1.0; 8])
            }
        }
    }

    fn doc(id: &str, content: &str) -> SourceDocument {
        SourceDocument {
            id: id.to_string(),
            content: content.to_string(),
            name: format!("{}.docx", id),
            created_datetime: Utc::now(),
            created_by: String::new(),
            last_modified_datetime: Utc::now(),
            last_modified_by: String::new(),
            size: content.len() as i64,
            source: "/docs".to_string(),
            read_access_entity: BTreeSet::new(),
        }
    }

    fn options(fail_on_embedding_error: bool) -> IngestOptions {
        IngestOptions {
            max_tokens: 5,
            batch_size: 100,
            formats: vec!["docx".to_string()],
            fail_on_embedding_error,
        }
    }

    fn schema() -> IndexSchema {
        let config = crate::config::parse_config(
            r#"
[index]
name = "unit"
endpoint = "http://localhost"
[embedding]
endpoint = "http://localhost"
model = "m"
dims = 8
[source]
kind = "filesystem"
[source.filesystem]
root = "."
"#,
        )
        .unwrap();
        index_schema(&config)
    }

    #[tokio::test]
    async fn test_empty_and_failed_folders_do_not_stop_the_run() {
        let source = MapSource(HashMap::from([(
            "/docs".to_string(),
            vec![doc("A", "First paragraph.\n\nSecond one.")],
        )]));
        let embedder = Embedder::new(Box::new(PickyClient), "m", 8, RetryPolicy::immediate(1));
        let store = InMemoryIndexStore::new();
        let ingestor = Ingestor {
            source: &source,
            embedder: &embedder,
            store: &store,
            reporter: &NoProgress,
            options: options(false),
        };

        let folders = vec!["/empty".to_string(), "/broken".to_string(), "/docs".to_string()];
        let report = recreate_and_ingest(&ingestor, &schema(), &folders).await.unwrap();

        assert_eq!(report.folders[0].status, FolderStatus::Empty);
        assert!(matches!(report.folders[1].status, FolderStatus::Failed { .. }));
        assert_eq!(report.folders[2].status, FolderStatus::Ingested);
        assert_eq!(report.total_docs_uploaded(), 2);
        assert_eq!(store.ids(), vec!["A-0", "A-1"]);
    }

    #[tokio::test]
    async fn test_embedding_failure_skips_chunk_by_default() {
        let source = MapSource(HashMap::from([(
            "/docs".to_string(),
            vec![doc("A", "Fine text.\n\npoison here\n\nMore text.")],
        )]));
        let embedder = Embedder::new(Box::new(PickyClient), "m", 8, RetryPolicy::immediate(1));
        let store = InMemoryIndexStore::new();
        let ingestor = Ingestor {
            source: &source,
            embedder: &embedder,
            store: &store,
            reporter: &NoProgress,
            options: options(false),
        };

        let report = recreate_and_ingest(&ingestor, &schema(), &["/docs".to_string()])
            .await
            .unwrap();
        assert_eq!(report.folders[0].chunks, 3);
        assert_eq!(report.skipped_chunks(), 1);
        assert_eq!(store.ids(), vec!["A-0", "A-2"]);
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts_when_configured() {
        let source = MapSource(HashMap::from([(
            "/docs".to_string(),
            vec![doc("A", "poison")],
        )]));
        let embedder = Embedder::new(Box::new(PickyClient), "m", 8, RetryPolicy::immediate(1));
        let store = InMemoryIndexStore::new();
        let ingestor = Ingestor {
            source: &source,
            embedder: &embedder,
            store: &store,
            reporter: &NoProgress,
            options: options(true),
        };

        let err = recreate_and_ingest(&ingestor, &schema(), &["/docs".to_string()])
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("A-0"));
        assert_eq!(store.upload_calls(), 0);
    }

    #[tokio::test]
    async fn test_preview_counts_without_uploading() {
        let source = MapSource(HashMap::from([(
            "/docs".to_string(),
            vec![doc("A", "One paragraph.\n\nTwo paragraphs."), doc("B", "Three.")],
        )]));
        let report = preview(&source, &["/docs".to_string(), "/none".to_string()], &options(false))
            .await
            .unwrap();
        assert_eq!(report.documents(), 2);
        assert_eq!(report.chunks(), 3);
        assert_eq!(report.folders[1].documents, 0);
    }

    #[tokio::test]
    async fn test_resolve_folders_prefers_explicit_list() {
        let source = MapSource(HashMap::from([
            ("/a".to_string(), Vec::new()),
            ("/b".to_string(), Vec::new()),
        ]));
        assert_eq!(
            resolve_folders(&source, &["/x".to_string()]).await.unwrap(),
            vec!["/x"]
        );
        assert_eq!(resolve_folders(&source, &[]).await.unwrap(), vec!["/a", "/b"]);
    }
}
