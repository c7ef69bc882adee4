//! End-to-end pipeline runs against an in-memory index and fake
//! collaborators.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use doc_indexer::config::{parse_config, Config};
use doc_indexer::embedding::{Embedder, EmbeddingClient};
use doc_indexer::error::{EmbeddingError, SourceError, StoreError};
use doc_indexer::ingest::{recreate_and_ingest, FolderStatus, IngestOptions, Ingestor};
use doc_indexer::models::{IndexRecord, SearchHit, SourceDocument};
use doc_indexer::progress::{IngestEvent, NoProgress, ProgressReporter};
use doc_indexer::retry::RetryPolicy;
use doc_indexer::schema::{index_schema, recreate, IndexSchema};
use doc_indexer::source::DocumentSource;
use doc_indexer::store::memory::InMemoryIndexStore;
use doc_indexer::store::{IndexStore, UploadResult};

const DIMS: usize = 4;

fn test_config() -> Config {
    parse_config(
        r#"
[index]
name = "sp-docs"
endpoint = "http://localhost"

[embedding]
endpoint = "http://localhost"
model = "text-embedding-ada-002"
dims = 4

[source]
kind = "filesystem"

[source.filesystem]
root = "."
"#,
    )
    .unwrap()
}

/// 25 sentences of 39 characters: 999 characters, 250 estimated tokens.
fn two_hundred_fifty_tokens() -> String {
    vec!["The quick brown fox jumps over the dog."; 25].join(" ")
}

fn document(id: &str, content: &str) -> SourceDocument {
    SourceDocument {
        id: id.to_string(),
        content: content.to_string(),
        name: format!("{}.docx", id),
        created_datetime: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        created_by: "alice@example.com".to_string(),
        last_modified_datetime: Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap(),
        last_modified_by: "bob@example.com".to_string(),
        size: content.len() as i64,
        source: "https://example.sharepoint.com/Shared%20Documents/D1.docx".to_string(),
        read_access_entity: BTreeSet::from(["group-1".to_string(), "user-1".to_string()]),
    }
}

struct FakeSource {
    folders: HashMap<String, Vec<SourceDocument>>,
}

#[async_trait]
impl DocumentSource for FakeSource {
    fn kind(&self) -> &str {
        "fake"
    }

    async fn list_folders(&self) -> Result<Vec<String>, SourceError> {
        let mut folders: Vec<String> = self.folders.keys().cloned().collect();
        folders.sort();
        Ok(folders)
    }

    async fn fetch_documents(
        &self,
        folder: &str,
        _formats: &[String],
    ) -> Result<Option<Vec<SourceDocument>>, SourceError> {
        Ok(self.folders.get(folder).cloned())
    }
}

/// Deterministic vectors derived from the text length; counts calls.
#[derive(Default)]
struct CountingClient {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingClient for CountingClient {
    async fn create_embedding(&self, _model: &str, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = text.len() as f32;
        Ok(vec![1.0, n, n * 0.5, 0.25])
    }
}

/// Wraps the in-memory store and fails the upload call numbered `fail_call`
/// (1-based).
struct FlakyStore {
    inner: InMemoryIndexStore,
    fail_call: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl IndexStore for FlakyStore {
    async fn delete_index(&self, name: &str) -> Result<(), StoreError> {
        self.inner.delete_index(name).await
    }

    async fn create_index(&self, schema: &IndexSchema) -> Result<IndexSchema, StoreError> {
        self.inner.create_index(schema).await
    }

    async fn upload_documents(&self, records: &[IndexRecord]) -> Result<Vec<UploadResult>, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_call {
            return Err(StoreError::Http {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        self.inner.upload_documents(records).await
    }

    async fn vector_search(&self, vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>, StoreError> {
        self.inner.vector_search(vector, top_k).await
    }
}

#[derive(Default)]
struct CollectingReporter {
    events: std::sync::Mutex<Vec<IngestEvent>>,
}

impl ProgressReporter for CollectingReporter {
    fn report(&self, event: &IngestEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn options(config: &Config) -> IngestOptions {
    IngestOptions::from_config(config)
}

#[tokio::test]
async fn test_single_document_becomes_three_records() {
    let config = test_config();
    let source = FakeSource {
        folders: HashMap::from([("/".to_string(), vec![document("D1", &two_hundred_fifty_tokens())])]),
    };
    let client = CountingClient::default();
    let embedder = Embedder::new(Box::new(client), "text-embedding-ada-002", DIMS, RetryPolicy::immediate(6));
    let store = InMemoryIndexStore::new();
    let reporter = CollectingReporter::default();
    let ingestor = Ingestor {
        source: &source,
        embedder: &embedder,
        store: &store,
        reporter: &reporter,
        options: options(&config),
    };

    let report = recreate_and_ingest(&ingestor, &index_schema(&config), &["/".to_string()])
        .await
        .unwrap();

    assert_eq!(report.total_docs_uploaded(), 3);
    assert_eq!(report.total_indexed(), 3);
    assert_eq!(store.ids(), vec!["D1-0", "D1-1", "D1-2"]);
    assert_eq!(store.upload_calls(), 1);

    let record = store.get("D1-1").unwrap();
    assert_eq!(record.doc_id, "D1");
    assert_eq!(record.chunk_id, 1);
    assert_eq!(record.name, "D1.docx");
    assert_eq!(record.created_by, "alice@example.com");
    assert_eq!(record.content_vector.len(), DIMS);
    let principals: Vec<&str> = record
        .read_access_entity
        .iter()
        .map(|e| e.list_item.as_str())
        .collect();
    assert_eq!(principals, vec!["group-1", "user-1"]);

    let events = reporter.events.lock().unwrap();
    assert!(events.contains(&IngestEvent::RecordsReady {
        folder: "/".to_string(),
        records: 3,
    }));
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let config = test_config();
    let source = FakeSource {
        folders: HashMap::from([("/".to_string(), vec![document("D1", &two_hundred_fifty_tokens())])]),
    };
    let embedder = Embedder::new(
        Box::new(CountingClient::default()),
        "text-embedding-ada-002",
        DIMS,
        RetryPolicy::immediate(6),
    );
    let store = InMemoryIndexStore::new();
    let ingestor = Ingestor {
        source: &source,
        embedder: &embedder,
        store: &store,
        reporter: &NoProgress,
        options: options(&config),
    };
    let schema = index_schema(&config);
    let folders = vec!["/".to_string()];

    recreate_and_ingest(&ingestor, &schema, &folders).await.unwrap();
    let first = store.get("D1-2").unwrap();

    // A plain second ingest upserts over the same keys.
    let report = ingestor.run(&folders).await.unwrap();
    assert_eq!(report.total_docs_uploaded(), 3);
    assert_eq!(store.len(), 3);
    assert_eq!(store.get("D1-2").unwrap(), first);
}

#[tokio::test]
async fn test_failed_batch_does_not_stop_later_batches() {
    let mut config = test_config();
    config.upload.batch_size = 2;
    config.chunking.max_tokens = 5;

    // Five short paragraphs, each its own chunk: batches of 2, 2, 1.
    let text = (1..=5)
        .map(|i| format!("Paragraph number {}.", i))
        .collect::<Vec<_>>()
        .join("\n\n");
    let source = FakeSource {
        folders: HashMap::from([("/docs".to_string(), vec![document("D2", &text)])]),
    };
    let embedder = Embedder::new(
        Box::new(CountingClient::default()),
        "text-embedding-ada-002",
        DIMS,
        RetryPolicy::immediate(6),
    );
    let store = FlakyStore {
        inner: InMemoryIndexStore::new(),
        fail_call: 2,
        calls: AtomicUsize::new(0),
    };
    let ingestor = Ingestor {
        source: &source,
        embedder: &embedder,
        store: &store,
        reporter: &NoProgress,
        options: options(&config),
    };

    let report = recreate_and_ingest(&ingestor, &index_schema(&config), &["/docs".to_string()])
        .await
        .unwrap();

    let folder = &report.folders[0];
    assert_eq!(folder.status, FolderStatus::Ingested);
    assert_eq!(folder.chunks, 5);
    assert_eq!(folder.upload.batches.len(), 3);
    assert!(!folder.upload.batches[0].is_failed());
    assert!(folder.upload.batches[1].is_failed());
    assert!(!folder.upload.batches[2].is_failed());
    assert_eq!(report.failed_batches(), 1);
    assert_eq!(report.total_docs_uploaded(), 5);
    assert_eq!(report.total_indexed(), 3);
    assert_eq!(store.inner.ids(), vec!["D2-0", "D2-1", "D2-4"]);
}

#[tokio::test]
async fn test_folders_processed_in_order_with_empty_ones_skipped() {
    let config = test_config();
    let source = FakeSource {
        folders: HashMap::from([
            ("/a".to_string(), vec![document("A", "Alpha.")]),
            ("/b".to_string(), Vec::new()),
            ("/c".to_string(), vec![document("C", "Gamma.")]),
        ]),
    };
    let embedder = Embedder::new(
        Box::new(CountingClient::default()),
        "text-embedding-ada-002",
        DIMS,
        RetryPolicy::immediate(6),
    );
    let store = InMemoryIndexStore::new();
    let reporter = CollectingReporter::default();
    let ingestor = Ingestor {
        source: &source,
        embedder: &embedder,
        store: &store,
        reporter: &reporter,
        options: options(&config),
    };
    let folders = doc_indexer::ingest::resolve_folders(&source, &[]).await.unwrap();

    let report = recreate_and_ingest(&ingestor, &index_schema(&config), &folders)
        .await
        .unwrap();

    assert_eq!(report.empty_folders(), 1);
    assert_eq!(report.total_docs_uploaded(), 2);
    assert_eq!(store.ids(), vec!["A-0", "C-0"]);

    let started: Vec<String> = reporter
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            IngestEvent::FolderStarted { folder, .. } => Some(folder.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["/a", "/b", "/c"]);
}

#[tokio::test]
async fn test_recreate_on_missing_index_succeeds() {
    let store = InMemoryIndexStore::new();
    let schema = index_schema(&test_config());
    assert!(recreate(&store, &schema).await);
    assert_eq!(store.index_name().as_deref(), Some("sp-docs"));

    // Recreating again drops the records.
    store
        .upload_documents(&[doc_indexer::record::build(
            &document("D1", "x"),
            &doc_indexer::models::Chunk {
                chunk_id: 0,
                text: "x".to_string(),
            },
            vec![0.0; DIMS],
        )])
        .await
        .unwrap();
    assert_eq!(store.len(), 1);
    assert!(recreate(&store, &schema).await);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_invalid_vector_dimensions_create_nothing() {
    let store = InMemoryIndexStore::new();
    let mut schema = index_schema(&test_config());
    for field in &mut schema.fields {
        if field.dimensions.is_some() {
            field.dimensions = Some(0);
        }
    }

    assert!(!recreate(&store, &schema).await);
    assert!(store.index_name().is_none());

    let source = FakeSource {
        folders: HashMap::from([("/".to_string(), vec![document("D1", "text")])]),
    };
    let embedder = Embedder::new(
        Box::new(CountingClient::default()),
        "text-embedding-ada-002",
        DIMS,
        RetryPolicy::immediate(6),
    );
    let ingestor = Ingestor {
        source: &source,
        embedder: &embedder,
        store: &store,
        reporter: &NoProgress,
        options: options(&test_config()),
    };
    assert!(recreate_and_ingest(&ingestor, &schema, &["/".to_string()])
        .await
        .is_err());
    assert_eq!(store.upload_calls(), 0);
}
