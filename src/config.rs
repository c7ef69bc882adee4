//! TOML configuration.
//!
//! The whole process runs off one [`Config`] built by [`load_config`] at
//! startup. Tunables come from the file; credentials come from the
//! environment and are read here, once, into [`Secrets`].
//!
//! ```toml
//! [index]
//! name = "sp-docs"
//! endpoint = "https://acme.search.windows.net"
//!
//! [embedding]
//! endpoint = "https://acme.openai.azure.com"
//! model = "text-embedding-ada-002"
//!
//! [source]
//! kind = "sharepoint"
//!
//! [source.sharepoint]
//! site_hostname = "acme.sharepoint.com"
//! site_name = "Engineering"
//! tenant_id = "..."
//! client_id = "..."
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::schema::DistanceMetric;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_search: VectorSearchConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default = "default_search_api_version")]
    pub api_version: String,
}

fn default_search_api_version() -> String {
    "2023-11-01".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_upload_batch_size")]
    pub batch_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_upload_batch_size(),
        }
    }
}

fn default_upload_batch_size() -> usize {
    100
}

/// Largest batch the index store accepts in one request.
pub const MAX_UPLOAD_BATCH: usize = 1000;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Azure OpenAI deployment (`api-key` header, deployment in the URL).
    #[default]
    Azure,
    /// OpenAI-compatible API (`Authorization: Bearer`, model in the body).
    OpenAi,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Service base URL. Defaults to the public OpenAI API for `openai`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Model or deployment name.
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_openai_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_min_backoff_secs")]
    pub min_backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_dims() -> usize {
    1536
}
fn default_openai_api_version() -> String {
    "2024-02-01".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> usize {
    6
}
fn default_min_backoff_secs() -> u64 {
    1
}
fn default_max_backoff_secs() -> u64 {
    20
}

/// HNSW parameters and names for the index's vector-search section.
#[derive(Debug, Deserialize, Clone)]
pub struct VectorSearchConfig {
    #[serde(default = "default_algorithm_name")]
    pub algorithm_name: String,
    #[serde(default = "default_profile_name")]
    pub profile_name: String,
    #[serde(default = "default_m")]
    pub m: u32,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: u32,
    #[serde(default = "default_ef_search")]
    pub ef_search: u32,
    #[serde(default)]
    pub metric: DistanceMetric,
}

impl Default for VectorSearchConfig {
    fn default() -> Self {
        Self {
            algorithm_name: default_algorithm_name(),
            profile_name: default_profile_name(),
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            metric: DistanceMetric::default(),
        }
    }
}

fn default_algorithm_name() -> String {
    "myHnsw".to_string()
}
fn default_profile_name() -> String {
    "myHnswProfile".to_string()
}
fn default_m() -> u32 {
    4
}
fn default_ef_construction() -> u32 {
    400
}
fn default_ef_search() -> u32 {
    1000
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    SharePoint,
    Filesystem,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// File extensions to ingest, without the dot.
    #[serde(default = "default_file_formats")]
    pub file_formats: Vec<String>,
    /// Folders to ingest. Empty means every folder the source lists.
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub sharepoint: Option<SharePointConfig>,
    #[serde(default)]
    pub filesystem: Option<FilesystemSourceConfig>,
}

fn default_file_formats() -> Vec<String> {
    vec!["docx".to_string(), "pdf".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct SharePointConfig {
    pub site_hostname: String,
    pub site_name: String,
    pub tenant_id: String,
    pub client_id: String,
    #[serde(default = "default_graph_base")]
    pub graph_base: String,
    #[serde(default = "default_login_base")]
    pub login_base: String,
}

fn default_graph_base() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}
fn default_login_base() -> String {
    "https://login.microsoftonline.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Paths relative to `root` to skip, in addition to `.git`.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IngestConfig {
    /// Abort the run when a chunk cannot be embedded, instead of skipping it.
    #[serde(default)]
    pub fail_on_embedding_error: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Chat model or deployment name. Required by `docidx chat`.
    #[serde(default)]
    pub deployment: Option<String>,
    /// Falls back to `[embedding].endpoint` when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_openai_api_version")]
    pub api_version: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            deployment: None,
            endpoint: None,
            api_version: default_openai_api_version(),
            top_k: default_top_k(),
            history_path: default_history_path(),
            system_prompt: None,
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_history_path() -> PathBuf {
    PathBuf::from("chat_history.json")
}

/// Credentials read from the environment at startup.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// `SEARCH_ADMIN_API_KEY`
    pub search_api_key: Option<String>,
    /// `AOAI_KEY`, falling back to `OPENAI_API_KEY`
    pub openai_api_key: Option<String>,
    /// `SP_CLIENT_SECRET`
    pub sharepoint_client_secret: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            search_api_key: var("SEARCH_ADMIN_API_KEY"),
            openai_api_key: var("AOAI_KEY").or_else(|| var("OPENAI_API_KEY")),
            sharepoint_client_secret: var("SP_CLIENT_SECRET"),
        }
    }
}

/// Read, parse, and validate the config file, then attach environment secrets.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.secrets = Secrets::from_env();
    Ok(config)
}

/// Parse and validate config text. Secrets are left empty.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.index.name.trim().is_empty() {
        bail!("index.name must not be empty");
    }

    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    if !(1..=MAX_UPLOAD_BATCH).contains(&config.upload.batch_size) {
        bail!("upload.batch_size must be in [1, {}]", MAX_UPLOAD_BATCH);
    }

    let embedding = &config.embedding;
    if embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if embedding.model.trim().is_empty() {
        bail!("embedding.model must not be empty");
    }
    if embedding.max_attempts == 0 {
        bail!("embedding.max_attempts must be >= 1");
    }
    if embedding.min_backoff_secs > embedding.max_backoff_secs {
        bail!("embedding.min_backoff_secs must not exceed embedding.max_backoff_secs");
    }
    if embedding.provider == ProviderKind::Azure && embedding.endpoint.is_none() {
        bail!("embedding.endpoint is required for the azure provider");
    }

    match config.source.kind {
        SourceKind::SharePoint if config.source.sharepoint.is_none() => {
            bail!("[source.sharepoint] is required when source.kind = \"sharepoint\"")
        }
        SourceKind::Filesystem if config.source.filesystem.is_none() => {
            bail!("[source.filesystem] is required when source.kind = \"filesystem\"")
        }
        _ => {}
    }
    if config.source.file_formats.is_empty() {
        bail!("source.file_formats must list at least one extension");
    }

    if config.chat.top_k == 0 {
        bail!("chat.top_k must be > 0");
    }

    Ok(())
}
