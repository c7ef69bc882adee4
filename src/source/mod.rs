//! Document sources.
//!
//! A [`DocumentSource`] enumerates folders and returns the documents inside
//! one folder, already reduced to extracted text plus metadata. Two sources
//! exist:
//!
//! - [`sharepoint::SharePointSource`]: a SharePoint Online document library
//!   through Microsoft Graph.
//! - [`filesystem::FilesystemSource`]: a local directory tree, for trying the
//!   pipeline without a tenant.
//!
//! Folder identifiers are `/`-rooted paths; `/` itself is the top of the
//! library or directory.

pub mod filesystem;
pub mod sharepoint;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::{Config, SourceKind};
use crate::error::SourceError;
use crate::models::SourceDocument;

/// The top-level folder.
pub const ROOT_FOLDER: &str = "/";

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Short label for logs, e.g. `"sharepoint"`.
    fn kind(&self) -> &str;

    /// Every folder, `/` first.
    async fn list_folders(&self) -> Result<Vec<String>, SourceError>;

    /// Documents directly inside `folder` whose extension is in `formats`.
    ///
    /// `Ok(None)` means the folder holds nothing to ingest. Files that fail
    /// text extraction are skipped with a warning, not reported as errors.
    async fn fetch_documents(
        &self,
        folder: &str,
        formats: &[String],
    ) -> Result<Option<Vec<SourceDocument>>, SourceError>;
}

/// Build the source named by `[source].kind`.
pub async fn create_source(config: &Config) -> Result<Box<dyn DocumentSource>> {
    match config.source.kind {
        SourceKind::Filesystem => {
            let fs = config
                .source
                .filesystem
                .as_ref()
                .context("[source.filesystem] not configured")?;
            Ok(Box::new(filesystem::FilesystemSource::new(fs)?))
        }
        SourceKind::SharePoint => {
            let sp = config
                .source
                .sharepoint
                .as_ref()
                .context("[source.sharepoint] not configured")?;
            let secret = config
                .secrets
                .sharepoint_client_secret
                .as_deref()
                .context("SP_CLIENT_SECRET environment variable not set")?;
            let source = sharepoint::SharePointSource::connect(sp, secret)
                .await
                .context("Failed to connect to SharePoint")?;
            Ok(Box::new(source))
        }
    }
}
