use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::FilesystemSourceConfig;
use crate::error::SourceError;
use crate::extract::{extension_of, extract_text, matches_format};
use crate::models::SourceDocument;

use super::{DocumentSource, ROOT_FOLDER};

/// Documents from a local directory tree.
///
/// Folder `/` is `root`; `/a/b` is `root/a/b`. A folder's documents are the
/// files directly inside it. Document ids are the SHA-256 of the path
/// relative to `root`, so they are stable across runs and safe as index keys.
pub struct FilesystemSource {
    root: PathBuf,
    follow_symlinks: bool,
    excludes: GlobSet,
}

impl FilesystemSource {
    pub fn new(config: &FilesystemSourceConfig) -> Result<Self> {
        if !config.root.is_dir() {
            bail!(
                "Filesystem source root does not exist: {}",
                config.root.display()
            );
        }

        let mut patterns = vec!["**/.git".to_string(), "**/.git/**".to_string()];
        patterns.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            root: config.root.clone(),
            follow_symlinks: config.follow_symlinks,
            excludes: build_globset(&patterns)?,
        })
    }

    fn is_excluded(&self, relative: &Path) -> bool {
        self.excludes.is_match(relative)
    }

    fn folder_path(&self, folder: &str) -> Result<PathBuf, SourceError> {
        let relative = Path::new(folder.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(SourceError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("folder must be a plain path under the root: {}", folder),
            )));
        }
        Ok(self.root.join(relative))
    }

    fn to_document(&self, path: &Path, folder: &str) -> Result<Option<SourceDocument>, SourceError> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = extension_of(&name).unwrap_or_default();

        let bytes = std::fs::read(path)?;
        let content = match extract_text(&bytes, &extension) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %rel_str, error = %e, "skipping file that failed text extraction");
                return Ok(None);
            }
        };

        let metadata = std::fs::metadata(path)?;
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();
        let created = metadata
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified);

        Ok(Some(SourceDocument {
            id: document_id(&rel_str),
            content,
            name,
            created_datetime: created,
            created_by: String::new(),
            last_modified_datetime: modified,
            last_modified_by: String::new(),
            size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            source: folder.to_string(),
            read_access_entity: BTreeSet::new(),
        }))
    }
}

/// Hex SHA-256 of a root-relative path.
pub fn document_id(relative_path: &str) -> String {
    format!("{:x}", Sha256::digest(relative_path.as_bytes()))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[async_trait]
impl DocumentSource for FilesystemSource {
    fn kind(&self) -> &str {
        "filesystem"
    }

    async fn list_folders(&self) -> Result<Vec<String>, SourceError> {
        let mut folders = vec![ROOT_FOLDER.to_string()];
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let relative = e.path().strip_prefix(&self.root).unwrap_or(e.path());
                !self.is_excluded(relative)
            });

        for entry in walker {
            let entry = entry.map_err(|e| SourceError::Io(io::Error::other(e.to_string())))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            folders.push(format!("/{}", relative.to_string_lossy().replace('\\', "/")));
        }
        Ok(folders)
    }

    async fn fetch_documents(
        &self,
        folder: &str,
        formats: &[String],
    ) -> Result<Option<Vec<SourceDocument>>, SourceError> {
        let dir = self.folder_path(folder)?;
        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name();

        let mut documents = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| SourceError::Io(io::Error::other(e.to_string())))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            let name = entry.file_name().to_string_lossy();
            if self.is_excluded(relative) || !matches_format(&name, formats) {
                continue;
            }
            if let Some(doc) = self.to_document(entry.path(), folder)? {
                documents.push(doc);
            }
        }

        debug!(folder, count = documents.len(), "filesystem folder scanned");
        Ok((!documents.is_empty()).then_some(documents))
    }
}
