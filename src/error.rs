//! Error kinds at each collaborator seam.
//!
//! Components return these typed errors so callers can tell an expected,
//! absorbable condition (a rejected record, a missing index on delete) from
//! a terminal one. Command-level code wraps them in `anyhow`.

use thiserror::Error;

/// Failure from the embedding provider or the [`Embedder`](crate::embedding::Embedder) around it.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Rate limiting, server error, or network failure. Worth retrying.
    #[error("transient embedding provider error: {0}")]
    Transient(String),
    /// The provider refused the request (bad input, auth, unknown model).
    #[error("embedding provider rejected the request: {0}")]
    Rejected(String),
    /// The provider answered with a vector of the wrong length.
    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimension { expected: usize, actual: usize },
    /// Every attempt allowed by the retry policy failed transiently.
    #[error("embedding failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: usize,
        #[source]
        source: Box<EmbeddingError>,
    },
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Transient(_))
    }
}

/// Failure talking to the search index store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("index store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("index store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("index not found: {0}")]
    NotFound(String),
    #[error("invalid index store response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid index schema: {0}")]
    Invalid(String),
}

/// Failure from a document source (SharePoint, filesystem).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("document source returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("document source request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("document source I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("document source authentication failed: {0}")]
    Auth(String),
    #[error("invalid document source response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("chat request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid chat response: {0}")]
    InvalidResponse(String),
}

/// Text extraction failure. The pipeline skips the item and keeps going.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("text file is not valid UTF-8")]
    Encoding,
}
