//! # doc-indexer
//!
//! Turns a document library into a vector search index.
//!
//! Documents are pulled folder by folder from a [`source`] (SharePoint
//! Online through Microsoft Graph, or a local directory), split into
//! bounded passages, embedded one passage at a time, and upserted in
//! batches into an Azure AI Search index whose schema this crate owns.
//! A small retrieval-augmented chat client queries the result.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────────────────────┐   ┌──────────────┐
//! │  Source    │──▶│ Chunk → Embed → Build      │──▶│ Azure Search │
//! │ SP / FS    │   │ (one folder at a time)     │   │ batch upsert │
//! └────────────┘   └────────────────────────────┘   └──────┬───────┘
//!                                                          │
//!                                                    ┌─────▼─────┐
//!                                                    │ docidx    │
//!                                                    │ chat      │
//!                                                    └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docidx index create           # (re)create the index
//! docidx ingest --dry-run       # count documents and chunks
//! docidx ingest                 # embed and upload
//! docidx run                    # recreate, then ingest
//! docidx chat                   # ask questions
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`models`] | Documents, chunks, index records, search hits |
//! | [`chunk`] | Paragraph-boundary chunker |
//! | [`retry`] | Jittered exponential backoff |
//! | [`embedding`] | Embedding provider client and retrying embedder |
//! | [`record`] | Index record construction |
//! | [`schema`] | Index schema definition and recreation |
//! | [`store`] | Index store trait, Azure Search client, in-memory store |
//! | [`upload`] | Batch upserter |
//! | [`source`] | SharePoint and filesystem document sources |
//! | [`extract`] | Text extraction from PDF and OOXML files |
//! | [`ingest`] | Pipeline orchestration and commands |
//! | [`progress`] | Progress reporting |
//! | [`chat`] | Retrieval-augmented chat client |
//! | [`error`] | Error types |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod progress;
pub mod record;
pub mod retry;
pub mod schema;
pub mod source;
pub mod store;
pub mod upload;
