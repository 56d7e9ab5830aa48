//! ragindex - a RAG indexing service
//!
//! This crate provides:
//! - A persisted registry of watched resources (local git repositories and web pages)
//! - A batch indexing pipeline with content-hash deduplication and per-document history
//! - Filesystem watching with per-file debounce for incremental reindexing
//! - Single-leader background work gated by a lock file
//! - Retrieval scoped to one resource, served over HTTP

pub mod config;
pub mod corpus;
pub mod crawl;
pub mod error;
pub mod leader;
pub mod meta;
pub mod pipeline;
pub mod provider;
pub mod retrieve;
pub mod scan;
pub mod server;
pub mod service;
pub mod uri;
pub mod watch;

pub use config::Config;
pub use error::{Error, Result};
