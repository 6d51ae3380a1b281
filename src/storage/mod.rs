//! Storage Layer - SQLite-backed index store
//!
//! System of record is SQLite with tables:
//! - repos(owner, name, full_name, last_revision, last_synced_at)
//! - files(repo_id, path, content, language, line_count, token_count, content_id, extractor)
//! - symbols(file_id, name, kind, start_line, end_line, signature, token_count, parent)
//! - sync_leases(repo_key, holder, expires_at)
//!
//! Files are unique per `(repo_id, path)`; symbols cascade with their file.

pub mod schema;
pub mod sqlite;

pub use sqlite::{
    DbStats, FileSummary, FileWrite, IndexStore, IndexedFile, Lease, Repository, WriteOutcome,
};
