//! Remote host boundary
//!
//! The sync engine only ever talks to the code host through [`RemoteHost`].
//! Two implementations ship with the crate:
//! - [`GitHubClient`]: GitHub REST v3 over reqwest
//! - [`InMemoryRemote`]: a scriptable in-process host used by tests

pub mod github;
pub mod memory;

pub use self::github::GitHubClient;
pub use self::memory::InMemoryRemote;

use crate::RepoId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors raised by a remote host.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed (check GITHUB_TOKEN): {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("remote returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Missing path or repository. On the webhook path this means "deleted".
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Descriptive repository metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub description: Option<String>,
    pub language: Option<String>,
    pub default_branch: Option<String>,
}

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
    Commit,
}

/// One entry of a recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    /// Content-identity marker of this version of the entry
    pub sha: String,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::Blob
    }
}

/// Raw content of one file plus its content-identity marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub content: String,
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
    pub message: String,
}

/// Operations the engine needs from a code host.
///
/// `reference` is anything the host resolves to a revision: a branch name or
/// a commit id.
#[async_trait]
pub trait RemoteHost: Send + Sync {
    /// Repository metadata
    async fn repo_metadata(&self, repo: &RepoId) -> RemoteResult<RepoMetadata>;

    /// Current head revision marker of `branch`
    async fn head_revision(&self, repo: &RepoId, branch: &str) -> RemoteResult<String>;

    /// Full recursive tree listing at `reference`
    async fn list_tree(&self, repo: &RepoId, reference: &str) -> RemoteResult<Vec<TreeEntry>>;

    /// Raw content of a single path
    async fn fetch_file(&self, repo: &RepoId, path: &str, reference: &str) -> RemoteResult<RemoteFile>;

    /// Content-identity marker of a single path, without a tree listing
    async fn file_content_id(&self, repo: &RepoId, path: &str, reference: &str) -> RemoteResult<String>;

    /// Commits on `branch` newer than `since`, newest first
    async fn commits_since(&self, repo: &RepoId, branch: &str, since: &str) -> RemoteResult<Vec<CommitSummary>>;

    /// Paths touched by one commit
    async fn commit_files(&self, repo: &RepoId, sha: &str) -> RemoteResult<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(RemoteError::NotFound("a.py".into()).is_not_found());
        assert!(!RemoteError::Network("reset".into()).is_not_found());
    }

    #[test]
    fn test_tree_entry_kind_deserializes_lowercase() {
        let entry: TreeEntry =
            serde_json::from_str(r#"{"path":"src","sha":"abc","kind":"tree"}"#).unwrap();
        assert_eq!(entry.kind, EntryKind::Tree);
        assert!(!entry.is_file());
    }
}
