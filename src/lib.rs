//! # repoctx - Repository context index
//!
//! Keeps a locally queryable index of a remote repository's files and
//! declared symbols, and serves it back under strict token budgets.
//!
//! repoctx provides:
//! - Incremental synchronization against a remote host (full and webhook-driven)
//! - Approximate, pluggable symbol extraction (regex + brace matching)
//! - SQLite-backed index store with idempotent upserts
//! - Token-budgeted read-side queries for LLM clients

pub mod config;
pub mod extract;
pub mod language;
pub mod query;
pub mod remote;
pub mod storage;
pub mod symbol;
pub mod sync;
pub mod tokens;
pub mod ui;

// Re-exports for convenient access
pub use extract::{RegexExtractor, SymbolExtractor};
pub use remote::{RemoteError, RemoteHost};
pub use storage::IndexStore;
pub use symbol::{ExtractedSymbol, SymbolKind};
pub use sync::{SyncCoordinator, SyncOutcome, SyncQueue};
pub use tokens::estimate_tokens;

/// Result type alias for repoctx operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for repoctx operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Extractor error: {0}")]
    Extract(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid repository identifier: {0}")]
    InvalidRepo(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Index store lock poisoned")]
    Lock,
}

/// Repository identity: `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/name`. Exactly one slash, both halves non-empty.
    pub fn parse(full_name: &str) -> Result<Self> {
        match full_name.trim().split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(owner, name))
            }
            _ => Err(Error::InvalidRepo(full_name.to_string())),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl std::str::FromStr for RepoId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_id_parse() {
        let id = RepoId::parse("octo/widgets").unwrap();
        assert_eq!(id.owner, "octo");
        assert_eq!(id.name, "widgets");
        assert_eq!(id.full_name(), "octo/widgets");
    }

    #[test]
    fn test_repo_id_rejects_malformed() {
        assert!(RepoId::parse("octo").is_err());
        assert!(RepoId::parse("octo/").is_err());
        assert!(RepoId::parse("/widgets").is_err());
        assert!(RepoId::parse("a/b/c").is_err());
    }
}
