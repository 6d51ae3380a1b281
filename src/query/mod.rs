//! Read-side queries
//!
//! Every query returns a [`QueryEnvelope`]: the payload plus the tokens it
//! spent, whether anything was cut, and a hint for fetching the rest.
//! - `context`: a symbol with the types it references and the signatures it calls
//! - `file`: a whole file, a line range, or one function
//! - `batch`: many file slices under one shared budget
//! - `outline`: nested symbol outline with per-kind counts
//! - `search`: symbols whose name contains a substring
//! - `diff`: files changed since a revision

pub mod batch;
pub mod budget;
pub mod context;
pub mod diff;
pub mod file;
pub mod outline;
pub mod search;

pub use batch::{batch_query, BatchEntry, BatchItem, BatchResult, MAX_BATCH_REQUESTS};
pub use budget::{BudgetAllocator, Tier};
pub use context::{context_query, CalledFunction, ContextResult, ContextTarget, ReferencedType, CONTEXT_BUDGET};
pub use diff::{diff_report, DiffReport};
pub use file::{file_query, FileSelector, FileSlice, DEFAULT_MAX_TOKENS};
pub use outline::{outline_query, FileOutline, OutlineNode, OutlineStats};
pub use search::{search_query, SymbolMatch, DEFAULT_SEARCH_LIMIT};

use crate::storage::{IndexStore, IndexedFile, Repository};
use crate::{Error, RepoId, Result};
use serde::Serialize;

/// Accounting attached to every query response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryMeta {
    pub total_tokens: usize,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryEnvelope<T> {
    pub data: T,
    #[serde(rename = "_meta")]
    pub meta: QueryMeta,
}

impl<T> QueryEnvelope<T> {
    pub fn new(data: T, total_tokens: usize, truncated: bool, hint: Option<String>) -> Self {
        Self {
            data,
            meta: QueryMeta {
                total_tokens,
                truncated,
                hint,
            },
        }
    }

    /// Envelope for an untruncated payload
    pub fn complete(data: T, total_tokens: usize) -> Self {
        Self::new(data, total_tokens, false, None)
    }
}

fn require_repo(store: &IndexStore, repo: &RepoId) -> Result<Repository> {
    store
        .get_repo(repo)?
        .ok_or_else(|| Error::RepoNotFound(repo.full_name()))
}

fn require_file(store: &IndexStore, repo: &Repository, path: &str) -> Result<IndexedFile> {
    store
        .get_file(repo.id, path)?
        .ok_or_else(|| Error::FileNotFound(format!("{}:{}", repo.full_name, path)))
}
