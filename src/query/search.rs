//! Symbol name search across a repository

use super::{require_repo, QueryEnvelope};
use crate::storage::IndexStore;
use crate::symbol::SymbolKind;
use crate::tokens::estimate_tokens;
use crate::{Error, RepoId, Result};
use serde::Serialize;

/// Matches returned when no limit is given
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolMatch {
    pub name: String,
    pub kind: SymbolKind,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub token_count: usize,
    pub signature: Option<String>,
}

/// Symbols whose name contains `query` (case-insensitive), at most `limit`.
pub fn search_query(
    store: &IndexStore,
    repo: &RepoId,
    query: &str,
    kind: Option<SymbolKind>,
    limit: usize,
) -> Result<QueryEnvelope<Vec<SymbolMatch>>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::InvalidRequest("search query is required".to_string()));
    }
    let repository = require_repo(store, repo)?;

    let matches: Vec<SymbolMatch> = store
        .search_symbols(repository.id, query, kind, limit)?
        .into_iter()
        .map(|(path, symbol)| SymbolMatch {
            name: symbol.name,
            kind: symbol.kind,
            path,
            start_line: symbol.start_line,
            end_line: symbol.end_line,
            token_count: symbol.token_count,
            signature: symbol.signature,
        })
        .collect();

    let cost = estimate_tokens(&serde_json::to_string(&matches)?);
    Ok(QueryEnvelope::complete(matches, cost))
}
