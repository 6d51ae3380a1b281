//! Symbol context query
//!
//! Returns a symbol's own source, then the same-file types its source
//! mentions, then signatures of same-file functions it calls, each tier
//! filling what the previous one left of the budget.

use super::budget::{BudgetAllocator, Tier, SIGNATURE_COST};
use super::{require_file, require_repo, QueryEnvelope};
use crate::extract::is_denied;
use crate::language::extract_line_range;
use crate::storage::IndexStore;
use crate::symbol::{Symbol, SymbolKind};
use crate::tokens::estimate_tokens;
use crate::{Error, RepoId, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Default budget for a context query
pub const CONTEXT_BUDGET: usize = 10_000;

/// Referenced type names considered per query
const MAX_TYPE_CANDIDATES: usize = 10;

/// Callee names considered per query
const MAX_CALLEE_CANDIDATES: usize = 20;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextTarget {
    pub name: String,
    pub kind: SymbolKind,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferencedType {
    pub name: String,
    pub kind: SymbolKind,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalledFunction {
    pub name: String,
    pub path: String,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextResult {
    pub target: ContextTarget,
    pub referenced_types: Vec<ReferencedType>,
    pub called_functions: Vec<CalledFunction>,
}

fn type_name_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z][a-zA-Z0-9_]*)\b").ok())
        .as_ref()
}

fn call_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b([a-z][a-z0-9_]*)\s*\(").ok())
        .as_ref()
}

/// Distinct capture-group-1 matches in first-seen order, excluding `exclude`.
fn distinct_names<'t>(pattern: Option<&Regex>, text: &'t str, exclude: &str, limit: usize) -> Vec<&'t str> {
    let Some(re) = pattern else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .filter(|name| *name != exclude && !is_denied(name))
        .filter(|name| seen.insert(*name))
        .take(limit)
        .collect()
}

/// Capitalized identifiers in `text`, the candidates for referenced types.
pub fn referenced_type_names<'t>(text: &'t str, exclude: &str) -> Vec<&'t str> {
    distinct_names(type_name_pattern(), text, exclude, MAX_TYPE_CANDIDATES)
}

/// Identifiers followed by `(`, the candidates for callees.
pub fn callee_names<'t>(text: &'t str, exclude: &str) -> Vec<&'t str> {
    distinct_names(call_pattern(), text, exclude, MAX_CALLEE_CANDIDATES)
}

/// Assemble the context of symbol `name` in `path` under `budget` tokens.
pub fn context_query(
    store: &IndexStore,
    repo: &RepoId,
    path: &str,
    name: &str,
    budget: usize,
) -> Result<QueryEnvelope<ContextResult>> {
    let repository = require_repo(store, repo)?;
    let file = require_file(store, &repository, path)?;
    let symbol = store
        .find_symbol_in_file(file.id, name, &[])?
        .ok_or_else(|| Error::SymbolNotFound(format!("{} in {}", name, path)))?;

    let mut allocator = BudgetAllocator::new(budget);

    let source = extract_line_range(&file.content, symbol.start_line, symbol.end_line);
    let content = allocator
        .take_primary(&source, |max| {
            format!(
                "Symbol truncated at {} tokens. Use the file query with startLine={} endLine={} to read it in parts.",
                max, symbol.start_line, symbol.end_line
            )
        })
        .to_string();

    let referenced_types = allocator.fill_tier(
        Tier::Secondary,
        referenced_type_names(&source, name),
        |type_name| -> Result<Option<(usize, ReferencedType)>> {
            let Some(found) = store.find_symbol_in_file(file.id, type_name, SymbolKind::type_kinds())? else {
                return Ok(None);
            };
            let body = extract_line_range(&file.content, found.start_line, found.end_line);
            let cost = estimate_tokens(&body);
            let referenced = ReferencedType {
                name: found.name,
                kind: found.kind,
                content: body,
            };
            Ok(Some((cost, referenced)))
        },
    )?;

    let callable: Vec<SymbolKind> = SymbolKind::all()
        .iter()
        .copied()
        .filter(SymbolKind::is_callable)
        .collect();
    let called_functions = allocator.fill_tier(
        Tier::Tertiary,
        callee_names(&source, name),
        |callee| -> Result<Option<(usize, CalledFunction)>> {
            let Some(found) = store.find_symbol_in_file(file.id, callee, &callable)? else {
                return Ok(None);
            };
            let called = CalledFunction {
                name: found.name,
                path: path.to_string(),
                signature: found.signature,
            };
            Ok(Some((SIGNATURE_COST, called)))
        },
    )?;

    Ok(allocator.finish(ContextResult {
        target: target_of(symbol, content),
        referenced_types,
        called_functions,
    }))
}

fn target_of(symbol: Symbol, content: String) -> ContextTarget {
    ContextTarget {
        name: symbol.name,
        kind: symbol.kind,
        content,
        start_line: symbol.start_line,
        end_line: symbol.end_line,
    }
}
