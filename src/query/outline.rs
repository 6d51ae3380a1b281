//! File outline query

use super::{require_file, require_repo, QueryEnvelope};
use crate::storage::IndexStore;
use crate::symbol::{Symbol, SymbolKind};
use crate::tokens::estimate_tokens;
use crate::{RepoId, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineNode {
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: usize,
    pub end_line: usize,
    pub token_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OutlineNode>,
}

impl From<Symbol> for OutlineNode {
    fn from(symbol: Symbol) -> Self {
        Self {
            name: symbol.name,
            kind: symbol.kind,
            start_line: symbol.start_line,
            end_line: symbol.end_line,
            token_count: symbol.token_count,
            signature: symbol.signature,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineStats {
    pub total_symbols: usize,
    /// Functions and methods
    pub functions: usize,
    pub classes: usize,
    pub structs: usize,
    /// Type aliases, interfaces and enums
    pub types: usize,
    /// Sum of symbol token counts
    pub total_tokens: usize,
}

impl OutlineStats {
    fn from_symbols(symbols: &[Symbol]) -> Self {
        let mut stats = Self {
            total_symbols: symbols.len(),
            ..Self::default()
        };
        for symbol in symbols {
            match symbol.kind {
                SymbolKind::Function | SymbolKind::Method => stats.functions += 1,
                SymbolKind::Class => stats.classes += 1,
                SymbolKind::Struct => stats.structs += 1,
                SymbolKind::Type | SymbolKind::Interface | SymbolKind::Enum => stats.types += 1,
            }
            stats.total_tokens += symbol.token_count;
        }
        stats
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutline {
    pub path: String,
    pub language: String,
    pub line_count: usize,
    /// Cost of the whole file, for deciding whether to fetch it
    pub total_tokens: usize,
    pub stats: OutlineStats,
    pub outline: Vec<OutlineNode>,
}

/// Nest symbols (in line order) under the containers whose ranges enclose them.
pub fn build_outline(symbols: Vec<Symbol>) -> Vec<OutlineNode> {
    fn attach(node: OutlineNode, stack: &mut [OutlineNode], roots: &mut Vec<OutlineNode>) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => roots.push(node),
        }
    }

    let mut roots = Vec::new();
    let mut stack: Vec<OutlineNode> = Vec::new();

    for symbol in symbols {
        while stack.last().is_some_and(|open| open.end_line < symbol.start_line) {
            if let Some(done) = stack.pop() {
                attach(done, &mut stack, &mut roots);
            }
        }
        let is_container = symbol.kind.is_container();
        let node = OutlineNode::from(symbol);
        if is_container {
            stack.push(node);
        } else {
            attach(node, &mut stack, &mut roots);
        }
    }
    while let Some(done) = stack.pop() {
        attach(done, &mut stack, &mut roots);
    }

    roots
}

/// Outline of `path` with per-kind counts. Never truncated.
pub fn outline_query(store: &IndexStore, repo: &RepoId, path: &str) -> Result<QueryEnvelope<FileOutline>> {
    let repository = require_repo(store, repo)?;
    let file = require_file(store, &repository, path)?;
    let symbols = store.symbols_in_file(file.id)?;

    let outline = FileOutline {
        stats: OutlineStats::from_symbols(&symbols),
        outline: build_outline(symbols),
        path: file.path,
        language: file.language,
        line_count: file.line_count,
        total_tokens: file.token_count,
    };
    let cost = estimate_tokens(&serde_json::to_string(&outline)?);
    Ok(QueryEnvelope::complete(outline, cost))
}
