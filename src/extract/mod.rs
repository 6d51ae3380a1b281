//! Symbol extraction framework
//!
//! Extractors turn file text into a best-effort list of declarations. They
//! are approximate by design: a regex/brace-matching extractor ships with the
//! crate, and an LLM-backed one can be plugged in behind the same trait.
//! Every extractor's output goes through [`finalize`], the shared
//! post-filter, before it reaches the index.

pub mod llm;
pub mod pattern;

pub use self::llm::LlmExtractor;
pub use self::pattern::RegexExtractor;

use crate::language::count_lines;
use crate::symbol::{ExtractedSymbol, SymbolKind};
use async_trait::async_trait;
use std::collections::HashSet;

/// Names no extractor may report as a declaration.
pub const CONTROL_FLOW_DENYLIST: &[&str] = &[
    "if", "for", "while", "switch", "case", "else", "do", "return", "break",
    "continue", "try", "catch", "default", "goto", "elif", "match", "loop",
    "foreach", "with", "finally", "throw", "new", "sizeof", "typeof",
];

/// Identity of an extractor implementation.
///
/// Stored next to every indexed file so that symbol rows can be treated as a
/// cache of `(content, extractor identity)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractorId {
    pub name: &'static str,
    pub version: u32,
}

impl ExtractorId {
    pub const fn new(name: &'static str, version: u32) -> Self {
        Self { name, version }
    }

    /// Tag persisted in the index, e.g. `regex@1`
    pub fn tag(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

impl std::fmt::Display for ExtractorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Trait for symbol extractors
///
/// Implementations never fail hard: anything they cannot classify or locate
/// is simply left out, so the worst case for a file is an empty list.
#[async_trait]
pub trait SymbolExtractor: Send + Sync {
    /// Identity (name + version) of this extractor
    fn id(&self) -> ExtractorId;

    /// Raw extraction, before the shared post-filter
    async fn extract_raw(&self, content: &str, language: &str) -> Vec<ExtractedSymbol>;

    /// Extract and post-filter
    async fn extract(&self, content: &str, language: &str) -> Vec<ExtractedSymbol> {
        let raw = self.extract_raw(content, language).await;
        finalize(raw, content)
    }
}

/// Whether a name is a control-flow keyword rather than a declaration.
pub fn is_denied(name: &str) -> bool {
    CONTROL_FLOW_DENYLIST.contains(&name.to_ascii_lowercase().as_str())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Shared post-filter applied to every extractor's output.
///
/// - drops control-flow keywords and non-identifier names
/// - drops ranges outside `1 <= start <= end <= line_count`
/// - collapses duplicates on `(name, start_line)`, first one wins
/// - orders by start line and fills in enclosing containers
pub fn finalize(symbols: Vec<ExtractedSymbol>, content: &str) -> Vec<ExtractedSymbol> {
    let line_count = count_lines(content);
    let mut seen = HashSet::new();

    let mut kept: Vec<ExtractedSymbol> = symbols
        .into_iter()
        .filter(|s| is_identifier(&s.name) && !is_denied(&s.name))
        .filter(|s| s.start_line >= 1 && s.start_line <= s.end_line && s.end_line <= line_count)
        .filter(|s| seen.insert((s.name.clone(), s.start_line)))
        .collect();

    kept.sort_by_key(|s| s.start_line);
    assign_parents(&mut kept);
    kept
}

/// Set `parent` to the innermost enclosing container and turn functions
/// declared inside a container into methods.
fn assign_parents(symbols: &mut [ExtractedSymbol]) {
    let containers: Vec<(String, usize, usize, usize)> = symbols
        .iter()
        .enumerate()
        .filter(|(_, s)| s.kind.is_container())
        .map(|(i, s)| (s.name.clone(), s.start_line, s.end_line, i))
        .collect();

    for (idx, symbol) in symbols.iter_mut().enumerate() {
        let innermost = containers
            .iter()
            .filter(|(_, start, end, i)| {
                *i != idx
                    && *start <= symbol.start_line
                    && symbol.end_line <= *end
                    && (*start, *end) != (symbol.start_line, symbol.end_line)
            })
            .min_by_key(|(_, start, end, _)| end - start);

        if let Some((name, ..)) = innermost {
            if symbol.parent.is_none() {
                symbol.parent = Some(name.clone());
            }
            if symbol.kind == SymbolKind::Function {
                symbol.kind = SymbolKind::Method;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HallucinatingExtractor;

    #[async_trait]
    impl SymbolExtractor for HallucinatingExtractor {
        fn id(&self) -> ExtractorId {
            ExtractorId::new("test", 1)
        }

        async fn extract_raw(&self, _content: &str, _language: &str) -> Vec<ExtractedSymbol> {
            vec![
                ExtractedSymbol::new("if", SymbolKind::Function, 1, 1),
                ExtractedSymbol::new("run", SymbolKind::Function, 2, 3),
                ExtractedSymbol::new("run", SymbolKind::Function, 2, 3),
                ExtractedSymbol::new("ghost", SymbolKind::Function, 3, 99),
                ExtractedSymbol::new("not a name", SymbolKind::Class, 1, 1),
            ]
        }
    }

    #[tokio::test]
    async fn test_post_filter_applies_to_pluggable_extractors() {
        let content = "if (x) {}\nfn run() {\n}";
        let symbols = HallucinatingExtractor.extract(content, "rust").await;
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "run");
    }

    #[test]
    fn test_denylist_is_case_insensitive() {
        assert!(is_denied("While"));
        assert!(!is_denied("whilst"));
    }

    #[test]
    fn test_functions_inside_containers_become_methods() {
        let content = "class A {\n  run() {\n  }\n}\nfunction free() {}";
        let symbols = finalize(
            vec![
                ExtractedSymbol::new("A", SymbolKind::Class, 1, 4),
                ExtractedSymbol::new("run", SymbolKind::Function, 2, 3),
                ExtractedSymbol::new("free", SymbolKind::Function, 5, 5),
            ],
            content,
        );
        let run = symbols.iter().find(|s| s.name == "run").unwrap();
        assert_eq!(run.kind, SymbolKind::Method);
        assert_eq!(run.parent.as_deref(), Some("A"));
        let free = symbols.iter().find(|s| s.name == "free").unwrap();
        assert_eq!(free.kind, SymbolKind::Function);
        assert!(free.parent.is_none());
    }

    #[test]
    fn test_extractor_tag() {
        assert_eq!(ExtractorId::new("regex", 2).tag(), "regex@2");
    }
}
