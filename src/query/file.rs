//! File content query

use super::budget::BudgetAllocator;
use super::{require_file, require_repo, QueryEnvelope};
use crate::extract::RegexExtractor;
use crate::language::{count_lines, extract_line_range};
use crate::storage::{IndexStore, IndexedFile};
use crate::{Error, RepoId, Result};
use serde::Serialize;

/// Default cap for file and batch responses
pub const DEFAULT_MAX_TOKENS: usize = 8_000;

/// Which part of a file to return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSelector {
    Whole,
    /// 1-indexed, inclusive
    Lines { start: usize, end: usize },
    /// The body of the named symbol
    Function(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSlice {
    pub path: String,
    pub language: String,
    pub content: String,
    /// Lines in the whole file
    pub line_count: usize,
    pub start_line: usize,
    pub end_line: usize,
}

/// Resolve a selector to an inclusive line range within `file`.
fn select_range(file: &IndexedFile, store: &IndexStore, selector: &FileSelector) -> Result<(usize, usize)> {
    match selector {
        FileSelector::Whole => Ok((1, file.line_count)),
        FileSelector::Lines { start, end } => {
            if *start == 0 || end < start {
                return Err(Error::InvalidRequest(format!(
                    "invalid line range {}-{}",
                    start, end
                )));
            }
            if *start > file.line_count {
                return Err(Error::InvalidRequest(format!(
                    "startLine {} is past the end of {} ({} lines)",
                    start, file.path, file.line_count
                )));
            }
            Ok((*start, (*end).min(file.line_count)))
        }
        FileSelector::Function(name) => {
            if let Some(symbol) = store.find_symbol_in_file(file.id, name, &[])? {
                return Ok((symbol.start_line, symbol.end_line));
            }
            // stored symbols can lag the content (e.g. indexed by another extractor)
            RegexExtractor::new()
                .extract_now(&file.content, &file.language)
                .into_iter()
                .find(|s| s.name == *name)
                .map(|s| (s.start_line, s.end_line))
                .ok_or_else(|| Error::SymbolNotFound(format!("{} in {}", name, file.path)))
        }
    }
}

/// Return the selected part of `path`, cut to `max_tokens`.
pub fn file_query(
    store: &IndexStore,
    repo: &RepoId,
    path: &str,
    selector: &FileSelector,
    max_tokens: usize,
) -> Result<QueryEnvelope<FileSlice>> {
    let repository = require_repo(store, repo)?;
    let file = require_file(store, &repository, path)?;
    let (start, end) = select_range(&file, store, selector)?;

    let selected = extract_line_range(&file.content, start, end);
    let mut allocator = BudgetAllocator::new(max_tokens);
    let content = allocator.take_primary(&selected, |max| match selector {
        FileSelector::Whole => format!(
            "Response truncated at {} tokens. Use startLine/endLine or function parameter to get specific sections.",
            max
        ),
        _ => format!(
            "Response truncated at {} tokens. Request a narrower range within lines {}-{}.",
            max, start, end
        ),
    });

    let end_line = if allocator.is_truncated() {
        start + count_lines(content) - 1
    } else {
        end
    };

    let slice = FileSlice {
        path: file.path.clone(),
        language: file.language.clone(),
        content: content.to_string(),
        line_count: file.line_count,
        start_line: start,
        end_line,
    };
    Ok(allocator.finish(slice))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fixtures::{put, repo_id, store};
    use crate::symbol::{ExtractedSymbol, SymbolKind};

    const SOURCE: &str = "import os\n\ndef foo():\n    return 1\n\ndef bar():\n    return 2";

    #[test]
    fn test_whole_file() {
        let (store, repo) = store();
        put(&store, &repo, "a.py", SOURCE, vec![]);

        let result = file_query(&store, &repo_id(), "a.py", &FileSelector::Whole, DEFAULT_MAX_TOKENS).unwrap();
        assert_eq!(result.data.content, SOURCE);
        assert_eq!(result.data.language, "python");
        assert_eq!((result.data.start_line, result.data.end_line), (1, 7));
        assert_eq!(result.meta.total_tokens, crate::estimate_tokens(SOURCE));
        assert!(!result.meta.truncated);
    }

    #[test]
    fn test_line_range_is_clamped() {
        let (store, repo) = store();
        put(&store, &repo, "a.py", SOURCE, vec![]);

        let result = file_query(
            &store,
            &repo_id(),
            "a.py",
            &FileSelector::Lines { start: 6, end: 50 },
            DEFAULT_MAX_TOKENS,
        )
        .unwrap();
        assert_eq!(result.data.content, "def bar():\n    return 2");
        assert_eq!((result.data.start_line, result.data.end_line), (6, 7));
    }

    #[test]
    fn test_invalid_range_is_rejected() {
        let (store, repo) = store();
        put(&store, &repo, "a.py", SOURCE, vec![]);

        for (start, end) in [(0, 3), (5, 4), (99, 100)] {
            let result = file_query(
                &store,
                &repo_id(),
                "a.py",
                &FileSelector::Lines { start, end },
                DEFAULT_MAX_TOKENS,
            );
            assert!(matches!(result, Err(Error::InvalidRequest(_))), "{}-{}", start, end);
        }
    }

    #[test]
    fn test_function_from_stored_symbols() {
        let (store, repo) = store();
        put(
            &store,
            &repo,
            "a.py",
            SOURCE,
            vec![ExtractedSymbol::new("foo", SymbolKind::Function, 3, 4)],
        );

        let result = file_query(&store, &repo_id(), "a.py", &FileSelector::Function("foo".into()), 100).unwrap();
        assert_eq!(result.data.content, "def foo():\n    return 1");
    }

    #[test]
    fn test_function_falls_back_to_live_extraction() {
        let (store, repo) = store();
        put(&store, &repo, "a.py", SOURCE, vec![]);

        let result = file_query(&store, &repo_id(), "a.py", &FileSelector::Function("bar".into()), 100).unwrap();
        assert_eq!((result.data.start_line, result.data.end_line), (6, 7));

        let missing = file_query(&store, &repo_id(), "a.py", &FileSelector::Function("baz".into()), 100);
        assert!(matches!(missing, Err(Error::SymbolNotFound(_))));
    }

    #[test]
    fn test_truncation_sets_hint_and_end_line() {
        let (store, repo) = store();
        let content = (1..=100).map(|i| format!("line {:03}", i)).collect::<Vec<_>>().join("\n");
        put(&store, &repo, "notes.txt", &content, vec![]);

        // "line 001\n" is 9 chars; 10 tokens = 40 chars = 4 full lines + "line"
        let result = file_query(&store, &repo_id(), "notes.txt", &FileSelector::Whole, 10).unwrap();
        assert!(result.meta.truncated);
        assert_eq!(result.meta.total_tokens, 10);
        assert_eq!(result.data.content.chars().count(), 40);
        assert_eq!(result.data.end_line, 5);
        assert!(result.meta.hint.unwrap().contains("startLine/endLine"));
    }
}
