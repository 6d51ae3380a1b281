//! Batch file query
//!
//! Items share one budget and are served in the order given. An item that
//! fails or does not fit carries its own error; the rest still go through.

use super::budget::BudgetAllocator;
use super::{require_repo, QueryEnvelope};
use crate::language::extract_line_range;
use crate::storage::IndexStore;
use crate::tokens::estimate_tokens;
use crate::{Error, RepoId, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on items per batch
pub const MAX_BATCH_REQUESTS: usize = 20;

/// Lines returned after `startLine` when no `endLine` is given
const OPEN_RANGE_SPAN: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub start_line: Option<usize>,
    #[serde(default)]
    pub end_line: Option<usize>,
}

impl BatchItem {
    pub fn whole(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn lines(path: impl Into<String>, start: usize, end: Option<usize>) -> Self {
        Self {
            path: path.into(),
            start_line: Some(start),
            end_line: end,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub path: String,
    pub content: String,
    pub language: String,
    pub line_count: usize,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    fn failed(path: &str, error: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub results: Vec<BatchEntry>,
    pub total_tokens: usize,
}

/// Serve `items` in order under a shared `max_tokens` budget.
pub fn batch_query(
    store: &IndexStore,
    repo: &RepoId,
    items: &[BatchItem],
    max_tokens: usize,
) -> Result<QueryEnvelope<BatchResult>> {
    if items.is_empty() {
        return Err(Error::InvalidRequest("requests must not be empty".to_string()));
    }
    if items.len() > MAX_BATCH_REQUESTS {
        return Err(Error::InvalidRequest(format!(
            "Maximum {} requests per batch",
            MAX_BATCH_REQUESTS
        )));
    }

    let repository = require_repo(store, repo)?;
    let mut allocator = BudgetAllocator::new(max_tokens);
    let mut results = Vec::with_capacity(items.len());
    let mut skipped = 0;

    for item in items {
        if item.path.is_empty() {
            results.push(BatchEntry::failed("", "path is required"));
            continue;
        }
        let Some(file) = store.get_file(repository.id, &item.path)? else {
            results.push(BatchEntry::failed(&item.path, "File not found"));
            continue;
        };

        let (start, end) = match (item.start_line, item.end_line) {
            (Some(start), Some(end)) => (start, end.min(file.line_count)),
            (Some(start), None) => (start, (start + OPEN_RANGE_SPAN).min(file.line_count)),
            _ => (1, file.line_count),
        };
        if start == 0 || end < start {
            results.push(BatchEntry::failed(
                &item.path,
                format!("invalid line range {}-{}", start, end),
            ));
            continue;
        }

        let content = extract_line_range(&file.content, start, end);
        let cost = estimate_tokens(&content);
        if !allocator.try_spend(cost) {
            skipped += 1;
            results.push(BatchEntry::failed(
                &item.path,
                format!(
                    "Skipped: token budget exceeded ({} > {})",
                    allocator.spent() + cost,
                    max_tokens
                ),
            ));
            continue;
        }

        results.push(BatchEntry {
            path: file.path,
            content,
            language: file.language,
            line_count: file.line_count,
            start_line: start,
            end_line: end,
            error: None,
        });
    }

    if skipped > 0 {
        allocator.mark_truncated(format!(
            "{} request(s) skipped for budget. Request them separately or raise maxTokens.",
            skipped
        ));
    }

    let total_tokens = allocator.spent();
    Ok(allocator.finish(BatchResult {
        results,
        total_tokens,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fixtures::{put, repo_id, store};

    #[test]
    fn test_items_share_budget_in_order() {
        let (store, repo) = store();
        put(&store, &repo, "big.py", &"x".repeat(400), vec![]); // 100 tokens
        put(&store, &repo, "small.py", &"y".repeat(40), vec![]); // 10 tokens

        let items = vec![
            BatchItem::whole("small.py"),
            BatchItem::whole("big.py"),
            BatchItem::whole("small.py"),
        ];
        let result = batch_query(&store, &repo_id(), &items, 100).unwrap();
        let entries = &result.data.results;

        assert!(entries[0].error.is_none());
        assert_eq!(
            entries[1].error.as_deref(),
            Some("Skipped: token budget exceeded (110 > 100)")
        );
        assert!(entries[2].error.is_none());
        assert_eq!(result.data.total_tokens, 20);
        assert_eq!(result.meta.total_tokens, 20);
        assert!(result.meta.truncated);
    }

    #[test]
    fn test_per_item_errors_do_not_abort() {
        let (store, repo) = store();
        put(&store, &repo, "a.py", "def foo(): pass", vec![]);

        let items = vec![BatchItem::whole(""), BatchItem::whole("missing.py"), BatchItem::whole("a.py")];
        let result = batch_query(&store, &repo_id(), &items, 1000).unwrap();
        let errors: Vec<_> = result.data.results.iter().map(|e| e.error.as_deref()).collect();
        assert_eq!(errors, vec![Some("path is required"), Some("File not found"), None]);
        assert!(!result.meta.truncated);
    }

    #[test]
    fn test_open_range_takes_a_fixed_span() {
        let (store, repo) = store();
        let content = (1..=300).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        put(&store, &repo, "n.txt", &content, vec![]);

        let items = vec![
            BatchItem::lines("n.txt", 10, None),
            BatchItem::lines("n.txt", 250, None),
            BatchItem::lines("n.txt", 5, Some(6)),
        ];
        let result = batch_query(&store, &repo_id(), &items, 10_000).unwrap();
        let ranges: Vec<_> = result.data.results.iter().map(|e| (e.start_line, e.end_line)).collect();
        assert_eq!(ranges, vec![(10, 110), (250, 300), (5, 6)]);
        assert_eq!(result.data.results[2].content, "5\n6");
    }

    #[test]
    fn test_request_count_limits() {
        let (store, _) = store();
        assert!(matches!(
            batch_query(&store, &repo_id(), &[], 100),
            Err(Error::InvalidRequest(_))
        ));
        let many = vec![BatchItem::whole("a.py"); MAX_BATCH_REQUESTS + 1];
        assert!(matches!(
            batch_query(&store, &repo_id(), &many, 100),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_items_parse_from_camel_case_json() {
        let items: Vec<BatchItem> =
            serde_json::from_str(r#"[{"path":"a.py","startLine":3,"endLine":9},{"path":"b.py"}]"#).unwrap();
        assert_eq!(items[0], BatchItem::lines("a.py", 3, Some(9)));
        assert_eq!(items[1], BatchItem::whole("b.py"));
    }
}
