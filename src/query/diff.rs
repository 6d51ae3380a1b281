//! Changed-files report

use super::{require_repo, QueryEnvelope};
use crate::remote::{CommitSummary, RemoteHost};
use crate::storage::IndexStore;
use crate::tokens::estimate_tokens;
use crate::{Error, RepoId, Result};
use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReport {
    /// Revision the report was taken against
    pub since: String,
    /// Newest commit in the range, if any
    pub head: Option<String>,
    /// Newest first
    pub commits: Vec<CommitSummary>,
    /// Union of paths touched by `commits`, first-seen order
    pub changed_files: Vec<String>,
}

/// Files changed on `branch` since `since`, or since the last synced
/// revision when `since` is omitted.
///
/// A commit whose file list cannot be fetched is logged and left out of
/// the union; the report still lists it.
pub async fn diff_report(
    store: &IndexStore,
    remote: &dyn RemoteHost,
    repo: &RepoId,
    branch: &str,
    since: Option<&str>,
) -> Result<QueryEnvelope<DiffReport>> {
    let repository = require_repo(store, repo)?;
    let since = match since.map(str::to_string).or(repository.last_revision) {
        Some(since) => since,
        None => {
            return Err(Error::InvalidRequest(format!(
                "{} has no synced revision; pass one explicitly",
                repo
            )))
        }
    };

    let commits = remote.commits_since(repo, branch, &since).await?;

    let mut seen = HashSet::new();
    let mut changed_files = Vec::new();
    for commit in &commits {
        match remote.commit_files(repo, &commit.sha).await {
            Ok(files) => {
                for file in files {
                    if seen.insert(file.clone()) {
                        changed_files.push(file);
                    }
                }
            }
            Err(e) => warn!("Skipping files of commit {} in {}: {}", commit.sha, repo, e),
        }
    }

    let report = DiffReport {
        since,
        head: commits.first().map(|c| c.sha.clone()),
        commits,
        changed_files,
    };
    let cost = estimate_tokens(&serde_json::to_string(&report)?);
    Ok(QueryEnvelope::complete(report, cost))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{InMemoryRemote, RepoMetadata};
    use chrono::Utc;

    fn repo() -> RepoId {
        RepoId::new("octo", "widgets")
    }

    fn setup() -> (IndexStore, InMemoryRemote) {
        let remote = InMemoryRemote::new();
        remote.add_repo(&repo(), RepoMetadata::default(), "c1");
        remote.push_commit(&repo(), "c1", "initial", &["a.py"]);
        remote.push_commit(&repo(), "c2", "tweak", &["a.py", "b.py"]);
        remote.push_commit(&repo(), "c3", "more", &["c.py", "b.py"]);

        let store = IndexStore::open_in_memory().unwrap();
        store.insert_repo(&repo(), &RepoMetadata::default()).unwrap();
        (store, remote)
    }

    #[tokio::test]
    async fn test_union_of_changed_files() {
        let (store, remote) = setup();
        let report = diff_report(&store, &remote, &repo(), "main", Some("c1")).await.unwrap();
        assert_eq!(report.data.head.as_deref(), Some("c3"));
        assert_eq!(report.data.commits.len(), 2);
        assert_eq!(report.data.changed_files, vec!["c.py", "b.py", "a.py"]);
        assert!(report.meta.total_tokens > 0);
    }

    #[tokio::test]
    async fn test_defaults_to_last_synced_revision() {
        let (store, remote) = setup();
        assert!(matches!(
            diff_report(&store, &remote, &repo(), "main", None).await,
            Err(Error::InvalidRequest(_))
        ));

        let stored = store.get_repo(&repo()).unwrap().unwrap();
        store.record_sync(stored.id, Some("c3"), Utc::now()).unwrap();
        let report = diff_report(&store, &remote, &repo(), "main", None).await.unwrap();
        assert_eq!(report.data.since, "c3");
        assert!(report.data.head.is_none());
        assert!(report.data.changed_files.is_empty());
    }

    #[tokio::test]
    async fn test_untracked_repo_is_an_error() {
        let (store, remote) = setup();
        let other = RepoId::new("octo", "gadgets");
        assert!(matches!(
            diff_report(&store, &remote, &other, "main", Some("c1")).await,
            Err(Error::RepoNotFound(_))
        ));
    }
}
