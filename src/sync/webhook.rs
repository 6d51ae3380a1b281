//! Push-event webhook payloads

use crate::{RepoId, Result};
use serde::Deserialize;
use std::collections::BTreeSet;

/// The subset of a GitHub push event the engine reads
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    pub repository: PushRepository,
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
    /// Commit the branch points to after the push
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushRepository {
    pub full_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushCommit {
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

/// Paths a partial sync must touch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Added or modified anywhere in the push
    pub changed: BTreeSet<String>,
    /// Removed anywhere in the push
    pub deleted: BTreeSet<String>,
    /// Revision the changes lead to, when known
    pub revision: Option<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

impl PushEvent {
    pub fn parse(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn repo_id(&self) -> Result<RepoId> {
        RepoId::parse(&self.repository.full_name)
    }

    /// Branch name from `refs/heads/<branch>`
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.as_deref()?.strip_prefix("refs/heads/")
    }

    /// Whether the push lands on `branch`. Payloads without a ref are accepted.
    pub fn targets_branch(&self, branch: &str) -> bool {
        match self.git_ref.as_deref() {
            None => true,
            Some(_) => self.branch() == Some(branch),
        }
    }

    /// Union of added+modified into `changed` and removed into `deleted`.
    ///
    /// A path can land in both sets (e.g. added then removed within one push);
    /// the partial sync deletes first and then re-checks the remote, so the
    /// path's final state wins.
    pub fn change_set(&self) -> ChangeSet {
        let mut set = ChangeSet {
            revision: self.after.clone().filter(|sha| !is_null_sha(sha)),
            ..ChangeSet::default()
        };
        for commit in &self.commits {
            set.changed.extend(commit.added.iter().cloned());
            set.changed.extend(commit.modified.iter().cloned());
            set.deleted.extend(commit.removed.iter().cloned());
        }
        set
    }
}

/// GitHub sends all zeros as `after` when a branch is deleted
fn is_null_sha(sha: &str) -> bool {
    !sha.is_empty() && sha.chars().all(|c| c == '0')
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "ref": "refs/heads/main",
        "before": "c0",
        "after": "c2",
        "repository": { "full_name": "octo/widgets", "private": false },
        "commits": [
            { "id": "c1", "added": ["src/new.py"], "modified": ["src/a.py"], "removed": [] },
            { "id": "c2", "added": [], "modified": ["src/a.py", "src/b.py"], "removed": ["old.py"] }
        ]
    }"#;

    #[test]
    fn test_parse_push_event() {
        let event = PushEvent::parse(PAYLOAD).unwrap();
        assert_eq!(event.repo_id().unwrap(), RepoId::new("octo", "widgets"));
        assert_eq!(event.branch(), Some("main"));
        assert!(event.targets_branch("main"));
        assert!(!event.targets_branch("dev"));
    }

    #[test]
    fn test_tag_push_targets_no_branch() {
        let event = PushEvent::parse(r#"{"ref":"refs/tags/v1","repository":{"full_name":"octo/widgets"}}"#).unwrap();
        assert!(event.branch().is_none());
        assert!(!event.targets_branch("main"));
    }

    #[test]
    fn test_change_set_unions_commits() {
        let set = PushEvent::parse(PAYLOAD).unwrap().change_set();
        let changed: Vec<_> = set.changed.iter().map(String::as_str).collect();
        assert_eq!(changed, vec!["src/a.py", "src/b.py", "src/new.py"]);
        assert_eq!(set.deleted.len(), 1);
        assert!(set.deleted.contains("old.py"));
        assert_eq!(set.revision.as_deref(), Some("c2"));
    }

    #[test]
    fn test_missing_fields_default() {
        let event = PushEvent::parse(r#"{"repository":{"full_name":"octo/widgets"}}"#).unwrap();
        assert!(event.change_set().is_empty());
        assert!(event.branch().is_none());
    }

    #[test]
    fn test_branch_deletion_has_no_revision() {
        let event = PushEvent::parse(
            r#"{"repository":{"full_name":"octo/widgets"},"after":"0000000000000000000000000000000000000000"}"#,
        )
        .unwrap();
        assert!(event.change_set().revision.is_none());
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(PushEvent::parse("{\"ref\": 1}").is_err());
    }
}
