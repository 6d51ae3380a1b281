//! Change detection

use crate::language::is_indexable;
use crate::remote::TreeEntry;
use crate::storage::Repository;

/// Whether a full sync must run.
///
/// Skips only when not forced, the repository already has indexed files and
/// its stored revision equals `current_revision`. A marker with zero files is
/// a crash-partial state and always re-syncs.
pub fn needs_sync(repo: &Repository, file_count: usize, current_revision: &str, force: bool) -> bool {
    if force || file_count == 0 {
        return true;
    }
    repo.last_revision.as_deref() != Some(current_revision)
}

/// Regular files whose extension is on the allow-list.
pub fn indexable_entries(tree: Vec<TreeEntry>) -> Vec<TreeEntry> {
    tree.into_iter()
        .filter(|entry| entry.is_file() && is_indexable(&entry.path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::EntryKind;

    fn repo(last_revision: Option<&str>) -> Repository {
        Repository {
            id: 1,
            owner: "octo".into(),
            name: "widgets".into(),
            full_name: "octo/widgets".into(),
            description: None,
            language: None,
            last_revision: last_revision.map(String::from),
            last_synced_at: None,
        }
    }

    #[test]
    fn test_up_to_date_repo_is_skipped() {
        assert!(!needs_sync(&repo(Some("c1")), 3, "c1", false));
    }

    #[test]
    fn test_force_always_syncs() {
        assert!(needs_sync(&repo(Some("c1")), 3, "c1", true));
    }

    #[test]
    fn test_marker_without_files_recovers() {
        assert!(needs_sync(&repo(Some("c1")), 0, "c1", false));
    }

    #[test]
    fn test_new_revision_syncs() {
        assert!(needs_sync(&repo(Some("c1")), 3, "c2", false));
        assert!(needs_sync(&repo(None), 3, "c1", false));
    }

    #[test]
    fn test_indexable_entries_filters_dirs_and_extensions() {
        let entry = |path: &str, kind| TreeEntry {
            path: path.into(),
            sha: "x".into(),
            kind,
        };
        let kept = indexable_entries(vec![
            entry("src", EntryKind::Tree),
            entry("src/a.py", EntryKind::Blob),
            entry("README.md", EntryKind::Blob),
            entry("vendor/lib.rs", EntryKind::Commit),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].path, "src/a.py");
    }
}
