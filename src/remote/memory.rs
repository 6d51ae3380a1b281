//! In-process remote host
//!
//! Holds repositories as plain path → text maps. Content ids are blake3
//! digests of the text, so identical content always has the same id. Call
//! counters let tests assert how much remote traffic a sync generated.

use super::{
    CommitSummary, EntryKind, RemoteError, RemoteFile, RemoteHost, RemoteResult, RepoMetadata,
    TreeEntry,
};
use crate::RepoId;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct MemoryRepo {
    metadata: RepoMetadata,
    head: String,
    files: BTreeMap<String, String>,
    /// Newest first
    commits: Vec<(CommitSummary, Vec<String>)>,
    failing: HashSet<String>,
}

/// Scriptable [`RemoteHost`].
#[derive(Default)]
pub struct InMemoryRemote {
    repos: Mutex<HashMap<String, MemoryRepo>>,
    fetches: AtomicUsize,
    tree_listings: AtomicUsize,
    metadata_lookups: AtomicUsize,
}

/// Content id used by the in-memory host.
pub fn content_id(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_repo<T>(&self, repo: &RepoId, f: impl FnOnce(&mut MemoryRepo) -> T) -> T {
        let mut repos = self.repos.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(repos.entry(repo.full_name()).or_default())
    }

    fn read_repo<T>(&self, repo: &RepoId, f: impl FnOnce(&MemoryRepo) -> RemoteResult<T>) -> RemoteResult<T> {
        let repos = self.repos.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match repos.get(&repo.full_name()) {
            Some(r) => f(r),
            None => Err(RemoteError::NotFound(repo.full_name())),
        }
    }

    /// Create (or reset the metadata of) a repository.
    pub fn add_repo(&self, repo: &RepoId, metadata: RepoMetadata, head: &str) {
        self.with_repo(repo, |r| {
            r.metadata = metadata;
            r.head = head.to_string();
        });
    }

    pub fn set_file(&self, repo: &RepoId, path: &str, content: &str) {
        self.with_repo(repo, |r| {
            r.files.insert(path.to_string(), content.to_string());
        });
    }

    pub fn remove_file(&self, repo: &RepoId, path: &str) {
        self.with_repo(repo, |r| {
            r.files.remove(path);
        });
    }

    pub fn set_head(&self, repo: &RepoId, head: &str) {
        self.with_repo(repo, |r| r.head = head.to_string());
    }

    /// Record a commit touching `files` and move the head to it.
    pub fn push_commit(&self, repo: &RepoId, sha: &str, message: &str, files: &[&str]) {
        self.with_repo(repo, |r| {
            let summary = CommitSummary {
                sha: sha.to_string(),
                message: message.to_string(),
            };
            r.commits
                .insert(0, (summary, files.iter().map(|f| f.to_string()).collect()));
            r.head = sha.to_string();
        });
    }

    /// Make content fetches of `path` fail with a network error.
    pub fn fail_path(&self, repo: &RepoId, path: &str) {
        self.with_repo(repo, |r| {
            r.failing.insert(path.to_string());
        });
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn tree_listing_count(&self) -> usize {
        self.tree_listings.load(Ordering::SeqCst)
    }

    pub fn metadata_lookup_count(&self) -> usize {
        self.metadata_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteHost for InMemoryRemote {
    async fn repo_metadata(&self, repo: &RepoId) -> RemoteResult<RepoMetadata> {
        self.read_repo(repo, |r| Ok(r.metadata.clone()))
    }

    async fn head_revision(&self, repo: &RepoId, _branch: &str) -> RemoteResult<String> {
        self.read_repo(repo, |r| Ok(r.head.clone()))
    }

    async fn list_tree(&self, repo: &RepoId, _reference: &str) -> RemoteResult<Vec<TreeEntry>> {
        self.tree_listings.fetch_add(1, Ordering::SeqCst);
        self.read_repo(repo, |r| {
            let mut dirs = BTreeSet::new();
            for path in r.files.keys() {
                let mut prefix = path.as_str();
                while let Some((parent, _)) = prefix.rsplit_once('/') {
                    dirs.insert(parent.to_string());
                    prefix = parent;
                }
            }

            let mut entries: Vec<TreeEntry> = dirs
                .into_iter()
                .map(|d| TreeEntry {
                    sha: content_id(&d),
                    path: d,
                    kind: EntryKind::Tree,
                })
                .collect();
            entries.extend(r.files.iter().map(|(path, content)| TreeEntry {
                path: path.clone(),
                sha: content_id(content),
                kind: EntryKind::Blob,
            }));
            Ok(entries)
        })
    }

    async fn fetch_file(&self, repo: &RepoId, path: &str, _reference: &str) -> RemoteResult<RemoteFile> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.read_repo(repo, |r| {
            if r.failing.contains(path) {
                return Err(RemoteError::Network(format!("connection reset fetching {}", path)));
            }
            r.files
                .get(path)
                .map(|content| RemoteFile {
                    content: content.clone(),
                    sha: content_id(content),
                })
                .ok_or_else(|| RemoteError::NotFound(path.to_string()))
        })
    }

    async fn file_content_id(&self, repo: &RepoId, path: &str, _reference: &str) -> RemoteResult<String> {
        self.metadata_lookups.fetch_add(1, Ordering::SeqCst);
        self.read_repo(repo, |r| {
            r.files
                .get(path)
                .map(|content| content_id(content))
                .ok_or_else(|| RemoteError::NotFound(path.to_string()))
        })
    }

    async fn commits_since(&self, repo: &RepoId, _branch: &str, since: &str) -> RemoteResult<Vec<CommitSummary>> {
        self.read_repo(repo, |r| {
            Ok(r.commits
                .iter()
                .map(|(c, _)| c)
                .take_while(|c| c.sha != since)
                .cloned()
                .collect())
        })
    }

    async fn commit_files(&self, repo: &RepoId, sha: &str) -> RemoteResult<Vec<String>> {
        self.read_repo(repo, |r| {
            r.commits
                .iter()
                .find(|(c, _)| c.sha == sha)
                .map(|(_, files)| files.clone())
                .ok_or_else(|| RemoteError::NotFound(sha.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoId {
        RepoId::new("octo", "widgets")
    }

    #[tokio::test]
    async fn test_tree_lists_directories_and_blobs() {
        let remote = InMemoryRemote::new();
        remote.add_repo(&repo(), RepoMetadata::default(), "c1");
        remote.set_file(&repo(), "src/lib/a.py", "x = 1");

        let tree = remote.list_tree(&repo(), "c1").await.unwrap();
        let dirs: Vec<_> = tree.iter().filter(|e| !e.is_file()).map(|e| e.path.as_str()).collect();
        assert_eq!(dirs, vec!["src", "src/lib"]);
        assert_eq!(tree.iter().filter(|e| e.is_file()).count(), 1);
        assert_eq!(remote.tree_listing_count(), 1);
    }

    #[tokio::test]
    async fn test_content_id_tracks_content() {
        let remote = InMemoryRemote::new();
        remote.add_repo(&repo(), RepoMetadata::default(), "c1");
        remote.set_file(&repo(), "a.py", "one");
        let first = remote.file_content_id(&repo(), "a.py", "c1").await.unwrap();
        remote.set_file(&repo(), "a.py", "two");
        let second = remote.file_content_id(&repo(), "a.py", "c1").await.unwrap();
        assert_ne!(first, second);

        remote.remove_file(&repo(), "a.py");
        let err = remote.file_content_id(&repo(), "a.py", "c1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_commits_since_stops_at_marker() {
        let remote = InMemoryRemote::new();
        remote.add_repo(&repo(), RepoMetadata::default(), "c0");
        remote.push_commit(&repo(), "c1", "first", &["a.py"]);
        remote.push_commit(&repo(), "c2", "second", &["b.py"]);
        remote.push_commit(&repo(), "c3", "third", &["a.py", "c.py"]);

        let commits = remote.commits_since(&repo(), "main", "c1").await.unwrap();
        let shas: Vec<_> = commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, vec!["c3", "c2"]);
        assert_eq!(remote.head_revision(&repo(), "main").await.unwrap(), "c3");
        assert_eq!(remote.commit_files(&repo(), "c3").await.unwrap(), vec!["a.py", "c.py"]);
    }

    #[tokio::test]
    async fn test_failing_path() {
        let remote = InMemoryRemote::new();
        remote.add_repo(&repo(), RepoMetadata::default(), "c1");
        remote.set_file(&repo(), "bad.py", "x");
        remote.fail_path(&repo(), "bad.py");
        let err = remote.fetch_file(&repo(), "bad.py", "c1").await.unwrap_err();
        assert!(matches!(err, RemoteError::Network(_)));
    }
}
