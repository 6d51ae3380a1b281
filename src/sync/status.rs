//! Ephemeral per-repository sync status
//!
//! Observational only: it answers "what is this process doing for repo X".
//! Mutual exclusion is the job of the durable lease in [`super::lease`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    /// Accepted by the queue, not started yet
    Queued,
    Syncing,
    Failed,
}

/// Snapshot of one repository's sync status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub state: SyncState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files_total: usize,
    pub files_processed: usize,
    pub last_error: Option<String>,
}

impl SyncProgress {
    pub fn idle() -> Self {
        Self {
            state: SyncState::Idle,
            started_at: None,
            finished_at: None,
            files_total: 0,
            files_processed: 0,
            last_error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SyncState::Queued | SyncState::Syncing)
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::idle()
    }
}

/// In-process status map keyed by `owner/name`
#[derive(Default)]
pub struct StatusRegistry {
    entries: Mutex<HashMap<String, SyncProgress>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<T>(&self, key: &str, f: impl FnOnce(&mut SyncProgress) -> T) -> T {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(entries.entry(key.to_string()).or_default())
    }

    /// Current status; `Idle` for unknown repositories
    pub fn get(&self, key: &str) -> SyncProgress {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(key).cloned().unwrap_or_default()
    }

    /// Mark as queued unless something is already queued or running.
    /// Returns the active progress when it refuses.
    pub fn mark_queued(&self, key: &str) -> Option<SyncProgress> {
        self.update(key, |p| {
            if p.is_active() {
                return Some(p.clone());
            }
            p.state = SyncState::Queued;
            p.last_error = None;
            None
        })
    }

    pub fn begin(&self, key: &str) {
        self.update(key, |p| {
            *p = SyncProgress {
                state: SyncState::Syncing,
                started_at: Some(Utc::now()),
                ..SyncProgress::idle()
            };
        });
    }

    pub fn set_total(&self, key: &str, total: usize) {
        self.update(key, |p| p.files_total = total);
    }

    pub fn file_done(&self, key: &str) {
        self.update(key, |p| p.files_processed += 1);
    }

    /// Finished; `error` is recorded only when the run produced nothing but failures
    pub fn finish(&self, key: &str, error: Option<String>) {
        self.update(key, |p| {
            p.state = SyncState::Idle;
            p.finished_at = Some(Utc::now());
            p.last_error = error;
        });
    }

    pub fn fail(&self, key: &str, error: String) {
        self.update(key, |p| {
            p.state = SyncState::Failed;
            p.finished_at = Some(Utc::now());
            p.last_error = Some(error);
        });
    }

    /// Drop a queued marker that never started (e.g. the run was up to date)
    pub fn clear_queued(&self, key: &str) {
        self.update(key, |p| {
            if p.state == SyncState::Queued {
                p.state = SyncState::Idle;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_repo_is_idle() {
        let registry = StatusRegistry::new();
        assert_eq!(registry.get("octo/widgets").state, SyncState::Idle);
    }

    #[test]
    fn test_lifecycle() {
        let registry = StatusRegistry::new();
        registry.begin("octo/widgets");
        registry.set_total("octo/widgets", 3);
        registry.file_done("octo/widgets");

        let progress = registry.get("octo/widgets");
        assert_eq!(progress.state, SyncState::Syncing);
        assert_eq!((progress.files_processed, progress.files_total), (1, 3));

        registry.fail("octo/widgets", "remote unavailable".into());
        let progress = registry.get("octo/widgets");
        assert_eq!(progress.state, SyncState::Failed);
        assert!(progress.finished_at.is_some());
    }

    #[test]
    fn test_mark_queued_refuses_while_active() {
        let registry = StatusRegistry::new();
        assert!(registry.mark_queued("octo/widgets").is_none());
        assert!(registry.mark_queued("octo/widgets").is_some());

        registry.begin("octo/widgets");
        assert_eq!(
            registry.mark_queued("octo/widgets").map(|p| p.state),
            Some(SyncState::Syncing)
        );

        registry.finish("octo/widgets", None);
        assert!(registry.mark_queued("octo/widgets").is_none());
    }
}
