//! Sync coordinator
//!
//! Runs full and partial (webhook) syncs for one repository at a time:
//! 1. Resolve or create the repository row
//! 2. Take the durable per-repository lease
//! 3. Decide what to index (change detector / webhook change set)
//! 4. Index files in parallel, isolating per-file failures
//! 5. Record the revision marker and release the lease

use super::change::{indexable_entries, needs_sync};
use super::lease::LeaseGuard;
use super::status::{StatusRegistry, SyncProgress, SyncState};
use super::webhook::ChangeSet;
use crate::extract::SymbolExtractor;
use crate::language::is_indexable;
use crate::remote::RemoteHost;
use crate::storage::{FileWrite, IndexStore, Repository, WriteOutcome};
use crate::{Error, RepoId, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Tunables for a coordinator
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Branch whose head is the revision marker
    pub branch: String,
    /// Files indexed concurrently within one run
    pub concurrency: usize,
    pub lease_ttl: Duration,
    /// How long a webhook sync waits for a running sync to finish
    pub webhook_lease_wait: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
            concurrency: 4,
            lease_ttl: Duration::from_secs(300),
            webhook_lease_wait: Duration::from_secs(120),
        }
    }
}

/// Outcome of one indexed path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Written { symbols: usize },
    Unchanged,
    Deleted,
}

/// A path that failed during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub path: String,
    pub message: String,
}

/// Aggregate of one completed run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub files_seen: usize,
    pub files_written: usize,
    pub files_unchanged: usize,
    pub files_failed: usize,
    pub files_deleted: usize,
    /// Revision marker recorded by the run, if any
    pub revision: Option<String>,
    pub errors: Vec<FileError>,
}

/// Final status of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    /// Some files failed, the rest were indexed
    Partial,
    /// Every attempted file failed
    Failed,
}

impl SyncReport {
    fn record(&mut self, path: String, result: Result<FileOutcome>) {
        self.files_seen += 1;
        match result {
            Ok(FileOutcome::Written { .. }) => self.files_written += 1,
            Ok(FileOutcome::Unchanged) => self.files_unchanged += 1,
            Ok(FileOutcome::Deleted) => self.files_deleted += 1,
            Err(e) => {
                warn!("Skipping {}: {}", path, e);
                self.files_failed += 1;
                self.errors.push(FileError {
                    path,
                    message: e.to_string(),
                });
            }
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.files_failed == 0 {
            RunStatus::Success
        } else if self.files_failed == self.files_seen {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }

    /// Error worth surfacing in the status registry: only when nothing else happened
    fn status_error(&self) -> Option<String> {
        match self.status() {
            RunStatus::Failed => self.errors.last().map(|e| format!("{}: {}", e.path, e.message)),
            _ => None,
        }
    }
}

/// Result of a sync request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Stored revision already matches the remote head
    UpToDate,
    Completed(SyncReport),
    /// Another run holds the repository; poll instead of retrying
    AlreadyRunning(SyncProgress),
}

/// Fetch, extract and persist one file. Cheap to clone into worker tasks.
#[derive(Clone)]
pub struct FileIndexer {
    store: Arc<IndexStore>,
    remote: Arc<dyn RemoteHost>,
    extractor: Arc<dyn SymbolExtractor>,
}

impl FileIndexer {
    pub fn new(store: Arc<IndexStore>, remote: Arc<dyn RemoteHost>, extractor: Arc<dyn SymbolExtractor>) -> Self {
        Self {
            store,
            remote,
            extractor,
        }
    }

    /// Index one path.
    ///
    /// When the remote's content id is already known and matches the stored
    /// row (under the current extractor), the fetch is skipped entirely. The
    /// final write re-checks the id atomically with the upsert.
    pub async fn index(
        &self,
        repo: &Repository,
        path: &str,
        known_content_id: Option<&str>,
        reference: &str,
        force: bool,
    ) -> Result<FileOutcome> {
        let tag = self.extractor.id().tag();

        if let Some(content_id) = known_content_id {
            if !force && self.store.file_is_current(repo.id, path, content_id, &tag)? {
                debug!("{} unchanged", path);
                return Ok(FileOutcome::Unchanged);
            }
        }

        let fetched = self.remote.fetch_file(&repo.repo_id(), path, reference).await?;
        let language = crate::language::detect_language(path);
        let symbols = self.extractor.extract(&fetched.content, language).await;

        let write = FileWrite::new(path, fetched.content, fetched.sha, tag, symbols);
        match self.store.write_file(repo.id, &write, force)? {
            WriteOutcome::Unchanged => Ok(FileOutcome::Unchanged),
            WriteOutcome::Written { symbols, .. } => {
                debug!(
                    "Indexed {} ({} lines, {} tokens, {} symbols)",
                    path, write.line_count, write.token_count, symbols
                );
                Ok(FileOutcome::Written { symbols })
            }
        }
    }
}

/// Per-repository sync orchestration
pub struct SyncCoordinator {
    store: Arc<IndexStore>,
    remote: Arc<dyn RemoteHost>,
    indexer: FileIndexer,
    status: Arc<StatusRegistry>,
    options: SyncOptions,
    /// Owner label on lease rows taken by this coordinator
    instance: String,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<IndexStore>,
        remote: Arc<dyn RemoteHost>,
        extractor: Arc<dyn SymbolExtractor>,
        options: SyncOptions,
    ) -> Self {
        Self {
            indexer: FileIndexer::new(store.clone(), remote.clone(), extractor),
            store,
            remote,
            status: Arc::new(StatusRegistry::new()),
            options,
            instance: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteHost> {
        &self.remote
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn status_registry(&self) -> &Arc<StatusRegistry> {
        &self.status
    }

    /// Status of a repository as seen by this process, falling back to the
    /// durable lease when another process holds it.
    pub fn progress(&self, repo: &RepoId) -> Result<SyncProgress> {
        let key = repo.full_name();
        let local = self.status.get(&key);
        if local.is_active() {
            return Ok(local);
        }
        match self.store.get_lease(&key)? {
            Some(lease) if !lease.is_expired(Utc::now()) => Ok(SyncProgress {
                state: SyncState::Syncing,
                started_at: Some(lease.acquired_at),
                ..SyncProgress::idle()
            }),
            _ => Ok(local),
        }
    }

    /// Stored repository row, created from remote metadata on first use
    pub async fn resolve_repo(&self, repo: &RepoId) -> Result<Repository> {
        if let Some(existing) = self.store.get_repo(repo)? {
            return Ok(existing);
        }
        let metadata = self.remote.repo_metadata(repo).await?;
        info!("Tracking new repository {}", repo);
        self.store.insert_repo(repo, &metadata)
    }

    /// Full sync against the current head of the configured branch.
    #[instrument(skip(self), fields(repo = %repo))]
    pub async fn full_sync(&self, repo: &RepoId, force: bool) -> Result<SyncOutcome> {
        let key = repo.full_name();
        let record = match self.resolve_repo(repo).await {
            Ok(record) => record,
            Err(e) => {
                self.status.fail(&key, e.to_string());
                return Err(e);
            }
        };

        let Some(lease) =
            LeaseGuard::try_acquire(self.store.clone(), &key, &self.instance, self.options.lease_ttl).await?
        else {
            info!("Sync already in progress for {}", repo);
            self.status.clear_queued(&key);
            return Ok(SyncOutcome::AlreadyRunning(self.progress(repo)?));
        };

        let result = self.run_full(&record, force).await;
        if let Err(e) = lease.release() {
            warn!("Failed to release lease for {}: {}", repo, e);
        }

        match &result {
            Ok(SyncOutcome::Completed(report)) => self.status.finish(&key, report.status_error()),
            Ok(_) => self.status.clear_queued(&key),
            Err(e) => {
                error!("Sync failed for {}: {}", repo, e);
                self.status.fail(&key, e.to_string());
            }
        }
        result
    }

    async fn run_full(&self, repo: &Repository, force: bool) -> Result<SyncOutcome> {
        let key = repo.full_name.clone();
        let id = repo.repo_id();

        let head = self.remote.head_revision(&id, &self.options.branch).await?;
        let file_count = self.store.count_files(repo.id)?;
        if !needs_sync(repo, file_count, &head, force) {
            info!("{} already up to date at {} ({} files)", key, head, file_count);
            return Ok(SyncOutcome::UpToDate);
        }

        info!("Starting sync for {} (force={}, files={})", key, force, file_count);
        self.status.begin(&key);

        let entries = indexable_entries(self.remote.list_tree(&id, &head).await?);
        self.status.set_total(&key, entries.len());
        info!("Found {} source files to index", entries.len());

        let jobs = entries.into_iter().map(|e| (e.path, Some(e.sha))).collect();
        let mut report = self.index_all(repo, jobs, &head, force).await;

        self.store.record_sync(repo.id, Some(&head), Utc::now())?;
        report.revision = Some(head);

        info!(
            "Synced {}: {} written, {} unchanged, {} failed",
            key, report.files_written, report.files_unchanged, report.files_failed
        );
        Ok(SyncOutcome::Completed(report))
    }

    /// Apply a webhook change set.
    ///
    /// Waits for a running sync of the same repository (up to the configured
    /// limit) rather than dropping the changes. Removed paths are deleted; each
    /// changed path gets a metadata-only lookup, and a missing path counts as
    /// a deletion.
    #[instrument(skip(self, changes), fields(repo = %repo, changed = changes.changed.len(), deleted = changes.deleted.len()))]
    pub async fn partial_sync(&self, repo: &RepoId, changes: &ChangeSet) -> Result<SyncOutcome> {
        let key = repo.full_name();
        let record = self
            .store
            .get_repo(repo)?
            .ok_or_else(|| Error::RepoNotFound(key.clone()))?;

        let Some(lease) = LeaseGuard::acquire_within(
            self.store.clone(),
            &key,
            &self.instance,
            self.options.lease_ttl,
            self.options.webhook_lease_wait,
        )
        .await?
        else {
            warn!("Gave up waiting for running sync of {}", repo);
            return Ok(SyncOutcome::AlreadyRunning(self.progress(repo)?));
        };

        self.status.begin(&key);
        let result = self.run_partial(&record, changes).await;
        if let Err(e) = lease.release() {
            warn!("Failed to release lease for {}: {}", repo, e);
        }

        match &result {
            Ok(report) => self.status.finish(&key, report.status_error()),
            Err(e) => {
                error!("Webhook sync failed for {}: {}", repo, e);
                self.status.fail(&key, e.to_string());
            }
        }
        result.map(SyncOutcome::Completed)
    }

    async fn run_partial(&self, repo: &Repository, changes: &ChangeSet) -> Result<SyncReport> {
        let id = repo.repo_id();
        let reference = changes
            .revision
            .clone()
            .unwrap_or_else(|| self.options.branch.clone());
        let mut report = SyncReport::default();

        for path in &changes.deleted {
            let result = self.store.delete_file(repo.id, path).map(|_| FileOutcome::Deleted);
            report.record(path.clone(), result);
        }

        let changed: Vec<&String> = changes.changed.iter().filter(|p| is_indexable(p)).collect();
        self.status.set_total(&repo.full_name, changed.len());

        let mut jobs = Vec::new();
        for path in changed {
            match self.remote.file_content_id(&id, path, &reference).await {
                Ok(content_id) => jobs.push((path.clone(), Some(content_id))),
                Err(e) if e.is_not_found() => {
                    debug!("{} is gone upstream, deleting", path);
                    let result = self.store.delete_file(repo.id, path).map(|_| FileOutcome::Deleted);
                    report.record(path.clone(), result);
                    self.status.file_done(&repo.full_name);
                }
                Err(e) => {
                    report.record(path.clone(), Err(e.into()));
                    self.status.file_done(&repo.full_name);
                }
            }
        }

        let indexed = self.index_all(repo, jobs, &reference, false).await;
        report.files_seen += indexed.files_seen;
        report.files_written += indexed.files_written;
        report.files_unchanged += indexed.files_unchanged;
        report.files_failed += indexed.files_failed;
        report.errors.extend(indexed.errors);

        // Only the webhook's own commit is known to be covered by these paths.
        self.store
            .record_sync(repo.id, changes.revision.as_deref(), Utc::now())?;
        report.revision = changes.revision.clone();
        Ok(report)
    }

    /// Index `(path, known content id)` pairs with bounded parallelism.
    /// A failed file is recorded in the report and never aborts the rest.
    async fn index_all(
        &self,
        repo: &Repository,
        jobs: Vec<(String, Option<String>)>,
        reference: &str,
        force: bool,
    ) -> SyncReport {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut set = JoinSet::new();

        for (path, content_id) in jobs {
            let indexer = self.indexer.clone();
            let semaphore = semaphore.clone();
            let repo = repo.clone();
            let reference = reference.to_string();
            set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        indexer
                            .index(&repo, &path, content_id.as_deref(), &reference, force)
                            .await
                    }
                    Err(e) => Err(Error::InvalidRequest(format!("worker pool closed: {}", e))),
                };
                (path, result)
            });
        }

        let mut report = SyncReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((path, result)) => report.record(path, result),
                Err(e) => {
                    report.files_seen += 1;
                    report.files_failed += 1;
                    report.errors.push(FileError {
                        path: "<worker>".to_string(),
                        message: e.to_string(),
                    });
                }
            }
            self.status.file_done(&repo.full_name);
        }
        report
    }

    /// Non-forced full sync of every stored repository. One failing
    /// repository does not stop the sweep.
    pub async fn sync_all(&self) -> Result<Vec<(String, std::result::Result<SyncOutcome, String>)>> {
        let repos = self.store.list_repos()?;
        info!("Sweeping {} repositories", repos.len());

        let mut results = Vec::with_capacity(repos.len());
        for repo in repos {
            let outcome = self
                .full_sync(&repo.repo_id(), false)
                .await
                .map_err(|e| e.to_string());
            results.push((repo.full_name, outcome));
        }
        Ok(results)
    }
}
