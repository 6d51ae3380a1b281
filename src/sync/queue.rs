//! Background sync queue
//!
//! Triggers (manual, cron, webhook) enqueue a job and return at once with a
//! status key; a consumer task runs each job on the coordinator. Jobs for
//! different repositories run concurrently, and the coordinator's lease keeps
//! runs for the same repository apart. Manual triggers are de-duplicated
//! here; webhook jobs are never dropped and wait for the lease instead, and a
//! sweep that finds a repository busy skips it as already running.

use super::coordinator::{SyncCoordinator, SyncOutcome};
use super::status::SyncProgress;
use super::webhook::{ChangeSet, PushEvent};
use crate::{Error, RepoId, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

/// Work item for the consumer
#[derive(Debug, Clone)]
pub enum SyncJob {
    Full { repo: RepoId, force: bool },
    Partial { repo: RepoId, changes: ChangeSet },
    /// Cron sweep over every stored repository
    All,
}

/// Immediate answer to a trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Queued; poll the status under `key`
    Accepted { key: String },
    AlreadyRunning(SyncProgress),
    /// Nothing to do (e.g. a push that touched no files)
    Ignored { reason: String },
}

/// Handle for enqueueing sync work
pub struct SyncQueue {
    tx: mpsc::UnboundedSender<SyncJob>,
    coordinator: Arc<SyncCoordinator>,
    consumer: JoinHandle<()>,
}

impl SyncQueue {
    /// Spawn the consumer task. Must be called inside a tokio runtime.
    pub fn start(coordinator: Arc<SyncCoordinator>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(consume(coordinator.clone(), rx));
        Self {
            tx,
            coordinator,
            consumer,
        }
    }

    fn send(&self, job: SyncJob) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|_| Error::InvalidRequest("sync queue is shut down".to_string()))
    }

    /// Queue a full sync unless one is already queued or running here.
    pub fn trigger_full(&self, repo: &RepoId, force: bool) -> Result<Trigger> {
        let key = repo.full_name();
        if let Some(active) = self.coordinator.status_registry().mark_queued(&key) {
            return Ok(Trigger::AlreadyRunning(active));
        }
        self.send(SyncJob::Full {
            repo: repo.clone(),
            force,
        })?;
        Ok(Trigger::Accepted { key })
    }

    /// Queue a partial sync for a push event.
    pub fn trigger_webhook(&self, event: &PushEvent) -> Result<Trigger> {
        let repo = event.repo_id()?;
        let branch = &self.coordinator.options().branch;
        if !event.targets_branch(branch) {
            return Ok(Trigger::Ignored {
                reason: format!("push to {} is not on {}", repo, branch),
            });
        }
        let changes = event.change_set();
        if changes.is_empty() {
            return Ok(Trigger::Ignored {
                reason: format!("push to {} changed no files", repo),
            });
        }
        let key = repo.full_name();
        self.send(SyncJob::Partial { repo, changes })?;
        Ok(Trigger::Accepted { key })
    }

    /// Queue a sweep over all repositories.
    pub fn trigger_all(&self) -> Result<Trigger> {
        self.send(SyncJob::All)?;
        Ok(Trigger::Accepted {
            key: "*".to_string(),
        })
    }

    pub fn progress(&self, repo: &RepoId) -> Result<SyncProgress> {
        self.coordinator.progress(repo)
    }

    /// Stop accepting work and wait for queued and running jobs to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.consumer.await {
            error!("Sync queue consumer panicked: {}", e);
        }
    }
}

async fn consume(coordinator: Arc<SyncCoordinator>, mut rx: mpsc::UnboundedReceiver<SyncJob>) {
    let mut running = JoinSet::new();
    loop {
        tokio::select! {
            job = rx.recv() => {
                let Some(job) = job else { break };
                let coordinator = coordinator.clone();
                running.spawn(async move { run_job(&coordinator, job).await });
            }
            Some(_) = running.join_next(), if !running.is_empty() => {}
        }
    }
    while running.join_next().await.is_some() {}
}

async fn run_job(coordinator: &SyncCoordinator, job: SyncJob) {
    match job {
        SyncJob::Full { repo, force } => log_outcome(&repo, coordinator.full_sync(&repo, force).await),
        SyncJob::Partial { repo, changes } => {
            log_outcome(&repo, coordinator.partial_sync(&repo, &changes).await)
        }
        SyncJob::All => match coordinator.sync_all().await {
            Ok(results) => {
                let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                info!("Sweep finished: {} repositories, {} failed", results.len(), failed);
            }
            Err(e) => error!("Sweep failed: {}", e),
        },
    }
}

fn log_outcome(repo: &RepoId, outcome: Result<SyncOutcome>) {
    match outcome {
        Ok(SyncOutcome::Completed(report)) => info!(
            "Queued sync of {} finished ({:?}, {} written)",
            repo,
            report.status(),
            report.files_written
        ),
        Ok(SyncOutcome::UpToDate) => info!("Queued sync of {}: up to date", repo),
        Ok(SyncOutcome::AlreadyRunning(_)) => info!("Queued sync of {}: already running", repo),
        Err(e) => error!("Queued sync of {} failed: {}", repo, e),
    }
}
