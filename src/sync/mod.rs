//! Synchronization engine
//!
//! Keeps the index in step with the remote host:
//! - `change`: decides whether a full sync is needed and which tree entries count
//! - `coordinator`: full / partial runs, per-file indexing, cron sweep
//! - `lease`: durable single-flight lock per repository
//! - `status`: in-process progress snapshots
//! - `queue`: fire-and-forget triggers backed by a consumer task
//! - `webhook`: push-event payloads and their change sets

pub mod change;
pub mod coordinator;
pub mod lease;
pub mod queue;
pub mod status;
pub mod webhook;

pub use change::{indexable_entries, needs_sync};
pub use coordinator::{
    FileError, FileIndexer, FileOutcome, RunStatus, SyncCoordinator, SyncOptions, SyncOutcome,
    SyncReport,
};
pub use lease::LeaseGuard;
pub use queue::{SyncJob, SyncQueue, Trigger};
pub use status::{StatusRegistry, SyncProgress, SyncState};
pub use webhook::{ChangeSet, PushEvent};
