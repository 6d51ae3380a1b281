//! Durable single-flight lease per repository
//!
//! A row in `sync_leases` marks a repository as being synced. The holder
//! renews it in the background while the run is alive; a crashed holder
//! stops renewing and the row expires, so another process can take over.
//!
//! Every acquisition gets its own holder id, so two runs in the same
//! process exclude each other just like runs in different processes.

use crate::storage::IndexStore;
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Poll interval bounds while waiting for a busy lease
const MIN_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// A held lease. Released on [`LeaseGuard::release`] or drop.
pub struct LeaseGuard {
    store: Arc<IndexStore>,
    key: String,
    holder: String,
    renewal: JoinHandle<()>,
    released: bool,
}

fn expiry(ttl: Duration) -> Result<chrono::DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::Config(format!("lease ttl: {}", e)))?;
    Ok(Utc::now() + ttl)
}

impl LeaseGuard {
    /// Take the lease now, or return `None` if anyone holds it.
    /// `owner` labels the holder row; the id itself is unique per acquisition.
    pub async fn try_acquire(store: Arc<IndexStore>, key: &str, owner: &str, ttl: Duration) -> Result<Option<Self>> {
        let holder = format!("{}:{}", owner, Uuid::new_v4());
        let now = Utc::now();
        if !store.try_acquire_lease(key, &holder, now, expiry(ttl)?)? {
            return Ok(None);
        }
        debug!("Acquired sync lease for {} as {}", key, holder);

        let renewal = tokio::spawn(renew_loop(store.clone(), key.to_string(), holder.clone(), ttl));
        Ok(Some(Self {
            store,
            key: key.to_string(),
            holder,
            renewal,
            released: false,
        }))
    }

    /// Wait up to `wait` for the lease, polling with exponential backoff.
    pub async fn acquire_within(
        store: Arc<IndexStore>,
        key: &str,
        owner: &str,
        ttl: Duration,
        wait: Duration,
    ) -> Result<Option<Self>> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut backoff = MIN_BACKOFF;
        loop {
            if let Some(guard) = Self::try_acquire(store.clone(), key, owner, ttl).await? {
                return Ok(Some(guard));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Stop renewing and delete the lease row.
    pub fn release(mut self) -> Result<()> {
        self.renewal.abort();
        self.released = true;
        self.store.release_lease(&self.key, &self.holder)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.renewal.abort();
        if let Err(e) = self.store.release_lease(&self.key, &self.holder) {
            warn!("Failed to release sync lease for {}: {}", self.key, e);
        }
    }
}

async fn renew_loop(store: Arc<IndexStore>, key: String, holder: String, ttl: Duration) {
    let mut interval = tokio::time::interval((ttl / 3).max(Duration::from_millis(10)));
    // first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        let renewed = expiry(ttl).and_then(|at| store.renew_lease(&key, &holder, at));
        match renewed {
            Ok(true) => {}
            Ok(false) => {
                warn!("Sync lease for {} was taken over; stopping renewal", key);
                return;
            }
            Err(e) => warn!("Failed to renew sync lease for {}: {}", key, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_holder_is_refused() {
        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        let ttl = Duration::from_secs(60);

        let first = LeaseGuard::try_acquire(store.clone(), "octo/widgets", "a", ttl)
            .await
            .unwrap()
            .unwrap();
        assert!(LeaseGuard::try_acquire(store.clone(), "octo/widgets", "b", ttl)
            .await
            .unwrap()
            .is_none());

        first.release().unwrap();
        assert!(LeaseGuard::try_acquire(store.clone(), "octo/widgets", "b", ttl)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_same_owner_is_refused_while_held() {
        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        let ttl = Duration::from_secs(60);

        let first = LeaseGuard::try_acquire(store.clone(), "octo/widgets", "coordinator", ttl)
            .await
            .unwrap()
            .unwrap();
        assert!(LeaseGuard::try_acquire(store.clone(), "octo/widgets", "coordinator", ttl)
            .await
            .unwrap()
            .is_none());
        let row = store.get_lease("octo/widgets").unwrap().unwrap();
        assert!(row.holder.starts_with("coordinator:"));

        first.release().unwrap();
        assert!(LeaseGuard::try_acquire(store.clone(), "octo/widgets", "coordinator", ttl)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        {
            let _guard = LeaseGuard::try_acquire(store.clone(), "octo/widgets", "a", Duration::from_secs(60))
                .await
                .unwrap()
                .unwrap();
            assert!(store.get_lease("octo/widgets").unwrap().is_some());
        }
        assert!(store.get_lease("octo/widgets").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_waiter_gets_lease_after_release() {
        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        let ttl = Duration::from_secs(60);
        let held = LeaseGuard::try_acquire(store.clone(), "octo/widgets", "sync", ttl)
            .await
            .unwrap()
            .unwrap();

        let waiter = tokio::spawn({
            let store = store.clone();
            async move {
                LeaseGuard::acquire_within(store, "octo/widgets", "webhook", ttl, Duration::from_secs(5))
                    .await
                    .map(|g| g.is_some())
            }
        });

        tokio::time::sleep(Duration::from_millis(120)).await;
        held.release().unwrap();
        assert!(waiter.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_waiter_gives_up() {
        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        let ttl = Duration::from_secs(60);
        let _held = LeaseGuard::try_acquire(store.clone(), "octo/widgets", "sync", ttl)
            .await
            .unwrap()
            .unwrap();
        let got = LeaseGuard::acquire_within(store, "octo/widgets", "webhook", ttl, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_renewal_extends_expiry() {
        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        let ttl = Duration::from_millis(90);
        let _guard = LeaseGuard::try_acquire(store.clone(), "octo/widgets", "a", ttl)
            .await
            .unwrap()
            .unwrap();
        let first = store.get_lease("octo/widgets").unwrap().unwrap().expires_at;
        tokio::time::sleep(Duration::from_millis(150)).await;
        let later = store.get_lease("octo/widgets").unwrap().unwrap();
        assert!(later.expires_at > first);
        assert!(!later.is_expired(Utc::now()));
    }
}
