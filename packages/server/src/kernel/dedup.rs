//! In-memory dedup cache for inbound webhook events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use super::traits::BaseDedupStore;

const PURGE_EVERY: u64 = 512;

/// Key-existence cache with per-key expiry.
///
/// `set_if_absent` goes through DashMap's entry API, which holds the shard
/// lock for the key, so two concurrent deliveries of the same id cannot both
/// observe "absent".
#[derive(Default)]
pub struct InMemoryDedupStore {
    entries: DashMap<String, Instant>,
    writes: AtomicU64,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired keys. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl BaseDedupStore for InMemoryDedupStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let inserted = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    false
                } else {
                    entry.insert(now + ttl);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now + ttl);
                true
            }
        };

        if inserted && self.writes.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1
        {
            let purged = self.purge_expired();
            tracing::debug!(purged, "purged expired dedup keys");
        }

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(30 * 60);

    #[tokio::test(start_paused = true)]
    async fn second_set_within_ttl_is_rejected() {
        let store = InMemoryDedupStore::new();

        assert!(store.set_if_absent("inbound:wamid.1", TTL).await.unwrap());
        assert!(!store.set_if_absent("inbound:wamid.1", TTL).await.unwrap());
        assert!(store.set_if_absent("inbound:wamid.2", TTL).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_keys_can_be_set_again() {
        let store = InMemoryDedupStore::new();
        store.set_if_absent("inbound:wamid.1", TTL).await.unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert!(store.set_if_absent("inbound:wamid.1", TTL).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired() {
        let store = InMemoryDedupStore::new();
        store
            .set_if_absent("short", Duration::from_secs(1))
            .await
            .unwrap();
        store.set_if_absent("long", TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sets_admit_exactly_one() {
        let store = Arc::new(InMemoryDedupStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.set_if_absent("inbound:race", TTL).await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
