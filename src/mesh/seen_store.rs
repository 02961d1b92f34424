//! C6 — bounded, TTL'd set of `(message_id, kind)` used to deduplicate
//! relays and delivery/read receipts.

use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::protocol::MessageId;
use crate::protocol::envelope::SeenKind;
use crate::storage::Store;

struct PerKindStore {
    cache: LruCache<MessageId, Instant>,
}

/// One bounded LRU per `SeenKind`, each capped at `max_entries` and swept of
/// entries older than `cache_ttl` on `maintain()`. When built with a
/// backing `Store` (§4.6), every `mark` is also persisted there so a
/// `(id, kind)` pair survives process restart even after it ages out of
/// the in-memory LRU.
pub struct SeenStore {
    delivered: RwLock<PerKindStore>,
    read: RwLock<PerKindStore>,
    cache_ttl: Duration,
    store: Option<Arc<dyn Store>>,
}

impl SeenStore {
    pub fn new(max_entries_per_kind: usize, cache_ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(max_entries_per_kind.max(1)).unwrap();
        Self {
            delivered: RwLock::new(PerKindStore { cache: LruCache::new(cap) }),
            read: RwLock::new(PerKindStore { cache: LruCache::new(cap) }),
            cache_ttl,
            store: None,
        }
    }

    // TODO: `Store` has no "list seen ids" method, so a restart cannot
    // rehydrate the in-memory LRU here the way `OfflineQueue::restore`
    // does for the queue; only forward persistence is wired up.
    pub fn with_store(max_entries_per_kind: usize, cache_ttl: Duration, store: Arc<dyn Store>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(max_entries_per_kind, cache_ttl)
        }
    }

    fn store_for(&self, kind: SeenKind) -> &RwLock<PerKindStore> {
        match kind {
            SeenKind::Delivered => &self.delivered,
            SeenKind::Read => &self.read,
        }
    }

    /// Marks `id` seen for `kind` in the in-memory LRU, and, if a backing
    /// `Store` is configured, spawns a write-through persist of
    /// `(id, kind, seen_at)`. The persist is fire-and-forget: a failure is
    /// logged, not propagated, since dedup correctness for the life of this
    /// process only depends on the in-memory cache above.
    pub fn mark(&self, id: &MessageId, kind: SeenKind) {
        let store = self.store_for(kind);
        let mut guard = store.write();
        guard.cache.put(id.clone(), Instant::now());
        drop(guard);

        if let Some(backing) = self.store.clone() {
            let id = id.clone();
            tokio::spawn(async move {
                if let Err(err) = backing.mark_seen(&id, kind).await {
                    tracing::warn!(?err, "failed to persist seen-store entry");
                }
            });
        }
    }

    pub fn has(&self, id: &MessageId, kind: SeenKind) -> bool {
        let store = self.store_for(kind);
        store.read().cache.contains(id)
    }

    pub fn clear(&self) {
        self.delivered.write().cache.clear();
        self.read.write().cache.clear();
    }

    /// Drops cache entries older than `cache_ttl`. The per-kind LRU cap is
    /// already enforced on every `mark`.
    pub fn maintain(&self) {
        for store in [&self.delivered, &self.read] {
            let mut guard = store.write();
            let ttl = self.cache_ttl;
            let stale: Vec<MessageId> = guard
                .cache
                .iter()
                .filter(|(_, seen_at)| seen_at.elapsed() >= ttl)
                .map(|(id, _)| id.clone())
                .collect();
            for id in stale {
                guard.cache.pop(&id);
            }
        }
    }
}
