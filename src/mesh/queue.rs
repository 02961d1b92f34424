//! C8 — durable priority queue of outbound and in-flight messages with
//! retries, deletion tombstones, and an order-independent queue hash used
//! by the sync manager (C11).

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::protocol::envelope::{Priority, RelayMetadata};
use crate::protocol::{now_millis, MessageId, NodeId};
use crate::storage::{QueueItemRecord, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Pending,
    Sending,
    Delivered,
    Failed,
    Retrying,
}

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub chat_id: String,
    pub content: Vec<u8>,
    pub sender: NodeId,
    pub recipient: NodeId,
    pub priority: Priority,
    pub attempts: u32,
    pub status: MessageStatus,
    pub created_at: Instant,
    pub next_attempt_at: Instant,
    pub relay_metadata: Option<RelayMetadata>,
    pub original_message_id: Option<MessageId>,
    pub persist: bool,
    pub failure_reason: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    // lower is "more urgent": negate priority so BTreeMap iterates priority
    // desc, then created_at asc, matching §4.8's `pending()` ordering.
    priority_rank: u8,
    sequence: u64,
}

fn priority_rank(p: Priority) -> u8 {
    match p {
        Priority::Urgent => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
    }
}

#[derive(Default)]
struct Inner {
    live: HashMap<MessageId, QueuedMessage>,
    order: BTreeMap<OrderKey, MessageId>,
    order_keys: HashMap<MessageId, OrderKey>,
    tombstones: HashMap<MessageId, Instant>,
    sequence: u64,
    cached_hash: Option<Vec<u8>>,
}

/// Durable priority queue. When built with a backing `Store` (§4.8), every
/// enqueue/delivery/tombstone mutation is mirrored there so the live set and
/// tombstones survive a process restart; `restore` rebuilds in-memory state
/// from that backing on startup.
pub struct OfflineQueue {
    inner: RwLock<Inner>,
    config: QueueConfig,
    online: std::sync::atomic::AtomicBool,
    store: Option<Arc<dyn Store>>,
}

#[allow(clippy::too_many_arguments)]
pub struct EnqueueOptions {
    pub relay_metadata: Option<RelayMetadata>,
    pub original_message_id: Option<MessageId>,
    pub persist: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self { relay_metadata: None, original_message_id: None, persist: true }
    }
}

impl OfflineQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            config,
            online: std::sync::atomic::AtomicBool::new(true),
            store: None,
        }
    }

    pub fn with_store(config: QueueConfig, store: Arc<dyn Store>) -> Self {
        Self { store: Some(store), ..Self::new(config) }
    }

    /// Rebuilds the live set and tombstones from the backing store. Call
    /// once at startup, before the queue is otherwise used, to recover the
    /// pre-restart state per §4.8.
    pub async fn restore(&self) -> Result<()> {
        let Some(backing) = self.store.clone() else { return Ok(()) };
        let items = backing.queue_items().await?;
        let tombstones = backing.queue_tombstones().await?;

        let mut inner = self.inner.write();
        for item in items {
            if inner.live.contains_key(&item.id) || inner.tombstones.contains_key(&item.id) {
                continue;
            }
            let sequence = inner.sequence;
            inner.sequence += 1;
            let key = OrderKey { priority_rank: priority_rank(item.priority), sequence };
            let now = Instant::now();
            let message = QueuedMessage {
                id: item.id.clone(),
                chat_id: item.chat_id,
                content: item.content,
                sender: item.sender,
                recipient: item.recipient,
                priority: item.priority,
                attempts: 0,
                status: MessageStatus::Pending,
                created_at: now,
                next_attempt_at: now,
                relay_metadata: None,
                original_message_id: None,
                persist: true,
                failure_reason: None,
            };
            inner.order.insert(key, item.id.clone());
            inner.order_keys.insert(item.id.clone(), key);
            inner.live.insert(item.id, message);
        }
        for (id, _deleted_at_millis) in tombstones {
            // `Instant` has no wall-clock epoch, so a restored tombstone's
            // age resets to "now" rather than its true pre-restart age; it
            // will be re-evicted on its next full `tombstone_ttl` window.
            inner.tombstones.entry(id).or_insert_with(Instant::now);
        }
        inner.cached_hash = None;
        Ok(())
    }

    fn persist_item(&self, message: &QueuedMessage) {
        if !message.persist {
            return;
        }
        if let Some(backing) = self.store.clone() {
            let record = QueueItemRecord {
                id: message.id.clone(),
                chat_id: message.chat_id.clone(),
                sender: message.sender,
                recipient: message.recipient,
                content: message.content.clone(),
                priority: message.priority,
            };
            tokio::spawn(async move {
                if let Err(err) = backing.put_queue_item(record).await {
                    tracing::warn!(?err, "failed to persist queue item");
                }
            });
        }
    }

    fn persist_removal(&self, id: &MessageId) {
        if let Some(backing) = self.store.clone() {
            let id = id.clone();
            tokio::spawn(async move {
                if let Err(err) = backing.remove_queue_item(&id).await {
                    tracing::warn!(?err, "failed to persist queue item removal");
                }
            });
        }
    }

    fn persist_tombstone(&self, id: &MessageId) {
        if let Some(backing) = self.store.clone() {
            let id = id.clone();
            let deleted_at_millis = now_millis();
            tokio::spawn(async move {
                if let Err(err) = backing.put_queue_tombstone(id, deleted_at_millis).await {
                    tracing::warn!(?err, "failed to persist queue tombstone");
                }
            });
        }
    }

    pub fn enqueue(
        &self,
        id: MessageId,
        chat_id: String,
        content: Vec<u8>,
        sender: NodeId,
        recipient: NodeId,
        priority: Priority,
        options: EnqueueOptions,
    ) -> Result<MessageId> {
        let mut inner = self.inner.write();

        if inner.tombstones.contains_key(&id) {
            return Err(Error::QueueTombstoned);
        }

        if inner.live.len() >= self.config.max_size && priority != Priority::Urgent {
            return Err(Error::QueueFull);
        }

        let sequence = inner.sequence;
        inner.sequence += 1;
        let key = OrderKey { priority_rank: priority_rank(priority), sequence };

        let now = Instant::now();
        let message = QueuedMessage {
            id: id.clone(),
            chat_id,
            content,
            sender,
            recipient,
            priority,
            attempts: 0,
            status: MessageStatus::Pending,
            created_at: now,
            next_attempt_at: now,
            relay_metadata: options.relay_metadata,
            original_message_id: options.original_message_id,
            persist: options.persist,
            failure_reason: None,
        };

        self.persist_item(&message);
        inner.live.insert(id.clone(), message);
        inner.order.insert(key, id.clone());
        inner.order_keys.insert(id.clone(), key);
        inner.cached_hash = None;

        Ok(id)
    }

    pub fn pending(&self) -> Vec<QueuedMessage> {
        let inner = self.inner.read();
        inner
            .order
            .values()
            .filter_map(|id| inner.live.get(id))
            .filter(|m| m.status == MessageStatus::Pending || m.status == MessageStatus::Retrying)
            .cloned()
            .collect()
    }

    pub fn by_status(&self, status: MessageStatus) -> Vec<QueuedMessage> {
        self.inner.read().live.values().filter(|m| m.status == status).cloned().collect()
    }

    pub fn by_id(&self, id: &MessageId) -> Option<QueuedMessage> {
        self.inner.read().live.get(id).cloned()
    }

    pub fn mark_delivered(&self, id: &MessageId) -> Result<()> {
        let mut inner = self.inner.write();
        let key = inner.order_keys.remove(id);
        if let Some(key) = key {
            inner.order.remove(&key);
        }
        inner.live.remove(id);
        inner.cached_hash = None;
        drop(inner);
        self.persist_removal(id);
        Ok(())
    }

    pub fn mark_failed(&self, id: &MessageId, reason: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.write();
        let (base, max) = (self.config.base_backoff, self.config.max_backoff);
        let message = inner.live.get_mut(id).ok_or_else(|| Error::InvalidChunk("unknown id".into()))?;
        message.attempts += 1;
        message.status = MessageStatus::Failed;
        message.failure_reason = Some(reason.into());
        message.next_attempt_at = Instant::now() + exponential_backoff(base, max, message.attempts);
        Ok(())
    }

    pub fn remove(&self, id: &MessageId) -> Result<()> {
        self.mark_delivered(id)
    }

    /// Resets every `failed` message back to `pending` so the adapter will
    /// retry them on the next send window.
    pub fn retry_failed(&self) {
        let mut inner = self.inner.write();
        for message in inner.live.values_mut() {
            if message.status == MessageStatus::Failed {
                message.status = MessageStatus::Retrying;
            }
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn mark_deleted(&self, id: &MessageId) -> Result<()> {
        let mut inner = self.inner.write();
        let key = inner.order_keys.remove(id);
        if let Some(key) = key {
            inner.order.remove(&key);
        }
        inner.live.remove(id);
        inner.tombstones.insert(id.clone(), Instant::now());
        inner.cached_hash = None;
        self.evict_tombstones(&mut inner);
        drop(inner);
        self.persist_removal(id);
        self.persist_tombstone(id);
        Ok(())
    }

    fn evict_tombstones(&self, inner: &mut Inner) {
        let ttl = self.config.tombstone_ttl;
        inner.tombstones.retain(|_, at| at.elapsed() < ttl);
        if inner.tombstones.len() > self.config.max_tombstones {
            let mut entries: Vec<(MessageId, Instant)> =
                inner.tombstones.iter().map(|(k, v)| (k.clone(), *v)).collect();
            entries.sort_by_key(|(_, at)| *at);
            let excess = entries.len() - self.config.max_tombstones;
            for (id, _) in entries.into_iter().take(excess) {
                inner.tombstones.remove(&id);
            }
        }
    }

    pub fn tombstone_ids(&self) -> Vec<MessageId> {
        self.inner.read().tombstones.keys().cloned().collect()
    }

    /// Digest over sorted non-delivered live ids plus sorted tombstone ids.
    /// Stable under insertion order (queue hash law, §8).
    pub fn queue_hash(&self, force: bool) -> Vec<u8> {
        let mut inner = self.inner.write();
        if !force {
            if let Some(cached) = &inner.cached_hash {
                return cached.clone();
            }
        }

        let mut live_ids: Vec<MessageId> = inner.live.keys().cloned().collect();
        live_ids.sort();
        let mut tombstone_ids: Vec<MessageId> = inner.tombstones.keys().cloned().collect();
        tombstone_ids.sort();

        let mut hasher = Sha256::new();
        for id in &live_ids {
            hasher.update(id);
        }
        for id in &tombstone_ids {
            hasher.update(id);
        }
        let digest = hasher.finalize().to_vec();
        inner.cached_hash = Some(digest.clone());
        digest
    }

    pub fn len(&self) -> usize {
        self.inner.read().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn exponential_backoff(base: Duration, max: Duration, attempts: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
    let candidate = base.saturating_mul(factor);
    std::cmp::min(candidate, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(b: u8) -> NodeId {
        [b; 32]
    }

    fn enqueue_simple(queue: &OfflineQueue, id: u8, priority: Priority) -> MessageId {
        queue
            .enqueue(
                vec![id],
                "chat".into(),
                vec![1, 2, 3],
                node(1),
                node(2),
                priority,
                EnqueueOptions::default(),
            )
            .unwrap()
    }

    #[test]
    fn pending_orders_by_priority_then_insertion() {
        let queue = OfflineQueue::new(QueueConfig::default());
        enqueue_simple(&queue, 1, Priority::Low);
        enqueue_simple(&queue, 2, Priority::Urgent);
        enqueue_simple(&queue, 3, Priority::Normal);
        enqueue_simple(&queue, 4, Priority::Urgent);

        let pending = queue.pending();
        let ids: Vec<u8> = pending.iter().map(|m| m.id[0]).collect();
        assert_eq!(ids, vec![2, 4, 3, 1]);
    }

    #[test]
    fn mark_delivered_removes_from_live_set() {
        let queue = OfflineQueue::new(QueueConfig::default());
        let id = enqueue_simple(&queue, 1, Priority::Normal);
        queue.mark_delivered(&id).unwrap();
        assert!(queue.by_id(&id).is_none());
        assert!(queue.pending().is_empty());
    }

    #[test]
    fn mark_failed_applies_exponential_backoff() {
        let config = QueueConfig {
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            ..Default::default()
        };
        let queue = OfflineQueue::new(config);
        let id = enqueue_simple(&queue, 1, Priority::Normal);
        queue.mark_failed(&id, "link down").unwrap();
        let m = queue.by_id(&id).unwrap();
        assert_eq!(m.attempts, 1);
        assert_eq!(m.status, MessageStatus::Failed);
        assert!(m.next_attempt_at >= m.created_at + Duration::from_millis(10));
    }

    #[test]
    fn mark_deleted_inserts_tombstone_and_blocks_requeue() {
        let queue = OfflineQueue::new(QueueConfig::default());
        let id = enqueue_simple(&queue, 1, Priority::Normal);
        queue.mark_deleted(&id).unwrap();
        assert!(queue.by_id(&id).is_none());
        assert_eq!(queue.tombstone_ids(), vec![id.clone()]);
        let err = queue
            .enqueue(id, "chat".into(), vec![], node(1), node(2), Priority::Normal, EnqueueOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::QueueTombstoned));
    }

    #[test]
    fn queue_hash_is_permutation_invariant() {
        let queue_a = OfflineQueue::new(QueueConfig::default());
        let queue_b = OfflineQueue::new(QueueConfig::default());

        for id in [3u8, 1, 2] {
            enqueue_simple(&queue_a, id, Priority::Normal);
        }
        for id in [1u8, 2, 3] {
            enqueue_simple(&queue_b, id, Priority::Normal);
        }

        assert_eq!(queue_a.queue_hash(true), queue_b.queue_hash(true));
    }

    #[test]
    fn queue_full_rejects_non_urgent_over_cap() {
        let queue = OfflineQueue::new(QueueConfig { max_size: 1, ..Default::default() });
        enqueue_simple(&queue, 1, Priority::Normal);
        let err = queue
            .enqueue(vec![2], "c".into(), vec![], node(1), node(2), Priority::Normal, EnqueueOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::QueueFull));
    }

    #[test]
    fn relay_forward_enqueues_transient_not_persisted() {
        let queue = OfflineQueue::new(QueueConfig::default());
        let options = EnqueueOptions { persist: false, ..Default::default() };
        let id = queue
            .enqueue(vec![1], "c".into(), vec![], node(1), node(2), Priority::Normal, options)
            .unwrap();
        assert!(!queue.by_id(&id).unwrap().persist);
    }

    #[tokio::test]
    async fn enqueue_and_delete_persist_to_the_backing_store() {
        let backing = Arc::new(crate::storage::InMemoryStore::new());
        let queue = OfflineQueue::with_store(QueueConfig::default(), backing.clone());
        let id = enqueue_simple(&queue, 1, Priority::Normal);
        queue.mark_deleted(&id).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(backing.queue_items().await.unwrap().is_empty());
        let tombstones = backing.queue_tombstones().await.unwrap();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].0, id);
    }

    #[tokio::test]
    async fn queue_hash_survives_a_simulated_restart() {
        // spec §4.8: live queue and tombstones survive process restart, and
        // queue_hash afterward equals its pre-shutdown value.
        let backing = Arc::new(crate::storage::InMemoryStore::new());
        let before = OfflineQueue::with_store(QueueConfig::default(), backing.clone());
        enqueue_simple(&before, 1, Priority::Normal);
        enqueue_simple(&before, 2, Priority::High);
        let deleted = enqueue_simple(&before, 3, Priority::Low);
        before.mark_deleted(&deleted).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let hash_before = before.queue_hash(true);

        // "process restart": a fresh queue over the same backing store.
        let after = OfflineQueue::with_store(QueueConfig::default(), backing.clone());
        after.restore().await.unwrap();
        let hash_after = after.queue_hash(true);

        assert_eq!(hash_before, hash_after);
        assert_eq!(after.pending().len(), 2);
    }
}
