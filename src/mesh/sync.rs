//! C11 — queue sync manager. Exchanges `QueueSync` request/response
//! envelopes with peers to reconcile which offline messages each side
//! still needs, rate-limited to one in-flight exchange per peer.

use dashmap::DashMap;
use std::collections::HashSet;
use std::time::Instant;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::mesh::queue::OfflineQueue;
use crate::protocol::envelope::{ProtocolEnvelope, QueueSyncKind};
use crate::protocol::{now_millis, MessageId, NodeId};

#[derive(Debug, Clone, Default)]
pub struct ReconciliationPlan {
    /// Ids we hold that the peer's report didn't include — we should push these.
    pub missing_for_peer: Vec<MessageId>,
    /// Ids the peer's report included that we don't hold — we should request these.
    pub missing_for_us: Vec<MessageId>,
}

struct PeerState {
    last_request_at: Option<Instant>,
    in_flight_since: Option<Instant>,
}

impl PeerState {
    fn new() -> Self {
        Self { last_request_at: None, in_flight_since: None }
    }
}

/// Tracks per-peer rate limiting and in-flight exchanges. Reconciliation
/// itself is pure set arithmetic over the ids each side reports.
pub struct SyncManager {
    config: SyncConfig,
    peers: DashMap<NodeId, PeerState>,
}

impl SyncManager {
    pub fn new(config: SyncConfig) -> Self {
        Self { config, peers: DashMap::new() }
    }

    /// Sweeps in-flight exchanges older than `in_flight_timeout`, releasing
    /// their slot so a fresh request can be sent.
    fn expire_stale(&self, peer: NodeId) {
        if let Some(mut state) = self.peers.get_mut(&peer) {
            if let Some(since) = state.in_flight_since {
                if since.elapsed() >= self.config.in_flight_timeout {
                    state.in_flight_since = None;
                }
            }
        }
    }

    /// Builds an outgoing `QueueSync` request, enforcing the one-in-flight
    /// and minimum-interval rules per §4.11.
    pub fn begin_request(
        &self,
        peer: NodeId,
        local_node: NodeId,
        queue: &OfflineQueue,
    ) -> Result<ProtocolEnvelope> {
        self.expire_stale(peer);
        let mut state = self.peers.entry(peer).or_insert_with(PeerState::new);

        if state.in_flight_since.is_some() {
            return Err(Error::SyncRateLimited);
        }
        if let Some(last) = state.last_request_at {
            if last.elapsed() < self.config.min_interval {
                return Err(Error::SyncRateLimited);
            }
        }

        let now = Instant::now();
        state.last_request_at = Some(now);
        state.in_flight_since = Some(now);

        Ok(self.build_report(local_node, queue, QueueSyncKind::Request))
    }

    /// Call once a response for `peer` has been processed, freeing the
    /// in-flight slot so the next request can be sent after `min_interval`.
    pub fn complete(&self, peer: NodeId) {
        if let Some(mut state) = self.peers.get_mut(&peer) {
            state.in_flight_since = None;
        }
    }

    fn build_report(&self, local_node: NodeId, queue: &OfflineQueue, kind: QueueSyncKind) -> ProtocolEnvelope {
        let mut ids: Vec<MessageId> = queue.pending().into_iter().map(|m| m.id).collect();
        ids.extend(queue.tombstone_ids());
        ProtocolEnvelope::QueueSync {
            hash: queue.queue_hash(false),
            message_ids: ids,
            timestamp: now_millis(),
            node_id: local_node,
            sync_kind: kind,
        }
    }

    /// Handles an incoming `QueueSync::Request`, returning the `Response`
    /// envelope and the reconciliation plan for the caller to act on.
    pub fn handle_request(
        &self,
        local_node: NodeId,
        queue: &OfflineQueue,
        request: &ProtocolEnvelope,
    ) -> Result<(ProtocolEnvelope, ReconciliationPlan)> {
        let ProtocolEnvelope::QueueSync { hash: peer_hash, message_ids: peer_ids, sync_kind, .. } = request
        else {
            return Err(Error::SyncInvalid("not a queue sync envelope".into()));
        };
        if *sync_kind != QueueSyncKind::Request {
            return Err(Error::SyncInvalid("expected a sync request".into()));
        }

        let local_hash = queue.queue_hash(false);
        let plan = if &local_hash == peer_hash {
            ReconciliationPlan::default()
        } else {
            self.reconcile(queue, peer_ids)
        };

        let response = self.build_report(local_node, queue, QueueSyncKind::Response);
        Ok((response, plan))
    }

    /// Handles an incoming `QueueSync::Response` to a request we sent,
    /// releasing the in-flight slot and returning the reconciliation plan.
    pub fn handle_response(
        &self,
        peer: NodeId,
        queue: &OfflineQueue,
        response: &ProtocolEnvelope,
    ) -> Result<ReconciliationPlan> {
        let ProtocolEnvelope::QueueSync { message_ids: peer_ids, sync_kind, .. } = response else {
            return Err(Error::SyncInvalid("not a queue sync envelope".into()));
        };
        if *sync_kind != QueueSyncKind::Response {
            return Err(Error::SyncInvalid("expected a sync response".into()));
        }
        self.complete(peer);
        Ok(self.reconcile(queue, peer_ids))
    }

    fn reconcile(&self, queue: &OfflineQueue, peer_ids: &[MessageId]) -> ReconciliationPlan {
        let local_live: HashSet<MessageId> = queue.pending().into_iter().map(|m| m.id).collect();
        let local_tombstones: HashSet<MessageId> = queue.tombstone_ids().into_iter().collect();
        let peer_set: HashSet<MessageId> = peer_ids.iter().cloned().collect();

        let missing_for_peer: Vec<MessageId> = local_live
            .iter()
            .filter(|id| !peer_set.contains(*id))
            .cloned()
            .collect();
        let missing_for_us: Vec<MessageId> = peer_set
            .iter()
            .filter(|id| !local_live.contains(*id) && !local_tombstones.contains(*id))
            .cloned()
            .collect();

        ReconciliationPlan { missing_for_peer, missing_for_us }
    }
}
