//! C9 — relay engine. Decides whether an incoming relay should be
//! forwarded, delivered locally, dropped, or blocked, and originates
//! outgoing relays on behalf of the local node.

use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::RelayConfig;
use crate::error::{BlockedReason, DroppedReason, Error, Result};
use crate::mesh::queue::{EnqueueOptions, OfflineQueue};
use crate::mesh::seen_store::SeenStore;
use crate::mesh::spam::SpamPrevention;
use crate::protocol::envelope::{Priority, RelayMetadata, SeenKind};
use crate::protocol::{now_millis, MessageId, NodeId};

#[derive(Debug, Clone)]
pub struct MeshRelayMessage {
    pub original_message_id: MessageId,
    pub original_content: Vec<u8>,
    pub metadata: RelayMetadata,
    pub relay_node_id: NodeId,
    pub relayed_at: u64,
}

impl MeshRelayMessage {
    /// Appends `current` to the routing path, incrementing `hop_count`.
    /// Errors per §4.9: loop or TTL exceeded.
    pub fn next_hop(&self, current: NodeId) -> Result<MeshRelayMessage> {
        if self.metadata.routing_path.contains(&current) {
            return Err(Error::Blocked(BlockedReason::Loop));
        }
        let next_hop_count = self.metadata.hop_count + 1;
        if next_hop_count > self.metadata.ttl {
            return Err(Error::Dropped(DroppedReason::TtlExceeded));
        }
        let mut routing_path = self.metadata.routing_path.clone();
        routing_path.push(current);
        let mut next = self.clone();
        next.metadata.hop_count = next_hop_count;
        next.metadata.routing_path = routing_path;
        Ok(next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayProcessingResult {
    Relayed { next_hop_node_id: NodeId },
    Delivered { content: Vec<u8> },
    Dropped { reason: DroppedReason },
    Blocked { reason: BlockedReason },
}

#[derive(Debug, Default)]
pub struct RelayStatistics {
    pub total_relayed: AtomicU64,
    pub total_delivered_to_self: AtomicU64,
    pub total_dropped: AtomicU64,
    pub total_blocked: AtomicU64,
    pub total_probabilistic_skip: AtomicU64,
}

impl RelayStatistics {
    pub fn snapshot(&self, network_size: u32, relay_probability: f64) -> RelayStatisticsSnapshot {
        let relayed = self.total_relayed.load(Ordering::Relaxed);
        let delivered = self.total_delivered_to_self.load(Ordering::Relaxed);
        let total_processed = relayed
            + delivered
            + self.total_dropped.load(Ordering::Relaxed)
            + self.total_blocked.load(Ordering::Relaxed);
        let relay_efficiency = if total_processed == 0 {
            0.0
        } else {
            (relayed + delivered) as f64 / total_processed as f64
        };
        RelayStatisticsSnapshot {
            total_relayed: relayed,
            total_delivered_to_self: delivered,
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            total_blocked: self.total_blocked.load(Ordering::Relaxed),
            total_probabilistic_skip: self.total_probabilistic_skip.load(Ordering::Relaxed),
            network_size,
            current_relay_probability: relay_probability,
            relay_efficiency,
        }
    }

    pub fn clear(&self) {
        self.total_relayed.store(0, Ordering::Relaxed);
        self.total_delivered_to_self.store(0, Ordering::Relaxed);
        self.total_dropped.store(0, Ordering::Relaxed);
        self.total_blocked.store(0, Ordering::Relaxed);
        self.total_probabilistic_skip.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RelayStatisticsSnapshot {
    pub total_relayed: u64,
    pub total_delivered_to_self: u64,
    pub total_dropped: u64,
    pub total_blocked: u64,
    pub total_probabilistic_skip: u64,
    pub network_size: u32,
    pub current_relay_probability: f64,
    pub relay_efficiency: f64,
}

/// Open question #1 (§9): next-hop tie-break is a pluggable policy with a
/// stable deterministic fallback.
pub trait RoutePolicy: Send + Sync {
    fn choose_next_hop(&self, available_next_hops: &[NodeId]) -> Option<NodeId>;
}

pub struct SortedByNodeId;

impl RoutePolicy for SortedByNodeId {
    fn choose_next_hop(&self, available_next_hops: &[NodeId]) -> Option<NodeId> {
        available_next_hops.iter().min().copied()
    }
}

pub fn message_hash(content: &[u8], original_id: &MessageId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.update(original_id);
    hasher.finalize().into()
}

/// Circuit breaker on a per-peer basis around repeated next-hop failures.
/// Ambient safety net, not a spec feature — doesn't affect relay decisions
/// themselves, only whether this engine keeps offering a peer as a next hop.
struct PeerCircuit {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct RelayEngine {
    current_node_id: NodeId,
    config: RelayConfig,
    seen_store: std::sync::Arc<SeenStore>,
    spam: std::sync::Arc<SpamPrevention>,
    queue: std::sync::Arc<OfflineQueue>,
    route_policy: Box<dyn RoutePolicy>,
    stats: RelayStatistics,
    circuit_failure_threshold: u32,
    circuit_cooldown: Duration,
    peer_circuits: dashmap::DashMap<NodeId, PeerCircuit>,
    network_size_oracle: Box<dyn Fn() -> u32 + Send + Sync>,
}

impl RelayEngine {
    pub fn new(
        current_node_id: NodeId,
        config: RelayConfig,
        seen_store: std::sync::Arc<SeenStore>,
        spam: std::sync::Arc<SpamPrevention>,
        queue: std::sync::Arc<OfflineQueue>,
        network_size_oracle: Box<dyn Fn() -> u32 + Send + Sync>,
    ) -> Self {
        Self {
            current_node_id,
            config,
            seen_store,
            spam,
            queue,
            route_policy: Box::new(SortedByNodeId),
            stats: RelayStatistics::default(),
            circuit_failure_threshold: 5,
            circuit_cooldown: Duration::from_secs(30),
            peer_circuits: dashmap::DashMap::new(),
            network_size_oracle,
        }
    }

    pub fn with_route_policy(mut self, policy: Box<dyn RoutePolicy>) -> Self {
        self.route_policy = policy;
        self
    }

    pub fn priority_ttl(&self, priority: Priority) -> u8 {
        let map = self.config.priority_ttl_map;
        match priority {
            Priority::Low => map.low,
            Priority::Normal => map.normal,
            Priority::High => map.high,
            Priority::Urgent => map.urgent,
        }
    }

    pub fn create_outgoing_relay(
        &self,
        original_message_id: MessageId,
        content: Vec<u8>,
        final_recipient: NodeId,
        priority: Priority,
    ) -> Option<MeshRelayMessage> {
        let metadata = RelayMetadata {
            ttl: self.priority_ttl(priority),
            hop_count: 1,
            routing_path: vec![self.current_node_id],
            message_hash: message_hash(&content, &original_message_id),
            priority,
            relay_timestamp: now_millis(),
            original_sender: self.current_node_id,
            final_recipient,
        };
        Some(MeshRelayMessage {
            original_message_id,
            original_content: content,
            metadata,
            relay_node_id: self.current_node_id,
            relayed_at: now_millis(),
        })
    }

    pub fn should_attempt_decryption(&self, final_recipient: NodeId, has_session_with_sender: bool) -> bool {
        final_recipient == self.current_node_id || has_session_with_sender
    }

    /// Decision pipeline from §4.9, steps 1-11 in order.
    pub fn process_incoming_relay(
        &self,
        msg: &MeshRelayMessage,
        available_next_hops: &[NodeId],
    ) -> RelayProcessingResult {
        // 1. self-echo
        if msg.metadata.original_sender == self.current_node_id {
            self.stats.total_dropped.fetch_add(1, Ordering::Relaxed);
            return RelayProcessingResult::Dropped { reason: DroppedReason::SelfEcho };
        }

        // 2. validate fields
        if msg.original_content.is_empty() || msg.original_message_id.is_empty() {
            self.stats.total_blocked.fetch_add(1, Ordering::Relaxed);
            return RelayProcessingResult::Blocked { reason: BlockedReason::Invalid };
        }

        // 3. seen-store duplicate check
        if self.seen_store.has(&msg.original_message_id, SeenKind::Delivered) {
            self.stats.total_blocked.fetch_add(1, Ordering::Relaxed);
            return RelayProcessingResult::Blocked { reason: BlockedReason::Duplicate };
        }

        // 4. spam checks
        let spam_result = self.spam.check_incoming(
            msg.metadata.original_sender,
            msg.original_content.len(),
            &msg.metadata.message_hash,
            &msg.metadata.routing_path,
            &self.current_node_id,
        );
        if !spam_result.allowed {
            self.stats.total_blocked.fetch_add(1, Ordering::Relaxed);
            let reason = match spam_result.reason.as_str() {
                "rate_limited" => BlockedReason::RateLimited,
                "duplicate" => BlockedReason::Duplicate,
                "size" => BlockedReason::Size,
                _ => BlockedReason::Invalid,
            };
            return RelayProcessingResult::Blocked { reason };
        }

        // 5. loop check
        if msg.metadata.routing_path.contains(&self.current_node_id) {
            self.stats.total_blocked.fetch_add(1, Ordering::Relaxed);
            return RelayProcessingResult::Blocked { reason: BlockedReason::Loop };
        }

        // 6. local delivery
        if msg.metadata.final_recipient == self.current_node_id {
            self.seen_store.mark(&msg.original_message_id, SeenKind::Delivered);
            self.stats.total_delivered_to_self.fetch_add(1, Ordering::Relaxed);
            return RelayProcessingResult::Delivered { content: msg.original_content.clone() };
        }

        // 7. hop/TTL
        if msg.metadata.hop_count + 1 > msg.metadata.ttl {
            self.stats.total_dropped.fetch_add(1, Ordering::Relaxed);
            return RelayProcessingResult::Dropped { reason: DroppedReason::TtlExceeded };
        }

        // 8. neighbors
        if available_next_hops.is_empty() {
            self.stats.total_dropped.fetch_add(1, Ordering::Relaxed);
            return RelayProcessingResult::Dropped { reason: DroppedReason::NoNeighbors };
        }

        // 9. probabilistic skip
        let network_size = (self.network_size_oracle)();
        let probability = self.config.relay_probability(network_size);
        let draw: f64 = rand::thread_rng().gen_range(0.0..1.0);
        if draw > probability {
            self.stats.total_probabilistic_skip.fetch_add(1, Ordering::Relaxed);
            self.stats.total_blocked.fetch_add(1, Ordering::Relaxed);
            return RelayProcessingResult::Blocked { reason: BlockedReason::ProbabilisticSkip };
        }

        // 10. choose next hop, advance the message
        let usable_hops: Vec<NodeId> = available_next_hops
            .iter()
            .copied()
            .filter(|hop| !self.circuit_open(hop))
            .collect();
        let candidates = if usable_hops.is_empty() { available_next_hops } else { &usable_hops };
        let Some(next_hop) = self.route_policy.choose_next_hop(candidates) else {
            self.stats.total_dropped.fetch_add(1, Ordering::Relaxed);
            return RelayProcessingResult::Dropped { reason: DroppedReason::NoNeighbors };
        };

        let advanced = match msg.next_hop(self.current_node_id) {
            Ok(advanced) => advanced,
            Err(Error::Blocked(reason)) => {
                self.stats.total_blocked.fetch_add(1, Ordering::Relaxed);
                return RelayProcessingResult::Blocked { reason };
            }
            Err(Error::Dropped(reason)) => {
                self.stats.total_dropped.fetch_add(1, Ordering::Relaxed);
                return RelayProcessingResult::Dropped { reason };
            }
            Err(_) => {
                self.stats.total_blocked.fetch_add(1, Ordering::Relaxed);
                return RelayProcessingResult::Blocked { reason: BlockedReason::Invalid };
            }
        };

        // 11. mark delivered to suppress future duplicates, enqueue transient forward
        self.seen_store.mark(&advanced.original_message_id, SeenKind::Delivered);
        let _ = self.queue.enqueue(
            advanced.original_message_id.clone(),
            format!("relay:{}", crate::protocol::node_id_to_hex(&next_hop)),
            advanced.original_content.clone(),
            self.current_node_id,
            next_hop,
            advanced.metadata.priority,
            EnqueueOptions {
                relay_metadata: Some(advanced.metadata.clone()),
                original_message_id: Some(advanced.original_message_id.clone()),
                persist: false,
            },
        );
        self.stats.total_relayed.fetch_add(1, Ordering::Relaxed);
        RelayProcessingResult::Relayed { next_hop_node_id: next_hop }
    }

    fn circuit_open(&self, peer: &NodeId) -> bool {
        match self.peer_circuits.get(peer) {
            Some(circuit) => {
                if circuit.consecutive_failures < self.circuit_failure_threshold {
                    return false;
                }
                match circuit.opened_at {
                    Some(opened) => opened.elapsed() < self.circuit_cooldown,
                    None => true,
                }
            }
            None => false,
        }
    }

    pub fn record_next_hop_failure(&self, peer: NodeId) {
        let mut entry = self.peer_circuits.entry(peer).or_insert(PeerCircuit {
            consecutive_failures: 0,
            opened_at: None,
        });
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.circuit_failure_threshold && entry.opened_at.is_none() {
            entry.opened_at = Some(Instant::now());
        }
    }

    pub fn record_next_hop_success(&self, peer: NodeId) {
        if let Some(mut entry) = self.peer_circuits.get_mut(&peer) {
            entry.consecutive_failures = 0;
            entry.opened_at = None;
        }
    }

    pub fn statistics(&self) -> RelayStatisticsSnapshot {
        let network_size = (self.network_size_oracle)();
        self.stats.snapshot(network_size, self.config.relay_probability(network_size))
    }

    pub fn clear_statistics(&self) {
        self.stats.clear();
    }
}
