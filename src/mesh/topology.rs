//! C10 — network topology. An undirected, in-memory view of which nodes
//! can currently reach which, used to decide whether a message can go
//! direct or needs to be handed to the relay engine.

use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::protocol::envelope::Priority;
use crate::protocol::NodeId;

#[derive(Debug, Clone, Copy)]
struct LinkQuality {
    sent: u64,
    acked: u64,
    last_seen: Instant,
}

impl LinkQuality {
    fn new() -> Self {
        Self { sent: 0, acked: 0, last_seen: Instant::now() }
    }

    fn delivery_rate(&self) -> f64 {
        if self.sent == 0 {
            1.0
        } else {
            self.acked as f64 / self.sent as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    Direct,
    Relay,
    Unreachable,
}

/// Undirected adjacency graph with a quality sample per edge. Edges expire
/// after `neighbor_ttl` without a refresh, so a peer that drops off BLE
/// range eventually stops being offered as a next hop.
pub struct Topology {
    local: NodeId,
    edges: DashMap<(NodeId, NodeId), LinkQuality>,
    neighbor_ttl: Duration,
}

fn edge_key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Topology {
    pub fn new(local: NodeId, neighbor_ttl: Duration) -> Self {
        Self { local, edges: DashMap::new(), neighbor_ttl }
    }

    /// Records (or refreshes) a direct link between two nodes.
    pub fn observe_link(&self, a: NodeId, b: NodeId) {
        let mut entry = self.edges.entry(edge_key(a, b)).or_insert_with(LinkQuality::new);
        entry.last_seen = Instant::now();
    }

    pub fn record_send(&self, a: NodeId, b: NodeId) {
        if let Some(mut entry) = self.edges.get_mut(&edge_key(a, b)) {
            entry.sent += 1;
            entry.last_seen = Instant::now();
        }
    }

    pub fn record_ack(&self, a: NodeId, b: NodeId) {
        if let Some(mut entry) = self.edges.get_mut(&edge_key(a, b)) {
            entry.acked += 1;
        }
    }

    fn is_live(&self, quality: &LinkQuality) -> bool {
        quality.last_seen.elapsed() < self.neighbor_ttl
    }

    pub fn neighbors(&self, node_id: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|entry| self.is_live(entry.value()))
            .filter_map(|entry| {
                let (a, b) = *entry.key();
                if a == node_id {
                    Some(b)
                } else if b == node_id {
                    Some(a)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn link_quality(&self, a: NodeId, b: NodeId) -> Option<f64> {
        self.edges.get(&edge_key(a, b)).map(|q| q.delivery_rate())
    }

    /// Distinct live nodes currently tracked, including the local node
    /// itself if it has any live edges. Feeds `RelayConfig::relay_probability`.
    pub fn network_size(&self) -> u32 {
        let mut nodes = HashSet::new();
        for entry in self.edges.iter() {
            if self.is_live(entry.value()) {
                let (a, b) = *entry.key();
                nodes.insert(a);
                nodes.insert(b);
            }
        }
        nodes.len() as u32
    }

    /// Breadth-first reachability check bounded by `max_hops`, used only to
    /// classify direct vs. relay vs. unreachable — not to pick a route.
    pub fn is_reachable_within(&self, target: NodeId, max_hops: u8) -> bool {
        if target == self.local {
            return true;
        }
        let mut visited = HashSet::new();
        visited.insert(self.local);
        let mut frontier = VecDeque::new();
        frontier.push_back((self.local, 0u8));

        while let Some((node, hops)) = frontier.pop_front() {
            if hops >= max_hops {
                continue;
            }
            for neighbor in self.neighbors(node) {
                if neighbor == target {
                    return true;
                }
                if visited.insert(neighbor) {
                    frontier.push_back((neighbor, hops + 1));
                }
            }
        }
        false
    }

    /// Decides whether `final_recipient` should be addressed directly,
    /// handed to the relay engine, or is currently unreachable, given the
    /// hop budget implied by `priority`.
    pub fn determine_optimal_route(
        &self,
        final_recipient: NodeId,
        priority_ttl: u8,
    ) -> RoutingDecision {
        if self.neighbors(self.local).contains(&final_recipient) {
            return RoutingDecision::Direct;
        }
        if priority_ttl >= 1 && self.is_reachable_within(final_recipient, priority_ttl) {
            RoutingDecision::Relay
        } else {
            RoutingDecision::Unreachable
        }
    }

    pub fn route_for_priority(
        &self,
        final_recipient: NodeId,
        priority: Priority,
        priority_ttl_map: crate::config::PriorityTtlMap,
    ) -> RoutingDecision {
        let ttl = match priority {
            Priority::Low => priority_ttl_map.low,
            Priority::Normal => priority_ttl_map.normal,
            Priority::High => priority_ttl_map.high,
            Priority::Urgent => priority_ttl_map.urgent,
        };
        self.determine_optimal_route(final_recipient, ttl)
    }

    /// Drops edges that have not been refreshed within `neighbor_ttl`.
    pub fn prune_stale(&self) {
        self.edges.retain(|_, quality| quality.last_seen.elapsed() < self.neighbor_ttl);
    }
}
