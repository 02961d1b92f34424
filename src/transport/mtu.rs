//! Adaptive per-peer MTU cache. BLE's negotiated MTU varies by platform
//! and link, so the fragmenter asks here rather than assuming a fixed size.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::protocol::NodeId;

pub const MIN_MTU: usize = 23;
pub const MAX_MTU: usize = 512;
pub const DEFAULT_MTU: usize = 247;
pub const MTU_CACHE_TTL: Duration = Duration::from_secs(3600);

struct CachedMtu {
    mtu: usize,
    discovered_at: Instant,
}

pub struct MtuCache {
    entries: DashMap<NodeId, CachedMtu>,
    ttl: Duration,
}

impl Default for MtuCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MtuCache {
    pub fn new() -> Self {
        Self::with_ttl(MTU_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    /// Returns the cached MTU for `peer`, or `DEFAULT_MTU` if unknown or stale.
    pub fn get(&self, peer: NodeId) -> usize {
        match self.entries.get(&peer) {
            Some(entry) if entry.discovered_at.elapsed() < self.ttl => entry.mtu,
            _ => DEFAULT_MTU,
        }
    }

    /// Records a freshly negotiated MTU, clamped to the link's valid range.
    pub fn record(&self, peer: NodeId, discovered_mtu: usize) {
        let clamped = discovered_mtu.clamp(MIN_MTU, MAX_MTU);
        self.entries.insert(peer, CachedMtu { mtu: clamped, discovered_at: Instant::now() });
    }

    pub fn invalidate(&self, peer: NodeId) {
        self.entries.remove(&peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(b: u8) -> NodeId {
        [b; 32]
    }

    #[test]
    fn unknown_peer_falls_back_to_default() {
        let cache = MtuCache::new();
        assert_eq!(cache.get(node(1)), DEFAULT_MTU);
    }

    #[test]
    fn recorded_mtu_is_clamped_to_range() {
        let cache = MtuCache::new();
        cache.record(node(1), 10);
        assert_eq!(cache.get(node(1)), MIN_MTU);
        cache.record(node(1), 9999);
        assert_eq!(cache.get(node(1)), MAX_MTU);
        cache.record(node(1), 185);
        assert_eq!(cache.get(node(1)), 185);
    }

    #[test]
    fn stale_entries_fall_back_to_default() {
        let cache = MtuCache::with_ttl(Duration::from_millis(5));
        cache.record(node(1), 185);
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cache.get(node(1)), DEFAULT_MTU);
    }

    #[test]
    fn invalidate_clears_the_entry() {
        let cache = MtuCache::new();
        cache.record(node(1), 185);
        cache.invalidate(node(1));
        assert_eq!(cache.get(node(1)), DEFAULT_MTU);
    }
}
