//! Configuration surface (§6). One sub-config per component family,
//! aggregated into a single `Config` the way the host application wires up
//! the engine.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub crypto: CryptoConfig,
    pub fragment: FragmentConfig,
    pub codec: CodecConfig,
    pub seen_store: SeenStoreConfig,
    pub spam: SpamConfig,
    pub queue: QueueConfig,
    pub relay: RelayConfig,
    pub sync: SyncConfig,
    pub handshake_wait: HandshakeWaitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crypto: CryptoConfig::default(),
            fragment: FragmentConfig::default(),
            codec: CodecConfig::default(),
            seen_store: SeenStoreConfig::default(),
            spam: SpamConfig::default(),
            queue: QueueConfig::default(),
            relay: RelayConfig::default(),
            sync: SyncConfig::default(),
            handshake_wait: HandshakeWaitConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CryptoConfig {
    pub rekey_msg_limit: u64,
    pub rekey_time_limit: Duration,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            rekey_msg_limit: 10_000,
            rekey_time_limit: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FragmentConfig {
    pub reassembly_timeout: Duration,
    pub max_pending_per_sender: usize,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            reassembly_timeout: Duration::from_secs(30),
            max_pending_per_sender: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CodecConfig {
    pub enable_compression: bool,
    pub compress_threshold: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            enable_compression: true,
            compress_threshold: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeenStoreConfig {
    pub max_entries_per_kind: usize,
    pub cache_ttl: Duration,
}

impl Default for SeenStoreConfig {
    fn default() -> Self {
        Self {
            max_entries_per_kind: 10_000,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpamConfig {
    pub max_message_size: usize,
    pub rate_per_sec: u32,
    pub duplicate_window: Duration,
    pub trust_score_threshold: f32,
    pub byte_rate_cap_per_sec: u64,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            max_message_size: 10 * 1024,
            rate_per_sec: 10,
            duplicate_window: Duration::from_secs(60),
            trust_score_threshold: 0.2,
            byte_rate_cap_per_sec: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_size: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub max_tombstones: usize,
    pub tombstone_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            max_tombstones: 50_000,
            tombstone_ttl: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RelayProbabilityBand {
    pub max_network_size: u32,
    pub probability: f64,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub priority_ttl_map: PriorityTtlMap,
    pub probability_table: Vec<RelayProbabilityBand>,
}

#[derive(Debug, Clone, Copy)]
pub struct PriorityTtlMap {
    pub low: u8,
    pub normal: u8,
    pub high: u8,
    pub urgent: u8,
}

impl Default for PriorityTtlMap {
    fn default() -> Self {
        Self { low: 3, normal: 4, high: 5, urgent: 5 }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            priority_ttl_map: PriorityTtlMap::default(),
            probability_table: vec![
                RelayProbabilityBand { max_network_size: 10, probability: 1.00 },
                RelayProbabilityBand { max_network_size: 30, probability: 0.85 },
                RelayProbabilityBand { max_network_size: 50, probability: 0.70 },
                RelayProbabilityBand { max_network_size: 100, probability: 0.55 },
                RelayProbabilityBand { max_network_size: u32::MAX, probability: 0.40 },
            ],
        }
    }
}

impl RelayConfig {
    /// Step function from §4.9: first band whose upper bound covers `network_size`.
    pub fn relay_probability(&self, network_size: u32) -> f64 {
        self.probability_table
            .iter()
            .find(|band| network_size <= band.max_network_size)
            .map(|band| band.probability)
            .unwrap_or(0.40)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub min_interval: Duration,
    pub in_flight_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            in_flight_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandshakeWaitConfig {
    pub backoff_schedule: Vec<Duration>,
    pub max_attempts: u32,
}

impl Default for HandshakeWaitConfig {
    fn default() -> Self {
        Self {
            backoff_schedule: vec![
                Duration::from_millis(50),
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ],
            max_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_probability_matches_step_table() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.relay_probability(5), 1.00);
        assert_eq!(cfg.relay_probability(10), 1.00);
        assert_eq!(cfg.relay_probability(11), 0.85);
        assert_eq!(cfg.relay_probability(30), 0.85);
        assert_eq!(cfg.relay_probability(50), 0.70);
        assert_eq!(cfg.relay_probability(100), 0.55);
        assert_eq!(cfg.relay_probability(101), 0.40);
        assert_eq!(cfg.relay_probability(10_000), 0.40);
    }

    #[test]
    fn handshake_wait_budget_is_about_three_seconds() {
        let cfg = HandshakeWaitConfig::default();
        let total: Duration = cfg.backoff_schedule.iter().sum();
        assert_eq!(total, Duration::from_millis(1550));
        assert_eq!(cfg.max_attempts, 5);
    }
}
