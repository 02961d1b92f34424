//! Mesh layer: dedup (C6), spam prevention (C7), offline queue (C8),
//! relay engine (C9), topology (C10), and queue sync (C11).

pub mod queue;
pub mod relay;
pub mod seen_store;
pub mod spam;
pub mod sync;
pub mod topology;

pub use queue::{EnqueueOptions, MessageStatus, OfflineQueue, QueuedMessage};
pub use relay::{MeshRelayMessage, RelayEngine, RelayProcessingResult, RelayStatisticsSnapshot, RoutePolicy};
pub use seen_store::SeenStore;
pub use spam::{SpamCheckResult, SpamPrevention};
pub use sync::{ReconciliationPlan, SyncManager};
pub use topology::{RoutingDecision, Topology};

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::protocol::NodeId;
use crate::storage::Store;

/// Aggregates the mesh-layer collaborators a session adapter needs: one
/// instance per local node, shared across all of that node's peer sessions.
pub struct MeshEngine {
    pub seen_store: Arc<SeenStore>,
    pub spam: Arc<SpamPrevention>,
    pub queue: Arc<OfflineQueue>,
    pub topology: Arc<Topology>,
    pub relay: Arc<RelayEngine>,
    pub sync: Arc<SyncManager>,
}

impl MeshEngine {
    pub fn new(local_node: NodeId, config: Config) -> Self {
        Self::build(local_node, config, None)
    }

    /// Like `new`, but wires `store` through to the seen-store and offline
    /// queue so their writes are durable (§4.6, §4.8). Call `restore` once,
    /// in an async context, before the engine starts processing traffic.
    pub fn with_store(local_node: NodeId, config: Config, store: Arc<dyn Store>) -> Self {
        Self::build(local_node, config, Some(store))
    }

    fn build(local_node: NodeId, config: Config, store: Option<Arc<dyn Store>>) -> Self {
        let seen_store = Arc::new(match &store {
            Some(backing) => {
                SeenStore::with_store(config.seen_store.max_entries_per_kind, config.seen_store.cache_ttl, backing.clone())
            }
            None => SeenStore::new(config.seen_store.max_entries_per_kind, config.seen_store.cache_ttl),
        });
        let spam = Arc::new(SpamPrevention::new(config.spam.clone()));
        let queue = Arc::new(match &store {
            Some(backing) => OfflineQueue::with_store(config.queue.clone(), backing.clone()),
            None => OfflineQueue::new(config.queue.clone()),
        });
        let topology = Arc::new(Topology::new(local_node, config.seen_store.cache_ttl));
        let sync = Arc::new(SyncManager::new(config.sync.clone()));

        let topology_for_oracle = topology.clone();
        let relay = Arc::new(RelayEngine::new(
            local_node,
            config.relay.clone(),
            seen_store.clone(),
            spam.clone(),
            queue.clone(),
            Box::new(move || topology_for_oracle.network_size()),
        ));

        Self { seen_store, spam, queue, topology, relay, sync }
    }

    /// Rebuilds the offline queue's live set and tombstones from the
    /// backing store, if one was configured via `with_store`. A no-op
    /// otherwise. Call once at startup before processing any traffic.
    pub async fn restore(&self) -> Result<()> {
        self.queue.restore().await
    }

    /// Periodic upkeep: sweeps expired seen-store entries, stale topology
    /// edges, and tombstones past their ttl. Intended to be called off a
    /// background tick by the host application.
    pub fn maintain(&self) {
        self.seen_store.maintain();
        self.topology.prune_stale();
    }
}
