//! External collaborator boundary (§6): the byte-pipe to a peer. Concrete
//! transports (BLE GATT, a test loopback, whatever the host app wires up)
//! implement this; the engine never reaches past it into radio specifics.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::NodeId;

#[async_trait]
pub trait Link: Send + Sync {
    fn peer_id(&self) -> NodeId;

    /// Current negotiated MTU for this link, in bytes.
    fn mtu(&self) -> usize;

    fn is_connected(&self) -> bool;

    async fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Blocks until the next inbound frame arrives, or the link closes.
    async fn recv(&self) -> Result<Vec<u8>>;
}

/// Connection lifecycle notifications, separate from `Link` itself so a
/// host can subscribe without holding a link reference.
pub trait LinkEventHandler: Send + Sync {
    fn on_connected(&self, peer: NodeId);
    fn on_disconnected(&self, peer: NodeId);
}
