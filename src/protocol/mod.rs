//! Wire-level types shared across the engine: node identifiers, the
//! fragmenter/reassembler (C4), and the tagged envelope codec (C5).

pub mod envelope;
pub mod fragment;

pub use envelope::{Codec, CompressionStats, ProtocolEnvelope};
pub use fragment::{Fragmenter, MessageChunk, Reassembler};

/// Stable per-node identifier. 32 bytes to match the Noise static public
/// key length, so a node's identity key doubles as its routing address.
pub type NodeId = [u8; 32];

/// Opaque message identifier (§3): at least 8 bytes, generated with ≥ 64
/// bits of entropy plus a source-tagged timestamp when the caller omits one.
pub type MessageId = Vec<u8>;

pub fn generate_message_id(source: &NodeId) -> MessageId {
    let mut id = Vec::with_capacity(16 + 8);
    id.extend_from_slice(&crate::crypto::random::random_message_id());
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    id.extend_from_slice(&millis.to_be_bytes());
    id.extend_from_slice(&source[..4]);
    id
}

pub fn node_id_to_hex(id: &NodeId) -> String {
    hex::encode(id)
}

pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_message_ids_are_at_least_eight_bytes_and_unique() {
        let source = [7u8; 32];
        let a = generate_message_id(&source);
        let b = generate_message_id(&source);
        assert!(a.len() >= 8);
        assert_ne!(a, b);
    }
}
