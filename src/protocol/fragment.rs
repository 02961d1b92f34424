//! C4 — fragmenter / reassembler. Splits arbitrary-length payloads into
//! ordered chunks bounded by the link MTU and rebuilds them with timeouts
//! and per-sender eviction caps.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use lru::LruCache;
use std::collections::HashMap;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::protocol::{MessageId, NodeId};

/// Bytes of fixed header overhead excluding the variable-length message id:
/// 1 (id length prefix) + 2 (index) + 2 (total) + 1 (is_binary flag).
const FIXED_HEADER_OVERHEAD: usize = 1 + 2 + 2 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChunk {
    pub message_id: MessageId,
    pub index: u16,
    pub total: u16,
    pub payload: Vec<u8>,
    pub is_binary: bool,
    pub created_at: Instant,
}

impl MessageChunk {
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FIXED_HEADER_OVERHEAD + self.message_id.len() + self.payload.len());
        out.write_u8(self.message_id.len() as u8).unwrap();
        out.extend_from_slice(&self.message_id);
        out.write_u16::<BigEndian>(self.index).unwrap();
        out.write_u16::<BigEndian>(self.total).unwrap();
        out.write_u8(self.is_binary as u8).unwrap();
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let id_len = cursor
            .read_u8()
            .map_err(|e| Error::InvalidChunk(e.to_string()))? as usize;
        let mut message_id = vec![0u8; id_len];
        std::io::Read::read_exact(&mut cursor, &mut message_id)
            .map_err(|e| Error::InvalidChunk(e.to_string()))?;
        let index = cursor.read_u16::<BigEndian>().map_err(|e| Error::InvalidChunk(e.to_string()))?;
        let total = cursor.read_u16::<BigEndian>().map_err(|e| Error::InvalidChunk(e.to_string()))?;
        let is_binary = cursor.read_u8().map_err(|e| Error::InvalidChunk(e.to_string()))? != 0;
        if index >= total || total == 0 {
            return Err(Error::InvalidChunk(format!("index {index} out of range for total {total}")));
        }
        let start = cursor.position() as usize;
        let payload = bytes[start..].to_vec();
        Ok(Self { message_id, index, total, payload, is_binary, created_at: Instant::now() })
    }
}

pub struct Fragmenter;

impl Fragmenter {
    /// Splits `payload` into chunks no larger than `chunk_capacity(mtu, message_id.len())`.
    pub fn fragment(
        payload: &[u8],
        mtu: usize,
        message_id: MessageId,
        is_binary: bool,
    ) -> Result<Vec<MessageChunk>> {
        let overhead = FIXED_HEADER_OVERHEAD + message_id.len();
        if overhead >= mtu {
            return Err(Error::MtuTooSmall { mtu, overhead });
        }
        let capacity = mtu - overhead;

        if payload.is_empty() {
            return Ok(vec![MessageChunk {
                message_id,
                index: 0,
                total: 1,
                payload: Vec::new(),
                is_binary,
                created_at: Instant::now(),
            }]);
        }

        let total = payload.len().div_ceil(capacity) as u16;
        let mut chunks = Vec::with_capacity(total as usize);
        for (index, slice) in payload.chunks(capacity).enumerate() {
            chunks.push(MessageChunk {
                message_id: message_id.clone(),
                index: index as u16,
                total,
                payload: slice.to_vec(),
                is_binary,
                created_at: Instant::now(),
            });
        }
        Ok(chunks)
    }
}

struct PendingMessage {
    chunks: HashMap<u16, MessageChunk>,
    total: u16,
    first_seen: Instant,
}

/// Reassembles chunks keyed by `(sender_id, message_id)`, bounded per sender
/// by an LRU cache so a single noisy peer cannot exhaust memory.
pub struct Reassembler {
    per_sender: HashMap<NodeId, LruCache<MessageId, PendingMessage>>,
    max_pending_per_sender: usize,
    reassembly_timeout: Duration,
}

impl Reassembler {
    pub fn new(max_pending_per_sender: usize, reassembly_timeout: Duration) -> Self {
        Self {
            per_sender: HashMap::new(),
            max_pending_per_sender: max_pending_per_sender.max(1),
            reassembly_timeout,
        }
    }

    /// Feeds one chunk in. Returns `Some(payload)` once all chunks for the
    /// message have arrived; ignores exact duplicates; evicts the
    /// least-recently-inserted pending message per sender once the cap is hit.
    pub fn accept(&mut self, sender: NodeId, chunk: MessageChunk) -> Result<Option<Vec<u8>>> {
        self.expire_stale(&sender);

        let cap = NonZeroUsize::new(self.max_pending_per_sender).unwrap();
        let cache = self
            .per_sender
            .entry(sender)
            .or_insert_with(|| LruCache::new(cap));

        if !cache.contains(&chunk.message_id) {
            if cache.len() >= self.max_pending_per_sender {
                if let Some((evicted_id, _)) = cache.pop_lru() {
                    tracing::warn!(?sender, message_id = ?evicted_id, "evicting pending reassembly under pressure");
                }
            }
            cache.put(
                chunk.message_id.clone(),
                PendingMessage { chunks: HashMap::new(), total: chunk.total, first_seen: Instant::now() },
            );
        }

        let pending = cache.get_mut(&chunk.message_id).expect("just inserted or present");
        pending.chunks.entry(chunk.index).or_insert(chunk.clone());

        if pending.chunks.len() as u16 == pending.total {
            let total = pending.total;
            let mut ordered = Vec::with_capacity(total as usize);
            for i in 0..total {
                let c = pending.chunks.get(&i).expect("complete set checked above");
                ordered.push(c.payload.clone());
            }
            cache.pop(&chunk.message_id);
            return Ok(Some(ordered.concat()));
        }

        Ok(None)
    }

    fn expire_stale(&mut self, sender: &NodeId) {
        if let Some(cache) = self.per_sender.get_mut(sender) {
            let timeout = self.reassembly_timeout;
            let stale: Vec<MessageId> = cache
                .iter()
                .filter(|(_, pending)| pending.first_seen.elapsed() >= timeout)
                .map(|(id, _)| id.clone())
                .collect();
            for id in stale {
                cache.pop(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(byte: u8) -> NodeId {
        [byte; 32]
    }

    #[test]
    fn fragment_round_trip_at_minimum_mtu() {
        // spec §8 scenario 3
        let payload: Vec<u8> = (0..250u32).map(|i| (i % 256) as u8).collect();
        let chunks = Fragmenter::fragment(&payload, 50, vec![1; 8], false).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.to_wire().len() <= 50);
        }

        let mut reassembler = Reassembler::new(100, Duration::from_secs(30));
        let mut shuffled = chunks.clone();
        // deterministic "random" permutation: reverse plus a rotation
        shuffled.reverse();
        shuffled.rotate_left(1);

        let mut result = None;
        for c in shuffled {
            if let Some(payload) = reassembler.accept(sender(1), c).unwrap() {
                result = Some(payload);
            }
        }
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn duplicate_chunk_is_ignored() {
        let payload = vec![9u8; 10];
        let chunks = Fragmenter::fragment(&payload, 50, vec![2; 8], false).unwrap();
        let mut reassembler = Reassembler::new(100, Duration::from_secs(30));
        assert!(reassembler.accept(sender(2), chunks[0].clone()).unwrap().is_none());
        // duplicate of the same chunk changes nothing
        assert!(reassembler.accept(sender(2), chunks[0].clone()).unwrap().is_none());
        let result = reassembler.accept(sender(2), chunks[0].clone()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn interleaved_senders_each_get_their_own_payload() {
        // spec §8 scenario 4
        let payload_a: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        let payload_b: Vec<u8> = (0..250u32).map(|i| (255 - i) as u8).collect();
        let chunks_a = Fragmenter::fragment(&payload_a, 50, vec![0xAA; 8], false).unwrap();
        let chunks_b = Fragmenter::fragment(&payload_b, 50, vec![0xBB; 8], false).unwrap();

        let mut reassembler = Reassembler::new(100, Duration::from_secs(30));
        let mut delivered = Vec::new();
        let max_len = chunks_a.len().max(chunks_b.len());
        for i in 0..max_len {
            if let Some(c) = chunks_a.get(i) {
                if let Some(p) = reassembler.accept(sender(0xAA), c.clone()).unwrap() {
                    delivered.push((0xAAu8, p));
                }
            }
            if let Some(c) = chunks_b.get(i) {
                if let Some(p) = reassembler.accept(sender(0xBB), c.clone()).unwrap() {
                    delivered.push((0xBBu8, p));
                }
            }
        }

        assert_eq!(delivered.len(), 2);
        let a = delivered.iter().find(|(tag, _)| *tag == 0xAA).unwrap();
        let b = delivered.iter().find(|(tag, _)| *tag == 0xBB).unwrap();
        assert_eq!(a.1, payload_a);
        assert_eq!(b.1, payload_b);
    }

    #[test]
    fn mtu_too_small_for_header_is_rejected() {
        let err = Fragmenter::fragment(&[1, 2, 3], 4, vec![0; 8], false).unwrap_err();
        assert!(matches!(err, Error::MtuTooSmall { .. }));
    }

    #[test]
    fn single_chunk_when_payload_fits() {
        let chunks = Fragmenter::fragment(&[1, 2, 3], 100, vec![1; 8], false).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].total, 1);
    }

    #[test]
    fn wire_round_trip_preserves_fields() {
        let chunk = MessageChunk {
            message_id: vec![1, 2, 3, 4, 5, 6, 7, 8],
            index: 2,
            total: 5,
            payload: vec![9, 9, 9],
            is_binary: true,
            created_at: Instant::now(),
        };
        let wire = chunk.to_wire();
        let decoded = MessageChunk::from_wire(&wire).unwrap();
        assert_eq!(decoded.message_id, chunk.message_id);
        assert_eq!(decoded.index, chunk.index);
        assert_eq!(decoded.total, chunk.total);
        assert_eq!(decoded.payload, chunk.payload);
        assert_eq!(decoded.is_binary, chunk.is_binary);
    }

    proptest::proptest! {
        #[test]
        fn fragment_then_reassemble_in_order_recovers_payload(
            payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..2000),
            mtu in 40usize..300,
        ) {
            let chunks = Fragmenter::fragment(&payload, mtu, vec![7; 8], false).unwrap();
            let mut reassembler = Reassembler::new(50, Duration::from_secs(30));
            let mut result = None;
            for chunk in chunks {
                if let Some(p) = reassembler.accept(sender(3), chunk).unwrap() {
                    result = Some(p);
                }
            }
            proptest::prop_assert_eq!(result.unwrap(), payload);
        }
    }
}
