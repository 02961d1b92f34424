//! C5 — tagged envelope with optional deflate compression and a
//! backward-compatible legacy-JSON decode path.

use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::CodecConfig;
use crate::error::{Error, Result};
use crate::protocol::{MessageId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMetadata {
    pub ttl: u8,
    pub hop_count: u8,
    pub routing_path: Vec<NodeId>,
    pub message_hash: [u8; 32],
    pub priority: Priority,
    pub relay_timestamp: u64,
    pub original_sender: NodeId,
    pub final_recipient: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeenKind {
    Delivered,
    Read,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ProtocolEnvelope {
    Ping,
    Identity {
        public_key: NodeId,
        display_name: String,
    },
    ContactRequest,
    TextMessage {
        id: MessageId,
        content: Vec<u8>,
        recipient: NodeId,
        encrypted_flag: bool,
    },
    MeshRelay {
        original_id: MessageId,
        sender: NodeId,
        recipient: NodeId,
        metadata: RelayMetadata,
        inner_payload: Vec<u8>,
        use_ephemeral_addressing: bool,
    },
    QueueSync {
        hash: Vec<u8>,
        message_ids: Vec<MessageId>,
        timestamp: u64,
        node_id: NodeId,
        sync_kind: QueueSyncKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueSyncKind {
    Request,
    Response,
}

const COMPRESSED_FLAG: u8 = 0x01;

#[derive(Debug, Default)]
pub struct CompressionStats {
    pub messages_encoded: AtomicU64,
    pub bytes_before: AtomicU64,
    pub bytes_after: AtomicU64,
    pub compressed_count: AtomicU64,
}

impl CompressionStats {
    fn record(&self, before: usize, after: usize, compressed: bool) {
        self.messages_encoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_before.fetch_add(before as u64, Ordering::Relaxed);
        self.bytes_after.fetch_add(after as u64, Ordering::Relaxed);
        if compressed {
            self.compressed_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub struct Codec {
    pub enable_compression: bool,
    pub compress_threshold: usize,
    pub stats: CompressionStats,
}

impl Codec {
    pub fn new(enable_compression: bool, compress_threshold: usize) -> Self {
        Self { enable_compression, compress_threshold, stats: CompressionStats::default() }
    }

    pub fn from_config(config: &CodecConfig) -> Self {
        Self::new(config.enable_compression, config.compress_threshold)
    }

    pub fn encode(&self, envelope: &ProtocolEnvelope) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(envelope).map_err(|e| Error::DecodeError(e.to_string()))?;

        if self.enable_compression && body.len() >= self.compress_threshold {
            if let Ok(compressed) = deflate(&body) {
                if compressed.len() < body.len() && body.len() <= u16::MAX as usize {
                    let mut out = Vec::with_capacity(3 + compressed.len());
                    out.push(COMPRESSED_FLAG);
                    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
                    out.extend_from_slice(&compressed);
                    self.stats.record(body.len(), out.len(), true);
                    return Ok(out);
                }
            }
        }

        let mut out = Vec::with_capacity(1 + body.len());
        out.push(0x00);
        out.extend_from_slice(&body);
        self.stats.record(body.len(), out.len(), false);
        Ok(out)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<ProtocolEnvelope> {
        match Self::decode_flagged(bytes) {
            Ok(envelope) => Ok(envelope),
            Err(_) => {
                // Legacy backward-compatible path: the whole input is raw JSON.
                serde_json::from_slice(bytes).map_err(|e| Error::DecodeError(e.to_string()))
            }
        }
    }

    fn decode_flagged(bytes: &[u8]) -> Result<ProtocolEnvelope> {
        let (flags, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::DecodeError("empty input".into()))?;

        if flags & COMPRESSED_FLAG != 0 {
            if rest.len() < 2 {
                return Err(Error::DecodeError("truncated compressed header".into()));
            }
            let original_size = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            let compressed = &rest[2..];
            let body = inflate(compressed, original_size)?;
            serde_json::from_slice(&body).map_err(|e| Error::DecodeError(e.to_string()))
        } else {
            serde_json::from_slice(rest).map_err(|e| Error::DecodeError(e.to_string()))
        }
    }
}

fn deflate(body: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(body, Compression::default());
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|e| Error::CompressionError(e.to_string()))?;
    Ok(out)
}

fn inflate(compressed: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(compressed);
    let mut out = Vec::with_capacity(expected_size);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::CompressionError(e.to_string()))?;
    Ok(out)
}
