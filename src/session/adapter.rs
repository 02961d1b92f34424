//! C12 — per-peer session/link adapter. Orchestrates the Noise handshake,
//! fragmentation, and envelope codec into a single send/receive pipeline
//! for one peer, per §4.12.

use tokio::time::sleep;

use crate::config::{FragmentConfig, HandshakeWaitConfig};
use crate::crypto::{NoisePattern, NoiseSession};
use crate::error::{Error, Result};
use crate::protocol::envelope::{Codec, ProtocolEnvelope};
use crate::protocol::fragment::{Fragmenter, MessageChunk, Reassembler};
use crate::protocol::{generate_message_id, NodeId};
use crate::session::state::SessionState;

/// Bounded exponential-backoff wait for a peer's static key to become
/// available (e.g. via a contact exchange landing in the store between
/// our handshake attempts). Exhausting the schedule is a hard failure,
/// never a silent fallback to an unauthenticated session.
pub async fn wait_for_remote_static(
    config: &HandshakeWaitConfig,
    mut fetch: impl FnMut() -> Option<Vec<u8>>,
) -> Result<Vec<u8>> {
    if let Some(key) = fetch() {
        return Ok(key);
    }
    for delay in &config.backoff_schedule {
        sleep(*delay).await;
        if let Some(key) = fetch() {
            return Ok(key);
        }
    }
    Err(Error::PeerKeyUnavailable)
}

/// Per-peer orchestration of handshake, fragmentation, and the envelope
/// codec. One instance lives for the duration of a peer's connection.
pub struct SessionAdapter {
    peer_id: NodeId,
    local_node: NodeId,
    state: SessionState,
    noise: NoiseSession,
    reassembler: Reassembler,
    codec: Codec,
    mtu: usize,
    // Open question #9.2: a relay arriving while we're still waiting on the
    // handshake is queued (bounded), never dropped.
    pending_inbound: std::collections::VecDeque<Vec<u8>>,
    max_pending_inbound: usize,
    queued_during_handshake: u64,
}

impl SessionAdapter {
    pub fn new_initiator(
        local_node: NodeId,
        peer_id: NodeId,
        pattern: NoisePattern,
        local_static_secret: &[u8],
        remote_static_public: Option<&[u8]>,
        fragment_config: &FragmentConfig,
        codec: Codec,
        mtu: usize,
    ) -> Result<Self> {
        let noise = NoiseSession::new_initiator(
            pattern,
            local_static_secret,
            remote_static_public,
            crate::protocol::node_id_to_hex(&peer_id),
        )?;
        Ok(Self {
            peer_id,
            local_node,
            state: SessionState::Initializing,
            noise,
            reassembler: Reassembler::new(fragment_config.max_pending_per_sender, fragment_config.reassembly_timeout),
            codec,
            mtu,
            pending_inbound: std::collections::VecDeque::new(),
            max_pending_inbound: fragment_config.max_pending_per_sender,
            queued_during_handshake: 0,
        })
    }

    pub fn new_responder(
        local_node: NodeId,
        peer_id: NodeId,
        pattern: NoisePattern,
        local_static_secret: &[u8],
        remote_static_public: Option<&[u8]>,
        fragment_config: &FragmentConfig,
        codec: Codec,
        mtu: usize,
    ) -> Result<Self> {
        let noise = NoiseSession::new_responder(
            pattern,
            local_static_secret,
            remote_static_public,
            crate::protocol::node_id_to_hex(&peer_id),
        )?;
        Ok(Self {
            peer_id,
            local_node,
            state: SessionState::Initializing,
            noise,
            reassembler: Reassembler::new(fragment_config.max_pending_per_sender, fragment_config.reassembly_timeout),
            codec,
            mtu,
            pending_inbound: std::collections::VecDeque::new(),
            max_pending_inbound: fragment_config.max_pending_per_sender,
            queued_during_handshake: 0,
        })
    }

    pub fn peer_id(&self) -> NodeId {
        self.peer_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Drives the handshake forward with one inbound message (empty for the
    /// initiator's first call). Returns the outbound message to send, if any.
    pub fn drive_handshake(&mut self, incoming: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.state.is_terminal() {
            return Err(Error::SessionNotEstablished);
        }
        self.state = SessionState::Handshaking;
        let step = self.noise.process_handshake_message(incoming)?;
        if step.became_established {
            self.state = SessionState::Active;
        }
        Ok(step.output)
    }

    pub fn needs_rekey(&self) -> bool {
        self.noise.needs_rekey()
    }

    pub fn begin_rekey(&mut self) {
        if self.state == SessionState::Active {
            self.state = SessionState::Rekeying;
        }
    }

    pub fn suspend(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Suspended;
        }
    }

    pub fn resume(&mut self) {
        if self.state == SessionState::Suspended {
            self.state = SessionState::Active;
        }
    }

    /// Outbound pipeline: encode -> encrypt -> fragment. Returns the wire
    /// bytes for each chunk, ready to hand to the link.
    pub fn send_envelope(&self, envelope: &ProtocolEnvelope) -> Result<Vec<Vec<u8>>> {
        if !self.state.can_send() {
            return Err(Error::SessionNotEstablished);
        }
        let plaintext = self.codec.encode(envelope)?;
        let ciphertext = self.noise.encrypt(&plaintext)?;
        let message_id = generate_message_id(&self.local_node);
        let chunks = Fragmenter::fragment(&ciphertext, self.mtu, message_id, true)?;
        Ok(chunks.iter().map(MessageChunk::to_wire).collect())
    }

    /// Inbound pipeline: reassemble -> decrypt -> decode. Returns `None`
    /// until the final chunk of a message arrives.
    ///
    /// A frame arriving while the handshake is still in flight is queued
    /// (bounded, oldest dropped first) rather than rejected — once the
    /// handshake completes, [`Self::drain_pending_inbound`] replays it.
    pub fn receive_chunk(&mut self, wire: &[u8]) -> Result<Option<ProtocolEnvelope>> {
        if self.state.is_handshaking() {
            if self.pending_inbound.len() >= self.max_pending_inbound {
                self.pending_inbound.pop_front();
            }
            self.pending_inbound.push_back(wire.to_vec());
            self.queued_during_handshake += 1;
            return Ok(None);
        }
        if !self.state.can_receive() {
            return Err(Error::SessionNotEstablished);
        }
        let chunk = MessageChunk::from_wire(wire)?;
        let Some(ciphertext) = self.reassembler.accept(self.peer_id, chunk)? else {
            return Ok(None);
        };
        let plaintext = self.noise.decrypt(&ciphertext)?;
        let envelope = self.codec.decode(&plaintext)?;
        Ok(Some(envelope))
    }

    pub fn destroy(&mut self) {
        self.noise.destroy();
        self.state = SessionState::Terminated;
    }

    pub fn queued_during_handshake(&self) -> u64 {
        self.queued_during_handshake
    }

    /// Replays frames that arrived mid-handshake, now that the session is
    /// active. No-op if the session isn't active yet or nothing queued.
    pub fn drain_pending_inbound(&mut self) -> Result<Vec<ProtocolEnvelope>> {
        if !self.is_active() {
            return Ok(Vec::new());
        }
        let queued: Vec<Vec<u8>> = self.pending_inbound.drain(..).collect();
        let mut envelopes = Vec::new();
        for wire in queued {
            if let Some(envelope) = self.receive_chunk(&wire)? {
                envelopes.push(envelope);
            }
        }
        Ok(envelopes)
    }
}
