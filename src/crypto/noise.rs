//! C3 — Noise XX/KK handshake session producing two derived cipher states
//! and (for XX) the peer's static public key.

use snow::{Builder, HandshakeState};
use std::sync::Mutex;

use crate::error::{Error, Result};
use super::cipher::{CipherState, RekeyPolicy};
use super::secure_key::SecureKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoisePattern {
    Xx,
    Kk,
}

impl NoisePattern {
    fn params_str(self) -> &'static str {
        match self {
            NoisePattern::Xx => "Noise_XX_25519_ChaChaPoly_SHA256",
            NoisePattern::Kk => "Noise_KK_25519_ChaChaPoly_SHA256",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseRole {
    Initiator,
    Responder,
}

enum HandshakePhase {
    InProgress(Box<HandshakeState>),
    Established { send: Mutex<CipherState>, receive: Mutex<CipherState> },
    Failed,
    Destroyed,
}

/// Result of feeding one handshake message through the session, matching
/// the public contract in §4.3.
pub struct HandshakeStep {
    pub output: Option<Vec<u8>>,
    pub became_established: bool,
    pub remote_static: Option<Vec<u8>>,
}

pub struct NoiseSession {
    pattern: NoisePattern,
    role: NoiseRole,
    phase: HandshakePhase,
    remote_static: Option<Vec<u8>>,
    peer_id: String,
}

impl NoiseSession {
    pub fn new_initiator(
        pattern: NoisePattern,
        local_static_secret: &[u8],
        remote_static_public: Option<&[u8]>,
        peer_id: impl Into<String>,
    ) -> Result<Self> {
        let mut builder = Builder::new(pattern.params_str().parse()?).local_private_key(local_static_secret);
        if let Some(remote) = remote_static_public {
            builder = builder.remote_public_key(remote);
        }
        let handshake = builder.build_initiator()?;
        Ok(Self {
            pattern,
            role: NoiseRole::Initiator,
            phase: HandshakePhase::InProgress(Box::new(handshake)),
            remote_static: None,
            peer_id: peer_id.into(),
        })
    }

    pub fn new_responder(
        pattern: NoisePattern,
        local_static_secret: &[u8],
        remote_static_public: Option<&[u8]>,
        peer_id: impl Into<String>,
    ) -> Result<Self> {
        let mut builder = Builder::new(pattern.params_str().parse()?).local_private_key(local_static_secret);
        if let Some(remote) = remote_static_public {
            builder = builder.remote_public_key(remote);
        }
        let handshake = builder.build_responder()?;
        Ok(Self {
            pattern,
            role: NoiseRole::Responder,
            phase: HandshakePhase::InProgress(Box::new(handshake)),
            remote_static: None,
            peer_id: peer_id.into(),
        })
    }

    pub fn pattern(&self) -> NoisePattern {
        self.pattern
    }

    pub fn role(&self) -> NoiseRole {
        self.role
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn is_established(&self) -> bool {
        matches!(self.phase, HandshakePhase::Established { .. })
    }

    pub fn remote_static(&self) -> Option<&[u8]> {
        self.remote_static.as_deref()
    }

    /// Feeds one inbound handshake message (empty on the initiator's first
    /// call) and, if the pattern still has an outbound message due, produces
    /// it. Transitions to `established` and splits cipher states the moment
    /// the handshake completes.
    pub fn process_handshake_message(&mut self, incoming: &[u8]) -> Result<HandshakeStep> {
        let handshake = match &mut self.phase {
            HandshakePhase::InProgress(hs) => hs,
            HandshakePhase::Established { .. } => {
                return Err(Error::HandshakeFailed("already established".into()))
            }
            HandshakePhase::Failed => return Err(Error::HandshakeFailed("session failed".into())),
            HandshakePhase::Destroyed => return Err(Error::KeyDestroyed),
        };

        if !incoming.is_empty() {
            let mut buf = vec![0u8; incoming.len() + 64];
            let n = handshake.read_message(incoming, &mut buf).map_err(|e| {
                self.phase = HandshakePhase::Failed;
                Error::HandshakeFailed(e.to_string())
            })?;
            buf.truncate(n);
        }

        let remote_static = handshake.get_remote_static().map(|s| s.to_vec());

        let mut output = None;
        if !handshake.is_handshake_finished() {
            let mut buf = vec![0u8; 4096];
            let n = handshake.write_message(&[], &mut buf).map_err(|e| {
                self.phase = HandshakePhase::Failed;
                Error::HandshakeFailed(e.to_string())
            })?;
            buf.truncate(n);
            output = Some(buf);
        }

        let became_established = match &self.phase {
            HandshakePhase::InProgress(hs) => hs.is_handshake_finished(),
            _ => false,
        };

        if became_established {
            let (mut a, mut b) = match &mut self.phase {
                HandshakePhase::InProgress(hs) => hs.dangerously_get_raw_split(),
                _ => unreachable!(),
            };
            let (send_key, receive_key) = match self.role {
                NoiseRole::Initiator => (a.to_vec(), b.to_vec()),
                NoiseRole::Responder => (b.to_vec(), a.to_vec()),
            };
            {
                use zeroize::Zeroize;
                a.zeroize();
                b.zeroize();
            }
            self.phase = HandshakePhase::Established {
                send: Mutex::new(CipherState::new(SecureKey::from_owned(send_key), RekeyPolicy::default())),
                receive: Mutex::new(CipherState::new(SecureKey::from_owned(receive_key), RekeyPolicy::default())),
            };
            self.remote_static = remote_static.clone();
        }

        Ok(HandshakeStep { output, became_established, remote_static })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match &self.phase {
            HandshakePhase::Established { send, .. } => send.lock().unwrap().seal(None, plaintext),
            _ => Err(Error::SessionNotEstablished),
        }
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match &self.phase {
            HandshakePhase::Established { receive, .. } => receive.lock().unwrap().open(None, ciphertext),
            _ => Err(Error::SessionNotEstablished),
        }
    }

    pub fn needs_rekey(&self) -> bool {
        match &self.phase {
            HandshakePhase::Established { send, receive } => {
                send.lock().unwrap().needs_rekey() || receive.lock().unwrap().needs_rekey()
            }
            _ => false,
        }
    }

    pub fn destroy(&mut self) {
        if let HandshakePhase::Established { send, receive } = &self.phase {
            send.lock().unwrap().destroy();
            receive.lock().unwrap().destroy();
        }
        self.phase = HandshakePhase::Destroyed;
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self.phase, HandshakePhase::Destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::NoiseKeyPair;

    fn run_xx_handshake() -> (NoiseSession, NoiseSession) {
        let initiator_keys = NoiseKeyPair::generate();
        let responder_keys = NoiseKeyPair::generate();

        let mut initiator = NoiseSession::new_initiator(
            NoisePattern::Xx,
            &initiator_keys.secret_bytes(),
            None,
            "responder",
        )
        .unwrap();
        let mut responder = NoiseSession::new_responder(
            NoisePattern::Xx,
            &responder_keys.secret_bytes(),
            None,
            "initiator",
        )
        .unwrap();

        // -> e
        let step1 = initiator.process_handshake_message(&[]).unwrap();
        let msg1 = step1.output.unwrap();
        // <- e, ee, s, es
        let step2 = responder.process_handshake_message(&msg1).unwrap();
        let msg2 = step2.output.unwrap();
        // -> s, se
        let step3 = initiator.process_handshake_message(&msg2).unwrap();
        let msg3 = step3.output.unwrap();
        let step4 = responder.process_handshake_message(&msg3).unwrap();

        assert!(step3.became_established);
        assert!(step4.became_established);
        assert!(step3.remote_static.is_some());
        assert!(step4.remote_static.is_some());

        (initiator, responder)
    }

    #[test]
    fn xx_handshake_establishes_both_sides_with_remote_static() {
        let (initiator, responder) = run_xx_handshake();
        assert!(initiator.is_established());
        assert!(responder.is_established());
        assert!(initiator.remote_static().is_some());
        assert!(responder.remote_static().is_some());
    }

    #[test]
    fn established_session_round_trips_plaintext() {
        let (initiator, responder) = run_xx_handshake();
        let ciphertext = initiator.encrypt(b"hello mesh").unwrap();
        let plaintext = responder.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, b"hello mesh");
    }

    #[test]
    fn encrypt_before_established_fails() {
        let keys = NoiseKeyPair::generate();
        let session =
            NoiseSession::new_initiator(NoisePattern::Xx, &keys.secret_bytes(), None, "peer").unwrap();
        assert!(matches!(session.encrypt(b"x"), Err(Error::SessionNotEstablished)));
    }

    #[test]
    fn destroy_is_idempotent_and_blocks_further_use() {
        let (mut initiator, _responder) = run_xx_handshake();
        initiator.destroy();
        initiator.destroy();
        assert!(initiator.is_destroyed());
        assert!(matches!(initiator.encrypt(b"x"), Err(Error::SessionNotEstablished)));
    }
}
