//! C2 — stateful ChaCha20-Poly1305 AEAD with a monotonic 64-bit nonce
//! counter and a hard rekey policy.

use crate::error::{Error, Result};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, KeyInit, Nonce};
use std::time::Instant;

use super::secure_key::SecureKey;

#[derive(Debug, Clone, Copy)]
pub struct RekeyPolicy {
    pub msg_limit: u64,
    pub time_limit: std::time::Duration,
}

impl Default for RekeyPolicy {
    fn default() -> Self {
        Self {
            msg_limit: 10_000,
            time_limit: std::time::Duration::from_secs(3600),
        }
    }
}

/// One direction's worth of AEAD state. A `NoiseSession` owns a pair
/// (send, receive), each with an independent counter.
pub struct CipherState {
    key: SecureKey,
    counter: u64,
    messages_sent: u64,
    created_at: Instant,
    policy: RekeyPolicy,
}

impl CipherState {
    pub fn new(key: SecureKey, policy: RekeyPolicy) -> Self {
        Self {
            key,
            counter: 0,
            messages_sent: 0,
            created_at: Instant::now(),
            policy,
        }
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn needs_rekey(&self) -> bool {
        self.messages_sent >= self.policy.msg_limit
            || self.created_at.elapsed() >= self.policy.time_limit
    }

    /// 96-bit nonce: 32 zero bits, then the 64-bit counter, big-endian.
    fn nonce_for(counter: u64) -> Nonce {
        let mut bytes = [0u8; 12];
        bytes[4..12].copy_from_slice(&counter.to_be_bytes());
        Nonce::from(bytes)
    }

    pub fn seal(&mut self, associated_data: Option<&[u8]>, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.needs_rekey() {
            return Err(Error::RekeyRequired);
        }
        let key_bytes = self.key.view()?;
        let cipher = ChaCha20Poly1305::new_from_slice(key_bytes)
            .map_err(|e| Error::CipherError(e.to_string()))?;
        let nonce = Self::nonce_for(self.counter);
        let payload = chacha20poly1305::aead::Payload {
            msg: plaintext,
            aad: associated_data.unwrap_or(&[]),
        };
        let ciphertext = cipher
            .encrypt(&nonce, payload)
            .map_err(|_| Error::CipherError("seal failed".into()))?;
        self.counter += 1;
        self.messages_sent += 1;
        Ok(ciphertext)
    }

    pub fn open(&mut self, associated_data: Option<&[u8]>, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let key_bytes = self.key.view()?;
        let cipher = ChaCha20Poly1305::new_from_slice(key_bytes)
            .map_err(|e| Error::CipherError(e.to_string()))?;
        let nonce = Self::nonce_for(self.counter);
        let payload = chacha20poly1305::aead::Payload {
            msg: ciphertext,
            aad: associated_data.unwrap_or(&[]),
        };
        let plaintext = cipher.decrypt(&nonce, payload).map_err(|_| Error::AuthFailed)?;
        self.counter += 1;
        Ok(plaintext)
    }

    pub fn destroy(&mut self) {
        self.key.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_key() -> SecureKey {
        SecureKey::from_owned(vec![0u8; 32])
    }

    #[test]
    fn seal_determinism_and_auth_scenario() {
        // spec §8 scenario 1
        let mut sender = CipherState::new(zero_key(), RekeyPolicy::default());
        let ciphertext = sender.seal(Some(&[4, 5, 6]), &[1, 2, 3]).unwrap();

        let mut receiver_bad_ad = CipherState::new(zero_key(), RekeyPolicy::default());
        assert!(matches!(
            receiver_bad_ad.open(Some(&[7, 8, 9]), &ciphertext),
            Err(Error::AuthFailed)
        ));

        let mut receiver_good_ad = CipherState::new(zero_key(), RekeyPolicy::default());
        let plaintext = receiver_good_ad.open(Some(&[4, 5, 6]), &ciphertext).unwrap();
        assert_eq!(plaintext, vec![1, 2, 3]);
    }

    #[test]
    fn failed_open_does_not_advance_counter() {
        let mut sender = CipherState::new(zero_key(), RekeyPolicy::default());
        let ciphertext = sender.seal(None, b"hello").unwrap();

        let mut receiver = CipherState::new(zero_key(), RekeyPolicy::default());
        let mut tampered = ciphertext.clone();
        tampered[0] ^= 0xff;
        assert!(receiver.open(None, &tampered).is_err());
        assert_eq!(receiver.counter(), 0);

        let plaintext = receiver.open(None, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello");
        assert_eq!(receiver.counter(), 1);
    }

    #[test]
    fn rekey_required_before_seal_past_msg_limit() {
        let policy = RekeyPolicy { msg_limit: 2, ..Default::default() };
        let mut cs = CipherState::new(zero_key(), policy);
        cs.seal(None, b"a").unwrap();
        cs.seal(None, b"b").unwrap();
        assert!(matches!(cs.seal(None, b"c"), Err(Error::RekeyRequired)));
        // counter did not advance on the failed attempt
        assert_eq!(cs.counter(), 2);
    }

    #[test]
    fn open_advances_only_counter_not_messages_sent() {
        // §4.2: the rekey policy's msg_limit tracks sealed (outbound) volume
        // only, so opening ciphertexts must never move messages_sent.
        let policy = RekeyPolicy { msg_limit: 3, ..Default::default() };
        let mut sender = CipherState::new(zero_key(), RekeyPolicy::default());
        let mut receiver = CipherState::new(zero_key(), policy);

        for i in 0..5u8 {
            let ciphertext = sender.seal(None, &[i]).unwrap();
            receiver.open(None, &ciphertext).unwrap();
        }

        assert_eq!(receiver.counter(), 5);
        assert_eq!(receiver.messages_sent, 0);
        assert!(!receiver.needs_rekey());
    }

    #[test]
    fn destroy_makes_further_seals_fail_with_key_destroyed() {
        let mut cs = CipherState::new(zero_key(), RekeyPolicy::default());
        cs.destroy();
        assert!(matches!(cs.seal(None, b"x"), Err(Error::KeyDestroyed)));
    }

    #[test]
    fn concurrent_encrypt_nonces_are_exactly_the_expected_range() {
        // spec §8 scenario 2, single-threaded equivalent: sequential calls on
        // one CipherState must consume nonces {0..N-1} with no gaps or repeats.
        let mut cs = CipherState::new(zero_key(), RekeyPolicy::default());
        let mut seen = std::collections::HashSet::new();
        for i in 0..100u8 {
            let before = cs.counter();
            cs.seal(None, &[i, i, i]).unwrap();
            assert!(seen.insert(before));
        }
        assert_eq!(cs.counter(), 100);
        assert_eq!(seen, (0u64..100).collect());
    }

    #[tokio::test]
    async fn nonce_uniqueness_under_true_concurrency() {
        // spec §8 scenario 2: 100 parallel encrypts on the same session must
        // consume nonces {0..99} with no duplicates.
        let cs = std::sync::Arc::new(parking_lot::Mutex::new(CipherState::new(
            zero_key(),
            RekeyPolicy::default(),
        )));
        let mut handles = Vec::new();
        for i in 0..100u8 {
            let cs = cs.clone();
            handles.push(tokio::spawn(async move {
                let mut guard = cs.lock();
                let nonce = guard.counter();
                let ciphertext = guard.seal(None, &[i, i, i]).unwrap();
                (nonce, ciphertext)
            }));
        }
        let mut nonces = std::collections::HashSet::new();
        let mut ciphertexts = std::collections::HashSet::new();
        for handle in handles {
            let (nonce, ciphertext) = handle.await.unwrap();
            nonces.insert(nonce);
            ciphertexts.insert(ciphertext);
        }
        assert_eq!(nonces, (0u64..100).collect());
        assert_eq!(ciphertexts.len(), 100);
        assert_eq!(cs.lock().counter(), 100);
    }
}
