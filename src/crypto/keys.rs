//! Long-lived identity keys: an X25519 static keypair for Noise handshakes
//! and an Ed25519 keypair for signing out-of-band claims (contact requests,
//! ephemeral address rotation). Real scalar-multiplication derivation, not
//! a hash-based placeholder.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Error, Result};

pub struct NoiseKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl NoiseKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }
}

pub struct SigningKeyPair {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let verifying = signing.verifying_key();
        Self { signing, verifying }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.verifying.to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    pub fn verify(public: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<()> {
        let verifying = VerifyingKey::from_bytes(public)
            .map_err(|e| Error::InvalidChunk(e.to_string()))?;
        let signature = Signature::from_bytes(signature);
        verifying
            .verify(message, &signature)
            .map_err(|_| Error::AuthFailed)
    }
}

/// Bundles the two keypairs an engine instance needs to participate in the mesh.
pub struct Identity {
    pub noise: NoiseKeyPair,
    pub signing: SigningKeyPair,
}

impl Identity {
    pub fn generate() -> Self {
        Self { noise: NoiseKeyPair::generate(), signing: SigningKeyPair::generate() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_keypair_derives_a_real_x25519_public_key() {
        let pair = NoiseKeyPair::generate();
        let rederived = PublicKey::from(&StaticSecret::from(pair.secret_bytes()));
        assert_eq!(pair.public_bytes(), rederived.to_bytes());
    }

    #[test]
    fn signatures_verify() {
        let pair = SigningKeyPair::generate();
        let sig = pair.sign(b"hello mesh");
        assert!(SigningKeyPair::verify(&pair.public_bytes(), b"hello mesh", &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails_verification() {
        let pair = SigningKeyPair::generate();
        let sig = pair.sign(b"hello mesh");
        assert!(SigningKeyPair::verify(&pair.public_bytes(), b"goodbye mesh", &sig).is_err());
    }
}
