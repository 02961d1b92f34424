//! C1 — secure key material. All other components reference keys only
//! through `SecureKey`, so a leaked reference to raw bytes is structurally
//! impossible once destroyed.

use crate::error::{Error, Result};
use zeroize::Zeroize;

/// Fixed-length key buffer that zeroes itself on drop and on explicit
/// `destroy()`, and refuses further access afterward.
pub struct SecureKey {
    bytes: Vec<u8>,
    destroyed: bool,
}

impl SecureKey {
    /// Copies `source` into internal storage, then zeroes `source` in place.
    pub fn new(source: &mut [u8]) -> Self {
        let bytes = source.to_vec();
        source.zeroize();
        Self { bytes, destroyed: false }
    }

    /// Wraps bytes already owned by the caller (no separate buffer to scrub).
    pub fn from_owned(bytes: Vec<u8>) -> Self {
        Self { bytes, destroyed: false }
    }

    pub fn view(&self) -> Result<&[u8]> {
        if self.destroyed {
            return Err(Error::KeyDestroyed);
        }
        Ok(&self.bytes)
    }

    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.bytes.zeroize();
            self.destroyed = true;
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() % 2 != 0 {
            return Err(Error::InvalidChunk("odd-length hex key".into()));
        }
        let mut bytes = hex::decode(s).map_err(|e| Error::InvalidChunk(e.to_string()))?;
        let key = Self::new(&mut bytes);
        Ok(key)
    }

    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(self.view()?))
    }
}

impl Drop for SecureKey {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureKey")
            .field("destroyed", &self.destroyed)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_zeroes_the_source_buffer() {
        let mut src = vec![1u8, 2, 3, 4];
        let key = SecureKey::new(&mut src);
        assert_eq!(src, vec![0, 0, 0, 0]);
        assert_eq!(key.view().unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn view_fails_after_destroy() {
        let mut src = vec![9u8; 4];
        let mut key = SecureKey::new(&mut src);
        key.destroy();
        assert!(matches!(key.view(), Err(Error::KeyDestroyed)));
        // idempotent
        key.destroy();
        assert!(matches!(key.view(), Err(Error::KeyDestroyed)));
    }

    #[test]
    fn hex_round_trip() {
        let key = SecureKey::from_hex("deadbeef").unwrap();
        assert_eq!(key.to_hex().unwrap(), "deadbeef");
    }

    #[test]
    fn from_hex_rejects_odd_length() {
        assert!(SecureKey::from_hex("abc").is_err());
    }

    #[test]
    fn to_hex_fails_after_destroy() {
        let mut key = SecureKey::from_hex("abcd").unwrap();
        key.destroy();
        assert!(key.to_hex().is_err());
    }
}
