//! CSPRNG wrapper (§6 Randomness). Every call site that needs entropy for
//! ephemeral keys or fragmenter message ids goes through here so that no
//! component can quietly substitute a time-seeded source.

use rand::RngCore;
use rand::rngs::OsRng;

pub fn fill_bytes(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

pub fn random_message_id() -> [u8; 16] {
    let mut id = [0u8; 16];
    fill_bytes(&mut id);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_not_all_zero_and_vary() {
        let a = random_message_id();
        let b = random_message_id();
        assert_ne!(a, [0u8; 16]);
        assert_ne!(a, b);
    }
}
