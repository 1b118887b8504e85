//! Pseudo-random payloads for the write phase.

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

/// Generates `size` bytes of incompressible data.
///
/// Every call seeds a fresh generator, so no two workers write the same content.
pub fn random(size: usize) -> Bytes {
    let mut rng = SmallRng::seed_from_u64(rand::random());
    let mut buffer = vec![0; size];
    rng.fill_bytes(&mut buffer);
    Bytes::from(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_requested_size() {
        assert_eq!(random(0).len(), 0);
        assert_eq!(random(4096).len(), 4096);
    }

    #[test]
    fn differs_between_calls() {
        assert_ne!(random(64), random(64));
    }
}
