//! Cryptographic hashing utilities
//!
//! SHA-256 based hashing used for transaction hashes and block hashes,
//! plus the leading-zero-bits difficulty target encoding.

use sha2::{Digest, Sha256};

/// A 32-byte hash (transaction hash, block hash)
pub type Hash = [u8; 32];

/// Length of a hash in bytes
pub const HASH_LENGTH: usize = 32;

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes double SHA-256 hash (SHA-256 of SHA-256)
pub fn double_sha256(data: &[u8]) -> Hash {
    sha256(&sha256(data))
}

/// Count the leading zero bits of a big-endian byte string
pub fn leading_zero_bits(bytes: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in bytes {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

/// Calculate target hash from difficulty
pub fn calculate_target(difficulty: u32) -> Hash {
    let mut target = [0xFF; HASH_LENGTH];
    let full_bytes = (difficulty as usize / 8).min(HASH_LENGTH);
    let remaining_bits = difficulty as usize % 8;

    for byte in target.iter_mut().take(full_bytes) {
        *byte = 0;
    }

    if remaining_bits > 0 && full_bytes < HASH_LENGTH {
        target[full_bytes] = 0xFF >> remaining_bits;
    }

    target
}

/// Recover the difficulty from an encoded target.
///
/// Returns `None` if the bytes are not a canonical target produced by
/// [`calculate_target`].
pub fn difficulty_from_target(target: &[u8]) -> Option<u32> {
    let difficulty = leading_zero_bits(target);
    if calculate_target(difficulty)[..] == *target {
        Some(difficulty)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let hash = sha256(b"hello world");
        assert_eq!(
            hex::encode(hash),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_double_sha256() {
        let data = b"hello world";
        assert_eq!(double_sha256(data), sha256(&sha256(data)));
    }

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(leading_zero_bits(&[0x00, 0x00, 0x0F, 0xFF]), 20);
        assert_eq!(leading_zero_bits(&[0x80]), 0);
        assert_eq!(leading_zero_bits(&[0x00; 4]), 32);
    }

    #[test]
    fn test_target_roundtrip() {
        for difficulty in [0, 1, 7, 8, 16, 23, 255] {
            let target = calculate_target(difficulty);
            assert_eq!(difficulty_from_target(&target), Some(difficulty));
        }

        let mut bogus = calculate_target(12);
        bogus[31] = 0x00;
        assert_eq!(difficulty_from_target(&bogus), None);
    }
}
