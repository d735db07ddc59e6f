//! Cryptographic utilities
//!
//! SHA-256 hashing and difficulty target encoding.

pub mod hash;

pub use hash::{
    calculate_target, difficulty_from_target, double_sha256, leading_zero_bits, sha256, Hash,
    HASH_LENGTH,
};
