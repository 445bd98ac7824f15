// blockchain-crypto/src/lib.rs

//! Cryptographic primitives for the contract runtime
//!
//! This crate provides:
//! - Hashing functions (SHA256, Keccak-256)
//! - 20-byte addresses and their derivation

pub mod address;
pub mod hash;

pub use address::Address;
pub use hash::{keccak256, Hash, HashAlgorithm, Hashable};

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid hash")]
    InvalidHash,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
