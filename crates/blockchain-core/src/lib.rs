// blockchain-core/src/lib.rs

//! Shared chain types for the contract runtime
//!
//! This crate provides:
//! - Gas, nonce and block-context aliases
//! - The contract transaction envelope
//! - Transaction receipts

pub mod transaction;
pub mod types;

pub use transaction::{ContractTransaction, ContractTransactionKind, ExecutionStatus, TransactionReceipt};
pub use types::*;

/// Result type for blockchain operations
pub type BlockchainResult<T> = Result<T, BlockchainError>;

/// Errors that can occur in blockchain operations
#[derive(Debug, thiserror::Error)]
pub enum BlockchainError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(#[from] blockchain_crypto::CryptoError),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}
