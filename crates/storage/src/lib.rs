// storage/src/lib.rs

//! Persistent Storage Layer
//!
//! This crate provides persistent storage using RocksDB:
//! - Deployed contracts and their storage words
//! - Deployer nonces
//! - Transaction receipts
//!
//! `Database` implements `ContractPersistence`, so an executor writes
//! through it before applying any state in memory.

pub mod db;

pub use db::{ColumnFamily, Database, DatabaseConfig, DatabaseStats};

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),
}
