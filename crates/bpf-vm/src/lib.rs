// bpf-vm/src/lib.rs

//! Sandboxed contract execution
//!
//! This crate provides:
//! - A resource-bounded register VM for native contract bytecode
//! - An EVM compatibility interpreter for Solidity output
//! - Solidity ABI encoding and ABI documents
//! - Contract storage with layered, all-or-nothing changesets
//! - The executor tying deployment, calls and gas estimation together

pub mod abi;
pub mod asm;
pub mod error;
pub mod evm;
pub mod executor;
pub mod gas;
pub mod isa;
pub mod memory;
pub mod state;
pub mod vm;

pub use abi::{AbiType, AbiValue, ContractAbi, Function, Param};
pub use error::{BpfError, ExecutionFault, MemoryFault, SecurityViolation};
pub use evm::EvmInterpreter;
pub use executor::{DeployRequest, Executor, ExecutorConfig, PreparedCall, PreparedDeployment};
pub use gas::{GasMeter, GasSchedule};
pub use state::{
    derive_contract_address, Changeset, Contract, ContractPersistence, ContractStore, StorageAccess,
    StorageLock, StorageMap, StorageOverlay,
};
pub use vm::{BlockContext, BpfVm, ExecutionContext, ExecutionLimits, ExecutionResult};

pub use blockchain_core::ContractType;

use blockchain_core::Gas;
use blockchain_crypto::Address;

/// Result type for contract operations
pub type ContractResult<T> = Result<T, ContractError>;

/// Failures of contract operations
///
/// Everything except `Execution` is raised before bytecode runs and
/// consumes no gas.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid bytecode: {0}")]
    InvalidBytecode(String),

    #[error("Bytecode too large: {size} bytes (limit {limit})")]
    BytecodeTooLarge { size: usize, limit: usize },

    #[error("ABI error: {0}")]
    AbiError(String),

    #[error("Contract not found: {0}")]
    ContractNotFound(Address),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid gas limit {0}: must be between 1 and {}", blockchain_core::MAX_GAS_LIMIT)]
    InvalidGasLimit(Gas),

    #[error("Deployment failed: {0}")]
    DeploymentFailed(String),

    #[error("Execution failed: {0}")]
    Execution(#[from] BpfError),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),
}

impl ContractError {
    /// Stable name reported to RPC clients; VM faults report their own kind
    pub fn kind(&self) -> &'static str {
        match self {
            ContractError::ValidationError(_) => "ValidationError",
            ContractError::InvalidBytecode(_) => "InvalidBytecode",
            ContractError::BytecodeTooLarge { .. } => "BytecodeTooLarge",
            ContractError::AbiError(_) => "AbiError",
            ContractError::ContractNotFound(_) => "ContractNotFound",
            ContractError::FunctionNotFound(_) => "FunctionNotFound",
            ContractError::InvalidArguments(_) => "InvalidArguments",
            ContractError::InvalidGasLimit(_) => "InvalidGasLimit",
            ContractError::DeploymentFailed(_) => "DeploymentFailed",
            ContractError::Execution(e) => e.kind(),
            ContractError::StateError(_) => "StateError",
            ContractError::PersistenceError(_) => "PersistenceError",
        }
    }

    /// Whether the failure came from executing bytecode rather than from
    /// checks made before it ran
    pub fn is_execution(&self) -> bool {
        matches!(self, ContractError::Execution(_))
    }
}
