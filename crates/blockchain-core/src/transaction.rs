// blockchain-core/src/transaction.rs

use crate::{types::*, BlockchainError, BlockchainResult};
use blockchain_crypto::{hash::Hashable, Address, Hash};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Contract operations carried by a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContractTransactionKind {
    /// Deploy new bytecode with its ABI
    Deploy {
        bytecode: Vec<u8>,
        /// ABI document as JSON text
        abi: String,
        constructor_args: Vec<Value>,
        contract_type: ContractType,
    },
    /// Call a named function
    Call {
        contract: Address,
        function_name: String,
        args: Vec<Value>,
    },
    /// Call with selector-prefixed calldata (Web3 clients)
    RawCall {
        contract: Address,
        data: Vec<u8>,
    },
}

/// A contract deployment or call submitted for execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractTransaction {
    /// Sender's address
    pub from: Address,
    /// Sender-chosen sequence number
    pub nonce: Nonce,
    pub kind: ContractTransactionKind,
    /// Maximum gas to consume
    pub gas_limit: Gas,
}

impl ContractTransaction {
    pub fn deploy(
        from: Address,
        nonce: Nonce,
        bytecode: Vec<u8>,
        abi: String,
        constructor_args: Vec<Value>,
        contract_type: ContractType,
        gas_limit: Gas,
    ) -> Self {
        Self {
            from,
            nonce,
            kind: ContractTransactionKind::Deploy {
                bytecode,
                abi,
                constructor_args,
                contract_type,
            },
            gas_limit,
        }
    }

    pub fn call(
        from: Address,
        nonce: Nonce,
        contract: Address,
        function_name: impl Into<String>,
        args: Vec<Value>,
        gas_limit: Gas,
    ) -> Self {
        Self {
            from,
            nonce,
            kind: ContractTransactionKind::Call {
                contract,
                function_name: function_name.into(),
                args,
            },
            gas_limit,
        }
    }

    pub fn raw_call(from: Address, nonce: Nonce, contract: Address, data: Vec<u8>, gas_limit: Gas) -> Self {
        Self {
            from,
            nonce,
            kind: ContractTransactionKind::RawCall { contract, data },
            gas_limit,
        }
    }

    /// Calculate transaction hash (sha256 over the JSON encoding)
    ///
    /// JSON rather than bincode because argument values are untyped JSON.
    pub fn hash(&self) -> BlockchainResult<Hash> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| BlockchainError::SerializationError(e.to_string()))?;
        Ok(bytes.hash())
    }

    /// Validate basic transaction properties
    pub fn validate_basic(&self) -> BlockchainResult<()> {
        if !gas_limit_in_bounds(self.gas_limit) {
            return Err(BlockchainError::InvalidTransaction(format!(
                "Gas limit must be between 1 and {}, got {}",
                MAX_GAS_LIMIT, self.gas_limit
            )));
        }

        match &self.kind {
            ContractTransactionKind::Deploy { bytecode, abi, .. } => {
                if bytecode.is_empty() {
                    return Err(BlockchainError::InvalidTransaction("Contract bytecode cannot be empty".into()));
                }
                if abi.trim().is_empty() {
                    return Err(BlockchainError::InvalidTransaction("Contract ABI cannot be empty".into()));
                }
            }
            ContractTransactionKind::Call { function_name, .. } => {
                if function_name.is_empty() {
                    return Err(BlockchainError::InvalidTransaction("Function name cannot be empty".into()));
                }
            }
            ContractTransactionKind::RawCall { data, .. } => {
                if data.len() < 4 {
                    return Err(BlockchainError::InvalidTransaction("Call data must start with a 4-byte selector".into()));
                }
            }
        }

        Ok(())
    }

    /// Target contract (None for deployments)
    pub fn recipient(&self) -> Option<Address> {
        match &self.kind {
            ContractTransactionKind::Deploy { .. } => None,
            ContractTransactionKind::Call { contract, .. } => Some(*contract),
            ContractTransactionKind::RawCall { contract, .. } => Some(*contract),
        }
    }

    pub fn is_deployment(&self) -> bool {
        matches!(self.kind, ContractTransactionKind::Deploy { .. })
    }
}

/// Execution status recorded in a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    /// Executed but reverted; gas stays charged and no state changed
    Reverted,
}

/// Outcome of an executed contract transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_hash: Hash,
    pub block_number: BlockNumber,
    pub from: Address,
    pub to: Option<Address>,
    pub contract_address: Option<Address>,
    pub gas_used: Gas,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub return_data: Vec<u8>,
}

impl TransactionReceipt {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_call(gas_limit: Gas) -> ContractTransaction {
        ContractTransaction::call(
            Address::zero(),
            0,
            Address::new([1u8; 20]),
            "setValue",
            vec![json!(42)],
            gas_limit,
        )
    }

    #[test]
    fn test_gas_limit_validation() {
        assert!(sample_call(100_000).validate_basic().is_ok());
        assert!(sample_call(0).validate_basic().is_err());
        assert!(sample_call(MAX_GAS_LIMIT + 1).validate_basic().is_err());
    }

    #[test]
    fn test_deploy_requires_bytecode() {
        let tx = ContractTransaction::deploy(
            Address::zero(),
            0,
            vec![],
            r#"{"functions":{}}"#.into(),
            vec![],
            ContractType::Native,
            DEFAULT_GAS_LIMIT,
        );
        assert!(tx.validate_basic().is_err());
        assert!(tx.is_deployment());
        assert_eq!(tx.recipient(), None);
    }

    #[test]
    fn test_raw_call_needs_selector() {
        let tx = ContractTransaction::raw_call(Address::zero(), 0, Address::zero(), vec![1, 2], 1000);
        assert!(tx.validate_basic().is_err());
    }

    #[test]
    fn test_hash_depends_on_nonce() {
        let a = sample_call(1000);
        let mut b = sample_call(1000);
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
        b.nonce = 1;
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }
}
