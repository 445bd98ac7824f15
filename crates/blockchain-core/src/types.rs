// blockchain-core/src/types.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Block number/height
pub type BlockNumber = u64;

/// Deployer nonce
pub type Nonce = u64;

/// Gas limit/used
pub type Gas = u64;

/// Timestamp in Unix epoch seconds
pub type Timestamp = u64;

/// Upper bound on the gas limit a single contract transaction may request
pub const MAX_GAS_LIMIT: Gas = 1_000_000;

/// Gas limit used when a request does not name one
pub const DEFAULT_GAS_LIMIT: Gas = 100_000;

/// Which interpreter runs a contract's bytecode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContractType {
    /// Native register-machine bytecode
    #[default]
    Native,
    /// EVM bytecode interpreted by the compatibility layer
    Evm,
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractType::Native => write!(f, "native"),
            ContractType::Evm => write!(f, "evm"),
        }
    }
}

impl FromStr for ContractType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" | "bpf" => Ok(ContractType::Native),
            "evm" | "solidity" => Ok(ContractType::Evm),
            other => Err(format!("unknown contract type '{}'", other)),
        }
    }
}

/// Gas limit accepted for execution: `0 < gas_limit <= MAX_GAS_LIMIT`
pub fn gas_limit_in_bounds(gas_limit: Gas) -> bool {
    gas_limit > 0 && gas_limit <= MAX_GAS_LIMIT
}
