// rpc/src/types.rs
use blockchain_core::{ExecutionStatus, Gas, TransactionReceipt};
use bpf_vm::{Contract, ContractAbi, ContractType, StorageMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorResponse>,
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorResponse {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ==================== REST BODIES ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployContractRequest {
    /// Hex bytecode, `0x` optional
    pub bytecode: String,
    pub abi: Value,
    #[serde(default)]
    pub args: Vec<Value>,
    pub gas_limit: Option<Gas>,
    /// "native" (or "bpf") and "evm"; Solidity-style ABIs imply "evm"
    pub contract_type: Option<String>,
    pub deployer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallContractRequest {
    pub contract_address: String,
    pub function_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    pub gas_limit: Option<Gas>,
    pub caller: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateGasRequest {
    pub contract_address: String,
    pub function_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    pub caller: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployContractResponse {
    pub success: bool,
    pub tx_hash: String,
    pub contract_address: Option<String>,
    pub contract_type: ContractType,
    pub gas_used: Gas,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallContractResponse {
    pub success: bool,
    pub tx_hash: String,
    pub return_value: Value,
    pub return_data: String,
    pub gas_used: Gas,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Contract as shown by `/get_contract`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractInfo {
    pub address: String,
    pub abi: ContractAbi,
    pub contract_type: ContractType,
    pub creator: String,
    pub code_hash: String,
    pub deployed_at: u64,
    pub bytecode: String,
    /// slot -> word, both hex
    pub storage: BTreeMap<String, String>,
}

impl ContractInfo {
    pub fn new(contract: &Contract, storage: &StorageMap) -> Self {
        Self {
            address: contract.address.to_hex(),
            abi: contract.abi.clone(),
            contract_type: contract.contract_type,
            creator: contract.creator.to_hex(),
            code_hash: contract.code_hash.to_hex(),
            deployed_at: contract.deployed_at,
            bytecode: to_hex_data(&contract.bytecode),
            storage: storage
                .iter()
                .map(|(slot, word)| (to_hex_data(slot), to_hex_data(word)))
                .collect(),
        }
    }
}

// ==================== WEB3 ====================

/// Transaction object of `eth_sendTransaction`, `eth_call` and `eth_estimateGas`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Web3Transaction {
    pub from: Option<String>,
    pub to: Option<String>,
    pub data: Option<String>,
    /// Alias of `data` used by some clients
    pub input: Option<String>,
    pub gas: Option<Value>,
    /// ABI of a deployment (non-standard); without one the contract
    /// exposes no callable functions
    pub abi: Option<Value>,
}

impl Web3Transaction {
    pub fn payload(&self) -> Option<&str> {
        self.data.as_deref().or(self.input.as_deref())
    }
}

/// Web3 view of a stored receipt
pub fn web3_receipt(receipt: &TransactionReceipt) -> Value {
    let status = match receipt.status {
        ExecutionStatus::Success => "0x1",
        ExecutionStatus::Reverted => "0x0",
    };
    let mut value = serde_json::json!({
        "transactionHash": receipt.tx_hash.to_hex(),
        "transactionIndex": "0x0",
        "blockNumber": to_quantity(receipt.block_number),
        "from": receipt.from.to_hex(),
        "to": receipt.to.map(|a| a.to_hex()),
        "contractAddress": receipt.contract_address.map(|a| a.to_hex()),
        "gasUsed": to_quantity(receipt.gas_used),
        "cumulativeGasUsed": to_quantity(receipt.gas_used),
        "status": status,
        "logs": [],
        "logsBloom": format!("0x{}", "0".repeat(512)),
    });
    if let Some(error) = &receipt.error {
        value["revertReason"] = Value::String(error.clone());
    }
    value
}

pub fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

pub fn to_hex_data(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
