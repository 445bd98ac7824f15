// rpc/src/lib.rs
pub mod server;
pub mod methods;
pub mod types;

pub use server::{RpcServer, RpcConfig};
pub use methods::{MethodsConfig, RpcMethods};
pub use types::*;

use bpf_vm::ContractError;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Parse error")]
    ParseError,
    #[error("Invalid request")]
    InvalidRequest,
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Server error: {0}")]
    ServerError(String),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),
    /// Bytecode ran and failed; `data` carries any revert payload
    #[error("{message}")]
    ExecutionFailed {
        kind: &'static str,
        message: String,
        data: Vec<u8>,
    },
}

impl RpcError {
    pub fn code(&self) -> i32 {
        match self {
            RpcError::ParseError => -32700,
            RpcError::InvalidRequest => -32600,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InvalidParams(_) => -32602,
            RpcError::InternalError(_) => -32603,
            RpcError::ServerError(_) | RpcError::ExecutionFailed { .. } => -32000,
            RpcError::Contract(e) if e.is_execution() => -32000,
            RpcError::Contract(ContractError::StateError(_) | ContractError::PersistenceError(_)) => -32603,
            RpcError::Contract(_) => -32602,
            RpcError::Storage(_) => -32603,
        }
    }

    /// HTTP status for the REST endpoints
    pub fn http_status(&self) -> u16 {
        match self {
            RpcError::Contract(ContractError::ContractNotFound(_)) => 404,
            RpcError::ParseError | RpcError::InvalidRequest | RpcError::InvalidParams(_) => 400,
            RpcError::MethodNotFound(_) => 404,
            RpcError::Contract(e) if e.is_execution() => 422,
            RpcError::ExecutionFailed { .. } => 422,
            RpcError::Contract(ContractError::StateError(_) | ContractError::PersistenceError(_)) => 500,
            RpcError::Contract(_) => 400,
            RpcError::InternalError(_) | RpcError::ServerError(_) | RpcError::Storage(_) => 500,
        }
    }

    /// Stable error name for JSON bodies
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Contract(e) => e.kind(),
            RpcError::ExecutionFailed { kind, .. } => *kind,
            RpcError::ParseError => "ParseError",
            RpcError::InvalidRequest => "InvalidRequest",
            RpcError::MethodNotFound(_) => "MethodNotFound",
            RpcError::InvalidParams(_) => "InvalidParams",
            RpcError::InternalError(_) => "InternalError",
            RpcError::ServerError(_) => "ServerError",
            RpcError::Storage(_) => "StorageError",
        }
    }

    /// JSON-RPC `error.data`: the revert payload as hex
    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            RpcError::ExecutionFailed { data, .. } => Some(serde_json::Value::String(to_hex_data(data))),
            _ => None,
        }
    }
}

pub type RpcResult<T> = Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;
    use bpf_vm::BpfError;

    #[test]
    fn test_error_codes() {
        assert_eq!(RpcError::ParseError.code(), -32700);
        assert_eq!(RpcError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(
            RpcError::from(ContractError::FunctionNotFound("f".into())).code(),
            -32602
        );
        let gas = ContractError::Execution(BpfError::Gas { required: 2, limit: 1 });
        let err = RpcError::from(gas);
        assert_eq!(err.code(), -32000);
        assert_eq!(err.kind(), "BPFGasError");
        assert_eq!(
            RpcError::from(ContractError::ContractNotFound(blockchain_crypto::Address::zero())).http_status(),
            404
        );
    }
}
