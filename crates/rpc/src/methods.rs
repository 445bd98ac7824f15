// rpc/src/methods.rs
use crate::types::*;
use crate::{RpcError, RpcResult};
use blockchain_core::{
    BlockNumber, ContractTransaction, ContractTransactionKind, ExecutionStatus, Gas, TransactionReceipt,
    DEFAULT_GAS_LIMIT,
};
use blockchain_crypto::{Address, Hash};
use bpf_vm::{
    BlockContext, ContractAbi, ContractType, DeployRequest, ExecutionResult, Executor, PreparedCall,
    PreparedDeployment,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use storage::Database;

#[derive(Debug, Clone)]
pub struct MethodsConfig {
    /// Used when a request names no gas limit
    pub default_gas_limit: Gas,
    pub client_version: String,
}

impl Default for MethodsConfig {
    fn default() -> Self {
        Self {
            default_gas_limit: DEFAULT_GAS_LIMIT,
            client_version: format!("bpf-node/v{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Native REST handlers and Web3 JSON-RPC methods over one executor
///
/// Every state-changing transaction is executed immediately in its own
/// block; its receipt is stored under the transaction hash.
#[derive(Clone)]
pub struct RpcMethods {
    executor: Arc<Executor>,
    database: Arc<Database>,
    config: Arc<MethodsConfig>,
    latest_block: Arc<Mutex<BlockNumber>>,
}

impl RpcMethods {
    pub fn new(executor: Arc<Executor>, database: Arc<Database>, config: MethodsConfig) -> RpcResult<Self> {
        let latest = database.get_latest_block_number()?.unwrap_or(0);
        Ok(Self {
            executor,
            database,
            config: Arc::new(config),
            latest_block: Arc::new(Mutex::new(latest)),
        })
    }

    pub async fn handle(&self, method: &str, params: Value) -> RpcResult<Value> {
        match method {
            "eth_sendTransaction" => self.eth_send_transaction(params).await,
            "eth_call" => self.eth_call(params).await,
            "eth_getTransactionReceipt" => self.eth_get_transaction_receipt(params).await,
            "eth_estimateGas" => self.eth_estimate_gas(params).await,
            "eth_chainId" => Ok(json!(to_quantity(self.executor.config().chain_id))),
            "eth_blockNumber" => Ok(json!(to_quantity(self.executor.block_context().number))),
            "net_version" => Ok(json!(self.executor.config().chain_id.to_string())),
            "web3_clientVersion" => Ok(json!(self.config.client_version)),
            _ => Err(RpcError::MethodNotFound(method.to_string())),
        }
    }

    // ==================== NATIVE REST ====================

    pub async fn deploy_contract(&self, request: DeployContractRequest) -> RpcResult<DeployContractResponse> {
        let bytecode = parse_hex_data(&request.bytecode)?;
        let mut contract_type = match request.contract_type.as_deref() {
            Some(name) => name.parse::<ContractType>().map_err(RpcError::InvalidParams)?,
            None => ContractType::Native,
        };
        if contract_type == ContractType::Native && ContractAbi::is_solidity_format(&request.abi) {
            contract_type = ContractType::Evm;
        }
        let deployer = optional_address(request.deployer.as_deref())?;
        let gas_limit = request.gas_limit.unwrap_or(self.config.default_gas_limit);

        let kind = ContractTransactionKind::Deploy {
            bytecode,
            abi: request.abi.to_string(),
            constructor_args: request.args,
            contract_type,
        };
        let (tx_hash, result) = self.submit(deployer, kind, gas_limit).await?;

        Ok(DeployContractResponse {
            success: result.success,
            tx_hash: tx_hash.to_hex(),
            contract_address: result.contract_address.map(|a| a.to_hex()),
            contract_type,
            gas_used: result.gas_used,
            error: error_info(&result),
        })
    }

    pub async fn call_contract(&self, request: CallContractRequest) -> RpcResult<CallContractResponse> {
        let contract = parse_address(&request.contract_address)?;
        let caller = optional_address(request.caller.as_deref())?;
        let gas_limit = request.gas_limit.unwrap_or(self.config.default_gas_limit);

        let kind = ContractTransactionKind::Call {
            contract,
            function_name: request.function_name,
            args: request.args,
        };
        let (tx_hash, result) = self.submit(caller, kind, gas_limit).await?;

        Ok(CallContractResponse {
            success: result.success,
            tx_hash: tx_hash.to_hex(),
            return_value: result.return_value.clone(),
            return_data: to_hex_data(&result.return_data),
            gas_used: result.gas_used,
            error: error_info(&result),
        })
    }

    pub async fn get_contract(&self, address: &str) -> RpcResult<ContractInfo> {
        let address = parse_address(address)?;
        let contract = self
            .executor
            .get_contract(&address)?
            .ok_or(bpf_vm::ContractError::ContractNotFound(address))?;
        let storage = self.executor.contract_storage(&address)?;
        Ok(ContractInfo::new(&contract, &storage))
    }

    pub async fn get_contracts(&self) -> RpcResult<Vec<ContractInfo>> {
        self.executor
            .all_contracts()?
            .iter()
            .map(|contract| -> RpcResult<ContractInfo> {
                let storage = self.executor.contract_storage(&contract.address)?;
                Ok(ContractInfo::new(contract, &storage))
            })
            .collect()
    }

    pub async fn estimate_gas(&self, request: EstimateGasRequest) -> RpcResult<Gas> {
        let contract = parse_address(&request.contract_address)?;
        let caller = optional_address(request.caller.as_deref())?;
        self.blocking(move |this| {
            Ok(this
                .executor
                .estimate_gas(&contract, &request.function_name, &request.args, caller)?)
        })
        .await
    }

    // ==================== WEB3 ====================

    async fn eth_send_transaction(&self, params: Value) -> RpcResult<Value> {
        let tx = first_transaction(params)?;
        let from = optional_address(tx.from.as_deref())?;
        let gas_limit = match &tx.gas {
            Some(gas) => parse_quantity(gas)?,
            None => self.config.default_gas_limit,
        };
        let data = parse_hex_data(tx.payload().unwrap_or("0x"))?;

        let kind = match recipient(&tx)? {
            None => ContractTransactionKind::Deploy {
                bytecode: data,
                abi: tx.abi.clone().unwrap_or_else(|| json!([])).to_string(),
                constructor_args: Vec::new(),
                contract_type: ContractType::Evm,
            },
            Some(contract) => ContractTransactionKind::RawCall { contract, data },
        };

        let (tx_hash, _) = self.submit(from, kind, gas_limit).await?;
        Ok(json!(tx_hash.to_hex()))
    }

    async fn eth_call(&self, params: Value) -> RpcResult<Value> {
        let tx = first_transaction(params)?;
        let contract = recipient(&tx)?.ok_or_else(|| RpcError::InvalidParams("eth_call needs a 'to' address".into()))?;
        let caller = optional_address(tx.from.as_deref())?;
        let gas_limit = match &tx.gas {
            Some(gas) => parse_quantity(gas)?,
            None => self.config.default_gas_limit,
        };
        let data = parse_hex_data(tx.payload().unwrap_or("0x"))?;

        let result = self
            .blocking(move |this| Ok(this.executor.read_only_call_raw(&contract, &data, caller, gas_limit)?))
            .await?;
        match result.error {
            None => Ok(json!(to_hex_data(&result.return_data))),
            Some(err) => Err(RpcError::ExecutionFailed {
                kind: err.kind(),
                message: err.to_string(),
                data: result.return_data,
            }),
        }
    }

    async fn eth_estimate_gas(&self, params: Value) -> RpcResult<Value> {
        let tx = first_transaction(params)?;
        let from = optional_address(tx.from.as_deref())?;
        let data = parse_hex_data(tx.payload().unwrap_or("0x"))?;
        let to = recipient(&tx)?;
        let abi = match &tx.abi {
            Some(abi) => ContractAbi::from_json(abi)?,
            None => ContractAbi::default(),
        };

        let gas = self
            .blocking(move |this| {
                let gas = match to {
                    None => this.executor.estimate_deploy_gas(&DeployRequest::evm(data, abi), from)?,
                    Some(contract) => this.executor.estimate_gas_raw(&contract, &data, from)?,
                };
                Ok(gas)
            })
            .await?;
        Ok(json!(to_quantity(gas)))
    }

    async fn eth_get_transaction_receipt(&self, params: Value) -> RpcResult<Value> {
        let params = params_array(params)?;
        let hash = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::InvalidParams("Expected transaction hash".into()))?;
        let hash = Hash::from_hex(hash).map_err(|_| RpcError::InvalidParams("Invalid hash".into()))?;

        match self.database.get_receipt(&hash)? {
            Some(receipt) => Ok(web3_receipt(&receipt)),
            None => Ok(Value::Null),
        }
    }

    // ==================== EXECUTION ====================

    /// Run a transaction on the blocking pool and record its receipt
    async fn submit(
        &self,
        from: Address,
        kind: ContractTransactionKind,
        gas_limit: Gas,
    ) -> RpcResult<(Hash, ExecutionResult)> {
        self.blocking(move |this| this.execute_transaction(from, kind, gas_limit))
            .await
    }

    fn execute_transaction(
        &self,
        from: Address,
        kind: ContractTransactionKind,
        gas_limit: Gas,
    ) -> RpcResult<(Hash, ExecutionResult)> {
        let mut tx = ContractTransaction {
            from,
            nonce: 0,
            kind,
            gas_limit,
        };
        tx.validate_basic()
            .map_err(|e| RpcError::InvalidParams(e.to_string()))?;

        // Anything that rejects the transaction must fail before its block opens
        let pending = match &tx.kind {
            ContractTransactionKind::Deploy {
                bytecode,
                abi,
                constructor_args,
                contract_type,
            } => {
                let request = DeployRequest {
                    bytecode: bytecode.clone(),
                    abi: ContractAbi::from_json_str(abi)?,
                    constructor_args: constructor_args.clone(),
                    contract_type: *contract_type,
                };
                PendingTransaction::Deploy(self.executor.prepare_deploy(request, from, gas_limit)?)
            }
            ContractTransactionKind::Call {
                contract,
                function_name,
                args,
            } => PendingTransaction::Call(self.executor.prepare_call(contract, function_name, args, from, gas_limit)?),
            ContractTransactionKind::RawCall { contract, data } => {
                PendingTransaction::Call(self.executor.prepare_call_raw(contract, data, from, gas_limit)?)
            }
        };

        tx.nonce = match &pending {
            PendingTransaction::Deploy(deployment) => deployment.nonce(),
            PendingTransaction::Call(_) => self.executor.reserve_nonce(&from)?,
        };
        let tx_hash = tx.hash().map_err(|e| RpcError::InternalError(e.to_string()))?;

        let block = self.next_block()?;
        let result = match pending {
            PendingTransaction::Deploy(deployment) => self.executor.execute_deploy(deployment, block)?,
            PendingTransaction::Call(call) => self.executor.execute_call(call, block)?,
        };

        let receipt = TransactionReceipt {
            tx_hash,
            block_number: block.number,
            from,
            to: tx.recipient(),
            contract_address: result.contract_address,
            gas_used: result.gas_used,
            status: if result.success {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Reverted
            },
            error: result.error_message(),
            return_data: result.return_data.clone(),
        };
        self.database.store_receipt(&receipt)?;

        tracing::debug!(
            "Transaction {} (nonce {}) in block {}: {:?}, gas used {}",
            tx_hash,
            tx.nonce,
            block.number,
            receipt.status,
            receipt.gas_used
        );

        Ok((tx_hash, result))
    }

    /// Open the block the next transaction executes in
    fn next_block(&self) -> RpcResult<BlockContext> {
        let mut latest = self
            .latest_block
            .lock()
            .map_err(|_| RpcError::InternalError("block counter poisoned".into()))?;
        let number = *latest + 1;
        self.database.update_latest_block_number(number)?;
        *latest = number;
        Ok(self.executor.update_block_context(number, unix_timestamp()))
    }

    async fn blocking<T, F>(&self, f: F) -> RpcResult<T>
    where
        F: FnOnce(RpcMethods) -> RpcResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(this))
            .await
            .map_err(|e| RpcError::InternalError(e.to_string()))?
    }
}

/// A validated transaction waiting for its block
enum PendingTransaction {
    Deploy(PreparedDeployment),
    Call(PreparedCall),
}

fn error_info(result: &ExecutionResult) -> Option<ErrorInfo> {
    result.error.as_ref().map(|e| ErrorInfo {
        kind: e.kind().to_string(),
        message: e.to_string(),
    })
}

fn params_array(params: Value) -> RpcResult<Vec<Value>> {
    match params {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        _ => Err(RpcError::InvalidParams("Expected array".into())),
    }
}

fn first_transaction(params: Value) -> RpcResult<Web3Transaction> {
    let params = params_array(params)?;
    let tx = params
        .into_iter()
        .next()
        .ok_or_else(|| RpcError::InvalidParams("Expected transaction object".into()))?;
    serde_json::from_value(tx).map_err(|e| RpcError::InvalidParams(format!("Invalid transaction object: {}", e)))
}

/// `to` of a Web3 transaction; absent or empty means deployment
fn recipient(tx: &Web3Transaction) -> RpcResult<Option<Address>> {
    match tx.to.as_deref().filter(|to| !to.is_empty()) {
        Some(to) => parse_address(to).map(Some),
        None => Ok(None),
    }
}

fn parse_address(s: &str) -> RpcResult<Address> {
    Address::from_hex(s).map_err(|_| RpcError::InvalidParams(format!("Invalid address '{}'", s)))
}

/// Missing addresses default to zero
fn optional_address(s: Option<&str>) -> RpcResult<Address> {
    match s {
        Some(s) => parse_address(s),
        None => Ok(Address::zero()),
    }
}

fn parse_hex_data(s: &str) -> RpcResult<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| RpcError::InvalidParams(format!("Invalid hex data: {}", e)))
}

/// JSON number, `0x` hex quantity or decimal string
fn parse_quantity(value: &Value) -> RpcResult<u64> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        _ => None,
    };
    parsed.ok_or_else(|| RpcError::InvalidParams(format!("Invalid quantity {}", value)))
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpf_vm::asm::{self, Reg};
    use bpf_vm::isa::JMP_JEQ;
    use bpf_vm::vm::helper;
    use bpf_vm::{abi, derive_contract_address, ExecutorConfig};
    use storage::DatabaseConfig;
    use tempfile::TempDir;

    fn create_methods() -> (RpcMethods, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let database = Database::open(DatabaseConfig {
            path: temp_dir.path().to_str().unwrap().to_string(),
            ..Default::default()
        })
        .unwrap();
        let database = Arc::new(database);
        let executor = Executor::new(ExecutorConfig::default()).with_persistence(database.clone());
        let methods = RpcMethods::new(Arc::new(executor), database, MethodsConfig::default()).unwrap();
        (methods, temp_dir)
    }

    fn counter_code() -> String {
        let get = u64::from(u32::from_be_bytes(abi::selector("get()")));
        let mut program = Vec::new();
        program.extend(asm::ld_u64(Reg::R6, get));
        program.push(asm::jmp_reg(JMP_JEQ, Reg::R1, Reg::R6, 7));
        program.extend([
            asm::mov_imm(Reg::R1, 0),
            asm::call_helper(helper::STORAGE_LOAD),
            asm::add_imm(Reg::R0, 1),
            asm::mov_reg(Reg::R2, Reg::R0),
            asm::mov_imm(Reg::R1, 0),
            asm::call_helper(helper::STORAGE_STORE),
            asm::exit(),
        ]);
        program.extend([
            asm::mov_imm(Reg::R1, 0),
            asm::call_helper(helper::STORAGE_LOAD),
            asm::exit(),
        ]);
        hex::encode(asm::assemble(&program))
    }

    fn counter_abi() -> Value {
        json!({
            "functions": {
                "increment": {"inputs": [], "outputs": []},
                "get": {"inputs": [], "outputs": ["uint256"]}
            }
        })
    }

    /// Init code returning a runtime that answers every call with 42
    fn answer_init_code() -> String {
        let runtime = [0x60, 0x2a, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];
        let mut code = vec![0x60, 0x0a, 0x60, 0x0c, 0x60, 0x00, 0x39, 0x60, 0x0a, 0x60, 0x00, 0xf3];
        code.extend(runtime);
        format!("0x{}", hex::encode(code))
    }

    fn answer_abi() -> Value {
        json!([{"type": "function", "name": "answer", "inputs": [],
                "outputs": [{"name": "", "type": "uint256"}], "stateMutability": "view"}])
    }

    async fn deploy_counter(methods: &RpcMethods) -> String {
        let response = methods
            .deploy_contract(DeployContractRequest {
                bytecode: counter_code(),
                abi: counter_abi(),
                args: vec![],
                gas_limit: None,
                contract_type: None,
                deployer: Some(Address::new([1; 20]).to_hex()),
            })
            .await
            .unwrap();
        assert!(response.success, "{:?}", response.error);
        assert_eq!(response.contract_type, ContractType::Native);
        response.contract_address.unwrap()
    }

    #[tokio::test]
    async fn test_native_deploy_call_and_inspect() {
        let (methods, _temp) = create_methods();
        let address = deploy_counter(&methods).await;

        for _ in 0..3 {
            let response = methods
                .call_contract(CallContractRequest {
                    contract_address: address.clone(),
                    function_name: "increment".into(),
                    args: vec![],
                    gas_limit: None,
                    caller: None,
                })
                .await
                .unwrap();
            assert!(response.success);
        }

        let get = methods
            .call_contract(CallContractRequest {
                contract_address: address.clone(),
                function_name: "get".into(),
                args: vec![],
                gas_limit: Some(10_000),
                caller: None,
            })
            .await
            .unwrap();
        assert_eq!(get.return_value, json!(3));

        let info = methods.get_contract(&address).await.unwrap();
        assert_eq!(info.contract_type, ContractType::Native);
        assert_eq!(info.storage.len(), 1);
        assert_eq!(methods.get_contracts().await.unwrap().len(), 1);

        let estimate = methods
            .estimate_gas(EstimateGasRequest {
                contract_address: address,
                function_name: "get".into(),
                args: vec![],
                caller: None,
            })
            .await
            .unwrap();
        assert_eq!(estimate, get.gas_used);
    }

    #[tokio::test]
    async fn test_failed_call_is_reported_as_data() {
        let (methods, _temp) = create_methods();
        let address = deploy_counter(&methods).await;

        let response = methods
            .call_contract(CallContractRequest {
                contract_address: address,
                function_name: "increment".into(),
                args: vec![],
                gas_limit: Some(5),
                caller: None,
            })
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.gas_used, 5);
        assert_eq!(response.error.unwrap().kind, "BPFGasError");

        let tx_hash = response.tx_hash;
        let receipt = methods
            .handle("eth_getTransactionReceipt", json!([tx_hash]))
            .await
            .unwrap();
        assert_eq!(receipt["status"], "0x0");
        assert_eq!(receipt["gasUsed"], "0x5");
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_recorded() {
        let (methods, _temp) = create_methods();

        let missing = methods.get_contract(&Address::new([9; 20]).to_hex()).await.unwrap_err();
        assert_eq!(missing.http_status(), 404);

        let err = methods
            .deploy_contract(DeployContractRequest {
                bytecode: "zz".into(),
                abi: counter_abi(),
                args: vec![],
                gas_limit: None,
                contract_type: None,
                deployer: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32602);

        let err = methods
            .deploy_contract(DeployContractRequest {
                bytecode: counter_code(),
                abi: counter_abi(),
                args: vec![],
                gas_limit: Some(0),
                contract_type: None,
                deployer: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert_eq!(methods.get_contracts().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_rejected_transactions_do_not_open_blocks() {
        let (methods, _temp) = create_methods();
        let address = deploy_counter(&methods).await;
        assert_eq!(methods.handle("eth_blockNumber", json!([])).await.unwrap(), "0x1");

        let call = |contract_address: String, function_name: &str| CallContractRequest {
            contract_address,
            function_name: function_name.into(),
            args: vec![],
            gas_limit: None,
            caller: None,
        };
        let err = methods
            .call_contract(call(Address::new([9; 20]).to_hex(), "get"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 404);
        assert!(methods.call_contract(call(address.clone(), "missing")).await.is_err());

        let err = methods
            .deploy_contract(DeployContractRequest {
                bytecode: counter_code(),
                abi: json!({"functions": {"f": {"inputs": ["notatype"], "outputs": []}}}),
                args: vec![],
                gas_limit: None,
                contract_type: None,
                deployer: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);

        let unknown_selector = json!([{"to": address, "data": "0xdeadbeef"}]);
        assert!(methods.handle("eth_sendTransaction", unknown_selector).await.is_err());

        assert_eq!(methods.handle("eth_blockNumber", json!([])).await.unwrap(), "0x1");
        assert_eq!(methods.database.get_latest_block_number().unwrap(), Some(1));
        assert_eq!(methods.executor.next_nonce(&Address::zero()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transaction_nonces_follow_sender() {
        let (methods, _temp) = create_methods();
        let sender = Address::new([1; 20]);
        let first = deploy_counter(&methods).await;
        assert_eq!(first, derive_contract_address(&sender, 0).to_hex());

        let increment = || CallContractRequest {
            contract_address: first.clone(),
            function_name: "increment".into(),
            args: vec![],
            gas_limit: None,
            caller: Some(sender.to_hex()),
        };
        let a = methods.call_contract(increment()).await.unwrap();
        let b = methods.call_contract(increment()).await.unwrap();
        assert_ne!(a.tx_hash, b.tx_hash);

        // the calls took nonces 1 and 2
        let second = deploy_counter(&methods).await;
        assert_eq!(second, derive_contract_address(&sender, 3).to_hex());
        assert_eq!(methods.executor.next_nonce(&sender).unwrap(), 4);
    }

    #[tokio::test]
    async fn test_solidity_abi_selects_evm() {
        let (methods, _temp) = create_methods();
        let response = methods
            .deploy_contract(DeployContractRequest {
                bytecode: answer_init_code(),
                abi: answer_abi(),
                args: vec![],
                gas_limit: None,
                contract_type: None,
                deployer: None,
            })
            .await
            .unwrap();
        assert!(response.success, "{:?}", response.error);
        assert_eq!(response.contract_type, ContractType::Evm);

        let answer = methods
            .call_contract(CallContractRequest {
                contract_address: response.contract_address.unwrap(),
                function_name: "answer".into(),
                args: vec![],
                gas_limit: None,
                caller: None,
            })
            .await
            .unwrap();
        assert_eq!(answer.return_value, json!(42));
    }

    #[tokio::test]
    async fn test_web3_deploy_receipt_and_call() {
        let (methods, _temp) = create_methods();

        let tx_hash = methods
            .handle(
                "eth_sendTransaction",
                json!([{"from": Address::new([2; 20]).to_hex(), "data": answer_init_code(),
                        "gas": "0x30d40", "abi": answer_abi()}]),
            )
            .await
            .unwrap();

        let receipt = methods
            .handle("eth_getTransactionReceipt", json!([tx_hash]))
            .await
            .unwrap();
        assert_eq!(receipt["status"], "0x1");
        assert_eq!(receipt["logs"], json!([]));
        assert_eq!(receipt["blockNumber"], "0x1");
        let contract = receipt["contractAddress"].as_str().unwrap().to_string();

        let calldata = format!("0x{}", hex::encode(abi::selector("answer()")));
        let output = methods
            .handle("eth_call", json!([{"to": contract, "data": calldata}, "latest"]))
            .await
            .unwrap();
        assert_eq!(output, json!(format!("0x{:064x}", 42)));

        let estimate = methods
            .handle("eth_estimateGas", json!([{"to": contract, "data": calldata}]))
            .await
            .unwrap();
        assert!(estimate.as_str().unwrap().starts_with("0x"));

        assert_eq!(methods.handle("eth_blockNumber", json!([])).await.unwrap(), "0x1");
    }

    #[tokio::test]
    async fn test_web3_static_methods() {
        let (methods, _temp) = create_methods();
        assert_eq!(methods.handle("eth_chainId", Value::Null).await.unwrap(), "0x539");
        assert_eq!(methods.handle("net_version", Value::Null).await.unwrap(), "1337");
        assert!(methods
            .handle("web3_clientVersion", Value::Null)
            .await
            .unwrap()
            .as_str()
            .unwrap()
            .starts_with("bpf-node/"));

        let err = methods.handle("eth_mining", Value::Null).await.unwrap_err();
        assert_eq!(err.code(), -32601);
        let err = methods.handle("eth_call", json!({"to": "0x00"})).await.unwrap_err();
        assert_eq!(err.code(), -32602);
        assert_eq!(
            methods
                .handle("eth_getTransactionReceipt", json!([Hash::zero().to_hex()]))
                .await
                .unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0x186a0")).unwrap(), 100_000);
        assert_eq!(parse_quantity(&json!(21000)).unwrap(), 21000);
        assert_eq!(parse_quantity(&json!("42")).unwrap(), 42);
        assert!(parse_quantity(&json!("0xzz")).is_err());
        assert!(parse_quantity(&json!(true)).is_err());
    }
}
