use blockchain_crypto::Address;
use bpf_vm::{
    abi, state::slot_key, BpfError, ContractAbi, ContractType, DeployRequest, ExecutionFault, Executor,
    ExecutorConfig,
};
use serde_json::json;

fn deployer() -> Address {
    Address::new([0x22; 20])
}

/// Runtime of `contract Store { uint256 v; function set(uint256); function get() returns (uint256) }`
fn store_runtime() -> Vec<u8> {
    let set = abi::selector("set(uint256)");
    let get = abi::selector("get()");

    let mut code = vec![
        0x60, 0x00, 0x35, 0x60, 0xe0, 0x1c, // selector = calldata[0..4]
        0x80, 0x63,
    ];
    code.extend(set);
    code.extend([0x14, 0x60, 0x1f, 0x57, 0x80, 0x63]);
    code.extend(get);
    code.extend([0x14, 0x60, 0x27, 0x57]);
    code.extend([0x60, 0x00, 0x60, 0x00, 0xfd]); // unknown selector: revert
    // 0x1f: set
    code.extend([0x5b, 0x60, 0x04, 0x35, 0x60, 0x00, 0x55, 0x00]);
    // 0x27: get
    code.extend([0x5b, 0x60, 0x00, 0x54, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3]);
    assert_eq!(code.len(), 51);
    code
}

/// Init code: store the trailing constructor argument in slot 0, return the runtime
fn store_init_code() -> Vec<u8> {
    let mut code = vec![
        0x60, 0x20, 0x60, 0x20, 0x38, 0x03, 0x60, 0x00, 0x39, // CODECOPY(0, codesize - 32, 32)
        0x60, 0x00, 0x51, 0x60, 0x00, 0x55, // SSTORE(0, MLOAD(0))
        0x60, 0x33, 0x60, 0x1b, 0x60, 0x00, 0x39, // CODECOPY(0, 27, 51)
        0x60, 0x33, 0x60, 0x00, 0xf3, // RETURN(0, 51)
    ];
    code.extend(store_runtime());
    code
}

fn store_abi() -> ContractAbi {
    ContractAbi::from_json(&json!([
        {"type": "constructor", "inputs": [{"name": "initial", "type": "uint256"}]},
        {"type": "function", "name": "set", "inputs": [{"name": "v", "type": "uint256"}], "outputs": [], "stateMutability": "nonpayable"},
        {"type": "function", "name": "get", "inputs": [], "outputs": [{"name": "", "type": "uint256"}], "stateMutability": "view"},
        {"type": "function", "name": "missing", "inputs": [], "outputs": []},
        {"type": "event", "name": "Changed", "inputs": [{"name": "v", "type": "uint256", "indexed": false}]}
    ]))
    .unwrap()
}

fn deploy_store(executor: &Executor, initial: u64) -> Address {
    let request = DeployRequest::evm(store_init_code(), store_abi()).with_args(vec![json!(initial)]);
    let result = executor.deploy(request, deployer(), 200_000).unwrap();
    assert!(result.success, "{:?}", result.error);
    result.contract_address.unwrap()
}

#[test]
fn test_constructor_returns_runtime_code() {
    let executor = Executor::new(ExecutorConfig::default());
    let address = deploy_store(&executor, 5);

    let contract = executor.get_contract(&address).unwrap().unwrap();
    assert_eq!(contract.contract_type, ContractType::Evm);
    assert_eq!(contract.bytecode, store_runtime());

    let storage = executor.contract_storage(&address).unwrap();
    assert_eq!(storage.get(&slot_key(0)), Some(&slot_key(5)));
}

#[test]
fn test_set_and_get() {
    let executor = Executor::new(ExecutorConfig::default());
    let address = deploy_store(&executor, 5);

    let get = executor.call(&address, "get", &[], deployer(), 100_000).unwrap();
    assert_eq!(get.return_value, json!(5));

    let set = executor.call(&address, "set", &[json!(9)], deployer(), 100_000).unwrap();
    assert!(set.success, "{:?}", set.error);

    let get = executor.call(&address, "get", &[], deployer(), 100_000).unwrap();
    assert_eq!(get.return_value, json!(9));
    assert!(get.gas_used < set.gas_used);
}

#[test]
fn test_raw_calldata_matches_named_call() {
    let executor = Executor::new(ExecutorConfig::default());
    let address = deploy_store(&executor, 77);

    let calldata = store_abi().function("get").unwrap().encode_call(&[]).unwrap();
    let raw = executor
        .read_only_call_raw(&address, &calldata, deployer(), 100_000)
        .unwrap();
    let named = executor.read_only_call(&address, "get", &[], deployer(), 100_000).unwrap();
    assert_eq!(raw.return_data, named.return_data);
    assert_eq!(raw.gas_used, named.gas_used);
}

#[test]
fn test_unknown_selector_reverts() {
    let executor = Executor::new(ExecutorConfig::default());
    let address = deploy_store(&executor, 1);

    let result = executor.call(&address, "missing", &[], deployer(), 100_000).unwrap();
    assert!(!result.success);
    assert_eq!(result.error, Some(BpfError::Execution(ExecutionFault::Reverted(Vec::new()))));
    assert!(result.gas_used > 0);
}

#[test]
fn test_empty_runtime_is_rejected() {
    let executor = Executor::new(ExecutorConfig::default());
    let result = executor
        .deploy(DeployRequest::evm(vec![0x00], ContractAbi::default()), deployer(), 100_000)
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error, Some(BpfError::Execution(ExecutionFault::EmptyDeployedCode)));
    assert_eq!(executor.contract_count().unwrap(), 0);
}

#[test]
fn test_logs_and_external_calls_are_refused() {
    let executor = Executor::new(ExecutorConfig::default());

    // LOG0(0, 0)
    let log = executor
        .deploy(
            DeployRequest::evm(vec![0x60, 0x00, 0x60, 0x00, 0xa0], ContractAbi::default()),
            deployer(),
            100_000,
        )
        .unwrap();
    assert_eq!(log.error_kind(), Some("BPFExecutionError"));

    // CREATE with zeroed operands
    let create = executor
        .deploy(
            DeployRequest::evm(vec![0x60, 0x00, 0x80, 0x80, 0xf0], ContractAbi::default()),
            deployer(),
            100_000,
        )
        .unwrap();
    assert_eq!(create.error_kind(), Some("BPFSecurityError"));
    assert_eq!(executor.contract_count().unwrap(), 0);
}

#[test]
fn test_estimate_deploy_gas_matches_deployment() {
    let executor = Executor::new(ExecutorConfig::default());
    let request = DeployRequest::evm(store_init_code(), store_abi()).with_args(vec![json!(3)]);
    let estimate = executor.estimate_deploy_gas(&request, deployer()).unwrap();
    let result = executor.deploy(request, deployer(), 200_000).unwrap();
    assert_eq!(estimate, result.gas_used);
}
