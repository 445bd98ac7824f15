// bpf-vm/src/executor.rs

use crate::{
    abi::{self, ContractAbi, Function},
    error::{BpfError, ExecutionFault},
    evm::EvmInterpreter,
    gas::GasSchedule,
    isa::verify_program,
    state::{
        derive_contract_address, Changeset, Contract, ContractEntry, ContractPersistence, ContractStore,
        StorageMap, StorageOverlay,
    },
    vm::{BlockContext, BpfVm, ExecutionContext, ExecutionLimits, ExecutionResult},
    ContractError, ContractResult,
};
use blockchain_core::{BlockNumber, ContractType, Gas, Nonce, Timestamp, MAX_GAS_LIMIT};
use blockchain_crypto::Address;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};

/// Executor limits
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_bytecode_size: usize,
    pub max_gas_limit: Gas,
    /// Gas limit used for dry runs in `estimate_gas`
    pub estimate_gas_ceiling: Gas,
    pub chain_id: u64,
    pub limits: ExecutionLimits,
    pub schedule: GasSchedule,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_bytecode_size: 24 * 1024,
            max_gas_limit: MAX_GAS_LIMIT,
            estimate_gas_ceiling: MAX_GAS_LIMIT,
            chain_id: 1337,
            limits: ExecutionLimits::default(),
            schedule: GasSchedule::standard(),
        }
    }
}

/// Contract deployment parameters
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Native program, or EVM init code
    pub bytecode: Vec<u8>,
    pub abi: ContractAbi,
    pub constructor_args: Vec<Value>,
    pub contract_type: ContractType,
}

impl DeployRequest {
    pub fn native(bytecode: Vec<u8>, abi: ContractAbi) -> Self {
        Self {
            bytecode,
            abi,
            constructor_args: Vec::new(),
            contract_type: ContractType::Native,
        }
    }

    pub fn evm(bytecode: Vec<u8>, abi: ContractAbi) -> Self {
        Self {
            contract_type: ContractType::Evm,
            ..Self::native(bytecode, abi)
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.constructor_args = args;
        self
    }
}

/// A deployment that passed validation; its nonce and address are reserved
#[derive(Debug)]
pub struct PreparedDeployment {
    request: DeployRequest,
    encoded_args: Vec<u8>,
    deployer: Address,
    nonce: Nonce,
    address: Address,
    gas_limit: Gas,
}

impl PreparedDeployment {
    /// Deployer nonce this deployment consumed
    pub fn nonce(&self) -> Nonce {
        self.nonce
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

/// A call resolved against its contract's ABI, ready to run
pub struct PreparedCall {
    entry: Arc<ContractEntry>,
    function: Function,
    encoded_args: Vec<u8>,
    caller: Address,
    gas_limit: Gas,
}

impl PreparedCall {
    pub fn address(&self) -> Address {
        self.entry.contract().address
    }

    pub fn function_name(&self) -> &str {
        &self.function.name
    }
}

/// Successful constructor run: runtime code and initial storage
struct Constructed {
    code: Vec<u8>,
    initial: Changeset,
}

/// Deploys contracts and runs calls against them
///
/// Calls on one contract are serialized by that contract's storage lock;
/// calls on different contracts run in parallel.
pub struct Executor {
    store: ContractStore,
    vm: BpfVm,
    evm: EvmInterpreter,
    config: ExecutorConfig,
    block: RwLock<BlockContext>,
    persistence: Option<Arc<dyn ContractPersistence>>,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        let block = BlockContext {
            chain_id: config.chain_id,
            ..BlockContext::default()
        };
        Self {
            store: ContractStore::new(),
            vm: BpfVm::new(config.limits.clone(), config.schedule.clone()),
            evm: EvmInterpreter::new(config.limits.clone(), config.schedule.clone()),
            config,
            block: RwLock::new(block),
            persistence: None,
        }
    }

    /// Write deployments, committed changesets and nonces through to `persistence`
    pub fn with_persistence(mut self, persistence: Arc<dyn ContractPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn block_context(&self) -> BlockContext {
        *self.block.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the head block used by `deploy`, `call` and the dry runs
    ///
    /// Returns the new head. Transactions that must run in a specific block
    /// pass it to `execute_deploy` / `execute_call` instead of reading the head.
    pub fn update_block_context(&self, number: BlockNumber, timestamp: Timestamp) -> BlockContext {
        let mut block = self.block.write().unwrap_or_else(PoisonError::into_inner);
        block.number = number;
        block.timestamp = timestamp;
        *block
    }

    fn check_gas_limit(&self, gas_limit: Gas) -> ContractResult<()> {
        if gas_limit == 0 || gas_limit > self.config.max_gas_limit {
            return Err(ContractError::InvalidGasLimit(gas_limit));
        }
        Ok(())
    }

    fn check_input_size(&self, input: &[u8]) -> ContractResult<()> {
        if input.len() > self.config.limits.max_input_size {
            return Err(ContractError::InvalidArguments(format!(
                "encoded arguments are {} bytes, limit {}",
                input.len(),
                self.config.limits.max_input_size
            )));
        }
        Ok(())
    }

    /// Checks that run before any bytecode executes
    fn validate_deployment(&self, request: &DeployRequest, gas_limit: Gas) -> ContractResult<Vec<u8>> {
        self.check_gas_limit(gas_limit)?;

        let size = request.bytecode.len();
        if size > self.config.max_bytecode_size {
            return Err(ContractError::BytecodeTooLarge {
                size,
                limit: self.config.max_bytecode_size,
            });
        }

        match request.contract_type {
            ContractType::Native => verify_program(&request.bytecode)?,
            ContractType::Evm if request.bytecode.is_empty() => {
                return Err(ContractError::InvalidBytecode("empty bytecode".into()))
            }
            ContractType::Evm => {}
        }

        let encoded = request.abi.encode_constructor_args(&request.constructor_args)?;
        self.check_input_size(&encoded)?;
        Ok(encoded)
    }

    /// Run the constructor against empty storage
    fn construct(
        &self,
        request: &DeployRequest,
        encoded_args: Vec<u8>,
        address: Address,
        deployer: Address,
        gas_limit: Gas,
        block: BlockContext,
    ) -> (ExecutionResult, Option<Constructed>) {
        let ctx = ExecutionContext::new_call(address, deployer, gas_limit).with_block(block);
        let empty = StorageMap::new();
        let mut overlay = StorageOverlay::new(address, &empty);

        let mut result = match request.contract_type {
            ContractType::Native => {
                // Native constructors are optional
                if !request.abi.has_constructor() {
                    return (
                        ExecutionResult::empty_success(),
                        Some(Constructed {
                            code: request.bytecode.clone(),
                            initial: overlay.finish(),
                        }),
                    );
                }
                let inputs: Vec<_> = request
                    .abi
                    .constructor
                    .iter()
                    .flatten()
                    .map(|param| param.kind.clone())
                    .collect();
                let registers = abi::register_view(&inputs, &encoded_args);
                let ctx = ctx.with_call(0, encoded_args, registers);
                self.vm.execute(&request.bytecode, &ctx, &mut overlay)
            }
            ContractType::Evm => {
                let mut init_code = request.bytecode.clone();
                init_code.extend_from_slice(&encoded_args);
                self.evm.execute(&init_code, &ctx, &mut overlay)
            }
        };

        if !result.success {
            return (result, None);
        }

        let code = match request.contract_type {
            ContractType::Native => request.bytecode.clone(),
            ContractType::Evm if result.return_data.is_empty() => {
                result.success = false;
                result.error = Some(BpfError::Execution(ExecutionFault::EmptyDeployedCode));
                return (result, None);
            }
            ContractType::Evm => std::mem::take(&mut result.return_data),
        };

        let initial = overlay.finish();
        (result, Some(Constructed { code, initial }))
    }

    /// Validate a deployment and reserve the deployer's nonce
    ///
    /// Validation failures return `Err` and reserve nothing. Once prepared,
    /// the nonce stays consumed whether or not the constructor succeeds.
    pub fn prepare_deploy(
        &self,
        request: DeployRequest,
        deployer: Address,
        gas_limit: Gas,
    ) -> ContractResult<PreparedDeployment> {
        let encoded_args = self.validate_deployment(&request, gas_limit)?;

        let nonce = self.reserve_nonce(&deployer)?;
        let address = derive_contract_address(&deployer, nonce);
        if self.store.contains(&address)? {
            return Err(ContractError::DeploymentFailed(format!(
                "address {} is already taken",
                address
            )));
        }

        Ok(PreparedDeployment {
            request,
            encoded_args,
            deployer,
            nonce,
            address,
            gas_limit,
        })
    }

    /// Run a prepared deployment's constructor in `block`
    ///
    /// A constructor failure returns `Ok` with `success == false` and
    /// creates nothing.
    pub fn execute_deploy(&self, prepared: PreparedDeployment, block: BlockContext) -> ContractResult<ExecutionResult> {
        let PreparedDeployment {
            request,
            encoded_args,
            deployer,
            address,
            gas_limit,
            ..
        } = prepared;

        let (mut result, constructed) =
            self.construct(&request, encoded_args, address, deployer, gas_limit, block);
        let Constructed { code, initial } = match constructed {
            Some(constructed) => constructed,
            None => {
                tracing::debug!(
                    "Deployment by {} failed: {} (gas used {})",
                    deployer,
                    result.error_message().unwrap_or_default(),
                    result.gas_used
                );
                return Ok(result);
            }
        };

        let contract = Contract::new(
            address,
            code,
            request.abi,
            request.contract_type,
            deployer,
            block.number,
        );

        if let Some(persistence) = &self.persistence {
            persistence.persist_deployment(&contract, &initial)?;
        }
        self.store.insert(contract, initial.clone())?;

        tracing::debug!(
            "Deployed {} contract {} in block {} (gas used {})",
            request.contract_type,
            address,
            block.number,
            result.gas_used
        );

        result.contract_address = Some(address);
        result.changeset = Some(initial);
        Ok(result)
    }

    /// Deploy a contract in the head block
    pub fn deploy(
        &self,
        request: DeployRequest,
        deployer: Address,
        gas_limit: Gas,
    ) -> ContractResult<ExecutionResult> {
        let prepared = self.prepare_deploy(request, deployer, gas_limit)?;
        self.execute_deploy(prepared, self.block_context())
    }

    /// Gas a deployment would consume, without deploying
    pub fn estimate_deploy_gas(&self, request: &DeployRequest, deployer: Address) -> ContractResult<Gas> {
        let ceiling = self.config.estimate_gas_ceiling;
        let encoded_args = self.validate_deployment(request, ceiling.min(self.config.max_gas_limit))?;
        let address = derive_contract_address(&deployer, self.store.next_nonce(&deployer)?);
        let (result, _) = self.construct(request, encoded_args, address, deployer, ceiling, self.block_context());
        match result.error {
            Some(err) => Err(ContractError::Execution(err)),
            None => Ok(result.gas_used),
        }
    }

    /// Resolve `function_name` and encode `args` without running anything
    pub fn prepare_call(
        &self,
        address: &Address,
        function_name: &str,
        args: &[Value],
        caller: Address,
        gas_limit: Gas,
    ) -> ContractResult<PreparedCall> {
        self.check_gas_limit(gas_limit)?;
        self.prepare(address, caller, gas_limit, |abi| named_call(abi, function_name, args))
    }

    /// Resolve raw `selector ‖ args` calldata without running anything
    pub fn prepare_call_raw(
        &self,
        address: &Address,
        calldata: &[u8],
        caller: Address,
        gas_limit: Gas,
    ) -> ContractResult<PreparedCall> {
        self.check_gas_limit(gas_limit)?;
        self.prepare(address, caller, gas_limit, |abi| raw_call(abi, calldata))
    }

    /// Run a prepared call in `block` and commit its writes on success
    pub fn execute_call(&self, prepared: PreparedCall, block: BlockContext) -> ContractResult<ExecutionResult> {
        self.run_call(prepared, block, true)
    }

    /// Run a prepared call in `block`; its writes are always discarded
    pub fn execute_read_only(&self, prepared: PreparedCall, block: BlockContext) -> ContractResult<ExecutionResult> {
        self.run_call(prepared, block, false)
    }

    /// Call `function_name` in the head block and commit its writes on success
    pub fn call(
        &self,
        address: &Address,
        function_name: &str,
        args: &[Value],
        caller: Address,
        gas_limit: Gas,
    ) -> ContractResult<ExecutionResult> {
        let prepared = self.prepare_call(address, function_name, args, caller, gas_limit)?;
        self.execute_call(prepared, self.block_context())
    }

    /// Like `call`, but storage writes are always discarded
    pub fn read_only_call(
        &self,
        address: &Address,
        function_name: &str,
        args: &[Value],
        caller: Address,
        gas_limit: Gas,
    ) -> ContractResult<ExecutionResult> {
        let prepared = self.prepare_call(address, function_name, args, caller, gas_limit)?;
        self.execute_read_only(prepared, self.block_context())
    }

    /// Call with raw `selector ‖ args` calldata, committing on success
    pub fn call_raw(
        &self,
        address: &Address,
        calldata: &[u8],
        caller: Address,
        gas_limit: Gas,
    ) -> ContractResult<ExecutionResult> {
        let prepared = self.prepare_call_raw(address, calldata, caller, gas_limit)?;
        self.execute_call(prepared, self.block_context())
    }

    /// Raw calldata call that never commits
    pub fn read_only_call_raw(
        &self,
        address: &Address,
        calldata: &[u8],
        caller: Address,
        gas_limit: Gas,
    ) -> ContractResult<ExecutionResult> {
        let prepared = self.prepare_call_raw(address, calldata, caller, gas_limit)?;
        self.execute_read_only(prepared, self.block_context())
    }

    /// Gas a call would consume, measured by a dry run at the estimation ceiling
    pub fn estimate_gas(
        &self,
        address: &Address,
        function_name: &str,
        args: &[Value],
        caller: Address,
    ) -> ContractResult<Gas> {
        let prepared = self.prepare(address, caller, self.config.estimate_gas_ceiling, |abi| {
            named_call(abi, function_name, args)
        })?;
        self.dry_run(prepared)
    }

    /// Raw calldata variant of `estimate_gas`
    pub fn estimate_gas_raw(&self, address: &Address, calldata: &[u8], caller: Address) -> ContractResult<Gas> {
        let prepared = self.prepare(address, caller, self.config.estimate_gas_ceiling, |abi| {
            raw_call(abi, calldata)
        })?;
        self.dry_run(prepared)
    }

    fn dry_run(&self, prepared: PreparedCall) -> ContractResult<Gas> {
        let result = self.execute_read_only(prepared, self.block_context())?;
        match result.error {
            Some(err) => Err(ContractError::Execution(err)),
            None => Ok(result.gas_used),
        }
    }

    fn prepare(
        &self,
        address: &Address,
        caller: Address,
        gas_limit: Gas,
        resolve: impl FnOnce(&ContractAbi) -> ContractResult<(Function, Vec<u8>)>,
    ) -> ContractResult<PreparedCall> {
        let entry = self.store.entry(address)?;
        let (function, encoded_args) = resolve(&entry.contract().abi)?;
        self.check_input_size(&encoded_args)?;
        Ok(PreparedCall {
            entry,
            function,
            encoded_args,
            caller,
            gas_limit,
        })
    }

    fn run_call(&self, prepared: PreparedCall, block: BlockContext, commit: bool) -> ContractResult<ExecutionResult> {
        let PreparedCall {
            entry,
            function,
            encoded_args,
            caller,
            gas_limit,
        } = prepared;
        let contract = entry.contract();
        let address = contract.address;

        let selector = function.selector();
        let ctx = ExecutionContext::new_call(address, caller, gas_limit).with_block(block);
        let ctx = match contract.contract_type {
            ContractType::Native => {
                let registers = abi::register_view(&function.input_types(), &encoded_args);
                ctx.with_call(u32::from_be_bytes(selector), encoded_args, registers)
            }
            ContractType::Evm => {
                let mut calldata = selector.to_vec();
                calldata.extend_from_slice(&encoded_args);
                ctx.with_input(calldata)
            }
        };

        let lock = self.store.open_changeset(&entry)?;
        let mut overlay = StorageOverlay::new(address, lock.committed());
        overlay.enter();
        let mut result = match contract.contract_type {
            ContractType::Native => self.vm.execute(&contract.bytecode, &ctx, &mut overlay),
            ContractType::Evm => self.evm.execute(&contract.bytecode, &ctx, &mut overlay),
        };
        if result.success {
            overlay.exit_commit();
        } else {
            overlay.exit_discard();
        }
        let changeset = overlay.finish();

        if !result.success {
            self.store.discard(lock, changeset);
            tracing::debug!(
                "Call {}.{} failed: {} (gas used {})",
                address,
                function.name,
                result.error_message().unwrap_or_default(),
                result.gas_used
            );
            return Ok(result);
        }

        result.return_value = match function.decode_output(&result.return_data) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!("Undecodable output from {}.{}: {}", address, function.name, err);
                Value::String(format!("0x{}", hex::encode(&result.return_data)))
            }
        };

        if commit && !changeset.is_empty() {
            if let Some(persistence) = &self.persistence {
                persistence.persist_changeset(&changeset)?;
            }
            self.store.commit(lock, changeset.clone())?;
        } else {
            self.store.discard(lock, changeset.clone());
        }

        tracing::debug!(
            "Call {}.{} succeeded in block {} ({} writes, gas used {})",
            address,
            function.name,
            block.number,
            changeset.len(),
            result.gas_used
        );

        result.changeset = Some(changeset);
        Ok(result)
    }

    pub fn get_contract(&self, address: &Address) -> ContractResult<Option<Contract>> {
        self.store.get(address)
    }

    pub fn all_contracts(&self) -> ContractResult<Vec<Contract>> {
        self.store.all_contracts()
    }

    pub fn contract_storage(&self, address: &Address) -> ContractResult<StorageMap> {
        self.store.storage_snapshot(address)
    }

    pub fn contract_count(&self) -> ContractResult<usize> {
        self.store.len()
    }

    pub fn next_nonce(&self, deployer: &Address) -> ContractResult<Nonce> {
        self.store.next_nonce(deployer)
    }

    /// Take `sender`'s next nonce; deployments derive their address from it
    pub fn reserve_nonce(&self, sender: &Address) -> ContractResult<Nonce> {
        let nonce = self.store.reserve_nonce(sender)?;
        if let Some(persistence) = &self.persistence {
            persistence.persist_nonce(sender, nonce + 1)?;
        }
        Ok(nonce)
    }

    /// Re-register a persisted contract without running its constructor
    pub fn restore_contract(&self, contract: Contract, storage: StorageMap) -> ContractResult<()> {
        self.store.restore(contract, storage)
    }

    pub fn restore_nonce(&self, deployer: Address, next: Nonce) -> ContractResult<()> {
        self.store.set_nonce(deployer, next)
    }
}

fn named_call(abi: &ContractAbi, function_name: &str, args: &[Value]) -> ContractResult<(Function, Vec<u8>)> {
    let function = abi.function(function_name)?;
    let encoded = function.encode_args(args)?;
    Ok((function.clone(), encoded))
}

fn raw_call(abi: &ContractAbi, calldata: &[u8]) -> ContractResult<(Function, Vec<u8>)> {
    if calldata.len() < 4 {
        return Err(ContractError::InvalidArguments(
            "calldata shorter than a function selector".into(),
        ));
    }
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&calldata[..4]);
    let function = abi
        .function_by_selector(selector)
        .ok_or_else(|| ContractError::FunctionNotFound(format!("selector 0x{}", hex::encode(selector))))?;

    let args = &calldata[4..];
    abi::decode(&function.input_types(), args)?;
    Ok((function.clone(), args.to_vec()))
}
