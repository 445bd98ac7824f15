// node/src/runtime.rs
use crate::NodeConfig;
use bpf_vm::Executor;
use rpc::{MethodsConfig, RpcConfig as RpcCfg, RpcMethods, RpcServer};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use storage::Database;

pub struct Node {
    config: NodeConfig,
    database: Arc<Database>,
    executor: Arc<Executor>,
}

impl Node {
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        tracing::info!("Initializing node components");

        std::fs::create_dir_all(&config.data_dir)?;
        let database = Arc::new(Database::open(config.database_config())?);

        let executor = Executor::new(config.executor_config()).with_persistence(database.clone());
        restore_state(&database, &executor)?;

        tracing::info!("Node components initialized");

        Ok(Self {
            config,
            database,
            executor: Arc::new(executor),
        })
    }

    pub async fn start(self: Arc<Self>) -> anyhow::Result<()> {
        tracing::info!("Starting contract node");

        // Start RPC server if enabled
        if self.config.rpc.enabled {
            let rpc_config = RpcCfg {
                listen_addr: self.config.rpc.listen_addr,
                cors_origins: self.config.rpc.cors_origins.clone(),
            };

            let methods = RpcMethods::new(
                self.executor.clone(),
                self.database.clone(),
                MethodsConfig {
                    default_gas_limit: self.config.vm.default_gas_limit,
                    ..Default::default()
                },
            )?;

            let rpc_server = Arc::new(RpcServer::new(rpc_config, methods));

            // Spawn RPC server in background
            let rpc_clone = rpc_server.clone();
            tokio::spawn(async move {
                if let Err(e) = rpc_clone.start().await {
                    tracing::error!("RPC server error: {}", e);
                }
            });
        }

        tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        tracing::info!("  Node is operational");
        tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if self.config.rpc.enabled {
            tracing::info!("  RPC:       {}", self.config.rpc.listen_addr);
        }
        tracing::info!("  Chain ID:  {}", self.config.chain.chain_id);
        tracing::info!("  Contracts: {}", self.executor.contract_count()?);
        tracing::info!("  Data Dir:  {}", self.config.data_dir);
        tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!("Shutting down node...");

        tracing::info!("Flushing database...");
        self.database.flush()?;

        tracing::info!("Node shutdown complete");
        Ok(())
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }
}

/// Rebuild the executor's in-memory state from the database
fn restore_state(database: &Database, executor: &Executor) -> anyhow::Result<()> {
    let contracts = database.load_contracts()?;
    let count = contracts.len();
    for (contract, storage) in contracts {
        executor.restore_contract(contract, storage)?;
    }

    for (deployer, next) in database.load_nonces()? {
        executor.restore_nonce(deployer, next)?;
    }

    let latest = database.get_latest_block_number()?.unwrap_or(0);
    executor.update_block_context(latest, unix_timestamp());

    tracing::info!("Restored {} contracts at block {}", count, latest);
    Ok(())
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
