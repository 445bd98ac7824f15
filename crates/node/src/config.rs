// node/src/config.rs
use blockchain_core::{Gas, DEFAULT_GAS_LIMIT, MAX_GAS_LIMIT};
use bpf_vm::{ExecutionLimits, ExecutorConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use storage::DatabaseConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub data_dir: String,
    pub rpc: RpcConfig,
    pub vm: VmConfig,
    pub chain: ChainConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub enabled: bool,
    pub listen_addr: SocketAddr,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmConfig {
    pub max_bytecode_size: usize,
    pub default_gas_limit: Gas,
    pub max_gas_limit: Gas,
    pub estimate_gas_ceiling: Gas,
    pub max_instructions: u64,
    pub max_execution_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub max_open_files: i32,
    pub write_buffer_size_mb: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let executor = ExecutorConfig::default();
        Self {
            data_dir: "./data".into(),
            rpc: RpcConfig {
                enabled: true,
                listen_addr: SocketAddr::from(([127, 0, 0, 1], 8545)),
                cors_origins: vec!["*".into()],
            },
            vm: VmConfig {
                max_bytecode_size: executor.max_bytecode_size,
                default_gas_limit: DEFAULT_GAS_LIMIT,
                max_gas_limit: executor.max_gas_limit,
                estimate_gas_ceiling: executor.estimate_gas_ceiling,
                max_instructions: executor.limits.max_instructions,
                max_execution_ms: executor.limits.max_execution_time.as_millis() as u64,
            },
            chain: ChainConfig {
                chain_id: executor.chain_id,
            },
            storage: StorageConfig {
                max_open_files: 1024,
                write_buffer_size_mb: 64,
            },
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let vm = &self.vm;
        if vm.max_gas_limit == 0 || vm.max_gas_limit > MAX_GAS_LIMIT {
            anyhow::bail!("vm.max_gas_limit must be between 1 and {}", MAX_GAS_LIMIT);
        }
        if vm.default_gas_limit == 0 || vm.default_gas_limit > vm.max_gas_limit {
            anyhow::bail!("vm.default_gas_limit must be between 1 and vm.max_gas_limit");
        }
        if vm.estimate_gas_ceiling == 0 {
            anyhow::bail!("vm.estimate_gas_ceiling must be positive");
        }
        if vm.max_instructions == 0 || vm.max_execution_ms == 0 {
            anyhow::bail!("vm.max_instructions and vm.max_execution_ms must be positive");
        }
        Ok(())
    }

    pub fn database_path(&self) -> String {
        format!("{}/db", self.data_dir)
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            path: self.database_path(),
            max_open_files: self.storage.max_open_files,
            write_buffer_size: self.storage.write_buffer_size_mb * 1024 * 1024,
            ..Default::default()
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_bytecode_size: self.vm.max_bytecode_size,
            max_gas_limit: self.vm.max_gas_limit,
            estimate_gas_ceiling: self.vm.estimate_gas_ceiling,
            chain_id: self.chain.chain_id,
            limits: ExecutionLimits {
                max_instructions: self.vm.max_instructions,
                max_execution_time: Duration::from_millis(self.vm.max_execution_ms),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert!(config.rpc.enabled);
        assert_eq!(config.rpc.listen_addr.port(), 8545);
        assert_eq!(config.chain.chain_id, 1337);
        assert_eq!(config.vm.max_bytecode_size, 24 * 1024);
        assert_eq!(config.vm.max_instructions, 10_000);
        assert_eq!(config.vm.max_execution_ms, 5_000);
        assert_eq!(config.vm.default_gas_limit, 100_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        let mut config = NodeConfig::default();
        config.chain.chain_id = 31337;
        config.vm.max_instructions = 50_000;
        config.to_file(path).unwrap();

        let loaded = NodeConfig::from_file(path).unwrap();
        assert_eq!(loaded.chain.chain_id, 31337);
        let executor = loaded.executor_config();
        assert_eq!(executor.chain_id, 31337);
        assert_eq!(executor.limits.max_instructions, 50_000);
        assert_eq!(executor.limits.max_execution_time, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_gas_settings_rejected() {
        let mut config = NodeConfig::default();
        config.vm.default_gas_limit = config.vm.max_gas_limit + 1;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.vm.max_gas_limit = MAX_GAS_LIMIT + 1;
        assert!(config.validate().is_err());
    }
}
