// storage/src/db.rs

use crate::{StorageError, StorageResult};
use blockchain_core::{BlockNumber, Nonce, TransactionReceipt};
use blockchain_crypto::{Address, Hash};
use bpf_vm::state::{StorageKey, StorageWord, ZERO_WORD};
use bpf_vm::{Changeset, Contract, ContractError, ContractPersistence, ContractResult, StorageMap};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

const NONCE_PREFIX: &[u8] = b"nonce/";
const LATEST_BLOCK_KEY: &str = "latest_block_number";

/// Column families for different data types
#[derive(Debug, Clone, Copy)]
pub enum ColumnFamily {
    /// address -> Contract
    Contracts,
    /// address ‖ slot -> word
    ContractStorage,
    /// tx hash -> TransactionReceipt
    Receipts,
    Meta,
}

impl ColumnFamily {
    fn as_str(&self) -> &'static str {
        match self {
            ColumnFamily::Contracts => "contracts",
            ColumnFamily::ContractStorage => "contract_storage",
            ColumnFamily::Receipts => "receipts",
            ColumnFamily::Meta => "meta",
        }
    }

    fn all() -> Vec<Self> {
        vec![Self::Contracts, Self::ContractStorage, Self::Receipts, Self::Meta]
    }
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: String,
    pub create_if_missing: bool,
    pub max_open_files: i32,
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./data".to_string(),
            create_if_missing: true,
            max_open_files: 1024,
            write_buffer_size: 64 * 1024 * 1024, // 64 MB
            max_write_buffer_number: 3,
        }
    }
}

/// Main database interface
pub struct Database {
    db: Arc<DB>,
    config: DatabaseConfig,
}

fn storage_key(address: &Address, slot: &StorageKey) -> Vec<u8> {
    let mut key = Vec::with_capacity(52);
    key.extend_from_slice(address.as_bytes());
    key.extend_from_slice(slot);
    key
}

fn nonce_key(address: &Address) -> Vec<u8> {
    let mut key = NONCE_PREFIX.to_vec();
    key.extend_from_slice(address.as_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    bincode::deserialize(bytes).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn db_err(e: rocksdb::Error) -> StorageError {
    StorageError::DatabaseError(e.to_string())
}

impl Database {
    /// Open or create database
    pub fn open(config: DatabaseConfig) -> StorageResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(config.create_if_missing);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.increase_parallelism(num_cpus::get() as i32);

        let cfs: Vec<_> = ColumnFamily::all().iter().map(|cf| cf.as_str()).collect();

        let db = DB::open_cf(&opts, &config.path, &cfs).map_err(db_err)?;

        tracing::info!("Database opened at {}", config.path);

        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    pub fn path(&self) -> &str {
        &self.config.path
    }

    // ==================== CONTRACT OPERATIONS ====================

    /// Store a deployed contract together with its initial storage
    pub fn store_contract(&self, contract: &Contract, initial: &Changeset) -> StorageResult<()> {
        let cf = self.cf(ColumnFamily::Contracts)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf, contract.address.as_bytes(), encode(contract)?);
        self.write_changeset(&mut batch, initial)?;

        self.db.write(batch).map_err(db_err)
    }

    pub fn get_contract(&self, address: &Address) -> StorageResult<Option<Contract>> {
        let cf = self.cf(ColumnFamily::Contracts)?;

        match self.db.get_cf(cf, address.as_bytes()).map_err(db_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every stored contract with its committed storage
    pub fn load_contracts(&self) -> StorageResult<Vec<(Contract, StorageMap)>> {
        let cf = self.cf(ColumnFamily::Contracts)?;

        let mut contracts = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item.map_err(db_err)?;
            let contract: Contract = decode(&value)?;
            let storage = self.load_contract_storage(&contract.address)?;
            contracts.push((contract, storage));
        }

        tracing::info!("Loaded {} contracts from storage", contracts.len());
        Ok(contracts)
    }

    /// All non-zero storage words of one contract
    pub fn load_contract_storage(&self, address: &Address) -> StorageResult<StorageMap> {
        let cf = self.cf(ColumnFamily::ContractStorage)?;
        let prefix: &[u8] = address.as_bytes();

        let mut storage = StorageMap::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            if key.len() != 52 || value.len() != 32 {
                return Err(StorageError::Corruption(format!(
                    "storage entry of {} has key length {} and value length {}",
                    address,
                    key.len(),
                    value.len()
                )));
            }
            let mut slot: StorageKey = [0u8; 32];
            slot.copy_from_slice(&key[20..]);
            let mut word: StorageWord = [0u8; 32];
            word.copy_from_slice(&value);
            storage.insert(slot, word);
        }
        Ok(storage)
    }

    /// Read one storage word; unset slots read as zero
    pub fn get_contract_storage(&self, address: &Address, slot: &StorageKey) -> StorageResult<StorageWord> {
        let cf = self.cf(ColumnFamily::ContractStorage)?;
        match self
            .db
            .get_cf(cf, storage_key(address, slot))
            .map_err(db_err)?
        {
            Some(bytes) if bytes.len() == 32 => {
                let mut word = [0u8; 32];
                word.copy_from_slice(&bytes);
                Ok(word)
            }
            Some(_) => Err(StorageError::Corruption(format!("storage word of {} is not 32 bytes", address))),
            None => Ok(ZERO_WORD),
        }
    }

    /// Apply a committed changeset atomically
    pub fn apply_changeset(&self, changeset: &Changeset) -> StorageResult<()> {
        let mut batch = WriteBatch::default();
        self.write_changeset(&mut batch, changeset)?;
        self.db.write(batch).map_err(db_err)
    }

    fn write_changeset(&self, batch: &mut WriteBatch, changeset: &Changeset) -> StorageResult<()> {
        let cf = self.cf(ColumnFamily::ContractStorage)?;
        for (slot, word) in &changeset.writes {
            let key = storage_key(&changeset.address, slot);
            if *word == ZERO_WORD {
                batch.delete_cf(cf, key);
            } else {
                batch.put_cf(cf, key, word);
            }
        }
        Ok(())
    }

    // ==================== NONCE OPERATIONS ====================

    pub fn store_nonce(&self, deployer: &Address, next: Nonce) -> StorageResult<()> {
        let cf = self.cf(ColumnFamily::Meta)?;
        self.db
            .put_cf(cf, nonce_key(deployer), next.to_be_bytes())
            .map_err(db_err)
    }

    /// Next deployment nonce of every deployer seen so far
    pub fn load_nonces(&self) -> StorageResult<Vec<(Address, Nonce)>> {
        let cf = self.cf(ColumnFamily::Meta)?;

        let mut nonces = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(NONCE_PREFIX, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(NONCE_PREFIX) {
                break;
            }
            let address = Address::from_slice(&key[NONCE_PREFIX.len()..])
                .map_err(|e| StorageError::Corruption(e.to_string()))?;
            let next = u64::from_be_bytes(
                value
                    .as_ref()
                    .try_into()
                    .map_err(|_| StorageError::Corruption("Invalid nonce".into()))?,
            );
            nonces.push((address, next));
        }
        Ok(nonces)
    }

    // ==================== RECEIPT OPERATIONS ====================

    pub fn store_receipt(&self, receipt: &TransactionReceipt) -> StorageResult<()> {
        let cf = self.cf(ColumnFamily::Receipts)?;
        self.db
            .put_cf(cf, receipt.tx_hash.as_bytes(), encode(receipt)?)
            .map_err(db_err)
    }

    pub fn get_receipt(&self, hash: &Hash) -> StorageResult<Option<TransactionReceipt>> {
        let cf = self.cf(ColumnFamily::Receipts)?;

        match self.db.get_cf(cf, hash.as_bytes()).map_err(db_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // ==================== METADATA OPERATIONS ====================

    /// Store metadata
    pub fn store_meta(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let cf = self.cf(ColumnFamily::Meta)?;
        self.db.put_cf(cf, key.as_bytes(), value).map_err(db_err)
    }

    /// Get metadata
    pub fn get_meta(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let cf = self.cf(ColumnFamily::Meta)?;
        self.db.get_cf(cf, key.as_bytes()).map_err(db_err)
    }

    /// Get latest block number
    pub fn get_latest_block_number(&self) -> StorageResult<Option<BlockNumber>> {
        match self.get_meta(LATEST_BLOCK_KEY)? {
            Some(bytes) => {
                let number = u64::from_be_bytes(
                    bytes
                        .try_into()
                        .map_err(|_| StorageError::Corruption("Invalid block number".into()))?,
                );
                Ok(Some(number))
            }
            None => Ok(None),
        }
    }

    /// Update latest block number
    pub fn update_latest_block_number(&self, number: BlockNumber) -> StorageResult<()> {
        self.store_meta(LATEST_BLOCK_KEY, &number.to_be_bytes())
    }

    // ==================== UTILITY OPERATIONS ====================

    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush().map_err(db_err)
    }

    /// Compact database
    pub fn compact(&self) -> StorageResult<()> {
        tracing::info!("Compacting database...");

        for cf_type in ColumnFamily::all() {
            if let Ok(cf) = self.cf(cf_type) {
                self.db.compact_range_cf(cf, None::<&[u8]>, None::<&[u8]>);
            }
        }

        tracing::info!("Database compaction complete");
        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> StorageResult<DatabaseStats> {
        let cf_contracts = self.cf(ColumnFamily::Contracts)?;
        let cf_storage = self.cf(ColumnFamily::ContractStorage)?;
        let cf_receipts = self.cf(ColumnFamily::Receipts)?;

        Ok(DatabaseStats {
            latest_block: self.get_latest_block_number()?.unwrap_or(0),
            total_contracts: self.db.iterator_cf(cf_contracts, IteratorMode::Start).count() as u64,
            total_storage_slots: self.db.iterator_cf(cf_storage, IteratorMode::Start).count() as u64,
            total_receipts: self.db.iterator_cf(cf_receipts, IteratorMode::Start).count() as u64,
        })
    }

    /// Get column family handle
    fn cf(&self, cf_type: ColumnFamily) -> StorageResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf_type.as_str())
            .ok_or_else(|| StorageError::DatabaseError(format!("{} CF not found", cf_type.as_str())))
    }
}

fn persistence_err(what: &str, e: StorageError) -> ContractError {
    tracing::warn!("Failed to persist {}: {}", what, e);
    ContractError::PersistenceError(e.to_string())
}

impl ContractPersistence for Database {
    fn persist_deployment(&self, contract: &Contract, initial: &Changeset) -> ContractResult<()> {
        self.store_contract(contract, initial)
            .map_err(|e| persistence_err("deployment", e))
    }

    fn persist_changeset(&self, changeset: &Changeset) -> ContractResult<()> {
        self.apply_changeset(changeset)
            .map_err(|e| persistence_err("changeset", e))
    }

    fn persist_nonce(&self, deployer: &Address, next: Nonce) -> ContractResult<()> {
        self.store_nonce(deployer, next)
            .map_err(|e| persistence_err("nonce", e))
    }
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub latest_block: BlockNumber,
    pub total_contracts: u64,
    pub total_storage_slots: u64,
    pub total_receipts: u64,
}
