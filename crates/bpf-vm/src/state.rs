// bpf-vm/src/state.rs

use crate::{abi::ContractAbi, ContractError, ContractResult};
use blockchain_core::{BlockNumber, ContractType, Nonce};
use blockchain_crypto::{hash::Hashable, Address, Hash};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// 32-byte storage key
pub type StorageKey = [u8; 32];

/// 32-byte storage value
pub type StorageWord = [u8; 32];

/// Value of every key that was never written
pub const ZERO_WORD: StorageWord = [0u8; 32];

/// Committed key/value storage of one contract (zero words are not stored)
pub type StorageMap = BTreeMap<StorageKey, StorageWord>;

/// Deployed contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub address: Address,
    /// Native bytecode, or EVM runtime code after the constructor ran
    pub bytecode: Vec<u8>,
    pub abi: ContractAbi,
    pub contract_type: ContractType,
    pub creator: Address,
    pub code_hash: Hash,
    pub deployed_at: BlockNumber,
}

impl Contract {
    pub fn new(
        address: Address,
        bytecode: Vec<u8>,
        abi: ContractAbi,
        contract_type: ContractType,
        creator: Address,
        deployed_at: BlockNumber,
    ) -> Self {
        let code_hash = bytecode.as_slice().hash();
        Self {
            address,
            bytecode,
            abi,
            contract_type,
            creator,
            code_hash,
            deployed_at,
        }
    }

    pub fn code_size(&self) -> usize {
        self.bytecode.len()
    }
}

/// Contract address for `deployer`'s `nonce`-th deployment
///
/// Last 20 bytes of keccak256(deployer ‖ nonce as 8 big-endian bytes).
pub fn derive_contract_address(deployer: &Address, nonce: Nonce) -> Address {
    let mut data = Vec::with_capacity(28);
    data.extend_from_slice(deployer.as_bytes());
    data.extend_from_slice(&nonce.to_be_bytes());
    Address::from_keccak(&data)
}

/// Storage as seen by executing bytecode
pub trait StorageAccess {
    fn load(&self, key: &StorageKey) -> StorageWord;
    fn store(&mut self, key: StorageKey, value: StorageWord);
}

/// Pending writes of one call against one contract
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub address: Address,
    pub writes: BTreeMap<StorageKey, StorageWord>,
}

impl Changeset {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            writes: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &StorageKey) -> Option<&StorageWord> {
        self.writes.get(key)
    }

    pub fn set(&mut self, key: StorageKey, value: StorageWord) {
        self.writes.insert(key, value);
    }

    /// Fold a child's writes into this one, child values winning
    pub fn merge(&mut self, child: Changeset) {
        self.writes.extend(child.writes);
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Apply every write; zero words delete the key
    pub fn apply(self, storage: &mut StorageMap) {
        for (key, value) in self.writes {
            if value == ZERO_WORD {
                storage.remove(&key);
            } else {
                storage.insert(key, value);
            }
        }
    }
}

/// Layered view of a contract's storage during execution
///
/// The bottom layer is the call's own changeset. `enter` opens a child
/// layer for a nested scope; `exit_commit` folds it into its parent and
/// `exit_discard` drops it. Nothing reaches the committed map until the
/// executor applies the changeset returned by `finish`.
pub struct StorageOverlay<'a> {
    base: &'a StorageMap,
    layers: Vec<Changeset>,
}

impl<'a> StorageOverlay<'a> {
    pub fn new(address: Address, base: &'a StorageMap) -> Self {
        Self {
            base,
            layers: vec![Changeset::new(address)],
        }
    }

    pub fn depth(&self) -> usize {
        self.layers.len() - 1
    }

    fn top_address(&self) -> Address {
        self.layers.last().map(|layer| layer.address).unwrap_or_default()
    }

    pub fn enter(&mut self) {
        let address = self.top_address();
        self.layers.push(Changeset::new(address));
    }

    /// Merge the innermost layer into its parent; no-op on the root layer
    pub fn exit_commit(&mut self) {
        if self.layers.len() > 1 {
            if let Some(child) = self.layers.pop() {
                if let Some(parent) = self.layers.last_mut() {
                    parent.merge(child);
                }
            }
        }
    }

    /// Drop the innermost layer; the root layer is cleared instead
    pub fn exit_discard(&mut self) {
        if self.layers.len() > 1 {
            self.layers.pop();
        } else if let Some(root) = self.layers.last_mut() {
            root.writes.clear();
        }
    }

    /// Collapse every open layer and return the call's changeset
    pub fn finish(mut self) -> Changeset {
        while self.layers.len() > 1 {
            self.exit_commit();
        }
        let address = self.top_address();
        self.layers.pop().unwrap_or_else(|| Changeset::new(address))
    }
}

impl StorageAccess for StorageOverlay<'_> {
    fn load(&self, key: &StorageKey) -> StorageWord {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.get(key).copied())
            .or_else(|| self.base.get(key).copied())
            .unwrap_or(ZERO_WORD)
    }

    fn store(&mut self, key: StorageKey, value: StorageWord) {
        if let Some(layer) = self.layers.last_mut() {
            layer.set(key, value);
        }
    }
}

/// Write-through hook for durable storage
pub trait ContractPersistence: Send + Sync {
    /// Store a newly deployed contract with its initial storage
    fn persist_deployment(&self, contract: &Contract, initial: &Changeset) -> ContractResult<()>;

    /// Store the writes of a committed call
    fn persist_changeset(&self, changeset: &Changeset) -> ContractResult<()>;

    /// Store the next deployment nonce of `deployer`
    fn persist_nonce(&self, deployer: &Address, next: Nonce) -> ContractResult<()>;
}

/// A deployed contract and its storage, guarded by the per-contract lock
#[derive(Debug)]
pub struct ContractEntry {
    contract: Contract,
    storage: Mutex<StorageMap>,
}

impl ContractEntry {
    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    /// Take the storage lock; calls on the same contract serialize here
    fn lock_storage(&self) -> ContractResult<MutexGuard<'_, StorageMap>> {
        self.storage
            .lock()
            .map_err(|_| ContractError::StateError("contract storage lock poisoned".into()))
    }
}

/// Exclusive hold on one contract's committed storage, from
/// `ContractStore::open_changeset` until `commit` or `discard`
pub struct StorageLock<'a> {
    address: Address,
    storage: MutexGuard<'a, StorageMap>,
}

impl StorageLock<'_> {
    pub fn address(&self) -> Address {
        self.address
    }

    /// Storage as of the last commit
    pub fn committed(&self) -> &StorageMap {
        &self.storage
    }
}

/// In-memory registry of deployed contracts and deployer nonces
#[derive(Debug, Default)]
pub struct ContractStore {
    contracts: RwLock<HashMap<Address, Arc<ContractEntry>>>,
    nonces: Mutex<HashMap<Address, Nonce>>,
}

impl ContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned<T>(_: T) -> ContractError {
        ContractError::StateError("contract registry lock poisoned".into())
    }

    pub fn get(&self, address: &Address) -> ContractResult<Option<Contract>> {
        let contracts = self.contracts.read().map_err(Self::poisoned)?;
        Ok(contracts.get(address).map(|entry| entry.contract.clone()))
    }

    pub fn entry(&self, address: &Address) -> ContractResult<Arc<ContractEntry>> {
        let contracts = self.contracts.read().map_err(Self::poisoned)?;
        contracts
            .get(address)
            .cloned()
            .ok_or(ContractError::ContractNotFound(*address))
    }

    pub fn contains(&self, address: &Address) -> ContractResult<bool> {
        let contracts = self.contracts.read().map_err(Self::poisoned)?;
        Ok(contracts.contains_key(address))
    }

    /// All contracts ordered by address
    pub fn all_contracts(&self) -> ContractResult<Vec<Contract>> {
        let contracts = self.contracts.read().map_err(Self::poisoned)?;
        let mut all: Vec<Contract> = contracts.values().map(|entry| entry.contract.clone()).collect();
        all.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(all)
    }

    /// Copy of a contract's committed storage
    pub fn storage_snapshot(&self, address: &Address) -> ContractResult<StorageMap> {
        let entry = self.entry(address)?;
        let storage = entry.lock_storage()?;
        Ok(storage.clone())
    }

    pub fn next_nonce(&self, deployer: &Address) -> ContractResult<Nonce> {
        let nonces = self.nonces.lock().map_err(Self::poisoned)?;
        Ok(nonces.get(deployer).copied().unwrap_or(0))
    }

    /// Take the deployer's current nonce and advance it
    pub fn reserve_nonce(&self, deployer: &Address) -> ContractResult<Nonce> {
        let mut nonces = self.nonces.lock().map_err(Self::poisoned)?;
        let nonce = nonces.entry(*deployer).or_insert(0);
        let reserved = *nonce;
        *nonce += 1;
        Ok(reserved)
    }

    pub fn set_nonce(&self, deployer: Address, next: Nonce) -> ContractResult<()> {
        let mut nonces = self.nonces.lock().map_err(Self::poisoned)?;
        nonces.insert(deployer, next);
        Ok(())
    }

    /// Register a contract with its constructor's writes as initial storage
    pub fn insert(&self, contract: Contract, initial: Changeset) -> ContractResult<()> {
        let mut storage = StorageMap::new();
        initial.apply(&mut storage);
        self.restore(contract, storage)
    }

    /// Register a contract with already-committed storage (reload from disk)
    pub fn restore(&self, contract: Contract, storage: StorageMap) -> ContractResult<()> {
        let mut contracts = self.contracts.write().map_err(Self::poisoned)?;
        if contracts.contains_key(&contract.address) {
            return Err(ContractError::DeploymentFailed(format!(
                "contract already exists at {}",
                contract.address
            )));
        }
        let address = contract.address;
        contracts.insert(
            address,
            Arc::new(ContractEntry {
                contract,
                storage: Mutex::new(storage),
            }),
        );
        Ok(())
    }

    /// Lock `entry`'s storage for one call
    ///
    /// The call stages its writes in a `StorageOverlay` over
    /// `StorageLock::committed` and ends with `commit` or `discard`. Other
    /// calls on the same contract wait until then.
    pub fn open_changeset<'a>(&self, entry: &'a ContractEntry) -> ContractResult<StorageLock<'a>> {
        Ok(StorageLock {
            address: entry.contract.address,
            storage: entry.lock_storage()?,
        })
    }

    /// Apply a changeset under the lock it was staged against, all or nothing
    pub fn commit(&self, mut lock: StorageLock<'_>, changeset: Changeset) -> ContractResult<()> {
        if changeset.address != lock.address {
            return Err(ContractError::StateError(format!(
                "changeset for {} committed against {}",
                changeset.address, lock.address
            )));
        }
        changeset.apply(&mut lock.storage);
        Ok(())
    }

    /// Drop a changeset and release the lock; committed storage is untouched
    pub fn discard(&self, lock: StorageLock<'_>, changeset: Changeset) {
        tracing::trace!("Discarding {} staged writes on {}", changeset.len(), lock.address);
    }

    pub fn len(&self) -> ContractResult<usize> {
        let contracts = self.contracts.read().map_err(Self::poisoned)?;
        Ok(contracts.len())
    }
}

/// Storage key holding a small integer slot number (big-endian, like EVM slots)
pub fn slot_key(slot: u64) -> StorageKey {
    let mut key = [0u8; 32];
    key[24..].copy_from_slice(&slot.to_be_bytes());
    key
}

/// Word holding `value` big-endian in its low 8 bytes
pub fn u64_word(value: u64) -> StorageWord {
    slot_key(value)
}

/// Low 8 bytes of a word as an integer
pub fn word_low_u64(word: &StorageWord) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[24..]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abi() -> ContractAbi {
        ContractAbi::default()
    }

    fn contract(address: Address) -> Contract {
        Contract::new(address, vec![0x95, 0, 0, 0, 0, 0, 0, 0], abi(), ContractType::Native, Address::zero(), 0)
    }

    #[test]
    fn test_address_derivation_is_stable() {
        let deployer = Address::new([9u8; 20]);
        let a0 = derive_contract_address(&deployer, 0);
        assert_eq!(a0, derive_contract_address(&deployer, 0));
        assert_ne!(a0, derive_contract_address(&deployer, 1));
        assert_ne!(a0, derive_contract_address(&Address::zero(), 0));
    }

    #[test]
    fn test_unset_keys_read_zero() {
        let base = StorageMap::new();
        let overlay = StorageOverlay::new(Address::zero(), &base);
        assert_eq!(overlay.load(&slot_key(7)), ZERO_WORD);
    }

    #[test]
    fn test_overlay_layers() {
        let mut base = StorageMap::new();
        base.insert(slot_key(0), u64_word(1));

        let mut overlay = StorageOverlay::new(Address::zero(), &base);
        overlay.store(slot_key(0), u64_word(2));

        overlay.enter();
        overlay.store(slot_key(0), u64_word(3));
        overlay.store(slot_key(1), u64_word(4));
        assert_eq!(overlay.load(&slot_key(0)), u64_word(3));
        overlay.exit_discard();

        assert_eq!(overlay.load(&slot_key(0)), u64_word(2));
        assert_eq!(overlay.load(&slot_key(1)), ZERO_WORD);

        overlay.enter();
        overlay.store(slot_key(1), u64_word(5));
        overlay.exit_commit();

        let changeset = overlay.finish();
        assert_eq!(changeset.len(), 2);
        assert_eq!(changeset.get(&slot_key(1)), Some(&u64_word(5)));
        // base untouched until applied
        assert_eq!(base.get(&slot_key(0)), Some(&u64_word(1)));
    }

    #[test]
    fn test_apply_zero_deletes() {
        let mut storage = StorageMap::new();
        storage.insert(slot_key(0), u64_word(1));

        let mut changeset = Changeset::new(Address::zero());
        changeset.set(slot_key(0), ZERO_WORD);
        changeset.set(slot_key(1), u64_word(9));
        changeset.apply(&mut storage);

        assert!(!storage.contains_key(&slot_key(0)));
        assert_eq!(storage.get(&slot_key(1)), Some(&u64_word(9)));
    }

    #[test]
    fn test_store_commit_and_discard() {
        let store = ContractStore::new();
        let address = Address::new([1u8; 20]);
        store.insert(contract(address), Changeset::new(address)).unwrap();
        let entry = store.entry(&address).unwrap();

        let lock = store.open_changeset(&entry).unwrap();
        let mut overlay = StorageOverlay::new(address, lock.committed());
        overlay.store(slot_key(0), u64_word(42));
        let changeset = overlay.finish();
        store.commit(lock, changeset).unwrap();

        let lock = store.open_changeset(&entry).unwrap();
        let mut overlay = StorageOverlay::new(address, lock.committed());
        overlay.store(slot_key(0), u64_word(7));
        let changeset = overlay.finish();
        store.discard(lock, changeset);

        let snapshot = store.storage_snapshot(&address).unwrap();
        assert_eq!(word_low_u64(&snapshot[&slot_key(0)]), 42);
    }

    #[test]
    fn test_commit_rejects_foreign_changeset() {
        let store = ContractStore::new();
        let address = Address::new([1u8; 20]);
        store.insert(contract(address), Changeset::new(address)).unwrap();
        let entry = store.entry(&address).unwrap();

        let lock = store.open_changeset(&entry).unwrap();
        let mut foreign = Changeset::new(Address::new([2u8; 20]));
        foreign.set(slot_key(0), u64_word(1));
        assert!(matches!(
            store.commit(lock, foreign),
            Err(ContractError::StateError(_))
        ));
        assert!(store.storage_snapshot(&address).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let store = ContractStore::new();
        let address = Address::new([1u8; 20]);
        store.insert(contract(address), Changeset::new(address)).unwrap();
        assert!(store.insert(contract(address), Changeset::new(address)).is_err());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_reserve_nonce() {
        let store = ContractStore::new();
        let deployer = Address::zero();
        assert_eq!(store.reserve_nonce(&deployer).unwrap(), 0);
        assert_eq!(store.reserve_nonce(&deployer).unwrap(), 1);
        assert_eq!(store.next_nonce(&deployer).unwrap(), 2);
    }

    #[test]
    fn test_missing_contract() {
        let store = ContractStore::new();
        assert!(matches!(
            store.entry(&Address::zero()),
            Err(ContractError::ContractNotFound(_))
        ));
        assert!(store.get(&Address::zero()).unwrap().is_none());
    }
}
