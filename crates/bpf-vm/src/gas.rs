// bpf-vm/src/gas.rs

use crate::error::BpfError;
use blockchain_core::Gas;
use serde::{Deserialize, Serialize};

/// Gas costs for native instructions, host calls and EVM opcodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasSchedule {
    /// Base cost of every native instruction
    pub instruction: Gas,
    /// LOAD/STORE surcharge per started 8-byte word
    pub memory_word: Gas,
    /// Extra cost of entering a local function frame
    pub call_frame: Gas,
    /// Storage read (host call or SLOAD)
    pub storage_read: Gas,
    /// Storage write (host call or SSTORE)
    pub storage_write: Gas,
    /// Storage delete host call
    pub storage_delete: Gas,
    /// Keccak-256 base cost
    pub hash_base: Gas,
    /// Keccak-256 cost per 32-byte word
    pub hash_word: Gas,
    /// Environment reads (caller, block number, gas left...)
    pub env_read: Gas,
    /// EVM memory expansion cost per 32-byte word
    pub evm_memory_word: Gas,
    /// EVM copy cost per 32-byte word (CALLDATACOPY, CODECOPY)
    pub evm_copy_word: Gas,
    /// EVM EXP cost per exponent byte
    pub evm_exp_byte: Gas,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self::standard()
    }
}

impl GasSchedule {
    pub fn standard() -> Self {
        Self {
            instruction: 1,
            memory_word: 1,
            call_frame: 5,
            storage_read: 200,
            storage_write: 5000,
            storage_delete: 5000,
            hash_base: 30,
            hash_word: 6,
            env_read: 2,
            evm_memory_word: 3,
            evm_copy_word: 3,
            evm_exp_byte: 50,
        }
    }

    /// Total cost of a LOAD/STORE (or memory return) touching `size` bytes
    pub fn memory_access_cost(&self, size: u64) -> Gas {
        self.instruction
            .saturating_add(words(size, 8).saturating_mul(self.memory_word))
    }

    /// Cost of hashing `len` bytes
    pub fn hash_cost(&self, len: u64) -> Gas {
        self.hash_base
            .saturating_add(words(len, 32).saturating_mul(self.hash_word))
    }

    /// Cost of copying `len` bytes inside EVM memory
    pub fn evm_copy_cost(&self, len: u64) -> Gas {
        words(len, 32).saturating_mul(self.evm_copy_word)
    }

    /// EVM memory expansion cost: linear plus quadratic
    pub fn evm_memory_expansion_cost(&self, current_size: u64, new_size: u64) -> Gas {
        if new_size <= current_size {
            return 0;
        }

        let new_words = words(new_size, 32);
        let current_words = words(current_size, 32);
        let words_diff = new_words - current_words;

        let linear_cost = words_diff.saturating_mul(self.evm_memory_word);
        let quadratic_cost = new_words.saturating_mul(new_words) / 512;
        let current_quadratic = current_words.saturating_mul(current_words) / 512;

        linear_cost.saturating_add(quadratic_cost.saturating_sub(current_quadratic))
    }

    /// Static part of an EVM opcode's cost; dynamic parts are charged by the interpreter
    pub fn evm_opcode_cost(&self, opcode: u8) -> Gas {
        match opcode {
            // STOP, RETURN, REVERT, INVALID
            0x00 | 0xf3 | 0xfd | 0xfe => 1,
            // ADD, SUB, comparison, bitwise, shifts, CALLDATALOAD, MLOAD, MSTORE, PUSH, DUP, SWAP
            0x01 | 0x03 | 0x10..=0x1d | 0x35 | 0x51..=0x53 | 0x5f..=0x9f => 3,
            // MUL, DIV, SDIV, MOD, SMOD, SIGNEXTEND
            0x02 | 0x04..=0x07 | 0x0b => 5,
            // ADDMOD, MULMOD, JUMP
            0x08 | 0x09 | 0x56 => 8,
            // EXP, JUMPI
            0x0a | 0x57 => 10,
            0x20 => self.hash_base,
            0x54 => self.storage_read,
            0x55 => self.storage_write,
            // environment reads, POP, PC, MSIZE, GAS, CALLDATACOPY/CODECOPY base
            0x30..=0x3f | 0x40..=0x4a | 0x50 | 0x58..=0x5a => 2,
            // JUMPDEST and anything the interpreter rejects
            _ => 1,
        }
    }
}

fn words(len: u64, word: u64) -> u64 {
    len / word + u64::from(len % word != 0)
}

/// Gas meter for tracking usage during execution
#[derive(Debug, Clone)]
pub struct GasMeter {
    limit: Gas,
    used: Gas,
}

impl GasMeter {
    pub fn new(limit: Gas) -> Self {
        Self { limit, used: 0 }
    }

    /// Charge `amount` before the operation it pays for takes effect
    ///
    /// Running out consumes the whole limit.
    pub fn consume(&mut self, amount: Gas) -> Result<(), BpfError> {
        match self.used.checked_add(amount) {
            Some(total) if total <= self.limit => {
                self.used = total;
                Ok(())
            }
            total => {
                self.used = self.limit;
                Err(BpfError::Gas {
                    required: total.unwrap_or(Gas::MAX),
                    limit: self.limit,
                })
            }
        }
    }

    pub fn remaining(&self) -> Gas {
        self.limit.saturating_sub(self.used)
    }

    pub fn used(&self) -> Gas {
        self.used
    }

    pub fn limit(&self) -> Gas {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_access_cost() {
        let schedule = GasSchedule::standard();
        assert_eq!(schedule.memory_access_cost(1), 2);
        assert_eq!(schedule.memory_access_cost(8), 2);
        assert_eq!(schedule.memory_access_cost(9), 3);
    }

    #[test]
    fn test_memory_expansion() {
        let schedule = GasSchedule::standard();

        assert_eq!(schedule.evm_memory_expansion_cost(0, 32), 3);
        assert_eq!(schedule.evm_memory_expansion_cost(64, 64), 0);
        assert_eq!(schedule.evm_memory_expansion_cost(64, 32), 0);

        // 1024 words: 3 * 1024 + 1024^2 / 512
        assert_eq!(schedule.evm_memory_expansion_cost(0, 32 * 1024), 3072 + 2048);
    }

    #[test]
    fn test_hash_cost() {
        let schedule = GasSchedule::standard();
        assert_eq!(schedule.hash_cost(0), 30);
        assert_eq!(schedule.hash_cost(32), 36);
        assert_eq!(schedule.hash_cost(33), 42);
    }

    #[test]
    fn test_storage_tiers() {
        let schedule = GasSchedule::standard();
        assert_eq!(schedule.evm_opcode_cost(0x54), 200);
        assert_eq!(schedule.evm_opcode_cost(0x55), 5000);
        assert_eq!(schedule.evm_opcode_cost(0x01), 3);
        assert!((0u8..=255).all(|op| schedule.evm_opcode_cost(op) >= 1));
    }

    #[test]
    fn test_gas_meter() {
        let mut meter = GasMeter::new(100_000);

        meter.consume(21_000).unwrap();
        assert_eq!(meter.used(), 21_000);
        assert_eq!(meter.remaining(), 79_000);
    }

    #[test]
    fn test_out_of_gas_consumes_limit() {
        let mut meter = GasMeter::new(10);
        meter.consume(4).unwrap();

        let err = meter.consume(50).unwrap_err();
        assert_eq!(err, BpfError::Gas { required: 54, limit: 10 });
        assert_eq!(meter.used(), 10);
        assert_eq!(meter.remaining(), 0);
    }

    #[test]
    fn test_overflowing_charge() {
        let mut meter = GasMeter::new(10);
        assert!(matches!(
            meter.consume(Gas::MAX),
            Err(BpfError::Gas { required: Gas::MAX, .. })
        ));
    }
}
