// bpf-vm/src/evm.rs

//! EVM compatibility interpreter.
//!
//! Runs Solidity compiler output inside the same sandbox as native code:
//! same memory bound, same instruction and time budget, same gas meter
//! and the same storage overlay. Anything reaching outside the running
//! contract (calls, creates, logs, balances) is refused.

use crate::{
    error::{BpfError, ExecutionFault, MemoryFault, SecurityViolation},
    gas::{GasMeter, GasSchedule},
    memory::Memory,
    state::StorageAccess,
    vm::{ExecutionContext, ExecutionLimits, ExecutionResult},
};
use blockchain_core::Gas;
use blockchain_crypto::{keccak256, Address};
use ethers_core::types::{U256, U512};
use std::time::Instant;

/// Maximum number of items on the operand stack
pub const STACK_LIMIT: usize = 1024;

const WORD: u64 = 32;

/// EVM bytecode interpreter
#[derive(Debug, Clone, Default)]
pub struct EvmInterpreter {
    limits: ExecutionLimits,
    schedule: GasSchedule,
}

impl EvmInterpreter {
    pub fn new(limits: ExecutionLimits, schedule: GasSchedule) -> Self {
        Self { limits, schedule }
    }

    /// Run `code` with `ctx.input` as calldata
    pub fn execute(
        &self,
        code: &[u8],
        ctx: &ExecutionContext,
        storage: &mut dyn StorageAccess,
    ) -> ExecutionResult {
        let mut interpreter = Interpreter {
            code,
            jumpdests: jumpdest_map(code),
            limits: &self.limits,
            schedule: &self.schedule,
            ctx,
            storage,
            stack: Vec::with_capacity(64),
            memory: Memory::new(self.limits.max_memory),
            meter: GasMeter::new(ctx.gas_limit),
            pc: 0,
            instructions: 0,
            started: Instant::now(),
        };
        let outcome = interpreter.run();
        ExecutionResult::from_run(outcome, &interpreter.meter, interpreter.instructions)
    }
}

/// Positions holding a JUMPDEST opcode (not PUSH data)
fn jumpdest_map(code: &[u8]) -> Vec<bool> {
    let mut map = vec![false; code.len()];
    let mut pc = 0;
    while pc < code.len() {
        let op = code[pc];
        if op == 0x5b {
            map[pc] = true;
        }
        pc += 1;
        if (0x60..=0x7f).contains(&op) {
            pc += usize::from(op - 0x5f);
        }
    }
    map
}

/// Names of opcodes that exist in the EVM but are not available here
fn unsupported_name(op: u8) -> Option<&'static str> {
    let name = match op {
        0x31 => "BALANCE",
        0x3a => "GASPRICE",
        0x3b => "EXTCODESIZE",
        0x3c => "EXTCODECOPY",
        0x3e => "RETURNDATACOPY",
        0x3f => "EXTCODEHASH",
        0x40 => "BLOCKHASH",
        0x41 => "COINBASE",
        0x44 => "PREVRANDAO",
        0x45 => "GASLIMIT",
        0x48 => "BASEFEE",
        0x49 => "BLOBHASH",
        0x4a => "BLOBBASEFEE",
        0x5c => "TLOAD",
        0x5d => "TSTORE",
        0x5e => "MCOPY",
        0xa0 => "LOG0",
        0xa1 => "LOG1",
        0xa2 => "LOG2",
        0xa3 => "LOG3",
        0xa4 => "LOG4",
        _ => return None,
    };
    Some(name)
}

/// Opcodes that would call or create other contracts
fn external_operation(op: u8) -> Option<&'static str> {
    let name = match op {
        0xf0 => "CREATE",
        0xf1 => "CALL",
        0xf2 => "CALLCODE",
        0xf4 => "DELEGATECALL",
        0xf5 => "CREATE2",
        0xfa => "STATICCALL",
        0xff => "SELFDESTRUCT",
        _ => return None,
    };
    Some(name)
}

fn address_word(address: &Address) -> U256 {
    U256::from_big_endian(address.as_bytes())
}

fn to_word(value: U256) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    bytes
}

fn to_u64(value: U256) -> Option<u64> {
    if value > U256::from(u64::MAX) {
        None
    } else {
        Some(value.low_u64())
    }
}

fn is_negative(value: U256) -> bool {
    value.bit(255)
}

fn negate(value: U256) -> U256 {
    (!value).overflowing_add(U256::one()).0
}

fn abs(value: U256) -> U256 {
    if is_negative(value) {
        negate(value)
    } else {
        value
    }
}

fn low_u256(value: U512) -> U256 {
    let mut bytes = [0u8; 64];
    value.to_big_endian(&mut bytes);
    U256::from_big_endian(&bytes[32..])
}

fn bool_word(condition: bool) -> U256 {
    if condition {
        U256::one()
    } else {
        U256::zero()
    }
}

/// Copy `len` bytes of `source` starting at `offset`, zero-padded past its end
fn padded_slice(source: &[u8], offset: U256, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    if let Some(start) = to_u64(offset).and_then(|o| usize::try_from(o).ok()) {
        if start < source.len() {
            let available = (source.len() - start).min(len);
            out[..available].copy_from_slice(&source[start..start + available]);
        }
    }
    out
}

struct Interpreter<'a> {
    code: &'a [u8],
    jumpdests: Vec<bool>,
    limits: &'a ExecutionLimits,
    schedule: &'a GasSchedule,
    ctx: &'a ExecutionContext,
    storage: &'a mut dyn StorageAccess,
    stack: Vec<U256>,
    memory: Memory,
    meter: GasMeter,
    pc: usize,
    instructions: u64,
    started: Instant,
}

impl<'a> Interpreter<'a> {
    fn run(&mut self) -> Result<Vec<u8>, BpfError> {
        loop {
            if self.instructions >= self.limits.max_instructions {
                return Err(BpfError::Resource {
                    executed: self.instructions,
                    limit: self.limits.max_instructions,
                });
            }

            if self.instructions % self.limits.time_check_interval.max(1) == 0 {
                let elapsed = self.started.elapsed();
                if elapsed > self.limits.max_execution_time {
                    return Err(BpfError::Timeout {
                        elapsed_ms: elapsed.as_millis() as u64,
                        limit_ms: self.limits.max_execution_time.as_millis() as u64,
                    });
                }
            }

            // Implicit STOP past the end of code
            let op = match self.code.get(self.pc) {
                Some(op) => *op,
                None => return Ok(Vec::new()),
            };

            self.instructions += 1;
            self.meter.consume(self.schedule.evm_opcode_cost(op))?;

            if let Some(output) = self.step(op)? {
                return Ok(output);
            }
        }
    }

    fn pop(&mut self) -> Result<U256, BpfError> {
        self.stack
            .pop()
            .ok_or(BpfError::Execution(ExecutionFault::StackUnderflow { pc: self.pc }))
    }

    fn push(&mut self, value: U256) -> Result<(), BpfError> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(MemoryFault::StackOverflow { limit: STACK_LIMIT }.into());
        }
        self.stack.push(value);
        Ok(())
    }

    fn charge(&mut self, amount: Gas) -> Result<(), BpfError> {
        self.meter.consume(amount)
    }

    /// Bounds-check `[offset, offset + len)`, charge expansion and grow memory
    ///
    /// Zero-length ranges never expand memory, whatever their offset.
    fn expand(&mut self, offset: U256, len: U256) -> Result<(u64, u64), BpfError> {
        if len.is_zero() {
            return Ok((0, 0));
        }
        let limit = self.memory.limit() as u64;
        let (offset, len) = match (to_u64(offset), to_u64(len)) {
            (Some(offset), Some(len)) => (offset, len),
            _ => {
                return Err(BpfError::out_of_bounds(
                    to_u64(offset).unwrap_or(u64::MAX),
                    to_u64(len).unwrap_or(u64::MAX),
                    limit,
                ))
            }
        };
        self.memory.check(offset, len)?;

        let end = offset + len;
        let aligned_end = end.div_ceil(WORD) * WORD;
        let current = self.memory.size() as u64;
        if aligned_end > current {
            self.memory.check(0, aligned_end)?;
            self.charge(self.schedule.evm_memory_expansion_cost(current, aligned_end))?;
            self.memory.touch(0, aligned_end)?;
        }
        Ok((offset, len))
    }

    fn jump_to(&mut self, target: U256) -> Result<(), BpfError> {
        let destination = to_u64(target)
            .and_then(|t| usize::try_from(t).ok())
            .filter(|t| self.jumpdests.get(*t).copied().unwrap_or(false));
        match destination {
            Some(destination) => {
                self.pc = destination;
                Ok(())
            }
            None => Err(ExecutionFault::InvalidJump {
                target: to_u64(target).map(|t| t.min(i64::MAX as u64) as i64).unwrap_or(i64::MAX),
                pc: self.pc,
            }
            .into()),
        }
    }

    fn binary(&mut self, f: impl FnOnce(U256, U256) -> U256) -> Result<(), BpfError> {
        let a = self.pop()?;
        let b = self.pop()?;
        self.push(f(a, b))
    }

    fn copy_to_memory(&mut self, source_is_code: bool) -> Result<(), BpfError> {
        let dest = self.pop()?;
        let offset = self.pop()?;
        let len = self.pop()?;
        let (dest, len) = self.expand(dest, len)?;
        self.charge(self.schedule.evm_copy_cost(len))?;
        if len > 0 {
            let source: &[u8] = if source_is_code { self.code } else { &self.ctx.input };
            let data = padded_slice(source, offset, len as usize);
            self.memory.write(dest, &data)?;
        }
        Ok(())
    }

    fn memory_slice(&mut self) -> Result<Vec<u8>, BpfError> {
        let offset = self.pop()?;
        let len = self.pop()?;
        let (offset, len) = self.expand(offset, len)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        self.memory.read(offset, len)
    }

    /// Execute the opcode at `pc`; `Some` halts with return data
    fn step(&mut self, op: u8) -> Result<Option<Vec<u8>>, BpfError> {
        let pc = self.pc;
        let mut next_pc = pc + 1;

        match op {
            0x00 => return Ok(Some(Vec::new())),
            0x01 => self.binary(|a, b| a.overflowing_add(b).0)?,
            0x02 => self.binary(|a, b| a.overflowing_mul(b).0)?,
            0x03 => self.binary(|a, b| a.overflowing_sub(b).0)?,
            0x04 => self.binary(|a, b| a.checked_div(b).unwrap_or_default())?,
            0x05 => self.binary(|a, b| {
                if b.is_zero() {
                    return U256::zero();
                }
                let quotient = abs(a) / abs(b);
                if is_negative(a) != is_negative(b) {
                    negate(quotient)
                } else {
                    quotient
                }
            })?,
            0x06 => self.binary(|a, b| a.checked_rem(b).unwrap_or_default())?,
            0x07 => self.binary(|a, b| {
                if b.is_zero() {
                    return U256::zero();
                }
                let remainder = abs(a) % abs(b);
                if is_negative(a) {
                    negate(remainder)
                } else {
                    remainder
                }
            })?,
            0x08 | 0x09 => {
                let a = U512::from(self.pop()?);
                let b = U512::from(self.pop()?);
                let n = self.pop()?;
                let result = if n.is_zero() {
                    U256::zero()
                } else if op == 0x08 {
                    low_u256((a + b) % U512::from(n))
                } else {
                    low_u256((a * b) % U512::from(n))
                };
                self.push(result)?;
            }
            0x0a => {
                let base = self.pop()?;
                let exponent = self.pop()?;
                let exponent_bytes = (exponent.bits() as u64).div_ceil(8);
                self.charge(exponent_bytes.saturating_mul(self.schedule.evm_exp_byte))?;
                self.push(base.overflowing_pow(exponent).0)?;
            }
            0x0b => self.binary(|size, value| {
                if size >= U256::from(31) {
                    return value;
                }
                let bit = size.low_u64() as usize * 8 + 7;
                let mask = (U256::one() << bit) - U256::one();
                if value.bit(bit) {
                    value | !mask
                } else {
                    value & mask
                }
            })?,
            0x10 => self.binary(|a, b| bool_word(a < b))?,
            0x11 => self.binary(|a, b| bool_word(a > b))?,
            0x12 => self.binary(|a, b| bool_word(signed_lt(a, b)))?,
            0x13 => self.binary(|a, b| bool_word(signed_lt(b, a)))?,
            0x14 => self.binary(|a, b| bool_word(a == b))?,
            0x15 => {
                let a = self.pop()?;
                self.push(bool_word(a.is_zero()))?;
            }
            0x16 => self.binary(|a, b| a & b)?,
            0x17 => self.binary(|a, b| a | b)?,
            0x18 => self.binary(|a, b| a ^ b)?,
            0x19 => {
                let a = self.pop()?;
                self.push(!a)?;
            }
            0x1a => self.binary(|i, x| {
                if i >= U256::from(32) {
                    U256::zero()
                } else {
                    U256::from(x.byte(31 - i.low_u64() as usize))
                }
            })?,
            0x1b => self.binary(|shift, value| {
                if shift >= U256::from(256) {
                    U256::zero()
                } else {
                    value << shift.low_u64() as usize
                }
            })?,
            0x1c => self.binary(|shift, value| {
                if shift >= U256::from(256) {
                    U256::zero()
                } else {
                    value >> shift.low_u64() as usize
                }
            })?,
            0x1d => self.binary(|shift, value| {
                let negative = is_negative(value);
                if shift >= U256::from(256) {
                    if negative {
                        U256::MAX
                    } else {
                        U256::zero()
                    }
                } else if negative {
                    !((!value) >> shift.low_u64() as usize)
                } else {
                    value >> shift.low_u64() as usize
                }
            })?,
            0x20 => {
                let offset = self.pop()?;
                let len = self.pop()?;
                let (offset, len) = self.expand(offset, len)?;
                // hash_base already charged as the static cost
                self.charge(self.schedule.hash_cost(len).saturating_sub(self.schedule.hash_base))?;
                let data = if len == 0 { Vec::new() } else { self.memory.read(offset, len)? };
                self.push(U256::from_big_endian(&keccak256(&data)))?;
            }
            0x30 => self.push(address_word(&self.ctx.contract_address))?,
            0x32 => self.push(address_word(&self.ctx.origin))?,
            0x33 => self.push(address_word(&self.ctx.caller))?,
            // no value transfer: CALLVALUE, SELFBALANCE
            0x34 | 0x47 => self.push(U256::zero())?,
            0x35 => {
                let offset = self.pop()?;
                let word = padded_slice(&self.ctx.input, offset, 32);
                self.push(U256::from_big_endian(&word))?;
            }
            0x36 => self.push(U256::from(self.ctx.input.len()))?,
            0x37 => self.copy_to_memory(false)?,
            0x38 => self.push(U256::from(self.code.len()))?,
            0x39 => self.copy_to_memory(true)?,
            // no sub-calls, so the return buffer is always empty
            0x3d => self.push(U256::zero())?,
            0x42 => self.push(U256::from(self.ctx.block.timestamp))?,
            0x43 => self.push(U256::from(self.ctx.block.number))?,
            0x46 => self.push(U256::from(self.ctx.block.chain_id))?,
            0x50 => {
                self.pop()?;
            }
            0x51 => {
                let offset = self.pop()?;
                let (offset, _) = self.expand(offset, U256::from(WORD))?;
                let word = self.memory.read_word(offset)?;
                self.push(U256::from_big_endian(&word))?;
            }
            0x52 => {
                let offset = self.pop()?;
                let value = self.pop()?;
                let (offset, _) = self.expand(offset, U256::from(WORD))?;
                self.memory.write(offset, &to_word(value))?;
            }
            0x53 => {
                let offset = self.pop()?;
                let value = self.pop()?;
                let (offset, _) = self.expand(offset, U256::one())?;
                self.memory.write(offset, &[value.byte(0)])?;
            }
            0x54 => {
                let key = to_word(self.pop()?);
                let value = self.storage.load(&key);
                self.push(U256::from_big_endian(&value))?;
            }
            0x55 => {
                let key = to_word(self.pop()?);
                let value = to_word(self.pop()?);
                self.storage.store(key, value);
            }
            0x56 => {
                let target = self.pop()?;
                self.jump_to(target)?;
                return Ok(None);
            }
            0x57 => {
                let target = self.pop()?;
                let condition = self.pop()?;
                if !condition.is_zero() {
                    self.jump_to(target)?;
                    return Ok(None);
                }
            }
            0x58 => self.push(U256::from(pc))?,
            0x59 => self.push(U256::from(self.memory.size()))?,
            0x5a => self.push(U256::from(self.meter.remaining()))?,
            0x5b => {}
            0x5f => self.push(U256::zero())?,
            0x60..=0x7f => {
                let n = usize::from(op - 0x5f);
                let mut word = [0u8; 32];
                let start = pc + 1;
                let available = self.code.len().saturating_sub(start).min(n);
                word[32 - n..32 - n + available].copy_from_slice(&self.code[start..start + available]);
                self.push(U256::from_big_endian(&word))?;
                next_pc = start + n;
            }
            0x80..=0x8f => {
                let depth = usize::from(op - 0x7f);
                let value = self
                    .stack
                    .len()
                    .checked_sub(depth)
                    .map(|i| self.stack[i])
                    .ok_or(BpfError::Execution(ExecutionFault::StackUnderflow { pc }))?;
                self.push(value)?;
            }
            0x90..=0x9f => {
                let depth = usize::from(op - 0x8f);
                let top = self.stack.len().checked_sub(1);
                let other = self.stack.len().checked_sub(depth + 1);
                match (top, other) {
                    (Some(top), Some(other)) => self.stack.swap(top, other),
                    _ => return Err(ExecutionFault::StackUnderflow { pc }.into()),
                }
            }
            0xf3 => return self.memory_slice().map(Some),
            0xfd => {
                let data = self.memory_slice()?;
                return Err(ExecutionFault::Reverted(data).into());
            }
            _ => {
                if let Some(operation) = external_operation(op) {
                    return Err(SecurityViolation::ExternalCall { operation }.into());
                }
                if let Some(name) = unsupported_name(op) {
                    return Err(ExecutionFault::UnsupportedOpcode { opcode: op, name, pc }.into());
                }
                // 0xfe INVALID and unassigned opcodes
                return Err(ExecutionFault::InvalidOpcode { opcode: op, pc }.into());
            }
        }

        self.pc = next_pc;
        Ok(None)
    }
}

fn signed_lt(a: U256, b: U256) -> bool {
    match (is_negative(a), is_negative(b)) {
        (true, false) => true,
        (false, true) => false,
        _ => a < b,
    }
}
