// bpf-vm/src/vm.rs

use crate::{
    error::{BpfError, ExecutionFault, MemoryFault, SecurityViolation},
    gas::{GasMeter, GasSchedule},
    isa::*,
    memory::{Memory, MAX_MEMORY},
    state::{slot_key, u64_word, word_low_u64, Changeset, StorageAccess, ZERO_WORD},
};
use blockchain_core::{BlockNumber, Gas, Timestamp};
use blockchain_crypto::{keccak256, Address};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Host call ids reachable through `CALL imm` with `src = 0`
pub mod helper {
    pub const STORAGE_LOAD: i32 = 1;
    pub const STORAGE_STORE: i32 = 2;
    pub const STORAGE_DELETE: i32 = 3;
    /// Wall clock; refused because it differs between nodes
    pub const KTIME_GET_NS: i32 = 5;
    /// Randomness; refused because it differs between nodes
    pub const GET_PRANDOM_U32: i32 = 7;
    pub const CALLER: i32 = 0x10;
    pub const SELF_ADDRESS: i32 = 0x11;
    pub const BLOCK_NUMBER: i32 = 0x12;
    pub const BLOCK_TIMESTAMP: i32 = 0x13;
    pub const INPUT_SIZE: i32 = 0x14;
    pub const GAS_REMAINING: i32 = 0x15;
    pub const KECCAK256: i32 = 0x16;
    pub const STORAGE_LOAD_WORD: i32 = 0x17;
    pub const STORAGE_STORE_WORD: i32 = 0x18;
    pub const CONTRACT_CALL: i32 = 0x20;
}

/// Bytes reserved per local call frame below r10
pub const FRAME_SIZE: u64 = 512;

/// Execution budget shared by both interpreters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub max_instructions: u64,
    pub max_execution_time: Duration,
    pub max_memory: usize,
    pub max_call_depth: usize,
    /// Wall clock is sampled once every this many instructions
    pub time_check_interval: u64,
    pub max_input_size: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_instructions: 10_000,
            max_execution_time: Duration::from_secs(5),
            max_memory: MAX_MEMORY,
            max_call_depth: 256,
            time_check_interval: 256,
            max_input_size: 16 * 1024,
        }
    }
}

/// Block data visible to contracts; set by the host, never read from the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockContext {
    pub number: BlockNumber,
    pub timestamp: Timestamp,
    pub chain_id: u64,
}

/// Per-call environment
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub contract_address: Address,
    pub caller: Address,
    /// Account that started the transaction
    pub origin: Address,
    pub gas_limit: Gas,
    pub block: BlockContext,
    /// Native: r1 at entry, 0 for the constructor
    pub selector: u32,
    /// Native: ABI-encoded arguments placed at memory offset 0.
    /// EVM: the full calldata.
    pub input: Vec<u8>,
    /// Native: r2..r5 at entry
    pub register_args: [u64; 4],
}

impl ExecutionContext {
    pub fn new_call(contract_address: Address, caller: Address, gas_limit: Gas) -> Self {
        Self {
            contract_address,
            caller,
            origin: caller,
            gas_limit,
            block: BlockContext::default(),
            selector: 0,
            input: Vec::new(),
            register_args: [0; 4],
        }
    }

    pub fn with_block(mut self, block: BlockContext) -> Self {
        self.block = block;
        self
    }

    pub fn with_call(mut self, selector: u32, input: Vec<u8>, register_args: [u64; 4]) -> Self {
        self.selector = selector;
        self.input = input;
        self.register_args = register_args;
        self
    }

    pub fn with_input(mut self, input: Vec<u8>) -> Self {
        self.input = input;
        self
    }
}

/// Outcome of running bytecode
///
/// Failures are data here: the error says why, `gas_used` says what was
/// charged. `changeset` and `return_value` are filled in by the executor.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub gas_used: Gas,
    pub return_data: Vec<u8>,
    /// Return data decoded against the function's outputs
    pub return_value: Value,
    pub error: Option<BpfError>,
    pub instructions_executed: u64,
    /// Set on successful deployments
    pub contract_address: Option<Address>,
    /// Writes to commit (or committed) on success
    pub changeset: Option<Changeset>,
}

impl ExecutionResult {
    pub(crate) fn from_run(
        outcome: Result<Vec<u8>, BpfError>,
        meter: &GasMeter,
        instructions_executed: u64,
    ) -> Self {
        let (success, return_data, error) = match outcome {
            Ok(data) => (true, data, None),
            Err(err) => (false, err.revert_data().map(<[u8]>::to_vec).unwrap_or_default(), Some(err)),
        };
        Self {
            success,
            gas_used: meter.used(),
            return_data,
            return_value: Value::Null,
            error,
            instructions_executed,
            contract_address: None,
            changeset: None,
        }
    }

    /// Result of a step that ran no bytecode (e.g. a constructor-less deployment)
    pub fn empty_success() -> Self {
        Self {
            success: true,
            gas_used: 0,
            return_data: Vec::new(),
            return_value: Value::Null,
            error: None,
            instructions_executed: 0,
            contract_address: None,
            changeset: None,
        }
    }

    pub fn error_kind(&self) -> Option<&'static str> {
        self.error.as_ref().map(BpfError::kind)
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Native bytecode interpreter
#[derive(Debug, Clone, Default)]
pub struct BpfVm {
    limits: ExecutionLimits,
    schedule: GasSchedule,
}

impl BpfVm {
    pub fn new(limits: ExecutionLimits, schedule: GasSchedule) -> Self {
        Self { limits, schedule }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    pub fn schedule(&self) -> &GasSchedule {
        &self.schedule
    }

    /// Run `bytecode` to completion, trap or budget exhaustion
    ///
    /// Storage writes go to `storage`; the caller decides whether to keep them.
    pub fn execute(
        &self,
        bytecode: &[u8],
        ctx: &ExecutionContext,
        storage: &mut dyn StorageAccess,
    ) -> ExecutionResult {
        let mut machine = Machine::new(self, bytecode, ctx, storage);
        let outcome = machine.load_input().and_then(|_| machine.run());
        ExecutionResult::from_run(outcome, &machine.meter, machine.instructions)
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    saved: [u64; 4],
    frame_pointer: u64,
    return_pc: usize,
}

struct Machine<'a> {
    program: Program<'a>,
    limits: &'a ExecutionLimits,
    schedule: &'a GasSchedule,
    ctx: &'a ExecutionContext,
    storage: &'a mut dyn StorageAccess,
    registers: [u64; REGISTER_COUNT],
    memory: Memory,
    frames: Vec<Frame>,
    meter: GasMeter,
    pc: usize,
    instructions: u64,
    started: Instant,
}

impl<'a> Machine<'a> {
    fn new(
        vm: &'a BpfVm,
        code: &'a [u8],
        ctx: &'a ExecutionContext,
        storage: &'a mut dyn StorageAccess,
    ) -> Self {
        let mut registers = [0u64; REGISTER_COUNT];
        registers[1] = u64::from(ctx.selector);
        registers[2..6].copy_from_slice(&ctx.register_args);
        registers[FRAME_POINTER as usize] = vm.limits.max_memory as u64;

        Self {
            program: Program::unchecked(code),
            limits: &vm.limits,
            schedule: &vm.schedule,
            ctx,
            storage,
            registers,
            memory: Memory::new(vm.limits.max_memory),
            frames: Vec::new(),
            meter: GasMeter::new(ctx.gas_limit),
            pc: 0,
            instructions: 0,
            started: Instant::now(),
        }
    }

    fn load_input(&mut self) -> Result<(), BpfError> {
        self.memory.write(0, &self.ctx.input)
    }

    fn program_len(&self) -> usize {
        self.program.len()
    }

    fn fetch(&self) -> Option<Instruction> {
        self.program.fetch(self.pc)
    }

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

            // Falling off the end returns zero
            let insn = match self.fetch() {
                Some(insn) => insn,
                None => return Ok(u64_word(0).to_vec()),
            };

            self.instructions += 1;
            self.meter.consume(self.base_cost(&insn))?;

            if let Some(output) = self.step(insn)? {
                return Ok(output);
            }
        }
    }

    fn base_cost(&self, insn: &Instruction) -> Gas {
        match insn.class() {
            CLASS_LDX | CLASS_ST | CLASS_STX => self.schedule.memory_access_cost(insn.access_size() as u64),
            CLASS_JMP if insn.opcode == CALL && insn.src == CALL_LOCAL => {
                self.schedule.instruction + self.schedule.call_frame
            }
            _ => self.schedule.instruction,
        }
    }

    fn reg(&self, index: u8) -> Result<u64, BpfError> {
        self.registers
            .get(index as usize)
            .copied()
            .ok_or(BpfError::Execution(ExecutionFault::InvalidRegister {
                register: index,
                pc: self.pc,
            }))
    }

    fn set_reg(&mut self, index: u8, value: u64) -> Result<(), BpfError> {
        if index == FRAME_POINTER {
            return Err(ExecutionFault::ReadOnlyRegister { pc: self.pc }.into());
        }
        let pc = self.pc;
        let slot = self
            .registers
            .get_mut(index as usize)
            .ok_or(BpfError::Execution(ExecutionFault::InvalidRegister { register: index, pc }))?;
        *slot = value;
        Ok(())
    }

    /// base + signed offset, rejecting anything below zero or past u64
    fn effective_address(&self, base: u64, offset: i16, len: usize) -> Result<u64, BpfError> {
        let address = i128::from(base) + i128::from(offset);
        u64::try_from(address)
            .map_err(|_| BpfError::out_of_bounds(base, len as u64, self.memory.limit() as u64))
    }

    fn jump(&mut self, offset: i64) -> Result<(), BpfError> {
        let target = self.pc as i64 + 1 + offset;
        if target < 0 || target >= self.program_len() as i64 {
            return Err(ExecutionFault::InvalidJump { target, pc: self.pc }.into());
        }
        self.pc = target as usize;
        Ok(())
    }

    fn invalid_opcode(&self, insn: &Instruction) -> BpfError {
        ExecutionFault::InvalidOpcode {
            opcode: insn.opcode,
            pc: self.pc,
        }
        .into()
    }

    /// Execute one instruction; `Some` ends the program with return data
    fn step(&mut self, insn: Instruction) -> Result<Option<Vec<u8>>, BpfError> {
        match insn.class() {
            CLASS_LD => {
                let value = match insn.opcode {
                    LD_IMM => i64::from(insn.imm) as u64,
                    LD_HI => (self.reg(insn.dst)? & 0xffff_ffff) | (u64::from(insn.imm as u32) << 32),
                    _ => return Err(self.invalid_opcode(&insn)),
                };
                self.set_reg(insn.dst, value)?;
            }
            CLASS_LDX => {
                if !is_known_opcode(insn.opcode) {
                    return Err(self.invalid_opcode(&insn));
                }
                let size = insn.access_size();
                let address = self.effective_address(self.reg(insn.src)?, insn.offset, size)?;
                let value = self.memory.load(address, size)?;
                self.set_reg(insn.dst, value)?;
            }
            CLASS_ST | CLASS_STX => {
                if !is_known_opcode(insn.opcode) {
                    return Err(self.invalid_opcode(&insn));
                }
                let size = insn.access_size();
                let value = if insn.class() == CLASS_STX {
                    self.reg(insn.src)?
                } else {
                    i64::from(insn.imm) as u64
                };
                let address = self.effective_address(self.reg(insn.dst)?, insn.offset, size)?;
                self.memory.store(address, size, value)?;
            }
            CLASS_ALU => {
                let value = self.alu(&insn)?;
                self.set_reg(insn.dst, value)?;
            }
            CLASS_JMP => return self.branch(insn),
            CLASS_RET => return self.ret(&insn).map(Some),
            _ => return Err(self.invalid_opcode(&insn)),
        }

        self.pc += 1;
        Ok(None)
    }

    fn operand(&self, insn: &Instruction) -> Result<u64, BpfError> {
        if insn.uses_register_source() {
            self.reg(insn.src)
        } else {
            Ok(i64::from(insn.imm) as u64)
        }
    }

    fn alu(&self, insn: &Instruction) -> Result<u64, BpfError> {
        let dst = self.reg(insn.dst)?;
        let src = self.operand(insn)?;
        let division_by_zero = || BpfError::Execution(ExecutionFault::DivisionByZero { pc: self.pc });

        let value = match insn.opcode & 0xf0 {
            ALU_ADD => dst.wrapping_add(src),
            ALU_SUB => dst.wrapping_sub(src),
            ALU_MUL => dst.wrapping_mul(src),
            ALU_DIV => dst.checked_div(src).ok_or_else(division_by_zero)?,
            ALU_OR => dst | src,
            ALU_AND => dst & src,
            ALU_LSH => dst.wrapping_shl((src & 63) as u32),
            ALU_RSH => dst.wrapping_shr((src & 63) as u32),
            ALU_NEG => (dst as i64).wrapping_neg() as u64,
            ALU_MOD => dst.checked_rem(src).ok_or_else(division_by_zero)?,
            ALU_XOR => dst ^ src,
            ALU_MOV => src,
            ALU_ARSH => ((dst as i64) >> (src & 63)) as u64,
            _ => return Err(self.invalid_opcode(insn)),
        };
        Ok(value)
    }

    fn branch(&mut self, insn: Instruction) -> Result<Option<Vec<u8>>, BpfError> {
        let op = insn.opcode & 0xf0;

        match insn.opcode {
            JA => {
                self.jump(i64::from(insn.offset))?;
                return Ok(None);
            }
            CALL => {
                match insn.src {
                    0 => {
                        self.call_helper(insn.imm)?;
                        self.pc += 1;
                    }
                    CALL_LOCAL => self.call_local(insn.imm)?,
                    _ => return Err(self.invalid_opcode(&insn)),
                }
                return Ok(None);
            }
            EXIT => return Ok(self.exit()?),
            _ => {}
        }

        if insn.opcode & SRC_REG != 0 && matches!(op, JMP_JA | JMP_CALL | JMP_EXIT) {
            return Err(self.invalid_opcode(&insn));
        }

        let a = self.reg(insn.dst)?;
        let b = self.operand(&insn)?;
        let taken = match op {
            JMP_JEQ => a == b,
            JMP_JGT => a > b,
            JMP_JGE => a >= b,
            JMP_JSET => a & b != 0,
            JMP_JNE => a != b,
            JMP_JSGT => (a as i64) > (b as i64),
            JMP_JSGE => (a as i64) >= (b as i64),
            JMP_JLT => a < b,
            JMP_JLE => a <= b,
            JMP_JSLT => (a as i64) < (b as i64),
            JMP_JSLE => (a as i64) <= (b as i64),
            _ => return Err(self.invalid_opcode(&insn)),
        };

        if taken {
            self.jump(i64::from(insn.offset))?;
        } else {
            self.pc += 1;
        }
        Ok(None)
    }

    fn call_local(&mut self, imm: i32) -> Result<(), BpfError> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(MemoryFault::CallDepthExceeded {
                depth: self.frames.len() + 1,
                limit: self.limits.max_call_depth,
            }
            .into());
        }

        let frame_pointer = self.registers[FRAME_POINTER as usize];
        let mut saved = [0u64; 4];
        saved.copy_from_slice(&self.registers[6..10]);
        let return_pc = self.pc + 1;

        self.jump(i64::from(imm))?;
        self.frames.push(Frame {
            saved,
            frame_pointer,
            return_pc,
        });
        self.registers[FRAME_POINTER as usize] = frame_pointer.saturating_sub(FRAME_SIZE);
        Ok(())
    }

    fn exit(&mut self) -> Result<Option<Vec<u8>>, BpfError> {
        match self.frames.pop() {
            Some(frame) => {
                self.registers[6..10].copy_from_slice(&frame.saved);
                self.registers[FRAME_POINTER as usize] = frame.frame_pointer;
                self.pc = frame.return_pc;
                Ok(None)
            }
            None => Ok(Some(u64_word(self.registers[0]).to_vec())),
        }
    }

    fn ret(&mut self, insn: &Instruction) -> Result<Vec<u8>, BpfError> {
        match insn.opcode {
            RET_R0 => Ok(u64_word(self.registers[0]).to_vec()),
            RET_MEM => {
                let len = self.reg(insn.src)?;
                // base instruction already charged
                let surcharge = self
                    .schedule
                    .memory_access_cost(len)
                    .saturating_sub(self.schedule.instruction);
                self.meter.consume(surcharge)?;
                let address = self.effective_address(self.reg(insn.dst)?, insn.offset, 0)?;
                self.memory.read(address, len)
            }
            _ => Err(self.invalid_opcode(insn)),
        }
    }

    fn call_helper(&mut self, id: i32) -> Result<(), BpfError> {
        let r1 = self.registers[1];
        let r2 = self.registers[2];
        let r3 = self.registers[3];
        let schedule = self.schedule;

        let r0 = match id {
            helper::STORAGE_LOAD => {
                self.meter.consume(schedule.storage_read)?;
                word_low_u64(&self.storage.load(&slot_key(r1)))
            }
            helper::STORAGE_STORE => {
                self.meter.consume(schedule.storage_write)?;
                self.storage.store(slot_key(r1), u64_word(r2));
                0
            }
            helper::STORAGE_DELETE => {
                self.meter.consume(schedule.storage_delete)?;
                self.storage.store(slot_key(r1), ZERO_WORD);
                0
            }
            helper::KTIME_GET_NS => {
                return Err(SecurityViolation::NonDeterministic { helper: "ktime_get_ns" }.into())
            }
            helper::GET_PRANDOM_U32 => {
                return Err(SecurityViolation::NonDeterministic { helper: "get_prandom_u32" }.into())
            }
            helper::CALLER => {
                self.meter.consume(schedule.env_read)?;
                self.memory.write(r1, self.ctx.caller.as_bytes())?;
                0
            }
            helper::SELF_ADDRESS => {
                self.meter.consume(schedule.env_read)?;
                self.memory.write(r1, self.ctx.contract_address.as_bytes())?;
                0
            }
            helper::BLOCK_NUMBER => {
                self.meter.consume(schedule.env_read)?;
                self.ctx.block.number
            }
            helper::BLOCK_TIMESTAMP => {
                self.meter.consume(schedule.env_read)?;
                self.ctx.block.timestamp
            }
            helper::INPUT_SIZE => {
                self.meter.consume(schedule.env_read)?;
                self.ctx.input.len() as u64
            }
            helper::GAS_REMAINING => {
                self.meter.consume(schedule.env_read)?;
                self.meter.remaining()
            }
            helper::KECCAK256 => {
                self.meter.consume(schedule.hash_cost(r2))?;
                let data = self.memory.read(r1, r2)?;
                self.memory.write(r3, &keccak256(&data))?;
                0
            }
            helper::STORAGE_LOAD_WORD => {
                self.meter.consume(schedule.storage_read)?;
                let key = self.memory.read_word(r1)?;
                self.memory.check(r2, 32)?;
                let value = self.storage.load(&key);
                self.memory.write(r2, &value)?;
                0
            }
            helper::STORAGE_STORE_WORD => {
                self.meter.consume(schedule.storage_write)?;
                let key = self.memory.read_word(r1)?;
                let value = self.memory.read_word(r2)?;
                self.storage.store(key, value);
                0
            }
            helper::CONTRACT_CALL => {
                return Err(SecurityViolation::ExternalCall {
                    operation: "inter-contract call",
                }
                .into())
            }
            other => {
                return Err(SecurityViolation::DisallowedHelper { id: i64::from(other) }.into())
            }
        };

        self.registers[0] = r0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{self, Reg};
    use crate::state::{StorageMap, StorageOverlay};
    use proptest::prelude::*;

    fn run_with(code: &[u8], ctx: ExecutionContext, limits: ExecutionLimits) -> (ExecutionResult, Changeset) {
        let base = StorageMap::new();
        let mut overlay = StorageOverlay::new(ctx.contract_address, &base);
        let vm = BpfVm::new(limits, GasSchedule::standard());
        let result = vm.execute(code, &ctx, &mut overlay);
        (result, overlay.finish())
    }

    fn run(code: &[u8], gas_limit: Gas) -> ExecutionResult {
        let ctx = ExecutionContext::new_call(Address::zero(), Address::zero(), gas_limit);
        run_with(code, ctx, ExecutionLimits::default()).0
    }

    fn returned_u64(result: &ExecutionResult) -> u64 {
        let mut word = [0u8; 32];
        word.copy_from_slice(&result.return_data);
        word_low_u64(&word)
    }

    #[test]
    fn test_arithmetic_and_exit() {
        let code = asm::assemble(&[
            asm::mov_imm(Reg::R0, 6),
            asm::alu_imm(ALU_MUL, Reg::R0, 7),
            asm::exit(),
        ]);
        let result = run(&code, 1000);
        assert!(result.success);
        assert_eq!(returned_u64(&result), 42);
        assert_eq!(result.instructions_executed, 3);
        assert_eq!(result.gas_used, 3);
    }

    #[test]
    fn test_falling_off_end_returns_zero() {
        let code = asm::assemble(&[asm::mov_imm(Reg::R0, 9)]);
        let result = run(&code, 1000);
        assert!(result.success);
        assert_eq!(returned_u64(&result), 0);
    }

    #[test]
    fn test_wraparound_and_shift_masking() {
        let mut program = vec![];
        program.extend(asm::ld_u64(Reg::R0, u64::MAX));
        program.extend([
            asm::add_imm(Reg::R0, 2),
            asm::alu_imm(ALU_LSH, Reg::R0, 65), // shifts by 1
            asm::ret(),
        ]);
        let result = run(&asm::assemble(&program), 1000);
        assert_eq!(returned_u64(&result), 2);
    }

    #[test]
    fn test_signed_ops() {
        let code = asm::assemble(&[
            asm::mov_imm(Reg::R0, -16),
            asm::alu_imm(ALU_ARSH, Reg::R0, 2),
            asm::mov_imm(Reg::R1, 0),
            asm::jmp_reg(JMP_JSLT, Reg::R0, Reg::R1, 1),
            asm::mov_imm(Reg::R0, 0),
            asm::ret(),
        ]);
        let result = run(&code, 1000);
        assert_eq!(returned_u64(&result) as i64, -4);
    }

    #[test]
    fn test_division_by_zero() {
        let code = asm::assemble(&[
            asm::mov_imm(Reg::R0, 1),
            asm::alu_imm(ALU_DIV, Reg::R0, 0),
            asm::exit(),
        ]);
        let result = run(&code, 1000);
        assert!(!result.success);
        assert!(matches!(
            result.error,
            Some(BpfError::Execution(ExecutionFault::DivisionByZero { pc: 1 }))
        ));
        assert_eq!(result.gas_used, 2);
    }

    #[test]
    fn test_invalid_opcode_and_register() {
        let result = run(&asm::assemble(&[Instruction::new(0x07, 0, 0, 0, 0)]), 1000);
        assert_eq!(result.error_kind(), Some("BPFExecutionError"));

        let result = run(&asm::assemble(&[Instruction::new(CLASS_ALU | ALU_MOV, 11, 0, 0, 1)]), 1000);
        assert!(matches!(
            result.error,
            Some(BpfError::Execution(ExecutionFault::InvalidRegister { register: 11, .. }))
        ));
    }

    #[test]
    fn test_frame_pointer_is_read_only() {
        let result = run(&asm::assemble(&[asm::mov_imm(Reg::R10, 0)]), 1000);
        assert!(matches!(
            result.error,
            Some(BpfError::Execution(ExecutionFault::ReadOnlyRegister { .. }))
        ));
    }

    #[test]
    fn test_jump_out_of_program() {
        let result = run(&asm::assemble(&[asm::ja(10)]), 1000);
        assert!(matches!(
            result.error,
            Some(BpfError::Execution(ExecutionFault::InvalidJump { target: 11, pc: 0 }))
        ));
    }

    #[test]
    fn test_stack_memory_through_frame_pointer() {
        let code = asm::assemble(&[
            asm::st(SIZE_DW, Reg::R10, -8, 77),
            asm::ldx(SIZE_DW, Reg::R0, Reg::R10, -8),
            asm::exit(),
        ]);
        let result = run(&code, 1000);
        assert_eq!(returned_u64(&result), 77);
        // 1 + 1 surcharge for each 8-byte access, 1 for exit
        assert_eq!(result.gas_used, 5);
    }

    #[test]
    fn test_out_of_bounds_store() {
        let code = asm::assemble(&[asm::st(SIZE_DW, Reg::R10, 0, 1), asm::exit()]);
        let result = run(&code, 1000);
        assert_eq!(result.error_kind(), Some("BPFMemoryError"));

        let code = asm::assemble(&[asm::mov_imm(Reg::R1, 0), asm::ldx(SIZE_B, Reg::R0, Reg::R1, -1)]);
        let result = run(&code, 1000);
        assert_eq!(result.error_kind(), Some("BPFMemoryError"));
    }

    #[test]
    fn test_return_memory_range() {
        let code = asm::assemble(&[
            asm::mov_imm(Reg::R1, 0),
            asm::mov_imm(Reg::R2, 4),
            asm::ret_mem(Reg::R1, Reg::R2, 0),
        ]);
        let ctx = ExecutionContext::new_call(Address::zero(), Address::zero(), 1000)
            .with_call(1, vec![1, 2, 3, 4, 5], [0; 4]);
        let (result, _) = run_with(&code, ctx, ExecutionLimits::default());
        assert_eq!(result.return_data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_local_call_and_return() {
        // main: r6 = 5; call f; r0 += r6; exit
        // f:    r6 = 100; r0 = 1; exit
        let code = asm::assemble(&[
            asm::mov_imm(Reg::R6, 5),
            asm::call_local(2),
            asm::alu_reg(ALU_ADD, Reg::R0, Reg::R6),
            asm::exit(),
            asm::mov_imm(Reg::R6, 100),
            asm::mov_imm(Reg::R0, 1),
            asm::exit(),
        ]);
        let result = run(&code, 1000);
        assert!(result.success, "{:?}", result.error);
        assert_eq!(returned_u64(&result), 6);
    }

    #[test]
    fn test_call_depth_limit() {
        // f: call f
        let code = asm::assemble(&[asm::call_local(-1)]);
        let limits = ExecutionLimits {
            max_call_depth: 8,
            ..ExecutionLimits::default()
        };
        let ctx = ExecutionContext::new_call(Address::zero(), Address::zero(), 100_000);
        let (result, _) = run_with(&code, ctx, limits);
        assert!(matches!(
            result.error,
            Some(BpfError::Memory(MemoryFault::CallDepthExceeded { depth: 9, limit: 8 }))
        ));
        assert_eq!(result.instructions_executed, 9);
    }

    #[test]
    fn test_storage_helpers() {
        let code = asm::assemble(&[
            asm::mov_imm(Reg::R1, 3),
            asm::mov_imm(Reg::R2, 99),
            asm::call_helper(helper::STORAGE_STORE),
            asm::mov_imm(Reg::R1, 3),
            asm::call_helper(helper::STORAGE_LOAD),
            asm::exit(),
        ]);
        let ctx = ExecutionContext::new_call(Address::zero(), Address::zero(), 10_000);
        let (result, changeset) = run_with(&code, ctx, ExecutionLimits::default());
        assert_eq!(returned_u64(&result), 99);
        assert_eq!(result.gas_used, 6 + 5000 + 200);
        assert_eq!(changeset.get(&slot_key(3)), Some(&u64_word(99)));
    }

    #[test]
    fn test_nondeterministic_helpers_refused() {
        for id in [helper::KTIME_GET_NS, helper::GET_PRANDOM_U32, helper::CONTRACT_CALL, 999] {
            let result = run(&asm::assemble(&[asm::call_helper(id)]), 1000);
            assert_eq!(result.error_kind(), Some("BPFSecurityError"), "helper {}", id);
        }
    }

    #[test]
    fn test_environment_helpers() {
        let caller = Address::new([0xcc; 20]);
        let code = asm::assemble(&[
            asm::mov_imm(Reg::R1, 64),
            asm::call_helper(helper::CALLER),
            asm::ldx(SIZE_B, Reg::R6, Reg::R1, 0),
            asm::call_helper(helper::BLOCK_NUMBER),
            asm::alu_reg(ALU_ADD, Reg::R0, Reg::R6),
            asm::exit(),
        ]);
        let ctx = ExecutionContext::new_call(Address::zero(), caller, 1000).with_block(BlockContext {
            number: 10,
            timestamp: 1_700_000_000,
            chain_id: 1,
        });
        let (result, _) = run_with(&code, ctx, ExecutionLimits::default());
        assert_eq!(returned_u64(&result), 10 + 0xcc);
    }

    #[test]
    fn test_keccak_helper() {
        // hash 0 bytes at 0 into 32..64, return it
        let code = asm::assemble(&[
            asm::mov_imm(Reg::R1, 0),
            asm::mov_imm(Reg::R2, 0),
            asm::mov_imm(Reg::R3, 32),
            asm::call_helper(helper::KECCAK256),
            asm::mov_imm(Reg::R1, 32),
            asm::mov_imm(Reg::R2, 32),
            asm::ret_mem(Reg::R1, Reg::R2, 0),
        ]);
        let result = run(&code, 1000);
        assert_eq!(result.return_data, keccak256(b"").to_vec());
    }

    #[test]
    fn test_gas_exhaustion_consumes_limit() {
        let code = asm::assemble(&[asm::ja(-1)]);
        let result = run(&code, 10);
        assert_eq!(result.error, Some(BpfError::Gas { required: 11, limit: 10 }));
        assert_eq!(result.gas_used, 10);
    }

    #[test]
    fn test_instruction_limit() {
        let code = asm::assemble(&[asm::ja(-1)]);
        let result = run(&code, 1_000_000);
        assert_eq!(result.error, Some(BpfError::Resource { executed: 10_000, limit: 10_000 }));
        assert_eq!(result.instructions_executed, 10_000);
        assert_eq!(result.gas_used, 10_000);
    }

    #[test]
    fn test_timeout() {
        let code = asm::assemble(&[asm::ja(-1)]);
        let limits = ExecutionLimits {
            max_execution_time: Duration::ZERO,
            max_instructions: u64::MAX,
            time_check_interval: 1,
            ..ExecutionLimits::default()
        };
        let ctx = ExecutionContext::new_call(Address::zero(), Address::zero(), 1_000_000);
        let (result, _) = run_with(&code, ctx, limits);
        assert_eq!(result.error_kind(), Some("BPFTimeoutError"));
    }

    proptest! {
        #[test]
        fn prop_execution_is_deterministic(words in proptest::collection::vec(any::<u64>(), 1..32)) {
            let code: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
            let a = run(&code, 50_000);
            let b = run(&code, 50_000);
            prop_assert_eq!(a.success, b.success);
            prop_assert_eq!(a.gas_used, b.gas_used);
            prop_assert_eq!(a.return_data, b.return_data);
            prop_assert_eq!(a.error, b.error);
            prop_assert!(a.gas_used <= 50_000);
            prop_assert!(a.instructions_executed <= 10_000);
        }

        #[test]
        fn prop_loads_past_memory_fail(offset in 0i16..i16::MAX, base in (MAX_MEMORY as i32 - 4)..i32::MAX) {
            let code = asm::assemble(&[
                asm::mov_imm(Reg::R1, base),
                asm::ldx(SIZE_DW, Reg::R0, Reg::R1, offset),
                asm::exit(),
            ]);
            let result = run(&code, 1000);
            prop_assert_eq!(result.error_kind(), Some("BPFMemoryError"));
        }
    }
}
