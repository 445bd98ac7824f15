// bpf-vm/src/isa.rs

//! Native instruction set: decoding, encoding and deploy-time verification.
//!
//! Each instruction is one little-endian 64-bit word:
//!
//! ```text
//! bits  0..8   opcode
//! bits  8..12  dst register
//! bits 12..16  src register
//! bits 16..32  offset (signed)
//! bits 32..64  immediate (signed)
//! ```
//!
//! Opcodes follow the eBPF layout: the low three bits select the class,
//! bit 3 selects an immediate or register source, and the high four bits
//! select the operation.

use crate::{ContractError, ContractResult};

/// Size of one encoded instruction
pub const INSTRUCTION_SIZE: usize = 8;

/// Number of registers (r0..r10)
pub const REGISTER_COUNT: usize = 11;

/// Read-only frame pointer register
pub const FRAME_POINTER: u8 = 10;

// Instruction classes
pub const CLASS_LD: u8 = 0x00;
pub const CLASS_LDX: u8 = 0x01;
pub const CLASS_ST: u8 = 0x02;
pub const CLASS_STX: u8 = 0x03;
pub const CLASS_ALU: u8 = 0x04;
pub const CLASS_JMP: u8 = 0x05;
pub const CLASS_RET: u8 = 0x06;

// Source flag
pub const SRC_IMM: u8 = 0x00;
pub const SRC_REG: u8 = 0x08;

// Load/store sizes
pub const SIZE_W: u8 = 0x00;
pub const SIZE_H: u8 = 0x08;
pub const SIZE_B: u8 = 0x10;
pub const SIZE_DW: u8 = 0x18;

// ALU operations (high nibble)
pub const ALU_ADD: u8 = 0x00;
pub const ALU_SUB: u8 = 0x10;
pub const ALU_MUL: u8 = 0x20;
pub const ALU_DIV: u8 = 0x30;
pub const ALU_OR: u8 = 0x40;
pub const ALU_AND: u8 = 0x50;
pub const ALU_LSH: u8 = 0x60;
pub const ALU_RSH: u8 = 0x70;
pub const ALU_NEG: u8 = 0x80;
pub const ALU_MOD: u8 = 0x90;
pub const ALU_XOR: u8 = 0xa0;
pub const ALU_MOV: u8 = 0xb0;
pub const ALU_ARSH: u8 = 0xc0;

// Jump operations (high nibble)
pub const JMP_JA: u8 = 0x00;
pub const JMP_JEQ: u8 = 0x10;
pub const JMP_JGT: u8 = 0x20;
pub const JMP_JGE: u8 = 0x30;
pub const JMP_JSET: u8 = 0x40;
pub const JMP_JNE: u8 = 0x50;
pub const JMP_JSGT: u8 = 0x60;
pub const JMP_JSGE: u8 = 0x70;
pub const JMP_CALL: u8 = 0x80;
pub const JMP_EXIT: u8 = 0x90;
pub const JMP_JLT: u8 = 0xa0;
pub const JMP_JLE: u8 = 0xb0;
pub const JMP_JSLT: u8 = 0xc0;
pub const JMP_JSLE: u8 = 0xd0;

// Full opcodes
pub const LD_IMM: u8 = CLASS_LD;
pub const LD_HI: u8 = CLASS_LD | 0x10;
pub const RET_R0: u8 = CLASS_RET;
pub const RET_MEM: u8 = CLASS_RET | SRC_REG;
pub const CALL: u8 = CLASS_JMP | JMP_CALL;
pub const EXIT: u8 = CLASS_JMP | JMP_EXIT;
pub const JA: u8 = CLASS_JMP | JMP_JA;

/// `src` value of CALL selecting a local function instead of a host call
pub const CALL_LOCAL: u8 = 1;

/// Decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    pub dst: u8,
    pub src: u8,
    pub offset: i16,
    pub imm: i32,
}

impl Instruction {
    pub fn new(opcode: u8, dst: u8, src: u8, offset: i16, imm: i32) -> Self {
        Self {
            opcode,
            dst,
            src,
            offset,
            imm,
        }
    }

    pub fn decode(word: u64) -> Self {
        Self {
            opcode: (word & 0xff) as u8,
            dst: ((word >> 8) & 0x0f) as u8,
            src: ((word >> 12) & 0x0f) as u8,
            offset: ((word >> 16) & 0xffff) as u16 as i16,
            imm: (word >> 32) as u32 as i32,
        }
    }

    pub fn encode(&self) -> u64 {
        u64::from(self.opcode)
            | u64::from(self.dst & 0x0f) << 8
            | u64::from(self.src & 0x0f) << 12
            | u64::from(self.offset as u16) << 16
            | u64::from(self.imm as u32) << 32
    }

    pub fn class(&self) -> u8 {
        self.opcode & 0x07
    }

    pub fn uses_register_source(&self) -> bool {
        self.opcode & SRC_REG != 0
    }

    /// Access width in bytes for LDX/ST/STX
    pub fn access_size(&self) -> usize {
        match self.opcode & 0x18 {
            SIZE_W => 4,
            SIZE_H => 2,
            SIZE_B => 1,
            _ => 8,
        }
    }

    /// Whether the instruction writes its `dst` register
    pub fn writes_dst(&self) -> bool {
        matches!(self.class(), CLASS_LD | CLASS_LDX | CLASS_ALU)
    }

    /// Jump or local call target relative to `pc`
    pub fn branch_target(&self, pc: usize) -> Option<i64> {
        match self.opcode {
            CALL if self.src == CALL_LOCAL => Some(pc as i64 + 1 + i64::from(self.imm)),
            CALL | EXIT => None,
            op if op & 0x07 == CLASS_JMP => Some(pc as i64 + 1 + i64::from(self.offset)),
            _ => None,
        }
    }
}

/// Whether `opcode` belongs to the native instruction set
pub fn is_known_opcode(opcode: u8) -> bool {
    let op = opcode & 0xf0;
    match opcode & 0x07 {
        CLASS_LD => opcode == LD_IMM || opcode == LD_HI,
        CLASS_LDX | CLASS_ST | CLASS_STX => opcode & 0xe0 == 0,
        CLASS_ALU => op <= ALU_ARSH,
        CLASS_JMP => match op {
            JMP_JA | JMP_CALL | JMP_EXIT => opcode & SRC_REG == 0,
            _ => op <= JMP_JSLE,
        },
        CLASS_RET => opcode == RET_R0 || opcode == RET_MEM,
        _ => false,
    }
}

/// Borrowed view of bytecode as a sequence of instructions
#[derive(Debug, Clone, Copy)]
pub struct Program<'a> {
    code: &'a [u8],
}

impl<'a> Program<'a> {
    /// Wrap bytecode after checking its shape (non-empty, whole instructions)
    pub fn new(code: &'a [u8]) -> ContractResult<Self> {
        if code.is_empty() {
            return Err(ContractError::InvalidBytecode("empty bytecode".into()));
        }
        if code.len() % INSTRUCTION_SIZE != 0 {
            return Err(ContractError::InvalidBytecode(format!(
                "length {} is not a multiple of {}",
                code.len(),
                INSTRUCTION_SIZE
            )));
        }
        Ok(Self { code })
    }

    /// Wrap code without shape checks; a trailing partial instruction is never fetched
    pub(crate) fn unchecked(code: &'a [u8]) -> Self {
        Self { code }
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.code.len() / INSTRUCTION_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Decode the instruction at `pc`, if inside the program
    pub fn fetch(&self, pc: usize) -> Option<Instruction> {
        let start = pc.checked_mul(INSTRUCTION_SIZE)?;
        let bytes = self.code.get(start..start.checked_add(INSTRUCTION_SIZE)?)?;
        let mut word = [0u8; INSTRUCTION_SIZE];
        word.copy_from_slice(bytes);
        Some(Instruction::decode(u64::from_le_bytes(word)))
    }

    pub fn iter(&self) -> impl Iterator<Item = Instruction> + 'a {
        let code = self.code;
        code.chunks_exact(INSTRUCTION_SIZE).map(|chunk| {
            let mut word = [0u8; INSTRUCTION_SIZE];
            word.copy_from_slice(chunk);
            Instruction::decode(u64::from_le_bytes(word))
        })
    }
}

/// Static checks run at deploy time
///
/// Rejects unknown opcodes, registers above r10, writes to r10, CALL with
/// an unknown mode, and jumps or local calls leaving the program.
pub fn verify_program(code: &[u8]) -> ContractResult<()> {
    let program = Program::new(code)?;
    let len = program.len() as i64;

    for (pc, insn) in program.iter().enumerate() {
        if !is_known_opcode(insn.opcode) {
            return Err(ContractError::InvalidBytecode(format!(
                "unknown opcode 0x{:02x} at pc {}",
                insn.opcode, pc
            )));
        }
        if insn.dst as usize >= REGISTER_COUNT || insn.src as usize >= REGISTER_COUNT {
            return Err(ContractError::InvalidBytecode(format!(
                "register out of range at pc {}",
                pc
            )));
        }
        if insn.writes_dst() && insn.dst == FRAME_POINTER {
            return Err(ContractError::InvalidBytecode(format!(
                "write to frame pointer r10 at pc {}",
                pc
            )));
        }
        if insn.opcode == CALL && insn.src > CALL_LOCAL {
            return Err(ContractError::InvalidBytecode(format!(
                "unknown call mode {} at pc {}",
                insn.src, pc
            )));
        }
        if let Some(target) = insn.branch_target(pc) {
            if target < 0 || target >= len {
                return Err(ContractError::InvalidBytecode(format!(
                    "branch target {} outside program at pc {}",
                    target, pc
                )));
            }
        }
    }

    Ok(())
}

/// Encode instructions into bytecode
pub fn assemble(instructions: &[Instruction]) -> Vec<u8> {
    instructions
        .iter()
        .flat_map(|insn| insn.encode().to_le_bytes())
        .collect()
}
