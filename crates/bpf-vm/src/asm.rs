// bpf-vm/src/asm.rs

//! Builders for hand-written native programs.
//!
//! ```
//! use bpf_vm::asm::{self, Reg};
//! let code = asm::assemble(&[asm::mov_imm(Reg::R0, 7), asm::exit()]);
//! assert_eq!(code.len(), 16);
//! ```

use crate::isa::*;

pub use crate::isa::assemble;

/// Register names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
}

impl Reg {
    fn n(self) -> u8 {
        self as u8
    }
}

/// dst = sign-extended imm
pub fn ld_imm(dst: Reg, imm: i32) -> Instruction {
    Instruction::new(LD_IMM, dst.n(), 0, 0, imm)
}

/// dst = dst[0..32] | imm << 32
pub fn ld_hi(dst: Reg, imm: i32) -> Instruction {
    Instruction::new(LD_HI, dst.n(), 0, 0, imm)
}

/// Load a full 64-bit constant (two instructions)
pub fn ld_u64(dst: Reg, value: u64) -> [Instruction; 2] {
    [ld_imm(dst, value as u32 as i32), ld_hi(dst, (value >> 32) as u32 as i32)]
}

pub fn alu_imm(op: u8, dst: Reg, imm: i32) -> Instruction {
    Instruction::new(CLASS_ALU | SRC_IMM | op, dst.n(), 0, 0, imm)
}

pub fn alu_reg(op: u8, dst: Reg, src: Reg) -> Instruction {
    Instruction::new(CLASS_ALU | SRC_REG | op, dst.n(), src.n(), 0, 0)
}

pub fn mov_imm(dst: Reg, imm: i32) -> Instruction {
    alu_imm(ALU_MOV, dst, imm)
}

pub fn mov_reg(dst: Reg, src: Reg) -> Instruction {
    alu_reg(ALU_MOV, dst, src)
}

pub fn add_imm(dst: Reg, imm: i32) -> Instruction {
    alu_imm(ALU_ADD, dst, imm)
}

/// dst = *(size *)(src + offset)
pub fn ldx(size: u8, dst: Reg, src: Reg, offset: i16) -> Instruction {
    Instruction::new(CLASS_LDX | size, dst.n(), src.n(), offset, 0)
}

/// *(size *)(dst + offset) = imm
pub fn st(size: u8, dst: Reg, offset: i16, imm: i32) -> Instruction {
    Instruction::new(CLASS_ST | size, dst.n(), 0, offset, imm)
}

/// *(size *)(dst + offset) = src
pub fn stx(size: u8, dst: Reg, offset: i16, src: Reg) -> Instruction {
    Instruction::new(CLASS_STX | size, dst.n(), src.n(), offset, 0)
}

pub fn ja(offset: i16) -> Instruction {
    Instruction::new(JA, 0, 0, offset, 0)
}

pub fn jmp_imm(op: u8, dst: Reg, imm: i32, offset: i16) -> Instruction {
    Instruction::new(CLASS_JMP | SRC_IMM | op, dst.n(), 0, offset, imm)
}

pub fn jmp_reg(op: u8, dst: Reg, src: Reg, offset: i16) -> Instruction {
    Instruction::new(CLASS_JMP | SRC_REG | op, dst.n(), src.n(), offset, 0)
}

/// Host call by helper id
pub fn call_helper(id: i32) -> Instruction {
    Instruction::new(CALL, 0, 0, 0, id)
}

/// Local call to pc + 1 + offset
pub fn call_local(offset: i32) -> Instruction {
    Instruction::new(CALL, 0, CALL_LOCAL, 0, offset)
}

pub fn exit() -> Instruction {
    Instruction::new(EXIT, 0, 0, 0, 0)
}

/// Return r0 as one ABI word
pub fn ret() -> Instruction {
    Instruction::new(RET_R0, 0, 0, 0, 0)
}

/// Return memory[ptr + offset .. + len]
pub fn ret_mem(ptr: Reg, len: Reg, offset: i16) -> Instruction {
    Instruction::new(RET_MEM, ptr.n(), len.n(), offset, 0)
}
