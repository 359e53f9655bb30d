//! x86-64 Calling Conventions
//!
//! Two strategies share this architecture: System V AMD64 (Linux, macOS,
//! BSD) and Windows x64.
//!
//! # Register Allocation
//!
//! | Position | SysV int | SysV float | Win64 (int / float) |
//! |----------|----------|------------|---------------------|
//! | 1 | rdi | xmm0 | rcx / xmm0 |
//! | 2 | rsi | xmm1 | rdx / xmm1 |
//! | 3 | rdx | xmm2 | r8 / xmm2 |
//! | 4 | rcx | xmm3 | r9 / xmm3 |
//! | 5 | r8 | xmm4 | stack [sp+32] |
//! | 6 | r9 | xmm5 | stack [sp+40] |
//! | - | - | xmm6, xmm7 | - |
//!
//! SysV cursors are independent: `f(int, double, int)` uses rdi, xmm0, rsi.
//! Win64 is positional: the same call uses rcx, xmm1, r8.
//!
//! # Stub Format
//!
//! ```text
//! 49 BA <imm64>    movabs r10, identity
//! 49 BB <imm64>    movabs r11, entry
//! 41 FF E3         jmp r11
//! CC ...           int3 padding
//! ```

use super::{Abi, Convention, Cursor, STUB_SIZE};
use crate::ffi::{Location, TypeClass};

/// Register number of r10, which carries the stub identity
pub const IDENTITY_REG: u8 = 10;
/// Register number of r11, which carries the entry address
pub const SCRATCH_REG: u8 = 11;

const SYSV_INT_ARGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
const SYSV_FLOAT_ARGS: [&str; 8] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7",
];
const WIN64_INT_ARGS: [&str; 4] = ["rcx", "rdx", "r8", "r9"];
const WIN64_FLOAT_ARGS: [&str; 4] = ["xmm0", "xmm1", "xmm2", "xmm3"];

/// Bytes of home space a Win64 caller reserves for the four register args
pub const WIN64_SHADOW_BYTES: usize = 32;

/// System V AMD64 ABI
pub struct SysVAmd64;

impl Convention for SysVAmd64 {
    fn abi(&self) -> Abi {
        Abi::SysVAmd64
    }

    fn int_arg_registers(&self) -> &'static [&'static str] {
        &SYSV_INT_ARGS
    }

    fn float_arg_registers(&self) -> &'static [&'static str] {
        &SYSV_FLOAT_ARGS
    }

    fn return_registers(&self) -> (&'static str, &'static str) {
        ("rax", "xmm0")
    }

    fn place(&self, class: TypeClass, _index: usize, cursor: &mut Cursor, _variadic: bool) -> Location {
        let reg = if class.is_float() {
            cursor.take_float(SYSV_FLOAT_ARGS.len())
        } else {
            cursor.take_int(SYSV_INT_ARGS.len())
        };
        reg.unwrap_or_else(|| cursor.take_stack_word())
    }

    fn encode_stub(&self, identity: u64, entry: u64) -> [u8; STUB_SIZE] {
        X86_64::encode_stub(identity, entry)
    }
}

/// Windows x64 calling convention
pub struct Win64;

impl Convention for Win64 {
    fn abi(&self) -> Abi {
        Abi::Win64
    }

    fn int_arg_registers(&self) -> &'static [&'static str] {
        &WIN64_INT_ARGS
    }

    fn float_arg_registers(&self) -> &'static [&'static str] {
        &WIN64_FLOAT_ARGS
    }

    fn return_registers(&self) -> (&'static str, &'static str) {
        ("rax", "xmm0")
    }

    fn shadow_bytes(&self) -> usize {
        WIN64_SHADOW_BYTES
    }

    fn place(&self, class: TypeClass, index: usize, cursor: &mut Cursor, variadic: bool) -> Location {
        if index >= WIN64_INT_ARGS.len() {
            return cursor.take_stack_word();
        }
        // The Nth argument owns the Nth register pair whatever its class.
        cursor.next_int = index + 1;
        let reg = index as u8;
        if !class.is_float() {
            Location::IntReg(reg)
        } else {
            cursor.next_float = index + 1;
            if variadic {
                Location::Mirrored(reg)
            } else {
                Location::FloatReg(reg)
            }
        }
    }

    fn encode_stub(&self, identity: u64, entry: u64) -> [u8; STUB_SIZE] {
        X86_64::encode_stub(identity, entry)
    }
}

/// x86-64 instruction encoders used to build trampoline stubs
pub struct X86_64;

impl X86_64 {
    /// Get REX prefix for 64-bit operands
    pub fn rex_w(reg_high: bool, rm_high: bool) -> u8 {
        let mut rex = 0x48; // REX.W
        if reg_high {
            rex |= 0x04; // REX.R
        }
        if rm_high {
            rex |= 0x01; // REX.B
        }
        rex
    }

    /// Generate MOV reg, imm64 instruction
    pub fn emit_mov_imm64(dst: u8, imm: u64) -> Vec<u8> {
        let mut code = Vec::with_capacity(10);

        // movabs dst, imm64
        code.push(Self::rex_w(false, dst >= 8));
        code.push(0xB8 + (dst & 0x7));
        code.extend_from_slice(&imm.to_le_bytes());

        code
    }

    /// Generate JMP reg instruction
    pub fn emit_jmp_reg(reg: u8) -> Vec<u8> {
        let mut code = Vec::with_capacity(3);
        if reg >= 8 {
            code.push(0x41); // REX.B
        }
        code.push(0xFF); // JMP r/m64 (/4)
        code.push(0xE0 | (reg & 0x7));
        code
    }

    /// Encode one trampoline stub
    pub fn encode_stub(identity: u64, entry: u64) -> [u8; STUB_SIZE] {
        let mut code = Self::emit_mov_imm64(IDENTITY_REG, identity);
        code.extend(Self::emit_mov_imm64(SCRATCH_REG, entry));
        code.extend(Self::emit_jmp_reg(SCRATCH_REG));

        let mut stub = [0xCC; STUB_SIZE]; // int3
        stub[..code.len()].copy_from_slice(&code);
        stub
    }
}
