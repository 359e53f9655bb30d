//! RISC-V 64-bit Calling Convention (LP64D)
//!
//! # Register Allocation
//!
//! | Role | ABI Name | Register |
//! |------|----------|----------|
//! | Integer args | a0-a7 | x10-x17 |
//! | Float args | fa0-fa7 | f10-f17 |
//! | Returns | a0 (a1), fa0 | x10 (x11), f10 |
//! | Stub scratch | t0 | x5 |
//! | Stub identity | t1 | x6 |
//!
//! # Key Differences from the Other ABIs
//!
//! - Once fa0-fa7 are used up, floats take the next free a-register and
//!   only then a stack slot
//! - Variadic floats always travel in a-registers
//! - 32-bit values are sign-extended in registers, unsigned ones included
//! - Single precision values in float registers are NaN-boxed
//!
//! # Stub Format
//!
//! ```text
//! +0   00000297    auipc t0, 0
//! +4   0102B303    ld t1, 16(t0)
//! +8   0182B283    ld t0, 24(t0)
//! +12  00028067    jr t0
//! +16  .quad identity
//! +24  .quad entry
//! ```

use super::{Abi, Convention, Cursor, STUB_SIZE};
use crate::ffi::{Location, TypeClass};

/// t0 (x5)
pub const SCRATCH_REG: u32 = 5;
/// t1 (x6)
pub const IDENTITY_REG: u32 = 6;

const INT_ARGS: [&str; 8] = ["a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7"];
const FLOAT_ARGS: [&str; 8] = ["fa0", "fa1", "fa2", "fa3", "fa4", "fa5", "fa6", "fa7"];

/// Upper half of a NaN-boxed single precision value
const NAN_BOX: u64 = 0xFFFF_FFFF_0000_0000;

/// RISC-V LP64D
pub struct RiscV64Lp64d;

impl Convention for RiscV64Lp64d {
    fn abi(&self) -> Abi {
        Abi::RiscV64
    }

    fn int_arg_registers(&self) -> &'static [&'static str] {
        &INT_ARGS
    }

    fn float_arg_registers(&self) -> &'static [&'static str] {
        &FLOAT_ARGS
    }

    fn return_registers(&self) -> (&'static str, &'static str) {
        ("a0", "fa0")
    }

    fn place(&self, class: TypeClass, _index: usize, cursor: &mut Cursor, variadic: bool) -> Location {
        if class.is_float() && !variadic {
            if let Some(reg) = cursor.take_float(FLOAT_ARGS.len()) {
                return reg;
            }
        }
        cursor
            .take_int(INT_ARGS.len())
            .unwrap_or_else(|| cursor.take_stack_word())
    }

    fn widen(&self, class: TypeClass, bits: u64) -> u64 {
        match class {
            TypeClass::I8 => bits as i8 as i64 as u64,
            TypeClass::I16 => bits as i16 as i64 as u64,
            TypeClass::I32 | TypeClass::U32 => bits as i32 as i64 as u64,
            TypeClass::U8 | TypeClass::Bool => bits as u8 as u64,
            TypeClass::U16 => bits as u16 as u64,
            _ => bits,
        }
    }

    fn box_f32(&self, bits: u32) -> u64 {
        NAN_BOX | bits as u64
    }

    fn encode_stub(&self, identity: u64, entry: u64) -> [u8; STUB_SIZE] {
        RiscV64::encode_stub(identity, entry)
    }
}

/// RISC-V instruction encoders used to build trampoline stubs
pub struct RiscV64;

impl RiscV64 {
    /// AUIPC rd, imm20
    pub fn emit_auipc(rd: u32, imm20: u32) -> u32 {
        (imm20 << 12) | (rd << 7) | 0x17
    }

    /// LD rd, offset(rs1)
    pub fn emit_ld(rd: u32, rs1: u32, offset: u32) -> u32 {
        ((offset & 0xFFF) << 20) | (rs1 << 15) | (0b011 << 12) | (rd << 7) | 0x03
    }

    /// JALR x0, 0(rs1)
    pub fn emit_jr(rs1: u32) -> u32 {
        (rs1 << 15) | 0x67
    }

    /// Encode one trampoline stub
    pub fn encode_stub(identity: u64, entry: u64) -> [u8; STUB_SIZE] {
        let words = [
            Self::emit_auipc(SCRATCH_REG, 0),
            Self::emit_ld(IDENTITY_REG, SCRATCH_REG, 16),
            Self::emit_ld(SCRATCH_REG, SCRATCH_REG, 24),
            Self::emit_jr(SCRATCH_REG),
        ];

        let mut stub = [0u8; STUB_SIZE];
        for (i, word) in words.iter().enumerate() {
            stub[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        stub[16..24].copy_from_slice(&identity.to_le_bytes());
        stub[24..32].copy_from_slice(&entry.to_le_bytes());
        stub
    }
}
