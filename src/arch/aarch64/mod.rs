//! AArch64 (ARM64) Calling Conventions
//!
//! Generic AAPCS64 and Apple's variant share registers and returns; they
//! differ only in how arguments past the eighth register are laid out on
//! the stack.
//!
//! | Role | Registers |
//! |------|-----------|
//! | Integer args | x0-x7 |
//! | Float args | v0-v7 (d/s views) |
//! | Returns | x0 (x1 high half), d0/s0 |
//! | Stub identity | x9 |
//! | Stub scratch | x10 |
//!
//! # Key Differences on Apple Platforms
//!
//! - Stack arguments are packed at their natural size and alignment
//!   instead of one 8-byte slot each
//! - Narrow integer arguments must be extended by the caller
//!
//! # Stub Format
//!
//! ```text
//! +0   58000089    ldr x9, #16
//! +4   580000AA    ldr x10, #20
//! +8   D61F0140    br x10
//! +12  D503201F    nop
//! +16  .quad identity
//! +24  .quad entry
//! ```

use super::{Abi, Convention, Cursor, STUB_SIZE};
use crate::ffi::{Location, TypeClass};

/// x9 carries the stub identity into the common entry
pub const IDENTITY_REG: u32 = 9;
/// x10 holds the entry address for the indirect branch
pub const SCRATCH_REG: u32 = 10;

const INT_ARGS: [&str; 8] = ["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7"];
const FLOAT_ARGS: [&str; 8] = ["v0", "v1", "v2", "v3", "v4", "v5", "v6", "v7"];

/// ARM64 AAPCS (Linux, BSD, Windows)
pub struct Aapcs64;

impl Convention for Aapcs64 {
    fn abi(&self) -> Abi {
        Abi::Aapcs64
    }

    fn int_arg_registers(&self) -> &'static [&'static str] {
        &INT_ARGS
    }

    fn float_arg_registers(&self) -> &'static [&'static str] {
        &FLOAT_ARGS
    }

    fn return_registers(&self) -> (&'static str, &'static str) {
        ("x0", "v0")
    }

    fn place(&self, class: TypeClass, _index: usize, cursor: &mut Cursor, _variadic: bool) -> Location {
        take_register(class, cursor).unwrap_or_else(|| cursor.take_stack_word())
    }

    fn encode_stub(&self, identity: u64, entry: u64) -> [u8; STUB_SIZE] {
        AArch64::encode_stub(identity, entry)
    }
}

/// Apple's ARM64 calling convention
pub struct DarwinAarch64;

impl Convention for DarwinAarch64 {
    fn abi(&self) -> Abi {
        Abi::DarwinAarch64
    }

    fn int_arg_registers(&self) -> &'static [&'static str] {
        &INT_ARGS
    }

    fn float_arg_registers(&self) -> &'static [&'static str] {
        &FLOAT_ARGS
    }

    fn return_registers(&self) -> (&'static str, &'static str) {
        ("x0", "v0")
    }

    fn packed_stack(&self) -> bool {
        true
    }

    fn place(&self, class: TypeClass, _index: usize, cursor: &mut Cursor, _variadic: bool) -> Location {
        take_register(class, cursor).unwrap_or_else(|| cursor.take_stack_packed(class.size()))
    }

    fn encode_stub(&self, identity: u64, entry: u64) -> [u8; STUB_SIZE] {
        AArch64::encode_stub(identity, entry)
    }
}

fn take_register(class: TypeClass, cursor: &mut Cursor) -> Option<Location> {
    if class.is_float() {
        cursor.take_float(FLOAT_ARGS.len())
    } else {
        cursor.take_int(INT_ARGS.len())
    }
}

/// AArch64 instruction encoders used to build trampoline stubs
pub struct AArch64;

impl AArch64 {
    /// nop
    pub const NOP: u32 = 0xD503_201F;

    /// LDR Xt, label (PC-relative literal load)
    pub fn emit_ldr_literal(rt: u32, byte_offset: u32) -> u32 {
        0x5800_0000 | ((byte_offset / 4) << 5) | rt
    }

    /// BR Xn
    pub fn emit_br(rn: u32) -> u32 {
        0xD61F_0000 | (rn << 5)
    }

    /// Encode one trampoline stub
    pub fn encode_stub(identity: u64, entry: u64) -> [u8; STUB_SIZE] {
        let words = [
            Self::emit_ldr_literal(IDENTITY_REG, 16),
            Self::emit_ldr_literal(SCRATCH_REG, 20),
            Self::emit_br(SCRATCH_REG),
            Self::NOP,
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
