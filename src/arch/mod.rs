//! Architecture Abstraction Module
//!
//! Every supported architecture/OS pair is one [`Convention`] strategy.
//! A strategy turns an ordered sequence of [`TypeClass`]es into a
//! [`CallPlan`] and encodes the per-slot trampoline stubs. The host's
//! strategy is selected once through [`Abi::native`]; any other ABI can
//! still be planned (planning never touches the machine).
//!
//! # Supported ABIs
//!
//! | ABI | Integer args | Float args | Stack |
//! |-----|--------------|------------|-------|
//! | SysV AMD64 | rdi rsi rdx rcx r8 r9 | xmm0-7 | 8-byte slots |
//! | Win64 | rcx rdx r8 r9 (positional) | xmm0-3 (positional) | 32-byte shadow, 8-byte slots |
//! | AAPCS64 | x0-x7 | v0-v7 | 8-byte slots |
//! | Darwin AArch64 | x0-x7 | v0-v7 | natural size and alignment |
//! | RISC-V LP64D | a0-a7 | fa0-fa7, then a-regs | 8-byte slots |
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                   Convention trait                      │
//! │  fn place(class, index, cursor, variadic) -> Location   │
//! │  fn return_location(class) -> ReturnLocation            │
//! │  fn widen(class, bits) / box_f32(bits)                  │
//! │  fn encode_stub(identity, entry) -> [u8; STUB_SIZE]     │
//! └──────┬──────────────┬──────────────┬───────────────────┘
//!        │              │              │
//!   ┌────┴────┐   ┌─────┴─────┐   ┌────┴─────┐
//!   │ x86_64  │   │  aarch64  │   │ riscv64  │
//!   └─────────┘   └───────────┘   └──────────┘
//! ```

pub mod aarch64;
pub mod riscv64;
pub mod x86_64;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::ffi::{
    ArgSlot, CallPlan, FfiError, FfiResult, Location, ReturnLocation, TypeClass, MAX_ARGS,
};

pub use aarch64::{Aapcs64, DarwinAarch64};
pub use riscv64::RiscV64Lp64d;
pub use x86_64::{SysVAmd64, Win64};

/// Size in bytes of one trampoline stub, identical on every architecture
pub const STUB_SIZE: usize = 32;

/// Supported architecture/OS calling conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Abi {
    /// System V AMD64 ABI (Linux, macOS, BSD)
    #[serde(rename = "sysv-amd64")]
    SysVAmd64,
    /// Windows x64 calling convention
    Win64,
    /// ARM64 AAPCS (Linux, BSD, Windows)
    Aapcs64,
    /// Apple's ARM64 variant of AAPCS
    DarwinAarch64,
    /// RISC-V 64-bit, double-precision hard float
    #[serde(rename = "riscv64")]
    RiscV64,
}

impl Abi {
    /// Every ABI, in a stable order
    pub const ALL: [Abi; 5] = [
        Abi::SysVAmd64,
        Abi::Win64,
        Abi::Aapcs64,
        Abi::DarwinAarch64,
        Abi::RiscV64,
    ];

    /// The ABI of the running host, if it is supported
    pub fn native() -> Option<Abi> {
        #[cfg(all(target_arch = "x86_64", target_os = "windows"))]
        {
            Some(Abi::Win64)
        }
        #[cfg(all(target_arch = "x86_64", not(target_os = "windows")))]
        {
            Some(Abi::SysVAmd64)
        }
        #[cfg(all(target_arch = "aarch64", target_vendor = "apple"))]
        {
            Some(Abi::DarwinAarch64)
        }
        #[cfg(all(target_arch = "aarch64", not(target_vendor = "apple")))]
        {
            Some(Abi::Aapcs64)
        }
        #[cfg(target_arch = "riscv64")]
        {
            Some(Abi::RiscV64)
        }
        #[cfg(not(any(
            target_arch = "x86_64",
            target_arch = "aarch64",
            target_arch = "riscv64"
        )))]
        {
            None
        }
    }

    /// The native ABI, or `UnsupportedPlatform`
    pub fn require_native() -> FfiResult<Abi> {
        Abi::native().ok_or_else(|| FfiError::UnsupportedPlatform(detect_arch().to_string()))
    }

    /// The strategy implementing this ABI
    pub fn convention(&self) -> &'static dyn Convention {
        match self {
            Abi::SysVAmd64 => &SysVAmd64,
            Abi::Win64 => &Win64,
            Abi::Aapcs64 => &Aapcs64,
            Abi::DarwinAarch64 => &DarwinAarch64,
            Abi::RiscV64 => &RiscV64Lp64d,
        }
    }

    /// Canonical name, also accepted by `from_str`
    pub fn name(&self) -> &'static str {
        match self {
            Abi::SysVAmd64 => "sysv-amd64",
            Abi::Win64 => "win64",
            Abi::Aapcs64 => "aapcs64",
            Abi::DarwinAarch64 => "darwin-aarch64",
            Abi::RiscV64 => "riscv64",
        }
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Abi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sysv-amd64" | "sysv" | "x86_64" | "amd64" => Ok(Abi::SysVAmd64),
            "win64" | "windows" | "x64" => Ok(Abi::Win64),
            "aapcs64" | "aarch64" | "arm64" => Ok(Abi::Aapcs64),
            "darwin-aarch64" | "darwin" | "apple-arm64" => Ok(Abi::DarwinAarch64),
            "riscv64" | "lp64d" | "riscv" => Ok(Abi::RiscV64),
            other => Err(format!("unknown ABI '{}'", other)),
        }
    }
}

/// Allocation state while walking a parameter list.
///
/// Cursors are independent unless a strategy chooses to drive them
/// positionally (Win64).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Next free integer argument register
    pub next_int: usize,
    /// Next free floating argument register
    pub next_float: usize,
    /// Next free stack byte, measured from the stack pointer at the call
    pub stack: usize,
}

impl Cursor {
    /// Cursor whose stack area starts after `reserved` bytes
    pub fn new(reserved: usize) -> Self {
        Self {
            next_int: 0,
            next_float: 0,
            stack: reserved,
        }
    }

    /// Take the next 8-byte stack slot
    pub fn take_stack_word(&mut self) -> Location {
        let offset = align_up(self.stack, 8);
        self.stack = offset + 8;
        Location::Stack {
            offset: offset as u32,
        }
    }

    /// Take stack space at the value's natural size and alignment
    pub fn take_stack_packed(&mut self, size: usize) -> Location {
        let size = size.max(1);
        let offset = align_up(self.stack, size);
        self.stack = offset + size;
        Location::Stack {
            offset: offset as u32,
        }
    }

    /// Take the next integer register, or `None` if all `count` are used
    pub fn take_int(&mut self, count: usize) -> Option<Location> {
        (self.next_int < count).then(|| {
            self.next_int += 1;
            Location::IntReg((self.next_int - 1) as u8)
        })
    }

    /// Take the next floating register, or `None` if all `count` are used
    pub fn take_float(&mut self, count: usize) -> Option<Location> {
        (self.next_float < count).then(|| {
            self.next_float += 1;
            Location::FloatReg((self.next_float - 1) as u8)
        })
    }
}

/// Round `value` up to a multiple of `align` (a power of two)
pub fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// A calling-convention strategy: classification, placement and stubs.
pub trait Convention: Send + Sync {
    /// The ABI this strategy implements
    fn abi(&self) -> Abi;

    /// Integer argument registers, in allocation order
    fn int_arg_registers(&self) -> &'static [&'static str];

    /// Floating argument registers, in allocation order
    fn float_arg_registers(&self) -> &'static [&'static str];

    /// Primary integer and floating return registers
    fn return_registers(&self) -> (&'static str, &'static str);

    /// Bytes reserved below the first stack argument
    fn shadow_bytes(&self) -> usize {
        0
    }

    /// Stack arguments occupy their natural size instead of a full word
    fn packed_stack(&self) -> bool {
        false
    }

    /// Assign one parameter its location.
    ///
    /// `variadic` is set for plans built for the generic call path.
    fn place(
        &self,
        class: TypeClass,
        index: usize,
        cursor: &mut Cursor,
        variadic: bool,
    ) -> Location;

    /// Where the return value of `class` comes back
    fn return_location(&self, class: TypeClass) -> FfiResult<ReturnLocation> {
        Ok(match class {
            TypeClass::Void => ReturnLocation::None,
            TypeClass::Bool => ReturnLocation::IntLowByte,
            TypeClass::F32 | TypeClass::F64 => ReturnLocation::Float,
            _ => ReturnLocation::Int,
        })
    }

    /// Extend the low `class.size()` bytes of `bits` to a full register word.
    fn widen(&self, class: TypeClass, bits: u64) -> u64 {
        match class {
            TypeClass::I8 => bits as i8 as i64 as u64,
            TypeClass::I16 => bits as i16 as i64 as u64,
            TypeClass::I32 => bits as i32 as i64 as u64,
            TypeClass::U8 | TypeClass::Bool => bits as u8 as u64,
            TypeClass::U16 => bits as u16 as u64,
            TypeClass::U32 => bits as u32 as u64,
            _ => bits,
        }
    }

    /// Register image of a single-precision float held in a float register
    fn box_f32(&self, bits: u32) -> u64 {
        bits as u64
    }

    /// Encode one trampoline stub that loads `identity` into the scratch
    /// register the common entry expects and jumps to `entry`.
    fn encode_stub(&self, identity: u64, entry: u64) -> [u8; STUB_SIZE];

    /// Compute the full plan for a parameter list and return class.
    fn plan(&self, params: &[TypeClass], ret: TypeClass, variadic: bool) -> FfiResult<CallPlan> {
        if params.len() > MAX_ARGS {
            return Err(FfiError::TooManyArguments {
                count: params.len(),
                max: MAX_ARGS,
            });
        }
        let ret_location = self.return_location(ret)?;

        let mut cursor = Cursor::new(self.shadow_bytes());
        let mut slots = Vec::with_capacity(params.len());
        for (index, &class) in params.iter().enumerate() {
            if class == TypeClass::Void {
                return Err(FfiError::UnsupportedTypeClass {
                    class,
                    abi: self.abi(),
                });
            }
            // Generic-path arguments travel as full words unless floating.
            let placed = if variadic { class.word_class() } else { class };
            let location = self.place(placed, index, &mut cursor, variadic);
            slots.push(ArgSlot { class, location });
        }

        // Shadow space is part of the outgoing area even with no stack args.
        let stack_bytes = align_up(cursor.stack, 8);

        Ok(CallPlan {
            abi: self.abi(),
            slots,
            ret,
            ret_location,
            float_regs_used: cursor.next_float.min(self.float_arg_registers().len()) as u8,
            stack_bytes: stack_bytes as u32,
            variadic,
        })
    }
}

/// Detect the current runtime architecture
pub fn detect_arch() -> &'static str {
    #[cfg(target_arch = "x86_64")]
    {
        "x86_64"
    }
    #[cfg(target_arch = "aarch64")]
    {
        "aarch64"
    }
    #[cfg(target_arch = "riscv64")]
    {
        "riscv64"
    }
    #[cfg(target_arch = "arm")]
    {
        "arm"
    }
    #[cfg(target_arch = "x86")]
    {
        "x86"
    }
    #[cfg(not(any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "riscv64",
        target_arch = "arm",
        target_arch = "x86"
    )))]
    {
        "unknown"
    }
}
