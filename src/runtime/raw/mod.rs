//! Raw register transfer
//!
//! The only code in the crate that touches machine registers or the
//! machine stack. Two routines exist per architecture:
//!
//! - `raw_call(frame)` loads argument registers and stack words from a
//!   [`RawRegisterFrame`], calls `frame.code` and stores the return
//!   registers back into the frame before anything else runs.
//! - `callback_entry` is the common target of every trampoline stub. It
//!   spills the argument registers into a frame on its own stack, records
//!   the stub identity and the caller's stack pointer, calls
//!   `dispatch_callback(frame)` and loads the return registers from it.
//!
//! Both are naked functions; the frame layout below is shared with the
//! assembly through `offset_of!` constants.

use std::mem::offset_of;

use crate::ffi::{FfiError, FfiResult};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "riscv64")]
mod riscv64;
#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "aarch64")]
use aarch64 as native;
#[cfg(target_arch = "riscv64")]
use riscv64 as native;
#[cfg(target_arch = "x86_64")]
use x86_64 as native;

/// Argument registers of each kind carried by a frame
pub const FRAME_REGS: usize = 8;

/// Outgoing stack area reserved by `raw_call`, in words
pub const STACK_WORDS: usize = 16;

/// Bytes `callback_entry` reserves for its frame (16-byte aligned)
pub const FRAME_SIZE: usize = 192;

/// Snapshot of machine state on one side of a native transfer.
///
/// Outbound, `code` is the target address and `stack` points at
/// `stack_words` words that are copied to the callee's stack. Inbound,
/// `code` is the stub identity and `stack` is the native caller's stack
/// pointer at its call instruction.
#[repr(C)]
#[derive(Debug)]
pub struct RawRegisterFrame {
    pub code: usize,
    pub stack: *mut u64,
    pub stack_words: usize,
    /// Integer argument registers in ABI allocation order
    pub ints: [u64; FRAME_REGS],
    /// Floating argument registers, raw 64-bit images
    pub floats: [u64; FRAME_REGS],
    /// Primary and secondary integer return registers
    pub ret: [u64; 2],
    /// Primary and secondary floating return registers
    pub fret: [u64; 2],
}

pub(crate) const OFF_CODE: usize = offset_of!(RawRegisterFrame, code);
pub(crate) const OFF_STACK: usize = offset_of!(RawRegisterFrame, stack);
pub(crate) const OFF_STACK_WORDS: usize = offset_of!(RawRegisterFrame, stack_words);
pub(crate) const OFF_INTS: usize = offset_of!(RawRegisterFrame, ints);
pub(crate) const OFF_FLOATS: usize = offset_of!(RawRegisterFrame, floats);
pub(crate) const OFF_RET: usize = offset_of!(RawRegisterFrame, ret);
pub(crate) const OFF_FRET: usize = offset_of!(RawRegisterFrame, fret);

const _: () = assert!(std::mem::size_of::<RawRegisterFrame>() <= FRAME_SIZE);
const _: () = assert!(FRAME_SIZE % 16 == 0);
const _: () = assert!(OFF_INTS % 8 == 0 && OFF_FLOATS % 8 == 0 && OFF_RET % 8 == 0);

impl RawRegisterFrame {
    /// Empty frame targeting `code`
    pub fn new(code: usize) -> Self {
        Self {
            code,
            stack: std::ptr::null_mut(),
            stack_words: 0,
            ints: [0; FRAME_REGS],
            floats: [0; FRAME_REGS],
            ret: [0; 2],
            fret: [0; 2],
        }
    }

    /// Read the incoming stack word area at a byte offset.
    ///
    /// # Safety
    ///
    /// `stack` must point at the caller's argument area and the plan that
    /// produced `offset` must match the caller's actual call.
    pub unsafe fn stack_bytes(&self, offset: usize, len: usize) -> u64 {
        let mut buf = [0u8; 8];
        let src = (self.stack as *const u8).add(offset);
        std::ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), len.min(8));
        u64::from_le_bytes(buf)
    }
}

/// Transfer control to `frame.code` with the frame's register image.
///
/// # Safety
///
/// `frame.code` must be a function whose real signature matches the
/// register and stack image, and `frame.stack` must hold `stack_words`
/// readable words.
pub unsafe fn call(frame: &mut RawRegisterFrame) -> FfiResult<()> {
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64"))]
    {
        if frame.stack_words > STACK_WORDS {
            return Err(FfiError::TooManyArguments {
                count: frame.stack_words,
                max: STACK_WORDS,
            });
        }
        native::raw_call(frame);
        Ok(())
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64")))]
    {
        let _ = frame;
        Err(FfiError::UnsupportedPlatform(
            crate::arch::detect_arch().to_string(),
        ))
    }
}

/// Address every trampoline stub jumps to
pub fn callback_entry() -> FfiResult<usize> {
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64"))]
    {
        Ok(native::callback_entry as usize)
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64")))]
    {
        Err(FfiError::UnsupportedPlatform(
            crate::arch::detect_arch().to_string(),
        ))
    }
}
