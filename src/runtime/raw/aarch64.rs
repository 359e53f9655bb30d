//! AArch64 transfer routines (AAPCS64 and Apple ARM64)
//!
//! Both conventions use the same registers; only stack layout differs,
//! and that is already resolved into the frame's stack image.

use core::arch::naked_asm;

use super::{
    RawRegisterFrame, FRAME_SIZE, OFF_CODE, OFF_FLOATS, OFF_FRET, OFF_INTS, OFF_RET, OFF_STACK,
    OFF_STACK_WORDS, STACK_WORDS,
};
use crate::ffi::dispatch_callback;

/// x0 = frame
#[unsafe(naked)]
pub(super) unsafe extern "C" fn raw_call(frame: *mut RawRegisterFrame) {
    naked_asm!(
        "stp x29, x30, [sp, #-32]!",
        "mov x29, sp",
        "str x19, [sp, #16]",
        "mov x19, x0",
        "sub sp, sp, #{area}",
        "ldr x9, [x19, #{stack}]",
        "ldr x10, [x19, #{words}]",
        "mov x11, sp",
        "cbz x10, 3f",
        "2:",
        "ldr x12, [x9], #8",
        "str x12, [x11], #8",
        "subs x10, x10, #1",
        "b.ne 2b",
        "3:",
        "ldp d0, d1, [x19, #{f0}]",
        "ldp d2, d3, [x19, #{f2}]",
        "ldp d4, d5, [x19, #{f4}]",
        "ldp d6, d7, [x19, #{f6}]",
        "ldp x0, x1, [x19, #{i0}]",
        "ldp x2, x3, [x19, #{i2}]",
        "ldp x4, x5, [x19, #{i4}]",
        "ldp x6, x7, [x19, #{i6}]",
        "ldr x16, [x19, #{code}]",
        "blr x16",
        "stp x0, x1, [x19, #{ret}]",
        "stp d0, d1, [x19, #{fret}]",
        "mov sp, x29",
        "ldr x19, [sp, #16]",
        "ldp x29, x30, [sp], #32",
        "ret",
        area = const STACK_WORDS * 8,
        stack = const OFF_STACK,
        words = const OFF_STACK_WORDS,
        f0 = const OFF_FLOATS,
        f2 = const OFF_FLOATS + 16,
        f4 = const OFF_FLOATS + 32,
        f6 = const OFF_FLOATS + 48,
        i0 = const OFF_INTS,
        i2 = const OFF_INTS + 16,
        i4 = const OFF_INTS + 32,
        i6 = const OFF_INTS + 48,
        code = const OFF_CODE,
        ret = const OFF_RET,
        fret = const OFF_FRET,
    )
}

/// x9 = stub identity, arguments as delivered by the native caller
#[unsafe(naked)]
pub(super) unsafe extern "C" fn callback_entry() {
    naked_asm!(
        "stp x29, x30, [sp, #-16]!",
        "mov x29, sp",
        "sub sp, sp, #{size}",
        "str x9, [sp, #{code}]",
        "add x10, x29, #16",
        "str x10, [sp, #{stack}]",
        "str xzr, [sp, #{words}]",
        "stp x0, x1, [sp, #{i0}]",
        "stp x2, x3, [sp, #{i2}]",
        "stp x4, x5, [sp, #{i4}]",
        "stp x6, x7, [sp, #{i6}]",
        "stp d0, d1, [sp, #{f0}]",
        "stp d2, d3, [sp, #{f2}]",
        "stp d4, d5, [sp, #{f4}]",
        "stp d6, d7, [sp, #{f6}]",
        "mov x0, sp",
        "bl {dispatch}",
        "ldp x0, x1, [sp, #{ret}]",
        "ldp d0, d1, [sp, #{fret}]",
        "mov sp, x29",
        "ldp x29, x30, [sp], #16",
        "ret",
        size = const FRAME_SIZE,
        code = const OFF_CODE,
        stack = const OFF_STACK,
        words = const OFF_STACK_WORDS,
        i0 = const OFF_INTS,
        i2 = const OFF_INTS + 16,
        i4 = const OFF_INTS + 32,
        i6 = const OFF_INTS + 48,
        f0 = const OFF_FLOATS,
        f2 = const OFF_FLOATS + 16,
        f4 = const OFF_FLOATS + 32,
        f6 = const OFF_FLOATS + 48,
        ret = const OFF_RET,
        fret = const OFF_FRET,
        dispatch = sym dispatch_callback,
    )
}
