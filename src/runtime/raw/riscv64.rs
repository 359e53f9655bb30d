//! RISC-V LP64D transfer routines

use core::arch::naked_asm;

use super::{
    RawRegisterFrame, FRAME_SIZE, OFF_CODE, OFF_FLOATS, OFF_FRET, OFF_INTS, OFF_RET, OFF_STACK,
    OFF_STACK_WORDS, STACK_WORDS,
};
use crate::ffi::dispatch_callback;

/// a0 = frame
#[unsafe(naked)]
pub(super) unsafe extern "C" fn raw_call(frame: *mut RawRegisterFrame) {
    naked_asm!(
        "addi sp, sp, -32",
        "sd ra, 24(sp)",
        "sd s0, 16(sp)",
        "sd s1, 8(sp)",
        "addi s0, sp, 32",
        "mv s1, a0",
        "addi sp, sp, -{area}",
        "ld t0, {stack}(s1)",
        "ld t1, {words}(s1)",
        "mv t2, sp",
        "beqz t1, 3f",
        "2:",
        "ld t3, 0(t0)",
        "sd t3, 0(t2)",
        "addi t0, t0, 8",
        "addi t2, t2, 8",
        "addi t1, t1, -1",
        "bnez t1, 2b",
        "3:",
        "fld fa0, {f0}(s1)",
        "fld fa1, {f1}(s1)",
        "fld fa2, {f2}(s1)",
        "fld fa3, {f3}(s1)",
        "fld fa4, {f4}(s1)",
        "fld fa5, {f5}(s1)",
        "fld fa6, {f6}(s1)",
        "fld fa7, {f7}(s1)",
        "ld a0, {i0}(s1)",
        "ld a1, {i1}(s1)",
        "ld a2, {i2}(s1)",
        "ld a3, {i3}(s1)",
        "ld a4, {i4}(s1)",
        "ld a5, {i5}(s1)",
        "ld a6, {i6}(s1)",
        "ld a7, {i7}(s1)",
        "ld t0, {code}(s1)",
        "jalr ra, 0(t0)",
        "sd a0, {r0}(s1)",
        "sd a1, {r1}(s1)",
        "fsd fa0, {fr0}(s1)",
        "fsd fa1, {fr1}(s1)",
        "addi sp, s0, -32",
        "ld s1, 8(sp)",
        "ld s0, 16(sp)",
        "ld ra, 24(sp)",
        "addi sp, sp, 32",
        "ret",
        area = const STACK_WORDS * 8,
        stack = const OFF_STACK,
        words = const OFF_STACK_WORDS,
        f0 = const OFF_FLOATS,
        f1 = const OFF_FLOATS + 8,
        f2 = const OFF_FLOATS + 16,
        f3 = const OFF_FLOATS + 24,
        f4 = const OFF_FLOATS + 32,
        f5 = const OFF_FLOATS + 40,
        f6 = const OFF_FLOATS + 48,
        f7 = const OFF_FLOATS + 56,
        i0 = const OFF_INTS,
        i1 = const OFF_INTS + 8,
        i2 = const OFF_INTS + 16,
        i3 = const OFF_INTS + 24,
        i4 = const OFF_INTS + 32,
        i5 = const OFF_INTS + 40,
        i6 = const OFF_INTS + 48,
        i7 = const OFF_INTS + 56,
        code = const OFF_CODE,
        r0 = const OFF_RET,
        r1 = const OFF_RET + 8,
        fr0 = const OFF_FRET,
        fr1 = const OFF_FRET + 8,
    )
}

/// t1 = stub identity, arguments as delivered by the native caller
#[unsafe(naked)]
pub(super) unsafe extern "C" fn callback_entry() {
    naked_asm!(
        "addi sp, sp, -{total}",
        "sd ra, {ra_slot}(sp)",
        "sd s0, {size}(sp)",
        "addi s0, sp, {total}",
        "sd t1, {code}(sp)",
        "sd s0, {stack}(sp)",
        "sd zero, {words}(sp)",
        "sd a0, {i0}(sp)",
        "sd a1, {i1}(sp)",
        "sd a2, {i2}(sp)",
        "sd a3, {i3}(sp)",
        "sd a4, {i4}(sp)",
        "sd a5, {i5}(sp)",
        "sd a6, {i6}(sp)",
        "sd a7, {i7}(sp)",
        "fsd fa0, {f0}(sp)",
        "fsd fa1, {f1}(sp)",
        "fsd fa2, {f2}(sp)",
        "fsd fa3, {f3}(sp)",
        "fsd fa4, {f4}(sp)",
        "fsd fa5, {f5}(sp)",
        "fsd fa6, {f6}(sp)",
        "fsd fa7, {f7}(sp)",
        "mv a0, sp",
        "call {dispatch}",
        "ld a0, {r0}(sp)",
        "ld a1, {r1}(sp)",
        "fld fa0, {fr0}(sp)",
        "fld fa1, {fr1}(sp)",
        "ld ra, {ra_slot}(sp)",
        "ld s0, {size}(sp)",
        "addi sp, sp, {total}",
        "ret",
        total = const FRAME_SIZE + 16,
        size = const FRAME_SIZE,
        ra_slot = const FRAME_SIZE + 8,
        code = const OFF_CODE,
        stack = const OFF_STACK,
        words = const OFF_STACK_WORDS,
        i0 = const OFF_INTS,
        i1 = const OFF_INTS + 8,
        i2 = const OFF_INTS + 16,
        i3 = const OFF_INTS + 24,
        i4 = const OFF_INTS + 32,
        i5 = const OFF_INTS + 40,
        i6 = const OFF_INTS + 48,
        i7 = const OFF_INTS + 56,
        f0 = const OFF_FLOATS,
        f1 = const OFF_FLOATS + 8,
        f2 = const OFF_FLOATS + 16,
        f3 = const OFF_FLOATS + 24,
        f4 = const OFF_FLOATS + 32,
        f5 = const OFF_FLOATS + 40,
        f6 = const OFF_FLOATS + 48,
        f7 = const OFF_FLOATS + 56,
        r0 = const OFF_RET,
        r1 = const OFF_RET + 8,
        fr0 = const OFF_FRET,
        fr1 = const OFF_FRET + 8,
        dispatch = sym dispatch_callback,
    )
}
