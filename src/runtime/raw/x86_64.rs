//! x86-64 transfer routines (System V and Windows x64)

use core::arch::naked_asm;

use super::{
    RawRegisterFrame, FRAME_SIZE, OFF_CODE, OFF_FLOATS, OFF_FRET, OFF_INTS, OFF_RET, OFF_STACK,
    OFF_STACK_WORDS, STACK_WORDS,
};
use crate::ffi::dispatch_callback;

/// Home space a Windows callee may use above its return address
#[cfg(windows)]
const SHADOW: usize = 32;

#[cfg(not(windows))]
pub(super) use sysv::{callback_entry, raw_call};
#[cfg(windows)]
pub(super) use win64::{callback_entry, raw_call};

#[cfg(not(windows))]
mod sysv {
    use super::*;

    /// rdi = frame
    #[unsafe(naked)]
    pub unsafe extern "C" fn raw_call(frame: *mut RawRegisterFrame) {
        naked_asm!(
            "push rbp",
            "mov rbp, rsp",
            "push rbx",
            // 8 bytes keep rsp 16-byte aligned below the stack area
            "sub rsp, {area} + 8",
            "mov rbx, rdi",
            "mov rdi, rsp",
            "mov rsi, [rbx + {stack}]",
            "mov rcx, [rbx + {words}]",
            "rep movsq",
            "movsd xmm0, [rbx + {floats}]",
            "movsd xmm1, [rbx + {floats} + 8]",
            "movsd xmm2, [rbx + {floats} + 16]",
            "movsd xmm3, [rbx + {floats} + 24]",
            "movsd xmm4, [rbx + {floats} + 32]",
            "movsd xmm5, [rbx + {floats} + 40]",
            "movsd xmm6, [rbx + {floats} + 48]",
            "movsd xmm7, [rbx + {floats} + 56]",
            "mov rdi, [rbx + {ints}]",
            "mov rsi, [rbx + {ints} + 8]",
            "mov rdx, [rbx + {ints} + 16]",
            "mov rcx, [rbx + {ints} + 24]",
            "mov r8, [rbx + {ints} + 32]",
            "mov r9, [rbx + {ints} + 40]",
            "mov r11, [rbx + {code}]",
            // al bounds the vector registers a variadic callee must save
            "mov eax, 8",
            "call r11",
            "mov [rbx + {ret}], rax",
            "mov [rbx + {ret} + 8], rdx",
            "movsd [rbx + {fret}], xmm0",
            "movsd [rbx + {fret} + 8], xmm1",
            "lea rsp, [rbp - 8]",
            "pop rbx",
            "pop rbp",
            "ret",
            area = const STACK_WORDS * 8,
            stack = const OFF_STACK,
            words = const OFF_STACK_WORDS,
            floats = const OFF_FLOATS,
            ints = const OFF_INTS,
            code = const OFF_CODE,
            ret = const OFF_RET,
            fret = const OFF_FRET,
        )
    }

    /// r10 = stub identity, arguments as delivered by the native caller
    #[unsafe(naked)]
    pub unsafe extern "C" fn callback_entry() {
        naked_asm!(
            "push rbp",
            "mov rbp, rsp",
            "sub rsp, {size}",
            "mov [rsp + {code}], r10",
            "lea rax, [rbp + 16]",
            "mov [rsp + {stack}], rax",
            "mov qword ptr [rsp + {words}], 0",
            "mov [rsp + {ints}], rdi",
            "mov [rsp + {ints} + 8], rsi",
            "mov [rsp + {ints} + 16], rdx",
            "mov [rsp + {ints} + 24], rcx",
            "mov [rsp + {ints} + 32], r8",
            "mov [rsp + {ints} + 40], r9",
            "movsd [rsp + {floats}], xmm0",
            "movsd [rsp + {floats} + 8], xmm1",
            "movsd [rsp + {floats} + 16], xmm2",
            "movsd [rsp + {floats} + 24], xmm3",
            "movsd [rsp + {floats} + 32], xmm4",
            "movsd [rsp + {floats} + 40], xmm5",
            "movsd [rsp + {floats} + 48], xmm6",
            "movsd [rsp + {floats} + 56], xmm7",
            "mov rdi, rsp",
            "call {dispatch}",
            "mov rax, [rsp + {ret}]",
            "mov rdx, [rsp + {ret} + 8]",
            "movsd xmm0, [rsp + {fret}]",
            "movsd xmm1, [rsp + {fret} + 8]",
            "mov rsp, rbp",
            "pop rbp",
            "ret",
            size = const FRAME_SIZE,
            code = const OFF_CODE,
            stack = const OFF_STACK,
            words = const OFF_STACK_WORDS,
            ints = const OFF_INTS,
            floats = const OFF_FLOATS,
            ret = const OFF_RET,
            fret = const OFF_FRET,
            dispatch = sym dispatch_callback,
        )
    }
}

#[cfg(windows)]
mod win64 {
    use super::*;

    /// rcx = frame. The copied stack image starts with the shadow area.
    #[unsafe(naked)]
    pub unsafe extern "C" fn raw_call(frame: *mut RawRegisterFrame) {
        naked_asm!(
            "push rbp",
            "mov rbp, rsp",
            "push rbx",
            "push rsi",
            "push rdi",
            "sub rsp, {area} + 8",
            "mov rbx, rcx",
            "mov rdi, rsp",
            "mov rsi, [rbx + {stack}]",
            "mov rcx, [rbx + {words}]",
            "rep movsq",
            "movsd xmm0, [rbx + {floats}]",
            "movsd xmm1, [rbx + {floats} + 8]",
            "movsd xmm2, [rbx + {floats} + 16]",
            "movsd xmm3, [rbx + {floats} + 24]",
            "mov rcx, [rbx + {ints}]",
            "mov rdx, [rbx + {ints} + 8]",
            "mov r8, [rbx + {ints} + 16]",
            "mov r9, [rbx + {ints} + 24]",
            "mov rax, [rbx + {code}]",
            "call rax",
            "mov [rbx + {ret}], rax",
            "mov [rbx + {ret} + 8], rdx",
            "movsd [rbx + {fret}], xmm0",
            "movsd [rbx + {fret} + 8], xmm1",
            "lea rsp, [rbp - 24]",
            "pop rdi",
            "pop rsi",
            "pop rbx",
            "pop rbp",
            "ret",
            area = const STACK_WORDS * 8,
            stack = const OFF_STACK,
            words = const OFF_STACK_WORDS,
            floats = const OFF_FLOATS,
            ints = const OFF_INTS,
            code = const OFF_CODE,
            ret = const OFF_RET,
            fret = const OFF_FRET,
        )
    }

    /// r10 = stub identity. The frame sits above a fresh shadow area.
    #[unsafe(naked)]
    pub unsafe extern "C" fn callback_entry() {
        naked_asm!(
            "push rbp",
            "mov rbp, rsp",
            "sub rsp, {shadow} + {size}",
            "mov [rsp + {shadow} + {code}], r10",
            "lea rax, [rbp + 16]",
            "mov [rsp + {shadow} + {stack}], rax",
            "mov qword ptr [rsp + {shadow} + {words}], 0",
            "mov [rsp + {shadow} + {ints}], rcx",
            "mov [rsp + {shadow} + {ints} + 8], rdx",
            "mov [rsp + {shadow} + {ints} + 16], r8",
            "mov [rsp + {shadow} + {ints} + 24], r9",
            "movsd [rsp + {shadow} + {floats}], xmm0",
            "movsd [rsp + {shadow} + {floats} + 8], xmm1",
            "movsd [rsp + {shadow} + {floats} + 16], xmm2",
            "movsd [rsp + {shadow} + {floats} + 24], xmm3",
            "lea rcx, [rsp + {shadow}]",
            "call {dispatch}",
            "mov rax, [rsp + {shadow} + {ret}]",
            "mov rdx, [rsp + {shadow} + {ret} + 8]",
            "movsd xmm0, [rsp + {shadow} + {fret}]",
            "movsd xmm1, [rsp + {shadow} + {fret} + 8]",
            "mov rsp, rbp",
            "pop rbp",
            "ret",
            shadow = const SHADOW,
            size = const FRAME_SIZE,
            code = const OFF_CODE,
            stack = const OFF_STACK,
            words = const OFF_STACK_WORDS,
            ints = const OFF_INTS,
            floats = const OFF_FLOATS,
            ret = const OFF_RET,
            fret = const OFF_FRET,
            dispatch = sym dispatch_callback,
        )
    }
}
