//! Type marshaling - host values ↔ raw machine words
//!
//! Outbound, a [`MarshalContext`] converts each [`Value`] into the bits its
//! [`TypeClass`] requires and writes them into the register or stack
//! location the plan assigned. Strings are copied into NUL-terminated
//! buffers owned by the context, which the caller keeps alive until the
//! native call has returned.
//!
//! Inbound (callbacks) and on return, raw words are decoded back into
//! values. Booleans are decided by the least significant byte only.

use std::ffi::{CStr, CString};

use super::error::{FfiError, FfiResult};
use super::plan::{ArgSlot, CallPlan, Location, ReturnLocation};
use super::types::{TypeClass, Value};
use crate::arch::Convention;
use crate::runtime::raw::{RawRegisterFrame, STACK_WORDS};

/// Marshal context for one outbound call
///
/// Tracks the C strings handed to native code so they outlive the call.
#[derive(Default)]
pub struct MarshalContext {
    strings: Vec<CString>,
}

impl MarshalContext {
    /// Create a new marshal context
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of string buffers currently owned
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    /// Bits of argument `index` for `class`, before register extension
    pub fn encode(&mut self, index: usize, class: TypeClass, value: &Value) -> FfiResult<u64> {
        match (class, value) {
            (TypeClass::CString, Value::String(s)) => {
                let owned = CString::new(s.as_bytes())
                    .map_err(|e| FfiError::InvalidString(format!("argument {}: {}", index, e)))?;
                let ptr = owned.as_ptr() as u64;
                // Moving the CString does not move its heap buffer.
                self.strings.push(owned);
                Ok(ptr)
            }
            _ => encode_scalar(index, class, value),
        }
    }

    /// Fill `frame` and `stack` with `args` as laid out by `plan`
    pub fn load_frame(
        &mut self,
        plan: &CallPlan,
        args: &[Value],
        frame: &mut RawRegisterFrame,
        stack: &mut [u64; STACK_WORDS],
    ) -> FfiResult<()> {
        if args.len() != plan.arity() {
            return Err(FfiError::ArityMismatch {
                expected: plan.arity(),
                got: args.len(),
            });
        }
        if plan.stack_words() > STACK_WORDS {
            return Err(FfiError::TooManyArguments {
                count: plan.arity(),
                max: super::plan::MAX_ARGS,
            });
        }

        let cc = plan.abi.convention();
        for (index, (slot, value)) in plan.slots.iter().zip(args).enumerate() {
            let bits = self.encode(index, slot.class, value)?;
            place(cc, slot, stack_len(plan, slot.class), bits, frame, stack);
        }
        frame.stack = stack.as_mut_ptr();
        frame.stack_words = plan.stack_words();
        Ok(())
    }
}

/// Bits of a non-string value for `class`, before register extension
pub fn encode_scalar(index: usize, class: TypeClass, value: &Value) -> FfiResult<u64> {
    let mismatch = || FfiError::TypeMismatch {
        index,
        expected: class,
        got: value.type_name(),
    };
    match class {
        TypeClass::F32 => match *value {
            Value::F32(v) => Ok(v.to_bits() as u64),
            Value::F64(v) => Ok((v as f32).to_bits() as u64),
            _ => Err(mismatch()),
        },
        TypeClass::F64 => value.as_f64().map(f64::to_bits).ok_or_else(mismatch),
        TypeClass::Bool => match *value {
            Value::Bool(b) => Ok(b as u64),
            _ => Err(mismatch()),
        },
        TypeClass::Void => Err(mismatch()),
        // Integers, pointers and raw string addresses
        _ => value.int_bits().ok_or_else(mismatch),
    }
}

/// Register or stack image of an encoded value
fn register_image(cc: &dyn Convention, class: TypeClass, bits: u64, float_reg: bool) -> u64 {
    match class {
        TypeClass::F32 if float_reg => cc.box_f32(bits as u32),
        TypeClass::F32 | TypeClass::F64 => bits,
        _ => cc.widen(class, bits),
    }
}

/// Bytes a stack argument of `class` occupies under `plan`
fn stack_len(plan: &CallPlan, class: TypeClass) -> usize {
    if plan.abi.convention().packed_stack() && !plan.variadic {
        class.size()
    } else {
        8
    }
}

fn place(
    cc: &dyn Convention,
    slot: &ArgSlot,
    stack_len: usize,
    bits: u64,
    frame: &mut RawRegisterFrame,
    stack: &mut [u64; STACK_WORDS],
) {
    match slot.location {
        Location::IntReg(r) => frame.ints[r as usize] = register_image(cc, slot.class, bits, false),
        Location::FloatReg(r) => {
            frame.floats[r as usize] = register_image(cc, slot.class, bits, true)
        }
        Location::Mirrored(r) => {
            frame.floats[r as usize] = register_image(cc, slot.class, bits, true);
            frame.ints[r as usize] = register_image(cc, slot.class, bits, false);
        }
        Location::Stack { offset } => {
            write_stack(
                stack,
                offset as usize,
                stack_len,
                register_image(cc, slot.class, bits, false),
            );
        }
    }
}

/// Write the low `len` bytes of `value` at a byte offset of the stack image
fn write_stack(stack: &mut [u64; STACK_WORDS], offset: usize, len: usize, value: u64) {
    for (i, byte) in value.to_le_bytes().iter().take(len).enumerate() {
        let pos = offset + i;
        let shift = (pos % 8) * 8;
        let word = &mut stack[pos / 8];
        *word = (*word & !(0xFF << shift)) | ((*byte as u64) << shift);
    }
}

/// Decode a raw word as a value of `class`.
///
/// # Safety
///
/// For `CString`, `bits` must be null or point at a NUL-terminated buffer.
pub unsafe fn decode(class: TypeClass, bits: u64) -> Value {
    match class {
        TypeClass::Void => Value::Void,
        TypeClass::I8 => Value::I8(bits as i8),
        TypeClass::I16 => Value::I16(bits as i16),
        TypeClass::I32 => Value::I32(bits as i32),
        TypeClass::I64 => Value::I64(bits as i64),
        TypeClass::U8 => Value::U8(bits as u8),
        TypeClass::U16 => Value::U16(bits as u16),
        TypeClass::U32 => Value::U32(bits as u32),
        TypeClass::U64 => Value::U64(bits),
        TypeClass::F32 => Value::F32(f32::from_bits(bits as u32)),
        TypeClass::F64 => Value::F64(f64::from_bits(bits)),
        TypeClass::Pointer => Value::Pointer(bits as usize),
        TypeClass::Bool => Value::Bool(bits as u8 != 0),
        TypeClass::CString => {
            let ptr = bits as usize as *const libc::c_char;
            if ptr.is_null() {
                Value::String(String::new())
            } else {
                Value::String(CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        }
    }
}

/// Decode the return registers captured in `frame`.
///
/// # Safety
///
/// See [`decode`]; the plan's return class must match the callee.
pub unsafe fn decode_return(plan: &CallPlan, frame: &RawRegisterFrame) -> Value {
    match plan.ret_location {
        ReturnLocation::None => Value::Void,
        ReturnLocation::Int => decode(plan.ret, frame.ret[0]),
        ReturnLocation::IntLowByte => Value::Bool(frame.ret[0] as u8 != 0),
        ReturnLocation::Float => decode(plan.ret, frame.fret[0]),
    }
}

/// Decode the incoming argument `slot` from a callback frame.
///
/// # Safety
///
/// `frame.stack` must be the native caller's argument area and the plan
/// must describe the caller's actual call.
pub unsafe fn read_arg(plan: &CallPlan, slot: &ArgSlot, frame: &RawRegisterFrame) -> Value {
    let bits = match slot.location {
        Location::IntReg(r) => frame.ints[r as usize],
        Location::FloatReg(r) | Location::Mirrored(r) => frame.floats[r as usize],
        Location::Stack { offset } => {
            frame.stack_bytes(offset as usize, stack_len(plan, slot.class))
        }
    };
    decode(slot.class, bits)
}

/// Write a callback result into the return registers of `frame`.
///
/// Every return word is defined: unused ones are zero and narrow values
/// are extended the way the ABI expects.
pub fn write_return(plan: &CallPlan, value: &Value, frame: &mut RawRegisterFrame) -> FfiResult<()> {
    frame.ret = [0; 2];
    frame.fret = [0; 2];

    let cc = plan.abi.convention();
    match plan.ret_location {
        ReturnLocation::None => {}
        ReturnLocation::Int => {
            let bits = encode_scalar(0, plan.ret, value)?;
            frame.ret[0] = cc.widen(plan.ret, bits);
        }
        ReturnLocation::IntLowByte => {
            frame.ret[0] = encode_scalar(0, plan.ret, value)? & 0xFF;
        }
        ReturnLocation::Float => {
            let bits = encode_scalar(0, plan.ret, value)?;
            frame.fret[0] = register_image(cc, plan.ret, bits, true);
        }
    }
    Ok(())
}
