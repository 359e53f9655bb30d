//! Outbound Dispatcher
//!
//! Loads marshaled arguments into a [`RawRegisterFrame`], transfers control
//! to a native address and demarshals the captured return registers.
//!
//! Two surfaces sit on top of the same transfer:
//!
//! - [`ForeignFunction`]: a resolved address bound to a cached [`CallPlan`],
//!   called with [`Value`]s or through [`ForeignFunction::call_as`].
//! - [`syscall_n`]: the untyped escape hatch taking up to [`MAX_ARGS`]
//!   machine words and returning the raw return registers.

use std::sync::Arc;

use tracing::trace;

use super::error::{FfiError, FfiResult};
use super::loader::Library;
use super::marshal::{self, MarshalContext};
use super::plan::{CallPlan, MAX_ARGS};
use super::registry::SignatureRegistry;
use super::types::{NativeType, Signature, Value};
use crate::arch::Abi;
use crate::runtime::raw::{self, RawRegisterFrame, STACK_WORDS};

/// Raw return registers of a generic call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReturn {
    /// Primary integer return register
    pub r1: usize,
    /// Secondary integer return register (high half of wide results)
    pub r2: usize,
    /// First floating-point return register, as a double
    pub f1: f64,
}

impl RawReturn {
    fn from_frame(frame: &RawRegisterFrame) -> Self {
        Self {
            r1: frame.ret[0] as usize,
            r2: frame.ret[1] as usize,
            f1: f64::from_bits(frame.fret[0]),
        }
    }

    /// The float register read as a single-precision result
    pub fn f1_as_f32(&self) -> f32 {
        f32::from_bits(self.f1.to_bits() as u32)
    }
}

/// Call `address` with up to [`MAX_ARGS`] machine-word arguments.
///
/// Every argument travels in the integer register or stack word of its
/// position, as a variadic call would pass it.
///
/// # Safety
///
/// `address` must be a function that accepts the given words.
pub unsafe fn syscall_n(address: usize, args: &[usize]) -> FfiResult<RawReturn> {
    if args.len() > MAX_ARGS {
        return Err(FfiError::ArityMismatch {
            expected: MAX_ARGS,
            got: args.len(),
        });
    }

    let plan = SignatureRegistry::native()?.plan_words(args.len())?;
    let values: Vec<Value> = args.iter().map(|&a| Value::U64(a as u64)).collect();

    let mut ctx = MarshalContext::new();
    let mut stack = [0u64; STACK_WORDS];
    let mut frame = RawRegisterFrame::new(address);
    ctx.load_frame(&plan, &values, &mut frame, &mut stack)?;

    trace!(address = format_args!("{:#x}", address), words = args.len(), "syscall_n");
    raw::call(&mut frame)?;
    Ok(RawReturn::from_frame(&frame))
}

fn check_native(plan: &CallPlan) -> FfiResult<()> {
    let native = Abi::require_native()?;
    if plan.abi != native {
        return Err(FfiError::AbiMismatch {
            plan: plan.abi,
            native,
        });
    }
    Ok(())
}

/// Call `address` as described by `plan` and demarshal its result.
///
/// Argument checks (arity, type classes, string contents) all happen
/// before control reaches native code. String buffers live until the
/// result has been decoded.
///
/// # Safety
///
/// `plan` must describe the real signature of the function at `address`.
pub unsafe fn call(address: usize, plan: &CallPlan, args: &[Value]) -> FfiResult<Value> {
    check_native(plan)?;

    let mut ctx = MarshalContext::new();
    let mut stack = [0u64; STACK_WORDS];
    let mut frame = RawRegisterFrame::new(address);
    ctx.load_frame(plan, args, &mut frame, &mut stack)?;

    trace!(
        address = format_args!("{:#x}", address),
        signature = %plan.signature(),
        strings = ctx.string_count(),
        "native call"
    );
    raw::call(&mut frame)?;

    // A returned string may point into one of our argument buffers.
    let result = marshal::decode_return(plan, &frame);
    drop(ctx);
    Ok(result)
}

/// Call `address` as described by `plan`, returning the raw registers.
///
/// # Safety
///
/// As for [`call`].
pub unsafe fn call_raw(address: usize, plan: &CallPlan, args: &[Value]) -> FfiResult<RawReturn> {
    check_native(plan)?;

    let mut ctx = MarshalContext::new();
    let mut stack = [0u64; STACK_WORDS];
    let mut frame = RawRegisterFrame::new(address);
    ctx.load_frame(plan, args, &mut frame, &mut stack)?;

    trace!(address = format_args!("{:#x}", address), "native call (raw)");
    raw::call(&mut frame)?;
    Ok(RawReturn::from_frame(&frame))
}

/// A native function bound to its call plan
#[derive(Clone)]
pub struct ForeignFunction {
    address: usize,
    plan: Arc<CallPlan>,
    name: Option<String>,
    /// Keeps the defining library loaded
    library: Option<Library>,
}

impl ForeignFunction {
    /// Bind `address` to `signature` using the native registry.
    ///
    /// # Safety
    ///
    /// `signature` must match the function's real signature.
    pub unsafe fn new(address: usize, signature: &Signature) -> FfiResult<Self> {
        let plan = SignatureRegistry::native()?.plan_signature(signature)?;
        Self::from_plan(address, plan)
    }

    /// Bind `address` to an existing plan.
    ///
    /// # Safety
    ///
    /// `plan` must describe the function's real signature.
    pub unsafe fn from_plan(address: usize, plan: Arc<CallPlan>) -> FfiResult<Self> {
        if address == 0 {
            return Err(FfiError::InvalidSymbol("null function address".to_string()));
        }
        check_native(&plan)?;
        Ok(Self {
            address,
            plan,
            name: None,
            library: None,
        })
    }

    pub(crate) fn with_library(mut self, name: &str, library: Library) -> Self {
        self.name = Some(name.to_string());
        self.library = Some(library);
        self
    }

    /// Function address
    pub fn address(&self) -> usize {
        self.address
    }

    /// Shared call plan
    pub fn plan(&self) -> &Arc<CallPlan> {
        &self.plan
    }

    pub fn signature(&self) -> Signature {
        self.plan.signature()
    }

    /// Symbol name, when resolved from a library
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Library the function was resolved from
    pub fn library(&self) -> Option<&Library> {
        self.library.as_ref()
    }

    /// Call with host values
    ///
    /// # Safety
    ///
    /// The bound signature must be the function's real signature, and any
    /// pointer arguments must be valid for what the function does with them.
    pub unsafe fn call(&self, args: &[Value]) -> FfiResult<Value> {
        call(self.address, &self.plan, args)
    }

    /// Call and convert the result to `R`
    ///
    /// # Safety
    ///
    /// As for [`ForeignFunction::call`].
    pub unsafe fn call_as<R: NativeType>(&self, args: &[Value]) -> FfiResult<R> {
        self.call(args).map(|value| R::from_value(&value))
    }

    /// Call returning the raw registers
    ///
    /// # Safety
    ///
    /// As for [`ForeignFunction::call`].
    pub unsafe fn call_raw(&self, args: &[Value]) -> FfiResult<RawReturn> {
        call_raw(self.address, &self.plan, args)
    }
}

impl std::fmt::Debug for ForeignFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignFunction")
            .field("name", &self.name)
            .field("address", &format_args!("{:#x}", self.address))
            .field("signature", &self.plan.signature())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::types::TypeClass;

    extern "C" fn add3(a: i64, b: i64, c: i64) -> i64 {
        a + b + c
    }

    extern "C" fn scale(x: f64, k: i32) -> f64 {
        x * k as f64
    }

    extern "C" fn wide() -> u64 {
        0xDEAD_BEEF_0000_0001
    }

    fn native_available() -> bool {
        Abi::native().is_some() && raw::callback_entry().is_ok()
    }

    #[test]
    fn test_syscall_n_words() {
        if !native_available() {
            return;
        }
        let ret = unsafe { syscall_n(add3 as usize, &[1, 2, 3]) }.unwrap();
        assert_eq!(ret.r1, 6);
    }

    #[test]
    fn test_syscall_n_rejects_too_many_words() {
        let words = [0usize; MAX_ARGS + 1];
        let err = unsafe { syscall_n(add3 as usize, &words) }.unwrap_err();
        assert_eq!(
            err,
            FfiError::ArityMismatch {
                expected: MAX_ARGS,
                got: MAX_ARGS + 1
            }
        );
    }

    #[test]
    fn test_foreign_function_mixed_args() {
        if !native_available() {
            return;
        }
        let sig = Signature::new(vec![TypeClass::F64, TypeClass::I32], TypeClass::F64);
        let f = unsafe { ForeignFunction::new(scale as usize, &sig) }.unwrap();
        let v = unsafe { f.call(&[Value::F64(1.25), Value::I32(4)]) }.unwrap();
        assert_eq!(v, Value::F64(5.0));
        let typed: f64 = unsafe { f.call_as(&[Value::F64(0.5), Value::I32(3)]) }.unwrap();
        assert_eq!(typed, 1.5);
    }

    #[test]
    fn test_call_raw_exposes_registers() {
        if !native_available() {
            return;
        }
        let sig = Signature::new(vec![], TypeClass::U64);
        let f = unsafe { ForeignFunction::new(wide as usize, &sig) }.unwrap();
        let raw = unsafe { f.call_raw(&[]) }.unwrap();
        assert_eq!(raw.r1 as u64, 0xDEAD_BEEF_0000_0001);
    }

    #[test]
    fn test_null_address_rejected() {
        if !native_available() {
            return;
        }
        let sig = Signature::new(vec![], TypeClass::Void);
        assert!(unsafe { ForeignFunction::new(0, &sig) }.is_err());
    }

    #[test]
    fn test_foreign_abi_plan_rejected() {
        let Some(native) = Abi::native() else {
            return;
        };
        let foreign = Abi::ALL.iter().copied().find(|&a| a != native).unwrap();
        let plan = foreign
            .convention()
            .plan(&[TypeClass::I64], TypeClass::I64, false)
            .unwrap();
        let err = unsafe { call(add3 as usize, &plan, &[Value::I64(1)]) }.unwrap_err();
        assert_eq!(err, FfiError::AbiMismatch { plan: foreign, native });
    }

    #[test]
    fn test_type_mismatch_before_transfer() {
        if !native_available() {
            return;
        }
        let sig = Signature::new(vec![TypeClass::I64; 3], TypeClass::I64);
        // Address is never called: marshaling fails first.
        let f = unsafe { ForeignFunction::new(1, &sig) }.unwrap();
        let err = unsafe { f.call(&[Value::I64(1), Value::F64(2.0), Value::I64(3)]) }.unwrap_err();
        assert!(matches!(err, FfiError::TypeMismatch { index: 1, .. }));
    }
}
