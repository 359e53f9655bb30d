//! Typed closure adapters
//!
//! [`HostFn`] lets plain Rust closures over [`NativeType`] parameters be
//! registered as callbacks: the signature is derived from the closure's
//! types and arguments are converted from [`Value`]s on every call.
//!
//! ```ignore
//! let cmp = pool.register_fn(|a: *const i32, b: *const i32| unsafe { *a - *b })?;
//! ```

use super::plan::MAX_ARGS;
use super::types::{NativeType, Signature, Value};

/// A closure callable with values, for parameter tuple `Args`
pub trait HostFn<Args>: Send + Sync + 'static {
    /// Signature derived from the parameter and return types
    fn signature() -> Signature;

    /// Convert `args` and call the closure
    fn call_values(&self, args: &[Value]) -> Value;
}

macro_rules! impl_host_fn {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> HostFn<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: NativeType,
            $($arg: NativeType,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$($arg::CLASS),*], R::CLASS)
            }

            #[allow(non_snake_case, unused_variables, unused_mut)]
            fn call_values(&self, args: &[Value]) -> Value {
                let mut args = args.iter();
                $(let $arg = $arg::from_value(args.next().unwrap_or(&Value::Void));)*
                (self)($($arg),*).into_value()
            }
        }
    };
}

impl_host_fn!();
impl_host_fn!(A1);
impl_host_fn!(A1, A2);
impl_host_fn!(A1, A2, A3);
impl_host_fn!(A1, A2, A3, A4);
impl_host_fn!(A1, A2, A3, A4, A5);
impl_host_fn!(A1, A2, A3, A4, A5, A6);
impl_host_fn!(A1, A2, A3, A4, A5, A6, A7);
impl_host_fn!(A1, A2, A3, A4, A5, A6, A7, A8);
impl_host_fn!(A1, A2, A3, A4, A5, A6, A7, A8, A9);
impl_host_fn!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10);
impl_host_fn!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11);
impl_host_fn!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12);
impl_host_fn!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13);
impl_host_fn!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14);
impl_host_fn!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14, A15);

const _: () = assert!(MAX_ARGS == 15);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::types::TypeClass;

    fn signature_of<Args, F: HostFn<Args>>(_: &F) -> Signature {
        F::signature()
    }

    fn call<Args, F: HostFn<Args>>(f: &F, args: &[Value]) -> Value {
        f.call_values(args)
    }

    #[test]
    fn test_signature_from_closure_types() {
        let f = |a: i64, b: f64, c: bool| -> f32 { (a as f64 + b) as f32 * c as u8 as f32 };
        let sig = signature_of(&f);
        assert_eq!(sig.params, vec![TypeClass::I64, TypeClass::F64, TypeClass::Bool]);
        assert_eq!(sig.ret, TypeClass::F32);
        assert_eq!(
            call(&f, &[Value::I64(1), Value::F64(0.5), Value::Bool(true)]),
            Value::F32(1.5)
        );
    }

    #[test]
    fn test_zero_arity_and_unit_return() {
        let f = || {};
        let sig = signature_of(&f);
        assert!(sig.params.is_empty());
        assert_eq!(sig.ret, TypeClass::Void);
        assert_eq!(call(&f, &[]), Value::Void);
    }

    #[test]
    fn test_fifteen_arguments() {
        let f = |a: i32, b: i32, c: i32, d: i32, e: i32, f: i32, g: i32, h: i32,
                 i: i32, j: i32, k: i32, l: i32, m: i32, n: i32, o: i32| {
            a + b + c + d + e + f + g + h + i + j + k + l + m + n + o
        };
        assert_eq!(signature_of(&f).params.len(), 15);
        let args: Vec<Value> = (1..=15).map(Value::I32).collect();
        assert_eq!(call(&f, &args), Value::I32(120));
    }
}
