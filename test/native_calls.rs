//! Native Call Integration Tests
//!
//! Round trips through the outbound dispatcher and the callback pool using
//! functions defined in this file, so no external library is needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use dlbridge::ffi::{
    configure_global_pool, syscall_n, CallbackPool, FfiError, ForeignFunction, Signature,
    TypeClass, Value, DEFAULT_CALLBACK_CAPACITY, MAX_ARGS,
};
use dlbridge::{Abi, CallbackExecutor};

/// Native execution needs the host ABI
fn native() -> bool {
    Abi::native().is_some()
}

fn sig(params: &[TypeClass], ret: TypeClass) -> Signature {
    Signature::new(params.to_vec(), ret)
}

#[allow(clippy::too_many_arguments)]
extern "C" fn sum15(
    a: i64,
    b: i64,
    c: i64,
    d: i64,
    e: i64,
    f: i64,
    g: i64,
    h: i64,
    i: i64,
    j: i64,
    k: i64,
    l: i64,
    m: i64,
    n: i64,
    o: i64,
) -> i64 {
    a + b + c + d + e + f + g + h + i + j + k + l + m + n + o
}

/// Weighted so a swapped or dropped argument changes the result
#[allow(clippy::too_many_arguments)]
extern "C" fn weighted15(
    a: i32,
    b: i32,
    c: i32,
    d: i32,
    e: i32,
    f: i32,
    g: i32,
    h: i32,
    i: i32,
    j: i32,
    k: i32,
    l: i32,
    m: i32,
    n: i32,
    o: i32,
) -> i64 {
    [a, b, c, d, e, f, g, h, i, j, k, l, m, n, o]
        .iter()
        .enumerate()
        .map(|(w, &v)| (w as i64 + 1) * v as i64)
        .sum()
}

extern "C" fn dirty_register() -> u64 {
    0x7F59_48AE_9A00
}

extern "C" fn mixed(a: i32, x: f32, b: i64, y: f64, c: u8) -> f64 {
    a as f64 + x as f64 + b as f64 + y + c as f64
}

#[allow(clippy::too_many_arguments)]
extern "C" fn many_floats(
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
    g: f64,
    h: f64,
    i: f64,
    j: f64,
) -> f64 {
    a + 2.0 * b + 3.0 * c + 4.0 * d + 5.0 * e + 6.0 * f + 7.0 * g + 8.0 * h + 9.0 * i + 10.0 * j
}

extern "C" fn negate_i8(v: i8) -> i8 {
    v.wrapping_neg()
}

extern "C" fn apply(cb: extern "C" fn(i64) -> i64, v: i64) -> i64 {
    cb(v) + 1
}

// ============================================================================
// Outbound
// ============================================================================

#[test]
fn test_fifteen_integer_arguments() {
    if !native() {
        return;
    }
    let f = unsafe { ForeignFunction::new(sum15 as usize, &sig(&[TypeClass::I64; 15], TypeClass::I64)) }
        .unwrap();
    let args: Vec<Value> = (1..=15).map(Value::I64).collect();
    assert_eq!(unsafe { f.call(&args) }.unwrap(), Value::I64(120));
}

#[test]
fn test_fifteen_arguments_keep_their_order() {
    if !native() {
        return;
    }
    let f = unsafe {
        ForeignFunction::new(weighted15 as usize, &sig(&[TypeClass::I32; 15], TypeClass::I64))
    }
    .unwrap();
    let args: Vec<Value> = (1..=15).map(Value::I32).collect();
    let expected: i64 = (1..=15).map(|v: i64| v * v).sum();
    assert_eq!(unsafe { f.call(&args) }.unwrap(), Value::I64(expected));
}

#[test]
fn test_syscall_n_fifteen_words() {
    if !native() {
        return;
    }
    let words: Vec<usize> = (1..=MAX_ARGS).collect();
    let ret = unsafe { syscall_n(sum15 as usize, &words) }.unwrap();
    assert_eq!(ret.r1, 120);

    let too_many = vec![0usize; MAX_ARGS + 1];
    assert!(matches!(
        unsafe { syscall_n(sum15 as usize, &too_many) },
        Err(FfiError::ArityMismatch { .. })
    ));
}

#[test]
fn test_dirty_bool_return_reads_false() {
    if !native() {
        return;
    }
    let f = unsafe { ForeignFunction::new(dirty_register as usize, &sig(&[], TypeClass::Bool)) }
        .unwrap();
    assert_eq!(unsafe { f.call(&[]) }.unwrap(), Value::Bool(false));
    let as_bool: bool = unsafe { f.call_as(&[]) }.unwrap();
    assert!(!as_bool);
}

#[test]
fn test_mixed_int_and_float_arguments() {
    if !native() {
        return;
    }
    let f = unsafe {
        ForeignFunction::new(
            mixed as usize,
            &sig(
                &[TypeClass::I32, TypeClass::F32, TypeClass::I64, TypeClass::F64, TypeClass::U8],
                TypeClass::F64,
            ),
        )
    }
    .unwrap();
    let v = unsafe {
        f.call(&[
            Value::I32(-3),
            Value::F32(0.5),
            Value::I64(10),
            Value::F64(0.25),
            Value::U8(200),
        ])
    }
    .unwrap();
    assert_eq!(v, Value::F64(207.75));
}

#[test]
fn test_float_registers_spill_to_stack() {
    if !native() {
        return;
    }
    let f = unsafe {
        ForeignFunction::new(many_floats as usize, &sig(&[TypeClass::F64; 10], TypeClass::F64))
    }
    .unwrap();
    let args: Vec<Value> = (0..10).map(|_| Value::F64(1.0)).collect();
    assert_eq!(unsafe { f.call(&args) }.unwrap(), Value::F64(55.0));
}

#[test]
fn test_narrow_signed_return() {
    if !native() {
        return;
    }
    let f = unsafe { ForeignFunction::new(negate_i8 as usize, &sig(&[TypeClass::I8], TypeClass::I8)) }
        .unwrap();
    assert_eq!(unsafe { f.call(&[Value::I8(5)]) }.unwrap(), Value::I8(-5));
}

// ============================================================================
// Callbacks
// ============================================================================

#[test]
fn test_callback_as_function_pointer() {
    if !native() {
        return;
    }
    let pool = CallbackPool::new(4).unwrap();
    let handle = pool.register_fn(|v: i64| v * 3).unwrap();

    let cb: extern "C" fn(i64) -> i64 = unsafe { std::mem::transmute(handle.address()) };
    assert_eq!(cb(14), 42);
    assert_eq!(apply(cb, 2), 7);
}

#[test]
fn test_callback_through_outbound_call() {
    if !native() {
        return;
    }
    let pool = CallbackPool::new(4).unwrap();
    let handle = pool
        .register(&sig(&[TypeClass::I64], TypeClass::I64), |args| match args[0] {
            Value::I64(v) => Value::I64(v - 100),
            _ => Value::I64(0),
        })
        .unwrap();

    let f = unsafe {
        ForeignFunction::new(apply as usize, &sig(&[TypeClass::Pointer, TypeClass::I64], TypeClass::I64))
    }
    .unwrap();
    let v = unsafe { f.call(&[Value::Pointer(handle.address()), Value::I64(150)]) }.unwrap();
    assert_eq!(v, Value::I64(51));
}

#[test]
fn test_callback_fifteen_arguments() {
    if !native() {
        return;
    }
    let pool = CallbackPool::new(2).unwrap();
    let handle = pool
        .register_fn(
            |a: i32, b: i32, c: i32, d: i32, e: i32, f: i32, g: i32, h: i32, i: i32, j: i32,
             k: i32, l: i32, m: i32, n: i32, o: i32| {
                // Weight by position to catch misplaced stack arguments
                [a, b, c, d, e, f, g, h, i, j, k, l, m, n, o]
                    .iter()
                    .enumerate()
                    .map(|(w, &v)| (w as i64 + 1) * v as i64)
                    .sum::<i64>()
            },
        )
        .unwrap();

    let f = unsafe {
        ForeignFunction::new(handle.address(), &sig(&[TypeClass::I32; 15], TypeClass::I64))
    }
    .unwrap();
    let args: Vec<Value> = (1..=15).map(Value::I32).collect();
    let expected: i64 = (1..=15).map(|v: i64| v * v).sum();
    assert_eq!(unsafe { f.call(&args) }.unwrap(), Value::I64(expected));
}

#[test]
fn test_every_integer_width_round_trips() {
    if !native() {
        return;
    }
    let cases: Vec<(TypeClass, Vec<Value>)> = vec![
        (TypeClass::I8, vec![Value::I8(i8::MIN), Value::I8(i8::MAX), Value::I8(-1)]),
        (TypeClass::I16, vec![Value::I16(i16::MIN), Value::I16(i16::MAX), Value::I16(-1)]),
        (TypeClass::I32, vec![Value::I32(i32::MIN), Value::I32(i32::MAX), Value::I32(-1)]),
        (TypeClass::I64, vec![Value::I64(i64::MIN), Value::I64(i64::MAX), Value::I64(-1)]),
        (TypeClass::U8, vec![Value::U8(0), Value::U8(u8::MAX), Value::U8(0x80)]),
        (TypeClass::U16, vec![Value::U16(0), Value::U16(u16::MAX), Value::U16(0x8000)]),
        (TypeClass::U32, vec![Value::U32(0), Value::U32(u32::MAX), Value::U32(0x8000_0000)]),
        (TypeClass::U64, vec![Value::U64(0), Value::U64(u64::MAX), Value::U64(1 << 63)]),
    ];
    let pool = CallbackPool::new(cases.len()).unwrap();

    for (class, values) in cases {
        // Eight word arguments first so the value under test is spilled
        let mut params = vec![TypeClass::I64; 8];
        params.push(class);
        let signature = sig(&params, class);
        let handle = pool.register(&signature, |args| args[8].clone()).unwrap();
        let f = unsafe { ForeignFunction::new(handle.address(), &signature) }.unwrap();

        for value in values {
            let mut args: Vec<Value> = (0..8).map(|i| Value::I64(-i)).collect();
            args.push(value.clone());
            assert_eq!(unsafe { f.call(&args) }.unwrap(), value, "{}", class);
        }
    }
}

#[test]
fn test_callback_dirty_bool_argument() {
    if !native() {
        return;
    }
    let pool = CallbackPool::new(2).unwrap();
    let handle = pool.register_fn(|b: bool| b).unwrap();

    // Caller passes a full word whose low byte is zero
    let f = unsafe { ForeignFunction::new(handle.address(), &sig(&[TypeClass::U64], TypeClass::U64)) }
        .unwrap();
    assert_eq!(
        unsafe { f.call(&[Value::U64(0x7F59_48AE_9A00)]) }.unwrap(),
        Value::U64(0)
    );
    assert_eq!(
        unsafe { f.call(&[Value::U64(0x7F59_48AE_9A01)]) }.unwrap(),
        Value::U64(1)
    );
}

#[test]
fn test_callback_mixed_floats() {
    if !native() {
        return;
    }
    let pool = CallbackPool::new(2).unwrap();
    let handle = pool
        .register_fn(|a: i32, x: f32, b: i64, y: f64, c: u8| {
            a as f64 + x as f64 + b as f64 + y + c as f64
        })
        .unwrap();

    let cb: extern "C" fn(i32, f32, i64, f64, u8) -> f64 =
        unsafe { std::mem::transmute(handle.address()) };
    assert_eq!(cb(-3, 0.5, 10, 0.25, 200), 207.75);
}

#[test]
fn test_callback_from_many_threads() {
    if !native() {
        return;
    }
    let pool = CallbackPool::new(1).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handle = pool
        .register_fn(move |v: u64| {
            counter.fetch_add(1, Ordering::Relaxed);
            v + 1
        })
        .unwrap();
    let address = handle.address();

    let workers: Vec<_> = (0..8u64)
        .map(|t| {
            thread::spawn(move || {
                let cb: extern "C" fn(u64) -> u64 = unsafe { std::mem::transmute(address) };
                (0..500u64).map(|i| cb(t * 1000 + i)).sum::<u64>()
            })
        })
        .collect();

    let total: u64 = workers.into_iter().map(|w| w.join().unwrap()).sum();
    let expected: u64 = (0..8u64)
        .map(|t| (0..500u64).map(|i| t * 1000 + i + 1).sum::<u64>())
        .sum();
    assert_eq!(total, expected);
    assert_eq!(calls.load(Ordering::Relaxed), 4000);
}

#[test]
fn test_callback_on_executor_thread() {
    if !native() {
        return;
    }
    let executor = CallbackExecutor::spawn("dlbridge-host").unwrap();
    let pool = CallbackPool::new(1).unwrap();
    let handle = pool
        .register_on(&executor, &sig(&[TypeClass::I32], TypeClass::Bool), |_| {
            Value::Bool(thread::current().name() == Some("dlbridge-host"))
        })
        .unwrap();
    let address = handle.address();

    let workers: Vec<_> = (0..4)
        .map(|i| {
            thread::spawn(move || {
                let cb: extern "C" fn(i32) -> bool = unsafe { std::mem::transmute(address) };
                cb(i)
            })
        })
        .collect();
    for worker in workers {
        assert!(worker.join().unwrap());
    }
}

#[test]
fn test_pool_exhaustion_is_reported() {
    if !native() {
        return;
    }
    let pool = CallbackPool::new(1).unwrap();
    pool.register_fn(|| 1i32).unwrap();
    assert_eq!(pool.available(), 0);
    assert_eq!(
        pool.register_fn(|| 2i32).unwrap_err(),
        FfiError::PoolExhausted { capacity: 1 }
    );
}

// The only test in this binary that touches the process-wide pool
#[test]
fn test_global_pool_configuration_is_atomic() {
    if !native() {
        return;
    }
    let barrier = Arc::new(Barrier::new(4));
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                if i % 2 == 0 {
                    Some(configure_global_pool(7))
                } else {
                    CallbackPool::global().unwrap();
                    None
                }
            })
        })
        .collect();
    let configured = workers
        .into_iter()
        .filter_map(|w| w.join().unwrap())
        .any(|accepted| accepted);

    let capacity = CallbackPool::global().unwrap().capacity();
    if configured {
        assert_eq!(capacity, 7);
    } else {
        assert_eq!(capacity, DEFAULT_CALLBACK_CAPACITY);
    }

    assert!(!configure_global_pool(9));
    assert_eq!(CallbackPool::global().unwrap().capacity(), capacity);
}
