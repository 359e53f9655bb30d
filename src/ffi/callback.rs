//! Callback Trampoline Generator
//!
//! A [`CallbackPool`] is a fixed number of slots plus one executable stub
//! per slot, all prepared when the pool is created. Registering a closure
//! fills the next free slot and hands out that slot's stub address, a
//! plain C function pointer that stays valid for the rest of the process.
//!
//! ```text
//! native caller ──call──► stub[i]   (loads &slot[i], jumps)
//!                            │
//!                            ▼
//!                     callback_entry     (spills registers into a frame)
//!                            │
//!                            ▼
//!                   dispatch_callback    (plan → values → closure → registers)
//! ```
//!
//! Pools and their closures are never freed: native code may keep a stub
//! address indefinitely. Registration takes a lock; invocation only
//! dereferences the slot address carried by the stub.

use std::cell::Cell;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{const_mutex, Mutex};
use tracing::{debug, error, trace, warn};

use super::error::{FfiError, FfiResult};
use super::host_fn::HostFn;
use super::marshal::{read_arg, write_return};
use super::plan::CallPlan;
use super::registry::SignatureRegistry;
use super::types::{Signature, TypeClass, Value};
use crate::arch::Abi;
use crate::runtime::executor::CallbackExecutor;
use crate::runtime::raw::{self, RawRegisterFrame};
use crate::runtime::stub_arena::StubArena;

/// Capacity of the process-wide pool unless configured otherwise
pub const DEFAULT_CALLBACK_CAPACITY: usize = 2000;

/// Host closure invoked with demarshaled arguments
pub type Closure = Box<dyn Fn(&[Value]) -> Value + Send + Sync>;

struct Entry {
    plan: Arc<CallPlan>,
    closure: Closure,
    executor: Option<CallbackExecutor>,
}

/// One pool entry; its address is the identity baked into its stub.
struct Slot {
    index: usize,
    entry: OnceCell<Entry>,
}

struct PoolInner {
    abi: Abi,
    slots: Box<[Slot]>,
    arena: StubArena,
    next: Mutex<usize>,
}

/// Fixed-capacity pool of callback trampolines
#[derive(Clone, Copy)]
pub struct CallbackPool {
    inner: &'static PoolInner,
}

/// A registered callback
#[derive(Debug, Clone)]
pub struct CallbackHandle {
    address: usize,
    index: usize,
    plan: Arc<CallPlan>,
}

impl CallbackHandle {
    /// Native function pointer of the trampoline
    pub fn address(&self) -> usize {
        self.address
    }

    /// The trampoline as an opaque pointer
    pub fn as_ptr(&self) -> *const c_void {
        self.address as *const c_void
    }

    /// Slot index inside the owning pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// Plan the trampoline demarshals with
    pub fn plan(&self) -> &CallPlan {
        &self.plan
    }
}

/// Held while the global pool is created, so configuration and creation
/// cannot interleave.
static GLOBAL_CAPACITY: Mutex<usize> = const_mutex(DEFAULT_CALLBACK_CAPACITY);
static GLOBAL_POOL: OnceCell<CallbackPool> = OnceCell::new();

/// Set the capacity of the process-wide pool.
///
/// Returns `false` if the pool already exists; its capacity is fixed.
/// A `true` result guarantees the pool is created with `capacity`.
pub fn configure_global_pool(capacity: usize) -> bool {
    let mut configured = GLOBAL_CAPACITY.lock();
    if GLOBAL_POOL.get().is_some() {
        return false;
    }
    *configured = capacity;
    true
}

/// Register `closure` with the process-wide pool
pub fn new_callback<F>(signature: &Signature, closure: F) -> FfiResult<CallbackHandle>
where
    F: Fn(&[Value]) -> Value + Send + Sync + 'static,
{
    CallbackPool::global()?.register(signature, closure)
}

impl CallbackPool {
    /// Create a pool with `capacity` slots for the host ABI
    pub fn new(capacity: usize) -> FfiResult<Self> {
        let abi = Abi::require_native()?;
        let entry = raw::callback_entry()?;

        let slots: Box<[Slot]> = (0..capacity)
            .map(|index| Slot {
                index,
                entry: OnceCell::new(),
            })
            .collect();
        let cc = abi.convention();
        let stubs: Vec<_> = slots
            .iter()
            .map(|slot| cc.encode_stub(slot as *const Slot as u64, entry as u64))
            .collect();
        let arena = StubArena::build(&stubs)?;

        let inner = Box::leak(Box::new(PoolInner {
            abi,
            slots,
            arena,
            next: Mutex::new(0),
        }));
        debug!(%abi, capacity, "created callback pool");
        Ok(Self { inner })
    }

    /// The process-wide pool, created on first use
    pub fn global() -> FfiResult<Self> {
        if let Some(pool) = GLOBAL_POOL.get() {
            return Ok(*pool);
        }
        let capacity = GLOBAL_CAPACITY.lock();
        GLOBAL_POOL
            .get_or_try_init(|| CallbackPool::new(*capacity))
            .copied()
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Number of slots in use
    pub fn registered(&self) -> usize {
        *self.inner.next.lock()
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.capacity() - self.registered()
    }

    /// ABI of every trampoline in this pool
    pub fn abi(&self) -> Abi {
        self.inner.abi
    }

    /// Register a closure for `signature`
    pub fn register<F>(&self, signature: &Signature, closure: F) -> FfiResult<CallbackHandle>
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        let plan = SignatureRegistry::native()?.plan_signature(signature)?;
        self.install(plan, Box::new(closure), None)
    }

    /// Register a closure for an existing plan
    pub fn register_plan(&self, plan: Arc<CallPlan>, closure: Closure) -> FfiResult<CallbackHandle> {
        self.install(plan, closure, None)
    }

    /// Register a typed closure; the signature follows from its types
    pub fn register_fn<Args, F>(&self, f: F) -> FfiResult<CallbackHandle>
    where
        F: HostFn<Args>,
    {
        let plan = SignatureRegistry::native()?.plan_signature(&F::signature())?;
        self.install(plan, Box::new(move |args: &[Value]| f.call_values(args)), None)
    }

    /// Register a closure that always runs on `executor`'s thread
    pub fn register_on<F>(
        &self,
        executor: &CallbackExecutor,
        signature: &Signature,
        closure: F,
    ) -> FfiResult<CallbackHandle>
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        let plan = SignatureRegistry::native()?.plan_signature(signature)?;
        self.install(plan, Box::new(closure), Some(executor.clone()))
    }

    fn install(
        &self,
        plan: Arc<CallPlan>,
        closure: Closure,
        executor: Option<CallbackExecutor>,
    ) -> FfiResult<CallbackHandle> {
        if plan.abi != self.inner.abi {
            return Err(FfiError::AbiMismatch {
                plan: plan.abi,
                native: self.inner.abi,
            });
        }
        if plan.ret == TypeClass::CString {
            return Err(FfiError::UnsupportedTypeClass {
                class: plan.ret,
                abi: plan.abi,
            });
        }

        let capacity = self.capacity();
        let mut next = self.inner.next.lock();
        let index = *next;
        if index >= capacity {
            return Err(FfiError::PoolExhausted { capacity });
        }
        let slot = &self.inner.slots[index];
        let entry = Entry {
            plan: Arc::clone(&plan),
            closure,
            executor,
        };
        if slot.entry.set(entry).is_err() {
            return Err(FfiError::PoolExhausted { capacity });
        }
        *next += 1;
        drop(next);

        let address = self
            .inner
            .arena
            .stub_address(index)
            .ok_or(FfiError::PoolExhausted { capacity })?;
        debug!(
            slot = index,
            address = format_args!("{:#x}", address),
            signature = %plan.signature(),
            "registered callback"
        );
        Ok(CallbackHandle {
            address,
            index,
            plan,
        })
    }
}

impl std::fmt::Debug for CallbackPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackPool")
            .field("abi", &self.inner.abi)
            .field("capacity", &self.capacity())
            .field("registered", &self.registered())
            .finish()
    }
}

thread_local! {
    static ENTERED: Cell<bool> = const { Cell::new(false) };
}

/// Mark the current thread as known to the host the first time a
/// trampoline runs on it.
fn enter_thread() {
    ENTERED.with(|entered| {
        if !entered.replace(true) {
            let current = std::thread::current();
            debug!(
                thread = ?current.id(),
                name = current.name().unwrap_or("<native>"),
                "first callback on thread"
            );
        }
    });
}

/// Common dispatcher called by every architecture's `callback_entry`.
///
/// A panic must not unwind into native frames: it is logged and the
/// process aborts.
pub(crate) extern "C" fn dispatch_callback(frame: *mut RawRegisterFrame) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| unsafe { dispatch(&mut *frame) }));
    if let Err(payload) = outcome {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(panic = %message, "callback panicked; aborting");
        std::process::abort();
    }
}

unsafe fn dispatch(frame: &mut RawRegisterFrame) {
    enter_thread();

    let slot: &'static Slot = &*(frame.code as *const Slot);
    let Some(entry) = slot.entry.get() else {
        warn!(slot = slot.index, "trampoline invoked before registration");
        frame.ret = [0; 2];
        frame.fret = [0; 2];
        return;
    };

    let args: Vec<Value> = entry
        .plan
        .slots
        .iter()
        .map(|arg| read_arg(&entry.plan, arg, frame))
        .collect();
    trace!(slot = slot.index, args = args.len(), "callback invoked");

    let result = match &entry.executor {
        Some(executor) => {
            let closure: &'static (dyn Fn(&[Value]) -> Value + Send + Sync) = &*entry.closure;
            executor
                .run(Box::new(move || closure(&args)))
                .unwrap_or_else(|| {
                    warn!(slot = slot.index, executor = executor.name(), "executor unavailable");
                    Value::Void
                })
        }
        None => (entry.closure)(&args),
    };

    if let Err(e) = write_return(&entry.plan, &result, frame) {
        warn!(slot = slot.index, error = %e, "callback result not convertible; returning zero");
        frame.ret = [0; 2];
        frame.fret = [0; 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhaustion() {
        let Ok(pool) = CallbackPool::new(2) else {
            return;
        };
        let sig = Signature::new(vec![], TypeClass::I32);
        let a = pool.register(&sig, |_| Value::I32(1)).unwrap();
        let b = pool.register(&sig, |_| Value::I32(2)).unwrap();
        assert_ne!(a.address(), b.address());
        assert_eq!(pool.available(), 0);

        let err = pool.register(&sig, |_| Value::I32(3)).unwrap_err();
        assert_eq!(err, FfiError::PoolExhausted { capacity: 2 });
        assert_eq!(pool.registered(), 2);
    }

    #[test]
    fn test_cstring_return_rejected() {
        let Ok(pool) = CallbackPool::new(1) else {
            return;
        };
        let sig = Signature::new(vec![], TypeClass::CString);
        let err = pool.register(&sig, |_| Value::from("x")).unwrap_err();
        assert!(matches!(err, FfiError::UnsupportedTypeClass { .. }));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_foreign_abi_plan_rejected() {
        let Ok(pool) = CallbackPool::new(1) else {
            return;
        };
        let other = Abi::ALL
            .into_iter()
            .find(|abi| *abi != pool.abi())
            .unwrap();
        let plan = Arc::new(other.convention().plan(&[], TypeClass::Void, false).unwrap());
        let err = pool
            .register_plan(plan, Box::new(|_| Value::Void))
            .unwrap_err();
        assert!(matches!(err, FfiError::AbiMismatch { .. }));
    }

    #[test]
    fn test_stubs_carry_slot_identity() {
        let Ok(pool) = CallbackPool::new(3) else {
            return;
        };
        let entry = raw::callback_entry().unwrap() as u64;
        let cc = pool.abi().convention();
        for (index, slot) in pool.inner.slots.iter().enumerate() {
            let expected = cc.encode_stub(slot as *const Slot as u64, entry);
            assert_eq!(pool.inner.arena.stub_bytes(index).unwrap(), &expected[..]);
        }
    }

    #[test]
    fn test_dispatch_through_frame() {
        let Ok(pool) = CallbackPool::new(1) else {
            return;
        };
        let handle = pool
            .register_fn(|a: i32, b: f64| -> f64 { a as f64 * b })
            .unwrap();

        // Simulate the entry routine: identity plus register image.
        let mut frame = RawRegisterFrame::new(&pool.inner.slots[0] as *const Slot as usize);
        for slot in &handle.plan().slots {
            match (slot.class, slot.location) {
                (TypeClass::I32, crate::ffi::plan::Location::IntReg(r)) => frame.ints[r as usize] = 3,
                (TypeClass::F64, crate::ffi::plan::Location::FloatReg(r)) => {
                    frame.floats[r as usize] = 2.5f64.to_bits()
                }
                other => panic!("unexpected placement {:?}", other),
            }
        }
        dispatch_callback(&mut frame);
        assert_eq!(f64::from_bits(frame.fret[0]), 7.5);
        assert_eq!(frame.ret, [0, 0]);
    }

    #[test]
    fn test_uncoercible_result_returns_zero() {
        let Ok(pool) = CallbackPool::new(1) else {
            return;
        };
        let sig = Signature::new(vec![], TypeClass::Bool);
        pool.register(&sig, |_| Value::from("not a bool")).unwrap();
        let mut frame = RawRegisterFrame::new(&pool.inner.slots[0] as *const Slot as usize);
        frame.ret = [u64::MAX; 2];
        dispatch_callback(&mut frame);
        assert_eq!(frame.ret, [0, 0]);
    }
}
