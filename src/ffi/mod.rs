//! FFI Module for dlbridge
//!
//! Calls C functions in shared libraries without a C toolchain, and hands
//! Rust closures to C as plain function pointers.
//!
//! # Architecture
//!
//! ```text
//! Library::open("libc.so.6")          Library Loader (libloading)
//!       │
//!       ▼
//! lib.declare("double strtod(cstr, ptr)")
//!       │
//!       ▼
//! SignatureRegistry                   TypeClass sequence → CallPlan (per ABI)
//!       │
//!       ▼
//! ForeignFunction::call(&[Value])     marshal → raw frame → native code
//!
//! CallbackPool::register(sig, f)      slot + stub → C function pointer
//! ```
//!
//! # Example
//!
//! ```ignore
//! let libc = dlbridge::ffi::system_library()?;
//! let strtod = unsafe { libc.declare("double strtod(cstr, ptr)")? };
//! let v = unsafe { strtod.call(&["1".into(), Value::Pointer(0)])? };
//! assert_eq!(v, Value::F64(1.0));
//! ```
//!
//! Declared signatures are trusted: a signature that does not match the
//! native function is undefined behavior, which is why the calling entry
//! points are `unsafe`.

mod callback;
mod dispatch;
mod error;
mod host_fn;
mod loader;
mod marshal;
mod plan;
mod registry;
mod types;

pub use callback::{
    configure_global_pool, new_callback, CallbackHandle, CallbackPool, Closure,
    DEFAULT_CALLBACK_CAPACITY,
};
pub use dispatch::{call, call_raw, syscall_n, ForeignFunction, RawReturn};
pub use error::{FfiError, FfiResult};
pub use host_fn::HostFn;
pub use loader::{
    default_search_paths, system_library, system_library_name, Library, LibraryLoader,
};
pub use marshal::MarshalContext;
pub use plan::{ArgSlot, CallPlan, Location, ReturnLocation, MAX_ARGS};
pub use registry::{plan, SignatureRegistry};
pub use types::{Declaration, NativeType, Signature, TypeClass, Value};

pub(crate) use callback::dispatch_callback;
