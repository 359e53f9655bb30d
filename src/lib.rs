//! dlbridge - Dynamic Library Bridge
//!
//! Calls functions in C shared libraries and hands Rust closures to C as
//! function pointers, without a C compiler at build time. Argument
//! placement is computed from a declared signature for the host's calling
//! convention, and a small audited assembly layer performs the transfer.
//!
//! # Features
//!
//! - **Library loading**: open shared libraries by name or path and resolve symbols
//! - **Call plans**: per-ABI register and stack placement, cached per signature
//! - **Outbound calls**: typed calls with host values, plus an untyped `syscall_n`
//! - **Callbacks**: a fixed pool of executable stubs dispatching to Rust closures
//!
//! Supported ABIs: System V AMD64, Windows x64, AArch64 (AAPCS64 and Apple),
//! RISC-V LP64D. Plans can be computed for any of them on any host; native
//! execution requires the host's own ABI.
//!
//! # Example
//!
//! ```no_run
//! use dlbridge::ffi::{system_library, CallbackPool, Signature, TypeClass, Value};
//!
//! let libc = system_library()?;
//! let strtod = unsafe { libc.declare("double strtod(cstr, ptr)")? };
//! let value = unsafe { strtod.call(&["1.5".into(), Value::Pointer(0)])? };
//! assert_eq!(value, Value::F64(1.5));
//!
//! let cmp = CallbackPool::global()?.register_fn(|a: *const i32, b: *const i32| unsafe {
//!     *a - *b
//! })?;
//! let _qsort_comparator = cmp.address();
//! # Ok::<(), dlbridge::ffi::FfiError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ Library Loader  │  libloading, search paths, symbol cache
//! └────────┬────────┘
//!          │ address
//!          ▼
//! ┌─────────────────┐
//! │ Sig. Registry   │  TypeClass sequence → CallPlan
//! └────────┬────────┘
//!     ┌────┴────┐
//!     ▼         ▼
//! ┌────────┐  ┌───────────┐
//! │Dispatch│  │ Callbacks │  stub → entry → closure
//! └───┬────┘  └─────┬─────┘
//!     └──────┬──────┘
//!            ▼
//! ┌─────────────────────┐
//! │  runtime::raw (asm) │  register frame ↔ machine state
//! └─────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod arch;
pub mod config;
pub mod ffi;
pub mod logging;
pub mod runtime;

// Re-export commonly used types
pub use arch::{Abi, Convention};
pub use config::{BridgeConfig, ConfigError};
pub use ffi::{
    new_callback, syscall_n, system_library, CallPlan, CallbackHandle, CallbackPool, FfiError,
    FfiResult, ForeignFunction, Library, LibraryLoader, Signature, TypeClass, Value,
};
pub use runtime::CallbackExecutor;
