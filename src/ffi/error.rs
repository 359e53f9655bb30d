//! FFI error taxonomy
//!
//! Load and resolution errors are expected, recoverable conditions. Shape
//! errors (unsupported type class, too many arguments, pool exhaustion) are
//! reported before any native transfer happens. Once control has reached
//! native code nothing here can observe or recover from a fault.

use thiserror::Error;

use super::types::TypeClass;
use crate::arch::Abi;

/// Error type for every fallible FFI operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FfiError {
    /// The library could not be located by the search paths or the OS loader.
    #[error("library '{library}' not found: {reason}")]
    NotFound { library: String, reason: String },

    /// The library file exists but the OS loader rejected it.
    #[error("failed to load library '{library}': {reason}")]
    LoadFailed { library: String, reason: String },

    /// The library does not export the requested symbol.
    #[error("symbol '{symbol}' not found in '{library}': {reason}")]
    SymbolNotFound {
        library: String,
        symbol: String,
        reason: String,
    },

    /// The symbol name cannot be passed to the loader (embedded NUL).
    #[error("invalid symbol name: {0:?}")]
    InvalidSymbol(String),

    /// A C-style declaration string could not be parsed.
    #[error("invalid declaration: {0}")]
    InvalidDeclaration(String),

    /// The type class has no mapping in this position on the target ABI.
    #[error("type class {class} is not supported here on {abi}")]
    UnsupportedTypeClass { class: TypeClass, abi: Abi },

    /// More arguments than the raw frame can carry.
    #[error("too many arguments: {count} (max {max})")]
    TooManyArguments { count: usize, max: usize },

    /// Wrong number of arguments for a plan or the generic call path.
    #[error("argument count mismatch: expected {expected}, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    /// A host value cannot be marshaled into the declared type class.
    #[error("argument {index}: expected {expected}, got {got}")]
    TypeMismatch {
        index: usize,
        expected: TypeClass,
        got: &'static str,
    },

    /// A host string contains an interior NUL byte.
    #[error("invalid string argument: {0}")]
    InvalidString(String),

    /// Every callback slot of the pool is taken.
    #[error("callback pool exhausted (capacity {capacity})")]
    PoolExhausted { capacity: usize },

    /// A plan built for one ABI was handed to the native path of another.
    #[error("plan targets {plan} but this host uses {native}")]
    AbiMismatch { plan: Abi, native: Abi },

    /// The running platform has no native call path.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Executable memory for trampolines could not be prepared.
    #[error("failed to prepare trampoline memory: {0}")]
    StubAllocation(String),
}

/// Result alias used across the FFI layer.
pub type FfiResult<T> = Result<T, FfiError>;
