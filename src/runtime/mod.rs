//! Runtime module
//!
//! Everything that touches machine state directly lives here:
//!
//! - [`raw`]: the register frame and the naked call/entry routines
//! - [`stub_arena`]: executable memory for callback stubs
//! - [`executor`]: host threads that callbacks can be handed off to

pub mod executor;
pub mod raw;
pub mod stub_arena;

pub use executor::CallbackExecutor;
pub use raw::{RawRegisterFrame, FRAME_REGS, STACK_WORDS};
pub use stub_arena::StubArena;
