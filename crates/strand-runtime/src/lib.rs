//! # strand-runtime
//!
//! Machine-dependent layer of the strand continuation library.
//!
//! This crate provides:
//! - Symmetric stack switching (architecture-specific assembly)
//! - Stack allocation (aligned heap, optional mmap + guard page)
//! - The typed `Continuation` handle and context lifecycle
//! - Splice/exit plumbing and unwind tunneling across switches

pub mod arch;
pub mod continuation;
pub mod context;
pub mod splice;
pub mod stack;
mod unwind;

// Re-exports
pub use arch::{StackPointer, SwitchPair};
pub use continuation::{Continuation, ExitContinuation, RawContinuation};
pub use context::{callcc, create_context};
pub use splice::{signal_exit, splice, splicecc, with_escape_continuation};
pub use stack::{
    HeapStackAllocator, MmapStackAllocator, StackAllocator, DEFAULT_STACK_SIZE, MIN_STACK_SIZE,
};

// Architecture detection
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub use arch::x86_64 as current_arch;
    } else if #[cfg(target_arch = "aarch64")] {
        pub use arch::aarch64 as current_arch;
    }
}
