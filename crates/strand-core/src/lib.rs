//! # strand-core
//!
//! Portable synchronization core for the strand continuation library.
//!
//! This crate is platform-agnostic apart from the latch, which picks the
//! best blocking primitive per OS. All stack switching lives in
//! `strand-runtime`; futures and the shared-state multiplexer live in
//! `strand`.
//!
//! ## Modules
//!
//! - `event` - wait-free three-state event, waiters, batched wait
//! - `latch` - countdown latch (futex on Linux, condvar fallback)
//! - `wait` - wait strategies (`wait_one` / `wait_all` / `wait_any`)
//! - `waitable` - event access trait for synchronizable objects
//! - `error` - error types
//! - `klog` - kernel-style debug printing macros

pub mod error;
pub mod event;
pub mod klog;
pub mod latch;
pub mod wait;
pub mod waitable;

// Re-exports for convenience
pub use error::{FutureError, StackError, StrandError, StrandResult};
pub use event::{CallbackWaiter, Event, EventPtr, Waiter, DELETE_WAITER, NOOP_WAITER};
pub use latch::ThreadLatch;
pub use wait::{wait_all, wait_all_of, wait_any, wait_any_of, wait_one, WaitStrategy};
pub use waitable::Waitable;
