//! # strand - stackful continuations and composable waiting
//!
//! Symmetric-transfer coroutines over private stacks, a wait-free
//! single-slot event, and the future/shared-future layer built on both.
//!
//! ## Features
//!
//! - **Symmetric transfer**: caller and callee see the same switch pair;
//!   a resume is one register/stack swap (~ns scale), no scheduler
//! - **Typed handles**: `Continuation<In, Out>` fixes what goes in on
//!   resume and what comes back at the next suspension
//! - **Safe teardown**: contexts unwind through panic tunneling; the stack
//!   deleter always runs, on a foreign stack, after the unwind
//! - **Wait-free events**: one pointer-width atomic per event; signal,
//!   register and dismiss never block and never allocate
//! - **Composable waiting**: `wait_one` / `wait_all` / `wait_any` over any
//!   `Waitable`, blocking only in a countdown latch
//! - **Futures**: one-shot `Promise`/`Future` and a `SharedFuture` that
//!   fans one completion out to any number of listeners
//!
//! ## Quick Start
//!
//! ```ignore
//! use strand::callcc;
//!
//! let mut fib = callcc::<i64, i64, _>(|mut caller| {
//!     let (mut a, mut b) = (0i64, 1i64);
//!     loop {
//!         caller.resume(a);
//!         if caller.take() < 0 { break; }
//!         let next = a + b;
//!         a = b;
//!         b = next;
//!     }
//!     caller
//! }).unwrap();
//!
//! for _ in 0..10 {
//!     fib.resume(1);
//!     println!("{}", fib.take());
//! }
//! fib.resume(-1); // sentinel: orderly termination
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  strand (this crate)                    │
//! │        Promise / Future / SharedFuture / multiplexer    │
//! └─────────────────────────────────────────────────────────┘
//!            │                                │
//!            ▼                                ▼
//! ┌──────────────────────────┐  ┌──────────────────────────┐
//! │      strand-runtime      │  │       strand-core        │
//! │  arch switch, stacks,    │  │  event, waiters, latch,  │
//! │  Continuation, splice    │  │  wait strategies         │
//! └──────────────────────────┘  └──────────────────────────┘
//! ```

// Re-export core types
pub use strand_core::{
    error::{FutureError, StackError, StrandError, StrandResult},
    event::{CallbackWaiter, Event, EventPtr, Waiter, DELETE_WAITER, NOOP_WAITER},
    latch::ThreadLatch,
    wait::{wait_all, wait_all_of, wait_any, wait_any_of, wait_one, WaitStrategy},
    waitable::Waitable,
};

// Re-export klog macros
pub use strand_core::{kdebug, kerror, kinfo, ktrace, kwarn};

// Re-export runtime types
pub use strand_runtime::{
    callcc, create_context, signal_exit, splice, splicecc, with_escape_continuation, Continuation,
    ExitContinuation, HeapStackAllocator, MmapStackAllocator, RawContinuation, StackAllocator,
    StackPointer, SwitchPair, DEFAULT_STACK_SIZE,
};

pub mod future;
pub mod shared_future;

pub use future::{promise, Future, Promise};
pub use shared_future::{SharedFuture, SharedStateMultiplexer};
