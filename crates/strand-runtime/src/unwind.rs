//! Unwind tunneling across stack switches
//!
//! Panics never cross the assembly boundary. A trampoline that needs to
//! unwind the other side parks a payload here; every wrapper re-raises a
//! pending payload with `resume_unwind` right after its switch returns, on
//! whichever stack control landed on. Continuations are thread-bound, so a
//! thread-local slot suffices, and at most one payload is in flight per
//! thread at a time.

use std::any::Any;
use std::cell::Cell;
use std::panic;

use crate::continuation::ExitContinuation;

/// Payload of an orderly exit: unwinds a context's stack, then control
/// transfers to `exit_to`.
pub(crate) struct ExitUnwind {
    pub exit_to: ExitContinuation,
}

/// Payload of an abnormal exit: as [`ExitUnwind`], but `cause` is re-raised
/// on the target stack after teardown.
pub(crate) struct AbnormalUnwind {
    pub exit_to: ExitContinuation,
    pub cause: Box<dyn Any + Send>,
}

// Safety: the carried stack pointer never leaves the thread it belongs to;
// Send is only needed to satisfy the panic payload bound.
unsafe impl Send for ExitUnwind {}
unsafe impl Send for AbnormalUnwind {}

thread_local! {
    static PENDING: Cell<Option<Box<dyn Any + Send>>> = const { Cell::new(None) };
}

pub(crate) fn set_pending(payload: Box<dyn Any + Send>) {
    PENDING.with(|slot| {
        let prev = slot.replace(Some(payload));
        debug_assert!(prev.is_none(), "unwind payload already in flight");
    });
}

pub(crate) fn take_pending() -> Option<Box<dyn Any + Send>> {
    PENDING.with(|slot| slot.take())
}

/// Re-raise a parked payload on the current stack. Called after every
/// return from `stack_switch`/`execute_into`, once the caller's handle
/// state is consistent again.
pub(crate) fn check_pending() {
    if let Some(payload) = take_pending() {
        panic::resume_unwind(payload);
    }
}
