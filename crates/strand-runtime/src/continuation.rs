//! Typed handles over suspended stacks
//!
//! A `Continuation<In, Out>` resumes its context with an `In` and observes
//! at most one `Out` per suspension. The context body holds the reverse
//! handle, `Continuation<Out, In>`.
//!
//! Data transfer protocol: the sending side parks the datum in a
//! `ManuallyDrop` slot on its own stack, which stays suspended (and the
//! slot alive) until control comes back; the receiving side moves the datum
//! out exactly once, immediately after its switch returns. A datum the
//! receiver never takes is dropped with the handle.

use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ptr;

use crate::arch::{self, StackPointer};
use crate::unwind;

/// Move-only typed handle over a suspended stack
///
/// Contract: a live (non-terminated) handle must be driven to termination
/// (run to completion or [`signal_exit`](crate::splice::signal_exit))
/// before it is dropped; dropping a live handle panics.
pub struct Continuation<In, Out> {
    sp: StackPointer,
    data: Option<Out>,
    _types: PhantomData<fn(In) -> Out>,
}

/// Raw parts of a continuation, produced by [`Continuation::into_raw`].
pub struct RawContinuation<Out> {
    pub sp: StackPointer,
    pub data: Option<Out>,
}

impl<In, Out> Continuation<In, Out> {
    pub(crate) fn from_sp(sp: StackPointer) -> Self {
        Self {
            sp,
            data: None,
            _types: PhantomData,
        }
    }

    /// Build a handle from an arrival pair, moving the transferred datum
    /// (if any) off the other side's stack.
    ///
    /// # Safety
    ///
    /// `parm`, when non-null, must point at a live `Out` owned by the other
    /// side's suspended frame that nothing else will read or drop.
    pub(crate) unsafe fn from_arrival(sp: StackPointer, parm: *mut ()) -> Self {
        let data = if parm.is_null() {
            None
        } else {
            Some(ptr::read(parm as *const Out))
        };
        Self {
            sp,
            data,
            _types: PhantomData,
        }
    }

    /// Whether the context has finished; a terminated handle cannot be
    /// resumed again.
    pub fn terminated(&self) -> bool {
        self.sp.is_null()
    }

    /// Whether a datum from the last transfer is still pending.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Live and carrying a datum.
    pub fn is_live(&self) -> bool {
        !self.terminated() && self.has_data()
    }

    /// Borrow the pending datum.
    pub fn peek(&self) -> Option<&Out> {
        self.data.as_ref()
    }

    /// Move the pending datum out.
    ///
    /// Panics when no datum is pending.
    pub fn take(&mut self) -> Out {
        self.data.take().expect("continuation has no pending datum")
    }

    /// Transfer control into the context, handing it `input`; returns once
    /// the context transfers back, with the handle updated to the new
    /// suspension (or terminated).
    ///
    /// Panics when the handle is terminated. An untaken datum from the
    /// previous transfer is dropped.
    pub fn resume(&mut self, input: In) -> &mut Self {
        assert!(!self.terminated(), "resume on a terminated continuation");
        let target = self.sp;
        self.sp = ptr::null_mut();
        self.data = None;

        // The slot outlives the switch: this stack is suspended until the
        // other side transfers back, and the other side takes the value.
        let mut slot = ManuallyDrop::new(input);
        let pair =
            unsafe { arch::stack_switch(target, &mut slot as *mut ManuallyDrop<In> as *mut ()) };

        self.sp = pair.sp;
        self.data = if pair.parm.is_null() {
            None
        } else {
            Some(unsafe { ptr::read(pair.parm as *const Out) })
        };
        // Handle state is consistent; a parked teardown payload may fire now
        unwind::check_pending();
        self
    }

    /// Extract the raw parts, leaving the handle terminated.
    pub fn into_raw(mut self) -> RawContinuation<Out> {
        RawContinuation {
            sp: mem::replace(&mut self.sp, ptr::null_mut()),
            data: self.data.take(),
        }
    }

    /// Rebuild a handle from raw parts.
    ///
    /// # Safety
    ///
    /// `raw` must come from `into_raw` of a handle with the same `In`/`Out`
    /// types, and the suspended stack must not have been resumed since.
    pub unsafe fn from_raw(raw: RawContinuation<Out>) -> Self {
        Self {
            sp: raw.sp,
            data: raw.data,
            _types: PhantomData,
        }
    }

    /// Take the suspended stack pointer, dropping any pending datum and
    /// leaving the handle terminated.
    pub(crate) fn pilfer_sp(&mut self) -> StackPointer {
        self.data = None;
        mem::replace(&mut self.sp, ptr::null_mut())
    }
}

impl<In, Out> Drop for Continuation<In, Out> {
    fn drop(&mut self) {
        assert!(
            self.terminated(),
            "dropped a live continuation; drive it to completion or signal_exit it first"
        );
    }
}

/// Type-erased continuation destined to receive control exactly once,
/// during teardown.
///
/// Unlike [`Continuation`], destruction is relaxed: the handle must merely
/// have been drained (pilfered) first, checked in debug builds only.
pub struct ExitContinuation {
    sp: StackPointer,
}

impl ExitContinuation {
    pub(crate) fn from_sp(sp: StackPointer) -> Self {
        Self { sp }
    }

    pub fn terminated(&self) -> bool {
        self.sp.is_null()
    }

    /// Extract the stack pointer, leaving the handle drained.
    pub fn pilfer(&mut self) -> StackPointer {
        mem::replace(&mut self.sp, ptr::null_mut())
    }
}

impl<In, Out> From<Continuation<In, Out>> for ExitContinuation {
    fn from(mut c: Continuation<In, Out>) -> Self {
        Self { sp: c.pilfer_sp() }
    }
}

impl Drop for ExitContinuation {
    fn drop(&mut self) {
        debug_assert!(self.sp.is_null(), "dropped an undrained exit continuation");
    }
}
