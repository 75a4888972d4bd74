//! Single-slot producer/consumer event with wait-free transitions
//!
//! An [`Event`] synchronizes one producer with one consumer. The producer
//! calls `signal` once; the consumer registers a [`Waiter`] with `wait` or
//! `try_wait` and may revoke it with `dismiss_wait`. The whole state machine
//! lives in a single pointer-width atomic:
//!
//! ```text
//! null            => empty     (no data, no waiter)
//! &NOOP_WAITER    => signaled  (terminal)
//! other pointer   => waited    (that pointer is the registered waiter)
//! ```
//!
//! `signal` is an unconditional exchange, `try_wait` and `dismiss_wait` are a
//! single strong CAS each. Assuming exchange and CAS are wait-free, every
//! operation is wait-free, and none of them allocates.
//!
//! Ownership: the event belongs to its producer until signal. A signal that
//! finds a registered waiter hands the event to that waiter, which may drop
//! it ([`DELETE_WAITER`]) or release it back ([`NOOP_WAITER`]).

use core::sync::atomic::{AtomicPtr, Ordering};
use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};

/// Dispatch signature of a waiter. `this` points at the [`Waiter`] header
/// embedded in the concrete waiter; `event` is the owned signaled event.
pub type SignalFn = unsafe fn(this: *mut Waiter, event: EventPtr);

/// A callback registered on an event, invoked at most once per event
/// lifetime by the signaller.
///
/// The event stores waiters as a single machine word, so instead of a trait
/// object this is a thin `repr(C)` dispatch header: concrete waiters embed a
/// `Waiter` as their first field and recover `self` with a pointer cast in
/// the dispatch function. [`CallbackWaiter`] wraps that pattern for closures.
#[repr(C)]
pub struct Waiter {
    signal_fn: SignalFn,
}

impl Waiter {
    pub const fn new(signal_fn: SignalFn) -> Self {
        Self { signal_fn }
    }

    /// The registration handle for this waiter.
    ///
    /// The pointer is only ever read through; no mutable access is derived
    /// from it.
    pub fn as_ptr(&self) -> *mut Waiter {
        self as *const Waiter as *mut Waiter
    }

    /// Invoke the waiter, transferring ownership of `event` to it.
    ///
    /// # Safety
    ///
    /// `this` must point at a live waiter. The waiter may be destroyed by
    /// its own callback, so `this` must not be used afterwards.
    pub unsafe fn invoke(this: *mut Waiter, event: EventPtr) {
        ((*this).signal_fn)(this, event)
    }
}

unsafe fn delete_signal(_this: *mut Waiter, event: EventPtr) {
    drop(event);
}

unsafe fn noop_signal(_this: *mut Waiter, event: EventPtr) {
    let _ = event.release();
}

/// Waiter that drops the signaled event. Registered by consumers that have
/// abandoned the event so the producer's signal frees it.
pub static DELETE_WAITER: Waiter = Waiter::new(delete_signal);

/// Waiter that releases ownership without dropping.
///
/// Its address doubles as the `signaled` sentinel, so it must never be
/// registered on an event.
pub static NOOP_WAITER: Waiter = Waiter::new(noop_signal);

#[inline]
fn signaled() -> *mut Waiter {
    NOOP_WAITER.as_ptr()
}

/// Owning pointer to an [`Event`], handed to waiters on signal.
///
/// Dropping it runs the destructor the event was created with, which frees
/// the allocation the event is embedded in (the event itself for standalone
/// events, the whole shared state for events at offset zero of one).
pub struct EventPtr {
    ptr: NonNull<Event>,
}

impl EventPtr {
    /// # Safety
    ///
    /// `ptr` must point at a live event whose `drop_fn` can free it, and the
    /// caller must hold ownership of that allocation.
    pub unsafe fn from_raw(ptr: *mut Event) -> Self {
        Self {
            ptr: NonNull::new_unchecked(ptr),
        }
    }

    /// Give up ownership without running the destructor.
    pub fn release(self) -> *mut Event {
        let p = self.ptr.as_ptr();
        std::mem::forget(self);
        p
    }

    pub fn as_ptr(&self) -> *mut Event {
        self.ptr.as_ptr()
    }
}

impl Drop for EventPtr {
    fn drop(&mut self) {
        let p = self.ptr.as_ptr();
        unsafe { ((*p).drop_fn)(p) }
    }
}

unsafe fn drop_boxed(p: *mut Event) {
    drop(Box::from_raw(p));
}

/// Single-slot three-state event. See the module docs for the protocol.
#[repr(C)]
pub struct Event {
    state: AtomicPtr<Waiter>,
    // Frees the allocation this event lives in when an EventPtr drops;
    // lets an owner destroy an event embedded in a larger object without
    // knowing the concrete type.
    drop_fn: unsafe fn(*mut Event),
}

impl Event {
    /// Fresh event in the `empty` state.
    pub fn new() -> Box<Event> {
        Box::new(Event {
            state: AtomicPtr::new(ptr::null_mut()),
            drop_fn: drop_boxed,
        })
    }

    /// Event born in the `signaled` state.
    pub fn new_signaled() -> Box<Event> {
        Box::new(Event {
            state: AtomicPtr::new(signaled()),
            drop_fn: drop_boxed,
        })
    }

    /// Event embedded at offset zero of a larger allocation.
    ///
    /// # Safety
    ///
    /// `drop_fn`, handed the event's address, must free that whole
    /// allocation exactly once.
    pub unsafe fn embedded(drop_fn: unsafe fn(*mut Event)) -> Event {
        Event {
            state: AtomicPtr::new(ptr::null_mut()),
            drop_fn,
        }
    }

    /// Whether the event has reached its terminal state.
    pub fn is_signaled(&self) -> bool {
        self.state.load(Ordering::Acquire) == signaled()
    }

    /// Put the event in the signaled state. Invokes the registered waiter,
    /// if any, synchronously on this thread, handing it the event.
    ///
    /// One-shot: signalling twice is a contract violation (trapped in debug
    /// builds; a no-op through the sentinel's handler in release builds).
    ///
    /// # Safety
    ///
    /// The caller must own the event, and it must have been created through
    /// `new`/`new_signaled`/`embedded` so the ownership transfer to the
    /// waiter is meaningful.
    pub unsafe fn signal(&self) {
        // Release publishes the producer's data, acquire pairs with the
        // waiter registration.
        let prev = self.state.swap(signaled(), Ordering::AcqRel);
        if !prev.is_null() {
            debug_assert!(prev != signaled(), "event signaled twice");
            Waiter::invoke(prev, EventPtr::from_raw(self as *const Event as *mut Event));
        }
    }

    /// Register `w`, or invoke it immediately if the event is already
    /// signaled.
    ///
    /// # Safety
    ///
    /// As `try_wait`; additionally the event must satisfy the ownership
    /// contract of `signal` since `w` may receive it right here.
    pub unsafe fn wait(&self, w: *mut Waiter) {
        if !self.try_wait(w) {
            Waiter::invoke(w, EventPtr::from_raw(self as *const Event as *mut Event));
        }
    }

    /// Try to register `w`. Returns `true` and transitions to `waited` when
    /// the event was not signaled; returns `false` when it was (or when the
    /// CAS lost a race against the signal).
    ///
    /// Pre: no other waiter is registered.
    ///
    /// # Safety
    ///
    /// `w` must stay valid until the event is signaled or the registration
    /// is dismissed.
    #[must_use]
    pub unsafe fn try_wait(&self, w: *mut Waiter) -> bool {
        debug_assert!(!w.is_null());
        debug_assert!(w != signaled(), "NOOP_WAITER is the signaled sentinel");
        let cur = self.state.load(Ordering::Acquire);
        cur != signaled()
            && self
                .state
                .compare_exchange(cur, w, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Revoke a registration. Returns `true` when the event ends up empty
    /// (it already was, or the waiter was removed); `false` when the event
    /// is signaled and the waiter has been or is being invoked.
    ///
    /// # Safety
    ///
    /// Must be called by the consumer that registered `w`.
    #[must_use]
    pub unsafe fn dismiss_wait(&self, w: *mut Waiter) -> bool {
        let cur = self.state.load(Ordering::Acquire);
        if cur.is_null() {
            return true;
        }
        debug_assert!(cur == signaled() || cur == w, "foreign waiter registered");
        cur != signaled()
            && self
                .state
                .compare_exchange(cur, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Call `try_wait(w)` on every non-null event in `events`. Returns
    /// `(signaled, waited)`: how many were already signaled and how many now
    /// hold the registration.
    ///
    /// # Safety
    ///
    /// As `try_wait`, for every non-null entry.
    pub unsafe fn wait_many(w: *mut Waiter, events: &[*mut Event]) -> (usize, usize) {
        let mut signaled_count = 0;
        let mut waited_count = 0;
        for &e in events {
            if let Some(e) = e.as_ref() {
                if e.try_wait(w) {
                    waited_count += 1;
                } else {
                    signaled_count += 1;
                }
            }
        }
        (signaled_count, waited_count)
    }

    /// Call `dismiss_wait(w)` on every non-null event in `events` and return
    /// the number of successful dismissals.
    ///
    /// # Safety
    ///
    /// As `dismiss_wait`, for every non-null entry.
    pub unsafe fn dismiss_wait_many(w: *mut Waiter, events: &[*mut Event]) -> usize {
        let mut count = 0;
        for &e in events {
            if let Some(e) = e.as_ref() {
                if e.dismiss_wait(w) {
                    count += 1;
                }
            }
        }
        count
    }
}

/// Closure adapter for the [`Waiter`] dispatch protocol.
///
/// The closure runs on the signalling thread and receives ownership of the
/// event.
#[repr(C)]
pub struct CallbackWaiter<F: FnMut(EventPtr)> {
    raw: Waiter,
    callback: UnsafeCell<F>,
}

impl<F: FnMut(EventPtr)> CallbackWaiter<F> {
    pub fn new(callback: F) -> Self {
        Self {
            raw: Waiter::new(Self::dispatch),
            callback: UnsafeCell::new(callback),
        }
    }

    pub fn as_waiter(&self) -> *mut Waiter {
        self.raw.as_ptr()
    }

    unsafe fn dispatch(this: *mut Waiter, event: EventPtr) {
        // Waiter is the first field
        let this = this as *mut Self;
        (*(*this).callback.get())(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_signal_then_try_wait_skips_waiter() {
        let e = Box::into_raw(Event::new());
        let hits = Cell::new(0u32);
        let w = CallbackWaiter::new(|p: EventPtr| {
            hits.set(hits.get() + 1);
            let _ = p.release();
        });
        unsafe {
            (*e).signal();
            assert!((*e).is_signaled());
            assert!(!(*e).try_wait(w.as_waiter()));
            assert_eq!(hits.get(), 0);
            drop(Box::from_raw(e));
        }
    }

    #[test]
    fn test_wait_then_signal_invokes_waiter_once() {
        let e = Box::into_raw(Event::new());
        let hits = Cell::new(0u32);
        let seen = Cell::new(ptr::null_mut::<Event>());
        let w = CallbackWaiter::new(|p: EventPtr| {
            hits.set(hits.get() + 1);
            seen.set(p.release());
        });
        unsafe {
            assert!((*e).try_wait(w.as_waiter()));
            assert_eq!(hits.get(), 0);
            (*e).signal();
            assert_eq!(hits.get(), 1);
            assert_eq!(seen.get(), e);
            drop(Box::from_raw(e));
        }
    }

    #[test]
    fn test_dismissed_waiter_is_not_invoked() {
        let e = Box::into_raw(Event::new());
        let hits = Cell::new(0u32);
        let w = CallbackWaiter::new(|p: EventPtr| {
            hits.set(hits.get() + 1);
            let _ = p.release();
        });
        unsafe {
            assert!((*e).try_wait(w.as_waiter()));
            assert!((*e).dismiss_wait(w.as_waiter()));
            (*e).signal();
            assert_eq!(hits.get(), 0);
            drop(Box::from_raw(e));
        }
    }

    #[test]
    fn test_dismiss_truth_table() {
        let e = Box::into_raw(Event::new());
        let w = CallbackWaiter::new(|p: EventPtr| {
            let _ = p.release();
        });
        unsafe {
            // empty -> empty
            assert!((*e).dismiss_wait(w.as_waiter()));
            // waited -> empty
            assert!((*e).try_wait(w.as_waiter()));
            assert!((*e).dismiss_wait(w.as_waiter()));
            // signaled stays signaled
            (*e).signal();
            assert!(!(*e).dismiss_wait(w.as_waiter()));
            drop(Box::from_raw(e));
        }
    }

    #[test]
    fn test_wait_fast_path_on_signaled_event() {
        let e = Box::into_raw(Event::new());
        let hits = Cell::new(0u32);
        let w = CallbackWaiter::new(|p: EventPtr| {
            hits.set(hits.get() + 1);
            let _ = p.release();
        });
        unsafe {
            (*e).signal();
            (*e).wait(w.as_waiter());
            assert_eq!(hits.get(), 1);
            drop(Box::from_raw(e));
        }
    }

    #[test]
    fn test_wait_many_counts() {
        let e0 = Box::into_raw(Event::new());
        let e1 = Box::into_raw(Event::new());
        let e2 = Box::into_raw(Event::new());
        let w = CallbackWaiter::new(|p: EventPtr| {
            let _ = p.release();
        });
        unsafe {
            (*e1).signal();
            let events = [e0, ptr::null_mut(), e1, e2];
            let (signaled, waited) = Event::wait_many(w.as_waiter(), &events);
            assert_eq!((signaled, waited), (1, 2));

            let dismissed = Event::dismiss_wait_many(w.as_waiter(), &events);
            assert_eq!(dismissed, 2);

            drop(Box::from_raw(e0));
            drop(Box::from_raw(e1));
            drop(Box::from_raw(e2));
        }
    }

    // The delete waiter must free through the event's drop_fn, so an event
    // embedded in a larger allocation takes the whole allocation with it.
    #[test]
    fn test_delete_waiter_frees_embedding_allocation() {
        #[repr(C)]
        struct Canary {
            event: Event,
            freed: Arc<AtomicBool>,
        }

        impl Drop for Canary {
            fn drop(&mut self) {
                self.freed.store(true, Ordering::SeqCst);
            }
        }

        unsafe fn drop_canary(p: *mut Event) {
            drop(Box::from_raw(p as *mut Canary));
        }

        let freed = Arc::new(AtomicBool::new(false));
        let canary = Box::into_raw(Box::new(Canary {
            event: unsafe { Event::embedded(drop_canary) },
            freed: Arc::clone(&freed),
        }));
        let e = canary as *mut Event;
        unsafe {
            assert!((*e).try_wait(DELETE_WAITER.as_ptr()));
            assert!(!freed.load(Ordering::SeqCst));
            (*e).signal();
        }
        assert!(freed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_new_signaled() {
        let e = Box::into_raw(Event::new_signaled());
        let w = CallbackWaiter::new(|p: EventPtr| {
            let _ = p.release();
        });
        unsafe {
            assert!((*e).is_signaled());
            assert!(!(*e).try_wait(w.as_waiter()));
            drop(Box::from_raw(e));
        }
    }
}
