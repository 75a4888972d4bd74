//! One-shot promise/future pair
//!
//! The shared state is a heap allocation with the event at offset zero, so
//! the event machinery can hand the whole state around as an `EventPtr`.
//! Ownership follows the event protocol: the producer owns the state until
//! signal; a consumer that leaves early registers [`DELETE_WAITER`] so the
//! producer's signal frees the orphaned state.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem;
use std::ptr;

use strand_core::error::FutureError;
use strand_core::event::{Event, DELETE_WAITER};
use strand_core::latch::ThreadLatch;
use strand_core::wait::{wait_one, WaitStrategy};
use strand_core::waitable::Waitable;

/// Heap state shared by a promise/future pair. The event must stay the
/// first field: waiters receive the state as an `EventPtr` and cast back.
#[repr(C)]
pub(crate) struct SharedState<T> {
    event: Event,
    value: UnsafeCell<Option<Result<T, FutureError>>>,
}

impl<T> SharedState<T> {
    fn alloc() -> *mut SharedState<T> {
        Box::into_raw(Box::new(SharedState {
            event: unsafe { Event::embedded(Self::drop_raw) },
            value: UnsafeCell::new(None),
        }))
    }

    unsafe fn drop_raw(p: *mut Event) {
        drop(Box::from_raw(p as *mut SharedState<T>));
    }

    pub(crate) fn event(&self) -> *mut Event {
        &self.event as *const Event as *mut Event
    }

    /// Move the outcome out of a consumed state.
    pub(crate) fn into_value(self: Box<Self>) -> Result<T, FutureError> {
        let SharedState { event: _, value } = *self;
        value
            .into_inner()
            .expect("signaled shared state always carries an outcome")
    }

    /// Move the outcome out in place, leaving the allocation alive.
    ///
    /// # Safety
    ///
    /// Caller must be the sole accessor of the value slot (the state has
    /// been signaled and ownership received).
    pub(crate) unsafe fn take_value(&self) -> Option<Result<T, FutureError>> {
        (*self.value.get()).take()
    }
}

/// Create a connected promise/future pair.
pub fn promise<T>() -> (Promise<T>, Future<T>) {
    let state = SharedState::alloc();
    (
        Promise {
            state,
            _marker: PhantomData,
        },
        Future {
            state,
            _marker: PhantomData,
        },
    )
}

/// Producing half of a one-shot value
pub struct Promise<T> {
    state: *mut SharedState<T>,
    _marker: PhantomData<T>,
}

/// Consuming half of a one-shot value
pub struct Future<T> {
    state: *mut SharedState<T>,
    _marker: PhantomData<T>,
}

// Safety: the halves hand the state between threads; access is ordered by
// the event's release/acquire edge.
unsafe impl<T: Send> Send for Promise<T> {}
unsafe impl<T: Send> Send for Future<T> {}

impl<T> Promise<T> {
    /// Fulfil the promise. Wakes the registered waiter, if any,
    /// synchronously on this thread.
    pub fn set_value(mut self, value: T) {
        let state = mem::replace(&mut self.state, ptr::null_mut());
        unsafe {
            *(*state).value.get() = Some(Ok(value));
            (*state).event.signal();
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.state.is_null() {
            return;
        }
        // dropped without a value: the consumer observes a broken promise
        unsafe {
            *(*self.state).value.get() = Some(Err(FutureError::Broken));
            (*self.state).event.signal();
        }
    }
}

impl<T> Future<T> {
    /// Whether the outcome is already available.
    pub fn ready(&self) -> bool {
        unsafe { (*self.state).event.is_signaled() }
    }

    /// Block on `how` until the outcome is available.
    pub fn wait_with<S: WaitStrategy>(&self, how: &S) {
        wait_one(how, self);
    }

    /// Block on a fresh latch until the outcome is available.
    pub fn wait(&self) {
        let latch = ThreadLatch::new();
        self.wait_with(&latch);
    }

    /// Wait with `how`, then consume the future and return the outcome.
    pub fn get_with<S: WaitStrategy>(self, how: &S) -> Result<T, FutureError> {
        self.wait_with(how);
        let state = self.into_raw_state();
        unsafe { Box::from_raw(state) }.into_value()
    }

    /// Wait on a fresh latch, then consume the future and return the
    /// outcome.
    pub fn get(self) -> Result<T, FutureError> {
        let latch = ThreadLatch::new();
        self.get_with(&latch)
    }

    /// Turn this future into a [`SharedFuture`](crate::shared_future::SharedFuture).
    pub fn share(self) -> crate::shared_future::SharedFuture<T> {
        crate::shared_future::SharedFuture::new(self)
    }

    pub(crate) fn into_raw_state(self) -> *mut SharedState<T> {
        let state = self.state;
        mem::forget(self);
        state
    }
}

impl<T> Waitable for Future<T> {
    fn event(&self) -> *mut Event {
        unsafe { (*self.state).event() }
    }
}

impl<T> Drop for Future<T> {
    fn drop(&mut self) {
        if self.state.is_null() {
            return;
        }
        unsafe {
            // Leave the state to the producer's signal, or free it now if
            // the signal already happened.
            if !(*self.state).event.try_wait(DELETE_WAITER.as_ptr()) {
                drop(Box::from_raw(self.state));
            }
        }
    }
}
