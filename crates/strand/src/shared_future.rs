//! Shared futures and the completion multiplexer
//!
//! A [`SharedStateMultiplexer`] registers itself as the waiter of one
//! future's shared state and, on signal, takes that state over and fans the
//! completion out to any number of listener promises. Each
//! [`SharedFuture`] handle owns one listener; cloning a handle adds one.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{Arc, Mutex};

use strand_core::error::FutureError;
use strand_core::event::{Event, EventPtr, Waiter, DELETE_WAITER};
use strand_core::wait::WaitStrategy;
use strand_core::waitable::Waitable;

use crate::future::{promise, Future, Promise, SharedState};

struct ListenerQueue<T> {
    ready: bool,
    pending: VecDeque<Promise<T>>,
}

/// Fans one future's completion out to many listeners
///
/// Acts as both a waiter (on the source future's shared state) and the
/// holder of the moved-in outcome. Listener promises are fulfilled with
/// `true` when the source completes; listeners added afterwards are
/// fulfilled immediately.
#[repr(C)]
pub struct SharedStateMultiplexer<T> {
    // Dispatch header; must stay the first field
    waiter: Waiter,

    /// Source shared state while the registration is outstanding
    source: AtomicPtr<SharedState<T>>,

    /// Set once the outcome has been moved in
    done: AtomicBool,

    /// The outcome, written once by the signalling thread
    outcome: UnsafeCell<Option<Result<T, FutureError>>>,

    /// Pending listeners, drained on completion
    listeners: Mutex<ListenerQueue<bool>>,
}

// Safety: the outcome slot is written once before `done` and the listener
// queue is mutex-guarded; everything else is atomic.
unsafe impl<T: Send> Send for SharedStateMultiplexer<T> {}
unsafe impl<T: Send> Sync for SharedStateMultiplexer<T> {}

impl<T> SharedStateMultiplexer<T> {
    /// Consume `future` and register as its waiter. A source that is
    /// already complete fires the callback synchronously in here.
    pub fn new(future: Future<T>) -> Arc<Self> {
        let mux = Arc::new(Self {
            waiter: Waiter::new(Self::dispatch),
            source: AtomicPtr::new(ptr::null_mut()),
            done: AtomicBool::new(false),
            outcome: UnsafeCell::new(None),
            listeners: Mutex::new(ListenerQueue {
                ready: false,
                pending: VecDeque::new(),
            }),
        });
        let state = future.into_raw_state();
        mux.source.store(state, Ordering::Release);
        unsafe { (*(*state).event()).wait(mux.waiter.as_ptr()) };
        mux
    }

    unsafe fn dispatch(this: *mut Waiter, event: EventPtr) {
        // Waiter is the first field
        let this = &*(this as *const Self);
        this.complete(event);
    }

    /// The signaled event is the source future's shared state (the event
    /// sits at offset zero by contract). Take its outcome over and wake
    /// everyone. The source allocation itself stays alive until the
    /// multiplexer drops, so a racing teardown never pulls the event out
    /// from under a dismissal attempt.
    unsafe fn complete(&self, event: EventPtr) {
        let source = event.release() as *mut SharedState<T>;
        debug_assert_eq!(source, self.source.load(Ordering::Acquire));
        let outcome = (*source)
            .take_value()
            .expect("signaled shared state always carries an outcome");
        *self.outcome.get() = Some(outcome);
        self.done.store(true, Ordering::Release);

        let drained = {
            let mut queue = self.listeners.lock().unwrap();
            queue.ready = true;
            mem::take(&mut queue.pending)
        };
        // only local state from here on: a concurrent teardown may release
        // the multiplexer once it has seen `ready` under the lock
        for listener in drained {
            listener.set_value(true);
        }
    }

    /// Register a listener; its future completes when the source does.
    /// After completion the listener is fulfilled on the spot.
    pub fn add_listener(&self) -> Future<bool> {
        let (listener, future) = promise::<bool>();
        let mut queue = self.listeners.lock().unwrap();
        if queue.ready {
            drop(queue);
            listener.set_value(true);
        } else {
            queue.pending.push_back(listener);
        }
        future
    }

    fn value(&self) -> Result<&T, FutureError> {
        debug_assert!(self.done.load(Ordering::Acquire));
        match unsafe { &*self.outcome.get() } {
            Some(Ok(value)) => Ok(value),
            Some(Err(e)) => Err(*e),
            None => Err(FutureError::Broken),
        }
    }
}

impl<T> Drop for SharedStateMultiplexer<T> {
    fn drop(&mut self) {
        let source = self.source.load(Ordering::Acquire);
        if source.is_null() {
            return;
        }
        unsafe {
            let event = &*(*source).event();
            if !self.done.load(Ordering::Acquire) && event.dismiss_wait(self.waiter.as_ptr()) {
                // Unregistered before any signal reached us. Hand the
                // consumer side back so the producer's signal frees the
                // orphaned state.
                if !event.try_wait(DELETE_WAITER.as_ptr()) {
                    // signaled in the dismiss gap with no waiter registered:
                    // the state is ours to free
                    drop(Box::from_raw(source));
                }
                return;
            }
            // The completion callback ran, or is running on the signalling
            // thread right now. It touches our fields until it has marked
            // the queue ready under the lock; hold the teardown here until
            // then.
            loop {
                let queue = self.listeners.lock().unwrap();
                if queue.ready {
                    break;
                }
                drop(queue);
                std::hint::spin_loop();
            }
            drop(Box::from_raw(source));
        }
    }
}

/// Multi-consumer view of a future
///
/// Cloning adds a listener on the shared multiplexer; every clone can wait
/// for and borrow the outcome independently.
pub struct SharedFuture<T> {
    // listener first: it must unhook before the multiplexer can go away
    listener: Future<bool>,
    state: Arc<SharedStateMultiplexer<T>>,
}

impl<T> SharedFuture<T> {
    pub fn new(future: Future<T>) -> Self {
        let state = SharedStateMultiplexer::new(future);
        let listener = state.add_listener();
        Self { listener, state }
    }

    /// Whether the source has completed.
    pub fn ready(&self) -> bool {
        self.listener.ready()
    }

    /// Block on `how` until the source completes.
    pub fn wait_with<S: WaitStrategy>(&self, how: &S) {
        self.listener.wait_with(how);
    }

    /// Block on a fresh latch until the source completes.
    pub fn wait(&self) {
        self.listener.wait();
    }

    /// Wait with `how`, then borrow the outcome.
    pub fn get_with<S: WaitStrategy>(&self, how: &S) -> Result<&T, FutureError> {
        if !self.ready() {
            self.wait_with(how);
        }
        self.state.value()
    }

    /// Wait on a fresh latch, then borrow the outcome.
    pub fn get(&self) -> Result<&T, FutureError> {
        if !self.ready() {
            self.wait();
        }
        self.state.value()
    }
}

impl<T> Clone for SharedFuture<T> {
    fn clone(&self) -> Self {
        Self {
            listener: self.state.add_listener(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Waitable for SharedFuture<T> {
    fn event(&self) -> *mut Event {
        self.listener.event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_multiplexer_fan_out() {
        let (tx, rx) = promise::<String>();
        let first = rx.share();
        let second = first.clone();
        let third = first.clone();
        assert!(!first.ready());

        tx.set_value("payload".to_string());

        assert!(first.ready() && second.ready() && third.ready());
        assert_eq!(*first.get().unwrap(), "payload");
        assert_eq!(*second.get().unwrap(), "payload");
        assert_eq!(*third.get().unwrap(), "payload");
    }

    #[test]
    fn test_listener_added_after_completion() {
        let (tx, rx) = promise::<i32>();
        let first = rx.share();
        tx.set_value(5);
        assert!(first.ready());

        let late = first.clone();
        assert!(late.ready());
        assert_eq!(*late.get().unwrap(), 5);
    }

    #[test]
    fn test_share_already_completed_future() {
        let (tx, rx) = promise::<i32>();
        tx.set_value(9);
        let shared = rx.share();
        assert!(shared.ready());
        assert_eq!(*shared.get().unwrap(), 9);
    }

    #[test]
    fn test_get_blocks_across_threads() {
        let (tx, rx) = promise::<i32>();
        let shared = rx.share();
        let clone = shared.clone();

        let waiter = thread::spawn(move || *clone.get().unwrap());
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            tx.set_value(11);
        });

        assert_eq!(*shared.get().unwrap(), 11);
        assert_eq!(waiter.join().unwrap(), 11);
        producer.join().unwrap();
    }

    #[test]
    fn test_broken_source_propagates() {
        let (tx, rx) = promise::<i32>();
        let shared = rx.share();
        drop(tx);
        assert!(shared.ready());
        assert_eq!(shared.get().unwrap_err(), FutureError::Broken);
    }

    #[test]
    fn test_dropping_all_handles_before_completion() {
        let (tx, rx) = promise::<i32>();
        let shared = rx.share();
        drop(shared);
        // the multiplexer dismissed itself and left a delete waiter behind
        tx.set_value(3);
    }
}
