//! Fallback countdown latch using std::sync::Condvar
//!
//! Used on platforms without futex support. Less efficient but portable.

use crate::event::{EventPtr, Waiter};
use crate::wait::WaitStrategy;
use std::sync::{Condvar, Mutex};

/// Condvar-based latch (fallback)
#[repr(C)]
pub struct CondvarLatch {
    // Dispatch header; must stay the first field
    raw: Waiter,

    /// Signals since the last reset
    count: Mutex<usize>,

    /// Wakes the consumer when the count grows
    condvar: Condvar,
}

impl CondvarLatch {
    pub fn new() -> Self {
        Self {
            raw: Waiter::new(Self::dispatch),
            count: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    unsafe fn dispatch(this: *mut Waiter, event: EventPtr) {
        let this = &*(this as *const Self);
        // Registration only borrows the event; hand ownership back
        let _ = event.release();
        {
            let mut count = this.count.lock().unwrap();
            *count += 1;
        }
        this.condvar.notify_all();
    }
}

impl Default for CondvarLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for CondvarLatch {
    fn reset(&self) {
        *self.count.lock().unwrap() = 0;
    }

    fn wait(&self, target: usize) {
        let mut count = self.count.lock().unwrap();
        while *count < target {
            count = self.condvar.wait(count).unwrap();
        }
        *count -= target;
    }

    fn waiter(&self) -> *mut Waiter {
        self.raw.as_ptr()
    }
}

// Safety: the latch state is guarded by its mutex
unsafe impl Send for CondvarLatch {}
unsafe impl Sync for CondvarLatch {}
