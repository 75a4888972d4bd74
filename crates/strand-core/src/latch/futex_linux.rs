//! Linux futex-based countdown latch
//!
//! The futex word is the signal count itself: waiter invocations increment
//! it and wake, the consumer sleeps while the count is below its target and
//! consumes the target amount once reached.

use crate::event::{EventPtr, Waiter};
use crate::wait::WaitStrategy;
use std::sync::atomic::{AtomicU32, Ordering};

/// Linux futex-backed latch
#[repr(C)]
pub struct FutexLatch {
    // Dispatch header; must stay the first field
    raw: Waiter,

    /// Futex word: signals since the last reset
    count: AtomicU32,
}

impl FutexLatch {
    pub fn new() -> Self {
        Self {
            raw: Waiter::new(Self::dispatch),
            count: AtomicU32::new(0),
        }
    }

    unsafe fn dispatch(this: *mut Waiter, event: EventPtr) {
        let this = this as *mut Self;
        // Registration only borrows the event; hand ownership back
        let _ = event.release();
        (*this).count.fetch_add(1, Ordering::AcqRel);
        futex_wake_all(&(*this).count);
    }
}

impl Default for FutexLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for FutexLatch {
    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    fn wait(&self, target: usize) {
        let target = target as u32;
        loop {
            let current = self.count.load(Ordering::Acquire);
            if current >= target {
                if self
                    .count
                    .compare_exchange(
                        current,
                        current - target,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    return;
                }
                // lost a race against a concurrent signal, re-read
                continue;
            }
            futex_wait(&self.count, current);
        }
    }

    fn waiter(&self) -> *mut Waiter {
        self.raw.as_ptr()
    }
}

/// FUTEX_WAIT: sleep while the word still holds `expected`
fn futex_wait(word: &AtomicU32, expected: u32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

/// FUTEX_WAKE: wake every sleeper on the word
fn futex_wake_all(word: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            i32::MAX,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

// Safety: the latch only holds atomics and a function pointer
unsafe impl Send for FutexLatch {}
unsafe impl Sync for FutexLatch {}
