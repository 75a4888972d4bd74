//! Countdown latch used as the blocking end of the wait strategies
//!
//! The latch counts waiter invocations since the last `reset`. A single
//! consumer blocks in `wait(target)` until `target` signals have arrived,
//! then consumes them. Signalling is thread-safe and allocation-free, so a
//! latch can be registered on any number of events at once.
//!
//! Platform-specific implementations use the most efficient primitive
//! available: a raw futex word on Linux, mutex + condvar elsewhere.

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexLatch as ThreadLatch;
    } else {
        mod condvar;
        pub use condvar::CondvarLatch as ThreadLatch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::wait::WaitStrategy;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_signal_before_wait() {
        let latch = ThreadLatch::new();
        latch.reset();

        let e = Box::into_raw(Event::new());
        unsafe {
            assert!((*e).try_wait(latch.waiter()));
            (*e).signal();
        }
        // count is already 1, wait returns immediately
        latch.wait(1);
        unsafe { drop(Box::from_raw(e)) };
    }

    #[test]
    fn test_wait_blocks_until_signal() {
        let latch = ThreadLatch::new();
        latch.reset();

        let e = Box::into_raw(Event::new());
        unsafe {
            assert!((*e).try_wait(latch.waiter()));
        }

        let addr = e as usize;
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            unsafe { (*(addr as *mut Event)).signal() };
        });

        latch.wait(1);
        handle.join().unwrap();
        unsafe { drop(Box::from_raw(e)) };
    }

    #[test]
    fn test_wait_for_multiple_signals() {
        let latch = ThreadLatch::new();
        latch.reset();

        let events: Vec<*mut Event> = (0..3).map(|_| Box::into_raw(Event::new())).collect();
        for &e in &events {
            unsafe {
                assert!((*e).try_wait(latch.waiter()));
            }
        }

        let addrs: Vec<usize> = events.iter().map(|&e| e as usize).collect();
        let handles: Vec<_> = addrs
            .into_iter()
            .map(|addr| {
                thread::spawn(move || {
                    unsafe { (*(addr as *mut Event)).signal() };
                })
            })
            .collect();

        latch.wait(3);
        for h in handles {
            h.join().unwrap();
        }
        for e in events {
            unsafe { drop(Box::from_raw(e)) };
        }
    }

    #[test]
    fn test_reset_between_cycles() {
        let latch = ThreadLatch::new();

        for _ in 0..2 {
            latch.reset();
            let e = Box::into_raw(Event::new());
            unsafe {
                assert!((*e).try_wait(latch.waiter()));
                (*e).signal();
            }
            latch.wait(1);
            unsafe { drop(Box::from_raw(e)) };
        }
    }
}
