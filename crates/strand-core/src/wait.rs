//! Wait strategies: single, all, any
//!
//! Each strategy pairs the event registration primitives with a countdown
//! latch. The latch is registered as the waiter on every event of interest;
//! blocking happens only in the latch, never in the events.

use crate::event::{Event, Waiter};
use crate::waitable::Waitable;

/// The countdown-latch concept consumed by the wait strategies.
///
/// `reset` runs single-threaded between wait cycles. The waiter handler
/// releases the incoming event and increments the count; it may run
/// concurrently with `wait`. `wait(target)` is single-consumer: it blocks
/// until the count reaches `target`, then consumes that many signals.
pub trait WaitStrategy {
    fn reset(&self);
    fn wait(&self, target: usize);

    /// The registration handle for this strategy's waiter.
    fn waiter(&self) -> *mut Waiter;
}

/// Block until `w` is signaled.
pub fn wait_one<S: WaitStrategy, W: Waitable>(how: &S, w: &W) {
    how.reset();
    unsafe {
        (*w.event()).wait(how.waiter());
    }
    how.wait(1);
}

/// Block until every non-null event in `events` is signaled.
pub fn wait_all<S: WaitStrategy>(how: &S, events: &[*mut Event]) {
    how.reset();
    let (_signaled, waited) = unsafe { Event::wait_many(how.waiter(), events) };
    // events that were already signaled never registered the latch and
    // contribute nothing to the count
    if waited > 0 {
        how.wait(waited);
    }
}

/// Block until at least one non-null event in `events` is signaled.
///
/// On return every registration made here has been revoked or consumed, so
/// the strategy object may be destroyed.
pub fn wait_any<S: WaitStrategy>(how: &S, events: &[*mut Event]) {
    how.reset();
    let (signaled, waited) = unsafe { Event::wait_many(how.waiter(), events) };
    debug_assert!(
        signaled + waited <= events.iter().filter(|e| !e.is_null()).count()
    );
    if signaled == 0 {
        how.wait(1);
    }

    let dismissed = unsafe { Event::dismiss_wait_many(how.waiter(), events) };
    debug_assert!(dismissed <= waited);

    // Registrations neither dismissed nor pre-signaled belong to signals
    // already in flight; the latch must absorb them all before it can go
    // away. One of them, when nothing was pre-signaled, already released
    // the wait above.
    let mut pending = waited - dismissed;
    if signaled == 0 {
        debug_assert!(pending >= 1);
        pending -= 1;
    }
    if pending > 0 {
        how.wait(pending);
    }
}

/// `wait_all` over a heterogeneous set of waitables.
pub fn wait_all_of<S: WaitStrategy>(how: &S, ws: &[&dyn Waitable]) {
    let events: Vec<*mut Event> = ws.iter().map(|w| w.event()).collect();
    wait_all(how, &events);
}

/// `wait_any` over a heterogeneous set of waitables.
pub fn wait_any_of<S: WaitStrategy>(how: &S, ws: &[&dyn Waitable]) {
    let events: Vec<*mut Event> = ws.iter().map(|w| w.event()).collect();
    wait_any(how, &events);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CallbackWaiter, Event, EventPtr};
    use crate::latch::ThreadLatch;
    use std::ptr;
    use std::thread;
    use std::time::Duration;

    fn new_events(n: usize) -> Vec<*mut Event> {
        (0..n).map(|_| Box::into_raw(Event::new())).collect()
    }

    fn free_events(events: Vec<*mut Event>) {
        for e in events {
            unsafe { drop(Box::from_raw(e)) };
        }
    }

    #[test]
    fn test_wait_one_signaled_from_thread() {
        let latch = ThreadLatch::new();
        let e = Box::into_raw(Event::new());
        let addr = e as usize;
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            unsafe { (*(addr as *mut Event)).signal() };
        });

        wait_one(&latch, &e);
        handle.join().unwrap();
        unsafe { drop(Box::from_raw(e)) };
    }

    #[test]
    fn test_wait_all_three_producers() {
        let latch = ThreadLatch::new();
        let events = new_events(3);
        let handles: Vec<_> = events
            .iter()
            .map(|&e| {
                let addr = e as usize;
                thread::spawn(move || {
                    unsafe { (*(addr as *mut Event)).signal() };
                })
            })
            .collect();

        wait_all(&latch, &events);
        for (i, &e) in events.iter().enumerate() {
            assert!(unsafe { (*e).is_signaled() }, "event {} not signaled", i);
        }
        for h in handles {
            h.join().unwrap();
        }
        free_events(events);
    }

    #[test]
    fn test_wait_all_already_signaled() {
        let latch = ThreadLatch::new();
        let events = new_events(2);
        for &e in &events {
            unsafe { (*e).signal() };
        }
        // must not block
        wait_all(&latch, &events);
        free_events(events);
    }

    // wait_any fast path: one event pre-signaled, nothing blocks, the
    // others come back dismissed.
    #[test]
    fn test_wait_any_fast_path() {
        let latch = ThreadLatch::new();
        let events = new_events(3);
        unsafe { (*events[1]).signal() };

        wait_any(&latch, &events);

        unsafe {
            // events 0 and 2 went back to empty; a fresh registration works
            // and a later signal reaches it
            assert!(!(*events[0]).is_signaled());
            assert!(!(*events[2]).is_signaled());
            let hits = std::cell::Cell::new(0u32);
            let probe = CallbackWaiter::new(|p: EventPtr| {
                hits.set(hits.get() + 1);
                let _ = p.release();
            });
            assert!((*events[0]).try_wait(probe.as_waiter()));
            (*events[0]).signal();
            assert_eq!(hits.get(), 1);
            (*events[2]).signal();
            assert_eq!(hits.get(), 1);
        }
        free_events(events);
    }

    #[test]
    fn test_wait_any_blocks_for_first() {
        let latch = ThreadLatch::new();
        let events = new_events(3);
        let addr = events[1] as usize;
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            unsafe { (*(addr as *mut Event)).signal() };
        });

        wait_any(&latch, &events);
        assert!(unsafe { (*events[1]).is_signaled() });
        handle.join().unwrap();
        free_events(events);
    }

    #[test]
    fn test_wait_many_skips_nulls() {
        let latch = ThreadLatch::new();
        let e = Box::into_raw(Event::new());
        unsafe {
            (*e).signal();
            let events = [ptr::null_mut(), e, ptr::null_mut()];
            let (signaled, waited) = Event::wait_many(latch.waiter(), &events);
            assert_eq!((signaled, waited), (1, 0));
            drop(Box::from_raw(e));
        }
    }
}
