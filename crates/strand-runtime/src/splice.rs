//! Splicing code onto suspended stacks, and exit propagation
//!
//! `splice` runs a closure on top of another context's stack and hands its
//! result to that context as the next datum. `splicecc` hands the closure
//! the current continuation instead and transfers to whatever continuation
//! it returns. `signal_exit` unwinds a context from its suspension point
//! and brings control back here once it is torn down.

use std::mem::{ManuallyDrop, MaybeUninit};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use crate::arch::{self, StackPointer, SwitchPair};
use crate::continuation::{Continuation, ExitContinuation};
use crate::unwind::{self, AbnormalUnwind, ExitUnwind};

/// Closure slot living in the splicer's suspended frame. The result is
/// written back into it so the datum stays alive until the target consumes
/// it; the splicer's stack is suspended exactly that long.
struct SpliceSlot<F, R> {
    f: ManuallyDrop<F>,
    result: MaybeUninit<R>,
}

/// Run `f` on top of `c`'s stack and hand its result to `c` as the next
/// datum. Returns `c`'s new handle once it transfers back.
///
/// A panic in `f` becomes an abnormal exit directed here: `c` is torn down
/// and the cause re-raised on this stack.
pub fn splice<In, Out, F>(mut c: Continuation<In, Out>, f: F) -> Continuation<In, Out>
where
    F: FnOnce() -> In,
{
    assert!(!c.terminated(), "splice on a terminated continuation");
    let target = c.pilfer_sp();

    let mut slot = SpliceSlot {
        f: ManuallyDrop::new(f),
        result: MaybeUninit::uninit(),
    };
    let pair = unsafe {
        arch::execute_into(
            &mut slot as *mut SpliceSlot<F, In> as *mut (),
            target,
            splice_trampoline::<F, In>,
        )
    };
    let next = unsafe { Continuation::from_arrival(pair.sp, pair.parm) };
    unwind::check_pending();
    next
}

unsafe extern "C" fn splice_trampoline<F, R>(arg: *mut (), from: StackPointer) -> SwitchPair
where
    F: FnOnce() -> R,
{
    let slot = &mut *(arg as *mut SpliceSlot<F, R>);
    let f = ManuallyDrop::take(&mut slot.f);
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => {
            slot.result.write(value);
            SwitchPair {
                sp: from,
                parm: slot.result.as_mut_ptr() as *mut (),
            }
        }
        Err(cause) => {
            // Unwind the target from its suspension point; teardown lands
            // back on the splicer's stack with the cause.
            unwind::set_pending(Box::new(AbnormalUnwind {
                exit_to: ExitContinuation::from_sp(from),
                cause,
            }));
            SwitchPair::TERMINATED
        }
    }
}

/// Run `f` on top of `c`'s stack, handing it the current continuation, and
/// transfer to the continuation `f` returns. The transfer delivers no
/// datum; an untaken datum in the returned handle is dropped.
pub fn splicecc<In, Out, F>(mut c: Continuation<In, Out>, f: F) -> Continuation<In, Out>
where
    F: FnOnce(Continuation<Out, In>) -> Continuation<Out, In>,
{
    assert!(!c.terminated(), "splicecc on a terminated continuation");
    let target = c.pilfer_sp();

    let mut slot = ManuallyDrop::new(f);
    let pair = unsafe {
        arch::execute_into(
            &mut slot as *mut ManuallyDrop<F> as *mut (),
            target,
            splicecc_trampoline::<In, Out, F>,
        )
    };
    let next = unsafe { Continuation::from_arrival(pair.sp, pair.parm) };
    unwind::check_pending();
    next
}

unsafe extern "C" fn splicecc_trampoline<In, Out, F>(
    arg: *mut (),
    from: StackPointer,
) -> SwitchPair
where
    F: FnOnce(Continuation<Out, In>) -> Continuation<Out, In>,
{
    let f = ManuallyDrop::take(&mut *(arg as *mut ManuallyDrop<F>));
    let current = Continuation::<Out, In>::from_arrival(from, ptr::null_mut());
    match panic::catch_unwind(AssertUnwindSafe(move || f(current))) {
        Ok(mut ret) => {
            assert!(
                !ret.terminated(),
                "splicecc closure returned a terminated continuation"
            );
            SwitchPair {
                sp: ret.pilfer_sp(),
                parm: ptr::null_mut(),
            }
        }
        Err(cause) => {
            unwind::set_pending(Box::new(AbnormalUnwind {
                exit_to: ExitContinuation::from_sp(from),
                cause,
            }));
            SwitchPair::TERMINATED
        }
    }
}

/// Unwind `c` from its suspension point and tear it down; returns once its
/// stack has been freed. Works on contexts that were never resumed.
pub fn signal_exit<In, Out>(mut c: Continuation<In, Out>) {
    assert!(!c.terminated(), "signal_exit on a terminated continuation");
    let target = c.pilfer_sp();

    let pair = unsafe { arch::execute_into(ptr::null_mut(), target, exit_trampoline) };
    debug_assert!(pair.terminated());
    unwind::check_pending();
}

unsafe extern "C" fn exit_trampoline(_arg: *mut (), from: StackPointer) -> SwitchPair {
    unwind::set_pending(Box::new(ExitUnwind {
        exit_to: ExitContinuation::from_sp(from),
    }));
    SwitchPair::TERMINATED
}

/// Run `f`, converting any escaping panic into an abnormal exit directed at
/// `c`. On the panic path `c` is pilfered into the payload; on success it
/// is left untouched.
pub fn with_escape_continuation<F, R, In, Out>(f: F, c: &mut Continuation<In, Out>) -> R
where
    F: FnOnce() -> R,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(cause) => {
            let exit_to = ExitContinuation::from_sp(c.pilfer_sp());
            panic::panic_any(AbnormalUnwind { exit_to, cause })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::callcc;

    fn doubler() -> Continuation<i32, i32> {
        callcc::<i32, i32, _>(|mut caller| {
            let mut n = caller.take();
            while n >= 0 {
                caller.resume(n * 2);
                n = caller.take();
            }
            caller
        })
        .unwrap()
    }

    #[test]
    fn test_splice_injects_value() {
        let mut c = doubler();
        c.resume(5);
        assert_eq!(c.take(), 10);

        // the context sees 7 as its next input without anyone resuming it
        let mut c = splice(c, || 7);
        assert_eq!(c.take(), 14);

        c.resume(-1);
        assert!(c.terminated());
    }

    #[test]
    fn test_splice_onto_fresh_context_feeds_first_input() {
        let c = doubler();
        let mut c = splice(c, || 21);
        assert_eq!(c.take(), 42);
        c.resume(-1);
        assert!(c.terminated());
    }

    #[test]
    fn test_splice_panic_tears_down_target() {
        let mut c = doubler();
        c.resume(1);
        assert_eq!(c.take(), 2);

        let err = panic::catch_unwind(AssertUnwindSafe(|| {
            splice(c, || -> i32 { panic!("spliced") });
        }))
        .unwrap_err();
        assert_eq!(err.downcast_ref::<&str>().copied(), Some("spliced"));
    }

    #[test]
    fn test_splicecc_rebinds_and_delivers_no_datum() {
        let mut c = callcc::<i32, i32, _>(|mut caller| {
            let mut total = 0;
            while caller.has_data() {
                total += caller.take();
                caller.resume(total);
            }
            // woken without a datum: report once more, then finish
            caller.resume(total);
            caller
        })
        .unwrap();

        c.resume(3);
        assert_eq!(c.take(), 3);
        c.resume(4);
        assert_eq!(c.take(), 7);

        let mut c = splicecc(c, |current| current);
        assert_eq!(c.take(), 7);

        c.resume(0);
        assert!(c.terminated());
    }

    #[test]
    fn test_signal_exit_on_suspended_context() {
        let mut c = doubler();
        c.resume(10);
        assert_eq!(c.take(), 20);
        signal_exit(c);
    }
}
