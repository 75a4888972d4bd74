//! Context creation and teardown
//!
//! `create_context` allocates a private stack and forges its initial
//! switch frame; the body does not run until the first resume. Teardown
//! always leaves through the cleanup trampoline: the dying stack's frames
//! unwind first, then the deleter runs on the stack control lands on.

use std::any::Any;
use std::mem::ManuallyDrop;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use strand_core::error::StrandResult;
use strand_core::{kerror, ktrace};

use crate::arch::{self, StackPointer, SwitchPair};
use crate::continuation::Continuation;
use crate::stack::{HeapStackAllocator, StackAllocator, DEFAULT_STACK_SIZE};
use crate::unwind::{self, AbnormalUnwind, ExitUnwind};

/// Everything the fresh context needs on first entry, boxed at creation
/// and unboxed onto the new stack by the startup entry.
struct StartupArgs<F, D> {
    f: F,
    deleter: D,
}

/// Moved onto the teardown target's stack by the cleanup trampoline before
/// the dying stack is freed.
struct CleanupArgs<D> {
    deleter: ManuallyDrop<D>,
    cause: Option<Box<dyn Any + Send>>,
}

/// Create a suspended context that runs `f` on a private stack
///
/// `f` receives the reverse handle, already carrying the first resume's
/// input, and must return the continuation control transfers to for
/// teardown. The first resume of the returned handle starts `f`.
pub fn create_context<In, Out, F, A>(
    f: F,
    stack_size: usize,
    alloc: A,
) -> StrandResult<Continuation<In, Out>>
where
    F: FnOnce(Continuation<Out, In>) -> Continuation<Out, In> + 'static,
    A: StackAllocator + 'static,
{
    let base = alloc.allocate(stack_size)?;
    let bottom = unsafe { arch::stack_bottom(base.as_ptr(), stack_size) };
    let deleter = move || unsafe { alloc.deallocate(base, stack_size) };

    let sp = unsafe { prepare::<In, Out, F, _>(f, deleter, bottom) };
    ktrace!("context created: {} byte stack at {:p}", stack_size, base);
    Ok(Continuation::from_sp(sp))
}

/// Box the startup arguments and forge the initial frame. Split out so the
/// deleter's closure type can be named in the entry's instantiation.
unsafe fn prepare<In, Out, F, D>(f: F, deleter: D, bottom: StackPointer) -> StackPointer
where
    F: FnOnce(Continuation<Out, In>) -> Continuation<Out, In>,
    D: FnOnce(),
{
    let args = Box::new(StartupArgs { f, deleter });
    arch::init_context(
        bottom,
        startup_entry::<In, Out, F, D>,
        Box::into_raw(args) as *mut (),
    )
}

/// `create_context` with the default stack size and allocator.
pub fn callcc<In, Out, F>(f: F) -> StrandResult<Continuation<In, Out>>
where
    F: FnOnce(Continuation<Out, In>) -> Continuation<Out, In> + 'static,
{
    create_context(f, DEFAULT_STACK_SIZE, HeapStackAllocator)
}

/// Resolve a caught payload into the teardown target and the cause to
/// re-raise there. Anything that is not an exit payload has escaped a
/// context with nowhere to go; that is a contract violation and traps.
fn classify_payload(payload: Box<dyn Any + Send>) -> (StackPointer, Option<Box<dyn Any + Send>>) {
    let payload = match payload.downcast::<ExitUnwind>() {
        Ok(exit) => {
            let ExitUnwind { mut exit_to } = *exit;
            return (exit_to.pilfer(), None);
        }
        Err(other) => other,
    };
    match payload.downcast::<AbnormalUnwind>() {
        Ok(abnormal) => {
            let AbnormalUnwind { mut exit_to, cause } = *abnormal;
            (exit_to.pilfer(), Some(cause))
        }
        Err(_) => {
            kerror!("panic escaped a context without an escape continuation");
            std::process::abort();
        }
    }
}

/// First code to run on a fresh stack, called by the arch startup thunk.
unsafe extern "C" fn startup_entry<In, Out, F, D>(
    arg: *mut (),
    from: StackPointer,
    parm: *mut (),
) -> !
where
    F: FnOnce(Continuation<Out, In>) -> Continuation<Out, In>,
    D: FnOnce(),
{
    let args = Box::from_raw(arg as *mut StartupArgs<F, D>);
    let StartupArgs { f, deleter } = *args;

    // A payload parked before the body ever ran means the context is being
    // discarded (signal_exit before the first resume): skip the body.
    let (target, cause) = match unwind::take_pending() {
        Some(payload) => {
            drop(f);
            classify_payload(payload)
        }
        None => {
            let caller = Continuation::<Out, In>::from_arrival(from, parm);
            match panic::catch_unwind(AssertUnwindSafe(move || f(caller))) {
                Ok(mut ret) => (ret.pilfer_sp(), None),
                Err(payload) => classify_payload(payload),
            }
        }
    };

    assert!(!target.is_null(), "context teardown without a live target");

    let mut cleanup = CleanupArgs {
        deleter: ManuallyDrop::new(deleter),
        cause,
    };
    arch::execute_into(
        &mut cleanup as *mut CleanupArgs<D> as *mut (),
        target,
        cleanup_trampoline::<D>,
    );
    unreachable!("resumed a torn-down context");
}

/// Runs on the teardown target's stack once the dying stack has fully
/// unwound. The deleter must not unwind; a parked cause is re-raised by
/// the target's wrapper after the deleter has run.
unsafe extern "C" fn cleanup_trampoline<D>(arg: *mut (), _from: StackPointer) -> SwitchPair
where
    D: FnOnce(),
{
    let CleanupArgs { deleter, cause } = ptr::read(arg as *mut CleanupArgs<D>);
    if let Some(cause) = cause {
        unwind::set_pending(cause);
    }
    ManuallyDrop::into_inner(deleter)();
    SwitchPair::TERMINATED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::RawContinuation;
    use crate::splice::{signal_exit, with_escape_continuation};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fibonacci_generator() {
        let mut c = callcc::<i64, i64, _>(|mut caller| {
            let (mut a, mut b) = (0i64, 1i64);
            loop {
                caller.resume(a);
                let n = caller.take();
                if n < 0 {
                    break;
                }
                let next = a + b;
                a = b;
                b = next;
            }
            caller
        })
        .unwrap();

        let mut got = Vec::new();
        for _ in 0..8 {
            c.resume(1);
            got.push(c.take());
        }
        assert_eq!(got, [0, 1, 1, 2, 3, 5, 8, 13]);

        // the sentinel terminates the generator and control returns normally
        c.resume(-1);
        assert!(c.terminated());
        assert!(!c.has_data());
    }

    #[test]
    fn test_body_starts_on_first_resume() {
        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);
        let mut c = callcc::<(), i32, _>(move |mut caller| {
            flag.store(true, Ordering::SeqCst);
            caller.resume(7);
            caller
        })
        .unwrap();

        assert!(!started.load(Ordering::SeqCst));
        c.resume(());
        assert!(started.load(Ordering::SeqCst));
        assert_eq!(c.take(), 7);

        c.resume(());
        assert!(c.terminated());
    }

    #[test]
    fn test_create_context_with_explicit_stack() {
        let mut c = create_context::<i32, i32, _, _>(
            |mut caller| {
                let n = caller.take();
                caller.resume(n + 1);
                caller
            },
            64 * 1024,
            HeapStackAllocator,
        )
        .unwrap();

        c.resume(41);
        assert_eq!(c.take(), 42);
        c.resume(0);
        assert!(c.terminated());
    }

    #[test]
    fn test_allocator_failure_reports() {
        let err = create_context::<(), (), _, _>(|c| c, 16, HeapStackAllocator);
        assert!(err.is_err());
    }

    #[test]
    #[should_panic(expected = "live continuation")]
    fn test_drop_live_continuation_panics() {
        let c = callcc::<(), i32, _>(|mut caller| {
            caller.resume(1);
            caller
        })
        .unwrap();
        drop(c);
    }

    #[test]
    fn test_raw_round_trip() {
        let mut c = callcc::<(), i32, _>(|mut caller| {
            let mut i = 1;
            loop {
                caller.resume(i);
                i += 1;
            }
        })
        .unwrap();

        c.resume(());
        assert_eq!(c.peek(), Some(&1));

        let raw: RawContinuation<i32> = c.into_raw();
        let mut c = unsafe { Continuation::<(), i32>::from_raw(raw) };
        assert_eq!(c.take(), 1);
        c.resume(());
        assert_eq!(c.take(), 2);

        signal_exit(c);
    }

    #[test]
    fn test_signal_exit_returns_normally() {
        let mut c = callcc::<(), i32, _>(|mut caller| loop {
            caller.resume(1);
        })
        .unwrap();

        c.resume(());
        assert_eq!(c.take(), 1);
        signal_exit(c);
    }

    #[test]
    fn test_discard_before_first_resume() {
        let c = callcc::<(), i32, _>(|mut caller| {
            caller.resume(1);
            caller
        })
        .unwrap();
        // never resumed: the body must not run, the stack must still be freed
        signal_exit(c);
    }

    #[test]
    fn test_escaped_panic_rethrown_on_creator_stack() {
        let mut c = callcc::<(), (), _>(|mut caller| {
            caller.resume(());
            with_escape_continuation(|| panic!("boom"), &mut caller);
            caller
        })
        .unwrap();

        c.resume(());
        let err = panic::catch_unwind(AssertUnwindSafe(|| {
            c.resume(());
        }))
        .unwrap_err();
        assert_eq!(err.downcast_ref::<&str>().copied(), Some("boom"));
        assert!(c.terminated());
    }

    #[test]
    fn test_values_move_across_stacks() {
        let mut c = callcc::<String, String, _>(|mut caller| {
            let mut s = caller.take();
            loop {
                s.push('!');
                caller.resume(s);
                if !caller.has_data() {
                    break;
                }
                s = caller.take();
            }
            caller
        })
        .unwrap();

        c.resume("hey".to_string());
        assert_eq!(c.take(), "hey!");
        c.resume("ho".to_string());
        assert_eq!(c.take(), "ho!");
        signal_exit(c);
    }
}
