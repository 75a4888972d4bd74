//! Architecture-specific symmetric stack switching
//!
//! The switch protocol is one-shot and symmetric: a suspended stack is
//! represented by a stack pointer into a frame holding the resume address
//! and the callee-saved registers. Switching pushes such a frame on the
//! current stack, installs the target's stack pointer and jumps through the
//! target's resume address; both sides observe the transfer as a
//! [`SwitchPair`] return value.

use std::ptr;

/// Opaque pointer to a suspended stack. Null means terminated.
pub type StackPointer = *mut ();

/// The pair emitted by every stack switch: the other side's suspended stack
/// pointer and the datum it transferred. A null `sp` means the other side
/// terminated.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SwitchPair {
    pub sp: StackPointer,
    pub parm: *mut (),
}

impl SwitchPair {
    pub const TERMINATED: SwitchPair = SwitchPair {
        sp: ptr::null_mut(),
        parm: ptr::null_mut(),
    };

    pub fn terminated(&self) -> bool {
        self.sp.is_null()
    }
}

/// Trampoline run on the target stack by [`execute_into`]. Its returned
/// pair is delivered to the target's suspension point.
pub type RawTrampoline = unsafe extern "C" fn(arg: *mut (), from: StackPointer) -> SwitchPair;

/// Entry invoked by the startup thunk on the first transfer into a fresh
/// context. Never returns; teardown leaves through `execute_into`.
pub type RawEntry = unsafe extern "C" fn(arg: *mut (), from: StackPointer, parm: *mut ()) -> !;

/// Stack alignment required by both supported ABIs.
pub const STACK_ALIGN: usize = 16;

/// Initial stack pointer for a stack of `size` bytes at `base`.
///
/// # Safety
///
/// `base..base+size` must be a valid allocation.
pub unsafe fn stack_bottom(base: *mut u8, size: usize) -> StackPointer {
    ((base as usize + size) & !(STACK_ALIGN - 1)) as StackPointer
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use x86_64::{execute_into, init_context, stack_switch};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use aarch64::{execute_into, init_context, stack_switch};
    } else {
        compile_error!("Unsupported architecture");
    }
}
