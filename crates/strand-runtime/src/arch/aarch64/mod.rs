//! aarch64 stack switching implementation
//!
//! Suspend frame layout (176 bytes, 16-byte aligned):
//!
//! ```text
//! 0x00: resume address
//! 0x08: (pad)
//! 0x10: x19 x20
//! 0x20: x21 x22
//! 0x30: x23 x24
//! 0x40: x25 x26
//! 0x50: x27 x28
//! 0x60: x29 x30
//! 0x70: d8  d9
//! 0x80: d10 d11
//! 0x90: d12 d13
//! 0xa0: d14 d15
//! ```
//!
//! Arrival convention at a resume address: `x0` = the other side's
//! suspended stack pointer, `x1` = the transferred datum. These are the
//! same registers a returned `SwitchPair` occupies under AAPCS64.

use super::{RawEntry, StackPointer, SwitchPair};
use std::arch::naked_asm;

/// Suspend/startup frame size in bytes.
const FRAME_SIZE: usize = 176;

/// Forge the initial frame of a fresh context
///
/// # Safety
///
/// `bottom` must come from `stack_bottom` on a live allocation with at
/// least `FRAME_SIZE` bytes below it.
pub unsafe fn init_context(
    bottom: StackPointer,
    entry_fn: RawEntry,
    entry_arg: *mut (),
) -> StackPointer {
    let sp = (bottom as *mut u8).sub(FRAME_SIZE) as *mut usize;
    std::ptr::write_bytes(sp as *mut u8, 0, FRAME_SIZE);
    sp.add(0).write(startup_thunk as usize);
    sp.add(2).write(entry_fn as usize); // 0x10
    sp.add(3).write(entry_arg as usize); // 0x18
    sp as StackPointer
}

/// Transfer control to `target`, handing it `parm`
///
/// # Safety
///
/// `target` must be a stack pointer produced by this module's suspend
/// protocol (a suspended switch or `init_context`), not used since.
#[unsafe(naked)]
pub unsafe extern "C" fn stack_switch(_target: StackPointer, _parm: *mut ()) -> SwitchPair {
    naked_asm!(
        // Suspend: resume address + callee-saved registers
        "sub sp, sp, #176",
        "adr x9, 2f",
        "str x9, [sp]",
        "stp x19, x20, [sp, #0x10]",
        "stp x21, x22, [sp, #0x20]",
        "stp x23, x24, [sp, #0x30]",
        "stp x25, x26, [sp, #0x40]",
        "stp x27, x28, [sp, #0x50]",
        "stp x29, x30, [sp, #0x60]",
        "stp d8,  d9,  [sp, #0x70]",
        "stp d10, d11, [sp, #0x80]",
        "stp d12, d13, [sp, #0x90]",
        "stp d14, d15, [sp, #0xa0]",
        // Switch
        "mov x9, sp",
        "mov sp, x0",
        "mov x0, x9",
        "ldr x9, [sp]",
        "br x9",
        // Resume point: x0 = source sp, x1 = datum
        "2:",
        "ldp x19, x20, [sp, #0x10]",
        "ldp x21, x22, [sp, #0x20]",
        "ldp x23, x24, [sp, #0x30]",
        "ldp x25, x26, [sp, #0x40]",
        "ldp x27, x28, [sp, #0x50]",
        "ldp x29, x30, [sp, #0x60]",
        "ldp d8,  d9,  [sp, #0x70]",
        "ldp d10, d11, [sp, #0x80]",
        "ldp d12, d13, [sp, #0x90]",
        "ldp d14, d15, [sp, #0xa0]",
        "add sp, sp, #176",
        "ret",
    );
}

/// Transfer control to `target` and run `trampoline(arg, source_sp)` on its
/// stack; the trampoline's returned pair is delivered to the target's
/// suspension point (or the startup thunk on a fresh stack).
///
/// # Safety
///
/// As `stack_switch`; `trampoline` must not unwind.
#[unsafe(naked)]
pub unsafe extern "C" fn execute_into(
    _arg: *mut (),
    _target: StackPointer,
    _trampoline: super::RawTrampoline,
) -> SwitchPair {
    naked_asm!(
        "sub sp, sp, #176",
        "adr x9, 2f",
        "str x9, [sp]",
        "stp x19, x20, [sp, #0x10]",
        "stp x21, x22, [sp, #0x20]",
        "stp x23, x24, [sp, #0x30]",
        "stp x25, x26, [sp, #0x40]",
        "stp x27, x28, [sp, #0x50]",
        "stp x29, x30, [sp, #0x60]",
        "stp d8,  d9,  [sp, #0x70]",
        "stp d10, d11, [sp, #0x80]",
        "stp d12, d13, [sp, #0x90]",
        "stp d14, d15, [sp, #0xa0]",
        "mov x9, sp",
        "mov sp, x1",
        // trampoline(arg = x0, from = x1)
        "mov x1, x9",
        "blr x2",
        // Deliver the returned pair to the frame below
        "ldr x9, [sp]",
        "br x9",
        "2:",
        "ldp x19, x20, [sp, #0x10]",
        "ldp x21, x22, [sp, #0x20]",
        "ldp x23, x24, [sp, #0x30]",
        "ldp x25, x26, [sp, #0x40]",
        "ldp x27, x28, [sp, #0x50]",
        "ldp x29, x30, [sp, #0x60]",
        "ldp d8,  d9,  [sp, #0x70]",
        "ldp d10, d11, [sp, #0x80]",
        "ldp d12, d13, [sp, #0x90]",
        "ldp d14, d15, [sp, #0xa0]",
        "add sp, sp, #176",
        "ret",
    );
}

/// Landing pad of a fresh context. Arrives with x0 = caller sp, x1 = first
/// datum and sp naming the forged frame.
#[unsafe(naked)]
unsafe extern "C" fn startup_thunk() {
    naked_asm!(
        "ldr x9, [sp, #0x10]", // entry_fn
        "ldr x3, [sp, #0x18]", // entry_arg
        "add sp, sp, #176",
        "mov x2, x1", // datum
        "mov x1, x0", // caller sp
        "mov x0, x3",
        "blr x9",
        "brk #0x1",
    );
}
