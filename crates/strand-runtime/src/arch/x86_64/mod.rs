//! x86_64 stack switching implementation
//!
//! Uses naked inline assembly, stable since Rust 1.88.
//!
//! Suspend frame layout (the stack pointer names the first slot):
//!
//! ```text
//! 0x00: resume rip
//! 0x08: r15
//! 0x10: r14
//! 0x18: r13
//! 0x20: r12
//! 0x28: rbx
//! 0x30: rbp
//! ```
//!
//! A function entered by `call` sees `rsp % 16 == 8` (System V AMD64), so
//! after the seven pushes a suspended stack pointer is 16-byte aligned,
//! which is exactly what `execute_into` needs to `call` a trampoline there.
//!
//! Arrival convention at a resume address: `rax` = the other side's
//! suspended stack pointer, `rdx` = the transferred datum. Since a
//! `SwitchPair` comes back in `rax:rdx`, landing at a resume label and
//! returning the pair is the same register state.

use super::{RawEntry, StackPointer, SwitchPair};
use std::arch::naked_asm;

/// Words in the forged startup frame: thunk, entry_fn, entry_arg, padding
/// up to 64 bytes so a fresh stack pointer keeps the suspended alignment.
const STARTUP_FRAME_WORDS: usize = 8;

/// Forge the initial frame of a fresh context
///
/// Plants the startup thunk as the resume address and the entry function
/// and its argument in the first two register slots; the thunk moves them
/// into place and calls the entry.
///
/// # Safety
///
/// `bottom` must come from `stack_bottom` on a live allocation with at
/// least `STARTUP_FRAME_WORDS * 8` bytes below it.
pub unsafe fn init_context(
    bottom: StackPointer,
    entry_fn: RawEntry,
    entry_arg: *mut (),
) -> StackPointer {
    let sp = (bottom as *mut usize).sub(STARTUP_FRAME_WORDS);
    sp.add(0).write(startup_thunk as usize);
    sp.add(1).write(entry_fn as usize);
    sp.add(2).write(entry_arg as usize);
    for i in 3..STARTUP_FRAME_WORDS {
        sp.add(i).write(0);
    }
    sp as StackPointer
}

/// Transfer control to `target`, handing it `parm`
///
/// Returns when something transfers back here; the returned pair is the
/// other side's suspended stack pointer and datum.
///
/// # Safety
///
/// `target` must be a stack pointer produced by this module's suspend
/// protocol (a suspended switch or `init_context`), not used since.
#[unsafe(naked)]
pub unsafe extern "C" fn stack_switch(_target: StackPointer, _parm: *mut ()) -> SwitchPair {
    naked_asm!(
        // Suspend: callee-saved registers + resume address
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "lea rax, [rip + 2f]",
        "push rax",
        // Switch
        "mov rax, rsp",
        "mov rsp, rdi",
        "mov rdx, rsi",
        "pop rcx",
        "jmp rcx",
        // Resume point: rax = source sp, rdx = datum
        "2:",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
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
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "lea rax, [rip + 2f]",
        "push rax",
        "mov rax, rsp",
        "mov rsp, rsi",
        // trampoline(arg = rdi, from = rsi)
        "mov rsi, rax",
        "call rdx",
        // Deliver the returned pair to the frame below
        "pop rcx",
        "jmp rcx",
        "2:",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}

/// Landing pad of a fresh context. Arrives with rax = caller sp, rdx =
/// first datum and rsp naming the forged frame; unpacks entry_fn/entry_arg
/// and calls the entry with a clean, aligned stack.
#[unsafe(naked)]
unsafe extern "C" fn startup_thunk() {
    naked_asm!(
        "pop rcx",     // entry_fn
        "pop rdi",     // entry_arg
        "add rsp, 40", // drop the padding; rsp is now the stack bottom
        "mov rsi, rax",
        "call rcx",
        "ud2",
    );
}
