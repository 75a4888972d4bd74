//! Stack allocation for contexts
//!
//! The default allocator hands out 16-byte aligned heap blocks. The mmap
//! allocator trades an extra syscall for a `PROT_NONE` guard page at the
//! low end of the stack, turning overflow into a fault instead of silent
//! corruption.

use std::ptr::{self, NonNull};
use strand_core::error::{StackError, StrandResult};

use crate::arch::STACK_ALIGN;

/// Default stack size for `callcc` (1 MiB)
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Smallest stack any allocator will produce
pub const MIN_STACK_SIZE: usize = 4096;

/// Provider of context stacks
///
/// `deallocate` runs on a foreign stack during teardown and must not
/// unwind.
pub trait StackAllocator {
    /// Allocate a stack of `size` bytes, aligned to [`STACK_ALIGN`].
    fn allocate(&self, size: usize) -> StrandResult<NonNull<u8>>;

    /// Release a stack produced by `allocate`.
    ///
    /// # Safety
    ///
    /// `base` must come from `allocate` on this allocator with the same
    /// `size`, and the stack must no longer be in use.
    unsafe fn deallocate(&self, base: NonNull<u8>, size: usize);
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Default allocator: aligned heap blocks via `posix_memalign`
        #[derive(Debug, Clone, Copy, Default)]
        pub struct HeapStackAllocator;

        impl StackAllocator for HeapStackAllocator {
            fn allocate(&self, size: usize) -> StrandResult<NonNull<u8>> {
                if size < MIN_STACK_SIZE {
                    return Err(StackError::SizeTooSmall.into());
                }
                let mut base: *mut libc::c_void = ptr::null_mut();
                let rc = unsafe { libc::posix_memalign(&mut base, STACK_ALIGN, size) };
                if rc != 0 {
                    return Err(StackError::AllocationFailed.into());
                }
                NonNull::new(base as *mut u8).ok_or_else(|| StackError::AllocationFailed.into())
            }

            unsafe fn deallocate(&self, base: NonNull<u8>, _size: usize) {
                libc::free(base.as_ptr() as *mut libc::c_void);
            }
        }

        /// Guard-page allocator: `mmap` with the first page `PROT_NONE`
        ///
        /// The guard page counts against the requested size; stacks grow
        /// down from the top of the mapping towards it.
        #[derive(Debug, Clone, Copy, Default)]
        pub struct MmapStackAllocator;

        fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
        }

        impl StackAllocator for MmapStackAllocator {
            fn allocate(&self, size: usize) -> StrandResult<NonNull<u8>> {
                let page = page_size();
                if size < MIN_STACK_SIZE.max(2 * page) {
                    return Err(StackError::SizeTooSmall.into());
                }
                let total = (size + page - 1) & !(page - 1);

                let base = unsafe {
                    libc::mmap(
                        ptr::null_mut(),
                        total,
                        libc::PROT_READ | libc::PROT_WRITE,
                        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                        -1,
                        0,
                    )
                };
                if base == libc::MAP_FAILED {
                    return Err(StackError::AllocationFailed.into());
                }

                // Guard page at the low end; overflow faults instead of
                // scribbling over neighbouring memory
                let rc = unsafe { libc::mprotect(base, page, libc::PROT_NONE) };
                if rc != 0 {
                    unsafe { libc::munmap(base, total) };
                    return Err(StackError::ProtectionFailed.into());
                }

                NonNull::new(base as *mut u8).ok_or_else(|| StackError::AllocationFailed.into())
            }

            unsafe fn deallocate(&self, base: NonNull<u8>, size: usize) {
                let page = page_size();
                let total = (size + page - 1) & !(page - 1);
                libc::munmap(base.as_ptr() as *mut libc::c_void, total);
            }
        }
    } else {
        compile_error!("Unsupported platform");
    }
}
