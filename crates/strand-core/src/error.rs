//! Error types for the strand library

use core::fmt;

/// Result type for strand operations
pub type StrandResult<T> = Result<T, StrandError>;

/// Errors that can occur in strand operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrandError {
    /// Stack allocation or protection failed
    Stack(StackError),

    /// Future/promise protocol error
    Future(FutureError),
}

impl fmt::Display for StrandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrandError::Stack(e) => write!(f, "stack error: {}", e),
            StrandError::Future(e) => write!(f, "future error: {}", e),
        }
    }
}

impl std::error::Error for StrandError {}

/// Stack allocation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    /// The allocator could not produce a stack
    AllocationFailed,

    /// mprotect on the guard page failed
    ProtectionFailed,

    /// Requested stack smaller than the minimum
    SizeTooSmall,
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::AllocationFailed => write!(f, "stack allocation failed"),
            StackError::ProtectionFailed => write!(f, "guard page protection failed"),
            StackError::SizeTooSmall => write!(f, "requested stack size below minimum"),
        }
    }
}

impl From<StackError> for StrandError {
    fn from(e: StackError) -> Self {
        StrandError::Stack(e)
    }
}

/// Future/promise protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureError {
    /// The promise was dropped without a value
    Broken,
}

impl fmt::Display for FutureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FutureError::Broken => write!(f, "promise dropped without a value"),
        }
    }
}

impl From<FutureError> for StrandError {
    fn from(e: FutureError) -> Self {
        StrandError::Future(e)
    }
}
