//! Error types for recoverable kernel failures
//!
//! Fatal invariant breaks (heap corruption, frame exhaustion, canary
//! mismatch) go through `panic!` and halt the machine; everything a caller
//! can reasonably handle is expressed here.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Every process slot is occupied by a live process.
    ProcessTableFull,
    /// No live process carries the given pid.
    ProcessNotFound { pid: u32 },
    /// A subsystem was used before its `init` ran.
    NotInitialized { subsystem: &'static str },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::ProcessTableFull => write!(f, "process table full"),
            KernelError::ProcessNotFound { pid } => write!(f, "no such process: pid {}", pid),
            KernelError::NotInitialized { subsystem } => {
                write!(f, "{} used before initialization", subsystem)
            }
        }
    }
}

/// Result type alias using KernelError
pub type KernelResult<T> = Result<T, KernelError>;
