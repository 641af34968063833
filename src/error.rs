// Kernel error taxonomy
use core::fmt;

/// Errors returned by process, thread and memory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Malformed system call arguments, out-of-range values or an unknown pid
    InvalidArgument,
    /// Every thread slot of the process is in use
    OutOfThreadSlots,
    /// Kernel stack, frame or table slot allocation failed
    OutOfMemory,
    /// Heap growth would exceed the process memory limit
    MemoryLimitExceeded,
    /// No thread with the given tid in the calling process
    NoSuchThread,
    /// The caller has no children to wait for
    NoChildren,
    /// The caller was killed while it waited
    Killed,
    /// Program path does not resolve
    NotFound,
    /// Operation not permitted in the caller's current state
    StateViolation,
}

/// Result type used throughout the kernel
pub type KResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelError::InvalidArgument => write!(f, "Invalid argument"),
            KernelError::OutOfThreadSlots => write!(f, "Out of thread slots"),
            KernelError::OutOfMemory => write!(f, "Out of memory"),
            KernelError::MemoryLimitExceeded => write!(f, "Memory limit exceeded"),
            KernelError::NoSuchThread => write!(f, "No such thread"),
            KernelError::NoChildren => write!(f, "No children"),
            KernelError::Killed => write!(f, "Killed"),
            KernelError::NotFound => write!(f, "Not found"),
            KernelError::StateViolation => write!(f, "Permission or state violation"),
        }
    }
}
