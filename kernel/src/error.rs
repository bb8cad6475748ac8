//! Kernel-wide error types.
//!
//! Every fallible kernel path returns [`KernelError`] (or a subsystem enum
//! that converts into it). The syscall dispatcher translates these into the
//! fixed ABI codes at the user boundary; nothing below that boundary panics
//! on a caller error.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Memory-related errors
    Mem(MemError),
    /// Scheduler / process-table errors
    Sched(SchedError),
    /// Filesystem errors
    Fs(FsError),
    /// System-call boundary errors
    Syscall(SyscallError),
    /// A subsystem was used before its `init()` ran
    NotInitialized { subsystem: &'static str },
    /// Executable image failed validation
    InvalidExecutable { reason: &'static str },
    /// Hardware reported a failure
    HardwareError { device: &'static str, code: u32 },
}

/// Physical and virtual memory errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// The free-frame stack is empty
    OutOfFrames,
    /// Frame address is null, misaligned, or outside detected RAM
    InvalidFrame { addr: u32 },
    /// Address is not page-aligned
    Unaligned { addr: u32 },
    /// Virtual address has no mapping
    NotMapped { addr: u32 },
    /// Mapping already present at this virtual address
    AlreadyMapped { addr: u32 },
    /// A user-supplied pointer failed validation
    BadUserPointer { addr: u32 },
    /// Heap / region bookkeeping exhausted
    NoSpace,
}

/// Scheduler and process-table errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// No free PCB slot
    TooManyProcesses,
    /// No process with that pid
    NoSuchProcess { pid: u32 },
    /// Priority outside 0..=MAX_PRIORITY
    InvalidPriority { priority: u32 },
    /// Operation requires a current process and none is running
    NoCurrentProcess,
    /// Target process is not a child of the caller
    NotAChild { pid: u32 },
}

/// Filesystem operation results (the non-success cases).
///
/// These carry the on-ABI meaning from the result-code table; the dispatcher
/// maps them 1:1 onto the negative syscall codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    PermissionDenied,
    InvalidParameter,
    NoSpace,
    Exists,
    NotDirectory,
    IsDirectory,
    TooManyFiles,
    IoError,
}

/// System call ABI result codes.
///
/// The discriminants are the wire values returned in the accumulator and
/// must not be renumbered.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall = -1,
    InvalidParameter = -2,
    PermissionDenied = -3,
    NoSpace = -4,
    FileExists = -5,
    NotDirectory = -6,
    IsDirectory = -7,
    FileNotFound = -8,
    IoError = -9,
}

impl SyscallError {
    /// The value placed in the return register.
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<FsError> for SyscallError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotFound => SyscallError::FileNotFound,
            FsError::PermissionDenied => SyscallError::PermissionDenied,
            FsError::InvalidParameter => SyscallError::InvalidParameter,
            FsError::NoSpace => SyscallError::NoSpace,
            FsError::Exists => SyscallError::FileExists,
            FsError::NotDirectory => SyscallError::NotDirectory,
            FsError::IsDirectory => SyscallError::IsDirectory,
            FsError::TooManyFiles => SyscallError::NoSpace,
            FsError::IoError => SyscallError::IoError,
        }
    }
}

impl From<KernelError> for SyscallError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Fs(e) => e.into(),
            KernelError::Mem(MemError::BadUserPointer { .. }) => SyscallError::InvalidParameter,
            KernelError::Mem(MemError::OutOfFrames) | KernelError::Mem(MemError::NoSpace) => {
                SyscallError::NoSpace
            }
            KernelError::Mem(_) => SyscallError::InvalidParameter,
            KernelError::Sched(SchedError::TooManyProcesses) => SyscallError::NoSpace,
            KernelError::Sched(SchedError::NotAChild { .. }) => SyscallError::PermissionDenied,
            KernelError::Sched(_) => SyscallError::InvalidParameter,
            KernelError::Syscall(e) => e,
            KernelError::InvalidExecutable { .. } => SyscallError::InvalidParameter,
            KernelError::NotInitialized { .. } | KernelError::HardwareError { .. } => {
                SyscallError::IoError
            }
        }
    }
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl From<MemError> for KernelError {
    fn from(err: MemError) -> Self {
        Self::Mem(err)
    }
}

impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        Self::Sched(err)
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::Fs(err)
    }
}

impl From<SyscallError> for KernelError {
    fn from(err: SyscallError) -> Self {
        Self::Syscall(err)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mem(e) => write!(f, "memory error: {:?}", e),
            Self::Sched(e) => write!(f, "scheduler error: {:?}", e),
            Self::Fs(e) => write!(f, "filesystem error: {:?}", e),
            Self::Syscall(e) => write!(f, "syscall error: {:?}", e),
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {}", subsystem)
            }
            Self::InvalidExecutable { reason } => write!(f, "invalid executable: {}", reason),
            Self::HardwareError { device, code } => {
                write!(f, "hardware error on {}: code {:#x}", device, code)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_codes_are_fixed() {
        assert_eq!(SyscallError::InvalidSyscall.as_i32(), -1);
        assert_eq!(SyscallError::InvalidParameter.as_i32(), -2);
        assert_eq!(SyscallError::PermissionDenied.as_i32(), -3);
        assert_eq!(SyscallError::NoSpace.as_i32(), -4);
        assert_eq!(SyscallError::FileExists.as_i32(), -5);
        assert_eq!(SyscallError::NotDirectory.as_i32(), -6);
        assert_eq!(SyscallError::IsDirectory.as_i32(), -7);
        assert_eq!(SyscallError::FileNotFound.as_i32(), -8);
        assert_eq!(SyscallError::IoError.as_i32(), -9);
    }

    #[test]
    fn fs_errors_map_onto_abi() {
        assert_eq!(
            SyscallError::from(FsError::NotFound),
            SyscallError::FileNotFound
        );
        assert_eq!(SyscallError::from(FsError::Exists), SyscallError::FileExists);
        assert_eq!(
            SyscallError::from(FsError::TooManyFiles),
            SyscallError::NoSpace
        );
    }
}
