//! Stable error codes for the kernel's fallible operations.
//!
//! Each primitive gets its own numeric range so a logged code alone tells
//! you which subsystem raised it, the same diagnostic property the
//! `TOS_ERR_*` constants this taxonomy descends from were designed for.

/// Kernel error, one variant per observable failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Error {
    /// A required handle or pointer argument was null/absent.
    NullPtr = 0x1000,
    /// No free slot to satisfy a create/init request.
    NoFree = 0x1001,
    /// The handle does not refer to a live object (never initialized,
    /// already destroyed, or generation mismatch).
    Invalid = 0x1002,
    /// The requested task id is out of range or refers to a dead slot.
    NoSuchTask = 0x1003,

    /// A `trylock`/`wait_for` timed out before the condition was met.
    Timeout = 0x2000,
    /// `unlock` was called on a mutex that is not locked.
    Unlocked = 0x2001,
    /// `unlock` was called by a task that does not own the mutex.
    Perm = 0x2002,
    /// `destroy` was called while the object still has an owner or
    /// in-flight waiters.
    Blocking = 0x2003,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Error::NullPtr => "null handle",
            Error::NoFree => "no free slot",
            Error::Invalid => "invalid or stale handle",
            Error::NoSuchTask => "no such task",
            Error::Timeout => "operation timed out",
            Error::Unlocked => "mutex not locked",
            Error::Perm => "caller does not own the mutex",
            Error::Blocking => "object has an owner or waiters",
        };
        write!(f, "{msg} ({:#06x})", *self as u16)
    }
}

/// Convenience alias used throughout the kernel's public API.
pub type Result<T> = core::result::Result<T, Error>;
