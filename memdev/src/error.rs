//! Error type shared by the block store, access policies, control surface and pipe.
//!
//! Every failure is scoped to the call that produced it. Reads at or past the
//! logical end of a device are not errors; they return `Ok(0)`.

use std::io;

/// Classic errno values, for callers that speak the C convention
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const EINTR: i32 = 4;
    pub const EBADF: i32 = 9;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EBUSY: i32 = 16;
    pub const EINVAL: i32 = 22;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DevError {
    /// Non-blocking call cannot proceed now
    #[error("operation would block")]
    WouldBlock,

    /// Blocking call aborted by the caller's interrupt token
    #[error("interrupted while waiting")]
    Interrupted,

    /// Access policy refused to attach the caller
    #[error("device is busy")]
    Busy,

    /// Privileged control verb attempted without privilege
    #[error("permission denied")]
    PermissionDenied,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocation of a segment, block or ring buffer failed
    #[error("out of memory")]
    OutOfMemory,

    /// The handle was not opened in a mode that allows the operation
    #[error("bad descriptor: {0}")]
    BadDescriptor(&'static str),
}

pub type Result<T> = std::result::Result<T, DevError>;

impl DevError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// errno value the error corresponds to
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::WouldBlock => errno::EAGAIN,
            Self::Interrupted => errno::EINTR,
            Self::Busy => errno::EBUSY,
            Self::PermissionDenied => errno::EPERM,
            Self::InvalidArgument(_) => errno::EINVAL,
            Self::OutOfMemory => errno::ENOMEM,
            Self::BadDescriptor(_) => errno::EBADF,
        }
    }

    /// True for errors a caller may retry later without changing anything
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::Interrupted | Self::Busy)
    }
}

impl From<std::collections::TryReserveError> for DevError {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

impl From<DevError> for io::Error {
    fn from(e: DevError) -> Self {
        let kind = match e {
            DevError::WouldBlock => io::ErrorKind::WouldBlock,
            DevError::Interrupted => io::ErrorKind::Interrupted,
            DevError::PermissionDenied => io::ErrorKind::PermissionDenied,
            DevError::InvalidArgument(_) | DevError::BadDescriptor(_) => {
                io::ErrorKind::InvalidInput
            }
            DevError::OutOfMemory => io::ErrorKind::OutOfMemory,
            DevError::Busy => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

#[allow(clippy::match_same_arms)]
impl embedded_io::Error for DevError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Self::Interrupted => embedded_io::ErrorKind::Interrupted,
            Self::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            Self::InvalidArgument(_) | Self::BadDescriptor(_) => {
                embedded_io::ErrorKind::InvalidInput
            }
            Self::OutOfMemory => embedded_io::ErrorKind::OutOfMemory,
            // EAGAIN, EBUSY: embedded_io has no dedicated kind
            Self::WouldBlock | Self::Busy => embedded_io::ErrorKind::Other,
        }
    }
}
