//! Error types for the allocator and mapper.
//!
//! Every public failure collapses to one of five [`ErrorKind`]s. The variant
//! payload carries the context that was also logged at the failure site.

use thiserror::Error;

/// Result type alias using the crate's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for allocator and mapper operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unparseable buffer descriptor.
    #[error("bad descriptor: {0}")]
    BadDescriptor(String),

    /// Invalid, corrupted or unregistered buffer handle.
    #[error("bad buffer: {0}")]
    BadBuffer(String),

    /// Semantically invalid value (oversized reserved region, layout mismatch, ...).
    #[error("bad value: {0}")]
    BadValue(String),

    /// Heap, fd or memory exhaustion, or a conflicting registration.
    #[error("no resources: {0}")]
    NoResources(String),

    /// Unknown metadata type or a descriptor that cannot be satisfied.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

/// Outward error classification.
///
/// Discriminants match the numeric codes used on the allocator/mapper wire.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid buffer descriptor.
    BadDescriptor = 1,
    /// Invalid buffer handle.
    BadBuffer = 2,
    /// Invalid field value.
    BadValue = 3,
    /// Resource unavailable.
    NoResources = 5,
    /// Permanent failure.
    Unsupported = 7,
}

impl Error {
    /// The single outward classification of this error.
    ///
    /// Kernel and I/O failures count as resource failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadDescriptor(_) => ErrorKind::BadDescriptor,
            Error::BadBuffer(_) => ErrorKind::BadBuffer,
            Error::BadValue(_) => ErrorKind::BadValue,
            Error::NoResources(_) | Error::Io(_) | Error::System(_) => ErrorKind::NoResources,
            Error::Unsupported(_) => ErrorKind::Unsupported,
        }
    }
}

impl ErrorKind {
    /// Numeric wire code.
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        assert_eq!(ErrorKind::BadDescriptor.code(), 1);
        assert_eq!(ErrorKind::BadBuffer.code(), 2);
        assert_eq!(ErrorKind::BadValue.code(), 3);
        assert_eq!(ErrorKind::NoResources.code(), 5);
        assert_eq!(ErrorKind::Unsupported.code(), 7);
    }

    #[test]
    fn test_system_errors_are_resource_failures() {
        let err = Error::from(rustix::io::Errno::NOMEM);
        assert_eq!(err.kind(), ErrorKind::NoResources);

        let err = Error::from(std::io::Error::other("boom"));
        assert_eq!(err.kind(), ErrorKind::NoResources);
    }
}
