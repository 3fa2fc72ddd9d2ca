//! Error types for the TomeDb storage engine.

use std::fmt;
use std::io;

/// The result type used throughout TomeDb.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for TomeDb operations.
#[derive(Debug)]
pub enum Error {
    /// A fatal I/O error occurred. Never retried.
    Io(io::Error),

    /// A transient sharing or lock violation on the backing file.
    ///
    /// Raised only by the retry classifier; callers see it after the
    /// bounded retry budget of [`retry::run`](crate::retry::run) is
    /// exhausted, converted into [`Error::Io`].
    LockContention(io::Error),

    /// An invalid argument was provided.
    InvalidArgument(String),

    /// A corrupt or length-mismatched binary payload was decoded.
    InvalidFormat(String),

    /// A key already exists in an index that enforces uniqueness.
    DuplicateKey(String),
}

impl Error {
    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid format error.
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Error::InvalidFormat(msg.into())
    }

    /// Creates a new duplicate key error.
    pub fn duplicate_key(key: impl fmt::Display) -> Self {
        Error::DuplicateKey(key.to_string())
    }

    /// Returns `true` if this error is a transient lock contention.
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Error::LockContention(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::LockContention(e) => write!(f, "Lock contention: {}", e),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            Error::DuplicateKey(key) => write!(f, "Duplicate key: {}", key),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::LockContention(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidFormat(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_format("bad element tag 0x7f");
        assert_eq!(err.to_string(), "Invalid format: bad element tag 0x7f");

        let err = Error::duplicate_key(42);
        assert_eq!(err.to_string(), "Duplicate key: 42");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_lock_contention());
    }

    #[test]
    fn test_lock_contention_predicate() {
        let io_err = io::Error::new(io::ErrorKind::WouldBlock, "resource busy");
        let err = Error::LockContention(io_err);
        assert!(err.is_lock_contention());
    }
}
