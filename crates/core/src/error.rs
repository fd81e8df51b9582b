//! Operation error types shared across the daemon.

use thiserror::Error;

/// Wire-stable error kinds.
///
/// The integer tags are part of the protocol between daemon and clients and
/// must not be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Unknown,
    Internal,
    NotCheckedOut,
    AlreadyCheckedOut,
    CheckoutMismatch,
    UnknownFile,
    InvalidRequest,
}

impl ErrorKind {
    /// Get the wire tag for this kind.
    pub fn code(&self) -> i32 {
        match self {
            Self::Unknown => -1,
            Self::Internal => 1,
            Self::NotCheckedOut => 2,
            Self::AlreadyCheckedOut => 3,
            Self::CheckoutMismatch => 4,
            Self::UnknownFile => 5,
            Self::InvalidRequest => 6,
        }
    }
}

/// Error type for repository operations.
///
/// I/O, parsing and database failures collapse into `Internal` with the
/// underlying message preserved; state-machine violations keep their
/// specific kind so the RPC surface can map them to client errors.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    NotCheckedOut(String),

    #[error("{0}")]
    AlreadyCheckedOut(String),

    #[error("{0}")]
    CheckoutMismatch(String),

    #[error("{0}")]
    UnknownFile(String),

    #[error("{0}")]
    InvalidRequest(String),
}

impl OperationError {
    /// Get the wire-stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Internal(_) => ErrorKind::Internal,
            Self::NotCheckedOut(_) => ErrorKind::NotCheckedOut,
            Self::AlreadyCheckedOut(_) => ErrorKind::AlreadyCheckedOut,
            Self::CheckoutMismatch(_) => ErrorKind::CheckoutMismatch,
            Self::UnknownFile(_) => ErrorKind::UnknownFile,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Build an internal error from anything displayable.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<std::io::Error> for OperationError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Result type alias for repository operations.
pub type Result<T> = std::result::Result<T, OperationError>;
