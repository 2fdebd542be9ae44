use std::io;
use std::num::{ParseFloatError, ParseIntError};
use std::string::FromUtf8Error;

use thiserror::Error;

/// Broad classification of a failure, independent of where it was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection lost, retryable.
    Unavailable,
    /// Authentication or authorization failure.
    PermissionDenied,
    /// Malformed query or malformed wire bytes.
    InvalidInput,
    /// Missing document, table or GTID file.
    NotFound,
    /// Concurrent modification detected during a re-check.
    Conflict,
    /// Queue full under shutdown, DocId space exhausted.
    Exhausted,
    /// CRC mismatch, magic mismatch, truncated dump.
    Corrupt,
    /// Newer dump version, unknown column type.
    Unsupported,
    /// Bugs, assert-style violations.
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Exhausted(String),

    #[error("{0}")]
    Corrupt(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Utf8(#[from] FromUtf8Error),

    #[error("{0}")]
    ParseInt(#[from] ParseIntError),

    #[error("{0}")]
    ParseFloat(#[from] ParseFloatError),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Unavailable(_) => ErrorKind::Unavailable,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::InvalidInput(_) | Error::ParseInt(_) | Error::ParseFloat(_) | Error::Utf8(_) => {
                ErrorKind::InvalidInput
            }
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Exhausted(_) => ErrorKind::Exhausted,
            Error::Corrupt(_) => ErrorKind::Corrupt,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Internal(_) | Error::Config(_) => ErrorKind::Internal,
            Error::Io(err) => match err.kind() {
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::TimedOut
                | io::ErrorKind::WouldBlock => ErrorKind::Unavailable,
                io::ErrorKind::UnexpectedEof => ErrorKind::Corrupt,
                _ => ErrorKind::Internal,
            },
        }
    }

    /// Transient failures are retried by the replication fetch loop, everything
    /// else surfaces to the caller.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }
}
