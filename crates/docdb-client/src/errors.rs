//! Error taxonomy shared by every client component.

use std::time::Duration;

use thiserror::Error;

/// Sub-status the service attaches to a 404 when the submitted session token
/// cannot be satisfied by the partition that received the request.
pub const SUB_STATUS_READ_SESSION_NOT_AVAILABLE: u32 = 1002;

/// Top-level error type for the docdb-client crate.
#[derive(Debug, Error)]
pub enum DocDbError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("request throttled: {message}")]
    Throttled {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("session token not available on the target partition: {0}")]
    StaleSession(String),
    #[error("transient transport failure: {0}")]
    TransientTransport(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<DocDbError>,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("server returned status {status}: {message}")]
    Server { status: u16, message: String },
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("session persistence failed: {0}")]
    Persistence(String),
}

pub type DocDbResult<T> = Result<T, DocDbError>;

/// Fieldless discriminant of [`DocDbError`], used by retry bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    Configuration,
    Throttled,
    StaleSession,
    TransientTransport,
    PreconditionFailed,
    Conflict,
    NotFound,
    Forbidden,
    BadRequest,
    RetriesExhausted,
    Cancelled,
    Server,
    Serialization,
    Persistence,
}

impl DocDbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Throttled { .. } => ErrorKind::Throttled,
            Self::StaleSession(_) => ErrorKind::StaleSession,
            Self::TransientTransport(_) => ErrorKind::TransientTransport,
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Server { .. } => ErrorKind::Server,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Returns true for the kinds the retry policy may re-attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::StaleSession(_) | Self::TransientTransport(_)
        )
    }

    /// Server-suggested backoff carried by a throttling error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Number of attempts recorded on an exhausted error, 1 for everything else.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::RetriesExhausted { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    /// Maps a non-success wire status to the matching error.
    pub fn from_status(
        status: u16,
        sub_status: Option<u32>,
        retry_after: Option<Duration>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        match status {
            400 => Self::BadRequest(message),
            403 => Self::Forbidden(message),
            404 if sub_status == Some(SUB_STATUS_READ_SESSION_NOT_AVAILABLE) => {
                Self::StaleSession(message)
            }
            404 => Self::NotFound(message),
            408 | 410 | 449 | 500 | 503 => {
                Self::TransientTransport(format!("status {status}: {message}"))
            }
            409 => Self::Conflict(message),
            412 => Self::PreconditionFailed(message),
            429 => Self::Throttled {
                message,
                retry_after,
            },
            _ => Self::Server { status, message },
        }
    }
}

impl From<serde_json::Error> for DocDbError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
