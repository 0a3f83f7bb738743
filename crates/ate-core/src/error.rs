//! Error types for instrument communication.
//!
//! The taxonomy is layered the same way the call stack is:
//!
//! - **[`TransportError`]**: one exchange with one endpoint failed. Carries a
//!   [`TransportErrorKind`] (`Timeout`, `Disconnected`, `Protocol`), a human-readable
//!   detail and, for disconnects, whether the backend believes the link can be
//!   re-established.
//! - **[`CommError`]**: what the retry layer hands back. Either the transport error
//!   that was classified as permanent, or [`CommError::RetryExhausted`] once the
//!   transient-failure budget is spent.
//!
//! Transports never retry. Classification of transient versus permanent failures
//! lives in [`crate::retry`], keyed only on the error kind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Category of a failed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// The endpoint did not answer within the per-attempt timeout.
    Timeout,
    /// The link to the endpoint is gone.
    Disconnected,
    /// The endpoint answered with something that is not a valid reply, or
    /// rejected the command.
    Protocol,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransportErrorKind::Timeout => "TIMEOUT",
            TransportErrorKind::Disconnected => "DISCONNECTED",
            TransportErrorKind::Protocol => "PROTOCOL_ERROR",
        };
        write!(f, "{}", label)
    }
}

/// A single failed exchange with an endpoint.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct TransportError {
    /// What went wrong.
    pub kind: TransportErrorKind,
    /// Backend-specific description.
    pub detail: String,
    /// Only meaningful for `Disconnected`: whether the backend can re-establish
    /// the link on the next exchange.
    pub recoverable: bool,
}

impl TransportError {
    /// The endpoint did not answer in time. Always worth another attempt.
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            detail: detail.into(),
            recoverable: true,
        }
    }

    /// The link dropped but the backend can reconnect (bus glitch, reset socket).
    pub fn disconnected(detail: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Disconnected,
            detail: detail.into(),
            recoverable: true,
        }
    }

    /// The link is gone for good (device unplugged, connection refused).
    pub fn disconnected_permanently(detail: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Disconnected,
            detail: detail.into(),
            recoverable: false,
        }
    }

    /// Malformed reply or rejected command.
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Protocol,
            detail: detail.into(),
            recoverable: false,
        }
    }

    /// Build an error of the given kind. `recoverable` is ignored for kinds where it
    /// has a fixed meaning (timeouts are always recoverable, protocol errors never).
    pub fn new(kind: TransportErrorKind, detail: impl Into<String>, recoverable: bool) -> Self {
        match kind {
            TransportErrorKind::Timeout => Self::timeout(detail),
            TransportErrorKind::Protocol => Self::protocol(detail),
            TransportErrorKind::Disconnected if recoverable => Self::disconnected(detail),
            TransportErrorKind::Disconnected => Self::disconnected_permanently(detail),
        }
    }

    /// Map an I/O error from a wire transport onto the transport taxonomy.
    ///
    /// Link resets are recoverable disconnects; refusals and missing devices are
    /// not; undecodable data is a protocol error.
    pub fn from_io(err: &std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;
        let detail = format!("{}: {}", context, err);
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::timeout(detail),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected
            | ErrorKind::Interrupted => Self::disconnected(detail),
            ErrorKind::InvalidData => Self::protocol(detail),
            _ => Self::disconnected_permanently(detail),
        }
    }
}

// =============================================================================
// Retry-layer Errors
// =============================================================================

/// Error returned by the retry engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommError {
    /// A permanent failure, propagated on the attempt it happened.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Transient failures persisted for the whole attempt budget.
    #[error("retry budget exhausted after {attempts} attempts, last error: {last_error}")]
    RetryExhausted {
        /// Attempts actually made (equals the policy's `max_attempts`).
        attempts: u32,
        /// The error from the final attempt.
        last_error: TransportError,
    },
}

impl CommError {
    /// The underlying transport error, whichever variant this is.
    pub fn transport_error(&self) -> &TransportError {
        match self {
            CommError::Transport(e) => e,
            CommError::RetryExhausted { last_error, .. } => last_error,
        }
    }

    /// Kind of the underlying transport error.
    pub fn kind(&self) -> TransportErrorKind {
        self.transport_error().kind
    }
}

/// Convenience alias for transport exchanges.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::timeout("no reply after 500ms");
        assert_eq!(err.to_string(), "TIMEOUT: no reply after 500ms");

        let err = TransportError::protocol("bad header");
        assert_eq!(err.to_string(), "PROTOCOL_ERROR: bad header");
    }

    #[test]
    fn test_constructor_normalizes_recoverable_flag() {
        assert!(TransportError::new(TransportErrorKind::Timeout, "t", false).recoverable);
        assert!(!TransportError::new(TransportErrorKind::Protocol, "p", true).recoverable);
        assert!(TransportError::new(TransportErrorKind::Disconnected, "d", true).recoverable);
        assert!(!TransportError::new(TransportErrorKind::Disconnected, "d", false).recoverable);
    }

    #[test]
    fn test_io_error_mapping() {
        use std::io::{Error, ErrorKind};

        let reset = TransportError::from_io(&Error::from(ErrorKind::ConnectionReset), "read");
        assert_eq!(reset.kind, TransportErrorKind::Disconnected);
        assert!(reset.recoverable);

        let refused = TransportError::from_io(&Error::from(ErrorKind::ConnectionRefused), "open");
        assert_eq!(refused.kind, TransportErrorKind::Disconnected);
        assert!(!refused.recoverable);

        let timed_out = TransportError::from_io(&Error::from(ErrorKind::TimedOut), "read");
        assert_eq!(timed_out.kind, TransportErrorKind::Timeout);

        let garbage = TransportError::from_io(&Error::from(ErrorKind::InvalidData), "decode");
        assert_eq!(garbage.kind, TransportErrorKind::Protocol);
    }

    #[test]
    fn test_retry_exhausted_exposes_last_error() {
        let err = CommError::RetryExhausted {
            attempts: 3,
            last_error: TransportError::timeout("late"),
        };
        assert_eq!(err.kind(), TransportErrorKind::Timeout);
        assert!(err.to_string().contains("3 attempts"));
    }
}
