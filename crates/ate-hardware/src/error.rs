//! Error types for sessions, the capability registry and discovery.

use ate_core::{CommError, EndpointAddress, PolicyError, TransportErrorKind};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by an [`InstrumentSession`](crate::session::InstrumentSession).
///
/// Every variant carries the endpoint address so callers juggling several
/// sessions can tell where a failure came from.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The exchange failed after retry handling.
    #[error("{address}: {source}")]
    Comm {
        /// Endpoint address.
        address: EndpointAddress,
        /// Underlying retry-layer error.
        #[source]
        source: CommError,
    },

    /// The session has been closed.
    #[error("{address}: session is closed")]
    Closed {
        /// Endpoint address.
        address: EndpointAddress,
    },

    /// The instrument answered with something the caller cannot use.
    #[error("{address}: invalid response to '{command}': {reply:?}")]
    InvalidResponse {
        /// Endpoint address.
        address: EndpointAddress,
        /// Command that was sent.
        command: String,
        /// Raw reply.
        reply: String,
    },

    /// A per-call retry policy override broke one of its constraints.
    #[error("{address}: {source}")]
    InvalidPolicy {
        /// Endpoint address.
        address: EndpointAddress,
        /// Violated constraint.
        #[source]
        source: PolicyError,
    },

    /// `*OPC?` never reported completion before the deadline.
    #[error("{address}: operation not complete after {waited:?}")]
    CompletionTimeout {
        /// Endpoint address.
        address: EndpointAddress,
        /// Time spent polling.
        waited: Duration,
    },
}

impl SessionError {
    /// Address of the session that produced the error.
    pub fn address(&self) -> &EndpointAddress {
        match self {
            SessionError::Comm { address, .. }
            | SessionError::Closed { address }
            | SessionError::InvalidResponse { address, .. }
            | SessionError::InvalidPolicy { address, .. }
            | SessionError::CompletionTimeout { address, .. } => address,
        }
    }

    /// Transport error kind, for communication failures.
    pub fn kind(&self) -> Option<TransportErrorKind> {
        match self {
            SessionError::Comm { source, .. } => Some(source.kind()),
            _ => None,
        }
    }

    /// Underlying retry-layer error, if any.
    pub fn comm_error(&self) -> Option<&CommError> {
        match self {
            SessionError::Comm { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Profile registration failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A pattern failed to compile.
    #[error("profile '{id}': invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// Profile id.
        id: String,
        /// Offending pattern.
        pattern: String,
        /// Regex compiler message.
        reason: String,
    },

    /// The definition is structurally unusable.
    #[error("profile '{id}': {reason}")]
    InvalidProfile {
        /// Profile id.
        id: String,
        /// What is wrong.
        reason: String,
    },
}

/// Hard discovery failures. Per-address problems never end up here.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The address enumerator failed.
    #[error("address enumeration failed: {0}")]
    Enumeration(String),

    /// Discovery options are unusable.
    #[error("invalid discovery options: {0}")]
    InvalidOptions(String),
}
