//! Simulation error types.

use ate_core::{EndpointAddress, TransportError};
use thiserror::Error;

/// A simulated endpoint was asked to model something it has no behavior for,
/// or its configuration is inconsistent.
///
/// At the transport boundary every variant surfaces as a `PROTOCOL_ERROR`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationConfigError {
    /// No endpoint is registered under this address.
    #[error("no simulated endpoint at '{0}'")]
    UnknownEndpoint(EndpointAddress),

    /// The command category has no configured behavior.
    #[error("unsupported command '{command}'")]
    UnsupportedCommand {
        /// Offending command text.
        command: String,
    },

    /// The command addresses a quantity the endpoint does not model.
    #[error("quantity '{quantity}' not configured (command '{command}')")]
    UnknownQuantity {
        /// Quantity header as sent.
        quantity: String,
        /// Full command text.
        command: String,
    },

    /// A setpoint argument could not be parsed.
    #[error("invalid value '{value}' in '{command}'")]
    InvalidValue {
        /// Argument as sent.
        value: String,
        /// Full command text.
        command: String,
    },

    /// Static configuration is invalid.
    #[error("invalid simulation config: {0}")]
    Invalid(String),
}

impl From<SimulationConfigError> for TransportError {
    fn from(err: SimulationConfigError) -> Self {
        TransportError::protocol(err.to_string())
    }
}

/// Saving or loading simulation snapshots failed.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Filesystem access failed.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be (de)serialized.
    #[error("snapshot format error: {0}")]
    Format(#[from] serde_json::Error),

    /// Snapshot refers to an endpoint the engine does not know.
    #[error(transparent)]
    Config(#[from] SimulationConfigError),
}
