//! Application-level error type.
//!
//! Each crate has its own `thiserror` enum; [`AteError`] gathers them with
//! `#[from]` so application code can use `?` across layers. The binary wraps
//! everything in `anyhow` at the edge.

use ate_core::CommError;
use ate_hardware::{DiscoveryError, RegistryError, SessionError};
use ate_sim::{SimulationConfigError, SnapshotError};
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AteError>;

/// Configuration loading or validation failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The layered sources could not be merged or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value is out of range or inconsistent.
    #[error("Configuration validation error: {0}")]
    Invalid(String),

    /// The `[simulation]` section is unusable.
    #[error("Simulation configuration error: {0}")]
    Simulation(#[from] SimulationConfigError),

    /// A `[[profiles]]` entry is unusable.
    #[error("Profile configuration error: {0}")]
    Profile(#[from] RegistryError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// Top-level error.
#[derive(Error, Debug)]
pub enum AteError {
    /// Configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Session failure, annotated with the endpoint address.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Discovery could not run.
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Communication failure outside a session.
    #[error("Communication error: {0}")]
    Comm(#[from] CommError),

    /// Simulation lookup or setup failure.
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationConfigError),

    /// Snapshot save/load failure.
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Logging could not be initialised.
    #[error("Logging error: {0}")]
    Logging(String),

    /// File or console I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
