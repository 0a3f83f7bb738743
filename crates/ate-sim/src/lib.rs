//! Behavioral simulation of electronic test instruments.
//!
//! Simulated endpoints stand in for physical hardware in automated test runs.
//! They answer through the same [`Transport`](ate_core::Transport) trait as real
//! links, so discovery, retry and sessions behave identically against both.
//!
//! - [`config`]: endpoint and engine configuration (the `[simulation]` section)
//! - [`engine`]: the layered response model, lifecycle and persistence
//! - [`faults`]: fault schedules
//! - [`response`]: settling, nonlinearity and frequency response
//! - [`transport`]: [`SimulatedTransport`]
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = Arc::new(SimulationEngine::new(SimulationConfig {
//!     default_rng_seed: Some(42),
//!     endpoints: vec![EndpointConfig::power_supply("psu1")],
//!     ..Default::default()
//! })?);
//! let mut link = SimulatedTransport::new(engine, "SIM::psu1".into());
//! link.send("VOLT 5.0", Duration::from_millis(200)).await?;
//! let reading = link.send("MEAS:VOLT?", Duration::from_millis(200)).await?;
//! ```

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod faults;
pub mod response;
pub mod rng;
pub mod state;
pub mod transport;

pub use config::{
    DriftDirection, DriftModel, EndpointConfig, LayerToggles, QuantityModel, SimulationConfig,
    SIM_SCHEME,
};
pub use engine::{EndpointStatus, EngineStatistics, SimulationEngine};
pub use error::{SimulationConfigError, SnapshotError};
pub use faults::{FaultKind, FaultRule, FaultSchedule, FaultTrigger};
pub use response::{BehaviorProfile, ProfileFigures, ResponseModel};
pub use state::{SettlingStep, StateSnapshot};
pub use transport::SimulatedTransport;
