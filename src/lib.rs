//! # rust-ate
//!
//! Resilient communication core for automated electronic test equipment.
//!
//! The workspace is split by layer:
//!
//! - **`ate-core`**: transport trait, retry engine, communication events
//! - **`ate-sim`**: behavioral simulation of instruments (noise, drift,
//!   calibration aging, injected faults)
//! - **`ate-hardware`**: wire transports, sessions, capability registry and
//!   discovery
//!
//! This crate adds the application layer on top:
//!
//! - **`config`**: layered TOML + environment configuration (figment)
//! - **`logging`**: tracing-subscriber setup
//! - **`error`**: [`AteError`], aggregating every layer's errors
//! - **`workbench`**: [`Workbench`], wiring config into ready-to-use parts
//!
//! ```rust,ignore
//! let config = AteConfig::load(None)?;
//! logging::init_from_config(&config)?;
//! let bench = Workbench::new(config, Arc::new(TracingSink))?;
//! let scan = bench.discover().await?;
//! for entry in scan.by_instrument_type(InstrumentType::PowerSupply) {
//!     let mut psu = bench.open_session(&entry.address)?;
//!     let reading = psu.measure("MEAS:VOLT?", Some(Limits::around(5.0, 0.05))).await?;
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod workbench;

pub use config::AteConfig;
pub use error::{AppResult, AteError, ConfigError};
pub use workbench::Workbench;

pub use ate_core;
pub use ate_hardware;
pub use ate_sim;
