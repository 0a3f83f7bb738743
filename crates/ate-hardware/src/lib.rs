//! Instrument access for rust-ate.
//!
//! - [`transport`]: wire transports (TCP socket, serial port)
//! - [`factory`]: address-scheme dispatch to wire or simulated transports
//! - [`session`]: [`InstrumentSession`], the per-endpoint handle tests hold
//! - [`registry`]: capability profiles and identity matching
//! - [`discovery`]: concurrent probing and classification
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = CapabilityRegistry::with_builtin_profiles();
//! let discoverer = Discoverer::new(factory, retry, DiscoveryOptions::default())?;
//! let result = discoverer
//!     .discover(&registry, &StaticAddressList::new(addresses), &policy)
//!     .await?;
//! for entry in result.by_capability("voltage_control") {
//!     let mut psu = entry.session_factory().unwrap().open()?;
//!     psu.send("VOLT 3.3").await?;
//! }
//! ```

pub mod discovery;
pub mod error;
pub mod factory;
pub mod registry;
pub mod session;
pub mod transport;

pub use discovery::{
    AddressEnumerator, ChainedEnumerator, Discoverer, DiscoveryEntry, DiscoveryOptions,
    DiscoveryOutcome, DiscoveryResult, EntryReport, EntryStatus, SessionFactory,
    SimulatedAddresses, StaticAddressList,
};
pub use error::{DiscoveryError, RegistryError, SessionError, SessionResult};
pub use factory::{AddressSpec, DefaultTransportFactory, TransportFactory};
pub use registry::{
    builtin_definitions, CapabilityProfile, CapabilityRegistry, Identity, InstrumentType,
    ProfileDefinition,
};
pub use session::{InstrumentSession, Limits, Measurement, SessionState, Verdict};
