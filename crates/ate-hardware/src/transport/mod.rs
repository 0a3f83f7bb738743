//! Real (wire) transports.
//!
//! Simulated endpoints use [`ate_sim::SimulatedTransport`]; the
//! [`factory`](crate::factory) picks the right one from the address scheme.

pub mod stream;
pub mod tcp;

#[cfg(feature = "serial")]
pub mod serial;

/// Baud rate used when a serial address does not name one.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

pub use stream::{DynLink, LinkIo, LinkOpener, StreamTransport};
pub use tcp::{tcp_transport, TcpOpener};

#[cfg(feature = "serial")]
pub use serial::{serial_transport, SerialOpener};
