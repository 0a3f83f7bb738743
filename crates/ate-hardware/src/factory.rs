//! Address-driven transport construction.
//!
//! | Address                                  | Transport            |
//! |------------------------------------------|----------------------|
//! | `TCPIP[n]::<host>::<port>::SOCKET`       | raw TCP socket       |
//! | `ASRL<device>[::<baud>]::INSTR`          | serial (feature)     |
//! | `SIM::<name>`                            | simulation engine    |

use crate::transport::{tcp_transport, DEFAULT_BAUD_RATE};
use ate_core::{BoxedTransport, EndpointAddress, TransportError};
use ate_sim::{SimulatedTransport, SimulationEngine, SIM_SCHEME};
use std::sync::Arc;

/// Builds a transport for an address.
pub trait TransportFactory: Send + Sync {
    /// Transport for `address`. Fails with a permanent disconnect for addresses
    /// this factory cannot serve.
    fn create(&self, address: &EndpointAddress) -> Result<BoxedTransport, TransportError>;
}

/// Parsed form of a supported address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpec {
    /// Raw TCP socket.
    Tcp {
        /// Host name or IP.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// Serial device.
    Serial {
        /// Device path (`/dev/ttyUSB0`, `COM3`).
        path: String,
        /// Baud rate.
        baud_rate: u32,
    },
    /// Simulated endpoint.
    Simulated {
        /// Endpoint name.
        name: String,
    },
}

impl AddressSpec {
    /// Parse an address. Unsupported schemes fail with a permanent disconnect.
    pub fn parse(address: &EndpointAddress) -> Result<Self, TransportError> {
        let scheme = address.scheme();
        let segments = address.segments();
        let bad = |why: &str| {
            TransportError::disconnected_permanently(format!(
                "unsupported address '{}': {}",
                address, why
            ))
        };

        if scheme == SIM_SCHEME {
            return match segments.as_slice() {
                [name] if !name.is_empty() => Ok(Self::Simulated {
                    name: (*name).to_string(),
                }),
                _ => Err(bad("expected SIM::<name>")),
            };
        }

        if scheme.starts_with("TCPIP") && scheme[5..].chars().all(|c| c.is_ascii_digit()) {
            return match segments.as_slice() {
                [host, port, kind] if kind.eq_ignore_ascii_case("SOCKET") => {
                    let port = port.parse().map_err(|_| bad("invalid port"))?;
                    Ok(Self::Tcp {
                        host: (*host).to_string(),
                        port,
                    })
                }
                [_, kind] if kind.eq_ignore_ascii_case("INSTR") => {
                    Err(bad("VXI-11/HiSLIP resources need a VISA library"))
                }
                _ => Err(bad("expected TCPIP::<host>::<port>::SOCKET")),
            };
        }

        if scheme.starts_with("ASRL") {
            // Device paths keep their case.
            let raw = address.as_str();
            let path = raw
                .split("::")
                .next()
                .map(|s| &s[4..])
                .unwrap_or_default()
                .to_string();
            if path.is_empty() {
                return Err(bad("missing serial device"));
            }
            return match segments.as_slice() {
                [kind] if kind.eq_ignore_ascii_case("INSTR") => Ok(Self::Serial {
                    path,
                    baud_rate: DEFAULT_BAUD_RATE,
                }),
                [baud, kind] if kind.eq_ignore_ascii_case("INSTR") => Ok(Self::Serial {
                    path,
                    baud_rate: baud.parse().map_err(|_| bad("invalid baud rate"))?,
                }),
                _ => Err(bad("expected ASRL<device>[::<baud>]::INSTR")),
            };
        }

        Err(bad("unknown scheme"))
    }
}

/// Factory for every built-in address scheme.
///
/// Simulated addresses need an engine; without one they are rejected.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransportFactory {
    simulation: Option<Arc<SimulationEngine>>,
}

impl DefaultTransportFactory {
    /// Factory for real transports only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory that also serves `SIM::` addresses from `engine`.
    pub fn with_simulation(engine: Arc<SimulationEngine>) -> Self {
        Self {
            simulation: Some(engine),
        }
    }

    /// Simulation engine, if any.
    pub fn simulation(&self) -> Option<&Arc<SimulationEngine>> {
        self.simulation.as_ref()
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, address: &EndpointAddress) -> Result<BoxedTransport, TransportError> {
        match AddressSpec::parse(address)? {
            AddressSpec::Tcp { host, port } => {
                Ok(Box::new(tcp_transport(address.clone(), &host, port)))
            }
            AddressSpec::Serial { path, baud_rate } => serial(address, &path, baud_rate),
            AddressSpec::Simulated { .. } => {
                let engine = self.simulation.clone().ok_or_else(|| {
                    TransportError::disconnected_permanently(format!(
                        "'{}' is simulated but no simulation engine is configured",
                        address
                    ))
                })?;
                Ok(Box::new(SimulatedTransport::new(engine, address.clone())))
            }
        }
    }
}

#[cfg(feature = "serial")]
fn serial(
    address: &EndpointAddress,
    path: &str,
    baud_rate: u32,
) -> Result<BoxedTransport, TransportError> {
    Ok(Box::new(crate::transport::serial_transport(
        address.clone(),
        path,
        baud_rate,
    )))
}

#[cfg(not(feature = "serial"))]
fn serial(
    address: &EndpointAddress,
    _path: &str,
    _baud_rate: u32,
) -> Result<BoxedTransport, TransportError> {
    Err(TransportError::disconnected_permanently(format!(
        "'{}' needs serial support (build with the `serial` feature)",
        address
    )))
}
