//! Endpoint addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque locator for one reachable instrument.
///
/// The core never interprets the string beyond handing it to a transport
/// factory. Typical values are VISA-style resource strings such as
/// `TCPIP0::192.168.1.20::5025::SOCKET` or `ASRL/dev/ttyUSB0::INSTR`, and
/// `SIM::<name>` for simulated endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointAddress(String);

impl EndpointAddress {
    /// Wrap a locator string. Surrounding whitespace is dropped.
    pub fn new(address: impl Into<String>) -> Self {
        let address: String = address.into();
        Self(address.trim().to_string())
    }

    /// The locator text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading scheme segment (everything before the first `::`), uppercased.
    ///
    /// `TCPIP0::10.0.0.2::5025::SOCKET` → `TCPIP0`, `SIM::dmm` → `SIM`.
    pub fn scheme(&self) -> String {
        self.0
            .split("::")
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase()
    }

    /// The `::`-separated segments after the scheme.
    pub fn segments(&self) -> Vec<&str> {
        self.0.split("::").skip(1).collect()
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EndpointAddress {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for EndpointAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_and_segments() {
        let addr = EndpointAddress::new(" TCPIP0::10.0.0.2::5025::SOCKET ");
        assert_eq!(addr.as_str(), "TCPIP0::10.0.0.2::5025::SOCKET");
        assert_eq!(addr.scheme(), "TCPIP0");
        assert_eq!(addr.segments(), vec!["10.0.0.2", "5025", "SOCKET"]);

        let sim = EndpointAddress::from("sim::psu1");
        assert_eq!(sim.scheme(), "SIM");
        assert_eq!(sim.segments(), vec!["psu1"]);
    }
}
