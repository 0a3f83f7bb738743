//! Raw TCP socket links (`TCPIP[n]::<host>::<port>::SOCKET`).

use super::stream::{DynLink, LinkOpener, StreamTransport};
use ate_core::{EndpointAddress, TransportError, TransportResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// Opens TCP connections to one host and port.
#[derive(Debug, Clone)]
pub struct TcpOpener {
    host: String,
    port: u16,
}

impl TcpOpener {
    /// Opener for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl LinkOpener for TcpOpener {
    async fn open(&self, timeout: Duration) -> TransportResult<DynLink> {
        let target = (self.host.as_str(), self.port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(target))
            .await
            .map_err(|_| {
                TransportError::timeout(format!(
                    "connect to {}:{} timed out after {:?}",
                    self.host, self.port, timeout
                ))
            })?
            .map_err(|e| TransportError::from_io(&e, &format!("connect {}:{}", self.host, self.port)))?;
        // Instrument commands are tiny; do not wait to coalesce them.
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::from_io(&e, "set_nodelay"))?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("tcp {}:{}", self.host, self.port)
    }
}

/// Socket transport for `address`, connecting to `host:port`.
pub fn tcp_transport(address: EndpointAddress, host: &str, port: u16) -> StreamTransport {
    StreamTransport::new(address, Box::new(TcpOpener::new(host, port)))
}
