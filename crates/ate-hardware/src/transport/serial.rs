//! Serial port links (`ASRL<device>[::<baud>]::INSTR`).

use super::stream::{DynLink, LinkOpener, StreamTransport};
use ate_core::{EndpointAddress, TransportError, TransportResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio_serial::SerialPortBuilderExt;

/// Opens a serial device with 8N1 framing and no flow control.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    path: String,
    baud_rate: u32,
}

impl SerialOpener {
    /// Opener for `path` at `baud_rate`.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl LinkOpener for SerialOpener {
    async fn open(&self, timeout: Duration) -> TransportResult<DynLink> {
        let path = self.path.clone();
        let baud = self.baud_rate;
        let open = tokio::task::spawn_blocking(move || {
            tokio_serial::new(&path, baud)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .timeout(timeout)
                .open_native_async()
        });
        let port = tokio::time::timeout(timeout, open)
            .await
            .map_err(|_| TransportError::timeout(format!("opening {} timed out", self.path)))?
            .map_err(|e| {
                TransportError::disconnected_permanently(format!("spawn_blocking failed: {}", e))
            })?
            .map_err(|e| map_serial_error(&self.path, e))?;
        Ok(Box::new(port))
    }

    fn describe(&self) -> String {
        format!("serial {} @ {} baud", self.path, self.baud_rate)
    }
}

fn map_serial_error(path: &str, err: tokio_serial::Error) -> TransportError {
    use tokio_serial::ErrorKind;
    let detail = format!("open {}: {}", path, err);
    match err.kind() {
        ErrorKind::Io(kind) => TransportError::from_io(&std::io::Error::from(kind), &detail),
        ErrorKind::NoDevice | ErrorKind::InvalidInput | ErrorKind::Unknown => {
            TransportError::disconnected_permanently(detail)
        }
    }
}

/// Serial transport for `address`.
pub fn serial_transport(address: EndpointAddress, path: &str, baud_rate: u32) -> StreamTransport {
    StreamTransport::new(address, Box::new(SerialOpener::new(path, baud_rate)))
}
