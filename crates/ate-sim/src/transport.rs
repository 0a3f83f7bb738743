//! Transport backed by the simulation engine.

use crate::engine::SimulationEngine;
use ate_core::{
    block, EndpointAddress, Transport, TransportError, TransportErrorKind, TransportKind,
    TransportResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Simulated link to one endpoint.
///
/// Connects lazily: the first exchange after a dropped link reconnects through
/// the engine. Replies arrive after the endpoint's configured latency; when the
/// latency exceeds the attempt timeout the reply is discarded and the exchange
/// times out after exactly the timeout. Injected timeouts also take the full
/// timeout.
pub struct SimulatedTransport {
    engine: Arc<SimulationEngine>,
    address: EndpointAddress,
    connected: bool,
}

impl SimulatedTransport {
    /// Transport for `address` on `engine`.
    pub fn new(engine: Arc<SimulationEngine>, address: EndpointAddress) -> Self {
        Self {
            engine,
            address,
            connected: false,
        }
    }

    /// Engine this transport talks to.
    pub fn engine(&self) -> &Arc<SimulationEngine> {
        &self.engine
    }

    fn ensure_connected(&mut self) -> TransportResult<()> {
        if !self.connected || !self.engine.is_connected(&self.address) {
            self.engine.connect(&self.address)?;
            self.connected = true;
        }
        Ok(())
    }

    async fn exchange<T>(
        &mut self,
        timeout: Duration,
        reply: impl FnOnce(&SimulationEngine, &EndpointAddress) -> TransportResult<T>,
    ) -> TransportResult<T> {
        self.ensure_connected()?;
        let latency = self.engine.latency(&self.address);
        let result = reply(self.engine.as_ref(), &self.address);

        match &result {
            Err(err) if err.kind == TransportErrorKind::Timeout => {
                tokio::time::sleep(timeout).await;
                return result;
            }
            Err(err) if err.kind == TransportErrorKind::Disconnected => {
                self.connected = false;
                return result;
            }
            _ => {}
        }

        if latency > timeout {
            tokio::time::sleep(timeout).await;
            return Err(TransportError::timeout(format!(
                "no reply from {} within {:?}",
                self.address, timeout
            )));
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        result
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Simulated
    }

    fn address(&self) -> &EndpointAddress {
        &self.address
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self, _timeout: Duration) -> TransportResult<()> {
        self.ensure_connected()
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        if self.connected {
            self.engine.disconnect(&self.address);
            self.connected = false;
        }
        Ok(())
    }

    async fn send(&mut self, command: &str, timeout: Duration) -> TransportResult<String> {
        self.exchange(timeout, |engine, address| engine.respond(address, command))
            .await
    }

    async fn send_binary_query(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> TransportResult<Bytes> {
        // The engine answers with the wire block; callers get the payload.
        self.exchange(timeout, |engine, address| {
            engine
                .respond_binary(address, command)
                .and_then(|raw| block::decode(&raw))
        })
        .await
    }
}

impl std::fmt::Debug for SimulatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedTransport")
            .field("address", &self.address)
            .field("connected", &self.connected)
            .finish()
    }
}
