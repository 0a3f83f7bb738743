//! The transport abstraction: one command/response exchange with one endpoint.
//!
//! A [`Transport`] is either real (raw TCP socket, serial port) or simulated.
//! Sessions and the retry engine only ever see the trait, so a test run can swap
//! physical hardware for the simulation engine by changing addresses.
//!
//! Contract for implementors:
//!
//! - Every exchange is bounded by the `timeout` argument. An implementation that
//!   cannot finish in time returns [`TransportErrorKind::Timeout`] and leaves the
//!   link in a state where the next exchange starts clean.
//! - No retries. A transport reports what happened and returns.
//! - Commands containing `?` expect a reply; anything else is write-only and
//!   yields an empty string.
//!
//! [`TransportErrorKind::Timeout`]: crate::error::TransportErrorKind::Timeout

use crate::address::EndpointAddress;
use crate::error::{TransportError, TransportResult};
use crate::events::{CommContext, CommEvent, EventOutcome, SharedSink};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;

/// Backend family of a transport. Fixed for the lifetime of a Session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Wire I/O with physical hardware.
    Real,
    /// Backed by the behavioral simulation engine.
    Simulated,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Real => write!(f, "real"),
            TransportKind::Simulated => write!(f, "simulated"),
        }
    }
}

/// True if `command` expects a reply line.
pub fn expects_response(command: &str) -> bool {
    command.contains('?')
}

/// One endpoint link.
#[async_trait]
pub trait Transport: Send {
    /// Backend family.
    fn kind(&self) -> TransportKind;

    /// Address this transport talks to.
    fn address(&self) -> &EndpointAddress;

    /// Whether a link is currently established.
    fn is_connected(&self) -> bool;

    /// Establish the link. Idempotent when already connected.
    async fn connect(&mut self, timeout: Duration) -> TransportResult<()>;

    /// Tear the link down. Idempotent.
    async fn disconnect(&mut self) -> TransportResult<()>;

    /// One text exchange.
    async fn send(&mut self, command: &str, timeout: Duration) -> TransportResult<String>;

    /// One binary exchange answered with a definite-length block; returns the
    /// block payload.
    async fn send_binary_query(&mut self, command: &str, timeout: Duration)
        -> TransportResult<Bytes>;
}

/// Boxed transport as held by sessions.
pub type BoxedTransport = Box<dyn Transport>;

/// Wraps a [`Transport`] and reports every exchange to the communication sink.
///
/// The adapter is what a Session owns. It adds timing and event reporting but
/// never changes the result of an exchange.
pub struct TransportAdapter {
    inner: BoxedTransport,
    context: CommContext,
    sink: SharedSink,
}

impl TransportAdapter {
    /// Adapter over `inner`, reporting under `context`.
    pub fn new(inner: BoxedTransport, context: CommContext, sink: SharedSink) -> Self {
        Self {
            inner,
            context,
            sink,
        }
    }

    /// Reporting context.
    pub fn context(&self) -> &CommContext {
        &self.context
    }

    /// Backend family of the wrapped transport.
    pub fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    /// Whether the wrapped transport holds a live link.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Connect the wrapped transport, reporting the attempt.
    pub async fn connect(&mut self, timeout: Duration, attempt: u32) -> TransportResult<()> {
        let start = Instant::now();
        let result = self.inner.connect(timeout).await;
        self.report("<connect>", attempt, start, result.as_ref().err());
        result
    }

    /// Disconnect the wrapped transport.
    pub async fn disconnect(&mut self) -> TransportResult<()> {
        self.inner.disconnect().await
    }

    /// Text exchange, reported as attempt `attempt`.
    pub async fn send(
        &mut self,
        command: &str,
        timeout: Duration,
        attempt: u32,
    ) -> TransportResult<String> {
        let start = Instant::now();
        let result = self.inner.send(command, timeout).await;
        self.report(command, attempt, start, result.as_ref().err());
        result
    }

    /// Binary exchange, reported as attempt `attempt`.
    pub async fn send_binary_query(
        &mut self,
        command: &str,
        timeout: Duration,
        attempt: u32,
    ) -> TransportResult<Bytes> {
        let start = Instant::now();
        let result = self.inner.send_binary_query(command, timeout).await;
        self.report(command, attempt, start, result.as_ref().err());
        result
    }

    fn report(&self, command: &str, attempt: u32, start: Instant, err: Option<&TransportError>) {
        let outcome = match err {
            None => EventOutcome::Success,
            Some(e) => EventOutcome::failure(e),
        };
        self.sink.record(&CommEvent::exchange(
            &self.context,
            attempt,
            command,
            outcome,
            start.elapsed(),
        ));
    }
}

impl std::fmt::Debug for TransportAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportAdapter")
            .field("address", &self.context.endpoint_address)
            .field("kind", &self.inner.kind())
            .field("connected", &self.inner.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use crate::events::{CommEventKind, RecordingSink};
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays canned results.
    struct Scripted {
        address: EndpointAddress,
        replies: VecDeque<TransportResult<String>>,
    }

    #[async_trait]
    impl Transport for Scripted {
        fn kind(&self) -> TransportKind {
            TransportKind::Simulated
        }
        fn address(&self) -> &EndpointAddress {
            &self.address
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn connect(&mut self, _timeout: Duration) -> TransportResult<()> {
            Ok(())
        }
        async fn disconnect(&mut self) -> TransportResult<()> {
            Ok(())
        }
        async fn send(&mut self, _command: &str, _timeout: Duration) -> TransportResult<String> {
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::protocol("script empty")))
        }
        async fn send_binary_query(
            &mut self,
            _command: &str,
            _timeout: Duration,
        ) -> TransportResult<Bytes> {
            Ok(Bytes::from_static(b"\x01\x02"))
        }
    }

    #[test]
    fn test_expects_response() {
        assert!(expects_response("*IDN?"));
        assert!(expects_response("MEAS:VOLT? (@1)"));
        assert!(!expects_response("VOLT 5.0"));
    }

    #[tokio::test]
    async fn test_adapter_reports_each_exchange() {
        let address = EndpointAddress::new("SIM::psu");
        let sink = Arc::new(RecordingSink::new());
        let ctx = CommContext::new(address.clone());
        let transport = Scripted {
            address,
            replies: VecDeque::from(vec![
                Err(TransportError::timeout("late")),
                Ok("5.02".to_string()),
            ]),
        };
        let mut adapter = TransportAdapter::new(Box::new(transport), ctx.clone(), sink.clone());

        let timeout = Duration::from_millis(100);
        assert!(adapter.send("MEAS:VOLT?", timeout, 1).await.is_err());
        assert_eq!(adapter.send("MEAS:VOLT?", timeout, 2).await.unwrap(), "5.02");

        let events = sink.exchanges();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == CommEventKind::Exchange));
        assert!(events.iter().all(|e| e.correlation_id == ctx.correlation_id));
        assert_eq!(events[0].attempt_number, 1);
        assert!(matches!(
            events[0].outcome,
            EventOutcome::Failure {
                kind: TransportErrorKind::Timeout,
                ..
            }
        ));
        assert!(events[1].outcome.is_success());
        assert!(events[1].latency.is_some());
    }
}
