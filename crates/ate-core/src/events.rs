//! Communication events and the sinks that receive them.
//!
//! Every transport exchange and every retry decision produces one [`CommEvent`].
//! Events flow one way into a [`CommSink`]; sinks are infallible and have no
//! influence on control flow. A sink that cannot keep an event drops it.
//!
//! # Sinks
//!
//! - [`TracingSink`]: structured `tracing` events (the default)
//! - [`RecordingSink`]: in-memory log with JSON-lines export
//! - [`NullSink`]: discards everything
//!
//! # Example
//!
//! ```rust,ignore
//! let sink = Arc::new(RecordingSink::new());
//! let engine = RetryEngine::with_seed(sink.clone(), 7);
//! // ... run exchanges ...
//! for decision in sink.retry_decisions() {
//!     println!("attempt {} -> {:?}", decision.attempt_number, decision.outcome);
//! }
//! ```

use crate::address::EndpointAddress;
use crate::error::{TransportError, TransportErrorKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// Event Model
// =============================================================================

/// Identifies who is talking to which endpoint.
///
/// One context per Session; the correlation id ties every exchange and retry
/// decision of that Session together in the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommContext {
    /// Session correlation id.
    pub correlation_id: Uuid,
    /// Endpoint the Session is bound to.
    pub endpoint_address: EndpointAddress,
}

impl CommContext {
    /// Context with a fresh correlation id.
    pub fn new(endpoint_address: EndpointAddress) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            endpoint_address,
        }
    }

    /// Context reusing a caller-supplied correlation id (e.g. a test-run id).
    pub fn with_correlation_id(endpoint_address: EndpointAddress, correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            endpoint_address,
        }
    }
}

/// What produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommEventKind {
    /// One command/response exchange through a transport.
    Exchange,
    /// The retry engine's verdict on one attempt.
    RetryDecision,
}

/// Result recorded with an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EventOutcome {
    /// The exchange (or the whole retried operation) succeeded.
    Success,
    /// The exchange failed.
    Failure {
        /// Error category.
        kind: TransportErrorKind,
        /// Error detail.
        detail: String,
    },
    /// Transient failure; another attempt follows after `chosen_delay`.
    RetryScheduled {
        /// Error category that triggered the retry.
        kind: TransportErrorKind,
    },
    /// Transient failure on the last permitted attempt.
    Exhausted {
        /// Error category of the final attempt.
        kind: TransportErrorKind,
    },
    /// Permanent failure; no further attempts.
    Permanent {
        /// Error category.
        kind: TransportErrorKind,
    },
}

impl EventOutcome {
    /// Failure outcome for an exchange.
    pub fn failure(err: &TransportError) -> Self {
        Self::Failure {
            kind: err.kind,
            detail: err.detail.clone(),
        }
    }

    /// Whether this outcome represents a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One entry in the communication log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommEvent {
    /// Exchange or retry decision.
    pub kind: CommEventKind,
    /// Owning Session's correlation id.
    pub correlation_id: Uuid,
    /// Endpoint the event concerns.
    pub endpoint_address: EndpointAddress,
    /// 1-based attempt number within the retried operation.
    pub attempt_number: u32,
    /// What happened.
    pub outcome: EventOutcome,
    /// Exchange duration (exchange events only).
    #[serde(default, with = "humantime_serde")]
    pub latency: Option<Duration>,
    /// Backoff chosen before the next attempt (scheduled retries only).
    #[serde(default, with = "humantime_serde")]
    pub chosen_delay: Option<Duration>,
    /// Command text, when the event concerns a specific command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Wall-clock time the event was produced.
    pub timestamp: DateTime<Utc>,
}

impl CommEvent {
    /// Exchange event for `ctx`.
    pub fn exchange(
        ctx: &CommContext,
        attempt_number: u32,
        command: &str,
        outcome: EventOutcome,
        latency: Duration,
    ) -> Self {
        Self {
            kind: CommEventKind::Exchange,
            correlation_id: ctx.correlation_id,
            endpoint_address: ctx.endpoint_address.clone(),
            attempt_number,
            outcome,
            latency: Some(latency),
            chosen_delay: None,
            command: Some(command.to_string()),
            timestamp: Utc::now(),
        }
    }

    /// Retry-decision event for `ctx`.
    pub fn retry_decision(
        ctx: &CommContext,
        attempt_number: u32,
        outcome: EventOutcome,
        chosen_delay: Option<Duration>,
    ) -> Self {
        Self {
            kind: CommEventKind::RetryDecision,
            correlation_id: ctx.correlation_id,
            endpoint_address: ctx.endpoint_address.clone(),
            attempt_number,
            outcome,
            latency: None,
            chosen_delay,
            command: None,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// One-way receiver of communication events.
pub trait CommSink: Send + Sync {
    /// Accept an event. Must not fail or block for long.
    fn record(&self, event: &CommEvent);
}

/// Shared sink handle.
pub type SharedSink = Arc<dyn CommSink>;

/// Emits each event as a structured `tracing` event.
///
/// Successes log at `debug`, failures and retries at `warn`, give-ups at `error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl CommSink for TracingSink {
    fn record(&self, event: &CommEvent) {
        let latency_ms = event.latency.map(|d| d.as_secs_f64() * 1000.0);
        let delay_ms = event.chosen_delay.map(|d| d.as_secs_f64() * 1000.0);
        match &event.outcome {
            EventOutcome::Success => tracing::debug!(
                kind = ?event.kind,
                correlation_id = %event.correlation_id,
                address = %event.endpoint_address,
                attempt = event.attempt_number,
                latency_ms,
                command = event.command.as_deref(),
                "exchange ok"
            ),
            EventOutcome::Failure { kind, detail } => tracing::warn!(
                correlation_id = %event.correlation_id,
                address = %event.endpoint_address,
                attempt = event.attempt_number,
                error_kind = %kind,
                latency_ms,
                command = event.command.as_deref(),
                "exchange failed: {}",
                detail
            ),
            EventOutcome::RetryScheduled { kind } => tracing::warn!(
                correlation_id = %event.correlation_id,
                address = %event.endpoint_address,
                retry = event.attempt_number,
                error_kind = %kind,
                delay_ms,
                "Transient failure, retrying"
            ),
            EventOutcome::Exhausted { kind } => tracing::error!(
                correlation_id = %event.correlation_id,
                address = %event.endpoint_address,
                attempts = event.attempt_number,
                error_kind = %kind,
                "Retry budget exhausted"
            ),
            EventOutcome::Permanent { kind } => tracing::error!(
                correlation_id = %event.correlation_id,
                address = %event.endpoint_address,
                attempt = event.attempt_number,
                error_kind = %kind,
                "Permanent failure, not retrying"
            ),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl CommSink for NullSink {
    fn record(&self, _event: &CommEvent) {}
}

/// Keeps every event in memory.
///
/// Useful in tests to assert attempt counts and chosen delays, and for dumping
/// a run's communication log as JSON lines.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CommEvent>>,
}

impl RecordingSink {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all recorded events, in arrival order.
    pub fn events(&self) -> Vec<CommEvent> {
        self.events.lock().clone()
    }

    /// Recorded exchange events.
    pub fn exchanges(&self) -> Vec<CommEvent> {
        self.filtered(CommEventKind::Exchange)
    }

    /// Recorded retry-decision events.
    pub fn retry_decisions(&self) -> Vec<CommEvent> {
        self.filtered(CommEventKind::RetryDecision)
    }

    /// Events for one correlation id.
    pub fn for_correlation(&self, correlation_id: Uuid) -> Vec<CommEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    /// Delays chosen for scheduled retries, in order.
    pub fn chosen_delays(&self) -> Vec<Duration> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.chosen_delay)
            .collect()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drop all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Render the log as newline-delimited JSON.
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let events = self.events.lock();
        let mut out = String::new();
        for event in events.iter() {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Write the log to `path` as newline-delimited JSON.
    pub fn write_json_lines(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let text = self
            .to_json_lines()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(text.as_bytes())?;
        file.flush()
    }

    fn filtered(&self, kind: CommEventKind) -> Vec<CommEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl CommSink for RecordingSink {
    fn record(&self, event: &CommEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Fans events out to several sinks.
#[derive(Default, Clone)]
pub struct TeeSink {
    sinks: Vec<SharedSink>,
}

impl TeeSink {
    /// Tee over the given sinks.
    pub fn new(sinks: Vec<SharedSink>) -> Self {
        Self { sinks }
    }
}

impl CommSink for TeeSink {
    fn record(&self, event: &CommEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
