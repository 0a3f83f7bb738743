//! Stateful handle binding one address to one transport through one retry engine.
//!
//! ```text
//!  DISCONNECTED ──connect──▶ IDLE ◀──▶ BUSY
//!       ▲                     │
//!       └──── disconnect ─────┤
//!                             └── close ──▶ CLOSED
//! ```
//!
//! Every operation takes `&mut self`: commands on one session run strictly in
//! issue order and the borrow checker enforces exclusive use. Operations
//! connect on demand, so a session dropped back to `Disconnected` by an
//! unrecoverable link failure reconnects on the next call.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut session = InstrumentSession::open(&factory, &address, policy, retry)?;
//! session.send("VOLT 5.0").await?;
//! let reading = session
//!     .measure("MEAS:VOLT?", Some(Limits::within(4.9, 5.1)))
//!     .await?;
//! assert_eq!(reading.verdict, Verdict::Pass);
//! session.close().await;
//! ```

use crate::error::{SessionError, SessionResult};
use crate::factory::TransportFactory;
use crate::registry::Identity;
use ate_core::{
    BoxedTransport, CommContext, CommError, EndpointAddress, RetryEngine, RetryPolicy,
    TransportAdapter, TransportErrorKind, TransportKind,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Upper bound on `SYST:ERR?` reads per [`InstrumentSession::error_queue`] call.
pub const MAX_ERROR_QUEUE_READS: usize = 100;

/// Pause between `*OPC?` polls.
pub const COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(50);

// =============================================================================
// Session state
// =============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No live link.
    Disconnected,
    /// Connected, no exchange in flight.
    Idle,
    /// An exchange is in flight.
    Busy,
    /// Closed for good.
    Closed,
}

impl SessionState {
    /// True for `Idle` and `Busy`.
    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Busy)
    }
}

// =============================================================================
// Measurements
// =============================================================================

/// Inclusive pass/fail bounds. Either side may be open.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Limits {
    /// Lowest passing value.
    pub lower: Option<f64>,
    /// Highest passing value.
    pub upper: Option<f64>,
}

impl Limits {
    /// Both bounds set.
    pub fn within(lower: f64, upper: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    /// `nominal ± tolerance`.
    pub fn around(nominal: f64, tolerance: f64) -> Self {
        let tolerance = tolerance.abs();
        Self::within(nominal - tolerance, nominal + tolerance)
    }

    /// Lower bound only.
    pub fn at_least(lower: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: None,
        }
    }

    /// Upper bound only.
    pub fn at_most(upper: f64) -> Self {
        Self {
            lower: None,
            upper: Some(upper),
        }
    }

    /// Verdict for `value`. NaN never passes.
    pub fn evaluate(&self, value: f64) -> Verdict {
        if value.is_nan() {
            return Verdict::Fail;
        }
        let above = self.lower.map_or(true, |lo| value >= lo);
        let below = self.upper.map_or(true, |hi| value <= hi);
        if above && below {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

/// Outcome of checking a measurement against its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Inside the limits.
    Pass,
    /// Outside the limits.
    Fail,
    /// No limits supplied.
    NotEvaluated,
}

/// A measured value handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Endpoint that produced the value.
    pub address: EndpointAddress,
    /// Query that produced the value.
    pub command: String,
    /// Parsed value.
    pub value: f64,
    /// Limits the value was checked against.
    pub limits: Option<Limits>,
    /// Pass/fail verdict.
    pub verdict: Verdict,
    /// Session correlation id.
    pub correlation_id: Uuid,
    /// When the reply arrived.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Session
// =============================================================================

/// Exclusive handle on one instrument endpoint.
pub struct InstrumentSession {
    address: EndpointAddress,
    kind: TransportKind,
    context: CommContext,
    adapter: TransportAdapter,
    retry: Arc<RetryEngine>,
    policy: RetryPolicy,
    state: SessionState,
}

impl InstrumentSession {
    /// Session over `transport` with a fresh correlation id.
    ///
    /// Exchanges are reported to the retry engine's sink.
    pub fn new(
        transport: BoxedTransport,
        policy: RetryPolicy,
        retry: Arc<RetryEngine>,
    ) -> Self {
        let context = CommContext::new(transport.address().clone());
        Self::with_context(transport, context, policy, retry)
    }

    /// Session reporting under a caller-supplied context (e.g. a test-run id).
    pub fn with_context(
        transport: BoxedTransport,
        context: CommContext,
        policy: RetryPolicy,
        retry: Arc<RetryEngine>,
    ) -> Self {
        let address = transport.address().clone();
        let kind = transport.kind();
        let adapter = TransportAdapter::new(transport, context.clone(), retry.sink().clone());
        Self {
            address,
            kind,
            context,
            adapter,
            retry,
            policy,
            state: SessionState::Disconnected,
        }
    }

    /// Build the transport through `factory` and wrap it in a session.
    pub fn open(
        factory: &dyn TransportFactory,
        address: &EndpointAddress,
        policy: RetryPolicy,
        retry: Arc<RetryEngine>,
    ) -> SessionResult<Self> {
        let transport = factory.create(address).map_err(|e| SessionError::Comm {
            address: address.clone(),
            source: CommError::Transport(e),
        })?;
        Ok(Self::new(transport, policy, retry))
    }

    /// Endpoint address.
    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// Backend family, fixed at construction.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Correlation id tagging this session's events.
    pub fn correlation_id(&self) -> Uuid {
        self.context.correlation_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Default policy for this session.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Establish the link under the session policy.
    #[instrument(skip(self), fields(address = %self.address), err)]
    pub async fn connect(&mut self) -> SessionResult<()> {
        let policy = self.policy.clone();
        self.connect_with(&policy).await
    }

    async fn connect_with(&mut self, policy: &RetryPolicy) -> SessionResult<()> {
        self.check_policy(policy)?;
        self.ensure_open()?;
        let timeout = policy.timeout_per_attempt;
        let result = self
            .retry
            .execute_on(&self.context, policy, &mut self.adapter, |adapter, attempt| {
                Box::pin(async move { adapter.connect(timeout, attempt).await })
            })
            .await;

        match result {
            Ok(()) => {
                debug!(kind = %self.kind, "Session connected");
                self.state = SessionState::Idle;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Drop the link. The session can reconnect later.
    pub async fn disconnect(&mut self) -> SessionResult<()> {
        self.ensure_open()?;
        let result = self.adapter.disconnect().await;
        self.state = SessionState::Disconnected;
        result.map_err(|e| SessionError::Comm {
            address: self.address.clone(),
            source: CommError::Transport(e),
        })
    }

    /// Disconnect and refuse any further operation. Idempotent.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Err(e) = self.adapter.disconnect().await {
            warn!(address = %self.address, error = %e, "Disconnect on close failed");
        }
        self.state = SessionState::Closed;
    }

    // -------------------------------------------------------------------------
    // Exchanges
    // -------------------------------------------------------------------------

    /// Send a command under the session policy. Queries return the reply line,
    /// writes return an empty string.
    pub async fn send(&mut self, command: &str) -> SessionResult<String> {
        let policy = self.policy.clone();
        self.send_with(command, &policy).await
    }

    /// Send a command under a per-call policy override.
    #[instrument(skip(self, policy), fields(address = %self.address), err)]
    pub async fn send_with(&mut self, command: &str, policy: &RetryPolicy) -> SessionResult<String> {
        self.prepare(policy).await?;
        let timeout = policy.timeout_per_attempt;
        let result = self
            .retry
            .execute_on(&self.context, policy, &mut self.adapter, |adapter, attempt| {
                let command = command.to_owned();
                Box::pin(async move { adapter.send(&command, timeout, attempt).await })
            })
            .await;
        self.settle(result)
    }

    /// Binary block query under the session policy.
    pub async fn query_binary(&mut self, command: &str) -> SessionResult<Bytes> {
        let policy = self.policy.clone();
        self.query_binary_with(command, &policy).await
    }

    /// Binary block query under a per-call policy override.
    #[instrument(skip(self, policy), fields(address = %self.address), err)]
    pub async fn query_binary_with(
        &mut self,
        command: &str,
        policy: &RetryPolicy,
    ) -> SessionResult<Bytes> {
        self.prepare(policy).await?;
        let timeout = policy.timeout_per_attempt;
        let result = self
            .retry
            .execute_on(&self.context, policy, &mut self.adapter, |adapter, attempt| {
                let command = command.to_owned();
                Box::pin(async move {
                    adapter
                        .send_binary_query(&command, timeout, attempt)
                        .await
                })
            })
            .await;
        self.settle(result)
    }

    /// Query and parse a floating-point reply.
    pub async fn query_f64(&mut self, command: &str) -> SessionResult<f64> {
        let reply = self.send(command).await?;
        reply.trim().parse::<f64>().map_err(|_| SessionError::InvalidResponse {
            address: self.address.clone(),
            command: command.to_string(),
            reply,
        })
    }

    /// Query a value and check it against optional limits.
    pub async fn measure(
        &mut self,
        command: &str,
        limits: Option<Limits>,
    ) -> SessionResult<Measurement> {
        let value = self.query_f64(command).await?;
        let verdict = limits.map_or(Verdict::NotEvaluated, |l| l.evaluate(value));
        debug!(address = %self.address, command, value, ?verdict, "Measurement");
        Ok(Measurement {
            address: self.address.clone(),
            command: command.to_string(),
            value,
            limits,
            verdict,
            correlation_id: self.context.correlation_id,
            timestamp: Utc::now(),
        })
    }

    // -------------------------------------------------------------------------
    // IEEE 488.2 common commands
    // -------------------------------------------------------------------------

    /// `*IDN?`, parsed.
    pub async fn identify(&mut self) -> SessionResult<Identity> {
        let reply = self.send("*IDN?").await?;
        Identity::parse(&reply).ok_or_else(|| SessionError::InvalidResponse {
            address: self.address.clone(),
            command: "*IDN?".to_string(),
            reply,
        })
    }

    /// `*RST`.
    pub async fn reset(&mut self) -> SessionResult<()> {
        self.send("*RST").await.map(|_| ())
    }

    /// `*TST?`. A reply of `0` means the self test passed.
    pub async fn self_test(&mut self) -> SessionResult<bool> {
        let reply = self.send("*TST?").await?;
        match reply.trim().trim_start_matches('+').parse::<i32>() {
            Ok(code) => Ok(code == 0),
            Err(_) => Err(SessionError::InvalidResponse {
                address: self.address.clone(),
                command: "*TST?".to_string(),
                reply,
            }),
        }
    }

    /// Drain `SYST:ERR?` until the instrument reports no error.
    ///
    /// Reads at most [`MAX_ERROR_QUEUE_READS`] entries.
    pub async fn error_queue(&mut self) -> SessionResult<Vec<String>> {
        let mut errors = Vec::new();
        for _ in 0..MAX_ERROR_QUEUE_READS {
            let reply = self.send("SYST:ERR?").await?;
            let entry = reply.trim();
            if is_no_error(entry) {
                return Ok(errors);
            }
            errors.push(entry.to_string());
        }
        warn!(address = %self.address, "Error queue did not drain");
        Ok(errors)
    }

    /// Poll `*OPC?` until it reports `1` or `deadline` passes.
    pub async fn wait_for_completion(&mut self, deadline: Duration) -> SessionResult<()> {
        let start = Instant::now();
        loop {
            let reply = self.send("*OPC?").await?;
            if reply.trim().trim_start_matches('+') == "1" {
                return Ok(());
            }
            let waited = start.elapsed();
            if waited + COMPLETION_POLL_INTERVAL > deadline {
                return Err(SessionError::CompletionTimeout {
                    address: self.address.clone(),
                    waited,
                });
            }
            tokio::time::sleep(COMPLETION_POLL_INTERVAL).await;
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn ensure_open(&self) -> SessionResult<()> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed {
                address: self.address.clone(),
            });
        }
        Ok(())
    }

    fn check_policy(&self, policy: &RetryPolicy) -> SessionResult<()> {
        policy.validate().map_err(|source| SessionError::InvalidPolicy {
            address: self.address.clone(),
            source,
        })
    }

    async fn prepare(&mut self, policy: &RetryPolicy) -> SessionResult<()> {
        self.check_policy(policy)?;
        self.ensure_open()?;
        if !self.state.is_connected() {
            self.connect_with(policy).await?;
        }
        self.state = SessionState::Busy;
        Ok(())
    }

    fn settle<T>(&mut self, result: Result<T, CommError>) -> SessionResult<T> {
        match result {
            Ok(value) => {
                self.state = SessionState::Idle;
                Ok(value)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, err: CommError) -> SessionError {
        let link_gone = err.kind() == TransportErrorKind::Disconnected
            && !err.transport_error().recoverable;
        self.state = if link_gone {
            SessionState::Disconnected
        } else if self.state == SessionState::Busy {
            SessionState::Idle
        } else {
            self.state
        };
        SessionError::Comm {
            address: self.address.clone(),
            source: err,
        }
    }
}

impl std::fmt::Debug for InstrumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentSession")
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("correlation_id", &self.context.correlation_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn is_no_error(entry: &str) -> bool {
    let code = entry.split(',').next().unwrap_or("").trim();
    code.trim_start_matches('+').parse::<i64>() == Ok(0)
}
