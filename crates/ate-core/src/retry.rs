//! Bounded retry with exponential backoff and jitter.
//!
//! The [`RetryEngine`] wraps any transport operation. It is the only place that
//! decides whether a failure is worth another attempt, and that decision depends
//! on the error kind alone:
//!
//! | Error                       | Class     |
//! |-----------------------------|-----------|
//! | `Timeout`                   | transient |
//! | `Disconnected` (recoverable)| transient |
//! | `Disconnected` (otherwise)  | permanent |
//! | `Protocol`                  | permanent |
//!
//! Between attempt `k` and `k+1` the engine sleeps
//! `min(max_delay, base_delay * 2^(k-1))`, shifted by a uniform jitter of up to
//! `±jitter_fraction` of that value and clamped at zero.

use crate::error::{CommError, TransportError, TransportErrorKind};
use crate::events::{CommContext, CommEvent, EventOutcome, SharedSink};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

// =============================================================================
// Policy
// =============================================================================

/// Retry parameters for one Session (or one call, when overridden).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound on any single delay, before jitter.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Relative jitter applied to each delay, in `[0, 1]`.
    pub jitter_fraction: f64,
    /// Bound on each individual attempt.
    #[serde(with = "humantime_serde")]
    pub timeout_per_attempt: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter_fraction: 0.1,
            timeout_per_attempt: Duration::from_secs(2),
        }
    }
}

/// A retry policy that violates one of its constraints.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid retry policy: {0}")]
pub struct PolicyError(pub String);

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn no_retry(timeout_per_attempt: Duration) -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_fraction: 0.0,
            timeout_per_attempt,
        }
    }

    /// Copy with a different attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Copy with a different per-attempt timeout.
    pub fn with_timeout(mut self, timeout_per_attempt: Duration) -> Self {
        self.timeout_per_attempt = timeout_per_attempt;
        self
    }

    /// Check every constraint.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts < 1 {
            return Err(PolicyError("max_attempts must be at least 1".into()));
        }
        if self.max_delay < self.base_delay {
            return Err(PolicyError(format!(
                "max_delay ({:?}) must not be below base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(PolicyError(format!(
                "jitter_fraction {} outside [0, 1]",
                self.jitter_fraction
            )));
        }
        if self.timeout_per_attempt.is_zero() {
            return Err(PolicyError("timeout_per_attempt must be positive".into()));
        }
        Ok(())
    }

    /// Attempt budget actually honoured.
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Backoff before attempt `attempt + 1`, before jitter.
    ///
    /// `attempt` is 1-based. Saturates at `max_delay` instead of overflowing.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let scaled = 2u32
            .checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(self.max_delay);
        scaled.min(self.max_delay)
    }

    /// Largest delay jitter can produce after attempt `attempt`.
    pub fn max_jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        let jitter = self.effective_jitter();
        if jitter == 0.0 {
            return delay;
        }
        let secs = delay.as_secs_f64() * (1.0 + jitter);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Jitter fraction actually applied: clamped to `[0, 1]`, non-finite as 0.
    pub fn effective_jitter(&self) -> f64 {
        if self.jitter_fraction.is_finite() {
            self.jitter_fraction.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry after backoff.
    Transient,
    /// Give up immediately.
    Permanent,
}

/// Classify a transport error by kind.
pub fn classify(err: &TransportError) -> ErrorClass {
    match err.kind {
        TransportErrorKind::Timeout => ErrorClass::Transient,
        TransportErrorKind::Disconnected if err.recoverable => ErrorClass::Transient,
        TransportErrorKind::Disconnected | TransportErrorKind::Protocol => ErrorClass::Permanent,
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Executes operations under a [`RetryPolicy`].
///
/// Jitter comes from the engine's own seeded generator, so two engines built with
/// the same seed choose the same delays.
pub struct RetryEngine {
    sink: SharedSink,
    jitter_rng: Mutex<ChaCha8Rng>,
}

impl RetryEngine {
    /// Engine with a jitter generator seeded from `seed`.
    pub fn with_seed(sink: SharedSink, seed: u64) -> Self {
        Self {
            sink,
            jitter_rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Engine with a jitter seed drawn from the OS.
    pub fn new(sink: SharedSink) -> Self {
        Self::with_seed(sink, rand::random())
    }

    /// Sink that receives retry decisions.
    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Delay to sleep after a transient failure on attempt `attempt`.
    ///
    /// Never panics: a jittered value too large for a [`Duration`] falls back to
    /// `max_delay`.
    pub fn next_delay(&self, policy: &RetryPolicy, attempt: u32) -> Duration {
        let delay = policy.backoff_delay(attempt);
        let jitter = policy.effective_jitter();
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor: f64 = self.jitter_rng.lock().gen_range(-jitter..=jitter);
        let secs = (delay.as_secs_f64() * (1.0 + factor)).max(0.0);
        Duration::try_from_secs_f64(secs).unwrap_or(policy.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently or the budget runs out.
    ///
    /// `operation` receives the 1-based attempt number. Exactly one retry-decision
    /// event is emitted per attempt.
    #[instrument(
        skip_all,
        fields(address = %ctx.endpoint_address, correlation_id = %ctx.correlation_id)
    )]
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &CommContext,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T, CommError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt = 1u32;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    self.decide(ctx, attempt, EventOutcome::Success, None);
                    return Ok(value);
                }
                Err(err) => {
                    let delay = self.after_failure(ctx, policy, attempt, err)?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Like [`execute`](Self::execute), but hands `resource` to every attempt.
    ///
    /// The operation borrows `resource` mutably for the duration of one attempt
    /// only, so a session can drive its adapter without locking it.
    #[instrument(
        skip_all,
        fields(address = %ctx.endpoint_address, correlation_id = %ctx.correlation_id)
    )]
    pub async fn execute_on<R, T, F>(
        &self,
        ctx: &CommContext,
        policy: &RetryPolicy,
        resource: &mut R,
        mut operation: F,
    ) -> Result<T, CommError>
    where
        R: ?Sized,
        F: for<'r> FnMut(&'r mut R, u32) -> BoxFuture<'r, Result<T, TransportError>>,
    {
        let mut attempt = 1u32;
        loop {
            match operation(&mut *resource, attempt).await {
                Ok(value) => {
                    self.decide(ctx, attempt, EventOutcome::Success, None);
                    return Ok(value);
                }
                Err(err) => {
                    let delay = self.after_failure(ctx, policy, attempt, err)?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Record the decision for a failed attempt. Returns the backoff to sleep
    /// before the next attempt, or the error that ends the call.
    fn after_failure(
        &self,
        ctx: &CommContext,
        policy: &RetryPolicy,
        attempt: u32,
        err: TransportError,
    ) -> Result<Duration, CommError> {
        let kind = err.kind;
        if classify(&err) == ErrorClass::Permanent {
            self.decide(ctx, attempt, EventOutcome::Permanent { kind }, None);
            return Err(CommError::Transport(err));
        }
        if attempt >= policy.effective_attempts() {
            self.decide(ctx, attempt, EventOutcome::Exhausted { kind }, None);
            return Err(CommError::RetryExhausted {
                attempts: attempt,
                last_error: err,
            });
        }

        let delay = self.next_delay(policy, attempt);
        self.decide(
            ctx,
            attempt,
            EventOutcome::RetryScheduled { kind },
            Some(delay),
        );
        Ok(delay)
    }

    fn decide(
        &self,
        ctx: &CommContext,
        attempt: u32,
        outcome: EventOutcome,
        delay: Option<Duration>,
    ) {
        self.sink
            .record(&CommEvent::retry_decision(ctx, attempt, outcome, delay));
    }
}

impl std::fmt::Debug for RetryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryEngine").finish_non_exhaustive()
    }
}
