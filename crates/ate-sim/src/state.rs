//! Per-endpoint simulation state and its serialisable snapshot.

use crate::config::DriftModel;
use crate::faults::FaultState;
use crate::rng::SimRng;
use ate_core::EndpointAddress;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Error queue depth; older entries are dropped first.
pub const ERROR_QUEUE_CAPACITY: usize = 32;

/// SCPI "no error" reply.
pub const NO_ERROR: &str = "0,\"No error\"";

/// Live state of one simulated endpoint.
#[derive(Debug, Clone)]
pub struct EndpointState {
    /// Link currently up.
    pub connected: bool,
    /// Keep the state across disconnects.
    pub persisted: bool,
    /// Commanded setpoints keyed by `QUANTITY@channel`.
    pub setpoints: BTreeMap<String, f64>,
    /// Setpoint steps still settling, keyed like `setpoints`.
    pub settling: BTreeMap<String, SettlingStep>,
    /// Signed relative drift; magnitude never decreases within a session.
    pub drift_accumulator: f64,
    /// Temperature above ambient from warm-up, in °C.
    pub temperature_offset: f64,
    /// Simulated operating time since (re)connect.
    pub elapsed_operating_time: Duration,
    /// Simulated operating time since the last calibration.
    pub since_calibration: Duration,
    /// Calls received over the state's lifetime.
    pub call_count: u64,
    /// Operations handled (including failed ones).
    pub operation_count: u64,
    /// Operations that ended in an error.
    pub error_count: u64,
    /// Pending SCPI errors, oldest first.
    pub error_queue: VecDeque<String>,
    /// Fault schedule bookkeeping.
    pub fault_state: FaultState,
    /// This endpoint's generator.
    pub rng: SimRng,
    /// Set by a restore on a disconnected endpoint so the next connect resumes
    /// the restored session instead of starting a new one.
    pub resume_on_connect: bool,
}

impl EndpointState {
    /// Fresh state for a first connect.
    pub fn new(seed: u64) -> Self {
        Self {
            connected: true,
            persisted: false,
            setpoints: BTreeMap::new(),
            settling: BTreeMap::new(),
            drift_accumulator: 0.0,
            temperature_offset: 0.0,
            elapsed_operating_time: Duration::ZERO,
            since_calibration: Duration::ZERO,
            call_count: 0,
            operation_count: 0,
            error_count: 0,
            error_queue: VecDeque::new(),
            fault_state: FaultState::default(),
            rng: SimRng::new(seed),
            resume_on_connect: false,
        }
    }

    /// Start a new session on a kept state: drift, operating time and
    /// temperature start over and outputs are settled; setpoints, counters and
    /// the generator carry on.
    pub fn begin_session(&mut self) {
        self.connected = true;
        if self.resume_on_connect {
            self.resume_on_connect = false;
            return;
        }
        self.drift_accumulator = 0.0;
        self.temperature_offset = 0.0;
        self.elapsed_operating_time = Duration::ZERO;
        self.settling.clear();
    }

    /// Time since the step on `key` started, if it is still tracked.
    pub fn since_step(&self, key: &str) -> Option<(SettlingStep, Duration)> {
        self.settling.get(key).map(|step| {
            (
                *step,
                self.elapsed_operating_time.saturating_sub(step.started_at),
            )
        })
    }

    /// Advance simulated operating time by `dt`.
    pub fn advance(&mut self, dt: Duration, drift: &DriftModel) {
        self.elapsed_operating_time += dt;
        self.since_calibration += dt;
        self.drift_accumulator += drift.increment(dt);
        self.temperature_offset = drift.temperature_at(self.elapsed_operating_time);
    }

    /// Setpoint key.
    pub fn key(quantity: &str, channel: u32) -> String {
        format!("{}@{}", quantity, channel)
    }

    /// Queue a SCPI error, dropping the oldest when full.
    pub fn push_error(&mut self, entry: impl Into<String>) {
        if self.error_queue.len() >= ERROR_QUEUE_CAPACITY {
            self.error_queue.pop_front();
        }
        self.error_queue.push_back(entry.into());
    }

    /// Pop the oldest SCPI error, or the "no error" reply.
    pub fn pop_error(&mut self) -> String {
        self.error_queue
            .pop_front()
            .unwrap_or_else(|| NO_ERROR.to_string())
    }

    /// Whether the calibration interval has elapsed.
    pub fn needs_calibration(&self, drift: &DriftModel) -> bool {
        self.since_calibration > drift.calibration_interval
    }

    /// `max(0.5, 1 - 10 * error_rate)`.
    pub fn reliability(&self) -> f64 {
        if self.operation_count == 0 {
            return 1.0;
        }
        let error_rate = self.error_count as f64 / self.operation_count as f64;
        (1.0 - error_rate * 10.0).max(0.5)
    }

    /// Capture everything needed to rebuild this state.
    pub fn snapshot(&self, address: &EndpointAddress) -> StateSnapshot {
        StateSnapshot {
            address: address.clone(),
            rng_seed: self.rng.seed(),
            rng_word_pos: self.rng.word_pos(),
            setpoints: self.setpoints.clone(),
            settling: self.settling.clone(),
            drift_accumulator: self.drift_accumulator,
            temperature_offset: self.temperature_offset,
            elapsed_operating_time: self.elapsed_operating_time,
            since_calibration: self.since_calibration,
            call_count: self.call_count,
            operation_count: self.operation_count,
            error_count: self.error_count,
            error_queue: self.error_queue.iter().cloned().collect(),
            fault_state: self.fault_state.clone(),
        }
    }

    /// Rebuild a state from a snapshot. The result is disconnected and persisted.
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        Self {
            connected: false,
            persisted: true,
            setpoints: snapshot.setpoints.clone(),
            settling: snapshot.settling.clone(),
            drift_accumulator: snapshot.drift_accumulator,
            temperature_offset: snapshot.temperature_offset,
            elapsed_operating_time: snapshot.elapsed_operating_time,
            since_calibration: snapshot.since_calibration,
            call_count: snapshot.call_count,
            operation_count: snapshot.operation_count,
            error_count: snapshot.error_count,
            error_queue: snapshot.error_queue.iter().cloned().collect(),
            fault_state: snapshot.fault_state.clone(),
            rng: SimRng::at_position(snapshot.rng_seed, snapshot.rng_word_pos),
            resume_on_connect: true,
        }
    }
}

/// A setpoint change the output is still following.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettlingStep {
    /// Output when the step was commanded.
    pub from: f64,
    /// Operating time of the step.
    #[serde(with = "humantime_serde")]
    pub started_at: Duration,
}

/// Serialisable copy of an [`EndpointState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Endpoint the snapshot belongs to.
    pub address: EndpointAddress,
    /// Generator seed.
    pub rng_seed: u64,
    /// Generator stream position.
    pub rng_word_pos: u128,
    /// Setpoints.
    pub setpoints: BTreeMap<String, f64>,
    /// Steps still settling.
    #[serde(default)]
    pub settling: BTreeMap<String, SettlingStep>,
    /// Drift accumulator.
    pub drift_accumulator: f64,
    /// Warm-up temperature offset.
    pub temperature_offset: f64,
    /// Operating time.
    #[serde(with = "humantime_serde")]
    pub elapsed_operating_time: Duration,
    /// Time since calibration.
    #[serde(with = "humantime_serde")]
    pub since_calibration: Duration,
    /// Call counter.
    pub call_count: u64,
    /// Operation counter.
    pub operation_count: u64,
    /// Error counter.
    pub error_count: u64,
    /// Pending SCPI errors.
    pub error_queue: Vec<String>,
    /// Fault bookkeeping.
    pub fault_state: FaultState,
}
