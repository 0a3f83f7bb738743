//! The behavioral simulation engine.
//!
//! One engine serves every simulated endpoint of a run. Each endpoint has its
//! own [`EndpointState`], created on first connect and dropped on disconnect
//! unless the caller asked for it to persist.
//!
//! A response is computed from these layers:
//!
//! 1. **Base value**: the last commanded setpoint, or the configured default
//! 2. **Settling**: the output follows a setpoint step over `settling_time`
//! 3. **Frequency response**: rolloff set by the endpoint's frequency setpoint
//! 4. **Nonlinearity**: quadratic error and offset relative to full scale
//! 5. **Noise**: Gaussian, stddev chosen by the quantity's channel kind
//! 6. **Drift**: time-proportional bias plus thermal warm-up and calibration aging
//! 7. **Faults**: a per-endpoint schedule that replaces the reply with an error
//!
//! Every call first advances the endpoint's operating time by the configured
//! command duration, faulted calls included. Given the same seed, the same
//! command sequence and the same explicit time advances, responses repeat
//! exactly.

use crate::command::{self, SimCommand};
use crate::config::{EndpointConfig, QuantityModel, SimulationConfig, SIM_SCHEME};
use crate::error::{SimulationConfigError, SnapshotError};
use crate::rng::derive_seed;
use crate::response::ResponseModel;
use crate::state::{EndpointState, SettlingStep, StateSnapshot};
use ate_core::{block, EndpointAddress, TransportError};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// SCPI error queued for commands the endpoint cannot model.
pub const UNDEFINED_HEADER: &str = "-113,\"Undefined header\"";
/// SCPI error queued for unparseable arguments.
pub const DATA_TYPE_ERROR: &str = "-104,\"Data type error\"";

const FREQUENCY_KIND: &str = "frequency";
const POWER_KIND: &str = "power";

/// Snapshot file suffix.
const SNAPSHOT_SUFFIX: &str = "_state.json";

/// Health and bookkeeping of one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStatus {
    /// Endpoint address.
    pub address: EndpointAddress,
    /// Link up.
    pub connected: bool,
    /// State kept across disconnects.
    pub persisted: bool,
    /// Warm-up time reached.
    pub warmed_up: bool,
    /// Calibration interval exceeded.
    pub needs_calibration: bool,
    /// Operating time since (re)connect.
    #[serde(with = "humantime_serde")]
    pub elapsed_operating_time: Duration,
    /// Drift accumulator.
    pub drift_accumulator: f64,
    /// Warm-up temperature offset.
    pub temperature_offset: f64,
    /// Operations handled.
    pub operation_count: u64,
    /// Operations that failed.
    pub error_count: u64,
    /// `max(0.5, 1 - 10 * error_rate)`.
    pub reliability: f64,
    /// Entries waiting in the SCPI error queue.
    pub pending_errors: usize,
}

/// Aggregate over all endpoints with live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    /// Registered endpoints.
    pub registered_endpoints: usize,
    /// Endpoints with a live link.
    pub connected_endpoints: usize,
    /// Operations across all states.
    pub total_operations: u64,
    /// Failed operations across all states.
    pub total_errors: u64,
    /// Share of successful operations.
    pub overall_reliability: f64,
    /// Endpoints past their calibration interval.
    pub endpoints_needing_calibration: usize,
}

/// Shared simulation engine.
pub struct SimulationEngine {
    settings: SimulationConfig,
    default_seed: u64,
    endpoints: RwLock<BTreeMap<EndpointAddress, Arc<EndpointConfig>>>,
    states: Mutex<HashMap<EndpointAddress, EndpointState>>,
}

impl SimulationEngine {
    /// Build an engine and register every configured endpoint.
    ///
    /// Without `default_rng_seed` the seed comes from the wall clock.
    pub fn new(settings: SimulationConfig) -> Result<Self, SimulationConfigError> {
        settings.validate()?;
        let default_seed = settings.default_rng_seed.unwrap_or_else(wall_clock_seed);
        let engine = Self {
            default_seed,
            endpoints: RwLock::new(BTreeMap::new()),
            states: Mutex::new(HashMap::new()),
            settings,
        };
        for endpoint in engine.settings.endpoints.clone() {
            engine.register_endpoint(endpoint)?;
        }
        info!(
            endpoints = engine.endpoints.read().len(),
            seed = default_seed,
            "Simulation engine ready"
        );
        Ok(engine)
    }

    /// Seed shared by endpoints without their own.
    pub fn default_seed(&self) -> u64 {
        self.default_seed
    }

    /// Engine settings.
    pub fn settings(&self) -> &SimulationConfig {
        &self.settings
    }

    /// Add or replace an endpoint definition. Live state is left untouched.
    pub fn register_endpoint(
        &self,
        endpoint: EndpointConfig,
    ) -> Result<EndpointAddress, SimulationConfigError> {
        endpoint.validate()?;
        let address = endpoint.address();
        debug!(address = %address, "Registering simulated endpoint");
        self.endpoints
            .write()
            .insert(address.clone(), Arc::new(endpoint));
        Ok(address)
    }

    /// All registered addresses, sorted.
    pub fn addresses(&self) -> Vec<EndpointAddress> {
        self.endpoints.read().keys().cloned().collect()
    }

    /// Definition of one endpoint.
    pub fn endpoint(&self, address: &EndpointAddress) -> Option<Arc<EndpointConfig>> {
        self.endpoints.read().get(&normalize(address)).cloned()
    }

    /// Reply latency configured for an endpoint.
    pub fn latency(&self, address: &EndpointAddress) -> Duration {
        self.endpoint(address)
            .map(|e| e.latency)
            .unwrap_or(Duration::ZERO)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Bring an endpoint's link up, creating its state on first connect.
    ///
    /// Reconnecting a kept state starts a new session (drift and operating time
    /// reset). Unknown or unreachable endpoints fail with a permanent disconnect.
    pub fn connect(&self, address: &EndpointAddress) -> Result<(), TransportError> {
        let key = normalize(address);
        let endpoint = self.endpoint(&key).ok_or_else(|| {
            TransportError::disconnected_permanently(format!("no simulated endpoint at '{}'", key))
        })?;
        if !endpoint.reachable {
            return Err(TransportError::disconnected_permanently(format!(
                "simulated endpoint '{}' is unreachable",
                key
            )));
        }

        let mut states = self.states.lock();
        match states.get_mut(&key) {
            Some(state) if state.fault_state.communication_lost => {
                Err(TransportError::disconnected_permanently(format!(
                    "communication with '{}' lost",
                    key
                )))
            }
            Some(state) if state.connected => Ok(()),
            Some(state) => {
                state.begin_session();
                info!(address = %key, "Simulated endpoint reconnected");
                Ok(())
            }
            None => {
                let seed = endpoint
                    .rng_seed
                    .unwrap_or_else(|| derive_seed(self.default_seed, key.as_str()));
                states.insert(key.clone(), EndpointState::new(seed));
                info!(address = %key, seed, "Simulated endpoint connected");
                Ok(())
            }
        }
    }

    /// Take an endpoint's link down. Its state is dropped unless persisted.
    pub fn disconnect(&self, address: &EndpointAddress) {
        let key = normalize(address);
        let mut states = self.states.lock();
        let drop_state = match states.get_mut(&key) {
            Some(state) if state.persisted => {
                state.connected = false;
                false
            }
            Some(_) => true,
            None => false,
        };
        if drop_state {
            states.remove(&key);
        }
        debug!(address = %key, kept = !drop_state, "Simulated endpoint disconnected");
    }

    /// Whether the endpoint's link is up.
    pub fn is_connected(&self, address: &EndpointAddress) -> bool {
        self.states
            .lock()
            .get(&normalize(address))
            .map(|s| s.connected)
            .unwrap_or(false)
    }

    /// Keep (or stop keeping) an endpoint's state across disconnects.
    pub fn persist(
        &self,
        address: &EndpointAddress,
        persisted: bool,
    ) -> Result<(), SimulationConfigError> {
        self.with_state(address, |state, _| state.persisted = persisted)
    }

    // =========================================================================
    // Responses
    // =========================================================================

    /// Compute the text reply to `command`.
    ///
    /// Write-only commands reply with an empty string. Trace queries answer with
    /// comma-separated values.
    pub fn respond(&self, address: &EndpointAddress, command: &str) -> Result<String, TransportError> {
        self.process(address, command, |this, endpoint, state, parsed| {
            this.execute(endpoint, state, parsed, command)
        })
    }

    /// Compute the binary reply to a trace query: a definite-length block of
    /// little-endian `f32` samples.
    pub fn respond_binary(
        &self,
        address: &EndpointAddress,
        command: &str,
    ) -> Result<Bytes, TransportError> {
        self.process(address, command, |this, endpoint, state, parsed| match parsed {
            SimCommand::Trace => {
                let samples = this.trace(endpoint, state, command)?;
                let payload = block::encode_f32_le(samples.into_iter().map(|v| v as f32));
                Ok(block::encode(&payload))
            }
            _ => Err(SimulationConfigError::UnsupportedCommand {
                command: command.trim().to_string(),
            }),
        })
    }

    fn process<T>(
        &self,
        address: &EndpointAddress,
        command: &str,
        handler: impl FnOnce(
            &Self,
            &EndpointConfig,
            &mut EndpointState,
            SimCommand,
        ) -> Result<T, SimulationConfigError>,
    ) -> Result<T, TransportError> {
        let key = normalize(address);
        let endpoint = self.endpoint(&key).ok_or_else(|| {
            TransportError::disconnected_permanently(format!("no simulated endpoint at '{}'", key))
        })?;

        let mut states = self.states.lock();
        let state = match states.get_mut(&key) {
            Some(state) if state.connected => state,
            _ => {
                return Err(TransportError::disconnected(format!(
                    "simulated endpoint '{}' not connected",
                    key
                )))
            }
        };

        state.call_count += 1;
        state.operation_count += 1;
        state.advance(self.settings.command_duration, &endpoint.drift);

        if self.settings.layers.faults {
            if let Some(err) = endpoint
                .faults
                .evaluate(command, &mut state.fault_state, &mut state.rng)
            {
                state.error_count += 1;
                if err.kind == ate_core::TransportErrorKind::Disconnected {
                    state.connected = false;
                }
                warn!(address = %key, command, error = %err, "Injected fault");
                return Err(err);
            }
        }

        let result = match command::parse(command) {
            Ok(parsed) => handler(self, endpoint.as_ref(), state, parsed),
            Err(err) => Err(err),
        };
        match result {
            Ok(value) => {
                debug!(address = %key, command, "Simulated reply");
                Ok(value)
            }
            Err(err) => {
                state.error_count += 1;
                let entry = match err {
                    SimulationConfigError::InvalidValue { .. } => DATA_TYPE_ERROR,
                    _ => UNDEFINED_HEADER,
                };
                state.push_error(entry);
                debug!(address = %key, command, error = %err, "Command not modelled");
                Err(err.into())
            }
        }
    }

    fn execute(
        &self,
        endpoint: &EndpointConfig,
        state: &mut EndpointState,
        parsed: SimCommand,
        command: &str,
    ) -> Result<String, SimulationConfigError> {
        let reply = match parsed {
            SimCommand::Identify => endpoint.identity.clone(),
            SimCommand::Reset => {
                state.setpoints.clear();
                state.settling.clear();
                String::new()
            }
            SimCommand::ClearStatus => {
                state.error_queue.clear();
                String::new()
            }
            SimCommand::OperationCompleteQuery => "1".to_string(),
            SimCommand::Synchronize => String::new(),
            SimCommand::SelfTest => endpoint.self_test_result.to_string(),
            SimCommand::NextError => state.pop_error(),
            SimCommand::Trace => self
                .trace(endpoint, state, command)?
                .iter()
                .map(|v| format_value(*v))
                .collect::<Vec<_>>()
                .join(","),
            SimCommand::Read => {
                let (header, model) = primary_quantity(endpoint, command)?;
                format_value(self.measure(endpoint, state, header, model, 1))
            }
            SimCommand::Measure { quantity, channel } => {
                let (header, model) = resolve_quantity(endpoint, &quantity, command)?;
                format_value(self.measure(endpoint, state, header, model, channel))
            }
            SimCommand::QuerySetpoint { quantity, channel } => {
                let (header, model) = resolve_quantity(endpoint, &quantity, command)?;
                format_value(base_value(state, header, model, channel))
            }
            SimCommand::SetSetpoint {
                quantity,
                channel,
                value,
            } => {
                let (header, model) = resolve_quantity(endpoint, &quantity, command)?;
                let key = EndpointState::key(header, channel);
                if self.settings.layers.settling && !endpoint.response.settling_time.is_zero() {
                    let from = self.settled_value(endpoint, state, header, model, channel);
                    state.settling.insert(
                        key.clone(),
                        SettlingStep {
                            from,
                            started_at: state.elapsed_operating_time,
                        },
                    );
                }
                state.setpoints.insert(key, value);
                String::new()
            }
        };
        Ok(reply)
    }

    /// One measured value: base, then noise, then drift.
    fn measure(
        &self,
        endpoint: &EndpointConfig,
        state: &mut EndpointState,
        header: &str,
        model: &QuantityModel,
        channel: u32,
    ) -> f64 {
        let layers = self.settings.layers;
        let response = &endpoint.response;
        let mut output = self.settled_value(endpoint, state, header, model, channel);

        if layers.frequency_response && model.channel_kind != FREQUENCY_KIND {
            if let Some(frequency) = frequency_setpoint(endpoint, state, channel) {
                let db = response.attenuation_db(frequency);
                if model.channel_kind == POWER_KIND {
                    output += db;
                } else {
                    output *= 10f64.powf(db / 20.0);
                }
            }
        }
        if layers.nonlinearity {
            if let Some(full_scale) = ResponseModel::full_scale(output, model.full_scale) {
                let mut error = response.linearity_term(output, full_scale);
                if response.offset_error > 0.0 {
                    error += response.offset_error * full_scale * state.rng.gaussian(0.3);
                }
                output += error;
            }
        }

        let mut value = output;
        if layers.noise {
            value += state.rng.gaussian(self.settings.noise_for(model));
        }
        if layers.drift {
            let drift = &endpoint.drift;
            value += output * state.drift_accumulator;
            value += output * drift.temp_coefficient_ppm * 1e-6 * state.temperature_offset;
            if state.needs_calibration(drift) {
                value *= 1.0 + state.rng.symmetric(drift.calibration_error);
            }
        }
        value
    }

    /// Output the endpoint is driving now: the setpoint, or a point on the
    /// step response while it settles. Finished steps are dropped.
    fn settled_value(
        &self,
        endpoint: &EndpointConfig,
        state: &mut EndpointState,
        header: &str,
        model: &QuantityModel,
        channel: u32,
    ) -> f64 {
        let target = base_value(state, header, model, channel);
        if !self.settings.layers.settling {
            return target;
        }
        let key = EndpointState::key(header, channel);
        match state.since_step(&key) {
            Some((step, since)) if since < endpoint.response.settling_time => {
                endpoint.response.settle(step.from, target, since)
            }
            Some(_) => {
                state.settling.remove(&key);
                target
            }
            None => target,
        }
    }

    fn trace(
        &self,
        endpoint: &EndpointConfig,
        state: &mut EndpointState,
        command: &str,
    ) -> Result<Vec<f64>, SimulationConfigError> {
        let (header, model) = match &endpoint.trace_quantity {
            Some(q) => resolve_quantity(endpoint, q, command)?,
            None => primary_quantity(endpoint, command)?,
        };
        Ok((0..endpoint.trace_points)
            .map(|_| self.measure(endpoint, state, header, model, 1))
            .collect())
    }

    // =========================================================================
    // Time, calibration, status
    // =========================================================================

    /// Advance one endpoint's operating time between commands.
    pub fn advance(
        &self,
        address: &EndpointAddress,
        dt: Duration,
    ) -> Result<(), SimulationConfigError> {
        self.with_state(address, |state, endpoint| state.advance(dt, &endpoint.drift))
    }

    /// Advance every live endpoint's operating time.
    pub fn advance_all(&self, dt: Duration) {
        let endpoints = self.endpoints.read();
        for (address, state) in self.states.lock().iter_mut() {
            if let Some(endpoint) = endpoints.get(address) {
                state.advance(dt, &endpoint.drift);
            }
        }
    }

    /// Restart an endpoint's calibration clock. Drift is not touched.
    pub fn calibrate(&self, address: &EndpointAddress) -> Result<(), SimulationConfigError> {
        self.with_state(address, |state, _| state.since_calibration = Duration::ZERO)?;
        info!(address = %normalize(address), "Simulated endpoint calibrated");
        Ok(())
    }

    /// Current drift accumulator, if the endpoint has live state.
    pub fn drift_accumulator(&self, address: &EndpointAddress) -> Option<f64> {
        self.states
            .lock()
            .get(&normalize(address))
            .map(|s| s.drift_accumulator)
    }

    /// Status of one endpoint with live state.
    pub fn status(&self, address: &EndpointAddress) -> Result<EndpointStatus, SimulationConfigError> {
        let key = normalize(address);
        self.with_state(&key, |state, endpoint| EndpointStatus {
            address: key.clone(),
            connected: state.connected,
            persisted: state.persisted,
            warmed_up: state.elapsed_operating_time >= endpoint.drift.warmup_time,
            needs_calibration: state.needs_calibration(&endpoint.drift),
            elapsed_operating_time: state.elapsed_operating_time,
            drift_accumulator: state.drift_accumulator,
            temperature_offset: state.temperature_offset,
            operation_count: state.operation_count,
            error_count: state.error_count,
            reliability: state.reliability(),
            pending_errors: state.error_queue.len(),
        })
    }

    /// Aggregate statistics.
    pub fn statistics(&self) -> EngineStatistics {
        let endpoints = self.endpoints.read();
        let states = self.states.lock();
        let total_operations: u64 = states.values().map(|s| s.operation_count).sum();
        let total_errors: u64 = states.values().map(|s| s.error_count).sum();
        let needing = states
            .iter()
            .filter(|(addr, s)| {
                endpoints
                    .get(*addr)
                    .map(|e| s.needs_calibration(&e.drift))
                    .unwrap_or(false)
            })
            .count();
        EngineStatistics {
            registered_endpoints: endpoints.len(),
            connected_endpoints: states.values().filter(|s| s.connected).count(),
            total_operations,
            total_errors,
            overall_reliability: total_operations.saturating_sub(total_errors) as f64
                / total_operations.max(1) as f64,
            endpoints_needing_calibration: needing,
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Snapshot of one endpoint's state.
    pub fn snapshot(&self, address: &EndpointAddress) -> Result<StateSnapshot, SimulationConfigError> {
        let key = normalize(address);
        self.with_state(&key, |state, _| state.snapshot(&key))
    }

    /// Replace an endpoint's state with a snapshot.
    ///
    /// A connected endpoint continues in the restored state; a disconnected one
    /// resumes it on the next connect.
    pub fn restore(&self, snapshot: &StateSnapshot) -> Result<(), SimulationConfigError> {
        let key = normalize(&snapshot.address);
        if self.endpoint(&key).is_none() {
            return Err(SimulationConfigError::UnknownEndpoint(key));
        }
        let mut restored = EndpointState::from_snapshot(snapshot);
        let mut states = self.states.lock();
        if states.get(&key).map(|s| s.connected).unwrap_or(false) {
            restored.connected = true;
            restored.resume_on_connect = false;
        }
        states.insert(key, restored);
        Ok(())
    }

    /// Write every live state to `<dir>/<name>_state.json`.
    pub fn save_snapshots(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, SnapshotError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let snapshots: Vec<StateSnapshot> = {
            let states = self.states.lock();
            states.iter().map(|(addr, s)| s.snapshot(addr)).collect()
        };
        let mut written = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let path = dir.join(snapshot_file_name(&snapshot.address));
            std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
            written.push(path);
        }
        info!(count = written.len(), dir = %dir.display(), "Saved simulation snapshots");
        Ok(written)
    }

    /// Restore every `*_state.json` snapshot found in `dir`.
    pub fn load_snapshots(&self, dir: impl AsRef<Path>) -> Result<usize, SnapshotError> {
        let dir = dir.as_ref();
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(SNAPSHOT_SUFFIX))
                .unwrap_or(false);
            if !is_snapshot {
                continue;
            }
            let snapshot: StateSnapshot = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            self.restore(&snapshot)?;
            loaded += 1;
        }
        info!(count = loaded, dir = %dir.display(), "Loaded simulation snapshots");
        Ok(loaded)
    }

    fn with_state<R>(
        &self,
        address: &EndpointAddress,
        f: impl FnOnce(&mut EndpointState, &EndpointConfig) -> R,
    ) -> Result<R, SimulationConfigError> {
        let key = normalize(address);
        let endpoint = self
            .endpoint(&key)
            .ok_or_else(|| SimulationConfigError::UnknownEndpoint(key.clone()))?;
        let mut states = self.states.lock();
        let state = states
            .get_mut(&key)
            .ok_or(SimulationConfigError::UnknownEndpoint(key))?;
        Ok(f(state, &*endpoint))
    }
}

impl std::fmt::Debug for SimulationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationEngine")
            .field("default_seed", &self.default_seed)
            .field("endpoints", &self.endpoints.read().len())
            .field("live_states", &self.states.lock().len())
            .finish()
    }
}

/// `sim::Name` -> `SIM::Name`, so scheme case does not matter.
fn normalize(address: &EndpointAddress) -> EndpointAddress {
    match address.as_str().split_once("::") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case(SIM_SCHEME) => {
            EndpointAddress::new(format!("{}::{}", SIM_SCHEME, rest))
        }
        _ => address.clone(),
    }
}

fn snapshot_file_name(address: &EndpointAddress) -> String {
    let name: String = address
        .segments()
        .join("_")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}{}", name, SNAPSHOT_SUFFIX)
}

fn wall_clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Find the configured quantity a header refers to. Short and long SCPI forms
/// match each other (`VOLT` / `VOLTAGE`).
fn resolve_quantity<'a>(
    endpoint: &'a EndpointConfig,
    header: &str,
    command: &str,
) -> Result<(&'a str, &'a QuantityModel), SimulationConfigError> {
    let wanted = header.to_ascii_uppercase();
    endpoint
        .quantities
        .iter()
        .find(|(key, _)| {
            let key = key.to_ascii_uppercase();
            key == wanted
                || (key.len() >= 3 && wanted.starts_with(&key))
                || (wanted.len() >= 3 && key.starts_with(&wanted))
        })
        .map(|(key, model)| (key.as_str(), model))
        .ok_or_else(|| SimulationConfigError::UnknownQuantity {
            quantity: header.to_string(),
            command: command.trim().to_string(),
        })
}

fn primary_quantity<'a>(
    endpoint: &'a EndpointConfig,
    command: &str,
) -> Result<(&'a str, &'a QuantityModel), SimulationConfigError> {
    endpoint
        .quantities
        .iter()
        .next()
        .map(|(key, model)| (key.as_str(), model))
        .ok_or_else(|| SimulationConfigError::UnsupportedCommand {
            command: command.trim().to_string(),
        })
}

fn base_value(state: &EndpointState, header: &str, model: &QuantityModel, channel: u32) -> f64 {
    state
        .setpoints
        .get(&EndpointState::key(header, channel))
        .copied()
        .unwrap_or(model.default_value)
}

/// Frequency the endpoint is set to, when it models one.
fn frequency_setpoint(endpoint: &EndpointConfig, state: &EndpointState, channel: u32) -> Option<f64> {
    endpoint
        .quantities
        .iter()
        .find(|(_, model)| model.channel_kind == FREQUENCY_KIND)
        .map(|(header, model)| base_value(state, header, model, channel))
}

fn format_value(value: f64) -> String {
    format!("{}", value)
}
