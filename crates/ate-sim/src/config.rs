//! Simulation configuration.
//!
//! This is the `[simulation]` section of the application config. Each
//! `[[simulation.endpoints]]` entry describes one simulated instrument: what it
//! answers to `*IDN?`, which quantities it models, and how its physics and
//! faults behave.
//!
//! ```toml
//! [simulation]
//! default_rng_seed = 42
//! command_duration = "10ms"
//!
//! [simulation.noise_stddev_per_channel_kind]
//! voltage = 0.001
//!
//! [[simulation.endpoints]]
//! name = "psu1"
//! identity = "Keysight Technologies,E36103A,MY00000001,1.0.0"
//!
//! [simulation.endpoints.quantities.VOLT]
//! default_value = 0.0
//! channel_kind = "voltage"
//! unit = "V"
//! ```

use crate::error::SimulationConfigError;
use crate::faults::FaultSchedule;
use crate::response::{BehaviorProfile, ResponseModel};
use ate_core::EndpointAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Address scheme prefix for simulated endpoints.
pub const SIM_SCHEME: &str = "SIM";

/// Which model layers contribute to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerToggles {
    /// Gaussian measurement noise.
    pub noise: bool,
    /// Time-proportional drift, thermal warm-up and calibration aging.
    pub drift: bool,
    /// Scheduled fault injection.
    pub faults: bool,
    /// Quadratic linearity and offset errors.
    pub nonlinearity: bool,
    /// Step response after setpoint changes.
    pub settling: bool,
    /// Rolloff beyond the bandwidth, where the endpoint models a frequency.
    pub frequency_response: bool,
}

impl Default for LayerToggles {
    fn default() -> Self {
        Self {
            noise: true,
            drift: true,
            faults: true,
            nonlinearity: true,
            settling: true,
            frequency_response: true,
        }
    }
}

impl LayerToggles {
    /// Base values only: no noise, no drift, no faults.
    pub fn ideal() -> Self {
        Self {
            noise: false,
            drift: false,
            faults: false,
            nonlinearity: false,
            settling: false,
            frequency_response: false,
        }
    }

    /// Faults only, so responses are exact setpoint echoes.
    pub fn faults_only() -> Self {
        Self {
            faults: true,
            ..Self::ideal()
        }
    }
}

/// One physical quantity an endpoint models (voltage, current, frequency, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityModel {
    /// Value before any setpoint has been commanded.
    #[serde(default)]
    pub default_value: f64,
    /// Channel kind; selects the noise level from
    /// `noise_stddev_per_channel_kind`.
    pub channel_kind: String,
    /// Explicit noise standard deviation, overriding the channel-kind table.
    #[serde(default)]
    pub noise_stddev: Option<f64>,
    /// Display unit.
    #[serde(default)]
    pub unit: Option<String>,
    /// Measurement range for the nonlinearity layer. Ten times the reading
    /// when unset.
    #[serde(default)]
    pub full_scale: Option<f64>,
}

impl QuantityModel {
    /// Quantity of the given channel kind with a default value.
    pub fn new(channel_kind: impl Into<String>, default_value: f64) -> Self {
        Self {
            default_value,
            channel_kind: channel_kind.into(),
            noise_stddev: None,
            unit: None,
            full_scale: None,
        }
    }

    /// With a display unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// With an explicit noise level.
    pub fn with_noise(mut self, stddev: f64) -> Self {
        self.noise_stddev = Some(stddev);
        self
    }

    /// With a measurement range.
    pub fn with_full_scale(mut self, full_scale: f64) -> Self {
        self.full_scale = Some(full_scale);
        self
    }
}

/// Sign of the long-term drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftDirection {
    /// Readings creep upwards.
    #[default]
    Up,
    /// Readings creep downwards.
    Down,
}

impl DriftDirection {
    fn sign(self) -> f64 {
        match self {
            DriftDirection::Up => 1.0,
            DriftDirection::Down => -1.0,
        }
    }
}

/// Slow bias, thermal warm-up and calibration aging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftModel {
    /// Relative drift per second of operating time.
    pub rate_per_second: f64,
    /// Direction of the drift.
    pub direction: DriftDirection,
    /// Temperature rise above ambient once fully warmed up, in °C.
    pub warmup_rise_celsius: f64,
    /// Thermal time constant of the warm-up.
    #[serde(with = "humantime_serde")]
    pub warmup_time_constant: Duration,
    /// Operating time after which the endpoint reports itself warmed up.
    #[serde(with = "humantime_serde")]
    pub warmup_time: Duration,
    /// Temperature coefficient in ppm of reading per °C.
    pub temp_coefficient_ppm: f64,
    /// Operating time between calibrations before aging sets in.
    #[serde(with = "humantime_serde")]
    pub calibration_interval: Duration,
    /// Bound on the relative calibration error once overdue.
    pub calibration_error: f64,
}

impl Default for DriftModel {
    fn default() -> Self {
        Self {
            rate_per_second: 1e-4,
            direction: DriftDirection::Up,
            warmup_rise_celsius: 5.0,
            warmup_time_constant: Duration::from_secs(10),
            warmup_time: Duration::from_secs(30),
            temp_coefficient_ppm: 100.0,
            calibration_interval: Duration::from_secs(24 * 3600),
            calibration_error: 0.002,
        }
    }
}

impl DriftModel {
    /// Signed drift increment over `dt`.
    pub fn increment(&self, dt: Duration) -> f64 {
        self.direction.sign() * self.rate_per_second.abs() * dt.as_secs_f64()
    }

    /// Temperature offset after `elapsed` operating time.
    pub fn temperature_at(&self, elapsed: Duration) -> f64 {
        let tau = self.warmup_time_constant.as_secs_f64();
        if tau <= 0.0 {
            return self.warmup_rise_celsius;
        }
        self.warmup_rise_celsius * (1.0 - (-elapsed.as_secs_f64() / tau).exp())
    }
}

/// One simulated instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Endpoint name; the address is `SIM::<name>`.
    pub name: String,
    /// Reply to `*IDN?`.
    pub identity: String,
    /// Modelled quantities keyed by SCPI header (e.g. `VOLT`, `CURR`, `FREQ`).
    #[serde(default)]
    pub quantities: BTreeMap<String, QuantityModel>,
    /// Seed for this endpoint's generator. Derived from the default seed when
    /// absent.
    #[serde(default)]
    pub rng_seed: Option<u64>,
    /// Fault schedule.
    #[serde(default)]
    pub faults: FaultSchedule,
    /// Reply latency.
    #[serde(default, with = "humantime_serde")]
    pub latency: Duration,
    /// Drift, warm-up and calibration behavior.
    #[serde(default)]
    pub drift: DriftModel,
    /// Settling, nonlinearity and frequency response.
    #[serde(default)]
    pub response: ResponseModel,
    /// When false, connecting fails with a permanent disconnect.
    #[serde(default = "default_true")]
    pub reachable: bool,
    /// Reply to `*TST?` (0 = pass).
    #[serde(default)]
    pub self_test_result: i32,
    /// Samples returned by trace queries.
    #[serde(default = "default_trace_points")]
    pub trace_points: usize,
    /// Quantity sampled by trace queries. Defaults to the first configured one.
    #[serde(default)]
    pub trace_quantity: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_trace_points() -> usize {
    256
}

impl EndpointConfig {
    /// Endpoint with no quantities.
    pub fn new(name: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity: identity.into(),
            quantities: BTreeMap::new(),
            rng_seed: None,
            faults: FaultSchedule::none(),
            latency: Duration::ZERO,
            drift: DriftModel::default(),
            response: ResponseModel::default(),
            reachable: true,
            self_test_result: 0,
            trace_points: default_trace_points(),
            trace_quantity: None,
        }
    }

    /// Single-output DC power supply (`VOLT`, `CURR`).
    pub fn power_supply(name: impl Into<String>) -> Self {
        Self::new(name, "Keysight Technologies,E36103A,MY00000001,2.1.0")
            .with_quantity("VOLT", QuantityModel::new("voltage", 0.0).with_unit("V"))
            .with_quantity("CURR", QuantityModel::new("current", 0.0).with_unit("A"))
            .with_profile(BehaviorProfile::PowerSupply)
    }

    /// 6.5 digit digital multimeter (`VOLT`, `CURR`, `RES`).
    pub fn multimeter(name: impl Into<String>) -> Self {
        Self::new(name, "Keysight Technologies,34461A,MY00000002,A.03.01")
            .with_multimeter_quantities()
            .with_profile(BehaviorProfile::BenchtopMultimeter)
    }

    /// 7.5 digit reference multimeter.
    pub fn precision_multimeter(name: impl Into<String>) -> Self {
        Self::new(name, "Keysight Technologies,3458A,MY00000003,A.09.02")
            .with_multimeter_quantities()
            .with_profile(BehaviorProfile::PrecisionMultimeter)
    }

    /// Handheld multimeter.
    pub fn handheld_multimeter(name: impl Into<String>) -> Self {
        Self::new(name, "Keysight Technologies,U1282A,MY00000004,1.04")
            .with_multimeter_quantities()
            .with_profile(BehaviorProfile::HandheldMultimeter)
    }

    /// Oscilloscope (`VOLT`; traces of `VOLT`).
    pub fn oscilloscope(name: impl Into<String>) -> Self {
        Self::new(name, "Keysight Technologies,DSOX1204G,CN00000005,2.12")
            .with_quantity("VOLT", QuantityModel::new("voltage", 0.0).with_unit("V"))
            .with_trace_quantity("VOLT")
            .with_profile(BehaviorProfile::Oscilloscope)
    }

    /// Signal generator (`FREQ`, `POW`). Output power rolls off above 1 GHz.
    pub fn signal_generator(name: impl Into<String>) -> Self {
        Self::new(name, "Rohde&Schwarz,SMA100A,100001,3.1.19")
            .with_quantity("FREQ", QuantityModel::new("frequency", 1.0e9).with_unit("Hz"))
            .with_quantity("POW", QuantityModel::new("power", -10.0).with_unit("dBm"))
            .with_profile(BehaviorProfile::SignalGenerator)
    }

    fn with_multimeter_quantities(self) -> Self {
        self.with_quantity("VOLT", QuantityModel::new("voltage", 0.0).with_unit("V"))
            .with_quantity("CURR", QuantityModel::new("current", 0.0).with_unit("A"))
            .with_quantity("RES", QuantityModel::new("resistance", 1000.0).with_unit("Ohm"))
    }

    /// Apply a profile's noise, temperature coefficient and response to this
    /// endpoint and every quantity configured so far.
    pub fn with_profile(mut self, profile: BehaviorProfile) -> Self {
        let figures = profile.figures();
        for quantity in self.quantities.values_mut() {
            quantity.noise_stddev = Some(figures.noise_stddev);
        }
        self.drift.temp_coefficient_ppm = figures.temp_coefficient_ppm;
        self.response = figures.response;
        self
    }

    /// With explicit response parameters.
    pub fn with_response(mut self, response: ResponseModel) -> Self {
        self.response = response;
        self
    }

    /// Spectrum analyzer (`FREQ`, `POW`; traces of `POW`).
    pub fn spectrum_analyzer(name: impl Into<String>) -> Self {
        Self::new(name, "Rohde&Schwarz,FSV7,101234,3.40")
            .with_quantity("POW", QuantityModel::new("power", -40.0).with_unit("dBm"))
            .with_quantity("FREQ", QuantityModel::new("frequency", 1.0e9).with_unit("Hz"))
            .with_trace_quantity("POW")
    }

    /// Quantity sampled by trace queries.
    pub fn with_trace_quantity(mut self, header: impl Into<String>) -> Self {
        self.trace_quantity = Some(header.into().to_ascii_uppercase());
        self
    }

    /// Add or replace a quantity.
    pub fn with_quantity(mut self, header: impl Into<String>, model: QuantityModel) -> Self {
        self.quantities
            .insert(header.into().to_ascii_uppercase(), model);
        self
    }

    /// With a fault schedule.
    pub fn with_faults(mut self, faults: FaultSchedule) -> Self {
        self.faults = faults;
        self
    }

    /// With a fixed seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// With a reply latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// With a drift model.
    pub fn with_drift(mut self, drift: DriftModel) -> Self {
        self.drift = drift;
        self
    }

    /// Mark the endpoint as unreachable.
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// `SIM::<name>`.
    pub fn address(&self) -> EndpointAddress {
        EndpointAddress::new(format!("{}::{}", SIM_SCHEME, self.name))
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), SimulationConfigError> {
        if self.name.trim().is_empty() {
            return Err(SimulationConfigError::Invalid(
                "endpoint name must not be empty".into(),
            ));
        }
        if self.name.contains("::") {
            return Err(SimulationConfigError::Invalid(format!(
                "endpoint name '{}' must not contain '::'",
                self.name
            )));
        }
        for (header, q) in &self.quantities {
            if let Some(full_scale) = q.full_scale {
                if !full_scale.is_finite() || full_scale <= 0.0 {
                    return Err(SimulationConfigError::Invalid(format!(
                        "{}: full_scale for {} must be positive",
                        self.name, header
                    )));
                }
            }
            if let Some(stddev) = q.noise_stddev {
                if stddev < 0.0 || !stddev.is_finite() {
                    return Err(SimulationConfigError::Invalid(format!(
                        "{}: noise_stddev for {} must be a finite non-negative number",
                        self.name, header
                    )));
                }
            }
        }
        if !(0.0..=1.0).contains(&self.drift.calibration_error) {
            return Err(SimulationConfigError::Invalid(format!(
                "{}: calibration_error must be within [0, 1]",
                self.name
            )));
        }
        self.response.validate(&self.name)
    }
}

/// The `[simulation]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed shared by endpoints without their own. `None` means derive one from
    /// the wall clock at startup.
    pub default_rng_seed: Option<u64>,
    /// Noise standard deviation per channel kind.
    pub noise_stddev_per_channel_kind: BTreeMap<String, f64>,
    /// Simulated operating time consumed by one command.
    #[serde(with = "humantime_serde")]
    pub command_duration: Duration,
    /// Layer toggles.
    pub layers: LayerToggles,
    /// Simulated endpoints.
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let noise = [
            ("voltage", 1e-3),
            ("current", 1e-4),
            ("resistance", 1e-2),
            ("frequency", 1.0),
            ("power", 0.05),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            default_rng_seed: None,
            noise_stddev_per_channel_kind: noise,
            command_duration: Duration::from_millis(10),
            layers: LayerToggles::default(),
            endpoints: Vec::new(),
        }
    }
}

impl SimulationConfig {
    /// Check every endpoint plus the noise table.
    pub fn validate(&self) -> Result<(), SimulationConfigError> {
        for (kind, stddev) in &self.noise_stddev_per_channel_kind {
            if *stddev < 0.0 || !stddev.is_finite() {
                return Err(SimulationConfigError::Invalid(format!(
                    "noise_stddev_per_channel_kind.{} must be a finite non-negative number",
                    kind
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            endpoint.validate()?;
            if !seen.insert(endpoint.name.to_ascii_lowercase()) {
                return Err(SimulationConfigError::Invalid(format!(
                    "duplicate simulated endpoint '{}'",
                    endpoint.name
                )));
            }
        }
        Ok(())
    }

    /// Noise level for a quantity: its explicit override, else its channel kind's
    /// entry, else zero.
    pub fn noise_for(&self, quantity: &QuantityModel) -> f64 {
        quantity.noise_stddev.unwrap_or_else(|| {
            self.noise_stddev_per_channel_kind
                .get(&quantity.channel_kind)
                .copied()
                .unwrap_or(0.0)
        })
    }
}
