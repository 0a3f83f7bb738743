//! Static accuracy and dynamic response of a simulated instrument.
//!
//! Three effects sit between the commanded setpoint and the reading:
//!
//! - **Settling**: after a setpoint change the output approaches the new value
//!   along a step response with a short overshoot, reaching it after
//!   `settling_time` of simulated operating time.
//! - **Nonlinearity**: a quadratic error of `linearity_error` of full scale at
//!   full scale, plus a random offset of `offset_error` of full scale.
//! - **Frequency response**: beyond the -3 dB bandwidth the reading rolls off
//!   by `rolloff_db_per_decade`.
//!
//! All three are inert at their defaults, so endpoints configured without a
//! `response` table behave as pure setpoint echoes.

use crate::error::SimulationConfigError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::time::Duration;

/// Share of the settling window spent in the initial overshoot.
const OVERSHOOT_PHASE: f64 = 0.3;

/// Response parameters of one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseModel {
    /// Quadratic error at full scale, as a fraction of full scale.
    pub linearity_error: f64,
    /// Standard deviation scale of the per-reading offset, as a fraction of
    /// full scale.
    pub offset_error: f64,
    /// Time for a commanded step to settle.
    #[serde(with = "humantime_serde")]
    pub settling_time: Duration,
    /// Peak overshoot as a fraction of the step.
    pub overshoot: f64,
    /// -3 dB bandwidth in Hz. Unset means flat response.
    pub bandwidth_3db_hz: Option<f64>,
    /// Attenuation beyond the bandwidth, in dB per decade.
    pub rolloff_db_per_decade: f64,
}

impl Default for ResponseModel {
    fn default() -> Self {
        Self {
            linearity_error: 0.0,
            offset_error: 0.0,
            settling_time: Duration::ZERO,
            overshoot: 0.05,
            bandwidth_3db_hz: None,
            rolloff_db_per_decade: 20.0,
        }
    }
}

impl ResponseModel {
    /// Output `since_step` after a step from `from` to `target`.
    pub fn settle(&self, from: f64, target: f64, since_step: Duration) -> f64 {
        let window = self.settling_time.as_secs_f64();
        if window <= 0.0 {
            return target;
        }
        let progress = since_step.as_secs_f64() / window;
        if progress >= 1.0 {
            return target;
        }
        let overshoot = if progress < OVERSHOOT_PHASE {
            1.0 + self.overshoot * (progress * PI / OVERSHOOT_PHASE).sin()
        } else {
            1.0 + self.overshoot * (-(progress - OVERSHOOT_PHASE) * 5.0).exp()
        };
        let approach = 1.0 - (-3.0 * progress).exp();
        from + (target - from) * approach * overshoot
    }

    /// Full scale used for `value`: the configured range, else ten times the
    /// reading. `None` when neither gives a positive range.
    pub fn full_scale(value: f64, configured: Option<f64>) -> Option<f64> {
        let scale = configured.unwrap_or(value.abs() * 10.0);
        (scale > 0.0 && scale.is_finite()).then_some(scale)
    }

    /// Quadratic linearity error at `value` for the given full scale.
    pub fn linearity_term(&self, value: f64, full_scale: f64) -> f64 {
        let normalized = value / full_scale;
        self.linearity_error * full_scale * normalized * normalized
    }

    /// Attenuation in dB (zero or negative) at `frequency_hz`.
    pub fn attenuation_db(&self, frequency_hz: f64) -> f64 {
        match self.bandwidth_3db_hz {
            Some(bandwidth) if frequency_hz > bandwidth => {
                -self.rolloff_db_per_decade * (frequency_hz / bandwidth).log10()
            }
            _ => 0.0,
        }
    }

    /// Check parameter ranges.
    pub fn validate(&self, endpoint: &str) -> Result<(), SimulationConfigError> {
        let fractions = [
            ("linearity_error", self.linearity_error),
            ("offset_error", self.offset_error),
            ("overshoot", self.overshoot),
            ("rolloff_db_per_decade", self.rolloff_db_per_decade),
        ];
        for (name, value) in fractions {
            if !value.is_finite() || value < 0.0 {
                return Err(SimulationConfigError::Invalid(format!(
                    "{}: response.{} must be a finite non-negative number",
                    endpoint, name
                )));
            }
        }
        if let Some(bandwidth) = self.bandwidth_3db_hz {
            if !bandwidth.is_finite() || bandwidth <= 0.0 {
                return Err(SimulationConfigError::Invalid(format!(
                    "{}: response.bandwidth_3db_hz must be positive",
                    endpoint
                )));
            }
        }
        Ok(())
    }
}

/// Instrument classes with typical accuracy and response figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorProfile {
    /// 7.5 digit reference multimeter.
    PrecisionMultimeter,
    /// 6.5 digit benchtop multimeter.
    BenchtopMultimeter,
    /// Portable handheld multimeter.
    HandheldMultimeter,
    /// Digital storage oscilloscope.
    Oscilloscope,
    /// RF signal generator.
    SignalGenerator,
    /// DC power supply.
    PowerSupply,
}

/// Figures behind a [`BehaviorProfile`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileFigures {
    /// Noise standard deviation applied to every quantity.
    pub noise_stddev: f64,
    /// Temperature coefficient in ppm per °C.
    pub temp_coefficient_ppm: f64,
    /// Response parameters.
    pub response: ResponseModel,
}

impl BehaviorProfile {
    /// Typical figures for this class.
    pub fn figures(self) -> ProfileFigures {
        let (noise_stddev, temp_coefficient_ppm, settling_ms, bandwidth, linearity) = match self {
            BehaviorProfile::PrecisionMultimeter => (1e-4, 10.0, 500, 1e3, 0.001),
            BehaviorProfile::BenchtopMultimeter => (1e-3, 50.0, 200, 1e4, 0.005),
            BehaviorProfile::HandheldMultimeter => (1e-2, 200.0, 100, 1e3, 0.02),
            BehaviorProfile::Oscilloscope => (2e-3, 100.0, 10, 100e6, 0.01),
            BehaviorProfile::SignalGenerator => (5e-4, 50.0, 50, 1e9, 0.005),
            BehaviorProfile::PowerSupply => (1e-3, 100.0, 200, 1e3, 0.01),
        };
        ProfileFigures {
            noise_stddev,
            temp_coefficient_ppm,
            response: ResponseModel {
                linearity_error: linearity,
                offset_error: 0.001,
                settling_time: Duration::from_millis(settling_ms),
                bandwidth_3db_hz: Some(bandwidth),
                ..ResponseModel::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settling(ms: u64) -> ResponseModel {
        ResponseModel {
            settling_time: Duration::from_millis(ms),
            ..ResponseModel::default()
        }
    }

    #[test]
    fn test_defaults_are_inert() {
        let r = ResponseModel::default();
        assert_eq!(r.settle(0.0, 5.0, Duration::ZERO), 5.0);
        assert_eq!(r.linearity_term(5.0, 10.0), 0.0);
        assert_eq!(r.attenuation_db(1e12), 0.0);
    }

    #[test]
    fn test_step_approaches_then_settles() {
        let r = settling(100);
        let early = r.settle(0.0, 10.0, Duration::from_millis(5));
        assert!(early > 0.0 && early < 10.0, "{}", early);
        let late = r.settle(0.0, 10.0, Duration::from_millis(90));
        assert!(late > 9.0 && late < 10.0, "{}", late);
        assert_eq!(r.settle(0.0, 10.0, Duration::from_millis(100)), 10.0);
        assert_eq!(r.settle(0.0, 10.0, Duration::from_secs(5)), 10.0);
    }

    #[test]
    fn test_quadratic_error_at_full_scale() {
        let r = ResponseModel {
            linearity_error: 0.01,
            ..ResponseModel::default()
        };
        assert!((r.linearity_term(10.0, 10.0) - 0.1).abs() < 1e-12);
        assert!((r.linearity_term(5.0, 10.0) - 0.025).abs() < 1e-12);
        assert!((r.linearity_term(-10.0, 10.0) - 0.1).abs() < 1e-12);
        assert_eq!(ResponseModel::full_scale(2.0, None), Some(20.0));
        assert_eq!(ResponseModel::full_scale(0.0, None), None);
    }

    #[test]
    fn test_rolloff_per_decade() {
        let r = ResponseModel {
            bandwidth_3db_hz: Some(1e6),
            ..ResponseModel::default()
        };
        assert_eq!(r.attenuation_db(1e3), 0.0);
        assert!((r.attenuation_db(1e7) + 20.0).abs() < 1e-9);
        assert!((r.attenuation_db(1e8) + 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_validation() {
        assert!(ResponseModel::default().validate("x").is_ok());
        let bad = ResponseModel {
            linearity_error: f64::NAN,
            ..ResponseModel::default()
        };
        assert!(bad.validate("x").is_err());
        let bad = ResponseModel {
            bandwidth_3db_hz: Some(0.0),
            ..ResponseModel::default()
        };
        assert!(bad.validate("x").is_err());
    }

    #[test]
    fn test_profiles_order_by_precision() {
        let precise = BehaviorProfile::PrecisionMultimeter.figures();
        let handheld = BehaviorProfile::HandheldMultimeter.figures();
        assert!(precise.noise_stddev < handheld.noise_stddev);
        assert!(precise.response.linearity_error < handheld.response.linearity_error);
        assert!(precise.response.settling_time > handheld.response.settling_time);
    }
}
