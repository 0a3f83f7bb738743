//! Fault injection for simulated endpoints.
//!
//! A [`FaultSchedule`] is an ordered list of [`FaultRule`]s. Each rule pairs a
//! [`FaultTrigger`] (when to fire) with a [`FaultKind`] (what error to force),
//! optionally restricted to commands with a given prefix. The first rule that
//! fires wins.
//!
//! Injected faults are ordinary transport errors. The retry engine classifies
//! them by kind exactly as it classifies real failures, so a scenario that must
//! not be retried injects `protocol` or a non-recoverable `disconnected`.
//!
//! # Example
//!
//! ```rust,ignore
//! // Two timeouts, then normal behavior.
//! let schedule = FaultSchedule::new(vec![FaultRule::new(
//!     FaultTrigger::FirstN { count: 2 },
//!     FaultKind::Timeout,
//! )]);
//! ```

use crate::rng::SimRng;
use ate_core::TransportError;
use serde::{Deserialize, Serialize};

/// Error forced by a fault rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultKind {
    /// The endpoint stays silent until the attempt times out.
    Timeout,
    /// The link drops.
    Disconnected {
        /// Whether the link can come back on the next attempt.
        #[serde(default = "default_recoverable")]
        recoverable: bool,
    },
    /// The endpoint rejects the command.
    Protocol,
}

fn default_recoverable() -> bool {
    true
}

impl FaultKind {
    /// Transport error for this fault.
    pub fn to_error(&self, detail: &str) -> TransportError {
        match self {
            FaultKind::Timeout => TransportError::timeout(format!("injected timeout: {}", detail)),
            FaultKind::Disconnected { recoverable: true } => {
                TransportError::disconnected(format!("injected link drop: {}", detail))
            }
            FaultKind::Disconnected { recoverable: false } => {
                TransportError::disconnected_permanently(format!(
                    "injected permanent disconnect: {}",
                    detail
                ))
            }
            FaultKind::Protocol => {
                TransportError::protocol(format!("injected protocol error: {}", detail))
            }
        }
    }
}

/// When a rule fires. Counts are over the calls the rule applies to, 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum FaultTrigger {
    /// The first `count` matching calls fail.
    FirstN {
        /// Number of failing calls.
        count: u64,
    },
    /// The listed matching calls fail.
    AtCalls {
        /// 1-based call numbers.
        calls: Vec<u64>,
    },
    /// Every matching call after the first `count` fails.
    AfterN {
        /// Number of calls that succeed first.
        count: u64,
    },
    /// Each matching call fails with this probability, drawn from the endpoint's
    /// own generator.
    Probabilistic {
        /// Failure probability in `[0, 1]`.
        probability: f64,
    },
    /// After `after_calls` matching calls the link is lost for good: every later
    /// call, matching or not, fails with a non-recoverable disconnect until the
    /// state is reset.
    CommunicationLoss {
        /// Calls that succeed before the loss.
        after_calls: u64,
    },
}

/// One entry of a fault schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRule {
    /// Firing condition.
    #[serde(flatten)]
    pub trigger: FaultTrigger,
    /// Forced error. Ignored by `CommunicationLoss`.
    #[serde(default = "default_fault_kind")]
    pub fault: FaultKind,
    /// Case-insensitive command prefix the rule is restricted to.
    #[serde(default)]
    pub command_prefix: Option<String>,
}

fn default_fault_kind() -> FaultKind {
    FaultKind::Timeout
}

impl FaultRule {
    /// Rule applying to every command.
    pub fn new(trigger: FaultTrigger, fault: FaultKind) -> Self {
        Self {
            trigger,
            fault,
            command_prefix: None,
        }
    }

    /// Restrict the rule to commands starting with `prefix`.
    pub fn for_commands(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = Some(prefix.into());
        self
    }

    fn applies_to(&self, command: &str) -> bool {
        match &self.command_prefix {
            None => true,
            Some(prefix) => command
                .trim()
                .to_ascii_uppercase()
                .starts_with(&prefix.to_ascii_uppercase()),
        }
    }
}

/// Ordered fault rules for one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaultSchedule {
    rules: Vec<FaultRule>,
}

impl FaultSchedule {
    /// Schedule with the given rules, evaluated in order.
    pub fn new(rules: Vec<FaultRule>) -> Self {
        Self { rules }
    }

    /// Schedule that never fires.
    pub fn none() -> Self {
        Self::default()
    }

    /// Shorthand: the first `count` calls time out.
    pub fn timeouts_first(count: u64) -> Self {
        Self::new(vec![FaultRule::new(
            FaultTrigger::FirstN { count },
            FaultKind::Timeout,
        )])
    }

    /// Shorthand: every call fails with probability `probability`.
    pub fn random(probability: f64, fault: FaultKind) -> Self {
        Self::new(vec![FaultRule::new(
            FaultTrigger::Probabilistic { probability },
            fault,
        )])
    }

    /// Append a rule.
    pub fn push(&mut self, rule: FaultRule) {
        self.rules.push(rule);
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[FaultRule] {
        &self.rules
    }

    /// True if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check every rule for an incoming command.
    ///
    /// Every applicable rule's counter advances on every call, even when an
    /// earlier rule already fired, so rule timelines do not depend on each other.
    pub fn evaluate(
        &self,
        command: &str,
        state: &mut FaultState,
        rng: &mut SimRng,
    ) -> Option<TransportError> {
        if state.communication_lost {
            return Some(FaultKind::Disconnected { recoverable: false }.to_error("communication lost"));
        }
        if state.rule_hits.len() < self.rules.len() {
            state.rule_hits.resize(self.rules.len(), 0);
        }

        let mut fired: Option<TransportError> = None;
        for (index, rule) in self.rules.iter().enumerate() {
            if !rule.applies_to(command) {
                continue;
            }
            state.rule_hits[index] += 1;
            let n = state.rule_hits[index];

            let fires = match &rule.trigger {
                FaultTrigger::FirstN { count } => n <= *count,
                FaultTrigger::AtCalls { calls } => calls.contains(&n),
                FaultTrigger::AfterN { count } => n > *count,
                FaultTrigger::Probabilistic { probability } => rng.should_fail(*probability),
                FaultTrigger::CommunicationLoss { after_calls } => {
                    if n > *after_calls {
                        state.communication_lost = true;
                    }
                    false
                }
            };
            if fires && fired.is_none() {
                fired = Some(rule.fault.to_error(command.trim()));
            }
        }

        if state.communication_lost && fired.is_none() {
            return Some(FaultKind::Disconnected { recoverable: false }.to_error("communication lost"));
        }
        fired
    }
}

/// Mutable bookkeeping for a schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultState {
    /// Matching-call counter per rule.
    pub rule_hits: Vec<u64>,
    /// Sticky loss set by a `CommunicationLoss` rule.
    pub communication_lost: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ate_core::TransportErrorKind;

    fn run(schedule: &FaultSchedule, commands: &[&str]) -> Vec<Option<TransportErrorKind>> {
        let mut state = FaultState::default();
        let mut rng = SimRng::new(11);
        commands
            .iter()
            .map(|c| schedule.evaluate(c, &mut state, &mut rng).map(|e| e.kind))
            .collect()
    }

    #[test]
    fn test_first_n() {
        let kinds = run(&FaultSchedule::timeouts_first(2), &["A?", "A?", "A?"]);
        assert_eq!(
            kinds,
            vec![
                Some(TransportErrorKind::Timeout),
                Some(TransportErrorKind::Timeout),
                None
            ]
        );
    }

    #[test]
    fn test_at_calls_and_after_n() {
        let at = FaultSchedule::new(vec![FaultRule::new(
            FaultTrigger::AtCalls { calls: vec![2] },
            FaultKind::Protocol,
        )]);
        assert_eq!(
            run(&at, &["X", "X", "X"]),
            vec![None, Some(TransportErrorKind::Protocol), None]
        );

        let after = FaultSchedule::new(vec![FaultRule::new(
            FaultTrigger::AfterN { count: 1 },
            FaultKind::Disconnected { recoverable: true },
        )]);
        assert_eq!(
            run(&after, &["X", "X", "X"]),
            vec![
                None,
                Some(TransportErrorKind::Disconnected),
                Some(TransportErrorKind::Disconnected)
            ]
        );
    }

    #[test]
    fn test_command_prefix_restricts_counting() {
        let schedule = FaultSchedule::new(vec![FaultRule::new(
            FaultTrigger::FirstN { count: 1 },
            FaultKind::Timeout,
        )
        .for_commands("meas")]);
        assert_eq!(
            run(&schedule, &["*IDN?", "MEAS:VOLT?", "MEAS:VOLT?"]),
            vec![None, Some(TransportErrorKind::Timeout), None]
        );
    }

    #[test]
    fn test_communication_loss_is_sticky_and_permanent() {
        let schedule = FaultSchedule::new(vec![FaultRule {
            trigger: FaultTrigger::CommunicationLoss { after_calls: 1 },
            fault: FaultKind::Timeout,
            command_prefix: None,
        }]);
        let mut state = FaultState::default();
        let mut rng = SimRng::new(0);
        assert!(schedule.evaluate("A?", &mut state, &mut rng).is_none());
        for _ in 0..3 {
            let err = schedule.evaluate("A?", &mut state, &mut rng).unwrap();
            assert_eq!(err.kind, TransportErrorKind::Disconnected);
            assert!(!err.recoverable);
        }
    }

    #[test]
    fn test_probabilistic_is_seed_deterministic() {
        let schedule = FaultSchedule::random(0.5, FaultKind::Timeout);
        let commands = vec!["A?"; 64];
        assert_eq!(run(&schedule, &commands), run(&schedule, &commands));
        let failures = run(&schedule, &commands)
            .iter()
            .filter(|k| k.is_some())
            .count();
        assert!(failures > 10 && failures < 54);
    }

    #[test]
    fn test_schedule_from_json() {
        let json = r#"[
            {"trigger": "first_n", "count": 2, "fault": {"kind": "timeout"}},
            {"trigger": "probabilistic", "probability": 0.1,
             "fault": {"kind": "disconnected"}, "command_prefix": "MEAS"}
        ]"#;
        let schedule: FaultSchedule = serde_json::from_str(json).unwrap();
        assert_eq!(schedule.rules().len(), 2);
        assert_eq!(
            schedule.rules()[1].fault,
            FaultKind::Disconnected { recoverable: true }
        );
    }
}
