//! Capability discovery.
//!
//! [`Discoverer::discover`] takes candidate addresses from an
//! [`AddressEnumerator`], probes each one through a short-lived
//! [`InstrumentSession`] and classifies the reply against a
//! [`CapabilityRegistry`]. Probes run concurrently up to
//! `worker_pool_size`; results come back in enumeration order.
//!
//! One bad address never fails the scan. Only a failing enumerator does.

use crate::error::{DiscoveryError, SessionError, SessionResult};
use crate::factory::TransportFactory;
use crate::registry::{CapabilityProfile, CapabilityRegistry, Identity, InstrumentType};
use crate::session::InstrumentSession;
use ate_core::{EndpointAddress, RetryEngine, RetryPolicy, TransportErrorKind};
use ate_sim::SimulationEngine;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

// =============================================================================
// Address enumeration
// =============================================================================

/// Source of candidate addresses. The core performs no bus enumeration itself.
#[async_trait]
pub trait AddressEnumerator: Send + Sync {
    /// Candidate addresses, in scan order.
    async fn enumerate(&self) -> Result<Vec<EndpointAddress>, DiscoveryError>;
}

/// Fixed address list, typically from `discovery.addresses`.
#[derive(Debug, Clone, Default)]
pub struct StaticAddressList(pub Vec<EndpointAddress>);

impl StaticAddressList {
    /// List from anything convertible to addresses.
    pub fn new<I, A>(addresses: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<EndpointAddress>,
    {
        Self(addresses.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl AddressEnumerator for StaticAddressList {
    async fn enumerate(&self) -> Result<Vec<EndpointAddress>, DiscoveryError> {
        Ok(self.0.clone())
    }
}

/// Every endpoint registered with a simulation engine.
#[derive(Debug, Clone)]
pub struct SimulatedAddresses(pub Arc<SimulationEngine>);

#[async_trait]
impl AddressEnumerator for SimulatedAddresses {
    async fn enumerate(&self) -> Result<Vec<EndpointAddress>, DiscoveryError> {
        Ok(self.0.addresses())
    }
}

/// Concatenation of several enumerators. Any failure fails the whole list.
#[derive(Default)]
pub struct ChainedEnumerator(Vec<Box<dyn AddressEnumerator>>);

impl ChainedEnumerator {
    /// Empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an enumerator.
    pub fn with(mut self, enumerator: impl AddressEnumerator + 'static) -> Self {
        self.0.push(Box::new(enumerator));
        self
    }
}

#[async_trait]
impl AddressEnumerator for ChainedEnumerator {
    async fn enumerate(&self) -> Result<Vec<EndpointAddress>, DiscoveryError> {
        let mut all = Vec::new();
        for enumerator in &self.0 {
            all.extend(enumerator.enumerate().await?);
        }
        Ok(all)
    }
}

// =============================================================================
// Options
// =============================================================================

fn default_worker_pool_size() -> usize {
    4
}

fn default_probe_command() -> String {
    "*IDN?".to_string()
}

/// Scan tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    /// Maximum probes in flight.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Identity query sent to every address.
    #[serde(default = "default_probe_command")]
    pub probe_command: String,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            probe_command: default_probe_command(),
        }
    }
}

impl DiscoveryOptions {
    /// Check the options are usable.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.worker_pool_size == 0 {
            return Err(DiscoveryError::InvalidOptions(
                "worker_pool_size must be at least 1".into(),
            ));
        }
        if self.probe_command.trim().is_empty() {
            return Err(DiscoveryError::InvalidOptions(
                "probe_command must not be empty".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Results
// =============================================================================

/// Opens full sessions for a discovered address.
#[derive(Clone)]
pub struct SessionFactory {
    address: EndpointAddress,
    transports: Arc<dyn TransportFactory>,
    retry: Arc<RetryEngine>,
    policy: RetryPolicy,
}

impl SessionFactory {
    /// Address sessions are opened for.
    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// New session under the policy used for discovery.
    pub fn open(&self) -> SessionResult<InstrumentSession> {
        self.open_with_policy(self.policy.clone())
    }

    /// New session under a different policy.
    pub fn open_with_policy(&self, policy: RetryPolicy) -> SessionResult<InstrumentSession> {
        InstrumentSession::open(
            self.transports.as_ref(),
            &self.address,
            policy,
            self.retry.clone(),
        )
    }
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Classification of one address.
#[derive(Debug)]
pub enum DiscoveryOutcome {
    /// A profile matched the probe reply.
    Matched {
        /// First matching profile.
        profile: Arc<CapabilityProfile>,
        /// Raw probe reply.
        response: String,
        /// Parsed identity, when the reply has the standard four fields.
        identity: Option<Identity>,
        /// Opens sessions for this address.
        factory: SessionFactory,
    },
    /// The endpoint answered but no profile matched.
    Unmatched {
        /// Raw probe reply.
        response: String,
    },
    /// The probe failed.
    Failed {
        /// What went wrong.
        error: SessionError,
    },
}

/// One scanned address.
#[derive(Debug)]
pub struct DiscoveryEntry {
    /// Probed address.
    pub address: EndpointAddress,
    /// Classification.
    pub outcome: DiscoveryOutcome,
    /// Time from session open to probe completion (retries included).
    pub probe_latency: Duration,
}

impl DiscoveryEntry {
    /// Matched profile, if any.
    pub fn profile(&self) -> Option<&Arc<CapabilityProfile>> {
        match &self.outcome {
            DiscoveryOutcome::Matched { profile, .. } => Some(profile),
            _ => None,
        }
    }

    /// Session factory for matched entries.
    pub fn session_factory(&self) -> Option<&SessionFactory> {
        match &self.outcome {
            DiscoveryOutcome::Matched { factory, .. } => Some(factory),
            _ => None,
        }
    }

    /// Probe reply, if the endpoint answered.
    pub fn response(&self) -> Option<&str> {
        match &self.outcome {
            DiscoveryOutcome::Matched { response, .. }
            | DiscoveryOutcome::Unmatched { response } => Some(response),
            DiscoveryOutcome::Failed { .. } => None,
        }
    }

    /// Probe error, if the probe failed.
    pub fn error(&self) -> Option<&SessionError> {
        match &self.outcome {
            DiscoveryOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Serialisable summary.
    pub fn report(&self) -> EntryReport {
        let (status, profile, instrument_type, identity, error, error_kind) = match &self.outcome {
            DiscoveryOutcome::Matched {
                profile, identity, ..
            } => (
                EntryStatus::Matched,
                Some(profile.id().to_string()),
                Some(profile.instrument_type()),
                identity.clone(),
                None,
                None,
            ),
            DiscoveryOutcome::Unmatched { .. } => {
                (EntryStatus::Unmatched, None, None, None, None, None)
            }
            DiscoveryOutcome::Failed { error } => (
                EntryStatus::Failed,
                None,
                None,
                None,
                Some(error.to_string()),
                error.kind(),
            ),
        };
        EntryReport {
            address: self.address.clone(),
            status,
            profile,
            instrument_type,
            identity,
            response: self.response().map(str::to_string),
            error,
            error_kind,
            probe_latency: self.probe_latency,
        }
    }
}

/// Entry status in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// A profile matched.
    Matched,
    /// Answered, no profile matched.
    Unmatched,
    /// Probe failed.
    Failed,
}

/// Flat, serialisable view of a [`DiscoveryEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryReport {
    /// Probed address.
    pub address: EndpointAddress,
    /// Status.
    pub status: EntryStatus,
    /// Matched profile id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Matched instrument family.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument_type: Option<InstrumentType>,
    /// Parsed identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    /// Probe reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<TransportErrorKind>,
    /// Probe latency.
    #[serde(with = "humantime_serde")]
    pub probe_latency: Duration,
}

/// Ordered scan result, one entry per distinct address.
#[derive(Debug, Default)]
pub struct DiscoveryResult {
    entries: Vec<DiscoveryEntry>,
}

impl DiscoveryResult {
    /// All entries in enumeration order.
    pub fn entries(&self) -> &[DiscoveryEntry] {
        &self.entries
    }

    /// Consume into entries.
    pub fn into_entries(self) -> Vec<DiscoveryEntry> {
        self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was scanned.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `address`.
    pub fn get(&self, address: &EndpointAddress) -> Option<&DiscoveryEntry> {
        self.entries.iter().find(|e| &e.address == address)
    }

    /// Entries with a matched profile.
    pub fn matched(&self) -> Vec<&DiscoveryEntry> {
        self.entries.iter().filter(|e| e.profile().is_some()).collect()
    }

    /// Matched entries of one instrument family.
    pub fn by_instrument_type(&self, instrument_type: InstrumentType) -> Vec<&DiscoveryEntry> {
        self.entries
            .iter()
            .filter(|e| e.profile().is_some_and(|p| p.instrument_type() == instrument_type))
            .collect()
    }

    /// Matched entries declaring `capability`.
    pub fn by_capability(&self, capability: &str) -> Vec<&DiscoveryEntry> {
        self.entries
            .iter()
            .filter(|e| e.profile().is_some_and(|p| p.has_capability(capability)))
            .collect()
    }

    /// Entries that answered without matching.
    pub fn unmatched(&self) -> Vec<&DiscoveryEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, DiscoveryOutcome::Unmatched { .. }))
            .collect()
    }

    /// Entries whose probe failed.
    pub fn failed(&self) -> Vec<&DiscoveryEntry> {
        self.entries.iter().filter(|e| e.error().is_some()).collect()
    }

    /// Serialisable summaries of every entry.
    pub fn reports(&self) -> Vec<EntryReport> {
        self.entries.iter().map(DiscoveryEntry::report).collect()
    }
}

// =============================================================================
// Discoverer
// =============================================================================

/// Runs discovery scans.
#[derive(Clone)]
pub struct Discoverer {
    transports: Arc<dyn TransportFactory>,
    retry: Arc<RetryEngine>,
    options: DiscoveryOptions,
}

impl Discoverer {
    /// Discoverer building transports through `transports` and reporting via
    /// `retry`'s sink.
    pub fn new(
        transports: Arc<dyn TransportFactory>,
        retry: Arc<RetryEngine>,
        options: DiscoveryOptions,
    ) -> Result<Self, DiscoveryError> {
        options.validate()?;
        Ok(Self {
            transports,
            retry,
            options,
        })
    }

    /// Scan options.
    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Probe every enumerated address and classify it.
    ///
    /// `registry` is borrowed for the whole scan. Duplicate addresses are
    /// probed once, at their first position.
    #[instrument(skip_all, fields(pool = self.options.worker_pool_size))]
    pub async fn discover(
        &self,
        registry: &CapabilityRegistry,
        enumerator: &dyn AddressEnumerator,
        policy: &RetryPolicy,
    ) -> Result<DiscoveryResult, DiscoveryError> {
        let mut seen = HashSet::new();
        let addresses: Vec<EndpointAddress> = enumerator
            .enumerate()
            .await?
            .into_iter()
            .filter(|a| seen.insert(a.clone()))
            .collect();
        info!(addresses = addresses.len(), profiles = registry.len(), "Starting discovery");

        let entries: Vec<DiscoveryEntry> = stream::iter(addresses)
            .map(|address| self.probe(registry, address, policy))
            .buffered(self.options.worker_pool_size.max(1))
            .collect()
            .await;

        let result = DiscoveryResult { entries };
        info!(
            matched = result.matched().len(),
            unmatched = result.unmatched().len(),
            failed = result.failed().len(),
            "Discovery complete"
        );
        Ok(result)
    }

    async fn probe(
        &self,
        registry: &CapabilityRegistry,
        address: EndpointAddress,
        policy: &RetryPolicy,
    ) -> DiscoveryEntry {
        let start = Instant::now();
        let outcome = match InstrumentSession::open(
            self.transports.as_ref(),
            &address,
            policy.clone(),
            self.retry.clone(),
        ) {
            Ok(mut session) => {
                let reply = session.send(&self.options.probe_command).await;
                session.close().await;
                match reply {
                    Ok(response) => self.classify(registry, &address, policy, response),
                    Err(error) => DiscoveryOutcome::Failed { error },
                }
            }
            Err(error) => DiscoveryOutcome::Failed { error },
        };
        let probe_latency = start.elapsed();

        match &outcome {
            DiscoveryOutcome::Matched { profile, .. } => {
                debug!(address = %address, profile = profile.id(), ?probe_latency, "Matched")
            }
            DiscoveryOutcome::Unmatched { response } => {
                debug!(address = %address, response = %response, "No profile matched")
            }
            DiscoveryOutcome::Failed { error } => {
                debug!(address = %address, error = %error, "Probe failed")
            }
        }

        DiscoveryEntry {
            address,
            outcome,
            probe_latency,
        }
    }

    fn classify(
        &self,
        registry: &CapabilityRegistry,
        address: &EndpointAddress,
        policy: &RetryPolicy,
        response: String,
    ) -> DiscoveryOutcome {
        let response = response.trim().to_string();
        match registry.match_response(&response) {
            Some(profile) => DiscoveryOutcome::Matched {
                profile,
                identity: Identity::parse(&response),
                response,
                factory: SessionFactory {
                    address: address.clone(),
                    transports: self.transports.clone(),
                    retry: self.retry.clone(),
                    policy: policy.clone(),
                },
            },
            None => DiscoveryOutcome::Unmatched { response },
        }
    }
}

impl std::fmt::Debug for Discoverer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discoverer")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingEnumerator;

    #[async_trait]
    impl AddressEnumerator for FailingEnumerator {
        async fn enumerate(&self) -> Result<Vec<EndpointAddress>, DiscoveryError> {
            Err(DiscoveryError::Enumeration("bus offline".into()))
        }
    }

    #[test]
    fn test_options_validation() {
        assert!(DiscoveryOptions::default().validate().is_ok());
        let zero = DiscoveryOptions {
            worker_pool_size: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        let blank = DiscoveryOptions {
            probe_command: "  ".into(),
            ..Default::default()
        };
        assert!(blank.validate().is_err());
    }

    #[tokio::test]
    async fn test_chained_enumerator_keeps_order_and_propagates_failure() {
        let chain = ChainedEnumerator::new()
            .with(StaticAddressList::new(["SIM::a", "SIM::b"]))
            .with(StaticAddressList::new(["SIM::c"]));
        let all = chain.enumerate().await.unwrap();
        let names: Vec<&str> = all.iter().map(|a| a.as_str()).collect();
        assert_eq!(names, vec!["SIM::a", "SIM::b", "SIM::c"]);

        let broken = ChainedEnumerator::new()
            .with(StaticAddressList::new(["SIM::a"]))
            .with(FailingEnumerator);
        assert!(broken.enumerate().await.is_err());
    }
}
