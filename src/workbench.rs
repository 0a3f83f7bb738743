//! Process-level wiring.
//!
//! A [`Workbench`] is built once from [`AteConfig`] and owns the pieces every
//! test run shares: the simulation engine, the transport factory, the retry
//! engine with its communication sink, and the capability registry.

use crate::config::AteConfig;
use crate::error::{AppResult, ConfigError};
use ate_core::{CommContext, CommError, EndpointAddress, RetryEngine, RetryPolicy, SharedSink};
use ate_hardware::{
    AddressEnumerator, CapabilityProfile, CapabilityRegistry, ChainedEnumerator,
    DefaultTransportFactory, Discoverer, DiscoveryResult, InstrumentSession, SessionError,
    SimulatedAddresses, StaticAddressList, TransportFactory,
};
use ate_sim::SimulationEngine;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Shared state for one process.
pub struct Workbench {
    config: AteConfig,
    simulation: Arc<SimulationEngine>,
    transports: Arc<DefaultTransportFactory>,
    retry: Arc<RetryEngine>,
    registry: CapabilityRegistry,
    run_id: Option<Uuid>,
}

impl Workbench {
    /// Wire everything from a validated configuration.
    ///
    /// Configured `[[profiles]]` are placed ahead of the built-in ones, in file
    /// order, so they win over vendor wildcards.
    pub fn new(config: AteConfig, sink: SharedSink) -> AppResult<Self> {
        let simulation = Arc::new(SimulationEngine::new(config.simulation.clone())?);
        let transports = Arc::new(DefaultTransportFactory::with_simulation(simulation.clone()));
        let retry = Arc::new(match config.jitter_seed {
            Some(seed) => RetryEngine::with_seed(sink, seed),
            None => RetryEngine::new(sink),
        });

        let mut registry = CapabilityRegistry::with_builtin_profiles();
        for def in config.profiles.iter().rev() {
            let profile = CapabilityProfile::from_definition(def).map_err(ConfigError::from)?;
            registry.register_profile_first(profile);
        }

        info!(
            simulated = simulation.addresses().len(),
            profiles = registry.len(),
            seed = simulation.default_seed(),
            "Workbench ready"
        );

        Ok(Self {
            config,
            simulation,
            transports,
            retry,
            registry,
            run_id: None,
        })
    }

    /// Tag every session opened from now on with `run_id` instead of a fresh id.
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AteConfig {
        &self.config
    }

    /// Simulation engine.
    pub fn simulation(&self) -> &Arc<SimulationEngine> {
        &self.simulation
    }

    /// Capability registry.
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Mutable registry, for registering profiles before scanning.
    pub fn registry_mut(&mut self) -> &mut CapabilityRegistry {
        &mut self.registry
    }

    /// Retry engine shared by all sessions.
    pub fn retry(&self) -> &Arc<RetryEngine> {
        &self.retry
    }

    /// Default session policy (`[retry]`).
    pub fn policy(&self) -> &RetryPolicy {
        &self.config.retry
    }

    /// Open a session under the default policy.
    pub fn open_session(&self, address: &EndpointAddress) -> AppResult<InstrumentSession> {
        self.open_session_with(address, self.config.retry.clone())
    }

    /// Open a session under `policy`.
    pub fn open_session_with(
        &self,
        address: &EndpointAddress,
        policy: RetryPolicy,
    ) -> AppResult<InstrumentSession> {
        let transport = self.transports.create(address).map_err(|e| SessionError::Comm {
            address: address.clone(),
            source: CommError::Transport(e),
        })?;
        let context = match self.run_id {
            Some(id) => CommContext::with_correlation_id(address.clone(), id),
            None => CommContext::new(address.clone()),
        };
        Ok(InstrumentSession::with_context(
            transport,
            context,
            policy,
            self.retry.clone(),
        ))
    }

    /// Scan `discovery.addresses` and, if enabled, every simulated endpoint.
    pub async fn discover(&self) -> AppResult<DiscoveryResult> {
        let discovery = &self.config.discovery;
        let mut enumerator = ChainedEnumerator::new().with(StaticAddressList::new(
            discovery.addresses.iter().map(String::as_str),
        ));
        if discovery.include_simulated {
            enumerator = enumerator.with(SimulatedAddresses(self.simulation.clone()));
        }
        self.discover_with(&enumerator).await
    }

    /// Scan the addresses `enumerator` yields.
    pub async fn discover_with(
        &self,
        enumerator: &dyn AddressEnumerator,
    ) -> AppResult<DiscoveryResult> {
        let transports: Arc<dyn TransportFactory> = self.transports.clone();
        let discoverer =
            Discoverer::new(transports, self.retry.clone(), self.config.discovery.options())?;
        Ok(discoverer
            .discover(&self.registry, enumerator, &self.config.retry)
            .await?)
    }
}

impl std::fmt::Debug for Workbench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workbench")
            .field("profiles", &self.registry.len())
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ate_core::RecordingSink;
    use ate_hardware::{InstrumentType, Limits, Verdict};
    use tracing_test::traced_test;

    const CONFIG: &str = r#"
        jitter_seed = 3

        [retry]
        max_attempts = 3
        base_delay = "10ms"
        max_delay = "100ms"
        jitter_fraction = 0.0
        timeout_per_attempt = "200ms"

        [simulation]
        default_rng_seed = 42

        [simulation.layers]
        noise = false
        drift = false
        faults = true

        [[simulation.endpoints]]
        name = "psu1"
        identity = "Keysight Technologies,E36103A,MY1,2.1"
        [simulation.endpoints.quantities.VOLT]
        channel_kind = "voltage"

        [[simulation.endpoints]]
        name = "bench_load"
        identity = "ACME,LOAD-300,7,1.0"
        [simulation.endpoints.quantities.CURR]
        channel_kind = "current"

        [[profiles]]
        id = "acme_load"
        instrument_type = "other"
        patterns = ["ACME", "LOAD-\\d+"]
        capabilities = ["electronic_load"]
    "#;

    fn bench() -> (Workbench, Arc<RecordingSink>) {
        let config = AteConfig::from_toml_str(CONFIG).unwrap();
        let sink = Arc::new(RecordingSink::new());
        (Workbench::new(config, sink.clone()).unwrap(), sink)
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_discover_configured_simulation() {
        let (bench, _sink) = bench();
        assert!(logs_contain("Workbench ready"));

        let result = bench.discover().await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(
            result.by_instrument_type(InstrumentType::PowerSupply)[0]
                .address
                .as_str(),
            "SIM::psu1"
        );
        assert_eq!(
            result.by_capability("electronic_load")[0].address.as_str(),
            "SIM::bench_load"
        );
    }

    #[test]
    fn test_configured_profiles_precede_builtins() {
        let (bench, _sink) = bench();
        assert_eq!(bench.registry().profiles()[0].id(), "acme_load");
        assert_eq!(bench.registry().len(), ate_hardware::builtin_definitions().len() + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_id_tags_every_session() {
        let (bench, sink) = bench();
        let run_id = Uuid::new_v4();
        let bench = bench.with_run_id(run_id);

        let mut psu = bench.open_session(&EndpointAddress::new("SIM::psu1")).unwrap();
        psu.send("VOLT 12").await.unwrap();
        let m = psu
            .measure("MEAS:VOLT?", Some(Limits::around(12.0, 0.1)))
            .await
            .unwrap();
        assert_eq!(m.verdict, Verdict::Pass);
        assert_eq!(m.correlation_id, run_id);

        let mut load = bench
            .open_session(&EndpointAddress::new("SIM::bench_load"))
            .unwrap();
        load.identify().await.unwrap();

        assert!(!sink.is_empty());
        assert_eq!(sink.for_correlation(run_id).len(), sink.len());
    }

    #[test]
    fn test_unknown_scheme_is_a_session_error() {
        let (bench, _sink) = bench();
        let err = bench
            .open_session(&EndpointAddress::new("GPIB0::5::INSTR"))
            .unwrap_err();
        assert!(matches!(err, crate::AteError::Session(_)));
        assert!(err.to_string().contains("GPIB0::5::INSTR"));
    }
}
