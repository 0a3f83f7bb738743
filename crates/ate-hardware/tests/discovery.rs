//! Integration tests: discovery over simulated and wire endpoints

use ate_core::{EndpointAddress, RecordingSink, RetryEngine, RetryPolicy, TransportErrorKind};
use ate_hardware::*;
use ate_sim::{
    EndpointConfig, FaultSchedule, LayerToggles, SimulationConfig, SimulationEngine,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        jitter_fraction: 0.0,
        timeout_per_attempt: Duration::from_millis(100),
    }
}

fn engine(endpoints: Vec<EndpointConfig>) -> Arc<SimulationEngine> {
    Arc::new(
        SimulationEngine::new(SimulationConfig {
            default_rng_seed: Some(11),
            layers: LayerToggles::faults_only(),
            endpoints,
            ..SimulationConfig::default()
        })
        .unwrap(),
    )
}

fn discoverer(engine: Arc<SimulationEngine>, pool: usize) -> (Discoverer, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let retry = Arc::new(RetryEngine::with_seed(sink.clone(), 7));
    let discoverer = Discoverer::new(
        Arc::new(DefaultTransportFactory::with_simulation(engine)),
        retry,
        DiscoveryOptions {
            worker_pool_size: pool,
            ..DiscoveryOptions::default()
        },
    )
    .unwrap();
    (discoverer, sink)
}

/// A1 answers like a known power supply, A2 answers with an unknown identity,
/// A3 cannot be reached.
#[tokio::test(start_paused = true)]
async fn test_matched_unmatched_and_failed_entries() {
    let engine = engine(vec![
        EndpointConfig::power_supply("a1"),
        EndpointConfig::new("a2", "Acme Corp,Widget 9000,1,1.0"),
        EndpointConfig::power_supply("a3").unreachable(),
    ]);
    let (discoverer, _sink) = discoverer(engine, 2);
    let registry = CapabilityRegistry::with_builtin_profiles();
    let addresses = StaticAddressList::new(["SIM::a1", "SIM::a2", "SIM::a3"]);

    let result = discoverer
        .discover(&registry, &addresses, &policy())
        .await
        .unwrap();

    assert_eq!(result.len(), 3);
    let entries = result.entries();
    assert_eq!(entries[0].address.as_str(), "SIM::a1");
    assert_eq!(entries[0].profile().unwrap().id(), "keysight_e36100");
    assert!(matches!(entries[1].outcome, DiscoveryOutcome::Unmatched { .. }));
    assert_eq!(entries[1].response(), Some("Acme Corp,Widget 9000,1,1.0"));
    let err = entries[2].error().unwrap();
    assert_eq!(err.kind(), Some(TransportErrorKind::Disconnected));
    assert_eq!(err.address().as_str(), "SIM::a3");

    assert_eq!(result.matched().len(), 1);
    assert_eq!(result.unmatched().len(), 1);
    assert_eq!(result.failed().len(), 1);
    assert_eq!(result.by_instrument_type(InstrumentType::PowerSupply).len(), 1);
    assert_eq!(result.by_capability("voltage_control").len(), 1);
    assert!(result.by_capability("spectrum_analysis").is_empty());

    let identity = match &entries[0].outcome {
        DiscoveryOutcome::Matched { identity, .. } => identity.clone().unwrap(),
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(identity.model, "E36103A");
}

#[tokio::test(start_paused = true)]
async fn test_one_entry_per_distinct_address() {
    let engine = engine(vec![
        EndpointConfig::power_supply("psu"),
        EndpointConfig::multimeter("dmm"),
        EndpointConfig::signal_generator("sig"),
        EndpointConfig::spectrum_analyzer("sa"),
    ]);
    let (discoverer, _sink) = discoverer(engine.clone(), 3);
    let registry = CapabilityRegistry::with_builtin_profiles();
    let addresses = StaticAddressList::new([
        "SIM::psu", "SIM::dmm", "SIM::psu", "SIM::sig", "SIM::sa", "SIM::dmm", "SIM::nope",
    ]);

    let result = discoverer
        .discover(&registry, &addresses, &policy())
        .await
        .unwrap();

    let order: Vec<&str> = result.entries().iter().map(|e| e.address.as_str()).collect();
    assert_eq!(order, vec!["SIM::psu", "SIM::dmm", "SIM::sig", "SIM::sa", "SIM::nope"]);
    let profiles: Vec<Option<&str>> = result
        .entries()
        .iter()
        .map(|e| e.profile().map(|p| p.id()))
        .collect();
    assert_eq!(
        profiles,
        vec![
            Some("keysight_e36100"),
            Some("keysight_34461a"),
            Some("rs_sma100a"),
            Some("rs_fsv"),
            None
        ]
    );

    // Probe sessions are closed afterwards.
    for address in ["SIM::psu", "SIM::dmm", "SIM::sig", "SIM::sa"] {
        assert!(!engine.is_connected(&EndpointAddress::new(address)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_registry_order_decides_match() {
    let engine = engine(vec![EndpointConfig::power_supply("psu")]);
    let (discoverer, _sink) = discoverer(engine, 1);
    let addresses = StaticAddressList::new(["SIM::psu"]);

    let mut registry = CapabilityRegistry::new();
    registry
        .register_definition(&ProfileDefinition {
            id: "any_keysight".into(),
            instrument_type: InstrumentType::Other,
            patterns: vec!["Keysight".into()],
            capabilities: vec![],
            channels: 1,
            description: String::new(),
        })
        .unwrap();
    for def in builtin_definitions() {
        registry.register_definition(&def).unwrap();
    }

    let result = discoverer
        .discover(&registry, &addresses, &policy())
        .await
        .unwrap();
    assert_eq!(result.entries()[0].profile().unwrap().id(), "any_keysight");
}

#[tokio::test(start_paused = true)]
async fn test_transient_probe_failures_are_retried() {
    let engine = engine(vec![
        EndpointConfig::multimeter("dmm").with_faults(FaultSchedule::timeouts_first(1))
    ]);
    let (discoverer, sink) = discoverer(engine, 1);
    let registry = CapabilityRegistry::with_builtin_profiles();

    let result = discoverer
        .discover(&registry, &StaticAddressList::new(["SIM::dmm"]), &policy())
        .await
        .unwrap();
    let entry = &result.entries()[0];
    assert_eq!(entry.profile().unwrap().id(), "keysight_34461a");
    // one timed-out attempt, one backoff, one success
    assert!(entry.probe_latency >= Duration::from_millis(105));
    assert_eq!(sink.chosen_delays(), vec![Duration::from_millis(5)]);
}

#[tokio::test(start_paused = true)]
async fn test_session_factory_opens_working_sessions() {
    let engine = engine(vec![EndpointConfig::power_supply("psu")]);
    let (discoverer, _sink) = discoverer(engine, 1);
    let registry = CapabilityRegistry::with_builtin_profiles();
    let result = discoverer
        .discover(&registry, &StaticAddressList::new(["SIM::psu"]), &policy())
        .await
        .unwrap();

    let factory = result.matched()[0].session_factory().unwrap().clone();
    let mut session = factory.open().unwrap();
    session.send("VOLT 3.3").await.unwrap();
    let m = session
        .measure("MEAS:VOLT?", Some(Limits::around(3.3, 0.05)))
        .await
        .unwrap();
    assert_eq!(m.verdict, Verdict::Pass);
    session.close().await;
}

#[tokio::test]
async fn test_enumeration_failure_is_fatal() {
    struct Broken;

    #[async_trait::async_trait]
    impl AddressEnumerator for Broken {
        async fn enumerate(&self) -> Result<Vec<EndpointAddress>, DiscoveryError> {
            Err(DiscoveryError::Enumeration("no bus".into()))
        }
    }

    let (discoverer, _sink) = discoverer(engine(vec![]), 1);
    let registry = CapabilityRegistry::with_builtin_profiles();
    let err = discoverer
        .discover(&registry, &Broken, &policy())
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::Enumeration(_)));
}

/// A loopback socket answering `*IDN?` is classified like a simulated one.
#[tokio::test]
async fn test_discovers_tcp_endpoint() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim() == "*IDN?" {
                write
                    .write_all(b"Keysight Technologies,DSOX1204G,CN1,2.12\n")
                    .await
                    .unwrap();
            }
        }
    });

    let (discoverer, _sink) = discoverer(engine(vec![]), 1);
    let registry = CapabilityRegistry::with_builtin_profiles();
    let address = format!("TCPIP0::127.0.0.1::{}::SOCKET", port);
    let result = discoverer
        .discover(&registry, &StaticAddressList::new([address]), &policy())
        .await
        .unwrap();
    let entry = &result.entries()[0];
    assert_eq!(entry.profile().unwrap().id(), "keysight_dsox1000");
    assert_eq!(
        entry.profile().unwrap().instrument_type(),
        InstrumentType::Oscilloscope
    );
}
