//! End-to-end tests: configuration file -> workbench -> sessions and discovery

use ate_core::{CommEventKind, EndpointAddress, EventOutcome, RecordingSink, TransportErrorKind};
use ate_hardware::{InstrumentType, Limits, SessionError, Verdict};
use rust_ate::logging::{self, TracingConfig};
use rust_ate::{AteConfig, AteError, Workbench};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
jitter_seed = 1

[logging]
level = "warn"
format = "json"

[retry]
max_attempts = 3
base_delay = "10ms"
max_delay = "100ms"
jitter_fraction = 0.0
timeout_per_attempt = "100ms"

[discovery]
worker_pool_size = 2

[simulation]
default_rng_seed = 7
command_duration = "10ms"

[[simulation.endpoints]]
name = "psu"
identity = "Keysight Technologies,E36103A,MY1,2.1"
[simulation.endpoints.quantities.VOLT]
channel_kind = "voltage"
default_value = 5.0
[[simulation.endpoints.faults]]
trigger = "first_n"
count = 2
command_prefix = "MEAS"

[[simulation.endpoints]]
name = "dmm"
identity = "Keysight Technologies,34461A,MY2,A.03"
[simulation.endpoints.quantities.RES]
channel_kind = "resistance"
default_value = 1000.0
[[simulation.endpoints.faults]]
trigger = "at_calls"
calls = [1]
fault = { kind = "protocol" }
command_prefix = "MEAS"

[[simulation.endpoints]]
name = "analyzer"
identity = "Rohde&Schwarz,FSV7,101,3.4"
reachable = false
"#;

fn write_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    file
}

fn bench() -> (Workbench, Arc<RecordingSink>) {
    let file = write_config();
    let config = AteConfig::load(Some(file.path())).unwrap();
    let sink = Arc::new(RecordingSink::new());
    (Workbench::new(config, sink.clone()).unwrap(), sink)
}

#[test]
fn test_logging_initialises_from_file_config() {
    let file = write_config();
    let config = AteConfig::load(Some(file.path())).unwrap();
    logging::init_from_config(&config).unwrap();
    // A second install is a no-op.
    logging::init(TracingConfig::default()).unwrap();
}

/// Two timeouts on the measurement, then the value: three attempts with
/// 10ms and 20ms backoff.
#[tokio::test(start_paused = true)]
async fn test_transient_faults_recover_with_exact_backoff() {
    let (bench, sink) = bench();
    let mut psu = bench.open_session(&EndpointAddress::new("SIM::psu")).unwrap();
    psu.connect().await.unwrap();
    sink.clear();

    let m = psu
        .measure("MEAS:VOLT?", Some(Limits::around(5.0, 0.05)))
        .await
        .unwrap();
    assert_eq!(m.verdict, Verdict::Pass);

    let exchanges = sink.exchanges();
    assert_eq!(exchanges.len(), 3);
    assert_eq!(
        exchanges.iter().map(|e| e.attempt_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(
        sink.chosen_delays(),
        vec![Duration::from_millis(10), Duration::from_millis(20)]
    );
}

/// A protocol fault is permanent: one attempt regardless of budget.
#[tokio::test(start_paused = true)]
async fn test_permanent_fault_fails_immediately() {
    let (bench, sink) = bench();
    let mut dmm = bench.open_session(&EndpointAddress::new("SIM::dmm")).unwrap();
    dmm.connect().await.unwrap();
    sink.clear();

    let err = dmm.send("MEAS:RES?").await.unwrap_err();
    assert_eq!(err.kind(), Some(TransportErrorKind::Protocol));
    assert_eq!(sink.exchanges().len(), 1);
    let decisions = sink.retry_decisions();
    assert_eq!(decisions.len(), 1);
    assert!(matches!(decisions[0].outcome, EventOutcome::Permanent { .. }));

    // The next call goes through.
    let value = dmm.query_f64("MEAS:RES?").await.unwrap();
    assert!((value - 1000.0).abs() < 50.0, "{}", value);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_classifies_configured_endpoints() {
    let (bench, _sink) = bench();
    let result = bench.discover().await.unwrap();

    assert_eq!(result.len(), 3);
    assert_eq!(result.matched().len(), 2);
    assert_eq!(result.failed().len(), 1);
    assert_eq!(
        result.by_instrument_type(InstrumentType::DigitalMultimeter).len(),
        1
    );
    let failed = result.failed()[0];
    assert_eq!(failed.address.as_str(), "SIM::analyzer");
    assert!(matches!(
        failed.error(),
        Some(SessionError::Comm { .. })
    ));

    let json = serde_json::to_value(result.reports()).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 3);
    assert!(json
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["status"] == "failed" && r["error_kind"] == "disconnected"));
}

#[tokio::test(start_paused = true)]
async fn test_events_export_as_json_lines() {
    let (bench, sink) = bench();
    let mut psu = bench.open_session(&EndpointAddress::new("SIM::psu")).unwrap();
    psu.send("*IDN?").await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    sink.write_json_lines(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let events: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(events.len(), sink.len());
    for event in &events {
        assert_eq!(event["endpoint_address"], "SIM::psu");
        assert_eq!(
            event["correlation_id"],
            psu.correlation_id().to_string().as_str()
        );
    }
    assert!(sink
        .events()
        .iter()
        .any(|e| e.kind == CommEventKind::RetryDecision));
}

/// Persisted state survives a disconnect and can be written to disk and
/// restored into a fresh process.
#[tokio::test(start_paused = true)]
async fn test_simulation_snapshots_round_trip_through_files() {
    let (bench, _sink) = bench();
    let address = EndpointAddress::new("SIM::psu");
    let mut psu = bench.open_session(&address).unwrap();
    psu.send("VOLT 3.3").await.unwrap();
    bench.simulation().persist(&address, true).unwrap();
    psu.close().await;

    let dir = tempfile::tempdir().unwrap();
    let written = bench.simulation().save_snapshots(dir.path()).unwrap();
    assert_eq!(written.len(), 1);

    let (fresh, _sink) = self::bench();
    assert_eq!(fresh.simulation().load_snapshots(dir.path()).unwrap(), 1);
    let mut psu = fresh.open_session(&address).unwrap();
    let setpoint = psu.query_f64("VOLT?").await.unwrap();
    assert_eq!(setpoint, 3.3);
}

#[test]
fn test_invalid_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"[retry]\nmax_attempts = 0\n").unwrap();
    let err = AteConfig::load(Some(file.path())).unwrap_err();
    let err: AteError = err.into();
    assert!(err.to_string().contains("max_attempts"), "{}", err);
}

#[test]
fn test_shipped_config_is_valid() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/ate.toml");
    let config = AteConfig::load(Some(&path)).unwrap();
    assert_eq!(config.simulation.endpoints.len(), 3);
    assert_eq!(config.profiles[0].id, "acme_load");
}
