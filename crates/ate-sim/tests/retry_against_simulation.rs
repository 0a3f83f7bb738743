//! Integration tests: retry engine driving simulated endpoints
//!
//! These tests exercise the full path from the retry engine through the
//! reporting adapter into the simulation engine, with tokio's clock paused so
//! backoff and latency are exact.

use ate_core::{
    CommContext, CommError, EndpointAddress, EventOutcome, RecordingSink, RetryEngine,
    RetryPolicy, Transport, TransportAdapter, TransportErrorKind,
};
use ate_sim::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        jitter_fraction: 0.0,
        timeout_per_attempt: Duration::from_millis(50),
    }
}

fn setup(endpoint: EndpointConfig) -> (Mutex<TransportAdapter>, RetryEngine, Arc<RecordingSink>, CommContext) {
    let address = endpoint.address();
    let engine = Arc::new(
        SimulationEngine::new(SimulationConfig {
            default_rng_seed: Some(99),
            layers: LayerToggles::faults_only(),
            endpoints: vec![endpoint],
            ..SimulationConfig::default()
        })
        .unwrap(),
    );
    let sink = Arc::new(RecordingSink::new());
    let ctx = CommContext::new(address.clone());
    let adapter = TransportAdapter::new(
        Box::new(SimulatedTransport::new(engine, address)),
        ctx.clone(),
        sink.clone(),
    );
    let retry = RetryEngine::with_seed(sink.clone(), 1);
    (Mutex::new(adapter), retry, sink, ctx)
}

/// Two injected timeouts, then the setpoint comes back on the third attempt.
#[tokio::test(start_paused = true)]
async fn test_timeouts_then_value() {
    let faults = FaultSchedule::new(vec![FaultRule::new(
        FaultTrigger::FirstN { count: 2 },
        FaultKind::Timeout,
    )
    .for_commands("MEAS")]);
    let (adapter, retry, sink, ctx) = setup(EndpointConfig::power_supply("psu").with_faults(faults));
    let p = policy(3);
    let timeout = p.timeout_per_attempt;

    adapter
        .lock()
        .await
        .send("VOLT 5.02", timeout, 1)
        .await
        .unwrap();
    sink.clear();

    let value = retry
        .execute(&ctx, &p, |attempt| {
            let adapter = &adapter;
            async move {
                adapter
                    .lock()
                    .await
                    .send("MEAS:VOLT?", timeout, attempt)
                    .await
            }
        })
        .await
        .unwrap();

    assert_eq!(value, "5.02");
    assert_eq!(sink.exchanges().len(), 3);
    assert_eq!(
        sink.chosen_delays(),
        vec![Duration::from_millis(10), Duration::from_millis(20)]
    );
    let attempts: Vec<u32> = sink.exchanges().iter().map(|e| e.attempt_number).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

/// A protocol fault is permanent: one attempt, no backoff.
#[tokio::test(start_paused = true)]
async fn test_protocol_fault_not_retried() {
    let faults = FaultSchedule::new(vec![FaultRule::new(
        FaultTrigger::FirstN { count: 1 },
        FaultKind::Protocol,
    )]);
    let (adapter, retry, sink, ctx) = setup(EndpointConfig::power_supply("psu").with_faults(faults));
    let p = policy(2);
    let timeout = p.timeout_per_attempt;

    let result = retry
        .execute(&ctx, &p, |attempt| {
            let adapter = &adapter;
            async move {
                adapter
                    .lock()
                    .await
                    .send("MEAS:VOLT?", timeout, attempt)
                    .await
            }
        })
        .await;

    match result {
        Err(CommError::Transport(err)) => assert_eq!(err.kind, TransportErrorKind::Protocol),
        other => panic!("expected protocol error, got {:?}", other),
    }
    assert_eq!(sink.exchanges().len(), 1);
    assert!(sink.chosen_delays().is_empty());
}

/// Unmodelled commands surface as protocol errors and are not retried.
#[tokio::test(start_paused = true)]
async fn test_unconfigured_command_is_protocol_error() {
    let (adapter, retry, sink, ctx) = setup(EndpointConfig::power_supply("psu"));
    let p = policy(5);
    let timeout = p.timeout_per_attempt;

    let result = retry
        .execute(&ctx, &p, |attempt| {
            let adapter = &adapter;
            async move {
                adapter
                    .lock()
                    .await
                    .send("TRIG:SOUR BUS", timeout, attempt)
                    .await
            }
        })
        .await;

    assert_eq!(result.unwrap_err().kind(), TransportErrorKind::Protocol);
    assert_eq!(sink.exchanges().len(), 1);
}

/// A link that never answers in time exhausts the budget after exactly
/// `max_attempts` timeouts, each taking the full attempt timeout.
#[tokio::test(start_paused = true)]
async fn test_slow_endpoint_exhausts_budget() {
    let (adapter, retry, sink, ctx) = setup(
        EndpointConfig::multimeter("dmm").with_latency(Duration::from_secs(1)),
    );
    let p = policy(4);
    let timeout = p.timeout_per_attempt;
    let start = tokio::time::Instant::now();

    let result = retry
        .execute(&ctx, &p, |attempt| {
            let adapter = &adapter;
            async move {
                adapter
                    .lock()
                    .await
                    .send("READ?", timeout, attempt)
                    .await
            }
        })
        .await;

    match result {
        Err(CommError::RetryExhausted { attempts, last_error }) => {
            assert_eq!(attempts, 4);
            assert_eq!(last_error.kind, TransportErrorKind::Timeout);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
    // 4 x 50ms timeouts + 10 + 20 + 40ms backoff
    assert_eq!(start.elapsed(), Duration::from_millis(270));
    let last = sink.retry_decisions().pop().unwrap();
    assert!(matches!(last.outcome, EventOutcome::Exhausted { .. }));
}

/// Same seed, same commands, same time advances: identical replies.
#[tokio::test(start_paused = true)]
async fn test_seeded_runs_repeat() {
    async fn run() -> Vec<String> {
        let engine = Arc::new(
            SimulationEngine::new(SimulationConfig {
                default_rng_seed: Some(2024),
                endpoints: vec![EndpointConfig::signal_generator("sg")],
                ..SimulationConfig::default()
            })
            .unwrap(),
        );
        let address = EndpointAddress::new("SIM::sg");
        let mut link = SimulatedTransport::new(engine.clone(), address.clone());
        let timeout = Duration::from_millis(100);
        link.send("FREQ 2.4e9", timeout).await.unwrap();
        let mut out = Vec::new();
        for _ in 0..4 {
            out.push(link.send("MEAS:FREQ?", timeout).await.unwrap());
            engine.advance(&address, Duration::from_secs(60)).unwrap();
        }
        out
    }

    assert_eq!(run().await, run().await);
}
