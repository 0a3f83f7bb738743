//! Command-line entry point for rust-ate.
//!
//! ```bash
//! rust_ate discover                       # scan configured + simulated endpoints
//! rust_ate discover --json
//! rust_ate query SIM::psu1 '*IDN?'
//! rust_ate measure SIM::psu1 'MEAS:VOLT?' --low 4.9 --high 5.1
//! ```
//!
//! Every command accepts `--config <file>` and `--events <file>` (JSON-lines log
//! of every exchange and retry decision).

use anyhow::{Context, Result};
use ate_core::{block, EndpointAddress, RecordingSink, SharedSink, TeeSink, TracingSink};
use ate_hardware::{
    ChainedEnumerator, EntryStatus, Limits, SimulatedAddresses, StaticAddressList, Verdict,
};
use clap::{Parser, Subcommand};
use rust_ate::config::LogFormat;
use rust_ate::logging::{self, TracingConfig};
use rust_ate::{AteConfig, Workbench};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "rust_ate")]
#[command(about = "Resilient instrument communication for automated test", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/ate.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override logging.level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override logging.format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    /// Log span open/close events
    #[arg(long, global = true)]
    log_spans: bool,

    /// Disable colored log output
    #[arg(long, global = true)]
    no_color: bool,

    /// Write every communication event to this file as JSON lines
    #[arg(long, global = true)]
    events: Option<PathBuf>,

    /// Correlation id shared by every session of this run
    #[arg(long, global = true)]
    run_id: Option<Uuid>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every known address and classify it by capability profile
    Discover {
        /// Extra addresses to scan
        #[arg(long = "address")]
        addresses: Vec<String>,

        /// Skip simulated endpoints
        #[arg(long)]
        no_simulated: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Send one command through a session and print the reply
    Query {
        /// Endpoint address
        address: String,
        /// Command text
        command: String,
        /// Treat the reply as a definite-length binary block
        #[arg(long)]
        binary: bool,
    },

    /// Query a numeric value and check it against limits
    Measure {
        /// Endpoint address
        address: String,
        /// Query returning a number
        command: String,
        /// Lowest passing value
        #[arg(long)]
        low: Option<f64>,
        /// Highest passing value
        #[arg(long)]
        high: Option<f64>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AteConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    let mut log_options =
        TracingConfig::from_logging_config(&config.logging)?.with_ansi(!cli.no_color);
    if let Some(format) = cli.log_format {
        log_options = log_options.with_format(format);
    }
    if cli.log_spans {
        log_options = log_options.with_span_events(true);
    }
    logging::init(log_options)?;

    let recorder = cli.events.as_ref().map(|_| Arc::new(RecordingSink::new()));
    let sink: SharedSink = match &recorder {
        Some(r) => Arc::new(TeeSink::new(vec![Arc::new(TracingSink), r.clone()])),
        None => Arc::new(TracingSink),
    };

    let mut bench = Workbench::new(config, sink)?;
    if let Some(id) = cli.run_id {
        bench = bench.with_run_id(id);
    }

    let outcome = run(&bench, cli.command).await;

    if let (Some(path), Some(recorder)) = (&cli.events, &recorder) {
        recorder
            .write_json_lines(path)
            .with_context(|| format!("writing events to {}", path.display()))?;
    }
    outcome
}

async fn run(bench: &Workbench, command: Commands) -> Result<()> {
    match command {
        Commands::Discover {
            addresses,
            no_simulated,
            json,
        } => discover(bench, addresses, no_simulated, json).await,
        Commands::Query {
            address,
            command,
            binary,
        } => query(bench, &address, &command, binary).await,
        Commands::Measure {
            address,
            command,
            low,
            high,
            json,
        } => measure(bench, &address, &command, low, high, json).await,
    }
}

async fn discover(
    bench: &Workbench,
    extra: Vec<String>,
    no_simulated: bool,
    json: bool,
) -> Result<()> {
    let mut list = bench.config().discovery.addresses.clone();
    list.extend(extra);
    let mut enumerator = ChainedEnumerator::new().with(StaticAddressList::new(list));
    if bench.config().discovery.include_simulated && !no_simulated {
        enumerator = enumerator.with(SimulatedAddresses(bench.simulation().clone()));
    }

    let result = bench.discover_with(&enumerator).await?;
    let reports = result.reports();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!(
        "{:<40} {:<10} {:<20} {:>10}  DETAIL",
        "ADDRESS", "STATUS", "PROFILE", "LATENCY"
    );
    for r in &reports {
        let status = match r.status {
            EntryStatus::Matched => "matched",
            EntryStatus::Unmatched => "unmatched",
            EntryStatus::Failed => "failed",
        };
        let detail = r
            .error
            .as_deref()
            .or(r.response.as_deref())
            .unwrap_or_default();
        println!(
            "{:<40} {:<10} {:<20} {:>8}ms  {}",
            r.address,
            status,
            r.profile.as_deref().unwrap_or("-"),
            r.probe_latency.as_millis(),
            detail
        );
    }
    println!(
        "\n{} address(es): {} matched, {} unmatched, {} failed",
        result.len(),
        result.matched().len(),
        result.unmatched().len(),
        result.failed().len()
    );
    Ok(())
}

async fn query(bench: &Workbench, address: &str, command: &str, binary: bool) -> Result<()> {
    let mut session = bench.open_session(&EndpointAddress::new(address))?;
    let result = if binary {
        session.query_binary(command).await.map(|payload| {
            match block::decode_f32_le(&payload) {
                Some(samples) => format!("{} f32 samples: {:?}", samples.len(), samples),
                None => format!("{} bytes: {:02x?}", payload.len(), &payload[..]),
            }
        })
    } else {
        session.send(command).await
    };
    session.close().await;
    println!("{}", result?);
    Ok(())
}

async fn measure(
    bench: &Workbench,
    address: &str,
    command: &str,
    low: Option<f64>,
    high: Option<f64>,
    json: bool,
) -> Result<()> {
    let limits = (low.is_some() || high.is_some()).then_some(Limits {
        lower: low,
        upper: high,
    });
    let mut session = bench.open_session(&EndpointAddress::new(address))?;
    let result = session.measure(command, limits).await;
    session.close().await;
    let m = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&m)?);
    } else {
        let verdict = match m.verdict {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::NotEvaluated => "-",
        };
        println!("{} {} = {} [{}]", m.address, m.command, m.value, verdict);
    }
    if m.verdict == Verdict::Fail {
        anyhow::bail!("measurement outside limits");
    }
    Ok(())
}
