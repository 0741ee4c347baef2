mod simulated;

use clap::{Parser, ValueEnum};
use simulated::{SimulatedEngine, SimulatedEngineConfig};
use speedrun_core::{Orchestrator, RunConfig, RunOutcome, SessionState};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "speedrun", about = "Run speed tests and watch their progress")]
struct Args {
    /// Number of parallel measurement connections (1-32)
    #[arg(short = 'c', long, default_value_t = 6, value_parser = clap::value_parser!(u64).range(1..=32))]
    connections: u64,

    /// How many runs to perform back to back
    #[arg(long, default_value_t = 1)]
    runs: u32,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Make the engine reject every run with this message
    #[arg(long)]
    fail: Option<String>,

    /// Delay between simulated engine ticks, in milliseconds
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,

    /// Seed for the simulated engine's jitter
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn format_reading(state: &SessionState) -> String {
    format!(
        "[{:<11} {:>5.1}%] {:>8.2} Mbps {:>6.1} ms",
        state.phase.as_str(),
        state.progress,
        state.speed_mbps,
        state.latency_ms
    )
}

// Prints one line per observed change while a run is active. Being a watch receiver it
// may skip intermediate values, which is fine for a display.
async fn observe(mut rx: watch::Receiver<SessionState>) {
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        if state.running {
            println!("{}", format_reading(&state));
        }
    }
}

fn print_summary(run: u32, outcome: &RunOutcome, elapsed: Duration) {
    let elapsed = humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64));
    let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    match outcome {
        RunOutcome::Completed(result) => {
            println!("Run {} complete at {} ({})", run, stamp, elapsed);
            if let Some(mbps) = result.download_mbps() {
                println!("  Download:    {:.2} Mbps", mbps);
            }
            if let Some(mbps) = result.upload_mbps() {
                println!("  Upload:      {:.2} Mbps", mbps);
            }
            if let Some(latency) = &result.latency {
                println!("  Latency:     {:.1} ms (jitter {:.1} ms)", latency.avg_ms, latency.jitter_ms);
            }
            if let Some(loss) = result.packet_loss {
                println!("  Packet loss: {:.1}%", loss);
            }
        }
        RunOutcome::Failed(message) => {
            println!("Run {} failed at {} ({}): {}", run, stamp, elapsed, message);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();

    let config = RunConfig {
        connections: args.connections as usize,
        ..RunConfig::default()
    };
    let engine = SimulatedEngine::new(SimulatedEngineConfig {
        tick: Duration::from_millis(args.tick_ms),
        fail_with: args.fail.clone(),
        seed: args.seed,
        ..SimulatedEngineConfig::default()
    });
    let orchestrator = Orchestrator::new(engine, config)?;

    let observer = (args.format == Format::Text).then(|| tokio::spawn(observe(orchestrator.watch_session())));

    let mut failures = 0;
    for run in 1..=args.runs {
        let started = Instant::now();
        let outcome = orchestrator.start_test().await?;
        if !outcome.is_completed() {
            failures += 1;
        }
        if args.format == Format::Text {
            print_summary(run, &outcome, started.elapsed());
        }
    }

    if let Some(observer) = observer {
        observer.abort();
    }
    if args.format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&orchestrator.history().to_vec())?);
    }
    if failures > 0 {
        eprintln!("{} of {} runs failed", failures, args.runs);
        std::process::exit(1);
    }
    Ok(())
}
