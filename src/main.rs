// src/main.rs - job replay host for the lead screw engine
use std::path::PathBuf;

use clap::Parser;
use els_core::Config;
use lathe_els::{Runner, load_job};

/// Replay an operator job against the simulated lathe
#[derive(Parser, Debug)]
#[command(name = "els-sim", about = "Electronic lead screw simulator: replays a job and records the run.")]
struct Cli {
    /// Machine configuration (TOML); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Job file to replay
    #[arg(short, long)]
    job: PathBuf,

    /// Output directory for run.csv / run.jsonl
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pace the control loop to wall-clock time
    #[arg(long)]
    realtime: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    tracing::info!("Starting lathe-els simulator");

    let config = match &cli.config {
        Some(path) => {
            let path = path.to_string_lossy();
            tracing::info!("Loading configuration from: {}", path);
            els_core::load_config(&path)?
        }
        None => Config::default(),
    };
    tracing::debug!("Effective configuration:\n{}", toml::to_string_pretty(&config)?);
    tracing::info!(
        "Encoder: {} counts/rev, backlash {}",
        config.encoder.counts_per_rev(),
        config.encoder.backlash
    );
    tracing::info!("Control loop: {} Hz", config.timing.tick_rate_hz);

    let job = load_job(&cli.job.to_string_lossy())?;
    let mut runner = Runner::new(config, job.sample_every, cli.output.as_deref())?;
    let summary = if cli.realtime {
        runner.run_realtime(&job).await?
    } else {
        runner.run(&job)?
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
