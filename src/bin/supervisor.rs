use clap::Parser;
use options_supervisor::supervisor::{FilePositionSource, PositionSource};
use options_supervisor::utils::{init_from_config, init_logger};
use options_supervisor::{Config, PaperExecutor, Supervisor};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Supervise open option positions against the exit rule table with a paper broker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to $CONFIG_FILE or config/supervisor.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file with the current position snapshots, re-read every cycle
    #[arg(short, long, default_value = "config/positions.sample.json")]
    positions: PathBuf,

    /// Run this many cycles back to back and exit; otherwise run until Ctrl-C
    #[arg(long)]
    cycles: Option<usize>,

    /// Force JSON log output regardless of config
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    if args.json_logs {
        init_logger(&config.logging.level, true, None)?;
    } else {
        init_from_config(&config.logging)?;
    }

    info!("Starting {} ({})", config.general.name, config.general.environment);
    info!("Positions: {}", args.positions.display());

    let executor = Arc::new(PaperExecutor::new());
    let supervisor = Supervisor::new(&config, executor.clone())?;
    let source = FilePositionSource::new(&args.positions);

    match args.cycles {
        Some(cycles) => {
            for cycle in 1..=cycles {
                let inputs = source.fetch().await?;
                let report = supervisor.run_cycle(&inputs).await;
                for outcome in report.outcomes.iter().filter(|o| !o.decision.is_hold()) {
                    info!(
                        cycle,
                        position_id = %outcome.position_id,
                        action = %outcome.decision.action,
                        rule = %outcome.decision.rule,
                        order = ?outcome.order,
                        "{}",
                        outcome.decision.reason
                    );
                }
            }
        }
        None => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown_tx.send(true).ok();
                }
            });
            supervisor.run(&source, shutdown_rx).await;
        }
    }

    info!("Paper orders submitted: {}", executor.order_count());
    if config.metrics.enabled {
        println!("{}", supervisor.metrics().render()?);
    }

    Ok(())
}
