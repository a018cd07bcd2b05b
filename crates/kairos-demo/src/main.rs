use clap::{Parser, ValueEnum};
use kairos_core::config::KairosConfig;
use kairos_scheduler::{Scheduler, StatusEvent};
use tracing::{info, warn};

mod scenarios;

/// Runs the kairos scheduler through a few canned scenarios.
#[derive(Parser, Debug)]
#[command(name = "kairos-demo", version, about)]
struct Cli {
    /// Path to kairos.toml (defaults to ~/.kairos/kairos.toml).
    #[arg(long, env = "KAIROS_CONFIG")]
    config: Option<String>,

    /// Which scenario to run.
    #[arg(value_enum, default_value_t = Scenario::All)]
    scenario: Scenario,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    Hello,
    Cancel,
    Periodic,
    Retry,
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // config first: it carries the fallback log filter
    let (config, config_err) = match KairosConfig::load(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (KairosConfig::default(), Some(e)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .init();

    if let Some(e) = config_err {
        warn!("Config load failed ({}), using defaults", e);
    }

    // status events: scheduler -> logging task
    let (events_tx, mut events_rx) =
        tokio::sync::mpsc::channel::<StatusEvent>(config.scheduler.event_buffer);
    let scheduler = Scheduler::with_events(config.scheduler.clone(), events_tx);

    let observer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            info!(
                job_id = %event.job_id,
                run = event.run,
                status = %event.status,
                "status event"
            );
        }
    });

    info!(scenario = ?cli.scenario, "running demo");
    let run_all = cli.scenario == Scenario::All;
    if run_all || cli.scenario == Scenario::Hello {
        scenarios::hello(&scheduler).await?;
    }
    if run_all || cli.scenario == Scenario::Cancel {
        scenarios::cancel(&scheduler).await?;
    }
    if run_all || cli.scenario == Scenario::Periodic {
        scenarios::periodic(&scheduler).await?;
    }
    if run_all || cli.scenario == Scenario::Retry {
        scenarios::retry(&scheduler).await?;
    }

    println!("{}", serde_json::to_string_pretty(&scheduler.list_jobs())?);

    scheduler.shutdown().await;
    // the observer ends once the last sender (inside the scheduler) is gone
    drop(scheduler);
    observer.await?;
    Ok(())
}
