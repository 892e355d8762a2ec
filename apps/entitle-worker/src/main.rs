//! # Entitlement Worker
//!
//! Hosts the daily jobs.
//!
//! ## Usage
//! ```bash
//! # Scheduler (default command)
//! entitle-worker run --config ./engine.toml
//!
//! # One-shot jobs, report printed as JSON
//! entitle-worker reconcile
//! entitle-worker reset
//!
//! # Log level
//! RUST_LOG=entitle_engine=debug entitle-worker run
//! ```

use std::env;
use std::path::PathBuf;

use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use entitle_db::Database;
use entitle_engine::{EngineConfig, QuotaResetter, Reconciler, Scheduler};

enum Command {
    Run,
    Reconcile,
    Reset,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args: Vec<String> = env::args().collect();

    let mut command = Command::Run;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "run" => command = Command::Run,
            "reconcile" => command = Command::Reconcile,
            "reset" => command = Command::Reset,
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Entitlement Worker");
                println!();
                println!("Usage: entitle-worker [run|reconcile|reset] [OPTIONS]");
                println!();
                println!("Commands:");
                println!("  run        Run the daily scheduler (default)");
                println!("  reconcile  Reconcile the latest window once and print the report");
                println!("  reset      Reset every daily quota once and print the report");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Config file (default: platform config dir)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            other => return Err(format!("Unknown argument: {}", other).into()),
        }
        i += 1;
    }

    let config = EngineConfig::load(config_path)?;
    info!(
        db_path = %config.database.path.display(),
        scheduler_enabled = config.schedule.enabled,
        "Configuration loaded"
    );

    let db = Database::new(config.database.db_config()).await?;
    info!("Database ready");

    match command {
        Command::Run => run(db.clone(), &config).await?,
        Command::Reconcile => {
            let mut reconciler = Reconciler::from_config(db.clone(), &config)?;
            let report = reconciler.run_scheduled(Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Reset => {
            let report = QuotaResetter::new(db.clone()).reset_daily_quota().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    db.close().await;
    Ok(())
}

/// Runs the scheduler until a shutdown signal arrives.
async fn run(db: Database, config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    if !config.schedule.enabled {
        info!("Scheduler disabled by configuration, nothing to run");
        return Ok(());
    }

    let handle = Scheduler::spawn(db, config)?;
    info!("Worker running, press Ctrl+C to stop");

    shutdown_signal().await;
    handle.shutdown().await?;

    info!("Worker shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
