use std::sync::Arc;

use tracing::info;

use cadence::clock::SystemClock;
use cadence::config::Config;
use cadence::directory::{DirectorySnapshot, InMemoryDirectory};
use cadence::engine::{Collaborators, Engine};
use cadence::ledger::InMemoryLedger;
use cadence::notify::{LogMailer, NotifyHub, Outbox, run_dispatcher};
use cadence::{compactor, observability};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    observability::init_tracing(&config.log_level);
    observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let snapshot = match &config.directory_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            let snapshot: DirectorySnapshot = serde_json::from_str(&raw)?;
            info!(
                studios = snapshot.studios.len(),
                coaches = snapshot.coaches.len(),
                clients = snapshot.clients.len(),
                "directory loaded from {}",
                path.display()
            );
            snapshot
        }
        None => DirectorySnapshot::default(),
    };
    let directory = Arc::new(InMemoryDirectory::from_snapshot(&snapshot));
    let ledger = Arc::new(InMemoryLedger::new());
    for package in snapshot.packages {
        ledger.put_package(package);
    }

    let collab = Collaborators::in_memory(directory.clone(), ledger, Arc::new(SystemClock));
    let (outbox, notices) = Outbox::new(config.notify.queue_capacity);
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        collab,
        Arc::new(NotifyHub::new()),
        outbox,
        config.scheduling.clone(),
    )?);

    tokio::spawn(run_dispatcher(
        notices,
        directory,
        Arc::new(LogMailer),
        config.notify.clone(),
        config.scheduling.utc_offset,
    ));
    tokio::spawn(compactor::run_compactor(engine.clone(), config.compact_threshold));

    info!("cadence running");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  utc_offset: {}", config.scheduling.utc_offset);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    shutdown_signal().await?;
    info!("shutdown signal received, compacting WAL");
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("cadence stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
