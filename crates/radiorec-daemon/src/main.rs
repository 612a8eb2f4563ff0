mod listener;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use radiorec_core::collection::Collection;
use radiorec_core::config::Config;
use radiorec_core::context::RecorderContext;
use radiorec_core::node::{Entity, Listener};
use radiorec_core::platform;
use radiorec_core::schedule::{active_records, finish_all, schedule_update_pass};
use radiorec_core::station::{RecordNaming, Station};
use radiorec_core::stations_file::load_stations;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_logging() -> anyhow::Result<std::path::PathBuf> {
    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("radiorec.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Create layers: file writer + stderr
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,radiorec_core=debug,radiorec_daemon=debug",
                )
            }),
        )
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_path = init_logging()?;
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    std::fs::create_dir_all(&config.paths.temp_dir)
        .with_context(|| format!("creating {}", config.paths.temp_dir.display()))?;
    let ctx = RecorderContext::from_config(&config)?;
    let naming = RecordNaming::from_config(&config);

    let stations = Collection::<Station>::new();
    let logger = Arc::new(listener::StatusLogger::new(&stations));
    let weak: std::sync::Weak<dyn Listener> = Arc::downgrade(&logger) as _;
    stations.node().add_listener(weak);

    match load_stations(&config.paths.stations_file, &ctx, &naming) {
        Ok(loaded) => {
            for station in loaded {
                if !stations.add_unique(station.clone()) {
                    warn!("Duplicate station {:?} ignored", station.name());
                }
            }
        }
        Err(e) if !config.paths.stations_file.exists() => {
            warn!(
                "No station file at {:?}, starting empty: {:#}",
                config.paths.stations_file, e
            );
        }
        Err(e) => return Err(e),
    }
    info!("{} station(s) scheduled", stations.len());

    let mut ticker =
        tokio::time::interval(Duration::from_millis(config.schedule.tick_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => schedule_update_pass(&stations, chrono::Utc::now()),
            res = &mut shutdown => {
                if let Err(e) = res {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    // ── Graceful shutdown ─────────────────────────────────────────────────────

    info!("Shutting down, finishing running records");
    let deadline = Instant::now() + Duration::from_secs(config.schedule.shutdown_grace_secs);
    loop {
        // Records still connecting become running later; finish those too.
        finish_all(&stations);
        let active = active_records(&stations);
        if active.is_empty() {
            break;
        }
        if Instant::now() >= deadline {
            warn!(
                "{} record(s) still active after {}s, exiting anyway",
                active.len(),
                config.schedule.shutdown_grace_secs
            );
            break;
        }
        for record in &active {
            record.poll_session();
        }
        ticker.tick().await;
    }

    info!("Bye");
    Ok(())
}
