//! notebridge dealer daemon.
//!
//! Wires the Postgres update queue, the note store gateway and the Telegram
//! notifier into a dealer and runs it until Ctrl-C or a fatal error.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notebridge_core::{defaults, UpdateQueue};
use notebridge_db::{create_pool_with_config, log_pool_metrics, Database, PoolConfig};
use notebridge_jobs::{DealerBuilder, DealerConfig};
use notebridge_remote::{HttpNoteStore, TelegramConfig, TelegramNotifier};

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "notebridge=debug")
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "notebridge_daemon=debug,notebridge_jobs=debug,notebridge_db=info,notebridge_remote=info"
            .into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("notebridge-daemon.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        subsystem = "daemon",
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let _file_guard = init_logging();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let claim_lease_secs = std::env::var("DEALER_CLAIM_LEASE_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(defaults::CLAIM_LEASE_SECS);

    let pool = create_pool_with_config(&database_url, PoolConfig::from_env())
        .await
        .context("failed to connect to the database")?;
    let db = Database::new(pool).with_claim_lease(Duration::from_secs(claim_lease_secs));
    db.migrate().await.context("failed to apply migrations")?;
    log_pool_metrics(&db.pool);

    let notes = HttpNoteStore::from_env()?;
    let chat = TelegramNotifier::new(TelegramConfig::from_env()?)?;
    let config = DealerConfig::from_env();

    match db.updates.pending_count().await {
        Ok(pending) => info!(subsystem = "daemon", pending, "Update queue ready"),
        Err(e) => warn!(subsystem = "daemon", error = %e, "Could not count pending updates"),
    }
    info!(
        subsystem = "daemon",
        note_store = notes.base_url(),
        claim_lease_secs,
        "Starting dealer"
    );

    let dealer = DealerBuilder::new(
        Arc::new(db.updates.clone()),
        Arc::new(db.users.clone()),
        Arc::new(notes),
        Arc::new(chat),
    )
    .with_config(config)
    .build();
    let mut handle = dealer.start();

    tokio::select! {
        result = handle.join() => {
            if let Err(e) = result {
                error!(subsystem = "daemon", error = %e, "Dealer stopped with a fatal error");
                return Err(e.into());
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!(subsystem = "daemon", "Shutdown requested, draining in-flight batches");
            handle.shutdown().await?;
            handle.join().await?;
        }
    }

    info!(subsystem = "daemon", "Dealer daemon stopped");
    Ok(())
}
