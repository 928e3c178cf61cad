//! Handler for the `run` command: boots `AppState`, warms the Links
//! Cache, then hands off to the scheduler loop (§5 Scheduling model)
//! until the process receives a shutdown signal.

use std::sync::Arc;

use tracing::info;

use crate::app::{self, AppState, Config};
use crate::cli::output;
use crate::error::Result;

/// Execute `run`: the long-lived foreground control-plane process.
pub async fn run(config: &Config) -> Result<()> {
    let state = Arc::new(AppState::new(config)?);

    output::header(env!("CARGO_PKG_VERSION"));
    output::field("database", &config.database.url);
    println!();

    info!("warming up links cache");
    app::warm_up_caches(&state, config.startup.links_cache_retries).await;

    info!("starting scheduler");
    tokio::select! {
        result = app::run_scheduler(Arc::clone(&state)) => result,
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining in-flight work");
            // §5 "a 500 ms grace is given for in-flight tasks".
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
