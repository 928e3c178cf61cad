//! Cadence-table scheduler (§5 CONCURRENCY & RESOURCE MODEL): drives every
//! background job at its specified period from a single task, each tick
//! logging and continuing past failures rather than aborting the process
//! (§7 "background jobs log exceptions with full trace, emit a
//! system-log notification").

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::core::notify::{Notification, Notifier};
use crate::core::service::{reached_tracker, reconciler};
use crate::error::Result;

use super::state::AppState;

const CONFIG_CACHE_PERIOD: Duration = Duration::from_secs(60);
const LINKS_CACHE_PERIOD: Duration = Duration::from_secs(60);
const USAGE_LOG_PERIOD: Duration = Duration::from_secs(60);
const REACHED_TRACKER_PERIOD: Duration = Duration::from_secs(60);
const RECONCILER_PERIOD: Duration = Duration::from_secs(60);
const RESELLER_GATE_PERIOD: Duration = Duration::from_secs(60);
const HEALTH_LOG_PERIOD: Duration = Duration::from_secs(90);

fn make_interval(period: Duration) -> tokio::time::Interval {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}

/// Runs the scheduler loop forever. Each branch owns one job's cadence;
/// `tokio::select!` means a slow job never delays the others' next tick
/// beyond their own period, matching §5's "every minute" jobs running
/// independently of one another.
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let mut config_cache_tick = make_interval(CONFIG_CACHE_PERIOD);
    let mut links_cache_tick = make_interval(LINKS_CACHE_PERIOD);
    let mut usage_log_tick = make_interval(USAGE_LOG_PERIOD);
    let mut reached_tracker_tick = make_interval(REACHED_TRACKER_PERIOD);
    let mut reconciler_tick = make_interval(RECONCILER_PERIOD);
    let mut reseller_gate_tick = make_interval(RESELLER_GATE_PERIOD);
    let mut health_log_tick = make_interval(HEALTH_LOG_PERIOD);

    loop {
        tokio::select! {
            _ = config_cache_tick.tick() => run_config_cache_refresh(&state).await,
            _ = links_cache_tick.tick() => run_links_cache_refresh(&state).await,
            _ = usage_log_tick.tick() => run_usage_log(&state).await,
            _ = reached_tracker_tick.tick() => run_reached_tracker(&state).await,
            _ = reconciler_tick.tick() => run_reconciler(&state).await,
            _ = reseller_gate_tick.tick() => run_reseller_gate(&state).await,
            _ = health_log_tick.tick() => run_health_log(&state),
        }
    }
}

/// Warms the Links Cache before the scheduler loop starts serving
/// subscriptions, retrying per `startup.links_cache_retries` (§4.D
/// "caller may choose to retry up to 5 times at startup").
pub async fn warm_up(state: &AppState, max_attempts: u32) {
    let now = Utc::now();
    let Ok(nodes) = state.store().load_nodes().await else {
        error!("warm-up: failed to load nodes");
        return;
    };
    let mut configs_by_node = std::collections::HashMap::new();
    for node in &nodes {
        configs_by_node.insert(node.id, state.config_cache().get(node.id).unwrap_or_default());
    }
    let ok = state
        .links_cache()
        .refresh_all_with_retry(&nodes, &configs_by_node, state.store().as_ref(), now, max_attempts)
        .await;
    if !ok {
        state.notifier().notify(Notification::SystemLog { message: "links cache warm-up did not fully succeed".into() });
    }
}

async fn run_config_cache_refresh(state: &AppState) {
    let now = Utc::now();
    match state.store().load_nodes().await {
        Ok(nodes) => state.config_cache().refresh_all(&nodes, state.store().as_ref(), state.notifier().as_ref(), now).await,
        Err(e) => log_job_failure(state, "config cache refresh", &e),
    }
}

async fn run_links_cache_refresh(state: &AppState) {
    let now = Utc::now();
    let nodes = match state.store().load_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => return log_job_failure(state, "links cache refresh", &e),
    };
    let mut configs_by_node = std::collections::HashMap::new();
    for node in &nodes {
        configs_by_node.insert(node.id, state.config_cache().get(node.id).unwrap_or_default());
    }
    state.links_cache().refresh_all(&nodes, &configs_by_node, state.store().as_ref(), now).await;
}

async fn run_usage_log(state: &AppState) {
    let now = Utc::now();
    if let Err(e) = state.usage_engine().run_hourly_log_tick(state.store().as_ref(), now).await {
        log_job_failure(state, "hourly usage log", &e);
    }
}

async fn run_reached_tracker(state: &AppState) {
    let now = Utc::now();
    if let Err(e) = reached_tracker::run_tick(state.store().as_ref(), state.notifier().as_ref(), now).await {
        log_job_failure(state, "reached tracker", &e);
    }
}

async fn run_reconciler(state: &AppState) {
    let now = Utc::now();
    let result = reconciler::run_tick(state.store(), state.config_cache(), state.notifier(), state.reconciler_lock(), now).await;
    if let Err(e) = result {
        log_job_failure(state, "reconciler", &e);
    }
}

async fn run_reseller_gate(state: &AppState) {
    if let Err(e) = reached_tracker::run_reseller_gate(state.store().as_ref(), state.notifier().as_ref()).await {
        log_job_failure(state, "reseller gate", &e);
    }
}

/// Logs process RAM via the OS-reported resident set size (§5 "RAM/health
/// log | every 90s"); unlike the upstream's PID-liveness check, this runs
/// inside the same process so it reads `/proc/self` directly rather than
/// polling an external PID file.
fn run_health_log(state: &AppState) {
    let rss_kb = read_rss_kb();
    info!(rss_kb, "health check");
    let _ = state;
}

#[cfg(target_os = "linux")]
fn read_rss_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status.lines().find_map(|line| {
        line.strip_prefix("VmRSS:").map(|rest| rest.trim().trim_end_matches(" kB").trim().parse().ok()).flatten()
    })
}

#[cfg(not(target_os = "linux"))]
fn read_rss_kb() -> Option<u64> {
    None
}

fn log_job_failure(state: &AppState, job: &str, error: &crate::error::Error) {
    error!(job, error = %error, "scheduled job failed");
    state.notifier().notify(Notification::SystemLog { message: format!("{job} failed: {error}") });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_pool;

    #[tokio::test]
    async fn config_cache_refresh_tolerates_empty_node_list() {
        let state = AppState::from_pool(test_pool());
        run_config_cache_refresh(&state).await;
    }

    #[tokio::test]
    async fn reached_tracker_tolerates_empty_store() {
        let state = AppState::from_pool(test_pool());
        run_reached_tracker(&state).await;
    }

    #[tokio::test]
    async fn reconciler_tolerates_empty_store() {
        let state = AppState::from_pool(test_pool());
        run_reconciler(&state).await;
    }

    #[tokio::test]
    async fn warm_up_with_no_nodes_does_not_hang() {
        let state = AppState::from_pool(test_pool());
        warm_up(&state, 2).await;
    }
}
