//! Handler for the `stats` command: a fleet-wide subscription/usage
//! summary over the same derived booleans the Reached Tracker and HTTP
//! list endpoint use (§3 Derived, §6 "GET /stats").

use tabled::{Table, Tabled};

use crate::app::{AppState, Config};
use crate::cli::output;
use crate::core::store::SubscriptionQuery;
use crate::error::Result;

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Metric")]
    metric: &'static str,
    #[tabled(rename = "Count")]
    count: i64,
}

/// Execute `stats`.
pub async fn run(config: &Config) -> Result<()> {
    let state = AppState::new(config)?;
    let store = state.store();

    let total = store.count_subscriptions(&SubscriptionQuery::default()).await?;
    let active = store
        .count_subscriptions(&SubscriptionQuery { is_active: Some(true), ..Default::default() })
        .await?;
    let limited = store
        .count_subscriptions(&SubscriptionQuery { limited: Some(true), ..Default::default() })
        .await?;
    let expired = store
        .count_subscriptions(&SubscriptionQuery { expired: Some(true), ..Default::default() })
        .await?;
    let online = store
        .count_subscriptions(&SubscriptionQuery { online: Some(true), ..Default::default() })
        .await?;
    let disabled = store
        .count_subscriptions(&SubscriptionQuery { enabled: Some(false), ..Default::default() })
        .await?;

    let admins = store.load_admins().await?;
    let nodes = store.load_nodes().await?;
    let available_nodes = nodes.iter().filter(|n| n.availabled()).count() as i64;

    output::header(env!("CARGO_PKG_VERSION"));
    output::section("Subscriptions");
    println!();

    let rows = vec![
        CountRow { metric: "Total", count: total },
        CountRow { metric: "Active", count: active },
        CountRow { metric: "Limited", count: limited },
        CountRow { metric: "Expired", count: expired },
        CountRow { metric: "Online (2m window)", count: online },
        CountRow { metric: "Disabled", count: disabled },
    ];
    let table = Table::new(rows).to_string();
    for line in table.lines() {
        println!("  {line}");
    }

    output::section("Fleet");
    println!();
    output::field("Admins", admins.len());
    output::field("Nodes", format!("{available_nodes}/{}", nodes.len()));
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_pool;

    #[tokio::test]
    async fn stats_runs_against_empty_store() {
        let _pool = test_pool();
        // `run` opens its own pool from config, so this just exercises the
        // empty-database path via a temp file.
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("stats-test.db");
        let config = Config {
            database: crate::app::DatabaseConfig { url: db_path.to_str().unwrap().to_string() },
            ..Default::default()
        };
        run(&config).await.unwrap();
    }
}
