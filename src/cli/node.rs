//! Handler for the `node status` command.

use chrono::Utc;
use tabled::{Table, Tabled};

use crate::app::{AppState, Config};
use crate::cli::output;
use crate::error::Result;

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "ID")]
    id: i32,
    #[tabled(rename = "Remark")]
    remark: String,
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Available")]
    available: String,
    #[tabled(rename = "Token Stale")]
    token_stale: bool,
    #[tabled(rename = "Priority")]
    priority: i32,
}

/// Execute `node status`.
pub async fn status(config: &Config) -> Result<()> {
    let state = AppState::new(config)?;
    let now = Utc::now();
    let nodes = state.store().load_nodes().await?;

    output::header(env!("CARGO_PKG_VERSION"));
    output::section("Nodes");
    println!();

    if nodes.is_empty() {
        output::field("", "(none configured)");
        return Ok(());
    }

    let rows: Vec<NodeRow> = nodes
        .iter()
        .map(|n| NodeRow {
            id: n.id.value(),
            remark: n.remark.clone(),
            kind: n.kind.as_str(),
            host: n.host.clone(),
            available: if n.availabled() { output::positive("yes") } else { output::negative("no") },
            token_stale: n.needs_token_refresh(now),
            priority: n.priority,
        })
        .collect();

    let table = Table::new(rows).to_string();
    for line in table.lines() {
        println!("  {line}");
    }
    println!();
    Ok(())
}
