//! Usage Engine (§4.G): converts per-node monotonic lifetime counters into
//! per-subscription deltas, writes them through `Store`, and keeps the
//! hourly usage log in sync with `total_usage`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::warn;

use crate::core::domain::{hour_bucket, AdminId, Node, NodeId, Subscription};
use crate::core::node::ConfigEntry;
use crate::core::notify::{Notification, Notifier};
use crate::core::store::{ObservedUsage, Store};
use crate::error::Result;

/// One node's fetch outcome for a reconciliation tick (§4.F step 1):
/// `configs = None` means the node's config cache entry was never
/// populated; `users` is keyed by upstream `server_key`.
#[derive(Debug, Clone, Default)]
pub struct NodeFetch {
    pub configs: Option<Vec<ConfigEntry>>,
    pub users: HashMap<String, crate::core::node::UserView>,
}

pub type NodesData = HashMap<NodeId, NodeFetch>;

/// A single `{username, usage}` delta reported to the optional upstream
/// reporting endpoint (§6 "Upstream reporting").
#[derive(Debug, Clone)]
pub struct UsageReportItem {
    pub username: String,
    pub usage: u64,
}

/// Upstream reporting sink (§6 `POST .../api/subscriptions/{secret}/usages`).
/// Kept as a trait so the hourly log task can be tested without a live
/// endpoint; the HTTP implementation lives in `crate::app`.
#[async_trait]
pub trait UsageReportSink: Send + Sync {
    async fn report(&self, owner: &crate::core::domain::Admin, items: &[UsageReportItem]) -> Result<()>;
}

/// Buffers per-owner deltas that failed to report upstream so they can be
/// merged into the next successful call (§4.G step 3 "accumulate failed
/// deltas in an in-memory retry map and merge into the next successful
/// call").
#[derive(Default)]
pub struct ReportRetryBuffer {
    pending: DashMap<AdminId, Vec<UsageReportItem>>,
}

impl ReportRetryBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn take(&self, owner: AdminId) -> Vec<UsageReportItem> {
        self.pending.remove(&owner).map(|(_, v)| v).unwrap_or_default()
    }

    fn stash(&self, owner: AdminId, items: Vec<UsageReportItem>) {
        self.pending.entry(owner).or_default().extend(items);
    }
}

/// Ingests one tick's `nodes_data` into `Store` for every subscription
/// (§4.G): builds the per-node observed-counter map, skips subscriptions
/// with nothing to ingest, and emits `ActivatedExpire` when a pending
/// subscription's clock starts.
pub async fn ingest(
    nodes_data: &NodesData,
    subs: &[Subscription],
    nodes: &[Node],
    store: &dyn Store,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> Result<()> {
    let rates: HashMap<NodeId, f64> = nodes.iter().map(|n| (n.id, n.usage_rate)).collect();

    for sub in subs {
        let mut observed = HashMap::new();
        for (node_id, fetch) in nodes_data {
            if fetch.configs.is_none() {
                continue;
            }
            if let Some(user) = fetch.users.get(&sub.server_key) {
                observed.insert(
                    *node_id,
                    ObservedUsage {
                        lifetime_used_traffic: user.lifetime_used_traffic,
                        hour_bucket: hour_bucket(now),
                        node_usage_rate: rates.get(node_id).copied().unwrap_or(1.0),
                    },
                );
            }
        }
        if observed.is_empty() {
            continue;
        }
        let outcome = store.bulk_upsert_usages(sub.id, &observed, now).await?;
        if outcome.activated_expire {
            notifier.notify(Notification::ActivatedExpire {
                subscription_id: sub.id.value(),
                subscription_username: sub.username.clone().unwrap_or_default(),
                expire_at: now.timestamp(),
            });
        }
    }
    Ok(())
}

/// Refreshes the cached `total_usage`/`online_at` columns and
/// `admin.current_count` in one statement each (§4.F step 4).
pub async fn refresh_caches(store: &dyn Store) -> Result<()> {
    store.sync_cached_usages().await?;
    store.sync_admin_current_counts().await?;
    Ok(())
}

/// Runs the hourly usage log tick (§4.G): for every subscription, moves
/// whatever `total_usage` has accrued beyond what's already logged into
/// the current-hour `SubscriptionUsageLogs` row, and bumps each owner's
/// `current_usage` once per owner. Optionally reports the same deltas
/// upstream, merging any previously failed deltas from `retry` first.
pub async fn run_hourly_log_tick(
    store: &dyn Store,
    report_sink: Option<&dyn UsageReportSink>,
    retry: &ReportRetryBuffer,
    now: DateTime<Utc>,
) -> Result<()> {
    let subs = store.load_subscriptions().await?;
    let bucket = hour_bucket(now);

    let mut owner_deltas: HashMap<AdminId, u64> = HashMap::new();
    let mut report_items: HashMap<AdminId, Vec<UsageReportItem>> = HashMap::new();

    for sub in &subs {
        let total = store.sum_usage_total(sub.id).await?;
        let logged = store.sum_usage_logged(sub.id).await?;
        let unlogged = total.saturating_sub(logged);
        if unlogged == 0 {
            continue;
        }
        store.upsert_usage_log(sub.id, bucket, unlogged).await?;
        *owner_deltas.entry(sub.owner_id).or_insert(0) += unlogged;
        if let Some(username) = &sub.username {
            report_items
                .entry(sub.owner_id)
                .or_default()
                .push(UsageReportItem { username: username.clone(), usage: unlogged });
        }
    }

    for (owner_id, delta) in &owner_deltas {
        store.bump_admin_usage(*owner_id, *delta).await?;
    }

    if let Some(sink) = report_sink {
        for (owner_id, mut items) in report_items {
            let mut merged = retry.take(owner_id);
            merged.append(&mut items);
            if merged.is_empty() {
                continue;
            }
            let Some(owner) = store.get_admin_by_id(owner_id).await? else { continue };
            if let Err(e) = sink.report(&owner, &merged).await {
                warn!(owner_id = %owner_id, error = %e, "upstream usage report failed, buffering for retry");
                retry.stash(owner_id, merged);
            }
        }
    }

    Ok(())
}

/// Thin wrapper used by the scheduler to inject an `Arc<dyn Store>`/
/// `Arc<dyn Notifier>` pair without re-threading them through every call
/// site (§9 "Global singletons ... expose through a single application
/// context").
pub struct UsageEngine {
    pub report_sink: Option<Arc<dyn UsageReportSink>>,
    pub retry: ReportRetryBuffer,
}

impl UsageEngine {
    #[must_use]
    pub fn new(report_sink: Option<Arc<dyn UsageReportSink>>) -> Self {
        Self { report_sink, retry: ReportRetryBuffer::new() }
    }

    pub async fn run_hourly_log_tick(&self, store: &dyn Store, now: DateTime<Utc>) -> Result<()> {
        let sink = self.report_sink.as_deref();
        run_hourly_log_tick(store, sink, &self.retry, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::NodeKind;
    use crate::core::node::UserView;
    use crate::core::store::{test_support::in_memory_store, NewSubscription};

    fn sample_node(id: i32) -> Node {
        Node {
            id: NodeId(id),
            remark: "n".into(),
            kind: NodeKind::Marzban,
            username: "a".into(),
            password: "p".into(),
            host: "https://n.example".into(),
            access_token: None,
            access_updated_at: None,
            offset_link: 0,
            batch_size: 1,
            priority: 0,
            usage_rate: 1.0,
            rate_display: None,
            script_url: None,
            script_secret: None,
            show_configs: true,
            enabled: true,
            removed: false,
        }
    }

    async fn seed_owner(store: &impl Store) -> crate::core::domain::Admin {
        use crate::core::domain::*;
        let admin = Admin {
            id: AdminId(0),
            username: Some("owner".into()),
            password_hash: String::new(),
            role: AdminRole::Owner,
            api_key: "k".repeat(64),
            secret: "s".repeat(32),
            access: ResourceAccess::default(),
            count_limit: 0,
            usage_limit: 0,
            current_count: 0,
            current_usage: 0,
            placeholders: std::collections::HashMap::new(),
            presentation: PresentationConfig::with_defaults(),
            notifications: NotificationSinks::default(),
            totp: TotpState::default(),
            expire_warning_days: 0,
            usage_warning_percent: 0,
            created_at: Utc::now(),
            removed: false,
        };
        let id = store.insert_admin(&admin).await.unwrap();
        store.get_admin_by_id(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn ingest_skips_subscriptions_with_no_observed_nodes() {
        let store = in_memory_store();
        let owner = seed_owner(&store).await;
        let created = store
            .bulk_create_subscriptions(
                &owner,
                &[NewSubscription {
                    username: "u1".into(),
                    access_key: None,
                    limit_usage: 0,
                    limit_expire: 0,
                    auto_delete_days: 0,
                    note: None,
                    service_ids: vec![],
                }],
            )
            .await
            .unwrap();

        let nodes_data = NodesData::new();
        ingest(&nodes_data, &created, &[], &store, &crate::core::notify::NullNotifier, Utc::now())
            .await
            .unwrap();
        let rows = store.load_usage_rows(created[0].id).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn ingest_activates_pending_expiry_on_first_observed_usage() {
        let store = in_memory_store();
        let owner = seed_owner(&store).await;
        let created = store
            .bulk_create_subscriptions(
                &owner,
                &[NewSubscription {
                    username: "pending".into(),
                    access_key: None,
                    limit_usage: 0,
                    limit_expire: -86400,
                    auto_delete_days: 0,
                    note: None,
                    service_ids: vec![],
                }],
            )
            .await
            .unwrap();
        let sub = &created[0];

        let node = sample_node(1);
        let mut nodes_data = NodesData::new();
        let mut users = HashMap::new();
        users.insert(
            sub.server_key.clone(),
            UserView { server_key: sub.server_key.clone(), lifetime_used_traffic: 10, ..Default::default() },
        );
        nodes_data.insert(node.id, NodeFetch { configs: Some(vec![]), users });

        ingest(&nodes_data, &created, &[node], &store, &crate::core::notify::NullNotifier, Utc::now())
            .await
            .unwrap();

        let refreshed = store.get_subscription_by_access_key(&sub.access_key).await.unwrap().unwrap();
        assert!(refreshed.limit_expire > 0);
    }

    #[tokio::test]
    async fn hourly_log_tick_moves_unlogged_usage_and_bumps_owner() {
        let store = in_memory_store();
        let owner = seed_owner(&store).await;
        let created = store
            .bulk_create_subscriptions(
                &owner,
                &[NewSubscription {
                    username: "u2".into(),
                    access_key: None,
                    limit_usage: 0,
                    limit_expire: 0,
                    auto_delete_days: 0,
                    note: None,
                    service_ids: vec![],
                }],
            )
            .await
            .unwrap();
        let sub = &created[0];
        let node = sample_node(1);
        let now = Utc::now();

        let mut observed = HashMap::new();
        observed.insert(
            node.id,
            ObservedUsage { lifetime_used_traffic: 1000, hour_bucket: now, node_usage_rate: 1.0 },
        );
        store.bulk_upsert_usages(sub.id, &observed, now).await.unwrap();

        let retry = ReportRetryBuffer::new();
        run_hourly_log_tick(&store, None, &retry, now).await.unwrap();

        let owner_after = store.get_admin_by_username("owner").await.unwrap().unwrap();
        assert_eq!(owner_after.current_usage, 1000);
    }
}
