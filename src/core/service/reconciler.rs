//! Reconciler (§4.F): the periodic node-sync loop. Each tick fetches every
//! node's user inventory concurrently, ingests usage through the Usage
//! Engine, then dispatches a single-flighted background sync that diffs
//! local desired state against what each node reports and issues
//! create/update/activate/deactivate/remove calls.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};

use crate::core::cache::ConfigCache;
use crate::core::domain::{derive_password, derive_uuid, Node, NodeId, NodeKind, Service, Subscription};
use crate::core::node::{self, ConfigEntry, DesiredUser, NodeClient, UserView};
use crate::core::notify::{Notification, Notifier};
use crate::core::service::usage_engine::{self, NodeFetch, NodesData};
use crate::core::store::Store;
use crate::error::Result;

/// Page size for `list_users` pagination (§4.F step 1).
const LIST_PAGE_SIZE: u32 = 100;
/// Retries per page before a node is marked unavailable (§4.F step 1).
const LIST_MAX_RETRIES: u32 = 10;
/// Background sync bounded concurrency (§5 "semaphore of 10 for the sync stage").
const SYNC_CONCURRENCY: usize = 10;
const GUARD_USERNAME: &str = "guard";

/// Process-wide single-flight guard for the background sync stage (§4.F,
/// §5 "Reconciler's background sync is guarded by a process-wide lock; a
/// contending tick is dropped, not queued").
#[derive(Default)]
pub struct ReconcilerLock(AtomicBool);

impl ReconcilerLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire the lock. Returns a guard that releases it on
    /// drop, or `None` if a prior sync is still running.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<ReconcilerLockGuard> {
        if self.0.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            Some(ReconcilerLockGuard(Arc::clone(self)))
        } else {
            None
        }
    }
}

pub struct ReconcilerLockGuard(Arc<ReconcilerLock>);

impl Drop for ReconcilerLockGuard {
    fn drop(&mut self) {
        self.0 .0.store(false, Ordering::SeqCst);
    }
}

/// A node's authenticated client + token, reused across the listing and
/// sync stages of one tick so a node is logged into at most once per tick.
struct NodeCtx {
    client: Box<dyn NodeClient>,
    token: Option<String>,
}

/// §4.F step 1: authenticate and fetch one node's full user inventory,
/// either via the scripted bulk endpoint or paginated `list_users`.
/// Failures are swallowed into `(None, {})` plus an `UnavailableNode`
/// notification, per spec — a single bad node never aborts the tick.
async fn prepare_node(
    node: &Node,
    store: &dyn Store,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> (NodeCtx, NodeFetch) {
    let client = node::client_for(node);

    if !node.availabled() {
        return (NodeCtx { client, token: None }, NodeFetch { configs: None, users: HashMap::new() });
    }

    let token = match node::ensure_token(node, client.as_ref(), store, now).await {
        Ok(t) => t,
        Err(e) => {
            notifier.notify(Notification::UnavailableNode {
                node_id: node.id.value(),
                node_remark: node.remark.clone(),
                reason: e.to_string(),
            });
            return (NodeCtx { client, token: None }, NodeFetch { configs: None, users: HashMap::new() });
        }
    };

    let users = if let Some(script_url) = &node.script_url {
        fetch_scripted(node, client.as_ref(), script_url).await
    } else {
        list_all_users(client.as_ref(), &token).await
    };

    match users {
        Ok(users) => (NodeCtx { client, token: Some(token) }, NodeFetch { configs: None, users }),
        Err(e) => {
            notifier.notify(Notification::UnavailableNode {
                node_id: node.id.value(),
                node_remark: node.remark.clone(),
                reason: e.to_string(),
            });
            (NodeCtx { client, token: Some(token) }, NodeFetch { configs: None, users: HashMap::new() })
        }
    }
}

/// Paginated `list_users` over every page, retrying each page up to
/// `LIST_MAX_RETRIES` times before giving up on the whole node (§4.F step 1).
async fn list_all_users(client: &dyn NodeClient, token: &str) -> Result<HashMap<String, UserView>> {
    let count = client.users_count(token).await?;
    let pages = (count as f64 / f64::from(LIST_PAGE_SIZE)).ceil().max(1.0) as u32;
    let mut out = HashMap::new();
    for page in 1..=pages {
        let mut last_err = None;
        let mut ok = false;
        for _ in 0..LIST_MAX_RETRIES {
            match client.list_users(token, page, LIST_PAGE_SIZE).await {
                Ok(users) => {
                    for u in users {
                        out.insert(u.server_key.clone(), u);
                    }
                    ok = true;
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        if !ok {
            return Err(last_err.unwrap());
        }
    }
    Ok(out)
}

/// Scripted bulk inventory fetch (§4.F step 1 "Scripted nodes", §6
/// "Scripted inventory endpoint").
async fn fetch_scripted(
    node: &Node,
    client: &dyn NodeClient,
    script_url: &str,
) -> Result<HashMap<String, UserView>> {
    use crate::error::Error;

    let http = reqwest::Client::builder()
        .timeout(node::SCRIPTED_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;

    let url = format!("{}/api/users", script_url.trim_end_matches('/'));
    let resp = http
        .get(&url)
        .header("X-Api-Key", node.script_secret.clone().unwrap_or_default())
        .send()
        .await
        .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(Error::UpstreamUnavailable(format!("scripted inventory status {}", resp.status())));
    }
    let body = resp.text().await.map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
    let users = client.parse_scripted_users(&body)?;
    Ok(users.into_iter().map(|u| (u.server_key.clone(), u)).collect())
}

/// One full reconciliation tick (§4.F steps 1-6). Steps 1-5 run inline;
/// step 6 (background sync) is single-flighted and dispatched without
/// being awaited by the caller.
pub async fn run_tick(
    store: Arc<dyn Store>,
    config_cache: Arc<ConfigCache>,
    notifier: Arc<dyn Notifier>,
    lock: Arc<ReconcilerLock>,
    now: DateTime<Utc>,
) -> Result<()> {
    let nodes = store.load_nodes().await?;

    let prepared: Vec<(NodeId, NodeCtx, NodeFetch)> = stream::iter(nodes.iter().map(|n| {
        let store = store.as_ref();
        let notifier = notifier.as_ref();
        async move {
            let (ctx, fetch) = prepare_node(n, store, notifier, now).await;
            (n.id, ctx, fetch)
        }
    }))
    .buffer_unordered(SYNC_CONCURRENCY)
    .collect()
    .await;

    let mut node_ctxs: HashMap<NodeId, NodeCtx> = HashMap::new();
    let mut nodes_data: NodesData = HashMap::new();
    for (node_id, ctx, mut fetch) in prepared {
        fetch.configs = config_cache.get(node_id);
        nodes_data.insert(node_id, fetch);
        node_ctxs.insert(node_id, ctx);
    }

    let subs = store.load_subscriptions().await?;

    usage_engine::ingest(&nodes_data, &subs, &nodes, store.as_ref(), notifier.as_ref(), now).await?;
    usage_engine::refresh_caches(store.as_ref()).await?;

    let subs = store.load_subscriptions().await?;
    let services = store.load_services().await?;

    let Some(guard) = lock.try_acquire() else {
        notifier.notify(Notification::LockedTask { task: "Subscriptions Sync".into() });
        return Ok(());
    };

    tokio::spawn(async move {
        let _guard = guard;
        if let Err(e) = background_sync(store.as_ref(), notifier.as_ref(), &services, &nodes, &node_ctxs, &subs, &nodes_data, now).await {
            tracing::warn!(error = %e, "background sync tick failed");
        }
    });

    Ok(())
}

/// Union over `sub`'s selected services, intersected with its owner's
/// granted services, of their node ids (§3 Derived "Effective node set").
#[must_use]
pub fn effective_node_ids(sub: &Subscription, services: &[Service]) -> HashSet<NodeId> {
    let by_id: HashMap<_, _> = services.iter().map(|s| (s.id, s)).collect();
    sub.service_ids
        .iter()
        .filter_map(|sid| by_id.get(sid))
        .filter(|svc| svc.grants(sub.owner_id))
        .flat_map(|svc| svc.node_ids.iter().copied())
        .collect()
}

/// §4.F "background sync": drives the create/update/activate/deactivate
/// decision table for every `(sub, node)` pair, then garbage-collects
/// orphaned upstream users per node.
async fn background_sync(
    store: &dyn Store,
    notifier: &dyn Notifier,
    services: &[Service],
    nodes: &[Node],
    node_ctxs: &HashMap<NodeId, NodeCtx>,
    subs: &[Subscription],
    nodes_data: &NodesData,
    now: DateTime<Utc>,
) -> Result<()> {
    let live_server_keys: HashSet<&str> = subs
        .iter()
        .filter(|s| !s.removed)
        .map(|s| s.server_key.as_str())
        .collect();

    let mut pairs = Vec::new();
    for node in nodes {
        let Some(fetch) = nodes_data.get(&node.id) else { continue };
        if fetch.configs.is_none() {
            continue;
        }
        for sub in subs {
            if sub.removed || sub.should_be_removed(now) {
                continue;
            }
            pairs.push((node, sub));
        }
    }

    stream::iter(pairs.into_iter().map(|(node, sub)| {
        let node_ids = effective_node_ids(sub, services);
        async move {
            let Some(ctx) = node_ctxs.get(&node.id) else { return };
            let Some(fetch) = nodes_data.get(&node.id) else { return };
            sync_one(node, ctx, sub, &node_ids, fetch, now).await;
        }
    }))
    .buffer_unordered(SYNC_CONCURRENCY)
    .collect::<Vec<()>>()
    .await;

    for node in nodes {
        let Some(ctx) = node_ctxs.get(&node.id) else { continue };
        let Some(fetch) = nodes_data.get(&node.id) else { continue };
        if fetch.configs.is_none() {
            continue;
        }
        garbage_collect(node, ctx, fetch, &live_server_keys, notifier).await;
    }

    Ok(())
}

/// §4.F decision table for one `(sub, node)` pair. Each call is a
/// best-effort single attempt; failures are logged and swallowed — the
/// next tick re-converges.
async fn sync_one(
    node: &Node,
    ctx: &NodeCtx,
    sub: &Subscription,
    node_ids: &HashSet<NodeId>,
    fetch: &NodeFetch,
    now: DateTime<Utc>,
) {
    let Some(token) = &ctx.token else { return };
    let client = ctx.client.as_ref();
    let configs = fetch.configs.as_deref().unwrap_or(&[]);
    let user = fetch.users.get(&sub.server_key);
    let in_set = node_ids.contains(&node.id);
    let is_active = sub.is_active_at(now);

    let result = async {
        match user {
            None => {
                if is_active && in_set {
                    let desired = build_desired(node, sub, configs, None);
                    client.create_user(&desired, token).await?;
                }
            }
            Some(current) => {
                if !node.availabled() {
                    if current.is_active {
                        client.deactivate_user(&sub.server_key, token).await?;
                    }
                } else if !in_set {
                    if current.is_active {
                        client.deactivate_user(&sub.server_key, token).await?;
                    }
                } else {
                    let desired = build_desired(node, sub, configs, Some(current));
                    if needs_config_update(current, &desired) {
                        client.update_user(&sub.server_key, &desired, token).await?;
                    }
                    if is_active && !current.is_active {
                        client.activate_user(&sub.server_key, token).await?;
                    } else if !is_active && current.is_active {
                        client.deactivate_user(&sub.server_key, token).await?;
                    }
                }
            }
        }
        Result::Ok(())
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(
            node_id = node.id.value(),
            subscription_id = sub.id.value(),
            error = %e,
            "subscription node sync call failed, next tick will retry"
        );
    }
}

/// Desired upstream user projection for `sub` on `node`'s dialect (§4.F
/// "config sync", §9 "Polymorphism over three node dialects").
#[must_use]
fn build_desired(node: &Node, sub: &Subscription, configs: &[ConfigEntry], current: Option<&UserView>) -> DesiredUser {
    match node.kind {
        NodeKind::Marzban => desired_marzban(configs, &sub.access_key, &sub.server_key, current, sub.changed),
        NodeKind::Marzneshin | NodeKind::Rustneshin => desired_neshin(configs, &sub.access_key, &sub.server_key),
    }
}

/// marzban desired proxies/inbounds: credentials are kept from the current
/// user unless `changed` (a revoke rotated `access_key` and the next sync
/// must regenerate them) or the protocol is new to this user (§4.F "if
/// `sub.changed`, regenerate the per-protocol credentials ... otherwise
/// keep current credential values and only adjust the protocol set").
fn desired_marzban(
    configs: &[ConfigEntry],
    access_key: &str,
    server_key: &str,
    current: Option<&UserView>,
    changed: bool,
) -> DesiredUser {
    let mut inbound_tags: HashMap<String, Vec<String>> = HashMap::new();
    for entry in configs {
        if let ConfigEntry::Inbound { tag, protocol } = entry {
            inbound_tags.entry(protocol.clone()).or_default().push(tag.clone());
        }
    }
    let mut proxies = HashMap::new();
    for protocol in inbound_tags.keys() {
        let kept = if changed { None } else { current.and_then(|u| u.proxies.get(protocol).cloned()) };
        let value = kept.unwrap_or_else(|| {
            if protocol == "shadowsocks" || protocol == "trojan" {
                derive_password(access_key, protocol)
            } else {
                derive_uuid(access_key, protocol).to_string()
            }
        });
        proxies.insert(protocol.clone(), value);
    }
    DesiredUser { server_key: server_key.to_string(), service_ids: vec![], inbound_tags, proxies, key: None }
}

/// marzneshin/rustneshin desired `service_ids` (§4.F "require
/// `service_ids:[int]` (and accept an optional opaque `key`)").
fn desired_neshin(configs: &[ConfigEntry], access_key: &str, server_key: &str) -> DesiredUser {
    let service_ids = configs
        .iter()
        .filter_map(|c| match c {
            ConfigEntry::Service { id, .. } => Some(*id),
            ConfigEntry::Inbound { .. } => None,
        })
        .collect();
    DesiredUser {
        server_key: server_key.to_string(),
        service_ids,
        inbound_tags: HashMap::new(),
        proxies: HashMap::new(),
        key: Some(access_key.to_string()),
    }
}

/// Whether `current`'s protocol/service set or credentials differ from
/// `desired` (§4.F "config sync: ... compare to user's current; if
/// different, PUT update").
#[must_use]
fn needs_config_update(current: &UserView, desired: &DesiredUser) -> bool {
    if !desired.service_ids.is_empty() || !desired.inbound_tags.is_empty() {
        let mut current_services = current.service_ids.clone();
        current_services.sort_unstable();
        let mut desired_services = desired.service_ids.clone();
        desired_services.sort_unstable();
        if current_services != desired_services {
            return true;
        }
    }
    if current.inbound_tags != desired.inbound_tags {
        return true;
    }
    current.proxies != desired.proxies
}

/// §4.F "garbage collection": delete every upstream username that is
/// neither `"guard"` nor a live subscription's `server_key` (§8 S5).
async fn garbage_collect(
    node: &Node,
    ctx: &NodeCtx,
    fetch: &NodeFetch,
    live_server_keys: &HashSet<&str>,
    _notifier: &dyn Notifier,
) {
    let Some(token) = &ctx.token else { return };
    for server_key in fetch.users.keys() {
        if server_key == GUARD_USERNAME || live_server_keys.contains(server_key.as_str()) {
            continue;
        }
        if let Err(e) = ctx.client.delete_user(server_key, token).await {
            tracing::warn!(
                node_id = node.id.value(),
                server_key = %server_key,
                error = %e,
                "garbage collection delete failed, next tick will retry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{AdminId, ServiceId, SubscriptionId};
    use std::collections::HashMap as StdHashMap;

    fn base_sub(service_ids: Vec<ServiceId>) -> Subscription {
        Subscription {
            id: SubscriptionId(1),
            username: Some("alice".into()),
            owner_id: AdminId(1),
            access_key: "a".repeat(32),
            server_key: "srv_alice".into(),
            enabled: true,
            activated: true,
            reached: false,
            debted: false,
            onreached_expire: false,
            onreached_usage: false,
            removed: false,
            changed: false,
            limit_usage: 0,
            reset_usage: 0,
            limit_expire: 0,
            auto_delete_days: 0,
            note: None,
            total_usage: 0,
            online_at: None,
            created_at: Utc::now(),
            last_reset_at: None,
            last_revoke_at: None,
            last_request_at: None,
            inactive_at: None,
            reached_at: None,
            removed_at: None,
            last_client_agent: None,
            telegram_id: None,
            discord_webhook_url: None,
            service_ids,
        }
    }

    #[test]
    fn effective_node_ids_requires_owner_grant() {
        let services = vec![
            Service { id: ServiceId(1), remark: "eu".into(), node_ids: vec![NodeId(1), NodeId(2)], admin_ids: vec![AdminId(1)] },
            Service { id: ServiceId(2), remark: "us".into(), node_ids: vec![NodeId(3)], admin_ids: vec![AdminId(9)] },
        ];
        let sub = base_sub(vec![ServiceId(1), ServiceId(2)]);
        let nodes = effective_node_ids(&sub, &services);
        assert_eq!(nodes, [NodeId(1), NodeId(2)].into_iter().collect());
    }

    #[test]
    fn desired_marzban_regenerates_credentials_when_changed() {
        let configs = vec![ConfigEntry::Inbound { tag: "t1".into(), protocol: "vless".into() }];
        let mut current_proxies = StdHashMap::new();
        current_proxies.insert("vless".to_string(), "stale-uuid".to_string());
        let current = UserView { proxies: current_proxies, ..Default::default() };

        let unchanged = desired_marzban(&configs, &"k".repeat(32), "srv", Some(&current), false);
        assert_eq!(unchanged.proxies.get("vless"), Some(&"stale-uuid".to_string()));

        let changed = desired_marzban(&configs, &"k".repeat(32), "srv", Some(&current), true);
        assert_ne!(changed.proxies.get("vless"), Some(&"stale-uuid".to_string()));
    }

    #[test]
    fn desired_neshin_carries_service_ids_and_key() {
        let configs = vec![ConfigEntry::Service { id: 7, name: "svc".into() }];
        let desired = desired_neshin(&configs, &"k".repeat(32), "srv");
        assert_eq!(desired.service_ids, vec![7]);
        assert!(desired.key.is_some());
    }

    #[test]
    fn needs_config_update_detects_proxy_drift() {
        let current = UserView { proxies: StdHashMap::from([("vless".into(), "old".into())]), ..Default::default() };
        let mut desired = DesiredUser::default();
        desired.proxies.insert("vless".into(), "new".into());
        assert!(needs_config_update(&current, &desired));
    }

    #[test]
    fn needs_config_update_false_when_identical() {
        let current = UserView { service_ids: vec![1, 2], ..Default::default() };
        let desired = DesiredUser { service_ids: vec![2, 1], ..Default::default() };
        assert!(!needs_config_update(&current, &desired));
    }

    #[tokio::test]
    async fn single_flight_lock_rejects_concurrent_acquire() {
        let lock = Arc::new(ReconcilerLock::new());
        let first = lock.try_acquire();
        assert!(first.is_some());
        assert!(lock.try_acquire().is_none());
        drop(first);
        assert!(lock.try_acquire().is_some());
    }
}
