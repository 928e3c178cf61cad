//! Links Cache (§4.D): per-node prototype link list, produced by
//! maintaining a synthetic `"guard"` subscription on each node and
//! extracting its link bundle every minute.

use std::collections::HashMap;

use dashmap::DashMap;
use rand::RngCore;

use crate::core::domain::{derive_password, derive_uuid, Node, NodeId};
use crate::core::node::{ensure_token, ConfigEntry, DesiredUser, NodeClient};
use crate::core::store::Store;
use crate::error::Result;

const GUARD_USERNAME: &str = "guard";

/// `LINKS[node_id]` (§4.D step 6). Absence and known-empty both read back
/// as `vec![]` — callers never need to fetch a node's prototype links
/// before they exist, only to know whether they are non-empty.
#[derive(Default)]
pub struct LinksCache {
    inner: DashMap<NodeId, Vec<String>>,
}

impl LinksCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, node_id: NodeId) -> Vec<String> {
        self.inner.get(&node_id).map(|v| v.clone()).unwrap_or_default()
    }

    pub(crate) fn set(&self, node_id: NodeId, links: Vec<String>) {
        self.inner.insert(node_id, links);
    }

    /// Runs the §4.D refresh procedure for one node, recording an empty
    /// list on any step's failure so a prior good value does not linger
    /// stale. Returns whether the node's links were refreshed
    /// successfully (non-availability and empty configs both count as a
    /// recorded-empty, not a failure, per step 1/2).
    pub async fn refresh_node(
        &self,
        node: &Node,
        configs: Option<Vec<ConfigEntry>>,
        store: &dyn Store,
        now: chrono::DateTime<chrono::Utc>,
    ) -> bool {
        if !node.availabled() {
            self.set(node.id, vec![]);
            return true;
        }
        let Some(configs) = configs else {
            self.set(node.id, vec![]);
            return true;
        };
        if configs.is_empty() {
            self.set(node.id, vec![]);
            return true;
        }

        let client = crate::core::node::client_for(node);
        match self.refresh_with_client(node, &configs, client.as_ref(), store, now).await {
            Ok(links) => {
                self.set(node.id, links);
                true
            }
            Err(_) => {
                self.set(node.id, vec![]);
                false
            }
        }
    }

    async fn refresh_with_client(
        &self,
        node: &Node,
        configs: &[ConfigEntry],
        client: &dyn NodeClient,
        store: &dyn Store,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<String>> {
        let token = ensure_token(node, client, store, now).await?;
        let existing = client.get_user(GUARD_USERNAME, &token).await?;

        let desired = desired_guard_user(configs);
        let user = match existing {
            None => client.create_user(&desired, &token).await?,
            Some(current) => {
                if needs_update(&current.proxies, &current.inbound_tags, &current.service_ids, &desired) {
                    client.update_user(GUARD_USERNAME, &desired, &token).await?
                } else {
                    current
                }
            }
        };

        let links = client.links_for(&user, &token).await?;
        Ok(links.into_iter().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    /// Refreshes every node, returning true iff all succeeded (§4.D
    /// "caller may choose to retry up to 5 times at startup").
    pub async fn refresh_all(
        &self,
        nodes: &[Node],
        configs_by_node: &HashMap<NodeId, Vec<ConfigEntry>>,
        store: &dyn Store,
        now: chrono::DateTime<chrono::Utc>,
    ) -> bool {
        let mut all_ok = true;
        for node in nodes {
            let configs = configs_by_node.get(&node.id).cloned();
            let ok = self.refresh_node(node, configs, store, now).await;
            all_ok &= ok;
        }
        all_ok
    }

    /// Retries `refresh_all` up to `max_attempts` times, for use at
    /// process startup (§4.D "retry up to 5 times at startup").
    pub async fn refresh_all_with_retry(
        &self,
        nodes: &[Node],
        configs_by_node: &HashMap<NodeId, Vec<ConfigEntry>>,
        store: &dyn Store,
        now: chrono::DateTime<chrono::Utc>,
        max_attempts: u32,
    ) -> bool {
        for attempt in 1..=max_attempts.max(1) {
            if self.refresh_all(nodes, configs_by_node, store, now).await {
                return true;
            }
            tracing::warn!(attempt, "links cache startup refresh incomplete, retrying");
        }
        false
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Builds the desired guard-user projection from a node's config catalog:
/// marzban gets all inbound protocols/tags enabled; marzneshin/rustneshin
/// get all service ids, plus a fresh `access_key`-shaped `key` (§4.D
/// step 3/4).
fn desired_guard_user(configs: &[ConfigEntry]) -> DesiredUser {
    let mut inbound_tags: HashMap<String, Vec<String>> = HashMap::new();
    let mut proxies: HashMap<String, String> = HashMap::new();
    let mut service_ids = vec![];

    let guard_key = random_hex(16);
    for entry in configs {
        match entry {
            ConfigEntry::Inbound { tag, protocol } => {
                inbound_tags.entry(protocol.clone()).or_default().push(tag.clone());
                proxies.entry(protocol.clone()).or_insert_with(|| {
                    if protocol == "shadowsocks" || protocol == "trojan" {
                        derive_password(&guard_key, protocol)
                    } else {
                        derive_uuid(&guard_key, protocol).to_string()
                    }
                });
            }
            ConfigEntry::Service { id, .. } => service_ids.push(*id),
        }
    }

    DesiredUser {
        server_key: GUARD_USERNAME.to_string(),
        service_ids,
        inbound_tags,
        proxies,
        key: Some(guard_key),
    }
}

fn needs_update(
    current_proxies: &HashMap<String, String>,
    current_inbounds: &HashMap<String, Vec<String>>,
    current_service_ids: &[i64],
    desired: &DesiredUser,
) -> bool {
    let protocols_differ = current_proxies.keys().collect::<std::collections::HashSet<_>>()
        != desired.proxies.keys().collect::<std::collections::HashSet<_>>();
    let inbounds_differ = current_inbounds != &desired.inbound_tags;
    let mut current_sorted = current_service_ids.to_vec();
    current_sorted.sort_unstable();
    let mut desired_sorted = desired.service_ids.clone();
    desired_sorted.sort_unstable();
    let services_differ = current_sorted != desired_sorted;
    protocols_differ || inbounds_differ || services_differ
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::NodeKind;
    use crate::core::store::test_support::in_memory_store;

    fn sample_node(id: i32, enabled: bool) -> Node {
        Node {
            id: NodeId(id),
            remark: "n".into(),
            kind: NodeKind::Marzban,
            username: "admin".into(),
            password: "pw".into(),
            host: "https://node.example".into(),
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
            enabled,
            removed: false,
        }
    }

    #[tokio::test]
    async fn unavailable_node_records_empty_without_calling_out() {
        let store = in_memory_store();
        let cache = LinksCache::new();
        let node = sample_node(1, false);
        let ok = cache.refresh_node(&node, Some(vec![]), &store, chrono::Utc::now()).await;
        assert!(ok);
        assert_eq!(cache.get(NodeId(1)), Vec::<String>::new());
    }

    #[tokio::test]
    async fn never_fetched_configs_record_empty() {
        let store = in_memory_store();
        let cache = LinksCache::new();
        let node = sample_node(2, true);
        let ok = cache.refresh_node(&node, None, &store, chrono::Utc::now()).await;
        assert!(ok);
        assert_eq!(cache.get(NodeId(2)), Vec::<String>::new());
    }

    #[test]
    fn desired_guard_user_covers_every_inbound_protocol() {
        let configs = vec![
            ConfigEntry::Inbound { tag: "t1".into(), protocol: "vless".into() },
            ConfigEntry::Inbound { tag: "t2".into(), protocol: "vmess".into() },
        ];
        let desired = desired_guard_user(&configs);
        assert_eq!(desired.proxies.len(), 2);
        assert_eq!(desired.inbound_tags.len(), 2);
        assert_eq!(desired.server_key, "guard");
    }

    #[test]
    fn needs_update_detects_service_id_set_change() {
        let desired = DesiredUser { service_ids: vec![1, 2], ..Default::default() };
        assert!(needs_update(&HashMap::new(), &HashMap::new(), &[1], &desired));
        assert!(!needs_update(&HashMap::new(), &HashMap::new(), &[2, 1], &desired));
    }
}
