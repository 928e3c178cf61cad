//! Config Cache (§4.C): per-node inbound/service catalog, refreshed every
//! minute. Consumed by the Reconciler, Link Generator, and Links Cache
//! refresher.

use dashmap::DashMap;

use crate::core::domain::{Node, NodeId};
use crate::core::node::{client_for, ensure_token, ConfigEntry};
use crate::core::notify::{Notification, Notifier};
use crate::core::store::Store;

/// Process-wide map `node_id -> list[InboundOrService]`.
///
/// `None` in the map means "never fetched"; `Some(vec![])` means "fetched,
/// came back empty" (§4.C: "store an empty list for that node (explicit
/// 'known-empty') so downstream code can distinguish from 'never
/// fetched'"). We model that distinction with the map entry's mere
/// presence vs. absence, not with an `Option` inside the value.
#[derive(Default)]
pub struct ConfigCache {
    inner: DashMap<NodeId, Vec<ConfigEntry>>,
}

impl ConfigCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, node_id: NodeId, configs: Vec<ConfigEntry>) {
        self.inner.insert(node_id, configs);
    }

    /// `None` = never fetched; `Some(&[])` = fetched, known-empty.
    #[must_use]
    pub fn get(&self, node_id: NodeId) -> Option<Vec<ConfigEntry>> {
        self.inner.get(&node_id).map(|v| v.clone())
    }

    pub fn clear(&self, node_id: NodeId) {
        self.inner.remove(&node_id);
    }

    /// §4.C scheduled refresh: per node, fetch the inbound/service
    /// catalog and record it; a non-availabled node or any fetch failure
    /// records known-empty rather than leaving the entry untouched, so a
    /// since-disabled or unreachable node never serves a stale catalog.
    pub async fn refresh_all(&self, nodes: &[Node], store: &dyn Store, notifier: &dyn Notifier, now: chrono::DateTime<chrono::Utc>) {
        for node in nodes {
            if !node.availabled() {
                self.set(node.id, vec![]);
                continue;
            }
            let client = client_for(node);
            let outcome = async {
                let token = ensure_token(node, client.as_ref(), store, now).await?;
                client.get_inbounds_or_services(&token).await
            }
            .await;
            match outcome {
                Ok(configs) => self.set(node.id, configs),
                Err(e) => {
                    self.set(node.id, vec![]);
                    notifier.notify(Notification::UnavailableNode {
                        node_id: node.id.value(),
                        node_remark: node.remark.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_node_is_never_fetched() {
        let cache = ConfigCache::new();
        assert!(cache.get(NodeId(1)).is_none());
    }

    #[test]
    fn known_empty_is_distinct_from_never_fetched() {
        let cache = ConfigCache::new();
        cache.set(NodeId(1), vec![]);
        assert_eq!(cache.get(NodeId(1)), Some(vec![]));
    }

    #[test]
    fn clear_removes_entry_entirely() {
        let cache = ConfigCache::new();
        cache.set(NodeId(1), vec![]);
        cache.clear(NodeId(1));
        assert!(cache.get(NodeId(1)).is_none());
    }
}
