//! Node entity (§3 Data Model) and the dialect tag used to pick a
//! [`crate::core::node::NodeClient`] implementation (§9 "Polymorphism over
//! three node dialects").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::NodeId;

/// The three upstream REST dialects a node can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Marzban,
    Marzneshin,
    Rustneshin,
}

impl NodeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Marzban => "marzban",
            NodeKind::Marzneshin => "marzneshin",
            NodeKind::Rustneshin => "rustneshin",
        }
    }
}

/// Upstream proxy node.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub remark: String,
    pub kind: NodeKind,
    pub username: String,
    pub password: String,
    pub host: String,
    pub access_token: Option<String>,
    pub access_updated_at: Option<DateTime<Utc>>,
    pub offset_link: usize,
    pub batch_size: u32,
    pub priority: i32,
    pub usage_rate: f64,
    pub rate_display: Option<String>,
    pub script_url: Option<String>,
    pub script_secret: Option<String>,
    pub show_configs: bool,
    pub enabled: bool,
    pub removed: bool,
}

/// Token refresh window: refresh when null or older than 8 hours (§3 Node).
pub const ACCESS_TOKEN_TTL_SECS: i64 = 8 * 3600;

impl Node {
    /// `enabled ∧ ¬removed` (§3 Node "Availability").
    #[must_use]
    pub fn availabled(&self) -> bool {
        self.enabled && !self.removed
    }

    #[must_use]
    pub fn batch_size(&self) -> u32 {
        self.batch_size.max(1)
    }

    #[must_use]
    pub fn needs_token_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.access_updated_at {
            None => true,
            Some(at) => (now - at).num_seconds() >= ACCESS_TOKEN_TTL_SECS,
        }
    }

    #[must_use]
    pub fn is_scripted(&self) -> bool {
        self.script_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_node() -> Node {
        Node {
            id: NodeId(1),
            remark: "eu-1".into(),
            kind: NodeKind::Marzban,
            username: "admin".into(),
            password: "pw".into(),
            host: "https://node.example".into(),
            access_token: None,
            access_updated_at: None,
            offset_link: 0,
            batch_size: 0,
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

    #[test]
    fn availability_requires_enabled_and_not_removed() {
        let mut node = sample_node();
        assert!(node.availabled());
        node.enabled = false;
        assert!(!node.availabled());
        node.enabled = true;
        node.removed = true;
        assert!(!node.availabled());
    }

    #[test]
    fn batch_size_floors_at_one() {
        let node = sample_node();
        assert_eq!(node.batch_size(), 1);
    }

    #[test]
    fn token_refresh_required_when_null_or_stale() {
        let mut node = sample_node();
        let now = Utc::now();
        assert!(node.needs_token_refresh(now));

        node.access_updated_at = Some(now - Duration::hours(1));
        assert!(!node.needs_token_refresh(now));

        node.access_updated_at = Some(now - Duration::hours(9));
        assert!(node.needs_token_refresh(now));
    }

    #[test]
    fn node_kind_as_str_matches_dialect_name() {
        assert_eq!(NodeKind::Marzban.as_str(), "marzban");
        assert_eq!(NodeKind::Marzneshin.as_str(), "marzneshin");
        assert_eq!(NodeKind::Rustneshin.as_str(), "rustneshin");
    }
}
