//! Node Client (§4.B): a dialect-typed client for a node's REST surface.
//!
//! `NodeClient` is the single interface the Reconciler programs against
//! (§9 "Polymorphism over three node dialects"); dialect-specific payload
//! shapes, endpoints, and pagination live behind it in `marzban`,
//! `marzneshin`, and `rustneshin`. The Reconciler never branches on
//! `NodeKind` itself — it only calls `NodeClient` methods and reads back
//! the common `UserView`.

mod neshin;
mod shared;

pub mod marzban;
pub mod marzneshin;
pub mod rustneshin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

use crate::core::domain::{Node, NodeKind};
use crate::core::store::Store;
use crate::error::Result;

/// 10s timeout for node REST calls (§4.B, §5).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// 60s timeout for scripted bulk inventory fetches (§4.F, §5).
pub const SCRIPTED_TIMEOUT: Duration = Duration::from_secs(60);

/// A single inbound (marzban) or service (marzneshin/rustneshin) catalog
/// entry (§4.C Config Cache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEntry {
    Inbound { tag: String, protocol: String },
    Service { id: i64, name: String },
}

/// The common projection of an upstream user, dialect-agnostic
/// (§9 "the Reconciler stays dialect-agnostic and consumes only the
/// common `UserView`").
#[derive(Debug, Clone, Default)]
pub struct UserView {
    pub server_key: String,
    pub is_active: bool,
    pub lifetime_used_traffic: u64,
    pub created_at: DateTime<Utc>,
    /// marzneshin/rustneshin: service ids the user belongs to.
    pub service_ids: Vec<i64>,
    /// marzban: per-protocol inbound tags.
    pub inbound_tags: HashMap<String, Vec<String>>,
    /// marzban: per-protocol credential map (uuid or password).
    pub proxies: HashMap<String, String>,
    /// marzban ready-made links; others require a subscription_url fetch.
    pub links: Vec<String>,
    pub subscription_url: Option<String>,
}

/// Desired state for a create/update call, built by the Reconciler from a
/// subscription's effective config + derived credentials (§4.F "config
/// sync").
#[derive(Debug, Clone, Default)]
pub struct DesiredUser {
    pub server_key: String,
    pub service_ids: Vec<i64>,
    pub inbound_tags: HashMap<String, Vec<String>>,
    pub proxies: HashMap<String, String>,
    /// Optional opaque key passed to marzneshin/rustneshin creates.
    pub key: Option<String>,
}

#[async_trait]
pub trait NodeClient: Send + Sync {
    fn kind(&self) -> NodeKind;

    async fn login(&self, username: &str, password: &str) -> Result<String>;
    async fn get_inbounds_or_services(&self, token: &str) -> Result<Vec<ConfigEntry>>;
    async fn get_user(&self, server_key: &str, token: &str) -> Result<Option<UserView>>;
    async fn list_users(&self, token: &str, page: u32, size: u32) -> Result<Vec<UserView>>;
    async fn create_user(&self, desired: &DesiredUser, token: &str) -> Result<UserView>;
    async fn update_user(&self, server_key: &str, desired: &DesiredUser, token: &str) -> Result<UserView>;
    async fn delete_user(&self, server_key: &str, token: &str) -> Result<()>;
    async fn activate_user(&self, server_key: &str, token: &str) -> Result<()>;
    async fn deactivate_user(&self, server_key: &str, token: &str) -> Result<()>;
    async fn reset_user(&self, server_key: &str, token: &str) -> Result<()>;
    /// §4.F "revoke_sub": rotates the server-side credential derived from
    /// a (now-rotated) `access_key`, returning the refreshed user.
    async fn revoke_sub(&self, desired: &DesiredUser, token: &str) -> Result<UserView>;
    async fn users_count(&self, token: &str) -> Result<u64>;
    /// Extracts client link strings for `user` (§4.D step 5): marzban
    /// reads `user.links` directly; the others fetch
    /// `subscription_url + "/v2ray"` and base64-decode the body.
    async fn links_for(&self, user: &UserView, token: &str) -> Result<Vec<String>>;
    /// Decodes a scripted-inventory response body (§4.F step 1 "Scripted
    /// nodes") in this dialect's `{users: [UserResponse...]}` schema.
    fn parse_scripted_users(&self, body: &str) -> Result<Vec<UserView>>;
}

/// A bare HTTP client for the scripted bulk-inventory endpoint, which is
/// dialect-agnostic transport over a dialect-specific body (§4.F, §6
/// "Scripted inventory endpoint").
#[must_use]
pub fn scripted_client() -> reqwest::Client {
    shared::build_client()
}

/// Build the right `NodeClient` for a node's dialect (§9 "tagged variant
/// ... with a single interface trait").
#[must_use]
pub fn client_for(node: &Node) -> Box<dyn NodeClient> {
    match node.kind {
        NodeKind::Marzban => Box::new(marzban::MarzbanClient::new(node.host.clone())),
        NodeKind::Marzneshin => Box::new(marzneshin::MarzneshinClient::new(node.host.clone())),
        NodeKind::Rustneshin => Box::new(rustneshin::RustneshinClient::new(node.host.clone())),
    }
}

/// Returns a valid bearer token for `node`, logging in and persisting the
/// refresh through `store` when the cached one is missing or older than
/// `ACCESS_TOKEN_TTL_SECS` (§3 Node "refresh when null or older than 8 h",
/// §5 cadence table "Node access token refresh | every 8 h"). Shared by
/// the Reconciler and the Links Cache refresher so both observe the same
/// refresh policy.
pub async fn ensure_token(
    node: &Node,
    client: &dyn NodeClient,
    store: &dyn Store,
    now: DateTime<Utc>,
) -> Result<String> {
    if !node.needs_token_refresh(now) {
        if let Some(token) = &node.access_token {
            return Ok(token.clone());
        }
    }
    let token = client.login(&node.username, &node.password).await?;
    store.update_node_access(node.id, Some(token.clone()), now).await?;
    Ok(token)
}
