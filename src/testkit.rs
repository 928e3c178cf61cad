//! Fixture builders shared by in-crate unit tests and the `tests/`
//! integration suite. Gated behind `#[cfg(any(test, feature = "testkit"))]`
//! in `lib.rs` — enable the `testkit` feature from an external crate to
//! reach these.

use std::collections::HashMap;

use chrono::Utc;

use crate::core::cache::LinksCache;
use crate::core::db::{create_pool, run_migrations};
use crate::core::domain::{
    Admin, AdminId, AdminRole, Node, NodeId, NodeKind, NotificationSinks, PresentationConfig,
    ResourceAccess, Service, ServiceId, Subscription, SubscriptionId, TotpState,
};
use crate::core::store::sqlite::SqliteStore;
use crate::core::store::Store;

/// Fresh in-memory SQLite store with migrations applied. Each call gets
/// its own isolated database (§8 "Diesel-backed tests use an in-memory
/// SQLite pool").
#[must_use]
pub fn in_memory_store() -> SqliteStore {
    let pool = create_pool(":memory:").expect("pool");
    run_migrations(&pool).expect("migrate");
    SqliteStore::new(pool)
}

/// Inserts and returns a bootstrap OWNER admin with permissive defaults.
pub async fn seed_owner(store: &dyn Store) -> Admin {
    let admin = Admin {
        id: AdminId(0),
        username: Some("owner".into()),
        password_hash: "hash".into(),
        role: AdminRole::Owner,
        api_key: "k".repeat(64),
        secret: "s".repeat(32),
        access: ResourceAccess { create: true, update: true, remove: true },
        count_limit: 0,
        usage_limit: 0,
        current_count: 0,
        current_usage: 0,
        placeholders: HashMap::new(),
        presentation: PresentationConfig::with_defaults(),
        notifications: NotificationSinks::default(),
        totp: TotpState::default(),
        expire_warning_days: 1,
        usage_warning_percent: 90,
        created_at: Utc::now(),
        removed: false,
    };
    let id = store.insert_admin(&admin).await.expect("insert_admin");
    store.get_admin_by_id(id).await.expect("get_admin_by_id").expect("admin exists")
}

/// A sample enabled, available Marzban node.
#[must_use]
pub fn sample_node(id: i32) -> Node {
    Node {
        id: NodeId(id),
        remark: format!("node-{id}"),
        kind: NodeKind::Marzban,
        username: "admin".into(),
        password: "password".into(),
        host: "https://node.example".into(),
        access_token: None,
        access_updated_at: None,
        offset_link: 0,
        batch_size: 2,
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

/// A service bundling the given nodes and granted to the given admins.
#[must_use]
pub fn sample_service(id: i32, node_ids: &[NodeId], admin_ids: &[AdminId]) -> Service {
    Service { id: ServiceId(id), remark: format!("service-{id}"), node_ids: node_ids.to_vec(), admin_ids: admin_ids.to_vec() }
}

/// A minimal enabled, activated subscription for fixture composition.
/// Callers overwrite whichever fields their scenario cares about.
#[must_use]
pub fn sample_subscription(id: i32, owner_id: AdminId) -> Subscription {
    Subscription {
        id: SubscriptionId(id),
        username: Some(format!("user{id}")),
        owner_id,
        access_key: format!("{:032x}", id),
        server_key: format!("{:016x}", id),
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
        service_ids: vec![],
    }
}

/// Seeds a node's prototype link list directly, bypassing the upstream
/// HTTP refresh procedure (§4.D) entirely — for `link_generator::generate`
/// tests that only care about rewrite/interleave behavior.
pub fn seed_links(cache: &LinksCache, node_id: NodeId, links: Vec<String>) {
    cache.set(node_id, links);
}
