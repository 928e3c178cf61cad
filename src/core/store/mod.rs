//! Persistence layer (§4.A Store).
//!
//! `Store` is the trait every core service programs against; `sqlite`
//! holds the Diesel/SQLite implementation. Keeping the trait separate from
//! its backend lets the reconciler/usage engine/reached tracker be tested
//! against an in-memory SQLite pool without touching the file system
//! (§8 "Diesel-backed tests use an in-memory SQLite pool").

pub mod filters;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::core::domain::{
    Admin, AdminId, AutoRenewal, AutoRenewalId, Node, NodeId, Service, ServiceId, Subscription,
    SubscriptionId, SubscriptionUsage, SubscriptionUsageLog,
};
use crate::error::Result;

/// Fields for a freshly created subscription (§4.A `bulk_create`). Fields
/// left `None` get Store-assigned defaults (`access_key`/`server_key`
/// generation).
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub username: String,
    pub access_key: Option<String>,
    pub limit_usage: u64,
    pub limit_expire: i64,
    pub auto_delete_days: u32,
    pub note: Option<String>,
    pub service_ids: Vec<ServiceId>,
}

/// `Sometimes<T>`-style patch (§9 Design Notes, "Dynamic keyword arguments
/// on update"): only `Some` fields are applied.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub enabled: Option<bool>,
    pub limit_usage: Option<u64>,
    pub limit_expire: Option<i64>,
    pub auto_delete_days: Option<u32>,
    pub note: Option<Option<String>>,
    pub service_ids: Option<Vec<ServiceId>>,
}

/// One observed per-node lifetime counter for a subscription this tick
/// (§4.G Usage Engine input).
#[derive(Debug, Clone, Copy)]
pub struct ObservedUsage {
    pub lifetime_used_traffic: u64,
    pub hour_bucket: DateTime<Utc>,
    pub node_usage_rate: f64,
}

/// Outcome of `bulk_upsert_usages` relevant to the caller (§4.A: every
/// upsert calls `activate_expire`; the reconciler/usage engine needs to
/// know whether that fired to emit the `ActivatedExpire` notification).
#[derive(Debug, Clone, Default)]
pub struct UpsertUsagesOutcome {
    pub activated_expire: bool,
}

/// List filters mirrored 1:1 onto `filters::SubscriptionFilter` SQL
/// fragments (§9 "Hybrid ORM properties expressed two ways").
#[derive(Debug, Clone, Default)]
pub struct SubscriptionQuery {
    pub limited: Option<bool>,
    pub expired: Option<bool>,
    pub is_active: Option<bool>,
    pub enabled: Option<bool>,
    pub online: Option<bool>,
    pub search: Option<String>,
    pub owner_id: Option<AdminId>,
    pub page: u32,
    pub size: u32,
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- Nodes / Services -------------------------------------------------
    async fn load_nodes(&self) -> Result<Vec<Node>>;
    async fn get_node(&self, id: NodeId) -> Result<Option<Node>>;
    async fn update_node_access(
        &self,
        id: NodeId,
        token: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn load_services(&self) -> Result<Vec<Service>>;

    // -- Admins -------------------------------------------------------------
    /// Every non-removed admin (§4.H reached tracker needs each
    /// subscription owner's warning thresholds; the reseller gate needs
    /// every seller/reseller's usage quota).
    async fn load_admins(&self) -> Result<Vec<Admin>>;
    /// Inserts a fresh admin row (OWNER bootstrap, seller/reseller
    /// provisioning). Not part of the source's reconcile/usage/reached
    /// path, but every one of those needs at least one admin to exist;
    /// the out-of-scope HTTP handlers are this method's normal caller.
    async fn insert_admin(&self, admin: &Admin) -> Result<AdminId>;
    async fn get_admin_by_id(&self, id: AdminId) -> Result<Option<Admin>>;
    async fn get_admin_by_username(&self, username: &str) -> Result<Option<Admin>>;
    async fn get_admin_by_api_key(&self, api_key: &str) -> Result<Option<Admin>>;
    async fn update_admin(&self, admin: &Admin) -> Result<()>;
    /// `admin.sync_current_counts()` (§4.A): one statement,
    /// `current_count = COUNT(subs WHERE owner_id=admin.id AND ¬removed)`.
    async fn sync_admin_current_counts(&self) -> Result<()>;
    /// Reseller gating (§4.H): set/clear `debted` on all of an owner's
    /// subscriptions via two owner-id-set UPDATE statements.
    async fn apply_reseller_gate(&self, over_quota: &[AdminId], under_quota: &[AdminId]) -> Result<()>;

    // -- Subscriptions --------------------------------------------------------
    /// Loads every non-removed subscription with its service-id
    /// projection (§4.F step 2 "load all subscriptions with their
    /// services-nodes graph in one shot").
    async fn load_subscriptions(&self) -> Result<Vec<Subscription>>;
    async fn get_subscription_by_access_key(&self, access_key: &str) -> Result<Option<Subscription>>;
    async fn list_subscriptions(&self, query: &SubscriptionQuery) -> Result<Vec<Subscription>>;
    async fn count_subscriptions(&self, query: &SubscriptionQuery) -> Result<i64>;

    /// §4.A `bulk_create`: validates no username collisions among live
    /// rows, allocates `access_key`/`server_key`, inserts, attaches
    /// service intersections, bumps `owner.current_count`.
    async fn bulk_create_subscriptions(
        &self,
        owner: &Admin,
        items: &[NewSubscription],
    ) -> Result<Vec<Subscription>>;

    /// §4.A `bulk_remove`: `removed=true, username=NULL, removed_at=now`
    /// in one statement.
    async fn bulk_remove_subscriptions(&self, ids: &[SubscriptionId], now: DateTime<Utc>) -> Result<()>;

    async fn apply_patch(&self, id: SubscriptionId, patch: &SubscriptionPatch) -> Result<()>;
    async fn replace_subscription(&self, sub: &Subscription) -> Result<()>;
    async fn touch_client_request(
        &self,
        id: SubscriptionId,
        at: DateTime<Utc>,
        agent: Option<&str>,
    ) -> Result<bool>;

    // -- Usage ingestion (§4.A, §4.G) ----------------------------------------
    async fn load_usage_rows(&self, sub_id: SubscriptionId) -> Result<Vec<SubscriptionUsage>>;
    /// §4.A `bulk_upsert_usages`: for each `(node -> observed)` entry,
    /// compute the delta against the existing `(sub, node, bucket)` row
    /// and apply the reset/increase/fresh rules in `domain::usage`.
    async fn bulk_upsert_usages(
        &self,
        sub_id: SubscriptionId,
        observed: &HashMap<NodeId, ObservedUsage>,
        now: DateTime<Utc>,
    ) -> Result<UpsertUsagesOutcome>;
    /// §4.A `sync_cached_usages`: one SQL update, `total_usage =
    /// Σmax(usage,0)` and `online_at = max(updated_at)` per subscription.
    async fn sync_cached_usages(&self) -> Result<()>;

    // -- Hourly usage log (§4.G) ----------------------------------------------
    async fn sum_usage_total(&self, sub_id: SubscriptionId) -> Result<u64>;
    async fn sum_usage_logged(&self, sub_id: SubscriptionId) -> Result<u64>;
    async fn upsert_usage_log(&self, sub_id: SubscriptionId, bucket: DateTime<Utc>, delta: u64) -> Result<()>;
    async fn bump_admin_usage(&self, id: AdminId, delta: u64) -> Result<()>;

    // -- Auto-renewals (§4.H) -------------------------------------------------
    async fn auto_renewals_for(&self, sub_id: SubscriptionId) -> Result<Vec<AutoRenewal>>;
    async fn delete_auto_renewal(&self, id: AutoRenewalId) -> Result<()>;
    async fn insert_auto_renewal(&self, renewal: &AutoRenewal) -> Result<AutoRenewalId>;
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::core::db::{create_pool, run_migrations};
    use crate::core::store::sqlite::SqliteStore;

    pub fn in_memory_store() -> SqliteStore {
        let pool = create_pool(":memory:").expect("pool");
        run_migrations(&pool).expect("migrate");
        SqliteStore::new(pool)
    }
}
