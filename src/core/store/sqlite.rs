//! SQLite store implementation using Diesel (§4.A Store).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rand::RngCore;

use super::{
    NewSubscription, ObservedUsage, Store, SubscriptionPatch, SubscriptionQuery, UpsertUsagesOutcome,
};
use crate::core::db::model::{
    AdminRow, AutoRenewalRow, NodeRow, ServiceRow, SubscriptionRow, SubscriptionUsageLogRow,
    SubscriptionUsageRow,
};
use crate::core::db::schema::{
    admins, nodes, service_admin_association, service_node_association,
    service_subscription_association, services, subscription_auto_renewals, subscription_logs,
    subscription_usages, subscriptions,
};
use crate::core::db::DbPool;
use crate::core::domain::{
    compute_delta, hour_bucket, scale, Admin, AdminId, AutoRenewal, AutoRenewalId, CounterDelta,
    Node, NodeId, Service, ServiceId, Subscription, SubscriptionId, SubscriptionUsage,
    SubscriptionUsageLog,
};
use crate::error::{Error, Result};

/// SQLite-backed store. Holds a pooled connection per call (§5 "Database
/// connection pool"); every public method acquires, does its work, and
/// releases.
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<SqliteConnection>>> {
        self.pool.get().map_err(|e| Error::Connection(e.to_string()))
    }

    fn service_ids_for_subscription(
        conn: &mut SqliteConnection,
        sub_id: SubscriptionId,
    ) -> Result<Vec<ServiceId>> {
        service_subscription_association::table
            .filter(service_subscription_association::subscription_id.eq(sub_id.value()))
            .select(service_subscription_association::service_id)
            .load::<i32>(conn)
            .map(|ids| ids.into_iter().map(ServiceId).collect())
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn node_ids_for_service(conn: &mut SqliteConnection, service_id: ServiceId) -> Result<Vec<NodeId>> {
        service_node_association::table
            .filter(service_node_association::service_id.eq(service_id.value()))
            .select(service_node_association::node_id)
            .load::<i32>(conn)
            .map(|ids| ids.into_iter().map(NodeId).collect())
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn admin_ids_for_service(conn: &mut SqliteConnection, service_id: ServiceId) -> Result<Vec<AdminId>> {
        service_admin_association::table
            .filter(service_admin_association::service_id.eq(service_id.value()))
            .select(service_admin_association::admin_id)
            .load::<i32>(conn)
            .map(|ids| ids.into_iter().map(AdminId).collect())
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn random_hex(len_bytes: usize) -> String {
        let mut buf = vec![0u8; len_bytes];
        rand::thread_rng().fill_bytes(&mut buf);
        hex::encode(buf)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_nodes(&self) -> Result<Vec<Node>> {
        let mut conn = self.conn()?;
        let rows: Vec<NodeRow> = nodes::table
            .filter(nodes::removed.eq(false))
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.into_iter().map(NodeRow::into_domain).collect()
    }

    async fn get_node(&self, id: NodeId) -> Result<Option<Node>> {
        let mut conn = self.conn()?;
        let row: Option<NodeRow> = nodes::table
            .find(id.value())
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(NodeRow::into_domain).transpose()
    }

    async fn update_node_access(
        &self,
        id: NodeId,
        token: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::update(nodes::table.find(id.value()))
            .set((
                nodes::access_token.eq(token),
                nodes::access_updated_at.eq(Some(updated_at.to_rfc3339())),
            ))
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn load_services(&self) -> Result<Vec<Service>> {
        let mut conn = self.conn()?;
        let rows: Vec<ServiceRow> = services::table
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id = ServiceId(row.id);
            let node_ids = Self::node_ids_for_service(&mut conn, id)?;
            let admin_ids = Self::admin_ids_for_service(&mut conn, id)?;
            out.push(row.into_domain(node_ids, admin_ids));
        }
        Ok(out)
    }

    async fn load_admins(&self) -> Result<Vec<Admin>> {
        let mut conn = self.conn()?;
        let rows: Vec<AdminRow> = admins::table
            .filter(admins::removed.eq(false))
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.into_iter().map(AdminRow::into_domain).collect()
    }

    async fn get_admin_by_id(&self, id: AdminId) -> Result<Option<Admin>> {
        let mut conn = self.conn()?;
        let row: Option<AdminRow> = admins::table
            .find(id.value())
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(AdminRow::into_domain).transpose()
    }

    async fn get_admin_by_username(&self, username: &str) -> Result<Option<Admin>> {
        let mut conn = self.conn()?;
        let row: Option<AdminRow> = admins::table
            .filter(admins::username.eq(username))
            .filter(admins::removed.eq(false))
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(AdminRow::into_domain).transpose()
    }

    async fn get_admin_by_api_key(&self, api_key: &str) -> Result<Option<Admin>> {
        let mut conn = self.conn()?;
        let row: Option<AdminRow> = admins::table
            .filter(admins::api_key.eq(api_key))
            .filter(admins::removed.eq(false))
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(AdminRow::into_domain).transpose()
    }

    async fn insert_admin(&self, admin: &Admin) -> Result<AdminId> {
        let mut conn = self.conn()?;
        let row = AdminRow::from_domain(admin)?;
        diesel::insert_into(admins::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        let id: i32 = diesel::sql_query("SELECT last_insert_rowid() AS id")
            .get_result::<IdRow>(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?
            .id;
        Ok(AdminId(id))
    }

    async fn update_admin(&self, admin: &Admin) -> Result<()> {
        let mut conn = self.conn()?;
        let row = AdminRow::from_domain(admin)?;
        diesel::update(admins::table.find(admin.id.value()))
            .set(row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn sync_admin_current_counts(&self) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::sql_query(
            "UPDATE admins SET current_count = (
                SELECT COUNT(*) FROM subscriptions
                WHERE subscriptions.owner_id = admins.id AND subscriptions.removed = 0
            )",
        )
        .execute(&mut conn)
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn apply_reseller_gate(&self, over_quota: &[AdminId], under_quota: &[AdminId]) -> Result<()> {
        let mut conn = self.conn()?;
        if !over_quota.is_empty() {
            let ids: Vec<i32> = over_quota.iter().map(|id| id.value()).collect();
            diesel::update(subscriptions::table.filter(subscriptions::owner_id.eq_any(ids)))
                .set(subscriptions::debted.eq(true))
                .execute(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
        }
        if !under_quota.is_empty() {
            let ids: Vec<i32> = under_quota.iter().map(|id| id.value()).collect();
            diesel::update(subscriptions::table.filter(subscriptions::owner_id.eq_any(ids)))
                .set(subscriptions::debted.eq(false))
                .execute(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
        }
        Ok(())
    }

    async fn load_subscriptions(&self) -> Result<Vec<Subscription>> {
        let mut conn = self.conn()?;
        let rows: Vec<SubscriptionRow> = subscriptions::table
            .filter(subscriptions::removed.eq(false))
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id = SubscriptionId(row.id);
            let service_ids = Self::service_ids_for_subscription(&mut conn, id)?;
            out.push(row.into_domain(service_ids)?);
        }
        Ok(out)
    }

    async fn get_subscription_by_access_key(&self, access_key: &str) -> Result<Option<Subscription>> {
        let mut conn = self.conn()?;
        let row: Option<SubscriptionRow> = subscriptions::table
            .filter(subscriptions::access_key.eq(access_key))
            .filter(subscriptions::removed.eq(false))
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        match row {
            None => Ok(None),
            Some(row) => {
                let id = SubscriptionId(row.id);
                let service_ids = Self::service_ids_for_subscription(&mut conn, id)?;
                Ok(Some(row.into_domain(service_ids)?))
            }
        }
    }

    async fn list_subscriptions(&self, query: &SubscriptionQuery) -> Result<Vec<Subscription>> {
        let mut conn = self.conn()?;
        let now = Utc::now().timestamp();
        let mut sql = format!(
            "SELECT id FROM subscriptions WHERE removed = 0 {}",
            Self::query_predicate(query, now)
        );
        sql.push_str(&format!(
            " ORDER BY id LIMIT {} OFFSET {}",
            query.size.max(1),
            query.page.saturating_sub(1) as u64 * query.size.max(1) as u64
        ));
        let ids: Vec<IdRow> = diesel::sql_query(sql)
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut out = Vec::with_capacity(ids.len());
        for IdRow { id } in ids {
            let row: SubscriptionRow = subscriptions::table
                .find(id)
                .first(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
            let service_ids = Self::service_ids_for_subscription(&mut conn, SubscriptionId(id))?;
            out.push(row.into_domain(service_ids)?);
        }
        Ok(out)
    }

    async fn count_subscriptions(&self, query: &SubscriptionQuery) -> Result<i64> {
        let mut conn = self.conn()?;
        let now = Utc::now().timestamp();
        let sql = format!(
            "SELECT COUNT(*) AS id FROM subscriptions WHERE removed = 0 {}",
            Self::query_predicate(query, now)
        );
        let row: CountRow = diesel::sql_query(sql)
            .get_result(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(row.id)
    }

    async fn bulk_create_subscriptions(
        &self,
        owner: &Admin,
        items: &[NewSubscription],
    ) -> Result<Vec<Subscription>> {
        let mut conn = self.conn()?;
        let now = Utc::now();

        let usernames: Vec<&str> = items.iter().map(|i| i.username.as_str()).collect();
        let collision_count: i64 = subscriptions::table
            .filter(subscriptions::username.eq_any(&usernames))
            .filter(subscriptions::removed.eq(false))
            .count()
            .get_result(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        if collision_count > 0 {
            return Err(Error::Conflict("username already exists".into()));
        }

        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let access_key = item
                .access_key
                .clone()
                .unwrap_or_else(|| Self::random_hex(16));
            let server_key = Self::random_hex(4);

            let new_row = SubscriptionRow::from_domain(&Subscription {
                id: SubscriptionId(0),
                username: Some(item.username.clone()),
                owner_id: owner.id,
                access_key,
                server_key,
                enabled: true,
                activated: true,
                reached: false,
                debted: false,
                onreached_expire: false,
                onreached_usage: false,
                removed: false,
                changed: false,
                limit_usage: item.limit_usage,
                reset_usage: 0,
                limit_expire: item.limit_expire,
                auto_delete_days: item.auto_delete_days,
                note: item.note.clone(),
                total_usage: 0,
                online_at: None,
                created_at: now,
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
            });

            diesel::insert_into(subscriptions::table)
                .values(&new_row)
                .execute(&mut conn)
                .map_err(|e| {
                    if e.to_string().contains("UNIQUE") {
                        Error::Conflict(e.to_string())
                    } else {
                        Error::Database(e.to_string())
                    }
                })?;

            let inserted_id: i32 = subscriptions::table
                .filter(subscriptions::access_key.eq(&new_row.access_key))
                .select(subscriptions::id)
                .first(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;

            let owner_service_ids: HashSet<ServiceId> = service_admin_association::table
                .filter(service_admin_association::admin_id.eq(owner.id.value()))
                .select(service_admin_association::service_id)
                .load::<i32>(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?
                .into_iter()
                .map(ServiceId)
                .collect();

            let attached: Vec<ServiceId> = item
                .service_ids
                .iter()
                .filter(|sid| owner_service_ids.contains(sid))
                .copied()
                .collect();

            for sid in &attached {
                diesel::insert_into(service_subscription_association::table)
                    .values((
                        service_subscription_association::service_id.eq(sid.value()),
                        service_subscription_association::subscription_id.eq(inserted_id),
                    ))
                    .execute(&mut conn)
                    .map_err(|e| Error::Database(e.to_string()))?;
            }

            let row: SubscriptionRow = subscriptions::table
                .find(inserted_id)
                .first(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
            created.push(row.into_domain(attached)?);
        }

        diesel::update(admins::table.find(owner.id.value()))
            .set(admins::current_count.eq(admins::current_count + created.len() as i32))
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(created)
    }

    async fn bulk_remove_subscriptions(&self, ids: &[SubscriptionId], now: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let raw_ids: Vec<i32> = ids.iter().map(|id| id.value()).collect();
        diesel::update(subscriptions::table.filter(subscriptions::id.eq_any(raw_ids)))
            .set((
                subscriptions::removed.eq(true),
                subscriptions::username.eq(None::<String>),
                subscriptions::removed_at.eq(Some(now.to_rfc3339())),
            ))
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn apply_patch(&self, id: SubscriptionId, patch: &SubscriptionPatch) -> Result<()> {
        let mut conn = self.conn()?;
        if let Some(enabled) = patch.enabled {
            diesel::update(subscriptions::table.find(id.value()))
                .set(subscriptions::enabled.eq(enabled))
                .execute(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
        }
        if let Some(limit_usage) = patch.limit_usage {
            diesel::update(subscriptions::table.find(id.value()))
                .set(subscriptions::limit_usage.eq(limit_usage as i64))
                .execute(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
        }
        if let Some(limit_expire) = patch.limit_expire {
            diesel::update(subscriptions::table.find(id.value()))
                .set(subscriptions::limit_expire.eq(limit_expire))
                .execute(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
        }
        if let Some(days) = patch.auto_delete_days {
            diesel::update(subscriptions::table.find(id.value()))
                .set(subscriptions::auto_delete_days.eq(days as i32))
                .execute(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
        }
        if let Some(note) = &patch.note {
            diesel::update(subscriptions::table.find(id.value()))
                .set(subscriptions::note.eq(note.clone()))
                .execute(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
        }
        if let Some(service_ids) = &patch.service_ids {
            diesel::delete(
                service_subscription_association::table
                    .filter(service_subscription_association::subscription_id.eq(id.value())),
            )
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
            for sid in service_ids {
                diesel::insert_into(service_subscription_association::table)
                    .values((
                        service_subscription_association::service_id.eq(sid.value()),
                        service_subscription_association::subscription_id.eq(id.value()),
                    ))
                    .execute(&mut conn)
                    .map_err(|e| Error::Database(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn replace_subscription(&self, sub: &Subscription) -> Result<()> {
        let mut conn = self.conn()?;
        let row = SubscriptionRow::from_domain(sub);
        diesel::update(subscriptions::table.find(sub.id.value()))
            .set(row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn touch_client_request(
        &self,
        id: SubscriptionId,
        at: DateTime<Utc>,
        agent: Option<&str>,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let previous: Option<String> = subscriptions::table
            .find(id.value())
            .select(subscriptions::last_request_at)
            .first(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        diesel::update(subscriptions::table.find(id.value()))
            .set((
                subscriptions::last_request_at.eq(Some(at.to_rfc3339())),
                subscriptions::last_client_agent.eq(agent.map(ToString::to_string)),
            ))
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(previous.is_none())
    }

    async fn load_usage_rows(&self, sub_id: SubscriptionId) -> Result<Vec<SubscriptionUsage>> {
        let mut conn = self.conn()?;
        let rows: Vec<SubscriptionUsageRow> = subscription_usages::table
            .filter(subscription_usages::subscription_id.eq(sub_id.value()))
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.into_iter().map(SubscriptionUsageRow::into_domain).collect()
    }

    async fn bulk_upsert_usages(
        &self,
        sub_id: SubscriptionId,
        observed: &HashMap<NodeId, ObservedUsage>,
        now: DateTime<Utc>,
    ) -> Result<UpsertUsagesOutcome> {
        let mut conn = self.conn()?;
        let existing: Vec<SubscriptionUsageRow> = subscription_usages::table
            .filter(subscription_usages::subscription_id.eq(sub_id.value()))
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;

        for (node_id, obs) in observed {
            let bucket = hour_bucket(obs.hour_bucket);
            let bucket_str = bucket.to_rfc3339();
            let existing_row = existing
                .iter()
                .find(|r| r.node_id == node_id.value() && r.created_at == bucket_str);

            match existing_row {
                None => {
                    let usage = scale(obs.lifetime_used_traffic, obs.node_usage_rate).max(0);
                    diesel::insert_into(subscription_usages::table)
                        .values(SubscriptionUsageRow {
                            subscription_id: sub_id.value(),
                            node_id: node_id.value(),
                            created_at: bucket_str,
                            raw_usage: obs.lifetime_used_traffic as i64,
                            usage,
                            updated_at: now.to_rfc3339(),
                        })
                        .execute(&mut conn)
                        .map_err(|e| Error::Database(e.to_string()))?;
                }
                Some(row) => {
                    let delta = compute_delta(Some(row.raw_usage as u64), obs.lifetime_used_traffic);
                    match delta {
                        CounterDelta::Reset => {
                            diesel::update(
                                subscription_usages::table.filter(
                                    subscription_usages::subscription_id
                                        .eq(sub_id.value())
                                        .and(subscription_usages::node_id.eq(node_id.value()))
                                        .and(subscription_usages::created_at.eq(&bucket_str)),
                                ),
                            )
                            .set((
                                subscription_usages::raw_usage.eq(obs.lifetime_used_traffic as i64),
                                subscription_usages::updated_at.eq(now.to_rfc3339()),
                            ))
                            .execute(&mut conn)
                            .map_err(|e| Error::Database(e.to_string()))?;
                        }
                        CounterDelta::Increase { delta } => {
                            let credit = scale(delta, obs.node_usage_rate);
                            let new_usage = (row.usage + credit).max(0);
                            diesel::update(
                                subscription_usages::table.filter(
                                    subscription_usages::subscription_id
                                        .eq(sub_id.value())
                                        .and(subscription_usages::node_id.eq(node_id.value()))
                                        .and(subscription_usages::created_at.eq(&bucket_str)),
                                ),
                            )
                            .set((
                                subscription_usages::usage.eq(new_usage),
                                subscription_usages::raw_usage.eq(obs.lifetime_used_traffic as i64),
                                subscription_usages::updated_at.eq(now.to_rfc3339()),
                            ))
                            .execute(&mut conn)
                            .map_err(|e| Error::Database(e.to_string()))?;
                        }
                        CounterDelta::Fresh => unreachable!("existing_row implies non-fresh delta"),
                    }
                }
            }
        }

        if observed.is_empty() {
            return Ok(UpsertUsagesOutcome::default());
        }

        // `activate_expire`: a pending (`limit_expire < 0`) subscription
        // starts its clock on the first observed usage (§4.A, §8 S3).
        let limit_expire: i64 = subscriptions::table
            .find(sub_id.value())
            .select(subscriptions::limit_expire)
            .first(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        let activated_expire = if limit_expire < 0 {
            let new_expire = now.timestamp() + limit_expire.abs();
            diesel::update(subscriptions::table.find(sub_id.value()))
                .set(subscriptions::limit_expire.eq(new_expire))
                .execute(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
            true
        } else {
            false
        };

        Ok(UpsertUsagesOutcome {
            activated_expire,
        })
    }

    async fn sync_cached_usages(&self) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::sql_query(
            "UPDATE subscriptions SET
                total_usage = COALESCE((
                    SELECT SUM(MAX(usage, 0)) FROM subscription_usages
                    WHERE subscription_usages.subscription_id = subscriptions.id
                ), 0),
                online_at = (
                    SELECT MAX(updated_at) FROM subscription_usages
                    WHERE subscription_usages.subscription_id = subscriptions.id
                )",
        )
        .execute(&mut conn)
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn sum_usage_total(&self, sub_id: SubscriptionId) -> Result<u64> {
        let mut conn = self.conn()?;
        let rows: Vec<SubscriptionUsageRow> = subscription_usages::table
            .filter(subscription_usages::subscription_id.eq(sub_id.value()))
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(rows.iter().map(|r| r.usage.max(0) as u64).sum())
    }

    async fn sum_usage_logged(&self, sub_id: SubscriptionId) -> Result<u64> {
        let mut conn = self.conn()?;
        let rows: Vec<SubscriptionUsageLogRow> = subscription_logs::table
            .filter(subscription_logs::subscription_id.eq(sub_id.value()))
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(rows.iter().map(|r| r.usage.max(0) as u64).sum())
    }

    async fn upsert_usage_log(&self, sub_id: SubscriptionId, bucket: DateTime<Utc>, delta: u64) -> Result<()> {
        let mut conn = self.conn()?;
        let bucket = hour_bucket(bucket);
        let bucket_str = bucket.to_rfc3339();
        let existing: Option<SubscriptionUsageLogRow> = subscription_logs::table
            .filter(subscription_logs::subscription_id.eq(sub_id.value()))
            .filter(subscription_logs::created_at.eq(&bucket_str))
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;

        match existing {
            Some(row) => {
                diesel::update(
                    subscription_logs::table.filter(
                        subscription_logs::subscription_id
                            .eq(sub_id.value())
                            .and(subscription_logs::created_at.eq(&bucket_str)),
                    ),
                )
                .set(subscription_logs::usage.eq(row.usage + delta as i64))
                .execute(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
            }
            None => {
                diesel::insert_into(subscription_logs::table)
                    .values(SubscriptionUsageLogRow {
                        subscription_id: sub_id.value(),
                        created_at: bucket_str,
                        usage: delta as i64,
                    })
                    .execute(&mut conn)
                    .map_err(|e| Error::Database(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn bump_admin_usage(&self, id: AdminId, delta: u64) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::update(admins::table.find(id.value()))
            .set(admins::current_usage.eq(admins::current_usage + delta as i64))
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn auto_renewals_for(&self, sub_id: SubscriptionId) -> Result<Vec<AutoRenewal>> {
        let mut conn = self.conn()?;
        let rows: Vec<AutoRenewalRow> = subscription_auto_renewals::table
            .filter(subscription_auto_renewals::subscription_id.eq(sub_id.value()))
            .order(subscription_auto_renewals::id.asc())
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(rows.into_iter().map(AutoRenewalRow::into_domain).collect())
    }

    async fn delete_auto_renewal(&self, id: AutoRenewalId) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::delete(subscription_auto_renewals::table.find(id.value()))
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn insert_auto_renewal(&self, renewal: &AutoRenewal) -> Result<AutoRenewalId> {
        let mut conn = self.conn()?;
        let row = AutoRenewalRow::from_domain(renewal);
        diesel::insert_into(subscription_auto_renewals::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        let id: i32 = diesel::sql_query("SELECT last_insert_rowid() AS id")
            .get_result::<IdRow>(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?
            .id;
        Ok(AutoRenewalId(id))
    }
}

impl SqliteStore {
    fn query_predicate(query: &SubscriptionQuery, now: i64) -> String {
        use crate::core::store::filters::{expired_sql, is_active_sql, limited_sql, online_sql};
        let mut parts = Vec::new();
        if let Some(limited) = query.limited {
            parts.push(format!("({}) = {}", limited_sql(), limited as i32));
        }
        if let Some(expired) = query.expired {
            parts.push(format!("({}) = {}", expired_sql(now), expired as i32));
        }
        if let Some(is_active) = query.is_active {
            parts.push(format!("({}) = {}", is_active_sql(now), is_active as i32));
        }
        if let Some(enabled) = query.enabled {
            parts.push(format!("enabled = {}", enabled as i32));
        }
        if let Some(online) = query.online {
            parts.push(format!("({}) = {}", online_sql(now), online as i32));
        }
        if let Some(owner_id) = query.owner_id {
            parts.push(format!("owner_id = {}", owner_id.value()));
        }
        if let Some(search) = &query.search {
            let escaped = search.replace('\'', "''");
            parts.push(format!("username LIKE '%{escaped}%'"));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!("AND {}", parts.join(" AND "))
        }
    }
}

#[derive(QueryableByName)]
struct IdRow {
    #[diesel(sql_type = diesel::sql_types::Integer)]
    id: i32,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{AdminRole, NotificationSinks, PresentationConfig, ResourceAccess, TotpState};
    use crate::core::store::test_support::in_memory_store;
    use std::collections::HashMap as StdHashMap;

    async fn seed_owner(store: &SqliteStore) -> Admin {
        let id = store
            .insert_admin(&Admin {
                id: AdminId(0),
                username: Some("owner1".into()),
                password_hash: "hash".into(),
                role: AdminRole::Owner,
                api_key: "k".repeat(64),
                secret: "s".repeat(32),
                access: ResourceAccess { create: true, update: true, remove: true },
                count_limit: 0,
                usage_limit: 0,
                current_count: 0,
                current_usage: 0,
                placeholders: StdHashMap::new(),
                presentation: PresentationConfig::with_defaults(),
                notifications: NotificationSinks::default(),
                totp: TotpState::default(),
                expire_warning_days: 1,
                usage_warning_percent: 90,
                created_at: Utc::now(),
                removed: false,
            })
            .await
            .unwrap();
        store.get_admin_by_id(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn bulk_create_then_load_subscription() {
        let store = in_memory_store();
        let owner = seed_owner(&store).await;
        let created = store
            .bulk_create_subscriptions(
                &owner,
                &[NewSubscription {
                    username: "alice".into(),
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
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].access_key.len(), 32);
        assert_eq!(created[0].server_key.len(), 8);

        store.sync_admin_current_counts().await.unwrap();
        let owner = store.get_admin_by_id(owner.id).await.unwrap().unwrap();
        assert_eq!(owner.current_count, 1);
    }

    #[tokio::test]
    async fn bulk_create_rejects_username_collision() {
        let store = in_memory_store();
        let owner = seed_owner(&store).await;
        let item = NewSubscription {
            username: "bob".into(),
            access_key: None,
            limit_usage: 0,
            limit_expire: 0,
            auto_delete_days: 0,
            note: None,
            service_ids: vec![],
        };
        store.bulk_create_subscriptions(&owner, &[item.clone()]).await.unwrap();
        let err = store.bulk_create_subscriptions(&owner, &[item]).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn bulk_upsert_usages_s1_scenario() {
        // §8 S1: usage_rate=0.5 across ticks.
        let store = in_memory_store();
        let owner = seed_owner(&store).await;
        let created = store
            .bulk_create_subscriptions(
                &owner,
                &[NewSubscription {
                    username: "ratetest".into(),
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
        let sub_id = created[0].id;
        let node_id = NodeId(1);
        let now = Utc::now();

        let mut observed = HashMap::new();
        observed.insert(node_id, ObservedUsage { lifetime_used_traffic: 0, hour_bucket: now, node_usage_rate: 0.5 });
        store.bulk_upsert_usages(sub_id, &observed, now).await.unwrap();

        let mut observed2 = HashMap::new();
        observed2.insert(node_id, ObservedUsage { lifetime_used_traffic: 1000, hour_bucket: now, node_usage_rate: 0.5 });
        store.bulk_upsert_usages(sub_id, &observed2, now).await.unwrap();
        let rows = store.load_usage_rows(sub_id).await.unwrap();
        assert_eq!(rows[0].usage, 500);

        let mut observed3 = HashMap::new();
        observed3.insert(node_id, ObservedUsage { lifetime_used_traffic: 800, hour_bucket: now, node_usage_rate: 0.5 });
        store.bulk_upsert_usages(sub_id, &observed3, now).await.unwrap();
        let rows = store.load_usage_rows(sub_id).await.unwrap();
        assert_eq!(rows[0].usage, 500); // reset: unchanged

        let mut observed4 = HashMap::new();
        observed4.insert(node_id, ObservedUsage { lifetime_used_traffic: 1200, hour_bucket: now, node_usage_rate: 0.5 });
        store.bulk_upsert_usages(sub_id, &observed4, now).await.unwrap();
        let rows = store.load_usage_rows(sub_id).await.unwrap();
        assert_eq!(rows[0].usage, 700);
    }

    #[tokio::test]
    async fn sync_cached_usages_updates_total() {
        let store = in_memory_store();
        let owner = seed_owner(&store).await;
        let created = store
            .bulk_create_subscriptions(
                &owner,
                &[NewSubscription {
                    username: "cacheuser".into(),
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
        let sub_id = created[0].id;
        let now = Utc::now();
        let mut observed = HashMap::new();
        observed.insert(NodeId(1), ObservedUsage { lifetime_used_traffic: 1000, hour_bucket: now, node_usage_rate: 1.0 });
        store.bulk_upsert_usages(sub_id, &observed, now).await.unwrap();
        store.sync_cached_usages().await.unwrap();
        let sub = store.get_subscription_by_access_key(&created[0].access_key).await.unwrap().unwrap();
        assert_eq!(sub.total_usage, 1000);
    }

    #[tokio::test]
    async fn bulk_remove_soft_deletes() {
        let store = in_memory_store();
        let owner = seed_owner(&store).await;
        let created = store
            .bulk_create_subscriptions(
                &owner,
                &[NewSubscription {
                    username: "removeme".into(),
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
        store.bulk_remove_subscriptions(&[created[0].id], Utc::now()).await.unwrap();
        let all = store.load_subscriptions().await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn load_admins_excludes_removed() {
        let store = in_memory_store();
        let owner = seed_owner(&store).await;
        let admins = store.load_admins().await.unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].id, owner.id);
    }
}
