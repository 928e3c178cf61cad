//! Database row types for Diesel ORM, and the row <-> domain conversions
//! (§4.A Store, §9 "Cyclic entity graph": surrogate integer ids only, no
//! pointer cycles — rows never carry nested entities, only ids and JSON
//! blobs for the handful of fields with no natural relational shape).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::schema::{
    admins, nodes, services, subscription_auto_renewals, subscription_logs, subscription_usages,
    subscriptions,
};
use crate::core::domain::{
    Admin, AdminId, AdminRole, AutoRenewal, AutoRenewalId, Node, NodeId, NodeKind,
    NotificationSinks, PlaceholderCategory, PlaceholderTemplate, PresentationConfig, ResourceAccess,
    Service, ServiceId, Subscription, SubscriptionId, SubscriptionUsage, SubscriptionUsageLog,
    TotpState,
};
use crate::error::{Error, Result};

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Parse(e.to_string()))
}

fn parse_rfc3339_opt(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(parse_rfc3339).transpose()
}

fn to_rfc3339_opt(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|v| v.to_rfc3339())
}

fn role_to_str(role: AdminRole) -> &'static str {
    match role {
        AdminRole::Owner => "owner",
        AdminRole::Seller => "seller",
        AdminRole::Reseller => "reseller",
    }
}

fn role_from_str(value: &str) -> Result<AdminRole> {
    match value {
        "owner" => Ok(AdminRole::Owner),
        "seller" => Ok(AdminRole::Seller),
        "reseller" => Ok(AdminRole::Reseller),
        other => Err(Error::Parse(format!("unknown admin role: {other}"))),
    }
}

fn kind_to_str(kind: NodeKind) -> &'static str {
    kind.as_str()
}

fn kind_from_str(value: &str) -> Result<NodeKind> {
    match value {
        "marzban" => Ok(NodeKind::Marzban),
        "marzneshin" => Ok(NodeKind::Marzneshin),
        "rustneshin" => Ok(NodeKind::Rustneshin),
        other => Err(Error::Parse(format!("unknown node kind: {other}"))),
    }
}

/// Admin row. `id = 0` on insert means "let sqlite assign one" and is
/// never read back; callers always reselect by api_key/username after
/// insert.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = admins)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AdminRow {
    pub id: i32,
    pub username: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub api_key: String,
    pub secret: String,
    pub access_create: bool,
    pub access_update: bool,
    pub access_remove: bool,
    pub count_limit: i32,
    pub usage_limit: i64,
    pub current_count: i32,
    pub current_usage: i64,
    pub placeholders_json: String,
    pub presentation_json: String,
    pub notifications_json: String,
    pub totp_json: String,
    pub expire_warning_days: i32,
    pub usage_warning_percent: i32,
    pub created_at: String,
    pub removed: bool,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = admins)]
pub struct NewAdminRow {
    pub username: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub api_key: String,
    pub secret: String,
    pub access_create: bool,
    pub access_update: bool,
    pub access_remove: bool,
    pub count_limit: i32,
    pub usage_limit: i64,
    pub current_count: i32,
    pub current_usage: i64,
    pub placeholders_json: String,
    pub presentation_json: String,
    pub notifications_json: String,
    pub totp_json: String,
    pub expire_warning_days: i32,
    pub usage_warning_percent: i32,
    pub created_at: String,
    pub removed: bool,
}

impl AdminRow {
    pub fn from_domain(admin: &Admin) -> Result<NewAdminRow> {
        Ok(NewAdminRow {
            username: admin.username.clone(),
            password_hash: admin.password_hash.clone(),
            role: role_to_str(admin.role).to_string(),
            api_key: admin.api_key.clone(),
            secret: admin.secret.clone(),
            access_create: admin.access.create,
            access_update: admin.access.update,
            access_remove: admin.access.remove,
            count_limit: admin.count_limit as i32,
            usage_limit: admin.usage_limit as i64,
            current_count: admin.current_count as i32,
            current_usage: admin.current_usage as i64,
            placeholders_json: serde_json::to_string(&admin.placeholders)
                .map_err(|e| Error::Parse(e.to_string()))?,
            presentation_json: serde_json::to_string(&admin.presentation)
                .map_err(|e| Error::Parse(e.to_string()))?,
            notifications_json: serde_json::to_string(&admin.notifications)
                .map_err(|e| Error::Parse(e.to_string()))?,
            totp_json: serde_json::to_string(&admin.totp).map_err(|e| Error::Parse(e.to_string()))?,
            expire_warning_days: admin.expire_warning_days as i32,
            usage_warning_percent: admin.usage_warning_percent as i32,
            created_at: admin.created_at.to_rfc3339(),
            removed: admin.removed,
        })
    }

    pub fn into_domain(self) -> Result<Admin> {
        let placeholders: HashMap<PlaceholderCategory, Vec<PlaceholderTemplate>> =
            serde_json::from_str(&self.placeholders_json).map_err(|e| Error::Parse(e.to_string()))?;
        let presentation: PresentationConfig =
            serde_json::from_str(&self.presentation_json).map_err(|e| Error::Parse(e.to_string()))?;
        let notifications: NotificationSinks =
            serde_json::from_str(&self.notifications_json).map_err(|e| Error::Parse(e.to_string()))?;
        let totp: TotpState =
            serde_json::from_str(&self.totp_json).map_err(|e| Error::Parse(e.to_string()))?;

        Ok(Admin {
            id: AdminId(self.id),
            username: self.username,
            password_hash: self.password_hash,
            role: role_from_str(&self.role)?,
            api_key: self.api_key,
            secret: self.secret,
            access: ResourceAccess {
                create: self.access_create,
                update: self.access_update,
                remove: self.access_remove,
            },
            count_limit: self.count_limit as u32,
            usage_limit: self.usage_limit as u64,
            current_count: self.current_count as u32,
            current_usage: self.current_usage as u64,
            placeholders,
            presentation,
            notifications,
            totp,
            expire_warning_days: self.expire_warning_days as u32,
            usage_warning_percent: self.usage_warning_percent as u32,
            created_at: parse_rfc3339(&self.created_at)?,
            removed: self.removed,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = nodes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NodeRow {
    pub id: i32,
    pub remark: String,
    pub kind: String,
    pub username: String,
    pub password: String,
    pub host: String,
    pub access_token: Option<String>,
    pub access_updated_at: Option<String>,
    pub offset_link: i32,
    pub batch_size: i32,
    pub priority: i32,
    pub usage_rate: f64,
    pub rate_display: Option<String>,
    pub script_url: Option<String>,
    pub script_secret: Option<String>,
    pub show_configs: bool,
    pub enabled: bool,
    pub removed: bool,
}

impl NodeRow {
    pub fn from_domain(node: &Node) -> NodeRow {
        NodeRow {
            id: node.id.value(),
            remark: node.remark.clone(),
            kind: kind_to_str(node.kind).to_string(),
            username: node.username.clone(),
            password: node.password.clone(),
            host: node.host.clone(),
            access_token: node.access_token.clone(),
            access_updated_at: to_rfc3339_opt(node.access_updated_at),
            offset_link: node.offset_link as i32,
            batch_size: node.batch_size as i32,
            priority: node.priority,
            usage_rate: node.usage_rate,
            rate_display: node.rate_display.clone(),
            script_url: node.script_url.clone(),
            script_secret: node.script_secret.clone(),
            show_configs: node.show_configs,
            enabled: node.enabled,
            removed: node.removed,
        }
    }

    pub fn into_domain(self) -> Result<Node> {
        Ok(Node {
            id: NodeId(self.id),
            remark: self.remark,
            kind: kind_from_str(&self.kind)?,
            username: self.username,
            password: self.password,
            host: self.host,
            access_token: self.access_token,
            access_updated_at: parse_rfc3339_opt(self.access_updated_at.as_deref())?,
            offset_link: self.offset_link as usize,
            batch_size: self.batch_size as u32,
            priority: self.priority,
            usage_rate: self.usage_rate,
            rate_display: self.rate_display,
            script_url: self.script_url,
            script_secret: self.script_secret,
            show_configs: self.show_configs,
            enabled: self.enabled,
            removed: self.removed,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = services)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ServiceRow {
    pub id: i32,
    pub remark: String,
}

/// `Service` is assembled from `ServiceRow` plus the two association
/// tables; there is no single-row conversion (the domain type carries
/// `node_ids`/`admin_ids` collections the relational model splits out).
impl ServiceRow {
    pub fn into_domain(self, node_ids: Vec<NodeId>, admin_ids: Vec<AdminId>) -> Service {
        Service {
            id: ServiceId(self.id),
            remark: self.remark,
            node_ids,
            admin_ids,
        }
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = subscriptions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SubscriptionRow {
    pub id: i32,
    pub username: Option<String>,
    pub owner_id: i32,
    pub access_key: String,
    pub server_key: String,
    pub enabled: bool,
    pub activated: bool,
    pub reached: bool,
    pub debted: bool,
    pub onreached_expire: bool,
    pub onreached_usage: bool,
    pub removed: bool,
    pub changed: bool,
    pub limit_usage: i64,
    pub reset_usage: i64,
    pub limit_expire: i64,
    pub auto_delete_days: i32,
    pub note: Option<String>,
    pub total_usage: i64,
    pub online_at: Option<String>,
    pub created_at: String,
    pub last_reset_at: Option<String>,
    pub last_revoke_at: Option<String>,
    pub last_request_at: Option<String>,
    pub inactive_at: Option<String>,
    pub reached_at: Option<String>,
    pub removed_at: Option<String>,
    pub last_client_agent: Option<String>,
    pub telegram_id: Option<String>,
    pub discord_webhook_url: Option<String>,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = subscriptions)]
pub struct NewSubscriptionRow {
    pub username: Option<String>,
    pub owner_id: i32,
    pub access_key: String,
    pub server_key: String,
    pub enabled: bool,
    pub activated: bool,
    pub reached: bool,
    pub debted: bool,
    pub onreached_expire: bool,
    pub onreached_usage: bool,
    pub removed: bool,
    pub changed: bool,
    pub limit_usage: i64,
    pub reset_usage: i64,
    pub limit_expire: i64,
    pub auto_delete_days: i32,
    pub note: Option<String>,
    pub total_usage: i64,
    pub online_at: Option<String>,
    pub created_at: String,
    pub last_reset_at: Option<String>,
    pub last_revoke_at: Option<String>,
    pub last_request_at: Option<String>,
    pub inactive_at: Option<String>,
    pub reached_at: Option<String>,
    pub removed_at: Option<String>,
    pub last_client_agent: Option<String>,
    pub telegram_id: Option<String>,
    pub discord_webhook_url: Option<String>,
}

impl SubscriptionRow {
    pub fn from_domain(sub: &Subscription) -> NewSubscriptionRow {
        NewSubscriptionRow {
            username: sub.username.clone(),
            owner_id: sub.owner_id.value(),
            access_key: sub.access_key.clone(),
            server_key: sub.server_key.clone(),
            enabled: sub.enabled,
            activated: sub.activated,
            reached: sub.reached,
            debted: sub.debted,
            onreached_expire: sub.onreached_expire,
            onreached_usage: sub.onreached_usage,
            removed: sub.removed,
            changed: sub.changed,
            limit_usage: sub.limit_usage as i64,
            reset_usage: sub.reset_usage as i64,
            limit_expire: sub.limit_expire,
            auto_delete_days: sub.auto_delete_days as i32,
            note: sub.note.clone(),
            total_usage: sub.total_usage as i64,
            online_at: to_rfc3339_opt(sub.online_at),
            created_at: sub.created_at.to_rfc3339(),
            last_reset_at: to_rfc3339_opt(sub.last_reset_at),
            last_revoke_at: to_rfc3339_opt(sub.last_revoke_at),
            last_request_at: to_rfc3339_opt(sub.last_request_at),
            inactive_at: to_rfc3339_opt(sub.inactive_at),
            reached_at: to_rfc3339_opt(sub.reached_at),
            removed_at: to_rfc3339_opt(sub.removed_at),
            last_client_agent: sub.last_client_agent.clone(),
            telegram_id: sub.telegram_id.clone(),
            discord_webhook_url: sub.discord_webhook_url.clone(),
        }
    }

    pub fn into_domain(self, service_ids: Vec<ServiceId>) -> Result<Subscription> {
        Ok(Subscription {
            id: SubscriptionId(self.id),
            username: self.username,
            owner_id: AdminId(self.owner_id),
            access_key: self.access_key,
            server_key: self.server_key,
            enabled: self.enabled,
            activated: self.activated,
            reached: self.reached,
            debted: self.debted,
            onreached_expire: self.onreached_expire,
            onreached_usage: self.onreached_usage,
            removed: self.removed,
            changed: self.changed,
            limit_usage: self.limit_usage as u64,
            reset_usage: self.reset_usage as u64,
            limit_expire: self.limit_expire,
            auto_delete_days: self.auto_delete_days as u32,
            note: self.note,
            total_usage: self.total_usage as u64,
            online_at: parse_rfc3339_opt(self.online_at.as_deref())?,
            created_at: parse_rfc3339(&self.created_at)?,
            last_reset_at: parse_rfc3339_opt(self.last_reset_at.as_deref())?,
            last_revoke_at: parse_rfc3339_opt(self.last_revoke_at.as_deref())?,
            last_request_at: parse_rfc3339_opt(self.last_request_at.as_deref())?,
            inactive_at: parse_rfc3339_opt(self.inactive_at.as_deref())?,
            reached_at: parse_rfc3339_opt(self.reached_at.as_deref())?,
            removed_at: parse_rfc3339_opt(self.removed_at.as_deref())?,
            last_client_agent: self.last_client_agent,
            telegram_id: self.telegram_id,
            discord_webhook_url: self.discord_webhook_url,
            service_ids,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = subscription_usages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SubscriptionUsageRow {
    pub subscription_id: i32,
    pub node_id: i32,
    pub created_at: String,
    pub raw_usage: i64,
    pub usage: i64,
    pub updated_at: String,
}

impl SubscriptionUsageRow {
    pub fn from_domain(row: &SubscriptionUsage) -> SubscriptionUsageRow {
        SubscriptionUsageRow {
            subscription_id: row.subscription_id.value(),
            node_id: row.node_id.value(),
            created_at: row.created_at.to_rfc3339(),
            raw_usage: row.raw_usage as i64,
            usage: row.usage,
            updated_at: row.updated_at.to_rfc3339(),
        }
    }

    pub fn into_domain(self) -> Result<SubscriptionUsage> {
        Ok(SubscriptionUsage {
            subscription_id: SubscriptionId(self.subscription_id),
            node_id: NodeId(self.node_id),
            created_at: parse_rfc3339(&self.created_at)?,
            raw_usage: self.raw_usage as u64,
            usage: self.usage,
            updated_at: parse_rfc3339(&self.updated_at)?,
        })
    }
}

#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = subscription_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SubscriptionUsageLogRow {
    pub subscription_id: i32,
    pub created_at: String,
    pub usage: i64,
}

impl SubscriptionUsageLogRow {
    pub fn from_domain(row: &SubscriptionUsageLog) -> SubscriptionUsageLogRow {
        SubscriptionUsageLogRow {
            subscription_id: row.subscription_id.value(),
            created_at: row.created_at.to_rfc3339(),
            usage: row.usage as i64,
        }
    }

    pub fn into_domain(self) -> Result<SubscriptionUsageLog> {
        Ok(SubscriptionUsageLog {
            subscription_id: SubscriptionId(self.subscription_id),
            created_at: parse_rfc3339(&self.created_at)?,
            usage: self.usage as u64,
        })
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = subscription_auto_renewals)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AutoRenewalRow {
    pub id: i32,
    pub subscription_id: i32,
    pub limit_usage: i64,
    pub limit_expire: i64,
    pub reset_usage: bool,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = subscription_auto_renewals)]
pub struct NewAutoRenewalRow {
    pub subscription_id: i32,
    pub limit_usage: i64,
    pub limit_expire: i64,
    pub reset_usage: bool,
}

impl AutoRenewalRow {
    pub fn from_domain(renewal: &AutoRenewal) -> NewAutoRenewalRow {
        NewAutoRenewalRow {
            subscription_id: renewal.subscription_id.value(),
            limit_usage: renewal.limit_usage as i64,
            limit_expire: renewal.limit_expire,
            reset_usage: renewal.reset_usage,
        }
    }

    pub fn into_domain(self) -> AutoRenewal {
        AutoRenewal {
            id: AutoRenewalId(self.id),
            subscription_id: SubscriptionId(self.subscription_id),
            limit_usage: self.limit_usage as u64,
            limit_expire: self.limit_expire,
            reset_usage: self.reset_usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{AdminRole, PresentationConfig, ResourceAccess};
    use std::collections::HashMap;

    #[test]
    fn admin_row_roundtrips_through_domain() {
        let admin = Admin {
            id: AdminId(1),
            username: Some("owner1".into()),
            password_hash: "hash".into(),
            role: AdminRole::Owner,
            api_key: "k".repeat(64),
            secret: "s".repeat(32),
            access: ResourceAccess { create: true, update: true, remove: false },
            count_limit: 10,
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
        let new_row = AdminRow::from_domain(&admin).unwrap();
        let row = AdminRow {
            id: 1,
            username: new_row.username,
            password_hash: new_row.password_hash,
            role: new_row.role,
            api_key: new_row.api_key,
            secret: new_row.secret,
            access_create: new_row.access_create,
            access_update: new_row.access_update,
            access_remove: new_row.access_remove,
            count_limit: new_row.count_limit,
            usage_limit: new_row.usage_limit,
            current_count: new_row.current_count,
            current_usage: new_row.current_usage,
            placeholders_json: new_row.placeholders_json,
            presentation_json: new_row.presentation_json,
            notifications_json: new_row.notifications_json,
            totp_json: new_row.totp_json,
            expire_warning_days: new_row.expire_warning_days,
            usage_warning_percent: new_row.usage_warning_percent,
            created_at: new_row.created_at,
            removed: new_row.removed,
        };
        let back = row.into_domain().unwrap();
        assert_eq!(back.username.as_deref(), Some("owner1"));
        assert_eq!(back.presentation.access_tag, "guards");
    }
}
