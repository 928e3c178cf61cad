//! Admin entity (§3 Data Model).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ids::AdminId;

/// Admin role. `Owner` cannot be created via the API and only one
/// practically exists (§3 invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminRole {
    Owner,
    Seller,
    Reseller,
}

/// Per-resource access flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceAccess {
    pub create: bool,
    pub update: bool,
    pub remove: bool,
}

/// Placeholder category an admin's placeholder templates are grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderCategory {
    Info,
    Limited,
    Expired,
    Disabled,
}

/// A single placeholder link template rendered in §4.I step 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceholderTemplate {
    pub category: PlaceholderCategory,
    pub remark: String,
    pub address: String,
    pub uuid_template: String,
    pub port: u16,
}

/// Presentation/config knobs an admin controls for its subscriptions' link
/// bundles (§3 Admin).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresentationConfig {
    pub access_prefix: Option<String>,
    pub access_title: Option<String>,
    pub access_description: Option<String>,
    pub access_tag: String,
    pub config_rename: Option<String>,
    pub announce: Option<String>,
    pub announce_url: Option<String>,
    pub support_url: Option<String>,
    pub update_interval: Option<u32>,
    pub max_links: u32,
    pub shuffle_links: bool,
    pub username_tag: Option<String>,
}

fn default_access_tag() -> String {
    "guards".to_string()
}

impl PresentationConfig {
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            access_tag: default_access_tag(),
            max_links: 0,
            shuffle_links: true,
            ..Default::default()
        }
    }
}

/// Notification sink configuration owned by an admin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSinks {
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_topic_id: Option<String>,
    pub telegram_enabled: bool,
    pub discord_webhook_url: Option<String>,
    pub discord_enabled: bool,
}

/// TOTP credential state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotpStatus {
    #[default]
    Disabled,
    Pending,
    Enabled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TotpState {
    pub totp_secret: Option<String>,
    pub totp_secret_pending: Option<String>,
    pub totp_status: TotpStatus,
    pub last_totp_revoked_at: Option<DateTime<Utc>>,
}

/// Admin (operator) account.
#[derive(Debug, Clone)]
pub struct Admin {
    pub id: AdminId,
    /// `None` once soft-removed (username nulled, §3 lifecycle).
    pub username: Option<String>,
    pub password_hash: String,
    pub role: AdminRole,
    pub api_key: String,
    pub secret: String,
    pub access: ResourceAccess,
    pub count_limit: u32,
    pub usage_limit: u64,
    pub current_count: u32,
    pub current_usage: u64,
    pub placeholders: HashMap<PlaceholderCategory, Vec<PlaceholderTemplate>>,
    pub presentation: PresentationConfig,
    pub notifications: NotificationSinks,
    pub totp: TotpState,
    pub expire_warning_days: u32,
    pub usage_warning_percent: u32,
    pub created_at: DateTime<Utc>,
    pub removed: bool,
}

impl Admin {
    #[must_use]
    pub fn is_active_owner_candidate(&self) -> bool {
        !self.removed && matches!(self.role, AdminRole::Owner)
    }

    /// §4.H reseller gating: an over-quota seller/reseller is debted.
    #[must_use]
    pub fn reached_usage_limit(&self) -> bool {
        matches!(self.role, AdminRole::Seller | AdminRole::Reseller)
            && self.usage_limit > 0
            && self.current_usage >= self.usage_limit
    }

    #[must_use]
    pub fn expire_warning_threshold_days(&self) -> u32 {
        if self.expire_warning_days == 0 {
            1
        } else {
            self.expire_warning_days
        }
    }

    #[must_use]
    pub fn usage_warning_threshold_percent(&self) -> u32 {
        if self.usage_warning_percent == 0 {
            90
        } else {
            self.usage_warning_percent
        }
    }
}

/// 3–30 alphanumeric username validation shared by Admin and Subscription
/// username rules differ slightly (subscription is lowercase/digits/
/// underscore only), so each entity validates its own pattern.
#[must_use]
pub fn is_valid_admin_username(username: &str) -> bool {
    let len = username.chars().count();
    (3..=30).contains(&len) && username.chars().all(|c| c.is_ascii_alphanumeric())
}

/// `access_tag` validation: 4-30 alphanumeric (§3 Admin).
#[must_use]
pub fn is_valid_access_tag(tag: &str) -> bool {
    let len = tag.chars().count();
    (4..=30).contains(&len) && tag.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_username_bounds() {
        assert!(is_valid_admin_username("abc"));
        assert!(is_valid_admin_username(&"a".repeat(30)));
        assert!(!is_valid_admin_username("ab"));
        assert!(!is_valid_admin_username(&"a".repeat(31)));
        assert!(!is_valid_admin_username("has-dash"));
    }

    #[test]
    fn access_tag_defaults_to_guards() {
        let cfg = PresentationConfig::with_defaults();
        assert_eq!(cfg.access_tag, "guards");
        assert!(is_valid_access_tag(&cfg.access_tag));
    }

    #[test]
    fn reseller_over_quota_is_debted_candidate() {
        let admin = Admin {
            id: AdminId(1),
            username: Some("seller1".into()),
            password_hash: String::new(),
            role: AdminRole::Seller,
            api_key: "k".repeat(64),
            secret: "s".repeat(32),
            access: ResourceAccess::default(),
            count_limit: 0,
            usage_limit: 1000,
            current_count: 0,
            current_usage: 1000,
            placeholders: HashMap::new(),
            presentation: PresentationConfig::with_defaults(),
            notifications: NotificationSinks::default(),
            totp: TotpState::default(),
            expire_warning_days: 0,
            usage_warning_percent: 0,
            created_at: Utc::now(),
            removed: false,
        };
        assert!(admin.reached_usage_limit());
        assert_eq!(admin.expire_warning_threshold_days(), 1);
        assert_eq!(admin.usage_warning_threshold_percent(), 90);
    }

    #[test]
    fn owner_role_never_counts_toward_reseller_gate() {
        let mut admin_template = |role| Admin {
            id: AdminId(1),
            username: Some("x".into()),
            password_hash: String::new(),
            role,
            api_key: "k".repeat(64),
            secret: "s".repeat(32),
            access: ResourceAccess::default(),
            count_limit: 0,
            usage_limit: 1,
            current_count: 0,
            current_usage: 1,
            placeholders: HashMap::new(),
            presentation: PresentationConfig::with_defaults(),
            notifications: NotificationSinks::default(),
            totp: TotpState::default(),
            expire_warning_days: 0,
            usage_warning_percent: 0,
            created_at: Utc::now(),
            removed: false,
        };
        assert!(!admin_template(AdminRole::Owner).reached_usage_limit());
    }
}
