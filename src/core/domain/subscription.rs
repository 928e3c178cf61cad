//! Subscription entity and its derived booleans (§3 Data Model).
//!
//! Every derived boolean here has a twin SQL fragment in
//! `crate::core::store::sqlite::filters` built from the same constants
//! (§9 "Hybrid ORM properties expressed two ways") so in-memory checks and
//! `WHERE`/`ORDER BY` clauses can never disagree.

use chrono::{DateTime, Utc};

use super::ids::{AdminId, ServiceId, SubscriptionId};

/// `is_online` window: online_at within this many seconds of now (§3).
pub const ONLINE_WINDOW_SECS: i64 = 120;

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    /// `None` once soft-removed (username nulled).
    pub username: Option<String>,
    pub owner_id: AdminId,
    pub access_key: String,
    pub server_key: String,
    pub enabled: bool,
    pub activated: bool,
    pub reached: bool,
    pub debted: bool,
    pub onreached_expire: bool,
    pub onreached_usage: bool,
    pub removed: bool,
    /// Set when upstream credentials must be regenerated from `access_key`
    /// on the next config-sync pass (revoke rotates this to `true`).
    pub changed: bool,
    pub limit_usage: u64,
    pub reset_usage: u64,
    /// negative = pending duration-until-first-request, 0 = unlimited,
    /// positive = absolute unix timestamp.
    pub limit_expire: i64,
    pub auto_delete_days: u32,
    pub note: Option<String>,
    pub total_usage: u64,
    pub online_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_reset_at: Option<DateTime<Utc>>,
    pub last_revoke_at: Option<DateTime<Utc>>,
    pub last_request_at: Option<DateTime<Utc>>,
    pub inactive_at: Option<DateTime<Utc>>,
    pub reached_at: Option<DateTime<Utc>>,
    pub removed_at: Option<DateTime<Utc>>,
    pub last_client_agent: Option<String>,
    pub telegram_id: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub service_ids: Vec<ServiceId>,
}

impl Subscription {
    /// `current_usage = total_usage − reset_usage`, never negative by
    /// construction (§3 Derived, Testable Property #1).
    #[must_use]
    pub fn current_usage(&self) -> u64 {
        self.total_usage.saturating_sub(self.reset_usage)
    }

    #[must_use]
    pub fn limited(&self) -> bool {
        self.limit_usage > 0 && self.current_usage() > self.limit_usage
    }

    #[must_use]
    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        self.limit_expire > 0 && now.timestamp() >= self.limit_expire
    }

    #[must_use]
    pub fn pending(&self) -> bool {
        self.limit_expire < 0
    }

    #[must_use]
    pub fn is_online_at(&self, now: DateTime<Utc>) -> bool {
        match self.online_at {
            Some(t) => (now - t).num_seconds().abs() <= ONLINE_WINDOW_SECS,
            None => false,
        }
    }

    /// `enabled ∧ activated ∧ ¬expired ∧ ¬limited ∧ ¬debted` (§3 Derived).
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.activated
            && !self.expired_at(now)
            && !self.limited()
            && !self.debted
    }

    /// §4.F background-sync: subscriptions about to be removed by the
    /// auto-delete/expiry policy are skipped during node sync.
    #[must_use]
    pub fn should_be_removed(&self, now: DateTime<Utc>) -> bool {
        let reached_stale = self
            .reached_at
            .map(|t| (now - t).num_hours() >= 24)
            .unwrap_or(false);
        let inactive_stale = self
            .inactive_at
            .map(|t| (now - t).num_hours() >= 24)
            .unwrap_or(false);
        reached_stale || inactive_stale
    }

    /// 3–30 lowercase/digits/underscore (§3 Subscription).
    #[must_use]
    pub fn is_valid_username(username: &str) -> bool {
        let len = username.chars().count();
        (3..=30).contains(&len)
            && username
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base(now: DateTime<Utc>) -> Subscription {
        Subscription {
            id: SubscriptionId(1),
            username: Some("alice".into()),
            owner_id: AdminId(1),
            access_key: "a".repeat(32),
            server_key: "b".repeat(8),
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
        }
    }

    #[test]
    fn current_usage_never_negative() {
        let now = Utc::now();
        let mut sub = base(now);
        sub.total_usage = 100;
        sub.reset_usage = 200;
        assert_eq!(sub.current_usage(), 0);
    }

    #[test]
    fn limit_usage_zero_means_unlimited() {
        let now = Utc::now();
        let mut sub = base(now);
        sub.total_usage = u64::MAX / 2;
        assert!(!sub.limited());
        sub.limit_usage = 10;
        assert!(sub.limited());
    }

    #[test]
    fn limit_expire_zero_never_expires() {
        let now = Utc::now();
        let sub = base(now);
        assert!(!sub.expired_at(now + Duration::days(3650)));
    }

    #[test]
    fn limit_expire_negative_is_pending() {
        let now = Utc::now();
        let mut sub = base(now);
        sub.limit_expire = -86400;
        assert!(sub.pending());
        assert!(!sub.expired_at(now));
    }

    #[test]
    fn limit_expire_positive_expires_when_reached() {
        let now = Utc::now();
        let mut sub = base(now);
        sub.limit_expire = (now - Duration::seconds(1)).timestamp();
        assert!(sub.expired_at(now));
    }

    #[test]
    fn is_active_requires_all_gates() {
        let now = Utc::now();
        let mut sub = base(now);
        assert!(sub.is_active_at(now));
        sub.debted = true;
        assert!(!sub.is_active_at(now));
        sub.debted = false;
        sub.limit_usage = 1;
        sub.total_usage = 2;
        assert!(!sub.is_active_at(now));
    }

    #[test]
    fn online_window_is_120_seconds() {
        let now = Utc::now();
        let mut sub = base(now);
        sub.online_at = Some(now - Duration::seconds(119));
        assert!(sub.is_online_at(now));
        sub.online_at = Some(now - Duration::seconds(121));
        assert!(!sub.is_online_at(now));
    }

    #[test]
    fn should_be_removed_after_24h_stale() {
        let now = Utc::now();
        let mut sub = base(now);
        assert!(!sub.should_be_removed(now));
        sub.reached_at = Some(now - Duration::hours(25));
        assert!(sub.should_be_removed(now));
    }

    #[test]
    fn username_validation_rejects_uppercase_and_bad_length() {
        assert!(Subscription::is_valid_username("abc_123"));
        assert!(!Subscription::is_valid_username("ab"));
        assert!(!Subscription::is_valid_username("Abc"));
        assert!(!Subscription::is_valid_username("has-dash"));
    }
}
