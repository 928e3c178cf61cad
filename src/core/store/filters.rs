//! SQL fragments for the derived subscription booleans (§9 "Hybrid ORM
//! properties expressed two ways (instance and SQL)").
//!
//! `crate::core::domain::subscription` implements `limited()`/`expired_at()`
//! /`is_active_at()` as pure functions over an in-memory `Subscription`.
//! This module builds the *same* definitions as raw SQL `WHERE` fragments
//! for `list`/`count` queries, so a row that Diesel returns for
//! `is_active = true` is guaranteed to also satisfy `Subscription::
//! is_active_at` once loaded — the two never drift because both are
//! written from the same three constants: `limit_usage`, `limit_expire`,
//! and the 120s online window.

use crate::core::domain::ONLINE_WINDOW_SECS;

/// `limited ⇔ limit_usage > 0 ∧ (total_usage - reset_usage) > limit_usage`.
#[must_use]
pub fn limited_sql() -> &'static str {
    "limit_usage > 0 AND (total_usage - reset_usage) > limit_usage"
}

/// `expired ⇔ limit_expire > 0 ∧ now >= limit_expire`.
#[must_use]
pub fn expired_sql(now_unix: i64) -> String {
    format!("limit_expire > 0 AND {now_unix} >= limit_expire")
}

/// `is_active ⇔ enabled ∧ activated ∧ ¬expired ∧ ¬limited ∧ ¬debted`.
#[must_use]
pub fn is_active_sql(now_unix: i64) -> String {
    format!(
        "enabled = 1 AND activated = 1 AND debted = 0 AND NOT ({}) AND NOT ({})",
        expired_sql(now_unix),
        limited_sql(),
    )
}

/// `is_online ⇔ online_at within 120s of now`.
#[must_use]
pub fn online_sql(now_unix: i64) -> String {
    format!(
        "online_at IS NOT NULL AND ABS({now_unix} - CAST(strftime('%s', online_at) AS INTEGER)) <= {ONLINE_WINDOW_SECS}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{AdminId, ServiceId, Subscription, SubscriptionId};
    use chrono::Utc;
    use diesel::prelude::*;
    use diesel::sql_types::Bool;

    fn base(now: chrono::DateTime<Utc>) -> Subscription {
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
            service_ids: vec![ServiceId(1)],
        }
    }

    /// Exercises the SQL fragment against a throwaway in-memory table and
    /// checks it agrees with the in-memory `is_active_at` for the same
    /// row, for several representative states (§9 "same definition must
    /// be used in both places").
    #[test]
    fn is_active_sql_agrees_with_in_memory_predicate() {
        let pool = crate::core::db::create_pool(":memory:").unwrap();
        let mut conn = pool.get().unwrap();
        diesel::sql_query(
            "CREATE TABLE t (enabled BOOL, activated BOOL, debted BOOL, limit_usage BIGINT, reset_usage BIGINT, total_usage BIGINT, limit_expire BIGINT)",
        )
        .execute(&mut conn)
        .unwrap();

        let now = Utc::now();
        let scenarios = [
            base(now),
            {
                let mut s = base(now);
                s.debted = true;
                s
            },
            {
                let mut s = base(now);
                s.limit_usage = 10;
                s.total_usage = 20;
                s
            },
            {
                let mut s = base(now);
                s.limit_expire = now.timestamp() - 10;
                s
            },
        ];

        for sub in scenarios {
            diesel::sql_query("DELETE FROM t").execute(&mut conn).unwrap();
            diesel::sql_query(format!(
                "INSERT INTO t VALUES ({}, {}, {}, {}, {}, {}, {})",
                sub.enabled as i32,
                sub.activated as i32,
                sub.debted as i32,
                sub.limit_usage,
                sub.reset_usage,
                sub.total_usage,
                sub.limit_expire,
            ))
            .execute(&mut conn)
            .unwrap();

            let sql_says_active: bool = diesel::sql_query(format!(
                "SELECT ({}) AS matches FROM t",
                is_active_sql(now.timestamp())
            ))
            .get_result::<SqlBoolRow>(&mut conn)
            .map(|r| r.matches)
            .unwrap();

            assert_eq!(sql_says_active, sub.is_active_at(now));
        }
    }

    #[derive(QueryableByName)]
    struct SqlBoolRow {
        #[diesel(sql_type = Bool)]
        matches: bool,
    }
}
