//! `SubscriptionAutoRenewal` entity (§3 Data Model): an ordered, FIFO queue
//! of replacement quotas consumed one-at-a-time when a subscription
//! transitions to `reached` (§4.H step 3, Testable Property #6).

use super::ids::{AutoRenewalId, SubscriptionId};

#[derive(Debug, Clone)]
pub struct AutoRenewal {
    pub id: AutoRenewalId,
    pub subscription_id: SubscriptionId,
    pub limit_usage: u64,
    /// Same sign semantics as `Subscription::limit_expire`.
    pub limit_expire: i64,
    pub reset_usage: bool,
}

/// Result of applying one renewal row to a subscription's quotas
/// (§4.H step 3).
#[derive(Debug, Clone, Copy)]
pub struct RenewalOutcome {
    pub limit_usage: u64,
    /// New `limit_expire` value after applying sign semantics.
    pub limit_expire: i64,
    pub reset_usage_to: Option<u64>,
}

/// Apply `renewal` against `now` and the subscription's current
/// `total_usage`, per §4.H step 3:
/// - `limit_expire` negative stays as a pending duration, positive becomes
///   `now + renewal.limit_expire`, zero means unlimited.
/// - if `renewal.reset_usage`, the subscription's `reset_usage` should be
///   set to its current `total_usage` (pushing `current_usage` to 0).
#[must_use]
pub fn apply_renewal(renewal: &AutoRenewal, now_unix: i64, total_usage: u64) -> RenewalOutcome {
    let limit_expire = if renewal.limit_expire < 0 {
        renewal.limit_expire
    } else if renewal.limit_expire > 0 {
        now_unix + renewal.limit_expire
    } else {
        0
    };

    RenewalOutcome {
        limit_usage: renewal.limit_usage,
        limit_expire,
        reset_usage_to: renewal.reset_usage.then_some(total_usage),
    }
}

/// Pick the FIFO-next renewal row (lowest id) for a subscription, per
/// §4.H: "one per subscription per tick", ascending id order.
#[must_use]
pub fn pick_next(renewals: &[AutoRenewal], subscription_id: SubscriptionId) -> Option<&AutoRenewal> {
    renewals
        .iter()
        .filter(|r| r.subscription_id == subscription_id)
        .min_by_key(|r| r.id.value())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renewal_s2_scenario() {
        // §8 S2: limit_usage=500, limit_expire=+86400, reset_usage=true
        let renewal = AutoRenewal {
            id: AutoRenewalId(1),
            subscription_id: SubscriptionId(1),
            limit_usage: 500,
            limit_expire: 86400,
            reset_usage: true,
        };
        let now = 1_700_000_000;
        let outcome = apply_renewal(&renewal, now, 200);
        assert_eq!(outcome.limit_usage, 500);
        assert_eq!(outcome.limit_expire, now + 86400);
        assert_eq!(outcome.reset_usage_to, Some(200));
    }

    #[test]
    fn renewal_preserves_pending_negative_expire() {
        let renewal = AutoRenewal {
            id: AutoRenewalId(1),
            subscription_id: SubscriptionId(1),
            limit_usage: 10,
            limit_expire: -3600,
            reset_usage: false,
        };
        let outcome = apply_renewal(&renewal, 1_000, 0);
        assert_eq!(outcome.limit_expire, -3600);
        assert_eq!(outcome.reset_usage_to, None);
    }

    #[test]
    fn renewal_zero_expire_is_unlimited() {
        let renewal = AutoRenewal {
            id: AutoRenewalId(1),
            subscription_id: SubscriptionId(1),
            limit_usage: 10,
            limit_expire: 0,
            reset_usage: false,
        };
        let outcome = apply_renewal(&renewal, 1_000, 0);
        assert_eq!(outcome.limit_expire, 0);
    }

    #[test]
    fn pick_next_is_fifo_by_ascending_id() {
        let renewals = vec![
            AutoRenewal {
                id: AutoRenewalId(5),
                subscription_id: SubscriptionId(1),
                limit_usage: 1,
                limit_expire: 0,
                reset_usage: false,
            },
            AutoRenewal {
                id: AutoRenewalId(2),
                subscription_id: SubscriptionId(1),
                limit_usage: 2,
                limit_expire: 0,
                reset_usage: false,
            },
            AutoRenewal {
                id: AutoRenewalId(9),
                subscription_id: SubscriptionId(2),
                limit_usage: 3,
                limit_expire: 0,
                reset_usage: false,
            },
        ];
        let next = pick_next(&renewals, SubscriptionId(1)).unwrap();
        assert_eq!(next.id, AutoRenewalId(2));
    }

    #[test]
    fn pick_next_none_when_empty() {
        assert!(pick_next(&[], SubscriptionId(1)).is_none());
    }
}
