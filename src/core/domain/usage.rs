//! `SubscriptionUsage` and `SubscriptionUsageLogs` entities (§3 Data Model).

use chrono::{DateTime, Timelike, Utc};

use super::ids::{NodeId, SubscriptionId};

/// Per (subscription, node, hour-bucket) raw/adjusted counter row.
#[derive(Debug, Clone)]
pub struct SubscriptionUsage {
    pub subscription_id: SubscriptionId,
    pub node_id: NodeId,
    /// Hour-truncated bucket this row belongs to.
    pub created_at: DateTime<Utc>,
    /// Last-seen upstream lifetime counter, raw.
    pub raw_usage: u64,
    /// Our adjusted bytes after rate multiplier and reset handling.
    pub usage: i64,
    pub updated_at: DateTime<Utc>,
}

/// Hourly aggregate row per (subscription, hour-truncated `created_at`).
#[derive(Debug, Clone)]
pub struct SubscriptionUsageLog {
    pub subscription_id: SubscriptionId,
    pub created_at: DateTime<Utc>,
    pub usage: u64,
}

/// Truncate a timestamp to the start of its hour (§4.A, §4.G hour bucket).
#[must_use]
pub fn hour_bucket(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

/// Result of applying one lifetime-counter observation to an existing
/// (or absent) usage row — the delta computation in §4.A
/// `bulk_upsert_usages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterDelta {
    /// Counter increased by `delta`; credit `round(delta * rate)` bytes.
    Increase { delta: u64 },
    /// Counter decreased: upstream reset. No credit, `_usage` still moves
    /// to the new lower value (Testable Property #3).
    Reset,
    /// No prior row: insert fresh.
    Fresh,
}

#[must_use]
pub fn compute_delta(existing_raw: Option<u64>, observed_raw: u64) -> CounterDelta {
    match existing_raw {
        None => CounterDelta::Fresh,
        Some(prev) if observed_raw < prev => CounterDelta::Reset,
        Some(prev) => CounterDelta::Increase {
            delta: observed_raw - prev,
        },
    }
}

/// Apply a node's `usage_rate` multiplier to a raw delta, rounding to the
/// nearest byte (§8 Testable Property #4).
#[must_use]
pub fn scale(delta: u64, rate: f64) -> i64 {
    ((delta as f64) * rate).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hour_bucket_truncates_minutes_and_seconds() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 13, 45, 30).unwrap();
        let bucket = hour_bucket(at);
        assert_eq!(bucket.minute(), 0);
        assert_eq!(bucket.second(), 0);
        assert_eq!(bucket.hour(), 13);
    }

    #[test]
    fn delta_fresh_when_no_existing_row() {
        assert_eq!(compute_delta(None, 500), CounterDelta::Fresh);
    }

    #[test]
    fn delta_reset_when_counter_decreases() {
        assert_eq!(compute_delta(Some(800), 100), CounterDelta::Reset);
    }

    #[test]
    fn delta_increase_when_counter_grows() {
        assert_eq!(
            compute_delta(Some(200), 1000),
            CounterDelta::Increase { delta: 800 }
        );
    }

    #[test]
    fn scale_rounds_to_nearest_byte() {
        assert_eq!(scale(1000, 0.5), 500);
        assert_eq!(scale(400, 0.5), 200);
        assert_eq!(scale(3, 0.5), 2); // 1.5 rounds to 2 (round-half-away-from-zero)
    }

    #[test]
    fn usage_rate_s1_scenario() {
        // S1 from §8: tick 2 counter=1000 at rate 0.5 -> usage=500
        assert_eq!(scale(1000, 0.5), 500);
        // tick 4: delta (1200-800) at rate 0.5 -> 200, cumulative 500+200=700
        let tick4_delta = scale(400, 0.5);
        assert_eq!(500 + tick4_delta, 700);
    }
}
