//! Reached Tracker (§4.H): updates warning flags, transitions
//! limited/expired subscriptions to `reached`, consumes queued
//! auto-renewals FIFO, reconnects subscriptions that are no longer over
//! quota, and enforces the auto-delete grace window — plus the separate
//! reseller quota gate.
//!
//! All five steps run over the same loaded snapshot per subscription
//! (§5 "serialized by DB transaction"); the `Store` trait has no explicit
//! transaction handle (§9 Design Notes "Scoped DB session"), so each
//! subscription's writes land as one `replace_subscription` call instead
//! of five separate field updates, which is the closest this layer gets
//! to "one statement" without exposing connection lifetimes across the
//! trait boundary.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::core::domain::{
    apply_renewal, pick_next, Admin, AdminId, AdminRole, AutoRenewal, Subscription, SubscriptionId,
};
use crate::core::notify::{Notification, Notifier};
use crate::core::store::Store;
use crate::error::Result;

/// §4.H steps 1-5, run once per minute.
pub async fn run_tick(store: &dyn Store, notifier: &dyn Notifier, now: DateTime<Utc>) -> Result<()> {
    let admins = store.load_admins().await?;
    let admin_by_id: HashMap<AdminId, &Admin> = admins.iter().map(|a| (a.id, a)).collect();
    let subs = store.load_subscriptions().await?;

    let mut to_delete = Vec::new();

    for mut sub in subs {
        if sub.removed {
            continue;
        }
        let Some(owner) = admin_by_id.get(&sub.owner_id).copied() else {
            continue;
        };

        let was_onreached_usage = sub.onreached_usage;
        apply_warning_flags(&mut sub, owner, now);
        if sub.onreached_usage && !was_onreached_usage {
            notifier.notify(Notification::UsageWarning {
                admin_id: owner.id,
                percent_used: usage_percent(&sub),
            });
        }

        transition_to_reached(&mut sub, now);

        if sub.reached {
            if let Some(renewal) = next_renewal(store, sub.id).await? {
                apply_auto_renewal(&mut sub, &renewal, now);
                store.delete_auto_renewal(renewal.id).await?;
            }
        }

        reconnect(&mut sub, now);

        if should_auto_delete(&sub, now) {
            to_delete.push(sub.id);
            continue;
        }

        store.replace_subscription(&sub).await?;
    }

    store.bulk_remove_subscriptions(&to_delete, now).await?;
    Ok(())
}

/// Reseller gating (§4.H, a separate minute job): debts every subscription
/// belonging to an over-quota seller/reseller, clears `debted` for owners
/// back under quota, as two owner-id-set UPDATE statements.
pub async fn run_reseller_gate(store: &dyn Store, notifier: &dyn Notifier) -> Result<()> {
    let admins = store.load_admins().await?;
    let mut over_quota = Vec::new();
    let mut under_quota = Vec::new();
    for admin in &admins {
        if !matches!(admin.role, AdminRole::Seller | AdminRole::Reseller) {
            continue;
        }
        if admin.reached_usage_limit() {
            over_quota.push(admin.id);
        } else {
            under_quota.push(admin.id);
        }
    }
    store.apply_reseller_gate(&over_quota, &under_quota).await?;
    for admin_id in &over_quota {
        notifier.notify(Notification::ResellerQuotaExceeded { admin_id: *admin_id });
    }
    Ok(())
}

/// `100 * current_usage / limit_usage`, 0 when unlimited. Widened to u128
/// so a subscription near `u64::MAX` usage cannot overflow the multiply.
#[must_use]
fn usage_percent(sub: &Subscription) -> u32 {
    if sub.limit_usage == 0 {
        return 0;
    }
    ((100u128 * u128::from(sub.current_usage())) / u128::from(sub.limit_usage)) as u32
}

/// §4.H step 1: idempotent set/clear of both warning flags.
fn apply_warning_flags(sub: &mut Subscription, owner: &Admin, now: DateTime<Utc>) {
    sub.onreached_expire = sub.limit_expire > 0
        && (sub.limit_expire - now.timestamp()) / 86400 <= i64::from(owner.expire_warning_threshold_days());
    sub.onreached_usage =
        sub.limit_usage > 0 && usage_percent(sub) >= owner.usage_warning_threshold_percent();
}

/// §4.H step 2: `¬removed ∧ ¬reached` subscriptions that are limited or
/// expired become `reached`.
fn transition_to_reached(sub: &mut Subscription, now: DateTime<Utc>) {
    if !sub.removed && !sub.reached && (sub.limited() || sub.expired_at(now)) {
        sub.reached = true;
        sub.reached_at = Some(now);
    }
}

async fn next_renewal(store: &dyn Store, sub_id: SubscriptionId) -> Result<Option<AutoRenewal>> {
    let renewals = store.auto_renewals_for(sub_id).await?;
    Ok(pick_next(&renewals, sub_id).cloned())
}

/// §4.H step 3: apply the FIFO-next renewal row and clear the reached
/// flags it resolves.
fn apply_auto_renewal(sub: &mut Subscription, renewal: &AutoRenewal, now: DateTime<Utc>) {
    let outcome = apply_renewal(renewal, now.timestamp(), sub.total_usage);
    sub.limit_usage = outcome.limit_usage;
    sub.limit_expire = outcome.limit_expire;
    sub.reached = false;
    sub.reached_at = None;
    sub.onreached_expire = false;
    sub.onreached_usage = false;
    if let Some(reset_to) = outcome.reset_usage_to {
        sub.reset_usage = reset_to;
        sub.last_reset_at = Some(now);
    }
}

/// §4.H step 4: a still-`reached` subscription that is no longer
/// limited/expired (e.g. an admin manually raised its quota) reconnects.
fn reconnect(sub: &mut Subscription, now: DateTime<Utc>) {
    if sub.reached && !(sub.limited() || sub.expired_at(now)) {
        sub.reached = false;
        sub.reached_at = None;
        sub.onreached_expire = false;
        sub.onreached_usage = false;
    }
}

/// §4.H step 5: `auto_delete_days == 0` never auto-deletes.
fn should_auto_delete(sub: &Subscription, now: DateTime<Utc>) -> bool {
    sub.reached
        && sub.auto_delete_days > 0
        && sub
            .reached_at
            .map(|at| (now - at).num_seconds() >= i64::from(sub.auto_delete_days) * 86400)
            .unwrap_or(false)
}
