//! Notification port (§6 "Notifications", §7 "background jobs ... emit a
//! system-log notification").
//!
//! [`Notifier`] is the single interface the Reconciler, Usage Engine,
//! Reached Tracker, and subscription handlers dispatch through;
//! channel-specific delivery (Telegram, Discord) lives behind it so those
//! components never branch on which sinks an admin has enabled.
//!
//! # Overview
//!
//! - [`Notifier`]: core notification trait
//! - [`NotifierRegistry`]: composite notifier broadcasting to multiple sinks
//! - [`Notification`]: enum of all notification event types

#[cfg(feature = "discord")]
pub mod discord;
#[cfg(feature = "telegram")]
pub mod telegram;

use crate::core::domain::AdminId;

/// System event that triggers a notification (§4.F, §4.H, §6, §7).
#[derive(Debug, Clone)]
pub enum Notification {
    /// A scheduled job's single-flight guard was held by a prior tick;
    /// this tick was skipped (§4.F "Reconciler's background sync is
    /// guarded by a process-wide lock; a contending tick is dropped").
    LockedTask {
        /// Human name of the guarded task, e.g. `"Subscriptions Sync"`.
        task: String,
    },
    /// A node's upstream REST calls failed after exhausting retries
    /// (§4.F, §7 "UpstreamUnavailable ... Emits `UnavailableNode`
    /// notification").
    UnavailableNode {
        node_id: i32,
        node_remark: String,
        reason: String,
    },
    /// `limit_expire` was negative (pending activation) and has just been
    /// rewritten to `now + |limit_expire|` on first observed usage
    /// (§4.D `activate_expire`, spec scenario S3).
    ActivatedExpire {
        subscription_id: i32,
        subscription_username: String,
        expire_at: i64,
    },
    /// A subscription received its first-ever client request
    /// (§6 "firing `first_requested_subscription` on the first-ever
    /// hit").
    FirstRequestedSubscription {
        subscription_id: i32,
        subscription_username: String,
        client_agent: Option<String>,
    },
    /// An admin login attempt failed. Carries the submitted password
    /// verbatim, matching the observed upstream behavior; see
    /// `DESIGN.md` "Open Question Decisions" for why this is preserved
    /// rather than fixed.
    AdminFailedLogin {
        admin_id: Option<AdminId>,
        username: String,
        submitted_password: String,
    },
    /// An admin (or a tracked owner) crossed their usage-limit warning
    /// threshold (§4.H reached tracker).
    UsageWarning {
        admin_id: AdminId,
        percent_used: u32,
    },
    /// An admin's subscriptions have been disabled by the reseller gate
    /// after their own usage quota was exceeded (§4.H reseller gate).
    ResellerQuotaExceeded { admin_id: AdminId },
    /// Catch-all for background-job failures that should surface to an
    /// operator but do not map to one of the above (§7 "background jobs
    /// log exceptions with full trace, emit a system-log notification").
    SystemLog { message: String },
}

/// Handler for system event notifications.
///
/// Notifications are fire-and-forget; callers do not await completion.
/// Implementations must be thread-safe (`Send + Sync`) and should return
/// quickly — slow delivery (HTTP calls) belongs on a spawned task inside
/// the implementation, not on the caller's critical path.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: Notification);
}

/// Composite notifier broadcasting to every registered sink.
pub struct NotifierRegistry {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { notifiers: vec![] }
    }

    pub fn register(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    /// Broadcasts `event` to every registered sink, cloning per sink.
    pub fn notify_all(&self, event: Notification) {
        for notifier in &self.notifiers {
            notifier.notify(event.clone());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Default for NotifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for NotifierRegistry {
    fn notify(&self, event: Notification) {
        self.notify_all(event);
    }
}

/// No-op notifier, for admins with no sinks enabled and for tests.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: Notification) {}
}

/// Logs every event through `tracing`; always registered as a fallback
/// sink so notifications are never silently lost when no channel sink is
/// configured (§9 "Global singletons").
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: Notification) {
        use tracing::{info, warn};
        match event {
            Notification::LockedTask { task } => {
                warn!(task = %task, "background task skipped, lock held by prior tick");
            }
            Notification::UnavailableNode { node_id, node_remark, reason } => {
                warn!(node_id, node_remark = %node_remark, reason = %reason, "node unavailable");
            }
            Notification::ActivatedExpire { subscription_id, subscription_username, expire_at } => {
                info!(
                    subscription_id,
                    username = %subscription_username,
                    expire_at,
                    "subscription expiry activated"
                );
            }
            Notification::FirstRequestedSubscription { subscription_id, subscription_username, client_agent } => {
                info!(
                    subscription_id,
                    username = %subscription_username,
                    client_agent = client_agent.as_deref().unwrap_or(""),
                    "subscription first requested"
                );
            }
            Notification::AdminFailedLogin { admin_id, username, .. } => {
                warn!(admin_id = ?admin_id, username = %username, "admin login failed");
            }
            Notification::UsageWarning { admin_id, percent_used } => {
                warn!(admin_id = %admin_id, percent_used, "admin usage warning threshold reached");
            }
            Notification::ResellerQuotaExceeded { admin_id } => {
                warn!(admin_id = %admin_id, "reseller quota exceeded, subscriptions disabled");
            }
            Notification::SystemLog { message } => {
                warn!(message = %message, "system log notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingNotifier(std::sync::atomic::AtomicUsize);

    impl Notifier for CountingNotifier {
        fn notify(&self, _event: Notification) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn registry_broadcasts_to_every_sink() {
        let mut registry = NotifierRegistry::new();
        registry.register(Box::new(CountingNotifier(std::sync::atomic::AtomicUsize::new(0))));
        registry.register(Box::new(CountingNotifier(std::sync::atomic::AtomicUsize::new(0))));
        assert_eq!(registry.len(), 2);
        registry.notify_all(Notification::SystemLog { message: "test".into() });
    }

    #[test]
    fn empty_registry_reports_empty() {
        let registry = NotifierRegistry::new();
        assert!(registry.is_empty());
    }

    #[test]
    fn null_notifier_discards_events() {
        let notifier = NullNotifier;
        notifier.notify(Notification::LockedTask { task: "x".into() });
    }
}
