//! Shared application state.

use std::sync::Arc;

use crate::core::cache::{AdminCache, ConfigCache, LinksCache};
use crate::core::db::{self, DbPool};
use crate::core::notify::{LogNotifier, Notifier, NotifierRegistry};
use crate::core::service::reconciler::ReconcilerLock;
use crate::core::service::usage_engine::UsageEngine;
use crate::core::store::sqlite::SqliteStore;
use crate::core::store::Store;
use crate::error::Result;

use super::config::Config;

/// Builds the notifier registry for this process: a `LogNotifier` is
/// always registered so every notification at minimum reaches the
/// structured log, mirroring the upstream's "always add log notifier"
/// bootstrap. Per-admin Telegram/Discord sinks are constructed from each
/// `Admin`'s own notification fields at dispatch time, not registered
/// here.
fn build_notifier_registry() -> NotifierRegistry {
    let mut registry = NotifierRegistry::new();
    registry.register(Box::new(LogNotifier));
    registry
}

/// Shared application state accessible by the scheduler, CLI, and (when
/// present) request handlers: the persistence layer, the three
/// process-wide caches (§4.C/D/E), the reconciler's single-flight lock
/// (§4.F), the usage-report sink/retry buffer (§4.G), and the
/// notification fan-out (§6).
pub struct AppState {
    store: Arc<dyn Store>,
    config_cache: Arc<ConfigCache>,
    links_cache: Arc<LinksCache>,
    admin_cache: Arc<AdminCache>,
    reconciler_lock: Arc<ReconcilerLock>,
    notifier: Arc<dyn Notifier>,
    usage_engine: Arc<UsageEngine>,
    http_client: reqwest::Client,
}

impl AppState {
    /// Opens (and migrates) the SQLite pool at `config.database.url` and
    /// assembles the rest of process state around it.
    pub fn new(config: &Config) -> Result<Self> {
        let pool = db::create_pool(&config.database.url)?;
        db::run_migrations(&pool)?;
        Ok(Self::from_pool(pool))
    }

    /// Assembles state from an already-open pool, for callers (tests,
    /// `in_memory_store`-backed tools) that manage the pool themselves.
    #[must_use]
    pub fn from_pool(pool: DbPool) -> Self {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        Self {
            store,
            config_cache: Arc::new(ConfigCache::new()),
            links_cache: Arc::new(LinksCache::new()),
            admin_cache: Arc::new(AdminCache::new()),
            reconciler_lock: Arc::new(ReconcilerLock::new()),
            notifier: Arc::new(build_notifier_registry()),
            usage_engine: Arc::new(UsageEngine::new(None)),
            http_client: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn config_cache(&self) -> Arc<ConfigCache> {
        Arc::clone(&self.config_cache)
    }

    #[must_use]
    pub fn links_cache(&self) -> Arc<LinksCache> {
        Arc::clone(&self.links_cache)
    }

    #[must_use]
    pub fn admin_cache(&self) -> Arc<AdminCache> {
        Arc::clone(&self.admin_cache)
    }

    #[must_use]
    pub fn reconciler_lock(&self) -> Arc<ReconcilerLock> {
        Arc::clone(&self.reconciler_lock)
    }

    #[must_use]
    pub fn notifier(&self) -> Arc<dyn Notifier> {
        Arc::clone(&self.notifier)
    }

    #[must_use]
    pub fn usage_engine(&self) -> Arc<UsageEngine> {
        Arc::clone(&self.usage_engine)
    }

    #[must_use]
    pub fn http_client(&self) -> reqwest::Client {
        self.http_client.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_pool;

    #[test]
    fn fresh_state_has_empty_caches() {
        let state = AppState::from_pool(test_pool());
        assert_eq!(state.config_cache().get(crate::core::domain::NodeId(1)), None);
        assert_eq!(state.links_cache().get(crate::core::domain::NodeId(1)), Vec::<String>::new());
    }

    #[test]
    fn notifier_registry_includes_log_notifier() {
        let state = AppState::from_pool(test_pool());
        // A LogNotifier never panics and accepts any event; this just
        // exercises the wiring end to end.
        state.notifier().notify(crate::core::notify::Notification::SystemLog { message: "boot".into() });
    }
}
