//! Admin Cache (§4.E): username/id/api-key -> admin, TTL 50 min,
//! write-through on mutation.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::core::domain::{Admin, AdminId};

/// TTL in seconds (§4.E "TTL = 3000 s" = 50 minutes).
pub const TTL_SECS: i64 = 3000;

struct Entry {
    admin: Admin,
    inserted_at: DateTime<Utc>,
}

/// `by_username`, `by_id`, `by_api_key` (§4.E). All three indices are
/// kept in lockstep by every write; a stale read from any one of them
/// returns `None` and the caller falls back to `Store`.
#[derive(Default)]
pub struct AdminCache {
    by_username: DashMap<String, Entry>,
    by_id: DashMap<AdminId, Entry>,
    by_api_key: DashMap<String, Entry>,
}

impl AdminCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh(entry: &Entry, now: DateTime<Utc>) -> bool {
        (now - entry.inserted_at).num_seconds() < TTL_SECS
    }

    #[must_use]
    pub fn get_by_username(&self, username: &str, now: DateTime<Utc>) -> Option<Admin> {
        self.by_username
            .get(username)
            .filter(|e| Self::fresh(e, now))
            .map(|e| e.admin.clone())
    }

    #[must_use]
    pub fn get_by_id(&self, id: AdminId, now: DateTime<Utc>) -> Option<Admin> {
        self.by_id.get(&id).filter(|e| Self::fresh(e, now)).map(|e| e.admin.clone())
    }

    #[must_use]
    pub fn get_by_api_key(&self, api_key: &str, now: DateTime<Utc>) -> Option<Admin> {
        self.by_api_key
            .get(api_key)
            .filter(|e| Self::fresh(e, now))
            .map(|e| e.admin.clone())
    }

    /// Write-through: evict the old `api_key` entry if it changed, then
    /// insert under all three indices (§4.E).
    pub fn update(&self, admin: Admin, now: DateTime<Utc>) {
        if let Some(old) = self.by_id.get(&admin.id) {
            if old.admin.api_key != admin.api_key {
                self.by_api_key.remove(&old.admin.api_key);
            }
        }
        if let Some(username) = &admin.username {
            self.by_username.insert(
                username.clone(),
                Entry { admin: admin.clone(), inserted_at: now },
            );
        }
        self.by_api_key.insert(
            admin.api_key.clone(),
            Entry { admin: admin.clone(), inserted_at: now },
        );
        self.by_id.insert(admin.id, Entry { admin, inserted_at: now });
    }

    /// Drops all three indices for this admin.
    pub fn remove(&self, admin: &Admin) {
        if let Some(username) = &admin.username {
            self.by_username.remove(username);
        }
        self.by_api_key.remove(&admin.api_key);
        self.by_id.remove(&admin.id);
    }
}
