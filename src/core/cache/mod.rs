//! In-memory caches (§4.C, §4.D, §4.E): shared, non-authoritative
//! projections with TTL and explicit invalidation (§9 "Global
//! singletons" — instantiated once in `AppState`, passed explicitly,
//! never reached via a bare global).

pub mod admin_cache;
pub mod config_cache;
pub mod links_cache;

pub use admin_cache::AdminCache;
pub use config_cache::ConfigCache;
pub use links_cache::LinksCache;
