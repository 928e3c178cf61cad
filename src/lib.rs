//! fleetsync - control plane for a fleet of proxy nodes backing user
//! subscriptions.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── core/             # Reconciliation and accounting engine (§1 THE CORE)
//! │   ├── domain/       # Pure entity types + derived booleans (§3)
//! │   ├── db/           # Diesel schema/models backing `store::sqlite`
//! │   ├── store/        # `Store` trait + SQLite implementation (§4.A)
//! │   ├── node/         # Dialect-typed upstream REST clients (§4.B)
//! │   ├── cache/        # Config/Links/Admin in-memory caches (§4.C-E)
//! │   ├── service/      # Reconciler, Usage Engine, Reached Tracker,
//! │   │                 # Link Generator (§4.F-I)
//! │   └── notify/       # Fire-and-forget notification sinks (§6)
//! ├── app/              # Configuration, shared process state, scheduler
//! └── cli/              # Operator-facing command-line surface
//! ```
//!
//! # Features
//!
//! - `telegram` - Telegram notification sink (default)
//! - `discord` - Discord notification sink (default)
//! - `testkit` - exposes `testkit` helpers to integration tests

pub mod app;
pub mod cli;
pub mod core;
pub mod error;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
