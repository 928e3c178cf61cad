//! Core domain entities (§3 Data Model): plain Rust types and the pure
//! functions that derive booleans/ids from them. No I/O lives here —
//! persistence is `crate::core::store`, upstream calls are
//! `crate::core::node`.

pub mod admin;
pub mod auto_renewal;
pub mod derive;
pub mod format;
pub mod ids;
pub mod node;
pub mod service;
pub mod subscription;
pub mod usage;

pub use admin::{
    Admin, AdminRole, NotificationSinks, PlaceholderCategory, PlaceholderTemplate,
    PresentationConfig, ResourceAccess, TotpState, TotpStatus,
};
pub use auto_renewal::{apply_renewal, pick_next, AutoRenewal, RenewalOutcome};
pub use derive::{derive_password, derive_uuid};
pub use format::{split_leading_emoji, FormatFields};
pub use ids::{AdminId, AutoRenewalId, NodeId, ServiceId, SubscriptionId};
pub use node::{Node, NodeKind, ACCESS_TOKEN_TTL_SECS};
pub use service::Service;
pub use subscription::{Subscription, ONLINE_WINDOW_SECS};
pub use usage::{compute_delta, hour_bucket, scale, CounterDelta, SubscriptionUsage, SubscriptionUsageLog};
