//! Newtype identifiers for the core entities.
//!
//! Surrogate integer ids, not pointer cycles (§9 Design Notes) — the admin
//! ↔ subscription ↔ service ↔ node graph is cyclic, so every reference
//! between entities goes through one of these ids plus a lookup table.

use std::fmt;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub i32);

        impl $name {
            #[must_use]
            pub fn new(value: i32) -> Self {
                Self(value)
            }

            #[must_use]
            pub fn value(self) -> i32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i32> for $name {
            fn from(value: i32) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(AdminId);
id_type!(NodeId);
id_type!(ServiceId);
id_type!(SubscriptionId);
id_type!(AutoRenewalId);
