//! Background services (§4.F–§4.I): the reconciliation and accounting
//! engine that owns the periodic work, as opposed to the thin request
//! handlers that sit in front of it (§1 "THE CORE").

pub mod link_generator;
pub mod reached_tracker;
pub mod reconciler;
pub mod usage_engine;
