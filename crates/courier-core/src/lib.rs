//! # courier-core
//!
//! Foundation types shared by every Courier crate:
//!
//! - **Branded IDs**: `CorrelationId`, `RunId` as newtypes for type safety
//! - **Delivery addressing**: [`DeliveryContext`] with normalize/merge/key helpers
//! - **Bus messages**: the [`Message`] enum carried by the in-process bus
//! - **Subagent runs**: [`SubagentRunRecord`] and its partial-update [`RunPatch`]
//! - **Formatting**: short human-readable durations for run stats
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod delivery;
pub mod format;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod subagent;

pub use delivery::{DeliveryContext, ThreadId};
pub use ids::{CorrelationId, RunId};
pub use messages::{Message, MessageType};
pub use subagent::{CleanupPolicy, RunOutcome, RunPatch, RunStatus, SubagentRunRecord};

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
