//! # courier-runtime
//!
//! Long-lived coordination state for delegated work:
//!
//! - **Subagent registry**: persistent run records with cleanup bookkeeping
//!   and a self-disarming archive sweeper
//! - **Announce queue**: per-session debounced, capped, single-flight delivery
//!   of completion announcements
//! - **Announce flow**: turns a finished run into an announcement exactly once

#![deny(unsafe_code)]

pub mod announce;
pub mod errors;
pub mod subagents;

pub use announce::flow::{BusAnnounceSender, SubagentAnnouncer, build_announce_prompt, build_stats_line};
pub use announce::queue::{AnnounceQueue, AnnounceQueueItem, AnnounceSender, QueueSnapshot};
pub use errors::{DeliveryError, RegistryError};
pub use subagents::registry::{SessionReaper, SubagentRegistry};
