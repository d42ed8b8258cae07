//! Completion announcements: prompt building and per-session delivery.

pub mod flow;
pub mod queue;
