//! Delegated run bookkeeping.

pub mod registry;
