//! # courier-bus
//!
//! In-process broadcast broker.
//!
//! Producers [`publish`](MessageBus::publish) typed [`Message`]s; consumers
//! subscribe by [`MessageType`]. Every subscriber of a type receives every
//! message of that type, in publish order. Request/response flows pair up
//! through correlation IDs via [`MessageBus::request`], which guarantees the
//! response subscription is released before the call resolves.
//!
//! [`Message`]: courier_core::Message
//! [`MessageType`]: courier_core::MessageType

#![deny(unsafe_code)]

pub mod bus;
pub mod correlation;
pub mod errors;
pub mod policy;
pub mod subscription;

pub use bus::{MessageBus, PublishOutcome, SubscriptionId};
pub use errors::{BusError, Result};
pub use policy::{PolicyDecision, PolicyEngine, SessionPolicy};
pub use subscription::{Subscription, SubscriptionGuard};
