//! # courier-tools
//!
//! Tool-side coordination over the bus:
//!
//! - **Invocation**: the confirmation state machine every side-effecting tool
//!   runs through, and the [`Confirmer`] seam that asks for a decision
//! - **Ask-user**: correlated question/answer round trips, plus the
//!   [`GatherSecrets`] invocation that stores answers in a `.env` file
//! - **Env store**: append-only `KEY=value` persistence

#![deny(unsafe_code)]

pub mod ask_user;
pub mod env_store;
pub mod errors;
pub mod invocation;

pub use ask_user::{AskUserFlow, AskUserOutcome, GatherSecrets};
pub use env_store::EnvStore;
pub use errors::ToolError;
pub use invocation::{
    BusConfirmer, ConfirmationDecision, Confirmer, InvocationLifecycle, InvocationResult,
    InvocationRunner, InvocationState, ToolInvocation, ToolOutput,
};
