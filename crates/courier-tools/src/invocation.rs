//! Tool invocation confirmation state machine.
//!
//! ```text
//! Created ──► AwaitingConfirmation ──► Executing ──► Completed
//!    │                │                    ├───────► Failed
//!    └────────────────┴────────────────────┴───────► Cancelled
//! ```
//!
//! Tools without confirmation details skip straight to `Executing`.
//! Informational confirmations are accepted locally; everything else asks a
//! [`Confirmer`], which for a live session is the bus.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use courier_bus::{BusError, MessageBus};
use courier_core::messages::{
    ConfirmationDetails, ConfirmationKind, ToolConfirmationOutcome, ToolConfirmationRequest,
    UpdatePolicy,
};
use courier_core::{CorrelationId, Message, MessageType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::ToolError;

// ─────────────────────────────────────────────────────────────────────────────
// States
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of one tool invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvocationState {
    /// Built, nothing asked or run yet.
    Created,
    /// Waiting for a confirmation decision.
    AwaitingConfirmation,
    /// Running.
    Executing,
    /// Finished successfully.
    Completed,
    /// Execution returned an error.
    Failed,
    /// Rejected or cancelled before finishing.
    Cancelled,
}

impl InvocationState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal edge.
    pub fn can_transition_to(self, next: Self) -> bool {
        use InvocationState::{AwaitingConfirmation, Cancelled, Completed, Created, Executing, Failed};
        matches!(
            (self, next),
            (Created, AwaitingConfirmation | Executing | Cancelled)
                | (AwaitingConfirmation, Executing | Cancelled)
                | (Executing, Completed | Failed | Cancelled)
        )
    }

    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current state of one invocation and rejects illegal edges.
#[derive(Debug)]
pub struct InvocationLifecycle {
    tool_name: String,
    state: InvocationState,
    history: Vec<InvocationState>,
}

impl InvocationLifecycle {
    /// Start in [`InvocationState::Created`].
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            state: InvocationState::Created,
            history: vec![InvocationState::Created],
        }
    }

    /// Current state.
    pub fn state(&self) -> InvocationState {
        self.state
    }

    /// Every state visited, in order.
    pub fn history(&self) -> &[InvocationState] {
        &self.history
    }

    /// Move to `next`, or fail with [`ToolError::InvalidTransition`].
    pub fn transition(&mut self, next: InvocationState) -> Result<(), ToolError> {
        if !self.state.can_transition_to(next) {
            return Err(ToolError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(tool = %self.tool_name, from = %self.state, to = %next, "invocation transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Invocation trait
// ─────────────────────────────────────────────────────────────────────────────

/// Output of a completed invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    /// Text returned to the model.
    pub content: String,
}

impl ToolOutput {
    /// Wrap plain text.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// One prepared call of a tool.
#[async_trait]
pub trait ToolInvocation: Send + Sync {
    /// Tool name, used in confirmation requests and logs.
    fn tool_name(&self) -> &str;

    /// One-line description of what this call will do.
    fn description(&self) -> String;

    /// What to confirm before running, or `None` to run unconfirmed.
    fn confirmation_details(&self) -> Option<ConfirmationDetails>;

    /// Called with the decision once one is made, before execution.
    async fn on_confirm(&self, outcome: ToolConfirmationOutcome) {
        let _ = outcome;
    }

    /// Run the tool.
    async fn execute(&self, cancel: &CancellationToken) -> Result<ToolOutput, ToolError>;
}

/// Terminal result of [`InvocationRunner::run`].
#[derive(Debug)]
pub enum InvocationResult {
    /// Ran to completion.
    Completed(ToolOutput),
    /// Execution failed.
    Failed(ToolError),
    /// Rejected at confirmation, or cancelled at any point.
    Cancelled,
}

impl InvocationResult {
    /// The terminal state this result corresponds to.
    pub fn state(&self) -> InvocationState {
        match self {
            Self::Completed(_) => InvocationState::Completed,
            Self::Failed(_) => InvocationState::Failed,
            Self::Cancelled => InvocationState::Cancelled,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Confirmation seam
// ─────────────────────────────────────────────────────────────────────────────

/// Result of asking for a confirmation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationDecision {
    /// A decider answered.
    Outcome(ToolConfirmationOutcome),
    /// The caller's cancellation fired first.
    Cancelled,
}

/// Obtains a decision for a confirmation request.
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Ask for a decision on `request`, giving up when `cancel` fires.
    async fn confirm(
        &self,
        request: ToolConfirmationRequest,
        cancel: &CancellationToken,
    ) -> ConfirmationDecision;
}

/// [`Confirmer`] that round-trips through the message bus.
pub struct BusConfirmer {
    bus: Arc<MessageBus>,
}

impl BusConfirmer {
    /// Confirm through `bus`.
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Confirmer for BusConfirmer {
    async fn confirm(
        &self,
        request: ToolConfirmationRequest,
        cancel: &CancellationToken,
    ) -> ConfirmationDecision {
        let tool_name = request.tool_name.clone();
        let response = self
            .bus
            .request(
                Message::ToolConfirmationRequest(request),
                MessageType::ToolConfirmationResponse,
                cancel,
            )
            .await;

        match response {
            Ok(Message::ToolConfirmationResponse(resp)) => {
                if resp.outcome == ToolConfirmationOutcome::ProceedAlways {
                    info!(tool = %tool_name, "tool allowed for the rest of the session");
                    let _ = self
                        .bus
                        .publish(Message::UpdatePolicy(UpdatePolicy { tool_name }));
                }
                ConfirmationDecision::Outcome(resp.outcome)
            }
            Ok(other) => {
                warn!(tool = %tool_name, got = %other.message_type(), "unexpected confirmation reply");
                ConfirmationDecision::Outcome(ToolConfirmationOutcome::Cancel)
            }
            Err(BusError::Cancelled) => ConfirmationDecision::Cancelled,
            Err(error) => {
                warn!(tool = %tool_name, %error, "confirmation request failed");
                ConfirmationDecision::Cancelled
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runner
// ─────────────────────────────────────────────────────────────────────────────

/// Drives invocations through confirmation and execution.
pub struct InvocationRunner {
    confirmer: Arc<dyn Confirmer>,
}

impl InvocationRunner {
    /// Runner asking `confirmer` for decisions.
    pub fn new(confirmer: Arc<dyn Confirmer>) -> Self {
        Self { confirmer }
    }

    /// Runner confirming over `bus`.
    pub fn over_bus(bus: Arc<MessageBus>) -> Self {
        Self::new(Arc::new(BusConfirmer::new(bus)))
    }

    /// Confirm (if needed) and execute `invocation`.
    ///
    /// Only a broken state machine yields `Err`; tool failures come back as
    /// [`InvocationResult::Failed`].
    pub async fn run(
        &self,
        invocation: &dyn ToolInvocation,
        cancel: &CancellationToken,
    ) -> Result<InvocationResult, ToolError> {
        let mut lifecycle = InvocationLifecycle::new(invocation.tool_name());

        if let Some(details) = invocation.confirmation_details() {
            lifecycle.transition(InvocationState::AwaitingConfirmation)?;
            let outcome = if details.kind == ConfirmationKind::Info {
                ToolConfirmationOutcome::ProceedOnce
            } else {
                let request = ToolConfirmationRequest {
                    correlation_id: CorrelationId::new(),
                    tool_name: invocation.tool_name().to_owned(),
                    details,
                };
                match self.confirmer.confirm(request, cancel).await {
                    ConfirmationDecision::Outcome(outcome) => outcome,
                    ConfirmationDecision::Cancelled => {
                        lifecycle.transition(InvocationState::Cancelled)?;
                        return Ok(InvocationResult::Cancelled);
                    }
                }
            };
            invocation.on_confirm(outcome).await;
            if !outcome.is_proceed() {
                debug!(tool = invocation.tool_name(), "invocation rejected at confirmation");
                lifecycle.transition(InvocationState::Cancelled)?;
                return Ok(InvocationResult::Cancelled);
            }
        }

        if cancel.is_cancelled() {
            lifecycle.transition(InvocationState::Cancelled)?;
            return Ok(InvocationResult::Cancelled);
        }

        lifecycle.transition(InvocationState::Executing)?;
        let executed = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ToolError::Cancelled),
            result = invocation.execute(cancel) => result,
        };

        let result = match executed {
            Ok(output) => InvocationResult::Completed(output),
            Err(ToolError::Cancelled) => InvocationResult::Cancelled,
            Err(error) => {
                warn!(tool = invocation.tool_name(), %error, "tool execution failed");
                InvocationResult::Failed(error)
            }
        };
        lifecycle.transition(result.state())?;
        Ok(result)
    }
}
