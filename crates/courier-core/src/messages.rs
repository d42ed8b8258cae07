//! Bus wire messages.
//!
//! Every message is tagged by `type`. Request/response pairs share a
//! [`CorrelationId`]: the request carries a fresh one and the response echoes
//! it, because the bus broadcasts by type and unrelated requests of the same
//! type share the wire.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryContext;
use crate::ids::CorrelationId;

// ─────────────────────────────────────────────────────────────────────────────
// Ask-user
// ─────────────────────────────────────────────────────────────────────────────

/// Input kind of a question.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Free-form text.
    #[default]
    Text,
}

/// A single question presented to the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// The question text.
    pub question: String,
    /// Short header shown above the input.
    pub header: String,
    /// Input kind.
    #[serde(default)]
    pub kind: QuestionKind,
    /// Placeholder text for the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl Question {
    /// Build a free-text question.
    pub fn text(question: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            header: header.into(),
            kind: QuestionKind::Text,
            placeholder: None,
        }
    }

    /// Builder: set the placeholder.
    #[must_use]
    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }
}

/// Request for one or more answers from the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskUserRequest {
    /// Correlation token echoed by the response.
    pub correlation_id: CorrelationId,
    /// Questions, answered by index.
    pub questions: Vec<Question>,
}

/// The user's reply to an [`AskUserRequest`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskUserResponse {
    /// Correlation token of the request being answered.
    pub correlation_id: CorrelationId,
    /// Answers keyed by question index (`"0"`, `"1"`, ...).
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
    /// Set when the user dismissed the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
}

impl AskUserResponse {
    /// Build an answered response from answers in question order.
    pub fn answered<I, S>(correlation_id: CorrelationId, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            correlation_id,
            answers: answers
                .into_iter()
                .enumerate()
                .map(|(i, a)| (i.to_string(), a.into()))
                .collect(),
            cancelled: None,
        }
    }

    /// Build a dismissed response.
    pub fn dismissed(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            answers: BTreeMap::new(),
            cancelled: Some(true),
        }
    }

    /// Whether the user dismissed the prompt.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.unwrap_or(false)
    }

    /// Answer for the question at `index`.
    pub fn answer(&self, index: usize) -> Option<&str> {
        self.answers.get(&index.to_string()).map(String::as_str)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool confirmation
// ─────────────────────────────────────────────────────────────────────────────

/// What kind of side effect is being confirmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationKind {
    /// Running a shell command.
    Exec,
    /// Writing or editing a file.
    Edit,
    /// Calling an external tool server.
    Mcp,
    /// Purely informational; no round trip needed.
    Info,
}

/// Human-readable description of the action awaiting confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationDetails {
    /// Kind of side effect.
    pub kind: ConfirmationKind,
    /// Short title.
    pub title: String,
    /// Prompt shown to the decider.
    pub prompt: String,
    /// Command line, for `exec`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Target file, for `edit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Related URLs, for `info`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

impl ConfirmationDetails {
    /// Build details with only kind, title and prompt set.
    pub fn new(kind: ConfirmationKind, title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            prompt: prompt.into(),
            command: None,
            file_path: None,
            urls: Vec::new(),
        }
    }
}

/// Decision on a confirmation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolConfirmationOutcome {
    /// Run this invocation only.
    ProceedOnce,
    /// Run, and allow this tool without asking for the rest of the session.
    ProceedAlways,
    /// Do not run.
    Cancel,
}

impl ToolConfirmationOutcome {
    /// Whether the outcome permits execution.
    pub fn is_proceed(self) -> bool {
        !matches!(self, Self::Cancel)
    }
}

/// Request for a decision before a side-effecting tool runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfirmationRequest {
    /// Correlation token echoed by the response.
    pub correlation_id: CorrelationId,
    /// Name of the tool asking.
    pub tool_name: String,
    /// What is being confirmed.
    pub details: ConfirmationDetails,
}

/// Decision for a [`ToolConfirmationRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfirmationResponse {
    /// Correlation token of the request being answered.
    pub correlation_id: CorrelationId,
    /// The decision.
    pub outcome: ToolConfirmationOutcome,
    /// Shorthand for "outcome permits execution".
    pub confirmed: bool,
}

impl ToolConfirmationResponse {
    /// Build a response, deriving `confirmed` from the outcome.
    pub fn new(correlation_id: CorrelationId, outcome: ToolConfirmationOutcome) -> Self {
        Self {
            correlation_id,
            outcome,
            confirmed: outcome.is_proceed(),
        }
    }
}

/// Announced when policy denies a confirmation request outright.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPolicyRejection {
    /// Correlation token of the rejected request.
    pub correlation_id: CorrelationId,
    /// Tool that was denied.
    pub tool_name: String,
    /// Why.
    pub reason: String,
}

/// Adds a tool to the session allow-list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicy {
    /// Tool to allow without confirmation.
    pub tool_name: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Subagent announce
// ─────────────────────────────────────────────────────────────────────────────

/// Notification that a delegated run finished, routed to its requester.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentAnnounce {
    /// Requester session the prompt is for.
    pub session_key: String,
    /// Where the requester is reachable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<DeliveryContext>,
    /// Prompt text to inject.
    pub prompt: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Message envelope
// ─────────────────────────────────────────────────────────────────────────────

/// A message carried by the bus, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// See [`AskUserRequest`].
    AskUserRequest(AskUserRequest),
    /// See [`AskUserResponse`].
    AskUserResponse(AskUserResponse),
    /// See [`ToolConfirmationRequest`].
    ToolConfirmationRequest(ToolConfirmationRequest),
    /// See [`ToolConfirmationResponse`].
    ToolConfirmationResponse(ToolConfirmationResponse),
    /// See [`ToolPolicyRejection`].
    ToolPolicyRejection(ToolPolicyRejection),
    /// See [`UpdatePolicy`].
    UpdatePolicy(UpdatePolicy),
    /// See [`SubagentAnnounce`].
    SubagentAnnounce(SubagentAnnounce),
}

/// The `type` tag of a [`Message`], used as the subscription key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// `ask-user-request`
    AskUserRequest,
    /// `ask-user-response`
    AskUserResponse,
    /// `tool-confirmation-request`
    ToolConfirmationRequest,
    /// `tool-confirmation-response`
    ToolConfirmationResponse,
    /// `tool-policy-rejection`
    ToolPolicyRejection,
    /// `update-policy`
    UpdatePolicy,
    /// `subagent-announce`
    SubagentAnnounce,
}

impl MessageType {
    /// Wire name of the tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AskUserRequest => "ask-user-request",
            Self::AskUserResponse => "ask-user-response",
            Self::ToolConfirmationRequest => "tool-confirmation-request",
            Self::ToolConfirmationResponse => "tool-confirmation-response",
            Self::ToolPolicyRejection => "tool-policy-rejection",
            Self::UpdatePolicy => "update-policy",
            Self::SubagentAnnounce => "subagent-announce",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    /// The message's type tag.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::AskUserRequest(_) => MessageType::AskUserRequest,
            Self::AskUserResponse(_) => MessageType::AskUserResponse,
            Self::ToolConfirmationRequest(_) => MessageType::ToolConfirmationRequest,
            Self::ToolConfirmationResponse(_) => MessageType::ToolConfirmationResponse,
            Self::ToolPolicyRejection(_) => MessageType::ToolPolicyRejection,
            Self::UpdatePolicy(_) => MessageType::UpdatePolicy,
            Self::SubagentAnnounce(_) => MessageType::SubagentAnnounce,
        }
    }

    /// Correlation token, for the request/response families.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::AskUserRequest(m) => Some(&m.correlation_id),
            Self::AskUserResponse(m) => Some(&m.correlation_id),
            Self::ToolConfirmationRequest(m) => Some(&m.correlation_id),
            Self::ToolConfirmationResponse(m) => Some(&m.correlation_id),
            Self::ToolPolicyRejection(m) => Some(&m.correlation_id),
            Self::UpdatePolicy(_) | Self::SubagentAnnounce(_) => None,
        }
    }
}
