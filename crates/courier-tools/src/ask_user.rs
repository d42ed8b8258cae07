//! Ask-user round trips and secret gathering.
//!
//! [`AskUserFlow::ask`] publishes an `ask-user-request` with a fresh
//! correlation ID and waits for the matching `ask-user-response`. Dismissal
//! is a normal outcome, not an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use courier_bus::{BusError, MessageBus};
use courier_core::messages::{AskUserRequest, ConfirmationDetails, Question};
use courier_core::{CorrelationId, Message, MessageType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::env_store::EnvStore;
use crate::errors::ToolError;
use crate::invocation::{ToolInvocation, ToolOutput};

/// Result of asking the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AskUserOutcome {
    /// Answers keyed by question index.
    Answered(BTreeMap<usize, String>),
    /// The user dismissed the prompt.
    Declined,
    /// The caller's cancellation fired first.
    Cancelled,
}

/// Asks questions over the bus.
#[derive(Clone)]
pub struct AskUserFlow {
    bus: Arc<MessageBus>,
}

impl AskUserFlow {
    /// Flow publishing on `bus`.
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }

    /// Ask `questions` and wait for the answer or `cancel`.
    pub async fn ask(
        &self,
        questions: Vec<Question>,
        cancel: &CancellationToken,
    ) -> Result<AskUserOutcome, ToolError> {
        if questions.is_empty() {
            return Err(ToolError::validation("at least one question is required"));
        }
        let correlation_id = CorrelationId::new();
        debug!(%correlation_id, count = questions.len(), "asking user");

        let request = Message::AskUserRequest(AskUserRequest {
            correlation_id,
            questions,
        });
        let response = match self
            .bus
            .request(request, MessageType::AskUserResponse, cancel)
            .await
        {
            Ok(response) => response,
            Err(BusError::Cancelled) => return Ok(AskUserOutcome::Cancelled),
            Err(error) => {
                return Err(ToolError::Internal {
                    message: error.to_string(),
                });
            }
        };

        let Message::AskUserResponse(response) = response else {
            return Err(ToolError::Internal {
                message: format!("unexpected reply type {}", response.message_type()),
            });
        };
        if response.is_cancelled() {
            return Ok(AskUserOutcome::Declined);
        }

        let answers = response
            .answers
            .into_iter()
            .filter_map(|(key, value)| match key.parse::<usize>() {
                Ok(index) => Some((index, value)),
                Err(_) => {
                    debug!(%key, "ignoring non-index answer key");
                    None
                }
            })
            .collect();
        Ok(AskUserOutcome::Answered(answers))
    }
}

/// Asks the user for environment variable values and appends the answered
/// ones to a `.env` file.
pub struct GatherSecrets {
    flow: AskUserFlow,
    store: EnvStore,
    variables: Vec<String>,
}

impl GatherSecrets {
    /// Gather `variables` into `store`.
    pub fn new(flow: AskUserFlow, store: EnvStore, variables: Vec<String>) -> Self {
        Self {
            flow,
            store,
            variables,
        }
    }

    fn questions(&self) -> Vec<Question> {
        self.variables
            .iter()
            .map(|name| Question::text(format!("Enter a value for {name}"), name).with_placeholder("value"))
            .collect()
    }
}

#[async_trait]
impl ToolInvocation for GatherSecrets {
    fn tool_name(&self) -> &str {
        "gather_secrets"
    }

    fn description(&self) -> String {
        format!("Ask for {} and save to {}", self.variables.join(", "), self.store.path().display())
    }

    fn confirmation_details(&self) -> Option<ConfirmationDetails> {
        None
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        if self.variables.is_empty() {
            return Err(ToolError::validation("no variables requested"));
        }
        if let Some(bad) = self.variables.iter().find(|v| !EnvStore::is_valid_key(v)) {
            return Err(ToolError::validation(format!("invalid environment variable name: {bad:?}")));
        }

        let answers = match self.flow.ask(self.questions(), cancel).await? {
            AskUserOutcome::Answered(answers) => answers,
            AskUserOutcome::Declined => {
                info!("user declined to provide secrets");
                return Ok(ToolOutput::text("User declined to provide the requested values."));
            }
            AskUserOutcome::Cancelled => return Err(ToolError::Cancelled),
        };

        let entries: Vec<(&str, &str)> = self
            .variables
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                let value = answers.get(&i)?;
                (!value.trim().is_empty()).then_some((name.as_str(), value.as_str()))
            })
            .collect();

        let written = self.store.append(&entries).inspect_err(|error| {
            warn!(path = %self.store.path().display(), %error, "failed to write env file");
        })?;
        let saved: Vec<&str> = entries.iter().map(|(k, _)| *k).collect();
        Ok(ToolOutput::text(if written == 0 {
            "No values were provided.".to_owned()
        } else {
            format!(
                "Saved {written} of {} values to {}: {}",
                self.variables.len(),
                self.store.path().display(),
                saved.join(", ")
            )
        }))
    }
}
