//! Policy gate for tool confirmation requests.
//!
//! A [`PolicyEngine`] decides, before a confirmation request is broadcast,
//! whether a human needs to see it at all.

use std::collections::{HashMap, HashSet};

use courier_core::messages::ToolConfirmationRequest;
use parking_lot::RwLock;
use tracing::debug;

/// Verdict for a confirmation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Run without asking.
    Allow,
    /// Refuse without asking.
    Deny {
        /// Why the tool was refused.
        reason: String,
    },
    /// Broadcast the request so a human (or another decider) answers it.
    AskUser,
}

/// Decides confirmation requests on the bus's behalf.
pub trait PolicyEngine: Send + Sync {
    /// Verdict for `request`.
    fn check(&self, request: &ToolConfirmationRequest) -> PolicyDecision;

    /// Remember that `tool_name` may run without confirmation from now on.
    fn allow_tool(&self, tool_name: &str) {
        let _ = tool_name;
    }
}

/// In-memory per-session policy: a deny list, a growing allow list, and a
/// fallback verdict for everything else.
pub struct SessionPolicy {
    fallback: PolicyDecision,
    denied: HashMap<String, String>,
    allowed: RwLock<HashSet<String>>,
}

impl SessionPolicy {
    /// Ask the user for every tool not explicitly listed.
    pub fn new() -> Self {
        Self {
            fallback: PolicyDecision::AskUser,
            denied: HashMap::new(),
            allowed: RwLock::new(HashSet::new()),
        }
    }

    /// Allow every tool not explicitly denied (non-interactive runs).
    pub fn allow_all() -> Self {
        Self {
            fallback: PolicyDecision::Allow,
            ..Self::new()
        }
    }

    /// Builder: always deny `tool_name`.
    #[must_use]
    pub fn deny_tool(mut self, tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        let _ = self.denied.insert(tool_name.into(), reason.into());
        self
    }

    /// Whether `tool_name` is on the session allow list.
    pub fn is_allowed(&self, tool_name: &str) -> bool {
        self.allowed.read().contains(tool_name)
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine for SessionPolicy {
    fn check(&self, request: &ToolConfirmationRequest) -> PolicyDecision {
        if let Some(reason) = self.denied.get(&request.tool_name) {
            return PolicyDecision::Deny {
                reason: reason.clone(),
            };
        }
        if self.is_allowed(&request.tool_name) {
            return PolicyDecision::Allow;
        }
        self.fallback.clone()
    }

    fn allow_tool(&self, tool_name: &str) {
        if self.denied.contains_key(tool_name) {
            debug!(tool = tool_name, "ignoring allow for denied tool");
            return;
        }
        let _ = self.allowed.write().insert(tool_name.to_owned());
        debug!(tool = tool_name, "tool allowed for session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::CorrelationId;
    use courier_core::messages::{ConfirmationDetails, ConfirmationKind};

    fn request(tool: &str) -> ToolConfirmationRequest {
        ToolConfirmationRequest {
            correlation_id: CorrelationId::new(),
            tool_name: tool.into(),
            details: ConfirmationDetails::new(ConfirmationKind::Edit, "Edit", "write file"),
        }
    }

    #[test]
    fn default_asks() {
        assert_eq!(SessionPolicy::new().check(&request("edit")), PolicyDecision::AskUser);
    }

    #[test]
    fn allow_all_allows_unless_denied() {
        let policy = SessionPolicy::allow_all().deny_tool("shell", "no shell");
        assert_eq!(policy.check(&request("edit")), PolicyDecision::Allow);
        assert_eq!(
            policy.check(&request("shell")),
            PolicyDecision::Deny {
                reason: "no shell".into()
            }
        );
    }

    #[test]
    fn allow_tool_cannot_override_deny() {
        let policy = SessionPolicy::new().deny_tool("shell", "no");
        policy.allow_tool("shell");
        policy.allow_tool("edit");
        assert!(!policy.is_allowed("shell"));
        assert!(policy.is_allowed("edit"));
        assert_eq!(policy.check(&request("edit")), PolicyDecision::Allow);
    }
}
