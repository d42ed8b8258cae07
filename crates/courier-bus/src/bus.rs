//! The broadcast broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use courier_core::messages::{
    ToolConfirmationOutcome, ToolConfirmationRequest, ToolConfirmationResponse, ToolPolicyRejection,
};
use courier_core::{Message, MessageType};
use dashmap::DashMap;
use tracing::debug;

use crate::policy::{PolicyDecision, PolicyEngine};

/// Handler invoked synchronously for each message of a subscribed type.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Opaque handle identifying one subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Result of a [`MessageBus::publish`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Number of handlers the message was delivered to.
    pub delivered: usize,
    /// Policy verdict, for confirmation requests when a policy is installed.
    pub policy: Option<PolicyDecision>,
}

/// In-process broadcast broker keyed by message type.
///
/// Delivery is synchronous: `publish` returns once every handler registered
/// for the type has been called. Handlers run without any bus lock held, so
/// they may subscribe, unsubscribe or publish themselves. The bus never times
/// out a request on anyone's behalf.
pub struct MessageBus {
    subscribers: DashMap<MessageType, Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
    publish_count: AtomicU64,
    policy: Option<Arc<dyn PolicyEngine>>,
}

impl MessageBus {
    /// Create a bus with no policy gate: every confirmation request is
    /// broadcast to subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            publish_count: AtomicU64::new(0),
            policy: None,
        }
    }

    /// Create a bus that consults `policy` before broadcasting confirmation
    /// requests.
    pub fn with_policy(policy: Arc<dyn PolicyEngine>) -> Self {
        Self {
            policy: Some(policy),
            ..Self::new()
        }
    }

    /// Register `handler` for every future message of `message_type`.
    pub fn subscribe<F>(&self, message_type: MessageType, handler: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .entry(message_type)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(%message_type, subscription = id.0, "subscribed");
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, message_type: MessageType, id: SubscriptionId) -> bool {
        let (removed, now_empty) = match self.subscribers.get_mut(&message_type) {
            Some(mut handlers) => {
                let before = handlers.len();
                handlers.retain(|(sid, _)| *sid != id);
                (handlers.len() != before, handlers.is_empty())
            }
            None => (false, false),
        };
        if now_empty {
            let _ = self.subscribers.remove_if(&message_type, |_, v| v.is_empty());
        }
        if removed {
            debug!(%message_type, subscription = id.0, "unsubscribed");
        }
        removed
    }

    /// Number of handlers registered for `message_type`.
    pub fn subscriber_count(&self, message_type: MessageType) -> usize {
        self.subscribers.get(&message_type).map_or(0, |h| h.len())
    }

    /// Total number of messages published.
    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }

    /// Deliver `message` to every handler currently subscribed to its type.
    ///
    /// Confirmation requests are first run through the policy gate, if one is
    /// installed: `Allow` and `Deny` are answered by the bus itself and never
    /// reach subscribers of the request type.
    pub fn publish(&self, message: Message) -> PublishOutcome {
        let _ = self.publish_count.fetch_add(1, Ordering::Relaxed);

        if let Some(policy) = &self.policy {
            match &message {
                Message::ToolConfirmationRequest(request) => {
                    let decision = policy.check(request);
                    if let Some(outcome) = self.answer_by_policy(request, &decision) {
                        return outcome;
                    }
                }
                Message::UpdatePolicy(update) => policy.allow_tool(&update.tool_name),
                _ => {}
            }
        }

        let delivered = self.broadcast(&message);
        let policy = (self.policy.is_some()
            && matches!(message, Message::ToolConfirmationRequest(_)))
        .then_some(PolicyDecision::AskUser);
        PublishOutcome { delivered, policy }
    }

    fn answer_by_policy(
        &self,
        request: &ToolConfirmationRequest,
        decision: &PolicyDecision,
    ) -> Option<PublishOutcome> {
        let outcome = match decision {
            PolicyDecision::AskUser => return None,
            PolicyDecision::Allow => ToolConfirmationOutcome::ProceedOnce,
            PolicyDecision::Deny { reason } => {
                debug!(tool = %request.tool_name, %reason, "confirmation denied by policy");
                let _ = self.broadcast(&Message::ToolPolicyRejection(ToolPolicyRejection {
                    correlation_id: request.correlation_id.clone(),
                    tool_name: request.tool_name.clone(),
                    reason: reason.clone(),
                }));
                ToolConfirmationOutcome::Cancel
            }
        };
        let delivered = self.broadcast(&Message::ToolConfirmationResponse(
            ToolConfirmationResponse::new(request.correlation_id.clone(), outcome),
        ));
        Some(PublishOutcome {
            delivered,
            policy: Some(decision.clone()),
        })
    }

    fn broadcast(&self, message: &Message) -> usize {
        let message_type = message.message_type();
        // Snapshot so handlers run with no shard lock held.
        let handlers: Vec<Handler> = self
            .subscribers
            .get(&message_type)
            .map(|h| h.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler(message);
        }
        debug!(%message_type, delivered = handlers.len(), "published message");
        handlers.len()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::CorrelationId;
    use courier_core::messages::{AskUserResponse, ConfirmationDetails, ConfirmationKind, UpdatePolicy};
    use parking_lot::Mutex;

    fn recorder(bus: &MessageBus, ty: MessageType) -> (SubscriptionId, Arc<Mutex<Vec<Message>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = bus.subscribe(ty, move |m| sink.lock().push(m.clone()));
        (id, seen)
    }

    fn response(id: &str) -> Message {
        Message::AskUserResponse(AskUserResponse::answered(CorrelationId::from(id), ["v"]))
    }

    fn confirmation_request(tool: &str) -> Message {
        Message::ToolConfirmationRequest(ToolConfirmationRequest {
            correlation_id: CorrelationId::from("c1"),
            tool_name: tool.into(),
            details: ConfirmationDetails::new(ConfirmationKind::Exec, "Run", "ls"),
        })
    }

    #[test]
    fn publish_without_subscribers_delivers_nothing() {
        let bus = MessageBus::new();
        let outcome = bus.publish(response("x"));
        assert_eq!(outcome.delivered, 0);
        assert_eq!(bus.publish_count(), 1);
    }

    #[test]
    fn broadcast_reaches_every_subscriber_of_type() {
        let bus = MessageBus::new();
        let (_, a) = recorder(&bus, MessageType::AskUserResponse);
        let (_, b) = recorder(&bus, MessageType::AskUserResponse);
        let (_, other) = recorder(&bus, MessageType::AskUserRequest);

        let outcome = bus.publish(response("x"));
        assert_eq!(outcome.delivered, 2);
        assert_eq!(a.lock().len(), 1);
        assert_eq!(b.lock().len(), 1);
        assert!(other.lock().is_empty());
    }

    #[test]
    fn per_subscriber_order_is_fifo() {
        let bus = MessageBus::new();
        let (_, seen) = recorder(&bus, MessageType::AskUserResponse);
        for id in ["1", "2", "3"] {
            let _ = bus.publish(response(id));
        }
        let ids: Vec<String> = seen
            .lock()
            .iter()
            .filter_map(|m| m.correlation_id().map(ToString::to_string))
            .collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = MessageBus::new();
        let (id, seen) = recorder(&bus, MessageType::AskUserResponse);
        assert!(bus.unsubscribe(MessageType::AskUserResponse, id));
        assert!(!bus.unsubscribe(MessageType::AskUserResponse, id));
        let _ = bus.publish(response("x"));
        assert!(seen.lock().is_empty());
        assert_eq!(bus.subscriber_count(MessageType::AskUserResponse), 0);
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let bus = Arc::new(MessageBus::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicU64::new(0));

        let (bus2, slot2, hits2) = (Arc::clone(&bus), Arc::clone(&slot), Arc::clone(&hits));
        let id = bus.subscribe(MessageType::AskUserResponse, move |_| {
            let _ = hits2.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *slot2.lock() {
                let _ = bus2.unsubscribe(MessageType::AskUserResponse, id);
            }
        });
        *slot.lock() = Some(id);

        let _ = bus.publish(response("x"));
        let _ = bus.publish(response("y"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_allow_answers_without_broadcasting_request() {
        let bus = MessageBus::with_policy(Arc::new(crate::policy::SessionPolicy::allow_all()));
        let (_, requests) = recorder(&bus, MessageType::ToolConfirmationRequest);
        let (_, responses) = recorder(&bus, MessageType::ToolConfirmationResponse);

        let outcome = bus.publish(confirmation_request("shell"));
        assert_eq!(outcome.policy, Some(PolicyDecision::Allow));
        assert!(requests.lock().is_empty());
        let responses = responses.lock();
        let Some(Message::ToolConfirmationResponse(resp)) = responses.first() else {
            panic!("expected a confirmation response");
        };
        assert_eq!(resp.outcome, ToolConfirmationOutcome::ProceedOnce);
        assert!(resp.confirmed);
    }

    #[test]
    fn policy_deny_publishes_rejection() {
        let policy = crate::policy::SessionPolicy::new().deny_tool("shell", "shell disabled");
        let bus = MessageBus::with_policy(Arc::new(policy));
        let (_, rejections) = recorder(&bus, MessageType::ToolPolicyRejection);
        let (_, responses) = recorder(&bus, MessageType::ToolConfirmationResponse);

        let _ = bus.publish(confirmation_request("shell"));
        assert_eq!(rejections.lock().len(), 1);
        let responses = responses.lock();
        let Some(Message::ToolConfirmationResponse(resp)) = responses.first() else {
            panic!("expected a confirmation response");
        };
        assert!(!resp.confirmed);
    }

    #[test]
    fn update_policy_allows_tool_for_session() {
        let bus = MessageBus::with_policy(Arc::new(crate::policy::SessionPolicy::new()));
        let (_, requests) = recorder(&bus, MessageType::ToolConfirmationRequest);

        let first = bus.publish(confirmation_request("edit"));
        assert_eq!(first.policy, Some(PolicyDecision::AskUser));
        assert_eq!(requests.lock().len(), 1);

        let _ = bus.publish(Message::UpdatePolicy(UpdatePolicy {
            tool_name: "edit".into(),
        }));
        let second = bus.publish(confirmation_request("edit"));
        assert_eq!(second.policy, Some(PolicyDecision::Allow));
        assert_eq!(requests.lock().len(), 1);
    }
}
