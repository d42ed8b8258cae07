//! Correlated request/response over the broadcast bus.
//!
//! The bus broadcasts by type, so a response handler sees replies to every
//! concurrent request of that type. [`MessageBus::request`] filters by
//! correlation ID, resolves at most once, and releases its subscription
//! before returning on every path.

use std::sync::Arc;

use courier_core::{Message, MessageType};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::MessageBus;
use crate::errors::{BusError, Result};

impl MessageBus {
    /// Publish `request` and wait for the `response_type` message echoing its
    /// correlation ID.
    ///
    /// Responses with any other correlation ID are ignored. If `cancel` fires
    /// first the call resolves with [`BusError::Cancelled`]; a response that
    /// arrives afterwards finds no subscriber. There is no built-in timeout.
    pub async fn request(
        self: &Arc<Self>,
        request: Message,
        response_type: MessageType,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        let Some(correlation_id) = request.correlation_id().cloned() else {
            return Err(BusError::MissingCorrelationId {
                message_type: request.message_type(),
            });
        };

        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let expected = correlation_id.clone();
        let guard = self.subscribe_guarded(response_type, move |message| {
            if message.correlation_id() != Some(&expected) {
                return;
            }
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(message.clone());
            }
        });

        let _ = self.publish(request);

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(BusError::Cancelled),
            response = rx => response.map_err(|_| BusError::Closed),
        };

        // Unsubscribe strictly before the caller sees the result.
        let _ = guard.release();
        debug!(%correlation_id, %response_type, ok = result.is_ok(), "correlated request settled");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use courier_core::CorrelationId;
    use courier_core::messages::{AskUserRequest, AskUserResponse, Question, UpdatePolicy};
    use std::time::Duration;

    fn ask(id: &str) -> Message {
        Message::AskUserRequest(AskUserRequest {
            correlation_id: CorrelationId::from(id),
            questions: vec![Question::text("value?", "VALUE")],
        })
    }

    fn answer(id: &str, value: &str) -> Message {
        Message::AskUserResponse(AskUserResponse::answered(CorrelationId::from(id), [value]))
    }

    async fn wait_for_subscriber(bus: &MessageBus, ty: MessageType) {
        while bus.subscriber_count(ty) == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn mismatched_correlation_does_not_resolve() {
        let bus = Arc::new(MessageBus::new());
        let cancel = CancellationToken::new();
        let task = {
            let bus = Arc::clone(&bus);
            let cancel = cancel.clone();
            tokio::spawn(async move { bus.request(ask("X"), MessageType::AskUserResponse, &cancel).await })
        };
        wait_for_subscriber(&bus, MessageType::AskUserResponse).await;

        let _ = bus.publish(answer("Y", "nope"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        let _ = bus.publish(answer("X", "v"));
        let result = task.await.unwrap();
        let Ok(Message::AskUserResponse(resp)) = result else {
            panic!("expected a response, got {result:?}");
        };
        assert_eq!(resp.answer(0), Some("v"));
        assert_eq!(bus.subscriber_count(MessageType::AskUserResponse), 0);
    }

    #[tokio::test]
    async fn duplicate_responses_resolve_once() {
        let bus = Arc::new(MessageBus::new());
        let cancel = CancellationToken::new();
        let task = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.request(ask("X"), MessageType::AskUserResponse, &cancel).await })
        };
        wait_for_subscriber(&bus, MessageType::AskUserResponse).await;

        let _ = bus.publish(answer("X", "first"));
        let _ = bus.publish(answer("X", "second"));
        let Ok(Message::AskUserResponse(resp)) = task.await.unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(resp.answer(0), Some("first"));
    }

    #[tokio::test]
    async fn cancel_then_late_response() {
        let bus = Arc::new(MessageBus::new());
        let cancel = CancellationToken::new();
        let task = {
            let bus = Arc::clone(&bus);
            let cancel = cancel.clone();
            tokio::spawn(async move { bus.request(ask("X"), MessageType::AskUserResponse, &cancel).await })
        };
        wait_for_subscriber(&bus, MessageType::AskUserResponse).await;

        cancel.cancel();
        assert_matches!(task.await.unwrap(), Err(BusError::Cancelled));

        let late = bus.publish(answer("X", "too late"));
        assert_eq!(late.delivered, 0);
    }

    #[tokio::test]
    async fn already_cancelled_token_resolves_immediately() {
        let bus = Arc::new(MessageBus::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = bus.request(ask("X"), MessageType::AskUserResponse, &cancel).await;
        assert_matches!(result, Err(BusError::Cancelled));
        assert_eq!(bus.subscriber_count(MessageType::AskUserResponse), 0);
    }

    #[tokio::test]
    async fn request_without_correlation_id_is_rejected() {
        let bus = Arc::new(MessageBus::new());
        let msg = Message::UpdatePolicy(UpdatePolicy {
            tool_name: "t".into(),
        });
        let result = bus
            .request(msg, MessageType::AskUserResponse, &CancellationToken::new())
            .await;
        assert_matches!(result, Err(BusError::MissingCorrelationId { .. }));
    }

    #[tokio::test]
    async fn responder_subscribed_to_requests_round_trips() {
        let bus = Arc::new(MessageBus::new());
        let responder = Arc::clone(&bus);
        let _guard = bus.subscribe_guarded(MessageType::AskUserRequest, move |message| {
            if let Message::AskUserRequest(req) = message {
                let _ = responder.publish(Message::AskUserResponse(AskUserResponse::answered(
                    req.correlation_id.clone(),
                    ["auto"],
                )));
            }
        });

        let result = bus
            .request(ask("Z"), MessageType::AskUserResponse, &CancellationToken::new())
            .await;
        let Ok(Message::AskUserResponse(resp)) = result else {
            panic!("expected a response");
        };
        assert_eq!(resp.answer(0), Some("auto"));
    }
}
