//! RAII subscriptions.
//!
//! A [`SubscriptionGuard`] unsubscribes exactly once: on the first explicit
//! [`release`](SubscriptionGuard::release) or on drop, whichever comes first.
//! A [`Subscription`] adds a channel so consumers can `recv().await`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use courier_core::{Message, MessageType};
use tokio::sync::mpsc;

use crate::bus::{MessageBus, SubscriptionId};

/// Owns one handler registration and removes it at most once.
pub struct SubscriptionGuard {
    bus: Arc<MessageBus>,
    message_type: MessageType,
    id: SubscriptionId,
    released: AtomicBool,
}

impl SubscriptionGuard {
    /// Subscription ID being guarded.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Message type being guarded.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Unsubscribe. Returns `true` only for the call that actually removed
    /// the handler.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.bus.unsubscribe(self.message_type, self.id)
    }

    /// Whether [`release`](Self::release) has run.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Channel-backed subscription to one message type.
pub struct Subscription {
    guard: SubscriptionGuard,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    /// Next message, or `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Next buffered message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving new messages. Idempotent.
    pub fn close(&self) {
        let _ = self.guard.release();
    }

    /// Message type this subscription receives.
    pub fn message_type(&self) -> MessageType {
        self.guard.message_type()
    }
}

impl MessageBus {
    /// Subscribe `handler` and return a guard that unsubscribes it.
    pub fn subscribe_guarded<F>(self: &Arc<Self>, message_type: MessageType, handler: F) -> SubscriptionGuard
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = self.subscribe(message_type, handler);
        SubscriptionGuard {
            bus: Arc::clone(self),
            message_type,
            id,
            released: AtomicBool::new(false),
        }
    }

    /// Subscribe to `message_type` through an unbounded channel.
    pub fn subscribe_channel(self: &Arc<Self>, message_type: MessageType) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = self.subscribe_guarded(message_type, move |message| {
            let _ = tx.send(message.clone());
        });
        Subscription { guard, rx }
    }
}
