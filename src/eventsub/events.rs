use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::eventsub::proto::Subscription;

/// Receiver half handed to the embedding application.
pub type EventReceiver = mpsc::UnboundedReceiver<EventSubEvent>;

/// Payload of the generic notification event.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub subscription_type: String,
    pub subscription_version: Option<String>,
    pub event: Value,
    pub subscription: Subscription,
}

/// Session lifecycle and notification events, in emission order.
#[derive(Clone, Debug, PartialEq)]
pub enum EventSubEvent {
    /// A `session_welcome` was received.
    Connected { session_id: String },
    Disconnected,
    /// Non-fatal failure: bad frame, transport error, failed resubscribe.
    Error { message: String },
    Keepalive,
    Notification(Notification),
    /// Topic-specific twin of [`EventSubEvent::Notification`], fired right
    /// after it.
    Topic {
        subscription_type: String,
        event: Value,
    },
    SubscriptionCreated(Subscription),
    SubscriptionDeleted { id: String },
    Revocation(Subscription),
    AuthorizationRevoked(Subscription),
    UserRemoved(Subscription),
    VersionRemoved(Subscription),
    MaxReconnectExceeded,
}

impl EventSubEvent {
    /// Event name; topic events are named after their subscription type.
    pub fn name(&self) -> &str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected => "disconnected",
            Self::Error { .. } => "error",
            Self::Keepalive => "keepalive",
            Self::Notification(_) => "notification",
            Self::Topic {
                subscription_type, ..
            } => subscription_type,
            Self::SubscriptionCreated(_) => "subscription_created",
            Self::SubscriptionDeleted { .. } => "subscription_deleted",
            Self::Revocation(_) => "revocation",
            Self::AuthorizationRevoked(_) => "authorization_revoked",
            Self::UserRemoved(_) => "user_removed",
            Self::VersionRemoved(_) => "version_removed",
            Self::MaxReconnectExceeded => "max_reconnect_exceeded",
        }
    }
}

/// Sending half owned by the session state.
#[derive(Clone, Debug)]
pub(crate) struct EventEmitter {
    tx: mpsc::UnboundedSender<EventSubEvent>,
}

impl EventEmitter {
    pub(crate) fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn emit(&self, event: EventSubEvent) {
        trace!(event = "eventsub_emit", name = event.name());
        // Nobody listening is fine; the session keeps running.
        let _ = self.tx.send(event);
    }

    pub(crate) fn error(&self, message: impl Into<String>) {
        self.emit(EventSubEvent::Error {
            message: message.into(),
        });
    }
}
