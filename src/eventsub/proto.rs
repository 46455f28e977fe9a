use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::eventsub::client::EventSubError;

/// Well-known subscription types.
pub mod topics {
    pub const CHANNEL_CHEER: &str = "channel.cheer";
    pub const CHANNEL_CHAT_MESSAGE: &str = "channel.chat.message";
    pub const CHANNEL_CHAT_NOTIFICATION: &str = "channel.chat.notification";
    pub const CHANNEL_POINTS_CUSTOM_REWARD_REDEMPTION_ADD: &str =
        "channel.channel_points_custom_reward_redemption.add";
    pub const CHANNEL_POINTS_AUTOMATIC_REWARD_REDEMPTION_ADD: &str =
        "channel.channel_points_automatic_reward_redemption.add";
    pub const CHANNEL_SUBSCRIBE: &str = "channel.subscribe";
    pub const CHANNEL_SUBSCRIPTION_END: &str = "channel.subscription.end";
    pub const CHANNEL_SUBSCRIPTION_GIFT: &str = "channel.subscription.gift";
    pub const CHANNEL_SUBSCRIPTION_MESSAGE: &str = "channel.subscription.message";
    pub const AUTOMOD_MESSAGE_HOLD: &str = "automod.message.hold";
    pub const AUTOMOD_MESSAGE_UPDATE: &str = "automod.message.update";
    pub const CHANNEL_MODERATE: &str = "channel.moderate";
    pub const CHANNEL_SUSPICIOUS_USER_UPDATE: &str = "channel.suspicious_user.update";
    pub const CHANNEL_SUSPICIOUS_USER_MESSAGE: &str = "channel.suspicious_user.message";
    pub const CHANNEL_CHAT_USER_MESSAGE_HOLD: &str = "channel.chat.user_message_hold";
    pub const WHISPER_RECEIVED: &str = "user.whisper.message";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    SessionWelcome,
    SessionKeepalive,
    Notification,
    SessionReconnect,
    Revocation,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageMetadata {
    pub message_id: String,
    pub message_type: MessageType,
    pub message_timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Value>,
}

/// Raw inbound websocket message as delivered by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    pub metadata: MessageMetadata,
    #[serde(default)]
    pub payload: MessagePayload,
}

/// Inbound message classified by kind, with the parts each kind requires.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    Welcome(Session),
    Keepalive,
    Notification {
        subscription_type: String,
        subscription_version: Option<String>,
        subscription: Subscription,
        event: Value,
    },
    Reconnect {
        reconnect_url: String,
    },
    Revocation(Subscription),
    Unknown,
}

impl InboundMessage {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Extracts the kind-specific parts, rejecting messages that are missing
    /// the payload their kind requires.
    pub fn classify(&self) -> Result<SessionMessage, EventSubError> {
        let payload = &self.payload;
        match self.metadata.message_type {
            MessageType::SessionWelcome => payload
                .session
                .clone()
                .map(SessionMessage::Welcome)
                .ok_or_else(|| missing("session_welcome", "payload.session")),
            MessageType::SessionKeepalive => Ok(SessionMessage::Keepalive),
            MessageType::Notification => {
                let subscription = payload
                    .subscription
                    .clone()
                    .ok_or_else(|| missing("notification", "payload.subscription"))?;
                let subscription_type = self
                    .metadata
                    .subscription_type
                    .clone()
                    .unwrap_or_else(|| subscription.subscription_type.clone());
                let subscription_version = self
                    .metadata
                    .subscription_version
                    .clone()
                    .or_else(|| Some(subscription.version.clone()));
                Ok(SessionMessage::Notification {
                    subscription_type,
                    subscription_version,
                    subscription,
                    event: payload.event.clone().unwrap_or(Value::Null),
                })
            }
            MessageType::SessionReconnect => payload
                .session
                .as_ref()
                .and_then(|session| session.reconnect_url.clone())
                .map(|reconnect_url| SessionMessage::Reconnect { reconnect_url })
                .ok_or_else(|| missing("session_reconnect", "payload.session.reconnect_url")),
            MessageType::Revocation => payload
                .subscription
                .clone()
                .map(SessionMessage::Revocation)
                .ok_or_else(|| missing("revocation", "payload.subscription")),
            MessageType::Unknown => Ok(SessionMessage::Unknown),
        }
    }
}

fn missing(kind: &str, field: &str) -> EventSubError {
    EventSubError::Protocol(format!("{kind} message is missing {field}"))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServerSessionStatus {
    Connected,
    Enabled,
    Reconnecting,
    #[serde(other)]
    Unknown,
}

/// Session handle assigned by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub status: ServerSessionStatus,
    #[serde(default)]
    pub connected_at: String,
    /// Null in `session_reconnect` messages.
    #[serde(default)]
    pub keepalive_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub reconnect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Enabled,
    WebhookCallbackVerificationPending,
    WebhookCallbackVerificationFailed,
    NotificationFailuresExceeded,
    AuthorizationRevoked,
    ModeratorRemoved,
    UserRemoved,
    VersionRemoved,
    BetaMaintenance,
    WebsocketDisconnected,
    WebsocketFailedPingPong,
    WebsocketReceivedInboundTraffic,
    WebsocketConnectionUnused,
    WebsocketInternalError,
    WebsocketNetworkTimeout,
    WebsocketNetworkError,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportMethod {
    #[default]
    Websocket,
    Webhook,
    Conduit,
}

/// Delivery binding of a subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportBinding {
    pub method: TransportMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<String>,
}

impl TransportBinding {
    pub fn websocket(session_id: impl Into<String>) -> Self {
        Self {
            method: TransportMethod::Websocket,
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: String,
    pub status: SubscriptionStatus,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub version: String,
    #[serde(default)]
    pub cost: u64,
    #[serde(default)]
    pub condition: BTreeMap<String, String>,
    #[serde(default)]
    pub transport: TransportBinding,
    #[serde(default)]
    pub created_at: String,
}

impl Subscription {
    /// The (type, version, condition) tuple needed to recreate this
    /// subscription on another session.
    pub fn to_request(&self) -> SubscriptionRequest {
        SubscriptionRequest {
            subscription_type: self.subscription_type.clone(),
            version: self.version.clone(),
            condition: self.condition.clone(),
        }
    }
}

/// Topic subscription as requested by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub subscription_type: String,
    pub version: String,
    pub condition: BTreeMap<String, String>,
}

impl SubscriptionRequest {
    pub fn new(subscription_type: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            subscription_type: subscription_type.into(),
            version: version.into(),
            condition: BTreeMap::new(),
        }
    }

    pub fn with_condition(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.condition.insert(key.into(), value.into());
        self
    }

    /// Attaches the websocket session the subscription should deliver to.
    pub fn bind(&self, session_id: &str) -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            subscription_type: self.subscription_type.clone(),
            version: self.version.clone(),
            condition: self.condition.clone(),
            transport: TransportBinding::websocket(session_id),
        }
    }
}

/// Body of the Helix create-subscription call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSubscriptionRequest {
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub version: String,
    pub condition: BTreeMap<String, String>,
    pub transport: TransportBinding,
}
