//! EventSub session state machine.
//!
//! `SessionState` applies inbound frames synchronously, emits events in the
//! order they happen, and tells the worker what transport action (if any)
//! a frame requires. It owns the session fields, the keepalive deadline, the
//! reconnect bookkeeping, the subscription registry and the message history.
//! It never touches the network itself.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EventSubDefaults;
use crate::eventsub::events::{EventEmitter, EventSubEvent, Notification};
use crate::eventsub::history::MessageHistory;
use crate::eventsub::proto::{
    InboundMessage, Session, SessionMessage, Subscription, SubscriptionRequest,
    SubscriptionStatus,
};
use crate::retry::ReconnectPolicy;

/// Client-side view of the connection lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// Diagnostics snapshot of the session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub session: Option<Session>,
    /// Transport open and welcome received.
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub reconnect_url: Option<String>,
    pub keepalive_deadline: Option<Instant>,
    pub subscription_count: usize,
}

/// Transport action requested by an applied frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Directive {
    Continue,
    Welcomed { session_id: String },
    Migrate { url: String },
}

/// What to do after the transport was lost.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Recovery {
    Retry { delay: Duration, url: String },
    Exhausted,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    default_url: String,
    keepalive_buffer: Duration,
    policy: ReconnectPolicy,
    session: Option<Session>,
    keepalive_timeout: Option<Duration>,
    keepalive_deadline: Option<Instant>,
    reconnect_url: Option<String>,
    connecting: bool,
    recovering: bool,
    reconnect_attempts: u32,
    subscriptions: HashMap<String, Subscription>,
    /// Requests to recreate on the next welcomed session.
    deferred: Vec<SubscriptionRequest>,
    history: MessageHistory,
    events: EventEmitter,
}

impl SessionState {
    pub(crate) fn new(
        default_url: String,
        keepalive_buffer: Duration,
        policy: ReconnectPolicy,
        history_capacity: usize,
        events: EventEmitter,
    ) -> Self {
        Self {
            default_url,
            keepalive_buffer,
            policy,
            session: None,
            keepalive_timeout: None,
            keepalive_deadline: None,
            reconnect_url: None,
            connecting: false,
            recovering: false,
            reconnect_attempts: 0,
            subscriptions: HashMap::new(),
            deferred: Vec::new(),
            history: MessageHistory::new(history_capacity),
            events,
        }
    }

    pub(crate) fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.id.as_str())
    }

    pub(crate) fn is_connecting(&self) -> bool {
        self.connecting
    }

    pub(crate) fn keepalive_deadline(&self) -> Option<Instant> {
        self.keepalive_deadline
    }

    pub(crate) fn emitter(&self) -> &EventEmitter {
        &self.events
    }

    pub(crate) fn snapshot(&self, transport_open: bool, reconnect_scheduled: bool) -> SessionSnapshot {
        let connected = transport_open && self.session.is_some();
        let state = if connected {
            ConnectionState::Open
        } else if self.connecting && self.recovering {
            ConnectionState::Reconnecting
        } else if self.connecting {
            ConnectionState::Connecting
        } else if reconnect_scheduled {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Closed
        };

        SessionSnapshot {
            state,
            session: self.session.clone(),
            connected,
            reconnect_attempts: self.reconnect_attempts,
            reconnect_url: self.reconnect_url.clone(),
            keepalive_deadline: self.keepalive_deadline,
            subscription_count: self.subscriptions.len(),
        }
    }

    pub(crate) fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.values().cloned().collect()
    }

    pub(crate) fn history(&self) -> Vec<InboundMessage> {
        self.history.snapshot()
    }

    /// Target for the next automatic reconnect.
    pub(crate) fn reconnect_target(&self) -> String {
        self.reconnect_url
            .clone()
            .unwrap_or_else(|| self.default_url.clone())
    }

    pub(crate) fn begin_connect(&mut self) {
        self.connecting = true;
    }

    /// The transport failed before a welcome arrived for an explicit connect.
    pub(crate) fn abort_connect(&mut self) {
        self.connecting = false;
        self.recovering = false;
    }

    /// Applies one inbound text frame.
    pub(crate) fn apply_frame(&mut self, text: &str, now: Instant) -> Directive {
        let message = match InboundMessage::from_text(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(event = "eventsub_frame_parse_failed", error = %err);
                self.events
                    .error(format!("failed to parse message: {err}"));
                return Directive::Continue;
            }
        };

        // Any message proves liveness, whatever its kind.
        self.reset_keepalive(now);

        let directive = match message.classify() {
            Ok(kind) => self.dispatch(kind, now),
            Err(err) => {
                warn!(
                    event = "eventsub_frame_invalid",
                    message_id = %message.metadata.message_id,
                    error = %err
                );
                self.events.error(err.to_string());
                Directive::Continue
            }
        };

        self.history.push(message);
        directive
    }

    fn dispatch(&mut self, message: SessionMessage, now: Instant) -> Directive {
        match message {
            SessionMessage::Welcome(session) => {
                self.keepalive_timeout = session
                    .keepalive_timeout_seconds
                    .map(clamp_keepalive_timeout);
                self.reset_keepalive(now);
                self.connecting = false;
                self.recovering = false;
                self.reconnect_attempts = 0;

                let session_id = session.id.clone();
                info!(
                    event = "eventsub_session_welcome",
                    session_id = %session_id,
                    keepalive_timeout_seconds = ?session.keepalive_timeout_seconds
                );
                self.session = Some(session);
                self.events.emit(EventSubEvent::Connected {
                    session_id: session_id.clone(),
                });
                Directive::Welcomed { session_id }
            }
            SessionMessage::Keepalive => {
                debug!(event = "eventsub_keepalive");
                self.events.emit(EventSubEvent::Keepalive);
                Directive::Continue
            }
            SessionMessage::Notification {
                subscription_type,
                subscription_version,
                subscription,
                event,
            } => {
                debug!(
                    event = "eventsub_notification",
                    subscription_type = %subscription_type,
                    subscription_id = %subscription.id
                );
                self.events.emit(EventSubEvent::Notification(Notification {
                    subscription_type: subscription_type.clone(),
                    subscription_version,
                    event: event.clone(),
                    subscription,
                }));
                self.events.emit(EventSubEvent::Topic {
                    subscription_type,
                    event,
                });
                Directive::Continue
            }
            SessionMessage::Reconnect { reconnect_url } => {
                info!(event = "eventsub_reconnect_requested", url = %reconnect_url);
                self.reconnect_url = Some(reconnect_url.clone());
                Directive::Migrate { url: reconnect_url }
            }
            SessionMessage::Revocation(subscription) => {
                warn!(
                    event = "eventsub_revocation",
                    subscription_id = %subscription.id,
                    subscription_type = %subscription.subscription_type,
                    status = ?subscription.status
                );
                self.subscriptions.remove(&subscription.id);
                self.events
                    .emit(EventSubEvent::Revocation(subscription.clone()));
                match subscription.status {
                    SubscriptionStatus::AuthorizationRevoked => self
                        .events
                        .emit(EventSubEvent::AuthorizationRevoked(subscription)),
                    SubscriptionStatus::UserRemoved => {
                        self.events.emit(EventSubEvent::UserRemoved(subscription))
                    }
                    SubscriptionStatus::VersionRemoved => self
                        .events
                        .emit(EventSubEvent::VersionRemoved(subscription)),
                    _ => {}
                }
                Directive::Continue
            }
            SessionMessage::Unknown => {
                warn!(event = "eventsub_unknown_message_type");
                Directive::Continue
            }
        }
    }

    fn reset_keepalive(&mut self, now: Instant) {
        if let Some(timeout) = self.keepalive_timeout {
            self.keepalive_deadline = timeout
                .checked_add(self.keepalive_buffer)
                .and_then(|window| now.checked_add(window));
        }
    }

    fn clear_session(&mut self) {
        self.session = None;
        self.keepalive_timeout = None;
        self.keepalive_deadline = None;
    }

    /// Drops the current session ahead of a server-directed migration.
    pub(crate) fn begin_migration(&mut self) {
        self.clear_session();
        self.recovering = true;
    }

    /// Transport closed, errored, or went silent past the keepalive deadline.
    pub(crate) fn connection_lost(&mut self) -> Recovery {
        self.clear_session();
        self.connecting = false;
        self.events.emit(EventSubEvent::Disconnected);

        if self.policy.is_exhausted(self.reconnect_attempts) {
            warn!(
                event = "eventsub_max_reconnect_exceeded",
                attempts = self.reconnect_attempts
            );
            self.recovering = false;
            self.events.emit(EventSubEvent::MaxReconnectExceeded);
            return Recovery::Exhausted;
        }

        let delay = self.policy.delay_for_attempt(self.reconnect_attempts);
        self.reconnect_attempts += 1;
        self.recovering = true;
        let url = self.reconnect_target();
        info!(
            event = "eventsub_reconnect_scheduled",
            attempt = self.reconnect_attempts,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            url = %url
        );
        Recovery::Retry { delay, url }
    }

    /// Explicit teardown requested by the application.
    pub(crate) fn disconnect(&mut self, transport_was_open: bool) {
        self.clear_session();
        self.connecting = false;
        self.recovering = false;
        self.deferred.clear();
        if transport_was_open {
            self.events.emit(EventSubEvent::Disconnected);
        }
    }

    pub(crate) fn register(&mut self, subscription: Subscription) {
        self.subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        self.events
            .emit(EventSubEvent::SubscriptionCreated(subscription));
    }

    pub(crate) fn deregister(&mut self, id: String) {
        self.subscriptions.remove(&id);
        self.events.emit(EventSubEvent::SubscriptionDeleted { id });
    }

    /// Holds a request for the replay that follows the next welcome.
    pub(crate) fn defer_replay(&mut self, request: SubscriptionRequest) {
        self.deferred.push(request);
    }

    /// Empties the registry, returning what must be recreated on the new
    /// session.
    pub(crate) fn take_replay_set(&mut self) -> Vec<SubscriptionRequest> {
        let mut requests: Vec<SubscriptionRequest> = self
            .subscriptions
            .drain()
            .map(|(_, subscription)| subscription.to_request())
            .collect();
        requests.append(&mut self.deferred);
        requests
    }
}

/// Keeps a server-announced keepalive timeout inside the range EventSub
/// allows.
fn clamp_keepalive_timeout(seconds: u64) -> Duration {
    let min = u64::from(EventSubDefaults::MIN_KEEPALIVE_TIMEOUT_SECONDS);
    let max = u64::from(EventSubDefaults::MAX_KEEPALIVE_TIMEOUT_SECONDS);
    let clamped = seconds.clamp(min, max);
    if clamped != seconds {
        warn!(
            event = "eventsub_keepalive_timeout_clamped",
            announced = seconds,
            applied = clamped
        );
    }
    Duration::from_secs(clamped)
}
