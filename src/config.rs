//! Credentials and tunables shared by the websocket session and Helix client.

use std::time::Duration;

use secrecy::SecretString;

use crate::eventsub::client::EventSubError;
use crate::retry::ReconnectPolicy;

/// Production EventSub websocket endpoint.
pub const EVENTSUB_WS_ENDPOINT: &str = "wss://eventsub.wss.twitch.tv/ws";
/// Production Helix subscription management endpoint.
pub const HELIX_SUBSCRIPTIONS_ENDPOINT: &str = "https://api.twitch.tv/helix/eventsub/subscriptions";
/// Websocket endpoint of the Twitch CLI mock EventSub server.
pub const LOCAL_EVENTSUB_WS_ENDPOINT: &str = "ws://127.0.0.1:8080/ws";
/// Subscription endpoint of the Twitch CLI mock EventSub server.
pub const LOCAL_HELIX_SUBSCRIPTIONS_ENDPOINT: &str = "http://127.0.0.1:8080/eventsub/subscriptions";

const CLIENT_ID_ENV: &str = "TWITCH_CLIENT_ID";
const ACCESS_TOKEN_ENV: &str = "TWITCH_ACCESS_TOKEN";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EventSubDefaults;

impl EventSubDefaults {
    pub const KEEPALIVE_BUFFER: Duration = Duration::from_secs(10);
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
    pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
    pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
    pub const HISTORY_CAPACITY: usize = 100;
    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
    pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const MIN_KEEPALIVE_TIMEOUT_SECONDS: u32 = 10;
    pub const MAX_KEEPALIVE_TIMEOUT_SECONDS: u32 = 600;
}

/// Credentials attached to every Helix request.
///
/// Obtaining and refreshing the token is the embedding application's job.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub client_id: String,
    pub access_token: SecretString,
}

impl Credentials {
    /// Creates credentials from an app client id and a user access token.
    pub fn new(client_id: impl Into<String>, access_token: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            access_token,
        }
    }

    /// Reads `TWITCH_CLIENT_ID` and `TWITCH_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self, EventSubError> {
        let client_id = read_env(CLIENT_ID_ENV)?;
        let access_token = read_env(ACCESS_TOKEN_ENV)?;
        Ok(Self::new(client_id, SecretString::new(access_token)))
    }
}

fn read_env(name: &str) -> Result<String, EventSubError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(EventSubError::Config(format!("{name} is not set"))),
    }
}

/// Session manager options.
#[derive(Clone, Debug)]
pub struct EventSubOptions {
    /// Slack added on top of the server keepalive timeout before the session
    /// is declared dead.
    pub keepalive_buffer: Duration,
    /// Backoff applied to automatic reconnects.
    pub reconnect: ReconnectPolicy,
    /// Number of inbound messages retained for diagnostics. `0` disables
    /// retention.
    pub history_capacity: usize,
    /// Upper bound on a single websocket handshake.
    pub handshake_timeout: Duration,
    pub http_connect_timeout: Duration,
    pub http_request_timeout: Duration,
    /// Keepalive timeout requested from the server, if any.
    pub keepalive_timeout_seconds: Option<u32>,
    /// Replay the subscription set after a backoff reconnect, not only after
    /// a server-directed migration.
    pub resubscribe_on_recover: bool,
    local: bool,
    ws_endpoint_override: Option<String>,
    api_endpoint_override: Option<String>,
}

impl Default for EventSubOptions {
    fn default() -> Self {
        Self {
            keepalive_buffer: EventSubDefaults::KEEPALIVE_BUFFER,
            reconnect: ReconnectPolicy {
                max_attempts: EventSubDefaults::MAX_RECONNECT_ATTEMPTS,
                base_delay: EventSubDefaults::RECONNECT_BASE_DELAY,
                max_delay: EventSubDefaults::RECONNECT_MAX_DELAY,
            },
            history_capacity: EventSubDefaults::HISTORY_CAPACITY,
            handshake_timeout: EventSubDefaults::HANDSHAKE_TIMEOUT,
            http_connect_timeout: EventSubDefaults::HTTP_CONNECT_TIMEOUT,
            http_request_timeout: EventSubDefaults::HTTP_REQUEST_TIMEOUT,
            keepalive_timeout_seconds: None,
            resubscribe_on_recover: true,
            local: false,
            ws_endpoint_override: None,
            api_endpoint_override: None,
        }
    }
}

impl EventSubOptions {
    /// Routes both endpoints to the Twitch CLI mock server.
    pub fn with_local_mode(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Sets an explicit websocket endpoint.
    ///
    /// The override takes precedence over local mode when set.
    pub fn with_ws_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.ws_endpoint_override = Some(endpoint.into().trim().to_string());
        self
    }

    /// Sets an explicit subscription management endpoint.
    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint_override = Some(endpoint.into().trim().to_string());
        self
    }

    /// Replaces the automatic reconnect backoff policy.
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets how many inbound messages the history retains.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Requests a keepalive timeout from the server (10 to 600 seconds).
    pub fn with_keepalive_timeout_seconds(mut self, seconds: u32) -> Self {
        self.keepalive_timeout_seconds = Some(seconds);
        self
    }

    /// Default websocket URL, including the requested keepalive timeout.
    pub fn ws_url(&self) -> String {
        let base = match self.ws_endpoint_override.as_deref() {
            Some(endpoint) => endpoint,
            None if self.local => LOCAL_EVENTSUB_WS_ENDPOINT,
            None => EVENTSUB_WS_ENDPOINT,
        };
        match self.keepalive_timeout_seconds {
            Some(seconds) => {
                let separator = if base.contains('?') { '&' } else { '?' };
                format!("{base}{separator}keepalive_timeout_seconds={seconds}")
            }
            None => base.to_string(),
        }
    }

    /// Subscription management URL, honoring override and local mode.
    pub fn api_url(&self) -> &str {
        match self.api_endpoint_override.as_deref() {
            Some(endpoint) => endpoint,
            None if self.local => LOCAL_HELIX_SUBSCRIPTIONS_ENDPOINT,
            None => HELIX_SUBSCRIPTIONS_ENDPOINT,
        }
    }

    /// Rejects out-of-range keepalive, backoff and timeout values.
    pub fn validate(&self) -> Result<(), EventSubError> {
        if let Some(seconds) = self.keepalive_timeout_seconds {
            let range = EventSubDefaults::MIN_KEEPALIVE_TIMEOUT_SECONDS
                ..=EventSubDefaults::MAX_KEEPALIVE_TIMEOUT_SECONDS;
            if !range.contains(&seconds) {
                return Err(EventSubError::Config(format!(
                    "keepalive_timeout_seconds must be within {}..={}, got {seconds}",
                    range.start(),
                    range.end()
                )));
            }
        }
        if self.reconnect.base_delay.is_zero() {
            return Err(EventSubError::Config(
                "reconnect.base_delay must be > 0".to_string(),
            ));
        }
        if self.reconnect.max_delay < self.reconnect.base_delay {
            return Err(EventSubError::Config(
                "reconnect.max_delay must be >= reconnect.base_delay".to_string(),
            ));
        }
        if self.handshake_timeout.is_zero() {
            return Err(EventSubError::Config(
                "handshake_timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
