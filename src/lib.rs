//! Rust client for Twitch EventSub over websockets.
//!
//! The crate is organized by concern:
//! - `eventsub`: session handle, websocket worker, protocol types and events.
//! - `api`: Helix subscription management client.
//! - `config`: endpoints, credentials, and tunable options.
//! - `retry`: reconnect backoff policy and timeout helper.

/// Helix subscription management client.
pub mod api;
/// Endpoints, credentials, and session options.
pub mod config;
/// EventSub session handle, protocol types, and events.
pub mod eventsub;
/// Reconnect backoff and timeout helpers.
pub mod retry;

pub use config::{Credentials, EventSubOptions};
pub use eventsub::{EventReceiver, EventSub, EventSubError, EventSubEvent};
