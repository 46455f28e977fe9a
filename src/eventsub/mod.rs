//! EventSub websocket session modules.
//!
//! - `client`: the session handle and the worker task that owns the socket.
//! - `events`: typed events delivered to the application.
//! - `proto`: wire messages and subscription types.
//! - `session`: sans-IO session state, keepalive and backoff bookkeeping.
//! - `transport`: websocket connection seam.

/// Session handle, worker task, and error type.
pub mod client;
/// Events emitted to the application.
pub mod events;
mod history;
/// EventSub message and subscription types.
pub mod proto;
/// Session state driven by inbound frames and connection loss.
pub mod session;
#[cfg(test)]
pub(crate) mod testing;
/// Websocket transport abstraction.
pub mod transport;

pub use client::{EventSub, EventSubError};
pub use events::{EventReceiver, EventSubEvent, Notification};
