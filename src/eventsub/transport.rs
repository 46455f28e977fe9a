//! Websocket transport seam.
//!
//! The session worker only needs to open a connection, pull text frames and
//! close it. [`WsTransport`] implements that over `tokio-tungstenite`; tests
//! substitute an in-memory transport.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::eventsub::client::EventSubError;

/// Opens message-oriented connections to the EventSub service.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, EventSubError>;
}

/// An open connection delivering inbound text frames.
#[async_trait]
pub trait Connection: Send {
    /// Next inbound text frame, or `None` once the connection is closed.
    ///
    /// Must be cancel-safe: the worker polls it inside `select!`.
    async fn next_frame(&mut self) -> Option<Result<String, EventSubError>>;

    async fn close(&mut self);
}

/// `tokio-tungstenite` backed transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, EventSubError> {
        let (socket, _) = connect_async(url).await?;
        debug!(event = "eventsub_ws_connected", url = %url);
        Ok(Box::new(WsConnection { socket }))
    }
}

struct WsConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn next_frame(&mut self) -> Option<Result<String, EventSubError>> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(err) = self.socket.send(Message::Pong(payload)).await {
                        return Some(Err(EventSubError::WebSocket(err)));
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(event = "eventsub_ws_close_frame", frame = ?frame);
                    return None;
                }
                Some(Err(err)) => return Some(Err(EventSubError::WebSocket(err))),
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }
}
