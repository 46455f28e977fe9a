//! EventSub session handle and its background worker.
//!
//! [`EventSub`] is a cheap, cloneable handle. A single worker task owns the
//! websocket, the [`SessionState`] and every timer; handle methods talk to it
//! over a command queue, so session fields and the subscription registry
//! have exactly one mutator. Helix calls run on the caller's task and post
//! their results back to the worker.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{info, warn};

use crate::api::{ApiError, HelixClient, SubscriptionApi};
use crate::config::{Credentials, EventSubOptions};
use crate::eventsub::events::{EventEmitter, EventReceiver};
use crate::eventsub::proto::{InboundMessage, Subscription, SubscriptionRequest};
use crate::eventsub::session::{Directive, Recovery, SessionSnapshot, SessionState};
use crate::eventsub::transport::{Connection, Transport, WsTransport};
use crate::retry::with_timeout;

/// Errors produced by the session manager.
#[derive(Debug, Error)]
pub enum EventSubError {
    /// Operation needs a welcomed session.
    #[error("websocket not connected; call connect() first")]
    NotConnected,

    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Subscription management call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Inbound message violated the EventSub message contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("websocket handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("connection closed before session_welcome")]
    ClosedBeforeWelcome,

    /// `disconnect()` was called while a connect was pending.
    #[error("session disconnected")]
    Disconnected,

    #[error("session worker stopped")]
    WorkerStopped,

    #[error("invalid configuration: {0}")]
    Config(String),
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Connect {
        url: String,
        reply: Reply<Result<(), EventSubError>>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    /// A subscription created for `session_id`.
    Register {
        session_id: String,
        subscription: Subscription,
    },
    Deregister(String),
    ResubscribeFailed {
        subscription_type: String,
        message: String,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
    Subscriptions {
        reply: Reply<Vec<Subscription>>,
    },
    History {
        reply: Reply<Vec<InboundMessage>>,
    },
}

/// Handle to one logical EventSub session.
#[derive(Clone)]
pub struct EventSub {
    commands: mpsc::UnboundedSender<Command>,
    api: Arc<dyn SubscriptionApi>,
    default_url: String,
}

impl EventSub {
    /// Builds a manager backed by the real websocket transport and Helix
    /// client.
    ///
    /// Spawns the session worker, so this must run inside a Tokio runtime.
    pub fn new(
        credentials: Credentials,
        options: EventSubOptions,
    ) -> Result<(Self, EventReceiver), EventSubError> {
        options.validate()?;
        let api = HelixClient::new(credentials, &options)?;
        Ok(Self::with_collaborators(
            options,
            Arc::new(WsTransport),
            Arc::new(api),
        ))
    }

    /// Builds a manager over caller-supplied collaborators.
    pub fn with_collaborators(
        options: EventSubOptions,
        transport: Arc<dyn Transport>,
        api: Arc<dyn SubscriptionApi>,
    ) -> (Self, EventReceiver) {
        let (emitter, events) = EventEmitter::channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let default_url = options.ws_url();

        let state = SessionState::new(
            default_url.clone(),
            options.keepalive_buffer,
            options.reconnect.clone(),
            options.history_capacity,
            emitter,
        );
        let worker = SessionWorker {
            state,
            transport,
            api: Arc::clone(&api),
            commands: commands_tx.downgrade(),
            handshake_timeout: options.handshake_timeout,
            resubscribe_on_recover: options.resubscribe_on_recover,
            connection: None,
            handshake: None,
            pending_connect: None,
            reconnect_at: None,
            replay_pending: false,
            replays: Vec::new(),
        };
        tokio::spawn(worker.run(commands_rx));

        (
            Self {
                commands: commands_tx,
                api,
                default_url,
            },
            events,
        )
    }

    /// Connects to the configured EventSub endpoint.
    pub async fn connect(&self) -> Result<(), EventSubError> {
        self.connect_to(self.default_url.clone()).await
    }

    /// Connects to `url` and waits for the session welcome.
    ///
    /// Returns immediately when a connect is already in flight or the
    /// transport is already open.
    pub async fn connect_to(&self, url: impl Into<String>) -> Result<(), EventSubError> {
        let url = url.into();
        self.request(|reply| Command::Connect { url, reply }).await?
    }

    /// Creates a subscription bound to the current session.
    ///
    /// If the session is replaced while the call is in flight, the worker
    /// recreates the subscription on the new session.
    pub async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<Subscription, EventSubError> {
        let session_id = self.session_id().await.ok_or(EventSubError::NotConnected)?;
        let subscription = self
            .api
            .create_subscription(&request.bind(&session_id))
            .await?;
        info!(
            event = "eventsub_subscribed",
            subscription_id = %subscription.id,
            subscription_type = %subscription.subscription_type
        );
        self.send(Command::Register {
            session_id,
            subscription: subscription.clone(),
        })?;
        Ok(subscription)
    }

    /// Deletes a subscription; unknown ids succeed.
    pub async fn unsubscribe(&self, id: &str) -> Result<(), EventSubError> {
        self.api.delete_subscription(id).await?;
        self.send(Command::Deregister(id.to_string()))
    }

    /// Lists subscriptions from the management API without touching the
    /// local registry.
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>, EventSubError> {
        Ok(self.api.list_subscriptions().await?)
    }

    /// Closes the session and cancels any scheduled reconnect.
    ///
    /// The handle stays usable for a later `connect`.
    pub async fn disconnect(&self) {
        let _ = self.request(|reply| Command::Disconnect { reply }).await;
    }

    /// `true` once the transport is open and a welcome has been received.
    pub async fn is_connected(&self) -> bool {
        self.snapshot()
            .await
            .map(|snapshot| snapshot.connected)
            .unwrap_or(false)
    }

    /// Id from the latest `session_welcome`, cleared when the session ends.
    pub async fn session_id(&self) -> Option<String> {
        self.snapshot()
            .await
            .ok()
            .and_then(|snapshot| snapshot.session)
            .map(|session| session.id)
    }

    /// Connection state, session and reconnect bookkeeping for diagnostics.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, EventSubError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Locally registered subscriptions.
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.request(|reply| Command::Subscriptions { reply })
            .await
            .unwrap_or_default()
    }

    /// Most recent inbound messages, oldest first.
    pub async fn message_history(&self) -> Vec<InboundMessage> {
        self.request(|reply| Command::History { reply })
            .await
            .unwrap_or_default()
    }

    fn send(&self, command: Command) -> Result<(), EventSubError> {
        self.commands
            .send(command)
            .map_err(|_| EventSubError::WorkerStopped)
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, EventSubError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| EventSubError::WorkerStopped)
    }
}

type HandshakeOutcome = (String, Result<Box<dyn Connection>, EventSubError>);
type Handshake = Pin<Box<dyn Future<Output = HandshakeOutcome> + Send>>;

struct SessionWorker {
    state: SessionState,
    transport: Arc<dyn Transport>,
    api: Arc<dyn SubscriptionApi>,
    commands: mpsc::WeakUnboundedSender<Command>,
    handshake_timeout: Duration,
    resubscribe_on_recover: bool,
    connection: Option<Box<dyn Connection>>,
    /// In-flight websocket handshake, polled alongside commands.
    handshake: Option<Handshake>,
    pending_connect: Option<Reply<Result<(), EventSubError>>>,
    /// Scheduled automatic reconnect. Clearing it cancels the attempt.
    reconnect_at: Option<(Instant, String)>,
    replay_pending: bool,
    replays: Vec<JoinHandle<()>>,
}

impl SessionWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let keepalive_deadline = self.state.keepalive_deadline();
            let reconnect_deadline = self.reconnect_at.as_ref().map(|(at, _)| *at);

            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                (url, result) = handshake(&mut self.handshake) => {
                    self.handshake_finished(url, result);
                }
                frame = next_frame(&mut self.connection) => self.handle_frame(frame).await,
                _ = sleep_until(keepalive_deadline) => self.handle_keepalive_expired().await,
                _ = sleep_until(reconnect_deadline) => self.handle_reconnect_due(),
            }
        }

        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { url, reply } => {
                if self.state.is_connecting() || self.connection.is_some() {
                    let _ = reply.send(Ok(()));
                    return;
                }
                self.reconnect_at = None;
                self.pending_connect = Some(reply);
                self.start_handshake(url);
            }
            Command::Disconnect { reply } => {
                self.reconnect_at = None;
                self.replay_pending = false;
                self.handshake = None;
                for replay in self.replays.drain(..) {
                    replay.abort();
                }
                let transport_was_open = match self.connection.take() {
                    Some(mut connection) => {
                        connection.close().await;
                        true
                    }
                    None => false,
                };
                if let Some(pending) = self.pending_connect.take() {
                    let _ = pending.send(Err(EventSubError::Disconnected));
                }
                self.state.disconnect(transport_was_open);
                info!(event = "eventsub_disconnected");
                let _ = reply.send(());
            }
            Command::Register {
                session_id,
                subscription,
            } => self.register(session_id, subscription),
            Command::Deregister(id) => self.state.deregister(id),
            Command::ResubscribeFailed {
                subscription_type,
                message,
            } => self.state.emitter().error(format!(
                "failed to resubscribe to {subscription_type}: {message}"
            )),
            Command::Snapshot { reply } => {
                let _ = reply.send(
                    self.state
                        .snapshot(self.connection.is_some(), self.reconnect_at.is_some()),
                );
            }
            Command::Subscriptions { reply } => {
                let _ = reply.send(self.state.subscriptions());
            }
            Command::History { reply } => {
                let _ = reply.send(self.state.history());
            }
        }
    }

    async fn handle_frame(&mut self, frame: Option<Result<String, EventSubError>>) {
        match frame {
            Some(Ok(text)) => match self.state.apply_frame(&text, Instant::now()) {
                Directive::Continue => {}
                Directive::Welcomed { session_id } => self.on_welcome(session_id),
                Directive::Migrate { url } => self.migrate(url).await,
            },
            Some(Err(err)) => {
                warn!(event = "eventsub_transport_error", error = %err);
                self.state.emitter().error(err.to_string());
                self.connection_closed();
            }
            None => {
                info!(event = "eventsub_transport_closed");
                self.connection_closed();
            }
        }
    }

    async fn handle_keepalive_expired(&mut self) {
        warn!(event = "eventsub_keepalive_timeout");
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.connection_closed();
    }

    fn handle_reconnect_due(&mut self) {
        let Some((_, url)) = self.reconnect_at.take() else {
            return;
        };
        info!(event = "eventsub_reconnect_attempt", url = %url);
        self.start_handshake(url);
    }

    fn start_handshake(&mut self, url: String) {
        self.state.begin_connect();
        let transport = Arc::clone(&self.transport);
        let timeout = self.handshake_timeout;
        self.handshake = Some(Box::pin(async move {
            let result = match with_timeout(timeout, transport.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(EventSubError::HandshakeTimeout(timeout)),
            };
            (url, result)
        }));
    }

    fn handshake_finished(
        &mut self,
        url: String,
        result: Result<Box<dyn Connection>, EventSubError>,
    ) {
        self.handshake = None;
        let err = match result {
            Ok(connection) => {
                self.connection = Some(connection);
                return;
            }
            Err(err) => err,
        };

        warn!(event = "eventsub_connect_failed", url = %url, error = %err);
        self.state.emitter().error(err.to_string());
        match self.pending_connect.take() {
            Some(pending) => {
                self.state.abort_connect();
                let _ = pending.send(Err(err));
            }
            // Automatic reconnects and migrations count the failure as an
            // attempt.
            None => self.recover(),
        }
    }

    fn connection_closed(&mut self) {
        self.connection = None;
        if let Some(pending) = self.pending_connect.take() {
            // The caller is still waiting on connect(); it decides whether to
            // retry.
            self.state.abort_connect();
            let _ = pending.send(Err(EventSubError::ClosedBeforeWelcome));
            return;
        }
        self.recover();
    }

    fn recover(&mut self) {
        if self.resubscribe_on_recover {
            self.replay_pending = true;
        }
        self.reconnect_at = match self.state.connection_lost() {
            Recovery::Retry { delay, url } => Some((Instant::now() + delay, url)),
            Recovery::Exhausted => None,
        };
    }

    fn on_welcome(&mut self, session_id: String) {
        if let Some(pending) = self.pending_connect.take() {
            let _ = pending.send(Ok(()));
        }
        if self.replay_pending {
            self.replay_pending = false;
            let requests = self.state.take_replay_set();
            self.spawn_replay(session_id, requests);
        }
    }

    async fn migrate(&mut self, url: String) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.state.begin_migration();
        self.replay_pending = true;
        self.start_handshake(url);
    }

    /// Registers a subscription created for `bound_session`.
    ///
    /// A subscription created for a session that has since been replaced
    /// would never deliver, so it is recreated on the current session, or
    /// held for the replay that follows the next welcome.
    fn register(&mut self, bound_session: String, subscription: Subscription) {
        let current = self.state.session_id().map(str::to_owned);
        if current.as_deref() == Some(bound_session.as_str()) {
            self.state.register(subscription);
            return;
        }

        warn!(
            event = "eventsub_subscription_session_stale",
            subscription_id = %subscription.id,
            bound_session = %bound_session,
            current_session = ?current
        );
        let request = subscription.to_request();
        match current {
            Some(session_id) => self.spawn_replay(session_id, vec![request]),
            None if self.replay_pending => self.state.defer_replay(request),
            None => self.state.emitter().error(format!(
                "subscription {} was created for closed session {bound_session}",
                subscription.id
            )),
        }
    }

    /// Recreates `requests` on the new session, one at a time. Failures are
    /// reported and do not stop the remaining requests.
    fn spawn_replay(&mut self, session_id: String, requests: Vec<SubscriptionRequest>) {
        if requests.is_empty() {
            return;
        }
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let api = Arc::clone(&self.api);
        info!(
            event = "eventsub_resubscribe_started",
            session_id = %session_id,
            count = requests.len()
        );

        self.replays.retain(|replay| !replay.is_finished());
        self.replays.push(tokio::spawn(async move {
            for request in requests {
                match api.create_subscription(&request.bind(&session_id)).await {
                    Ok(subscription) => {
                        let _ = commands.send(Command::Register {
                            session_id: session_id.clone(),
                            subscription,
                        });
                    }
                    Err(err) => {
                        warn!(
                            event = "eventsub_resubscribe_failed",
                            subscription_type = %request.subscription_type,
                            error = %err
                        );
                        let _ = commands.send(Command::ResubscribeFailed {
                            subscription_type: request.subscription_type,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }));
    }
}

async fn handshake(pending: &mut Option<Handshake>) -> HandshakeOutcome {
    match pending.as_mut() {
        Some(handshake) => handshake.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    connection: &mut Option<Box<dyn Connection>>,
) -> Option<Result<String, EventSubError>> {
    match connection.as_mut() {
        Some(connection) => connection.next_frame().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
