//! In-memory transport and subscription API used by the worker tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::mpsc;

use crate::api::{ApiError, SubscriptionApi};
use crate::eventsub::client::EventSubError;
use crate::eventsub::proto::{CreateSubscriptionRequest, Subscription, SubscriptionStatus};
use crate::eventsub::transport::{Connection, Transport};

type FrameTx = mpsc::UnboundedSender<Result<String, EventSubError>>;
type FrameRx = mpsc::UnboundedReceiver<Result<String, EventSubError>>;

/// Server side of one fake connection. Dropping it closes the connection.
pub(crate) struct FakeServer {
    pub url: String,
    frames: FrameTx,
}

impl FakeServer {
    pub fn send(&self, text: impl Into<String>) {
        self.frames.send(Ok(text.into())).expect("client connection dropped");
    }

    pub fn fail(self, message: &str) {
        let _ = self
            .frames
            .send(Err(EventSubError::Protocol(message.to_string())));
    }

    pub fn close(self) {}
}

pub(crate) struct FakeTransport {
    urls: Mutex<Vec<String>>,
    servers: mpsc::UnboundedSender<FakeServer>,
    refuse: AtomicBool,
    stall: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            urls: Mutex::new(Vec::new()),
            servers,
            refuse: AtomicBool::new(false),
            stall: AtomicBool::new(false),
        });
        (transport, rx)
    }

    /// Every URL a connect was attempted against, refused ones included.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().expect("urls lock").clone()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Handshakes started while set never complete.
    pub fn stall_connections(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, EventSubError> {
        self.urls.lock().expect("urls lock").push(url.to_string());
        if self.refuse.load(Ordering::SeqCst) {
            return Err(EventSubError::Protocol("connection refused".to_string()));
        }
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let (frames, rx) = mpsc::unbounded_channel();
        let _ = self.servers.send(FakeServer {
            url: url.to_string(),
            frames,
        });
        Ok(Box::new(FakeConnection { frames: rx }))
    }
}

struct FakeConnection {
    frames: FrameRx,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn next_frame(&mut self) -> Option<Result<String, EventSubError>> {
        self.frames.recv().await
    }

    async fn close(&mut self) {
        self.frames.close();
    }
}

/// Records every call and fabricates subscriptions.
#[derive(Default)]
pub(crate) struct FakeApi {
    created: Mutex<Vec<CreateSubscriptionRequest>>,
    deleted: Mutex<Vec<String>>,
    failing_types: Mutex<HashSet<String>>,
    listed: Mutex<Vec<Subscription>>,
    next_id: AtomicUsize,
}

impl FakeApi {
    pub fn created(&self) -> Vec<CreateSubscriptionRequest> {
        self.created.lock().expect("created lock").clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().expect("deleted lock").clone()
    }

    /// Subscriptions the server-side list call returns.
    pub fn set_listed(&self, subscriptions: Vec<Subscription>) {
        *self.listed.lock().expect("listed lock") = subscriptions;
    }

    pub fn fail_type(&self, subscription_type: &str) {
        self.failing_types
            .lock()
            .expect("failing lock")
            .insert(subscription_type.to_string());
    }
}

#[async_trait]
impl SubscriptionApi for FakeApi {
    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<Subscription, ApiError> {
        self.created
            .lock()
            .expect("created lock")
            .push(request.clone());

        let failing = self
            .failing_types
            .lock()
            .expect("failing lock")
            .contains(&request.subscription_type);
        if failing {
            return Err(ApiError::HttpStatus {
                operation: "create subscription",
                status: StatusCode::BAD_REQUEST,
                message: "invalid condition".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Subscription {
            id: format!("sub-{id}"),
            status: SubscriptionStatus::Enabled,
            subscription_type: request.subscription_type.clone(),
            version: request.version.clone(),
            cost: 0,
            condition: request.condition.clone(),
            transport: request.transport.clone(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
        })
    }

    async fn delete_subscription(&self, id: &str) -> Result<(), ApiError> {
        self.deleted
            .lock()
            .expect("deleted lock")
            .push(id.to_string());
        Ok(())
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, ApiError> {
        Ok(self.listed.lock().expect("listed lock").clone())
    }
}
