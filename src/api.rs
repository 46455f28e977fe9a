use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::{Credentials, EventSubOptions};
use crate::eventsub::proto::{CreateSubscriptionRequest, Subscription};

const ERROR_BODY_SNIPPET_LEN: usize = 220;
/// Guards against a server that keeps handing out cursors.
const MAX_LIST_PAGES: usize = 100;

const CREATE: &str = "create subscription";
const DELETE: &str = "delete subscription";
const LIST: &str = "get subscriptions";

/// Subscription management calls the session manager depends on.
#[async_trait]
pub trait SubscriptionApi: Send + Sync + 'static {
    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<Subscription, ApiError>;

    /// Deleting an id the server does not know is not an error.
    async fn delete_subscription(&self, id: &str) -> Result<(), ApiError>;

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, ApiError>;
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to {operation}: {message}")]
    HttpStatus {
        operation: &'static str,
        status: StatusCode,
        message: String,
    },

    #[error("failed to parse {operation} response: {detail}")]
    Parse {
        operation: &'static str,
        detail: String,
    },

    #[error("{operation} response contained no subscription")]
    EmptyResponse { operation: &'static str },
}

impl ApiError {
    /// HTTP status behind the failure, when there is one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
            Self::Parse { .. } | Self::EmptyResponse { .. } => None,
        }
    }
}

/// Helix EventSub subscription client.
#[derive(Clone)]
pub struct HelixClient {
    http: Client,
    credentials: Credentials,
    endpoint: String,
}

impl HelixClient {
    /// Builds a client with the configured endpoint and HTTP timeouts.
    pub fn new(credentials: Credentials, options: &EventSubOptions) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(options.http_connect_timeout)
            .timeout(options.http_request_timeout)
            .build()?;

        Ok(Self {
            http,
            credentials,
            endpoint: options.api_url().to_string(),
        })
    }

    /// Subscription management URL this client targets.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(self.credentials.access_token.expose_secret())
            .header("Client-Id", &self.credentials.client_id)
    }

    async fn send(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<(StatusCode, String), ApiError> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(event = "helix_response", operation, status = status.as_u16());
        Ok((status, body))
    }

    async fn list_page(&self, after: Option<&str>) -> Result<SubscriptionPage, ApiError> {
        let mut builder = self.http.get(&self.endpoint);
        if let Some(cursor) = after {
            builder = builder.query(&[("after", cursor)]);
        }

        let (status, body) = self.send(LIST, builder).await?;
        if !status.is_success() {
            return Err(status_error(LIST, status, &body));
        }
        parse_page(LIST, &body)
    }
}

#[async_trait]
impl SubscriptionApi for HelixClient {
    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<Subscription, ApiError> {
        let builder = self.http.post(&self.endpoint).json(request);
        let (status, body) = self.send(CREATE, builder).await?;
        if !status.is_success() {
            return Err(status_error(CREATE, status, &body));
        }

        parse_page(CREATE, &body)?
            .data
            .into_iter()
            .next()
            .ok_or(ApiError::EmptyResponse { operation: CREATE })
    }

    async fn delete_subscription(&self, id: &str) -> Result<(), ApiError> {
        let builder = self.http.delete(&self.endpoint).query(&[("id", id)]);
        let (status, body) = self.send(DELETE, builder).await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(status_error(DELETE, status, &body))
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, ApiError> {
        let mut subscriptions = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let page = self.list_page(cursor.as_deref()).await?;
            subscriptions.extend(page.data);
            cursor = page.pagination.and_then(|pagination| pagination.cursor);
            if cursor.as_deref().map_or(true, str::is_empty) {
                break;
            }
        }

        Ok(subscriptions)
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionPage {
    #[serde(default)]
    data: Vec<Subscription>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    cursor: Option<String>,
}

fn parse_page(operation: &'static str, body: &str) -> Result<SubscriptionPage, ApiError> {
    serde_json::from_str(body).map_err(|err| ApiError::Parse {
        operation,
        detail: err.to_string(),
    })
}

fn status_error(operation: &'static str, status: StatusCode, body: &str) -> ApiError {
    ApiError::HttpStatus {
        operation,
        status,
        message: summarize_error_body(status, body),
    }
}

fn summarize_error_body(status: StatusCode, body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed
            .message
            .filter(|message| !message.is_empty())
            .or(parsed.error)
        {
            return message;
        }
    }

    if body.trim().is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string();
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
