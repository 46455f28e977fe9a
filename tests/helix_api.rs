use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use eventsub_client::api::{ApiError, HelixClient, SubscriptionApi};
use eventsub_client::config::{Credentials, EventSubOptions};
use eventsub_client::eventsub::proto::{topics, SubscriptionRequest, TransportMethod};
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

const TEST_CLIENT_ID: &str = "test-client-id";
const TEST_TOKEN: &str = "test-access-token";
const SUBSCRIPTIONS_PATH: &str = "/eventsub/subscriptions";

#[derive(Clone)]
struct HelixState {
    observed_tx: Arc<Mutex<Option<oneshot::Sender<Result<Value, String>>>>>,
    delete_status: StatusCode,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_posts_websocket_binding_with_auth_headers() {
    let (observed_tx, observed_rx) = oneshot::channel();
    let state = HelixState {
        observed_tx: Arc::new(Mutex::new(Some(observed_tx))),
        delete_status: StatusCode::NO_CONTENT,
    };
    let app = Router::new()
        .route(SUBSCRIPTIONS_PATH, post(create_handler))
        .with_state(state);
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let client = helix_client(addr);
    let request = SubscriptionRequest::new(topics::CHANNEL_CHEER, "1")
        .with_condition("broadcaster_user_id", "123")
        .bind("session-1");
    let subscription = client
        .create_subscription(&request)
        .await
        .expect("create subscription");

    assert_eq!(subscription.id, "sub-created");
    assert_eq!(subscription.subscription_type, topics::CHANNEL_CHEER);
    assert_eq!(subscription.transport.method, TransportMethod::Websocket);
    assert_eq!(
        subscription.transport.session_id.as_deref(),
        Some("session-1")
    );

    let body = timeout(Duration::from_secs(2), observed_rx)
        .await
        .expect("timed out waiting for helix observations")
        .expect("observation channel closed")
        .expect("helix request assertions failed");
    assert_eq!(
        body,
        json!({
            "type": "channel.cheer",
            "version": "1",
            "condition": {"broadcaster_user_id": "123"},
            "transport": {"method": "websocket", "session_id": "session-1"}
        })
    );

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock helix server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_rejection_surfaces_server_message() {
    let app = Router::new().route(
        SUBSCRIPTIONS_PATH,
        post(|| async {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Bad Request",
                    "status": 400,
                    "message": "invalid transport and auth combination"
                })),
            )
        }),
    );
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let request = SubscriptionRequest::new(topics::CHANNEL_CHEER, "1").bind("session-1");
    let error = helix_client(addr)
        .create_subscription(&request)
        .await
        .expect_err("request should be rejected");

    assert!(matches!(error, ApiError::HttpStatus { .. }));
    assert_eq!(error.status(), Some(StatusCode::BAD_REQUEST));
    assert_eq!(
        error.to_string(),
        "failed to create subscription: invalid transport and auth combination"
    );

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock helix server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_of_unknown_subscription_succeeds() {
    let (observed_tx, observed_rx) = oneshot::channel();
    let state = HelixState {
        observed_tx: Arc::new(Mutex::new(Some(observed_tx))),
        delete_status: StatusCode::NOT_FOUND,
    };
    let app = Router::new()
        .route(SUBSCRIPTIONS_PATH, post(create_handler).delete(delete_handler))
        .with_state(state);
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    helix_client(addr)
        .delete_subscription("missing-id")
        .await
        .expect("404 counts as deleted");

    let observed = timeout(Duration::from_secs(2), observed_rx)
        .await
        .expect("timed out waiting for helix observations")
        .expect("observation channel closed")
        .expect("helix request assertions failed");
    assert_eq!(observed, json!("missing-id"));

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock helix server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_server_failure_is_an_error() {
    let state = HelixState {
        observed_tx: Arc::new(Mutex::new(None)),
        delete_status: StatusCode::INTERNAL_SERVER_ERROR,
    };
    let app = Router::new()
        .route(SUBSCRIPTIONS_PATH, post(create_handler).delete(delete_handler))
        .with_state(state);
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let error = helix_client(addr)
        .delete_subscription("sub-1")
        .await
        .expect_err("500 should fail");
    assert_eq!(error.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock helix server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_follows_pagination_cursor() {
    let app = Router::new().route(SUBSCRIPTIONS_PATH, get(list_handler));
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let subscriptions = helix_client(addr)
        .list_subscriptions()
        .await
        .expect("list subscriptions");

    let ids: Vec<&str> = subscriptions.iter().map(|sub| sub.id.as_str()).collect();
    assert_eq!(ids, vec!["sub-a", "sub-b"]);

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock helix server task should join");
}

fn helix_client(addr: SocketAddr) -> HelixClient {
    let options = EventSubOptions::default()
        .with_api_endpoint(format!("http://{addr}{SUBSCRIPTIONS_PATH}"));
    let credentials = Credentials::new(TEST_CLIENT_ID, SecretString::new(TEST_TOKEN.to_string()));
    HelixClient::new(credentials, &options).expect("build helix client")
}

fn subscription_json(id: &str, session_id: &str) -> Value {
    json!({
        "id": id,
        "status": "enabled",
        "type": "channel.cheer",
        "version": "1",
        "cost": 0,
        "condition": {"broadcaster_user_id": "123"},
        "transport": {
            "method": "websocket",
            "session_id": session_id,
            "connected_at": "2024-01-01T00:00:00Z"
        },
        "created_at": "2024-01-01T00:00:01Z"
    })
}

fn check_auth(headers: &HeaderMap) -> Result<(), String> {
    let authorization = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok());
    let expected = format!("Bearer {TEST_TOKEN}");
    if authorization != Some(expected.as_str()) {
        return Err(format!("unexpected authorization header: {authorization:?}"));
    }
    let client_id = headers.get("client-id").and_then(|value| value.to_str().ok());
    if client_id != Some(TEST_CLIENT_ID) {
        return Err(format!("unexpected client-id header: {client_id:?}"));
    }
    Ok(())
}

async fn create_handler(
    State(state): State<HelixState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let observed = check_auth(&headers).map(|()| body.clone());
    if let Some(tx) = state.observed_tx.lock().await.take() {
        let _ = tx.send(observed);
    }

    let session_id = body
        .pointer("/transport/session_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "data": [subscription_json("sub-created", &session_id)],
            "total": 1,
            "total_cost": 0,
            "max_total_cost": 10000
        })),
    )
}

async fn delete_handler(
    State(state): State<HelixState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let observed = check_auth(&headers).and_then(|()| {
        query
            .get("id")
            .map(|id| json!(id))
            .ok_or_else(|| "missing id query parameter".to_string())
    });
    if let Some(tx) = state.observed_tx.lock().await.take() {
        let _ = tx.send(observed);
    }
    state.delete_status
}

async fn list_handler(
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if let Err(err) = check_auth(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": err})));
    }

    let page = match query.get("after").map(String::as_str) {
        None => json!({
            "data": [subscription_json("sub-a", "s1")],
            "pagination": {"cursor": "page-2"}
        }),
        Some("page-2") => json!({
            "data": [subscription_json("sub-b", "s1")],
            "pagination": {}
        }),
        Some(other) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": format!("unknown cursor {other}")})),
            )
        }
    };
    (StatusCode::OK, Json(page))
}

async fn spawn_server(
    app: Router,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let addr = listener
        .local_addr()
        .expect("read mock server listener address");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("mock server should run");
    });
    (addr, shutdown_tx, task)
}
