use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::{Duration, Utc};
use serde_json::{Value, json};

use morsel_api::{ApiConfig, ApiError, HttpApi, RestApi, TokenStore};
use morsel_types::api::MessagePage;
use morsel_types::models::FeedFilter;

#[derive(Clone, Default)]
struct Backend {
    refreshes: Arc<AtomicUsize>,
    bearers: Arc<Mutex<Vec<String>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Backend {
    fn authorize(&self, headers: &HeaderMap) -> Result<(), StatusCode> {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(StatusCode::UNAUTHORIZED)?
            .to_string();
        self.bearers.lock().unwrap().push(bearer.clone());
        if bearer.starts_with("fresh") {
            Ok(())
        } else {
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn refresh(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    let n = backend.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
    if body["refreshToken"] != "r1" {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "accessToken": format!("fresh-{n}"),
        "refreshToken": "r1",
        "expiresAt": (Utc::now() + Duration::hours(1)).to_rfc3339(),
    }))
    .into_response()
}

async fn notifications(State(backend): State<Backend>, headers: HeaderMap) -> Response {
    if let Err(status) = backend.authorize(&headers) {
        return status.into_response();
    }
    Json(json!([{
        "id": "n1",
        "title": "New request",
        "message": "Sam wants your soup",
        "type": "request",
        "isRead": false,
        "createdAt": "2026-03-01T10:00:00Z"
    }]))
    .into_response()
}

async fn pending_count(State(backend): State<Backend>, headers: HeaderMap) -> Response {
    match backend.authorize(&headers) {
        Ok(()) => Json(json!({ "pendingCount": 3 })).into_response(),
        Err(status) => status.into_response(),
    }
}

async fn messages(
    State(backend): State<Backend>,
    Path(conversation_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(status) = backend.authorize(&headers) {
        return status.into_response();
    }
    backend.queries.lock().unwrap().push(query);
    Json(json!([{
        "id": "m2",
        "conversationId": conversation_id,
        "senderId": "u2",
        "content": "newest",
        "type": "text",
        "createdAt": "2026-03-01T10:05:00Z"
    }]))
    .into_response()
}

async fn accept(
    State(backend): State<Backend>,
    Path((_post, _request)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    match backend.authorize(&headers) {
        Ok(()) => Json(json!({ "message": "ok", "conversationId": "c9" })).into_response(),
        Err(status) => status.into_response(),
    }
}

async fn unread_count(State(backend): State<Backend>, headers: HeaderMap) -> Response {
    match backend.authorize(&headers) {
        Ok(()) => Json(json!({ "unreadCount": 4 })).into_response(),
        Err(status) => status.into_response(),
    }
}

async fn resolve_broadcast(
    State(backend): State<Backend>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(status) = backend.authorize(&headers) {
        return status.into_response();
    }
    backend.calls.lock().unwrap().push(format!("PUT {id}/resolve"));
    StatusCode::NO_CONTENT.into_response()
}

async fn delete_post(
    State(backend): State<Backend>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(status) = backend.authorize(&headers) {
        return status.into_response();
    }
    backend.calls.lock().unwrap().push(format!("DELETE {id}"));
    if id == "gone" {
        let body = Json(json!({ "message": "post not found" }));
        return (StatusCode::NOT_FOUND, body).into_response();
    }
    Json(json!({ "message": "deleted" })).into_response()
}

async fn broken_feed() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": "database unavailable" })),
    )
        .into_response()
}

async fn start(backend: Backend) -> SocketAddr {
    let app = Router::new()
        .route("/api/auth/refresh", post(refresh))
        .route("/api/notifications", get(notifications))
        .route("/api/my-food-requests/pending-count", get(pending_count))
        .route("/api/conversations/{id}/messages", get(messages))
        .route("/api/food-posts/{post}/requests/{request}/accept", put(accept))
        .route("/api/feed", get(broken_feed))
        .route("/api/messages/unread-count", get(unread_count))
        .route("/api/hunger-broadcasts/{id}/resolve", put(resolve_broadcast))
        .route("/api/food-posts/{id}", delete(delete_post))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client(addr: SocketAddr, tokens: TokenStore) -> HttpApi {
    let config = ApiConfig {
        base_url: format!("http://{addr}/api/"),
    };
    HttpApi::new(&config, Arc::new(tokens)).unwrap()
}

#[tokio::test]
async fn test_401_refreshes_and_retries_once() {
    let backend = Backend::default();
    let addr = start(backend.clone()).await;
    // Server says the token is bad although it looks valid for an hour
    let tokens = TokenStore::new(
        Some("stale".into()),
        Some("r1".into()),
        Some(Utc::now() + Duration::hours(1)),
    );
    let api = client(addr, tokens);

    let notifications = api.notifications().await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, "request");

    assert_eq!(backend.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(*backend.bearers.lock().unwrap(), vec!["stale", "fresh-1"]);
    assert_eq!(api.tokens().access().as_deref(), Some("fresh-1"));
}

#[tokio::test]
async fn test_refreshes_ahead_of_expiry() {
    let backend = Backend::default();
    let addr = start(backend.clone()).await;
    let tokens = TokenStore::new(
        Some("stale".into()),
        Some("r1".into()),
        Some(Utc::now() + Duration::seconds(20)),
    );
    let api = client(addr, tokens);

    assert_eq!(api.pending_requests_count().await.unwrap(), 3);
    assert_eq!(backend.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(*backend.bearers.lock().unwrap(), vec!["fresh-1"]);
}

#[tokio::test]
async fn test_rejected_refresh_clears_credentials() {
    let backend = Backend::default();
    let addr = start(backend.clone()).await;
    let tokens = TokenStore::new(
        Some("stale".into()),
        Some("revoked".into()),
        Some(Utc::now() + Duration::hours(1)),
    );
    let api = client(addr, tokens);

    let err = api.notifications().await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized));
    assert!(api.tokens().access().is_none());
    assert!(api.tokens().refresh_token().is_none());
}

#[tokio::test]
async fn test_history_paging_and_accept() {
    let backend = Backend::default();
    let addr = start(backend.clone()).await;
    let tokens = TokenStore::new(
        Some("fresh-0".into()),
        Some("r1".into()),
        Some(Utc::now() + Duration::hours(1)),
    );
    let api = client(addr, tokens);

    let page = api.messages("c1", MessagePage::default()).await.unwrap();
    assert_eq!(page[0].conversation_id, "c1");
    let query = backend.queries.lock().unwrap()[0].clone();
    assert_eq!(query.get("limit").map(String::as_str), Some("50"));
    assert_eq!(query.get("offset").map(String::as_str), Some("0"));

    assert_eq!(api.accept_request("p1", "r7").await.unwrap().as_deref(), Some("c9"));
    assert_eq!(backend.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_error_status_carries_server_message() {
    let backend = Backend::default();
    let addr = start(backend).await;
    let api = client(addr, TokenStore::default());

    match api.feed(FeedFilter::Food).await {
        Err(ApiError::Status { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "database unavailable");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_unread_count_resolve_and_delete() {
    let backend = Backend::default();
    let addr = start(backend.clone()).await;
    let tokens = TokenStore::new(
        Some("fresh-0".into()),
        None,
        Some(Utc::now() + Duration::hours(1)),
    );
    let api = client(addr, tokens);

    assert_eq!(api.unread_message_count().await.unwrap(), 4);
    api.resolve_hunger_broadcast("h1").await.unwrap();
    api.delete_food_post("f1").await.unwrap();
    let missing = api.delete_food_post("gone").await.unwrap_err();
    assert_eq!(missing.status(), Some(404));

    assert_eq!(
        *backend.calls.lock().unwrap(),
        vec!["PUT h1/resolve", "DELETE f1", "DELETE gone"]
    );
}
