use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use morsel_types::api::{AcceptResponse, CountResponse, MessagePage, RefreshRequest, TokenResponse};
use morsel_types::models::{Conversation, FeedFilter, FeedItem, Message, Notification};

use crate::error::ApiError;
use crate::tokens::TokenStore;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// The REST resources the real-time core needs.
///
/// Implemented over HTTP by [`HttpApi`]; tests provide their own.
pub trait RestApi: Send + Sync + 'static {
    fn feed(
        &self,
        filter: FeedFilter,
    ) -> impl Future<Output = Result<Vec<FeedItem>, ApiError>> + Send;

    fn conversations(&self) -> impl Future<Output = Result<Vec<Conversation>, ApiError>> + Send;

    /// Newest first, as the server pages them.
    fn messages(
        &self,
        conversation_id: &str,
        page: MessagePage,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    fn mark_messages_read(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Unread messages across all conversations, for the messages badge.
    fn unread_message_count(&self) -> impl Future<Output = Result<u32, ApiError>> + Send;

    fn notifications(&self) -> impl Future<Output = Result<Vec<Notification>, ApiError>> + Send;

    fn mark_notification_read(&self, id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Pending requests on the local user's posts.
    fn pending_requests_count(&self) -> impl Future<Output = Result<u32, ApiError>> + Send;

    /// The local user's own requests with an update they have not looked at.
    fn unviewed_requests_count(&self) -> impl Future<Output = Result<u32, ApiError>> + Send;

    fn mark_my_requests_viewed(&self) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Returns the conversation opened for the accepted request, if any.
    fn accept_request(
        &self,
        post_id: &str,
        request_id: &str,
    ) -> impl Future<Output = Result<Option<String>, ApiError>> + Send;

    fn reject_request(
        &self,
        post_id: &str,
        request_id: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Mark one of the local user's hunger broadcasts as resolved.
    fn resolve_hunger_broadcast(&self, id: &str)
    -> impl Future<Output = Result<(), ApiError>> + Send;

    fn delete_food_post(&self, id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base url including the `/api` prefix.
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
        }
    }
}

/// reqwest-backed [`RestApi`] with bearer auth.
///
/// The access token is refreshed before a request when it is about to expire,
/// and once more if the server still answers 401.
#[derive(Clone)]
pub struct HttpApi {
    http: Client,
    base: Url,
    tokens: Arc<TokenStore>,
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl HttpApi {
    pub fn new(config: &ApiConfig, tokens: Arc<TokenStore>) -> Result<Self, ApiError> {
        // Keep the trailing slash so `join` appends instead of replacing
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');

        Ok(Self {
            http: Client::new(),
            base: Url::parse(&base)?,
            tokens,
            refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// `stale` is the access token the caller found wanting; if another task
    /// already replaced it, the new one is returned without a round trip.
    pub async fn refresh(&self, stale: Option<&str>) -> Result<String, ApiError> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.tokens.access() {
            if stale != Some(current.as_str()) && !self.tokens.is_expiring_soon(Utc::now()) {
                return Ok(current);
            }
        }

        let refresh_token = self.tokens.refresh_token().ok_or(ApiError::Unauthorized)?;
        let response = self
            .http
            .post(self.url("auth/refresh")?)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Token refresh rejected, clearing credentials");
            self.tokens.clear();
            return Err(ApiError::Unauthorized);
        }

        let pair: TokenResponse = decode_body(response).await?;
        let access = pair.access_token.clone();
        self.tokens.store(pair);
        debug!("Access token refreshed");
        Ok(access)
    }

    /// Token for the next request. Refreshes ahead of expiry when a refresh
    /// token is available; otherwise the current token is used as is.
    async fn bearer(&self) -> Result<Option<String>, ApiError> {
        let current = self.tokens.access();
        if self.tokens.refresh_token().is_some() && self.tokens.is_expiring_soon(Utc::now()) {
            return self.refresh(current.as_deref()).await.map(Some);
        }
        Ok(current)
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        build: impl Fn(RequestBuilder) -> RequestBuilder,
    ) -> Result<Response, ApiError> {
        let url = self.url(path)?;
        let token = self.bearer().await?;

        let mut request = build(self.http.request(method.clone(), url.clone()));
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        if response.status() != StatusCode::UNAUTHORIZED || self.tokens.refresh_token().is_none() {
            return check(response).await;
        }

        debug!(path, "Got 401, refreshing and retrying once");
        let token = self.refresh(token.as_deref()).await?;
        let response = build(self.http.request(method, url))
            .bearer_auth(token)
            .send()
            .await?;
        check(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(Method::GET, path, |request| request).await?;
        decode_body(response).await
    }

    async fn put(&self, path: &str) -> Result<Response, ApiError> {
        self.execute(Method::PUT, path, |request| request).await
    }
}

async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| "Request failed".to_string());
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn decode_body<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

impl RestApi for HttpApi {
    async fn feed(&self, filter: FeedFilter) -> Result<Vec<FeedItem>, ApiError> {
        let path = match filter {
            FeedFilter::All => "feed".to_string(),
            other => format!("feed?type={}", other.as_str()),
        };
        self.get_json(&path).await
    }

    async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.get_json("conversations").await
    }

    async fn messages(
        &self,
        conversation_id: &str,
        page: MessagePage,
    ) -> Result<Vec<Message>, ApiError> {
        let path = format!("conversations/{conversation_id}/messages");
        let response = self
            .execute(Method::GET, &path, |request| {
                request.query(&[("limit", page.limit), ("offset", page.offset)])
            })
            .await?;
        decode_body(response).await
    }

    async fn mark_messages_read(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.put(&format!("conversations/{conversation_id}/messages/read"))
            .await
            .map(drop)
    }

    async fn unread_message_count(&self) -> Result<u32, ApiError> {
        let count: CountResponse = self.get_json("messages/unread-count").await?;
        Ok(count.count)
    }

    async fn notifications(&self) -> Result<Vec<Notification>, ApiError> {
        self.get_json("notifications").await
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
        self.put(&format!("notifications/{id}/read")).await.map(drop)
    }

    async fn pending_requests_count(&self) -> Result<u32, ApiError> {
        let count: CountResponse = self.get_json("my-food-requests/pending-count").await?;
        Ok(count.count)
    }

    async fn unviewed_requests_count(&self) -> Result<u32, ApiError> {
        let count: CountResponse = self.get_json("my-requests/unviewed-count").await?;
        Ok(count.count)
    }

    async fn mark_my_requests_viewed(&self) -> Result<(), ApiError> {
        self.put("my-requests/mark-viewed").await.map(drop)
    }

    async fn accept_request(
        &self,
        post_id: &str,
        request_id: &str,
    ) -> Result<Option<String>, ApiError> {
        let response = self
            .put(&format!("food-posts/{post_id}/requests/{request_id}/accept"))
            .await?;
        // Older servers answer with an empty body
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let accepted: AcceptResponse = serde_json::from_slice(&bytes)?;
        Ok(accepted.conversation_id)
    }

    async fn reject_request(&self, post_id: &str, request_id: &str) -> Result<(), ApiError> {
        self.put(&format!("food-posts/{post_id}/requests/{request_id}/reject"))
            .await
            .map(drop)
    }

    async fn resolve_hunger_broadcast(&self, id: &str) -> Result<(), ApiError> {
        self.put(&format!("hunger-broadcasts/{id}/resolve")).await.map(drop)
    }

    async fn delete_food_post(&self, id: &str) -> Result<(), ApiError> {
        self.execute(Method::DELETE, &format!("food-posts/{id}"), |request| request)
            .await
            .map(drop)
    }
}
