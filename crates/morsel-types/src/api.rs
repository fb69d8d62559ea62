use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// Access-token claims. The client only reads them to find the user id and
/// expiry; signature checks belong to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

// -- Messages --

/// Page selector for conversation history. The server returns the most
/// recent messages first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagePage {
    pub limit: u32,
    pub offset: u32,
}

impl Default for MessagePage {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

// -- Counters --

/// Count endpoints disagree on the field name.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CountResponse {
    #[serde(
        alias = "unreadCount",
        alias = "pendingCount",
        alias = "unviewedCount"
    )]
    pub count: u32,
}

// -- Requests --

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptResponse {
    #[serde(default)]
    pub conversation_id: Option<String>,
}
