use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{
    FeedItem, FoodPost, FoodRequest, HungerBroadcast, Message, MessageKind, MessageMetadata,
    Notification,
};

/// Frames received from the real-time endpoint, exactly as they are encoded.
///
/// Nothing outside this module should match on `WireFrame`; [`decode`] turns it
/// into a [`GatewayEvent`] first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireFrame {
    /// Handshake acknowledgement
    Connected,

    #[serde(rename_all = "camelCase")]
    Chat {
        conversation_id: String,
        message: Message,
    },

    #[serde(rename_all = "camelCase")]
    Typing {
        conversation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Read {
        conversation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    FoodPost { food_post: FoodPost },

    #[serde(rename_all = "camelCase")]
    HungerBroadcast { hunger_broadcast: HungerBroadcast },

    /// `content` carries the id of the expired broadcast
    HungerBroadcastExpired { content: String },

    #[serde(rename_all = "camelCase")]
    RequestCreated { food_request: FoodRequest },

    /// Accepted requests carry the new conversation id either here at the
    /// root or inside `food_request`.
    #[serde(rename_all = "camelCase")]
    RequestUpdated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        food_request: FoodRequest,
    },

    Notification { notification: Notification },

    Error { error: String },
}

/// Canonical inbound event. Every consumer sees this shape only.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Connected,

    ChatMessage {
        conversation_id: String,
        message: Message,
    },

    Typing {
        conversation_id: String,
        user_id: Option<String>,
    },

    ReadReceipt {
        conversation_id: String,
        user_id: Option<String>,
    },

    /// A food post or hunger broadcast pushed to the feed
    FeedPosted(FeedItem),

    /// A hunger broadcast that should leave the feed
    FeedExpired { id: String },

    RequestCreated { request: FoodRequest },

    /// `conversation_id` is already resolved: root level first, then the
    /// copy nested in the request.
    RequestUpdated {
        request: FoodRequest,
        conversation_id: Option<String>,
    },

    Notification(Notification),

    ServerError { message: String },
}

impl GatewayEvent {
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Connected => FrameKind::Connected,
            Self::ChatMessage { .. } => FrameKind::Chat,
            Self::Typing { .. } => FrameKind::Typing,
            Self::ReadReceipt { .. } => FrameKind::Read,
            Self::FeedPosted(FeedItem::Food(_)) => FrameKind::FoodPost,
            Self::FeedPosted(FeedItem::Hunger(_)) => FrameKind::HungerBroadcast,
            Self::FeedExpired { .. } => FrameKind::HungerBroadcastExpired,
            Self::RequestCreated { .. } => FrameKind::RequestCreated,
            Self::RequestUpdated { .. } => FrameKind::RequestUpdated,
            Self::Notification(_) => FrameKind::Notification,
            Self::ServerError { .. } => FrameKind::Error,
        }
    }

    /// Returns the conversation this event is scoped to, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::ChatMessage { conversation_id, .. }
            | Self::Typing { conversation_id, .. }
            | Self::ReadReceipt { conversation_id, .. } => Some(conversation_id),
            Self::RequestUpdated { conversation_id, .. } => conversation_id.as_deref(),
            _ => None,
        }
    }
}

impl From<WireFrame> for GatewayEvent {
    fn from(frame: WireFrame) -> Self {
        match frame {
            WireFrame::Connected => Self::Connected,
            WireFrame::Chat {
                conversation_id,
                mut message,
            } => {
                if message.conversation_id.is_empty() {
                    message.conversation_id = conversation_id.clone();
                }
                Self::ChatMessage {
                    conversation_id,
                    message,
                }
            }
            WireFrame::Typing {
                conversation_id,
                user_id,
            } => Self::Typing {
                conversation_id,
                user_id,
            },
            WireFrame::Read {
                conversation_id,
                user_id,
            } => Self::ReadReceipt {
                conversation_id,
                user_id,
            },
            WireFrame::FoodPost { food_post } => Self::FeedPosted(FeedItem::Food(food_post)),
            WireFrame::HungerBroadcast { hunger_broadcast } => {
                Self::FeedPosted(FeedItem::Hunger(hunger_broadcast))
            }
            WireFrame::HungerBroadcastExpired { content } => Self::FeedExpired { id: content },
            WireFrame::RequestCreated { food_request } => Self::RequestCreated {
                request: food_request,
            },
            WireFrame::RequestUpdated {
                conversation_id,
                food_request,
            } => {
                let conversation_id = conversation_id
                    .filter(|id| !id.is_empty())
                    .or_else(|| food_request.conversation_id.clone().filter(|id| !id.is_empty()));
                Self::RequestUpdated {
                    request: food_request,
                    conversation_id,
                }
            }
            WireFrame::Notification { notification } => Self::Notification(notification),
            WireFrame::Error { error } => Self::ServerError { message: error },
        }
    }
}

/// Frame discriminator, used as the topic key for handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Connected,
    Chat,
    Typing,
    Read,
    FoodPost,
    HungerBroadcast,
    HungerBroadcastExpired,
    RequestCreated,
    RequestUpdated,
    Notification,
    Error,
}

impl FrameKind {
    pub const ALL: [FrameKind; 11] = [
        Self::Connected,
        Self::Chat,
        Self::Typing,
        Self::Read,
        Self::FoodPost,
        Self::HungerBroadcast,
        Self::HungerBroadcastExpired,
        Self::RequestCreated,
        Self::RequestUpdated,
        Self::Notification,
        Self::Error,
    ];

    /// The `type` tag used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Chat => "chat",
            Self::Typing => "typing",
            Self::Read => "read",
            Self::FoodPost => "food_post",
            Self::HungerBroadcast => "hunger_broadcast",
            Self::HungerBroadcastExpired => "hunger_broadcast_expired",
            Self::RequestCreated => "request_created",
            Self::RequestUpdated => "request_updated",
            Self::Notification => "notification",
            Self::Error => "error",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no type tag")]
    MissingType,

    #[error("unknown frame type: {0}")]
    UnknownType(String),

    #[error("malformed {kind} frame: {source}")]
    Malformed {
        kind: FrameKind,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded inbound frame plus its optional server timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub event: GatewayEvent,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Decode one text frame into its canonical event.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    let mut value: Value = serde_json::from_str(text)?;
    let object = value.as_object_mut().ok_or(ProtocolError::NotAnObject)?;

    let tag = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    let kind = FrameKind::from_tag(tag).ok_or_else(|| ProtocolError::UnknownType(tag.to_string()))?;

    // An unparseable timestamp is not worth dropping the frame for.
    let timestamp = object
        .remove("timestamp")
        .and_then(|raw| serde_json::from_value::<DateTime<Utc>>(raw).ok());

    let frame: WireFrame =
        serde_json::from_value(value).map_err(|source| ProtocolError::Malformed { kind, source })?;

    Ok(Envelope {
        event: frame.into(),
        timestamp,
    })
}

/// Frames sent FROM the client TO the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCommand {
    #[serde(rename_all = "camelCase")]
    Chat {
        conversation_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_type: Option<MessageKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<MessageMetadata>,
    },

    #[serde(rename_all = "camelCase")]
    Typing { conversation_id: String },

    #[serde(rename_all = "camelCase")]
    Read { conversation_id: String },
}

impl GatewayCommand {
    pub fn conversation_id(&self) -> &str {
        match self {
            Self::Chat { conversation_id, .. }
            | Self::Typing { conversation_id }
            | Self::Read { conversation_id } => conversation_id,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
