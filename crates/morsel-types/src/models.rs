use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

// -- Feed --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoodStatus {
    Available,
    Requested,
    Taken,
}

impl FoodStatus {
    /// Still claimable from the feed (shown in the "available" section).
    pub fn is_open(self) -> bool {
        matches!(self, Self::Available | Self::Requested)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    Normal,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodPost {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub location: String,
    pub expiry_date: DateTime<Utc>,
    pub status: FoodStatus,
    pub owner_id: String,
    #[serde(default)]
    pub owner_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl FoodPost {
    /// Human readable countdown to the expiry timestamp.
    ///
    /// Display only: feed sections are decided by `status`, never by this.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> String {
        let diff = self.expiry_date - now;
        if diff < TimeDelta::zero() {
            return "Expired".to_string();
        }

        let hours = diff.num_hours();
        let minutes = diff.num_minutes() % 60;
        if hours < 24 {
            format!("{}h {}m left", hours, minutes)
        } else {
            format!("{}d {}h left", hours / 24, hours % 24)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HungerBroadcast {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub urgency: Urgency,
    pub owner_id: String,
    #[serde(default)]
    pub user_name: String,
    pub time_posted: DateTime<Utc>,
}

/// A post shown in the community feed.
///
/// The REST snapshot ships these as `{ "type": "food", "data": { .. } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum FeedItem {
    Food(FoodPost),
    Hunger(HungerBroadcast),
}

impl FeedItem {
    pub fn id(&self) -> &str {
        match self {
            Self::Food(post) => &post.id,
            Self::Hunger(broadcast) => &broadcast.id,
        }
    }

    pub fn owner_id(&self) -> &str {
        match self {
            Self::Food(post) => &post.owner_id,
            Self::Hunger(broadcast) => &broadcast.owner_id,
        }
    }

    pub fn as_food(&self) -> Option<&FoodPost> {
        match self {
            Self::Food(post) => Some(post),
            Self::Hunger(_) => None,
        }
    }

    pub fn as_hunger(&self) -> Option<&HungerBroadcast> {
        match self {
            Self::Hunger(broadcast) => Some(broadcast),
            Self::Food(_) => None,
        }
    }
}

/// Feed tab selector, also used as the `type` query of the feed endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeedFilter {
    #[default]
    All,
    Food,
    Hunger,
}

impl FeedFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Food => "food",
            Self::Hunger => "hunger",
        }
    }

    pub fn matches(self, item: &FeedItem) -> bool {
        match self {
            Self::All => true,
            Self::Food => matches!(item, FeedItem::Food(_)),
            Self::Hunger => matches!(item, FeedItem::Hunger(_)),
        }
    }
}

// -- Messaging --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    PriceOffer,
}

/// Structured payload attached to image and price-offer messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Local delivery state. Never on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Sent optimistically, not yet seen coming back from the server.
    Pending,
    #[default]
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Chat frames may leave this to the enclosing frame
    #[serde(default)]
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default, alias = "type")]
    pub message_type: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip)]
    pub delivery: Delivery,
}

impl Message {
    /// Flip the read flag. Never goes back to unread.
    pub fn mark_read(&mut self) {
        self.is_read = true;
    }

    pub fn is_pending(&self) -> bool {
        self.delivery == Delivery::Pending
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Active,
    Resolved,
    Expired,
}

/// What a conversation is about. At most one post is ever linked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationLink {
    FoodPost(String),
    HungerBroadcast(String),
    Direct,
}

#[derive(Debug, thiserror::Error)]
#[error("conversation {0} links both a food post and a hunger broadcast")]
pub struct DoubleLinkError(String);

/// Conversation as returned by the conversation list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConversationRecord", into = "ConversationRecord")]
pub struct Conversation {
    pub id: String,
    pub participant1_id: String,
    pub participant2_id: String,
    pub link: ConversationLink,
    pub last_message_at: Option<DateTime<Utc>>,
    pub status: ConversationStatus,
    pub food_post_title: Option<String>,
    pub other_participant_name: Option<String>,
    pub last_message_content: Option<String>,
    pub unread_count: u32,
}

impl Conversation {
    pub fn involves(&self, user_id: &str) -> bool {
        self.participant1_id == user_id || self.participant2_id == user_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationRecord {
    id: String,
    participant1_id: String,
    participant2_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    food_post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hunger_broadcast_id: Option<String>,
    #[serde(default)]
    last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    status: ConversationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    food_post_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    other_participant_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_message_content: Option<String>,
    #[serde(default)]
    unread_count: u32,
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = DoubleLinkError;

    fn try_from(record: ConversationRecord) -> Result<Self, Self::Error> {
        // Some endpoints send "" instead of omitting the field.
        let food = record.food_post_id.filter(|id| !id.is_empty());
        let hunger = record.hunger_broadcast_id.filter(|id| !id.is_empty());
        let link = match (food, hunger) {
            (Some(_), Some(_)) => return Err(DoubleLinkError(record.id)),
            (Some(id), None) => ConversationLink::FoodPost(id),
            (None, Some(id)) => ConversationLink::HungerBroadcast(id),
            (None, None) => ConversationLink::Direct,
        };

        Ok(Self {
            id: record.id,
            participant1_id: record.participant1_id,
            participant2_id: record.participant2_id,
            link,
            last_message_at: record.last_message_at,
            status: record.status,
            food_post_title: record.food_post_title,
            other_participant_name: record.other_participant_name,
            last_message_content: record.last_message_content,
            unread_count: record.unread_count,
        })
    }
}

impl From<Conversation> for ConversationRecord {
    fn from(conversation: Conversation) -> Self {
        let (food_post_id, hunger_broadcast_id) = match conversation.link {
            ConversationLink::FoodPost(id) => (Some(id), None),
            ConversationLink::HungerBroadcast(id) => (None, Some(id)),
            ConversationLink::Direct => (None, None),
        };

        Self {
            id: conversation.id,
            participant1_id: conversation.participant1_id,
            participant2_id: conversation.participant2_id,
            food_post_id,
            hunger_broadcast_id,
            last_message_at: conversation.last_message_at,
            status: conversation.status,
            food_post_title: conversation.food_post_title,
            other_participant_name: conversation.other_participant_name,
            last_message_content: conversation.last_message_content,
            unread_count: conversation.unread_count,
        }
    }
}

// -- Requests & notifications --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodRequest {
    pub id: String,
    pub food_post_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food_title: Option<String>,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn post(expiry: DateTime<Utc>) -> FoodPost {
        FoodPost {
            id: "f1".into(),
            title: "Soup".into(),
            description: String::new(),
            quantity: String::new(),
            location: String::new(),
            expiry_date: expiry,
            status: FoodStatus::Available,
            owner_id: "u1".into(),
            owner_name: String::new(),
            image_urls: vec![],
            latitude: None,
            longitude: None,
        }
    }

    #[test]
    fn test_time_remaining() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(post(now - TimeDelta::minutes(1)).time_remaining(now), "Expired");
        assert_eq!(
            post(now + TimeDelta::minutes(5 * 60 + 12)).time_remaining(now),
            "5h 12m left"
        );
        assert_eq!(
            post(now + TimeDelta::hours(51)).time_remaining(now),
            "2d 3h left"
        );
    }

    #[test]
    fn test_feed_item_snapshot_shape() {
        let json = r#"{"type":"hunger","data":{"id":"h1","message":"Need lunch","ownerId":"u2","timePosted":"2024-01-01T12:00:00Z","urgency":"urgent"}}"#;
        let item: FeedItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.id(), "h1");
        assert_eq!(item.as_hunger().unwrap().urgency, Urgency::Urgent);
    }

    #[test]
    fn test_conversation_link() {
        let json = r#"{"id":"c1","participant1Id":"a","participant2Id":"b","foodPostId":"f1","hungerBroadcastId":""}"#;
        let conversation: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conversation.link, ConversationLink::FoodPost("f1".into()));
        assert_eq!(conversation.status, ConversationStatus::Active);

        let both = r#"{"id":"c2","participant1Id":"a","participant2Id":"b","foodPostId":"f1","hungerBroadcastId":"h1"}"#;
        assert!(serde_json::from_str::<Conversation>(both).is_err());
    }

    #[test]
    fn test_message_kind_alias() {
        let json = r#"{"id":"m1","conversationId":"c1","senderId":"a","content":"10","type":"price_offer","metadata":{"amount":10.0,"currency":"EUR"},"createdAt":"2024-01-01T12:00:00Z"}"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.message_type, MessageKind::PriceOffer);
        assert!(!message.is_read);
        assert_eq!(message.delivery, Delivery::Confirmed);
    }
}
