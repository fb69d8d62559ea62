use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use morsel_types::GatewayCommand;
use morsel_types::models::{
    Conversation, ConversationStatus, Delivery, Message, MessageKind, MessageMetadata,
};

/// How long the peer typing flag stays up without a new ping.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

/// Work a conversation update asks the session to do outside the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Mark the conversation read over REST, then send a `read` frame.
    MarkRead { conversation_id: String },
}

/// The conversation currently on screen.
#[derive(Debug)]
struct OpenConversation {
    id: String,
    /// Oldest first, in arrival order
    messages: Vec<Message>,
    peer_typing: bool,
    typing_deadline: Option<Instant>,
}

/// Conversation list plus the history of the one open conversation.
#[derive(Debug)]
pub struct ConversationReconciler {
    local_user: String,
    typing_timeout: Duration,
    conversations: Vec<Conversation>,
    /// Messages badge: seeded from the server, then kept in step locally
    unread_messages: u32,
    open: Option<OpenConversation>,
}

impl ConversationReconciler {
    pub fn new(local_user: impl Into<String>) -> Self {
        Self::with_typing_timeout(local_user, TYPING_TIMEOUT)
    }

    pub fn with_typing_timeout(local_user: impl Into<String>, typing_timeout: Duration) -> Self {
        Self {
            local_user: local_user.into(),
            typing_timeout,
            conversations: Vec::new(),
            unread_messages: 0,
            open: None,
        }
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    pub fn load_conversations(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    /// Seed the messages badge. Without a server count the listed
    /// conversations' unread counts are summed instead.
    pub fn seed_unread(&mut self, count: Option<u32>) {
        self.unread_messages =
            count.unwrap_or_else(|| self.conversations.iter().map(|c| c.unread_count).sum());
    }

    /// Unread messages across all conversations.
    pub fn unread_total(&self) -> u32 {
        self.unread_messages
    }

    pub fn open_id(&self) -> Option<&str> {
        self.open.as_ref().map(|open| open.id.as_str())
    }

    /// History of the open conversation, oldest first.
    pub fn messages(&self) -> &[Message] {
        self.open.as_ref().map_or(&[], |open| open.messages.as_slice())
    }

    pub fn is_peer_typing(&self) -> bool {
        self.open.as_ref().is_some_and(|open| open.peer_typing)
    }

    pub fn typing_deadline(&self) -> Option<Instant> {
        self.open.as_ref().and_then(|open| open.typing_deadline)
    }

    /// Open a conversation with the server's newest-first page.
    pub fn load_history(&mut self, conversation_id: &str, newest_first: Vec<Message>) -> Effect {
        let mut messages: Vec<Message> = Vec::with_capacity(newest_first.len());
        for message in newest_first.into_iter().rev() {
            if !messages.iter().any(|m| m.id == message.id) {
                messages.push(message);
            }
        }
        debug!(conversation_id, messages = messages.len(), "Conversation history loaded");

        self.open = Some(OpenConversation {
            id: conversation_id.to_string(),
            messages,
            peer_typing: false,
            typing_deadline: None,
        });
        let cleared = self
            .summary_mut(conversation_id)
            .map_or(0, |summary| std::mem::take(&mut summary.unread_count));
        self.unread_messages = self.unread_messages.saturating_sub(cleared);

        Effect::MarkRead {
            conversation_id: conversation_id.to_string(),
        }
    }

    /// Merge an inbound chat message.
    ///
    /// Only the open conversation gets history and read receipts; any other
    /// conversation just has its list entry bumped.
    pub fn apply_chat(&mut self, conversation_id: &str, mut message: Message) -> Option<Effect> {
        let from_peer = message.sender_id != self.local_user;
        let is_open = self.open_id() == Some(conversation_id);

        if let Some(open) = self.open.as_mut().filter(|_| is_open) {
            if open.messages.iter().any(|m| m.id == message.id) {
                trace!(conversation_id, message_id = %message.id, "Duplicate chat ignored");
                return None;
            }

            message.delivery = Delivery::Confirmed;
            // Only the trailing run of pending sends can be confirmed in place;
            // anything older would move the echo ahead of later arrivals.
            let unconfirmed = open
                .messages
                .iter()
                .rposition(|m| !m.is_pending())
                .map_or(0, |last| last + 1);
            let echo = if from_peer {
                None
            } else {
                open.messages[unconfirmed..]
                    .iter_mut()
                    .find(|m| m.content == message.content)
            };
            match echo {
                Some(pending) => {
                    trace!(
                        conversation_id,
                        local_id = %pending.id,
                        message_id = %message.id,
                        "Pending message confirmed"
                    );
                    message.is_read |= pending.is_read;
                    *pending = message.clone();
                }
                None => open.messages.push(message.clone()),
            }
        }

        if let Some(summary) = self.summary_mut(conversation_id) {
            summary.last_message_content = Some(message.content.clone());
            summary.last_message_at = Some(message.created_at);
            if from_peer && !is_open {
                summary.unread_count = summary.unread_count.saturating_add(1);
            }
        }
        if from_peer && !is_open {
            self.unread_messages = self.unread_messages.saturating_add(1);
        }

        (is_open && from_peer).then(|| Effect::MarkRead {
            conversation_id: conversation_id.to_string(),
        })
    }

    /// Peer typing ping. Arms (or re-arms) the single expiry deadline.
    pub fn apply_typing(
        &mut self,
        conversation_id: &str,
        user_id: Option<&str>,
        at: Instant,
    ) -> bool {
        if user_id == Some(self.local_user.as_str()) {
            return false;
        }
        let timeout = self.typing_timeout;
        match self.open.as_mut().filter(|open| open.id == conversation_id) {
            Some(open) => {
                open.peer_typing = true;
                open.typing_deadline = Some(at + timeout);
                true
            }
            None => false,
        }
    }

    /// Drop the typing flag once its deadline has passed. True exactly once
    /// per silence.
    pub fn expire_typing(&mut self, now: Instant) -> bool {
        let Some(open) = self.open.as_mut() else {
            return false;
        };
        match open.typing_deadline {
            Some(deadline) if open.peer_typing && deadline <= now => {
                open.peer_typing = false;
                open.typing_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// The peer read the thread: every local message is read now.
    pub fn apply_read(&mut self, conversation_id: &str, reader: Option<&str>) -> usize {
        if reader == Some(self.local_user.as_str()) {
            return 0;
        }
        let local_user = &self.local_user;
        let Some(open) = self.open.as_mut().filter(|open| open.id == conversation_id) else {
            return 0;
        };

        let mut flipped = 0;
        for message in open
            .messages
            .iter_mut()
            .filter(|m| &m.sender_id == local_user && !m.is_read)
        {
            message.mark_read();
            flipped += 1;
        }
        flipped
    }

    /// Optimistic send into the open conversation.
    ///
    /// Appends a pending message under a local id and returns the frame to
    /// transmit, or `None` when no conversation is open.
    pub fn send_local(
        &mut self,
        content: &str,
        kind: MessageKind,
        metadata: Option<MessageMetadata>,
        now: DateTime<Utc>,
    ) -> Option<GatewayCommand> {
        let open = self.open.as_mut()?;
        let message = Message {
            id: format!("local-{}", Uuid::new_v4()),
            conversation_id: open.id.clone(),
            sender_id: self.local_user.clone(),
            content: content.to_string(),
            message_type: kind,
            metadata: metadata.clone(),
            is_read: false,
            created_at: now,
            sender_name: None,
            delivery: Delivery::Pending,
        };
        let conversation_id = open.id.clone();
        open.messages.push(message);

        if let Some(summary) = self.summary_mut(&conversation_id) {
            summary.last_message_content = Some(content.to_string());
            summary.last_message_at = Some(now);
        }

        Some(GatewayCommand::Chat {
            conversation_id,
            content: content.to_string(),
            message_type: Some(kind),
            metadata,
        })
    }

    /// Leave the open conversation. Cancels any pending typing expiry.
    pub fn close(&mut self) -> Option<String> {
        self.open.take().map(|open| open.id)
    }

    pub fn set_status(&mut self, conversation_id: &str, status: ConversationStatus) -> bool {
        match self.summary_mut(conversation_id) {
            Some(summary) => {
                summary.status = status;
                true
            }
            None => false,
        }
    }

    fn summary_mut(&mut self, conversation_id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morsel_types::models::ConversationLink;

    const ME: &str = "me";
    const PEER: &str = "peer";

    fn message(id: &str, conversation: &str, sender: &str, content: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: conversation.into(),
            sender_id: sender.into(),
            content: content.into(),
            message_type: MessageKind::Text,
            metadata: None,
            is_read: false,
            created_at: Utc::now(),
            sender_name: None,
            delivery: Delivery::Confirmed,
        }
    }

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: id.into(),
            participant1_id: ME.into(),
            participant2_id: PEER.into(),
            link: ConversationLink::FoodPost("f1".into()),
            last_message_at: None,
            status: ConversationStatus::Active,
            food_post_title: Some("Soup".into()),
            other_participant_name: Some("Peer".into()),
            last_message_content: None,
            unread_count: 0,
        }
    }

    fn opened(id: &str) -> ConversationReconciler {
        let mut conversations = ConversationReconciler::new(ME);
        conversations.load_conversations(vec![conversation("a"), conversation("b")]);
        conversations.load_history(id, vec![]);
        conversations
    }

    #[test]
    fn test_history_reversed_and_marked_read() {
        let mut conversations = ConversationReconciler::new(ME);
        let mut listed = conversation("a");
        listed.unread_count = 4;
        conversations.load_conversations(vec![listed, conversation("b")]);
        conversations.seed_unread(Some(6));

        let effect = conversations.load_history(
            "a",
            vec![
                message("m3", "a", PEER, "three"),
                message("m2", "a", ME, "two"),
                message("m1", "a", PEER, "one"),
            ],
        );

        let order: Vec<&str> = conversations.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, vec!["m1", "m2", "m3"]);
        assert_eq!(effect, Effect::MarkRead { conversation_id: "a".into() });
        // Two more are unread somewhere the list does not show
        assert_eq!(conversations.unread_total(), 2);
    }

    #[test]
    fn test_unread_badge_follows_chat() {
        let mut conversations = ConversationReconciler::new(ME);
        let mut listed = conversation("a");
        listed.unread_count = 3;
        conversations.load_conversations(vec![listed, conversation("b")]);
        conversations.seed_unread(None);
        assert_eq!(conversations.unread_total(), 3);

        conversations.load_history("b", vec![]);
        conversations.apply_chat("a", message("m1", "a", PEER, "still there?"));
        conversations.apply_chat("b", message("m2", "b", PEER, "open one"));
        conversations.apply_chat("a", message("m3", "a", ME, "mine"));
        assert_eq!(conversations.unread_total(), 4);

        conversations.load_history("a", vec![]);
        assert_eq!(conversations.unread_total(), 0);
    }

    #[test]
    fn test_peer_chat_appends_and_asks_for_receipt() {
        let mut conversations = opened("a");
        let effect = conversations.apply_chat("a", message("m1", "a", PEER, "hi"));
        assert_eq!(effect, Some(Effect::MarkRead { conversation_id: "a".into() }));

        // Redelivery of the same id changes nothing
        assert_eq!(conversations.apply_chat("a", message("m1", "a", PEER, "hi")), None);
        assert_eq!(conversations.messages().len(), 1);
    }

    #[test]
    fn test_chat_for_other_conversation_only_bumps_summary() {
        let mut conversations = opened("b");
        conversations.apply_chat("b", message("m0", "b", ME, "mine"));

        let effect = conversations.apply_chat("a", message("m1", "a", PEER, "over here"));
        assert_eq!(effect, None);
        assert_eq!(conversations.messages().len(), 1);
        assert!(conversations.messages().iter().all(|m| !m.is_read));

        let summary = conversations.conversation("a").unwrap();
        assert_eq!(summary.unread_count, 1);
        assert_eq!(summary.last_message_content.as_deref(), Some("over here"));
    }

    #[test]
    fn test_own_echo_confirms_pending_in_place() {
        let mut conversations = opened("a");
        conversations.apply_chat("a", message("m1", "a", PEER, "when?"));
        let frame = conversations
            .send_local("on my way", MessageKind::Text, None, Utc::now())
            .unwrap();
        assert_eq!(frame.conversation_id(), "a");
        conversations
            .send_local("ten minutes", MessageKind::Text, None, Utc::now())
            .unwrap();
        assert!(conversations.messages()[1].is_pending());
        assert!(conversations.messages()[1].id.starts_with("local-"));

        let effect = conversations.apply_chat("a", message("srv-9", "a", ME, "on my way"));
        assert_eq!(effect, None);

        let messages = conversations.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].id, "srv-9");
        assert!(!messages[1].is_pending());
        assert!(messages[2].is_pending());
    }

    #[test]
    fn test_own_message_after_later_arrival_is_appended() {
        let mut conversations = opened("a");
        conversations
            .send_local("ok", MessageKind::Text, None, Utc::now())
            .unwrap();
        conversations.apply_chat("a", message("p1", "a", PEER, "see you"));

        // Same text from another device of ours, after the peer's reply
        conversations.apply_chat("a", message("srv-7", "a", ME, "ok"));

        let messages = conversations.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages[0].is_pending());
        assert_eq!(messages[1].id, "p1");
        assert_eq!(messages[2].id, "srv-7");
    }

    #[test]
    fn test_read_receipt_is_bulk_and_monotonic() {
        let mut conversations = opened("a");
        conversations.apply_chat("a", message("m1", "a", ME, "one"));
        conversations.apply_chat("a", message("m2", "a", PEER, "two"));
        conversations.apply_chat("a", message("m3", "a", ME, "three"));

        assert_eq!(conversations.apply_read("a", Some(PEER)), 2);
        assert_eq!(conversations.apply_read("a", None), 0);
        // Our own receipt echoed back flips nothing
        assert_eq!(conversations.apply_read("a", Some(ME)), 0);

        // A redelivered message cannot un-read the stored copy
        let mut stale = message("m1", "a", ME, "one");
        stale.is_read = false;
        conversations.apply_chat("a", stale);

        let read: Vec<bool> = conversations.messages().iter().map(|m| m.is_read).collect();
        assert_eq!(read, vec![true, false, true]);
        assert_eq!(conversations.apply_read("b", Some(PEER)), 0);
    }

    #[test]
    fn test_typing_deadline_rearms_and_fires_once() {
        let mut conversations = opened("a");
        let start = Instant::now();

        assert!(conversations.apply_typing("a", Some(PEER), start));
        assert!(conversations.apply_typing("a", Some(PEER), start + Duration::from_secs(2)));
        // The first ping's deadline has passed but the second re-armed it
        assert!(!conversations.expire_typing(start + Duration::from_secs(3)));
        assert!(conversations.is_peer_typing());

        assert!(conversations.expire_typing(start + Duration::from_secs(5)));
        assert!(!conversations.is_peer_typing());
        assert!(!conversations.expire_typing(start + Duration::from_secs(9)));

        assert!(!conversations.apply_typing("b", Some(PEER), start));
        assert!(!conversations.apply_typing("a", Some(ME), start));
    }

    #[test]
    fn test_close_cancels_typing() {
        let mut conversations = opened("a");
        conversations.apply_typing("a", None, Instant::now());
        assert_eq!(conversations.close().as_deref(), Some("a"));
        assert!(conversations.typing_deadline().is_none());
        assert!(!conversations.expire_typing(Instant::now() + Duration::from_secs(10)));
        assert!(conversations.send_local("x", MessageKind::Text, None, Utc::now()).is_none());
    }

    #[test]
    fn test_set_status() {
        let mut conversations = opened("a");
        assert!(conversations.set_status("a", ConversationStatus::Resolved));
        assert_eq!(conversations.conversation("a").unwrap().status, ConversationStatus::Resolved);
        assert!(!conversations.set_status("zzz", ConversationStatus::Resolved));
    }
}
