use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use morsel_api::{ApiError, RestApi};
use morsel_gateway::{ConnectionManager, FrameHandler, HandlerError, HandlerId};
use morsel_types::api::MessagePage;
use morsel_types::models::{
    ConversationLink, ConversationStatus, FeedFilter, MessageKind, MessageMetadata,
};
use morsel_types::{FrameKind, GatewayEvent};

use crate::activity::{ActivityReconciler, Toast, ToastVariant};
use crate::conversation::{ConversationReconciler, Effect, TYPING_TIMEOUT};
use crate::error::SyncError;
use crate::feed::FeedReconciler;
use crate::outbound::Encoder;

const TOAST_BUFFER: usize = 32;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Id of the signed-in user
    pub user_id: String,
    pub typing_timeout: Duration,
    pub history_page: MessagePage,
}

impl SessionConfig {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            typing_timeout: TYPING_TIMEOUT,
            history_page: MessagePage::default(),
        }
    }
}

/// Everything the UI renders from.
#[derive(Debug)]
pub struct SessionState {
    pub feed: FeedReconciler,
    pub conversations: ConversationReconciler,
    pub activity: ActivityReconciler,
}

impl SessionState {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            feed: FeedReconciler::new(),
            conversations: ConversationReconciler::with_typing_timeout(
                config.user_id.clone(),
                config.typing_timeout,
            ),
            activity: ActivityReconciler::new(),
        }
    }
}

type SharedState = Arc<Mutex<SessionState>>;

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bumped after every state change, so renderers know when to look again.
#[derive(Clone)]
struct Revision(Arc<watch::Sender<u64>>);

impl Revision {
    fn bump(&self) {
        self.0.send_modify(|revision| *revision += 1);
    }
}

fn unexpected(event: &GatewayEvent) -> HandlerError {
    HandlerError::new(format!("unexpected {} event", event.kind()))
}

struct FeedHandler {
    state: SharedState,
    revision: Revision,
}

impl FrameHandler for FeedHandler {
    fn handle(&self, event: &GatewayEvent) -> Result<(), HandlerError> {
        let changed = {
            let mut state = lock(&self.state);
            match event {
                GatewayEvent::FeedPosted(item) => state.feed.apply_broadcast(item.clone()),
                GatewayEvent::FeedExpired { id } => state.feed.apply_expiry(id),
                other => return Err(unexpected(other)),
            }
        };
        if changed {
            self.revision.bump();
        }
        Ok(())
    }
}

struct ConversationHandler {
    state: SharedState,
    revision: Revision,
    effects: mpsc::UnboundedSender<Effect>,
    typing: Arc<watch::Sender<Option<Instant>>>,
}

impl FrameHandler for ConversationHandler {
    fn handle(&self, event: &GatewayEvent) -> Result<(), HandlerError> {
        let mut state = lock(&self.state);
        match event {
            GatewayEvent::ChatMessage {
                conversation_id,
                message,
            } => {
                let effect = state.conversations.apply_chat(conversation_id, message.clone());
                if let Some(effect) = effect {
                    if self.effects.send(effect).is_err() {
                        return Err(HandlerError::new("effect loop stopped"));
                    }
                }
            }
            GatewayEvent::Typing {
                conversation_id,
                user_id,
            } => {
                let now = Instant::now();
                if state.conversations.apply_typing(conversation_id, user_id.as_deref(), now) {
                    self.typing.send_replace(state.conversations.typing_deadline());
                }
            }
            GatewayEvent::ReadReceipt {
                conversation_id,
                user_id,
            } => {
                let flipped = state.conversations.apply_read(conversation_id, user_id.as_deref());
                trace!(conversation_id = %conversation_id, flipped, "Read receipt applied");
            }
            other => return Err(unexpected(other)),
        }
        drop(state);
        self.revision.bump();
        Ok(())
    }
}

struct ActivityHandler {
    state: SharedState,
    revision: Revision,
    toasts: broadcast::Sender<Toast>,
}

impl FrameHandler for ActivityHandler {
    fn handle(&self, event: &GatewayEvent) -> Result<(), HandlerError> {
        let toast = {
            let mut state = lock(&self.state);
            match event {
                GatewayEvent::RequestCreated { request } => {
                    state.activity.on_request_created(request);
                    None
                }
                GatewayEvent::RequestUpdated {
                    request,
                    conversation_id,
                } => state
                    .activity
                    .on_request_updated(request, conversation_id.as_deref()),
                GatewayEvent::Notification(notification) => {
                    state.activity.on_notification(notification.clone());
                    None
                }
                other => return Err(unexpected(other)),
            }
        };
        self.revision.bump();

        if let Some(toast) = toast {
            // Nobody listening is fine
            let _ = self.toasts.send(toast);
        }
        Ok(())
    }
}

/// One signed-in user's real-time state.
///
/// Wires the reconcilers to the connection, runs their side effects and
/// exposes the result for rendering. Dropping the session unregisters its
/// handlers and stops its tasks; the connection itself is left to its owner.
pub struct Session<A: RestApi> {
    config: SessionConfig,
    api: Arc<A>,
    manager: ConnectionManager,
    encoder: Encoder,
    state: SharedState,
    revision: Revision,
    effects: mpsc::UnboundedSender<Effect>,
    typing: Arc<watch::Sender<Option<Instant>>>,
    toasts: broadcast::Sender<Toast>,
    handlers: Vec<HandlerId>,
    tasks: Vec<JoinHandle<()>>,
}

impl<A: RestApi> Session<A> {
    pub fn start(config: SessionConfig, manager: ConnectionManager, api: Arc<A>) -> Self {
        let state = Arc::new(Mutex::new(SessionState::new(&config)));
        let (revision_tx, _) = watch::channel(0);
        let revision = Revision(Arc::new(revision_tx));
        let (typing_tx, typing_rx) = watch::channel(None);
        let typing = Arc::new(typing_tx);
        let (toasts, _) = broadcast::channel(TOAST_BUFFER);
        let (effects_tx, effects_rx) = mpsc::unbounded_channel();
        let encoder = Encoder::new(manager.clone());

        let handlers = vec![
            manager.add_handler(
                &[
                    FrameKind::FoodPost,
                    FrameKind::HungerBroadcast,
                    FrameKind::HungerBroadcastExpired,
                ],
                FeedHandler {
                    state: state.clone(),
                    revision: revision.clone(),
                },
            ),
            manager.add_handler(
                &[FrameKind::Chat, FrameKind::Typing, FrameKind::Read],
                ConversationHandler {
                    state: state.clone(),
                    revision: revision.clone(),
                    effects: effects_tx.clone(),
                    typing: typing.clone(),
                },
            ),
            manager.add_handler(
                &[
                    FrameKind::RequestCreated,
                    FrameKind::RequestUpdated,
                    FrameKind::Notification,
                ],
                ActivityHandler {
                    state: state.clone(),
                    revision: revision.clone(),
                    toasts: toasts.clone(),
                },
            ),
            manager.add_handler(
                &[FrameKind::Error],
                |event: &GatewayEvent| -> Result<(), HandlerError> {
                    if let GatewayEvent::ServerError { message } = event {
                        warn!(error = %message, "Server reported an error");
                    }
                    Ok(())
                },
            ),
        ];

        let tasks = vec![
            tokio::spawn(run_effects(api.clone(), encoder.clone(), effects_rx)),
            tokio::spawn(run_typing_timer(state.clone(), revision.clone(), typing_rx)),
        ];

        debug!(user_id = %config.user_id, "Session started");
        Self {
            config,
            api,
            manager,
            encoder,
            state,
            revision,
            effects: effects_tx,
            typing,
            toasts,
            handlers,
            tasks,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Seed feed, conversation list, notifications and badges from REST.
    /// Each failure is logged and leaves its part empty or zero.
    pub async fn bootstrap(&self) {
        let (feed, conversations, unread, notifications, pending, unviewed) = tokio::join!(
            self.api.feed(FeedFilter::All),
            self.api.conversations(),
            self.api.unread_message_count(),
            self.api.notifications(),
            self.api.pending_requests_count(),
            self.api.unviewed_requests_count(),
        );

        {
            let mut state = lock(&self.state);
            if let Some(items) = logged("feed snapshot", feed) {
                state.feed.load_snapshot(items);
            }
            if let Some(list) = logged("conversation list", conversations) {
                state.conversations.load_conversations(list);
            }
            state
                .conversations
                .seed_unread(logged("unread message count", unread));
            if let Some(list) = logged("notifications", notifications) {
                state.activity.load_notifications(list);
            }
            state.activity.seed_counts(
                logged("pending request count", pending),
                logged("unviewed request count", unviewed),
            );
            info!(
                feed = state.feed.len(),
                conversations = state.conversations.conversations().len(),
                unread_messages = state.conversations.unread_total(),
                unread_notifications = state.activity.unread_notifications(),
                pending_requests = state.activity.pending_requests(),
                "Session bootstrapped"
            );
        }
        self.revision.bump();
    }

    /// Replace the feed with a fresh snapshot for one tab.
    pub async fn refresh_feed(&self, filter: FeedFilter) -> Result<(), SyncError> {
        let items = self.api.feed(filter).await?;
        lock(&self.state).feed.load_snapshot(items);
        self.revision.bump();
        Ok(())
    }

    /// Load a conversation's history and make it the open one.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<(), SyncError> {
        let history = self
            .api
            .messages(conversation_id, self.config.history_page)
            .await?;

        let effect = lock(&self.state)
            .conversations
            .load_history(conversation_id, history);
        self.typing.send_replace(None);
        self.revision.bump();

        if self.effects.send(effect).is_err() {
            warn!(conversation_id, "Effect loop stopped, not marking read");
        }
        Ok(())
    }

    pub fn close_conversation(&self) {
        if let Some(id) = lock(&self.state).conversations.close() {
            debug!(conversation_id = %id, "Conversation closed");
        }
        self.typing.send_replace(None);
        self.revision.bump();
    }

    /// Optimistic send into the open conversation.
    pub fn send_message(
        &self,
        content: &str,
        kind: MessageKind,
        metadata: Option<MessageMetadata>,
    ) -> Result<(), SyncError> {
        let command = lock(&self.state)
            .conversations
            .send_local(content, kind, metadata, Utc::now())
            .ok_or(SyncError::NoOpenConversation)?;
        self.revision.bump();
        self.encoder.send(command)?;
        Ok(())
    }

    pub fn send_typing(&self) -> Result<(), SyncError> {
        let conversation_id = self
            .with_state(|state| state.conversations.open_id().map(str::to_string))
            .ok_or(SyncError::NoOpenConversation)?;
        self.encoder.send_typing(&conversation_id)?;
        Ok(())
    }

    pub async fn mark_notification_read(&self, id: &str) -> Result<(), SyncError> {
        lock(&self.state).activity.mark_read(id);
        self.revision.bump();
        self.api.mark_notification_read(id).await?;
        Ok(())
    }

    /// Page-visit side effect of "My Requests".
    pub async fn visit_my_requests(&self) {
        lock(&self.state).activity.visit_my_requests();
        self.revision.bump();
        if let Err(e) = self.api.mark_my_requests_viewed().await {
            warn!(error = %e, "Failed to mark requests viewed");
        }
    }

    /// Accept a request on one of the local user's posts. Returns the
    /// conversation opened for it.
    pub async fn accept_request(
        &self,
        post_id: &str,
        request_id: &str,
    ) -> Result<Option<String>, SyncError> {
        Ok(self.api.accept_request(post_id, request_id).await?)
    }

    pub async fn reject_request(&self, post_id: &str, request_id: &str) -> Result<(), SyncError> {
        Ok(self.api.reject_request(post_id, request_id).await?)
    }

    /// Delete one of the local user's food posts. The feed entry goes only
    /// once the server agreed.
    pub async fn delete_food_post(&self, id: &str) -> Result<(), SyncError> {
        self.api.delete_food_post(id).await?;
        lock(&self.state).feed.remove(id);
        self.revision.bump();
        debug!(post_id = id, "Food post deleted");
        Ok(())
    }

    /// Resolve one of the local user's hunger broadcasts: it leaves the feed
    /// and every conversation about it is marked resolved.
    pub async fn resolve_hunger_broadcast(&self, id: &str) -> Result<(), SyncError> {
        if let Err(e) = self.api.resolve_hunger_broadcast(id).await {
            self.toast(Toast {
                title: "Failed to resolve".to_string(),
                description: e.to_string(),
                variant: ToastVariant::Destructive,
                action: None,
            });
            return Err(e.into());
        }

        {
            let mut state = lock(&self.state);
            state.feed.remove(id);
            let link = ConversationLink::HungerBroadcast(id.to_string());
            let linked: Vec<String> = state
                .conversations
                .conversations()
                .iter()
                .filter(|c| c.link == link)
                .map(|c| c.id.clone())
                .collect();
            for conversation_id in &linked {
                state
                    .conversations
                    .set_status(conversation_id, ConversationStatus::Resolved);
            }
            debug!(broadcast_id = id, conversations = linked.len(), "Hunger broadcast resolved");
        }
        self.revision.bump();

        self.toast(Toast {
            title: "Broadcast resolved".to_string(),
            description: "Your hunger broadcast has been marked as resolved.".to_string(),
            variant: ToastVariant::Default,
            action: None,
        });
        Ok(())
    }

    /// Read the current state under the lock.
    pub fn with_state<R>(&self, read: impl FnOnce(&SessionState) -> R) -> R {
        read(&lock(&self.state))
    }

    /// Revision counter, bumped after every change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.0.subscribe()
    }

    pub fn toasts(&self) -> broadcast::Receiver<Toast> {
        self.toasts.subscribe()
    }

    fn toast(&self, toast: Toast) {
        // Nobody listening is fine
        let _ = self.toasts.send(toast);
    }

    pub fn latest_event(&self) -> watch::Receiver<Option<GatewayEvent>> {
        self.manager.latest()
    }

    /// Sign-out: drop the socket and its queue, leave the open conversation.
    pub fn logout(&self) {
        self.manager.disconnect();
        self.close_conversation();
        info!(user_id = %self.config.user_id, "Logged out");
    }
}

impl<A: RestApi> Drop for Session<A> {
    fn drop(&mut self) {
        for id in self.handlers.drain(..) {
            self.manager.remove_handler(id);
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

fn logged<T>(what: &str, result: Result<T, ApiError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Could not load {what}");
            None
        }
    }
}

/// Runs effects in order. Failures are logged; local state is never rolled
/// back and nothing is retried.
async fn run_effects<A: RestApi>(
    api: Arc<A>,
    encoder: Encoder,
    mut effects: mpsc::UnboundedReceiver<Effect>,
) {
    while let Some(effect) = effects.recv().await {
        match effect {
            Effect::MarkRead { conversation_id } => {
                if let Err(e) = api.mark_messages_read(&conversation_id).await {
                    warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Failed to mark conversation read"
                    );
                }
                if let Err(e) = encoder.send_read_receipt(&conversation_id) {
                    warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Failed to send read receipt"
                    );
                }
            }
        }
    }
}

/// Sleeps until the current typing deadline and clears the flag. A new
/// deadline replaces the pending one.
async fn run_typing_timer(
    state: SharedState,
    revision: Revision,
    mut deadlines: watch::Receiver<Option<Instant>>,
) {
    loop {
        let deadline = *deadlines.borrow_and_update();
        if let Some(deadline) = deadline {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    let expired = lock(&state).conversations.expire_typing(Instant::now());
                    if expired {
                        trace!("Peer stopped typing");
                        revision.bump();
                    }
                }
                changed = deadlines.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }
        if deadlines.changed().await.is_err() {
            break;
        }
    }
}
