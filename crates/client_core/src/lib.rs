//! Real-time client core for the social network: one persistent
//! session multiplexing direct messages, per-conversation delete
//! topics, feed updates, and notification pushes, reconciled into a
//! single client-side cache exposed as read models.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use shared::{
    domain::{ConversationId, MessageId, NotificationId},
    error::ApiError,
    protocol::{ChatCommand, Conversation, Message, Notification, PostResponse, UserProfile},
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

pub mod channels;
pub mod commands;
pub mod config;
pub mod notifications;
pub mod rest;
pub mod store;
pub mod transport;

pub use channels::{ChannelKind, ChannelMultiplexer, InboundEvent, SubscribeOutcome};
pub use commands::{LocalFile, SendError, SendMessageRequest, SendTarget};
pub use config::ClientConfig;
pub use notifications::NotificationFeed;
pub use rest::{ChatApi, HttpChatApi};
pub use store::{ChatStore, MessageOutcome, PendingRecipient};
pub use transport::{ConnectionState, SessionTransport, TransportError, TransportEvent};

use commands::{build_delete_command, build_send_command, optimistic_echo};

/// A message can beat its conversation's metadata to the client; the
/// fetch retries on a fixed delay instead of assuming the server has
/// committed by some deadline.
const CONVERSATION_FETCH_RETRY_ATTEMPTS: usize = 5;
const CONVERSATION_FETCH_RETRY_DELAY: Duration = Duration::from_millis(400);

/// Read-model change notifications for the UI layer. No payload
/// carries cache state; consumers re-read through the snapshot
/// accessors.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    SessionState(ConnectionState),
    ConversationsChanged,
    MessagesChanged(ConversationId),
    UnreadChanged,
    NotificationsChanged,
    FeedPost(PostResponse),
    PendingRecipientResolved(ConversationId),
    Error(String),
}

#[derive(Default)]
struct ClientInner {
    inflight_conversation_fetches: HashSet<ConversationId>,
}

pub struct ChatClient {
    config: ClientConfig,
    custom_api: bool,
    api: Mutex<Option<Arc<dyn ChatApi>>>,
    transport: Arc<SessionTransport>,
    mux: ChannelMultiplexer,
    store: Mutex<ChatStore>,
    notification_feed: Mutex<NotificationFeed>,
    inner: Mutex<ClientInner>,
    /// Bumped on every session start and teardown; background fetches
    /// carry the epoch they were spawned under and their results are
    /// discarded once it no longer matches.
    epoch: AtomicU64,
    transport_events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    events: broadcast::Sender<ClientEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Arc<Self> {
        Self::build(config, None)
    }

    /// Injection point for a non-HTTP collaborator; the injected
    /// implementation survives session restarts.
    pub fn new_with_api(config: ClientConfig, api: Arc<dyn ChatApi>) -> Arc<Self> {
        Self::build(config, Some(api))
    }

    fn build(config: ClientConfig, api: Option<Arc<dyn ChatApi>>) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let transport = SessionTransport::with_reconnect_delay(
            config.ws_url.clone(),
            transport_tx,
            config.reconnect_delay,
        );
        let mux = ChannelMultiplexer::new(Arc::clone(&transport));
        Arc::new(Self {
            custom_api: api.is_some(),
            api: Mutex::new(api),
            config,
            transport,
            mux,
            store: Mutex::new(ChatStore::new()),
            notification_feed: Mutex::new(NotificationFeed::new()),
            inner: Mutex::new(ClientInner::default()),
            epoch: AtomicU64::new(0),
            transport_events: Mutex::new(Some(transport_rx)),
            events,
            pump: Mutex::new(None),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Opens the logical session: store init, transport connect, the
    /// three per-user inbox subscriptions, and the initial read-model
    /// loads. Initial load failures degrade the session rather than
    /// aborting it.
    pub async fn start_session(
        self: &Arc<Self>,
        credential: &str,
        current_user: UserProfile,
    ) -> Result<(), TransportError> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        {
            let mut store = self.store.lock().await;
            store.reset();
            store.set_current_user(current_user);
        }
        self.notification_feed.lock().await.reset();

        if !self.custom_api {
            let mut api = self.api.lock().await;
            *api = Some(Arc::new(HttpChatApi::new(&self.config.api_url, credential)));
        }

        self.spawn_event_pump().await;
        self.transport.connect(credential).await?;

        // Deferred until the transport reports Connected, then replayed.
        self.mux.subscribe_private_inbox().await;
        self.mux.subscribe_feed().await;
        self.mux.subscribe_notifications().await;

        if let Err(err) = self.refresh_conversations().await {
            warn!("initial conversation load failed: {err:#}");
            let _ = self
                .events
                .send(ClientEvent::Error(format!("conversation load failed: {err:#}")));
        }
        if let Err(err) = self.refresh_unread_count().await {
            warn!("initial unread-count load failed: {err:#}");
        }
        Ok(())
    }

    /// Logout teardown: transport disconnect plus a full cache reset.
    /// The epoch bump fences any in-flight background fetch out of the
    /// reset store.
    pub async fn shutdown(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.transport.disconnect().await;
        self.store.lock().await.reset();
        self.notification_feed.lock().await.reset();
        self.inner.lock().await.inflight_conversation_fetches.clear();
        if !self.custom_api {
            *self.api.lock().await = None;
        }
        let _ = self
            .events
            .send(ClientEvent::SessionState(ConnectionState::Disconnected));
    }

    async fn api(&self) -> Result<Arc<dyn ChatApi>> {
        self.api
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("no active session"))
    }

    async fn spawn_event_pump(self: &Arc<Self>) {
        let mut pump = self.pump.lock().await;
        if pump.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let Some(mut rx) = self.transport_events.lock().await.take() else {
            return;
        };
        let client = Arc::clone(self);
        *pump = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    TransportEvent::Connected => {
                        let _ = client
                            .events
                            .send(ClientEvent::SessionState(ConnectionState::Connected));
                        client.mux.resubscribe_all().await;
                    }
                    TransportEvent::Disconnected => {
                        let _ = client
                            .events
                            .send(ClientEvent::SessionState(client.transport.state()));
                    }
                    TransportEvent::Frame { destination, body } => {
                        if let Some(inbound) = ChannelMultiplexer::route(&destination, body) {
                            client.handle_inbound(inbound).await;
                        }
                    }
                }
            }
        }));
    }

    async fn handle_inbound(self: &Arc<Self>, event: InboundEvent) {
        match event {
            InboundEvent::Message(message) => self.handle_incoming_message(message).await,
            InboundEvent::MessageDeleted(event) => {
                let changed = self
                    .store
                    .lock()
                    .await
                    .apply_delete(&event.conversation_id, &event.message_id);
                if changed {
                    let _ = self
                        .events
                        .send(ClientEvent::MessagesChanged(event.conversation_id));
                }
            }
            InboundEvent::FeedPost(post) => {
                let _ = self.events.send(ClientEvent::FeedPost(post));
            }
            InboundEvent::Notification(notification) => {
                let inserted = self.notification_feed.lock().await.apply_new(notification);
                if inserted {
                    let _ = self.events.send(ClientEvent::NotificationsChanged);
                    let _ = self.events.send(ClientEvent::UnreadChanged);
                }
            }
        }
    }

    async fn handle_incoming_message(self: &Arc<Self>, message: Message) {
        let conversation_id = message.conversation_id.clone();
        let outcome = self.store.lock().await.apply_incoming_message(message);

        let _ = self
            .events
            .send(ClientEvent::MessagesChanged(conversation_id.clone()));
        if outcome.marked_unread {
            let _ = self.events.send(ClientEvent::UnreadChanged);
        }

        if outcome.conversation_known {
            let _ = self.events.send(ClientEvent::ConversationsChanged);
        } else {
            // First message of a conversation the list has not seen:
            // the append above already made it visible, the metadata
            // fetch fills in the sidebar entry.
            self.spawn_conversation_fetch(conversation_id).await;
        }
    }

    async fn spawn_conversation_fetch(self: &Arc<Self>, conversation_id: ConversationId) {
        {
            let mut inner = self.inner.lock().await;
            if !inner
                .inflight_conversation_fetches
                .insert(conversation_id.clone())
            {
                return;
            }
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let result = client.fetch_conversation_with_retry(&conversation_id).await;
            client
                .inner
                .lock()
                .await
                .inflight_conversation_fetches
                .remove(&conversation_id);
            if client.epoch.load(Ordering::SeqCst) != epoch {
                info!(
                    conversation_id = %conversation_id,
                    "discarding conversation fetch from an ended session"
                );
                return;
            }
            match result {
                Ok(conversation) => client.adopt_conversation(conversation).await,
                Err(err) => {
                    // Accepted degraded state: the message stays
                    // visible; the sidebar entry waits for the next
                    // successful list refresh.
                    warn!(
                        conversation_id = %conversation_id,
                        "conversation metadata fetch failed: {err:#}"
                    );
                    let _ = client.events.send(ClientEvent::Error(format!(
                        "failed to fetch conversation {conversation_id}: {err:#}"
                    )));
                }
            }
        });
    }

    async fn fetch_conversation_with_retry(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Conversation> {
        let api = self.api().await?;
        let mut last_err = None;
        for attempt in 0..CONVERSATION_FETCH_RETRY_ATTEMPTS {
            match api.conversation(conversation_id).await {
                Ok(conversation) => return Ok(conversation),
                Err(err) => {
                    // A definitive not-found will not heal on retry.
                    if err
                        .downcast_ref::<ApiError>()
                        .is_some_and(ApiError::is_not_found)
                    {
                        return Err(err);
                    }
                    info!(
                        conversation_id = %conversation_id,
                        attempt = attempt + 1,
                        max_attempts = CONVERSATION_FETCH_RETRY_ATTEMPTS,
                        "conversation fetch attempt failed: {err:#}"
                    );
                    last_err = Some(err);
                }
            }
            if attempt + 1 < CONVERSATION_FETCH_RETRY_ATTEMPTS {
                tokio::time::sleep(CONVERSATION_FETCH_RETRY_DELAY).await;
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("conversation fetch failed")))
    }

    async fn adopt_conversation(self: &Arc<Self>, conversation: Conversation) {
        let conversation_id = conversation.id.clone();
        self.store.lock().await.upsert_conversation(conversation);
        let _ = self.events.send(ClientEvent::ConversationsChanged);
        self.enrich_conversation_display(&conversation_id).await;
        self.resolve_pending_recipient().await;
    }

    async fn resolve_pending_recipient(self: &Arc<Self>) {
        let resolved = self.store.lock().await.take_resolved_pending_recipient();
        let Some(conversation_id) = resolved else {
            return;
        };
        let _ = self
            .events
            .send(ClientEvent::PendingRecipientResolved(conversation_id.clone()));
        if let Err(err) = self.select_conversation(conversation_id.clone()).await {
            warn!(
                conversation_id = %conversation_id,
                "selecting resolved conversation failed: {err:#}"
            );
        }
    }

    /// Loads (or refreshes) the first conversation page.
    pub async fn refresh_conversations(self: &Arc<Self>) -> Result<()> {
        let api = self.api().await?;
        let page = api
            .conversations(None, self.config.conversation_page_size)
            .await?;
        self.store
            .lock()
            .await
            .append_older_conversations(page, self.config.conversation_page_size);
        let _ = self.events.send(ClientEvent::ConversationsChanged);
        self.enrich_visible_conversations().await;
        self.resolve_pending_recipient().await;
        Ok(())
    }

    pub async fn load_older_conversations(self: &Arc<Self>) -> Result<()> {
        let cursor = {
            let store = self.store.lock().await;
            if !store.has_more_conversations() {
                return Ok(());
            }
            store
                .conversations()
                .last()
                .map(|c| format!("{}_{}", c.updated_at.to_rfc3339(), c.id))
        };
        let api = self.api().await?;
        let page = api
            .conversations(cursor.as_deref(), self.config.conversation_page_size)
            .await?;
        self.store
            .lock()
            .await
            .append_older_conversations(page, self.config.conversation_page_size);
        let _ = self.events.send(ClientEvent::ConversationsChanged);
        self.resolve_pending_recipient().await;
        Ok(())
    }

    /// Selection is also the trigger for the topic subscription, the
    /// optimistic unread clear, the server mark-read round trip, and
    /// the first message-page load.
    pub async fn select_conversation(
        self: &Arc<Self>,
        conversation_id: ConversationId,
    ) -> Result<()> {
        let needs_initial_page = {
            let mut store = self.store.lock().await;
            store.select_conversation(Some(conversation_id.clone()));
            store.messages(&conversation_id).is_empty()
        };
        let _ = self.events.send(ClientEvent::UnreadChanged);

        self.mux
            .subscribe_conversation_topic(conversation_id.clone())
            .await;

        // Read-state authority is the server; the local clear above is
        // the optimistic mirror.
        let api = self.api().await?;
        match api.mark_conversation_read(&conversation_id).await {
            Ok(()) => {
                let affected = self
                    .notification_feed
                    .lock()
                    .await
                    .mark_conversation_read(&conversation_id);
                if affected > 0 {
                    let _ = self.events.send(ClientEvent::NotificationsChanged);
                    let _ = self.events.send(ClientEvent::UnreadChanged);
                }
            }
            Err(err) => {
                warn!(conversation_id = %conversation_id, "mark-read round trip failed: {err:#}");
            }
        }

        if needs_initial_page {
            self.load_message_page(conversation_id.clone(), None).await?;
        }
        self.enrich_conversation_display(&conversation_id).await;
        Ok(())
    }

    /// Clears selection and the pending intent when the user leaves
    /// the chat view.
    pub async fn leave_chat_view(&self) {
        {
            let mut store = self.store.lock().await;
            store.set_pending_recipient(None);
            store.select_conversation(None);
        }
        self.mux.unsubscribe_conversation_topic().await;
    }

    /// Navigation carried a target user but no conversation exists
    /// yet. If one already does, select it; otherwise park the intent
    /// until a matching ONE_TO_ONE conversation appears.
    pub async fn open_chat_with(self: &Arc<Self>, user: UserProfile) -> Result<()> {
        let existing = {
            let mut store = self.store.lock().await;
            match store.find_one_to_one_with(&user.id).cloned() {
                Some(id) => Some(id),
                None => {
                    store.set_pending_recipient(Some(PendingRecipient {
                        id: user.id.clone(),
                        name: user.name.clone(),
                        avatar_url: user.avatar_url.clone(),
                    }));
                    store.select_conversation(None);
                    None
                }
            }
        };
        match existing {
            Some(id) => self.select_conversation(id).await,
            None => Ok(()),
        }
    }

    pub async fn load_older_messages(self: &Arc<Self>) -> Result<()> {
        let (conversation_id, cursor) = {
            let store = self.store.lock().await;
            let Some(selected) = store.selected_conversation().cloned() else {
                return Ok(());
            };
            if !store.has_more_messages(&selected) {
                return Ok(());
            }
            let cursor = store.messages(&selected).first().map(|m| m.id.to_string());
            (selected, cursor)
        };
        self.load_message_page(conversation_id, cursor).await
    }

    async fn load_message_page(
        &self,
        conversation_id: ConversationId,
        cursor: Option<String>,
    ) -> Result<()> {
        let api = self.api().await?;
        let page = api
            .messages(
                &conversation_id,
                cursor.as_deref(),
                self.config.message_page_size,
            )
            .await?;

        {
            let mut store = self.store.lock().await;
            // The selection may have moved while this fetch was in
            // flight; a stale page must not corrupt the newly-selected
            // conversation's sequence.
            if store.selected_conversation() != Some(&conversation_id) {
                info!(conversation_id = %conversation_id, "discarding stale message page");
                return Ok(());
            }
            if cursor.is_none() {
                store.set_messages(&conversation_id, page, self.config.message_page_size);
            } else {
                store.prepend_older_messages(&conversation_id, page, self.config.message_page_size);
            }
        }
        let _ = self.events.send(ClientEvent::MessagesChanged(conversation_id));
        Ok(())
    }

    /// Two-phase send: attachments first, then the publish. An upload
    /// failure aborts before anything is published; the publish itself
    /// is fire-and-forget, confirmed only by the echo on the private
    /// inbox.
    pub async fn send_message(
        self: &Arc<Self>,
        request: SendMessageRequest,
    ) -> Result<(), SendError> {
        let api = self.api().await.map_err(|_| SendError::NoSession)?;
        let payload = build_send_command(api.as_ref(), request).await?;

        let me = { self.store.lock().await.current_user().cloned() };
        if let Some(me) = me {
            if let Some(echo) = optimistic_echo(&payload, &me.id) {
                let conversation_id = echo.conversation_id.clone();
                self.store.lock().await.insert_optimistic(echo);
                let _ = self
                    .events
                    .send(ClientEvent::MessagesChanged(conversation_id));
                let _ = self.events.send(ClientEvent::ConversationsChanged);
            }
        }

        self.publish_command(ChatCommand::SendMessage(payload)).await;
        Ok(())
    }

    /// Publish only; the local soft delete happens when the topic
    /// event comes back, so a rejected request cannot diverge the cache.
    pub async fn delete_message(self: &Arc<Self>, message_id: MessageId) {
        self.publish_command(ChatCommand::DeleteMessage(build_delete_command(message_id)))
            .await;
    }

    async fn publish_command(&self, command: ChatCommand) {
        match command.body() {
            Ok(body) => self.transport.publish(command.destination(), body).await,
            Err(err) => warn!("failed to encode outbound command: {err}"),
        }
    }

    pub async fn load_notifications(self: &Arc<Self>, page: u32) -> Result<()> {
        let api = self.api().await?;
        let response = api
            .notifications(page, self.config.notification_page_size)
            .await?;
        {
            let mut feed = self.notification_feed.lock().await;
            if page == 0 {
                feed.set_notifications(response.content);
            } else {
                feed.append_older(response.content);
            }
        }
        let _ = self.events.send(ClientEvent::NotificationsChanged);
        Ok(())
    }

    pub async fn refresh_unread_count(self: &Arc<Self>) -> Result<()> {
        let api = self.api().await?;
        let count = api.unread_count().await?;
        self.notification_feed.lock().await.set_unread_count(count);
        let _ = self.events.send(ClientEvent::UnreadChanged);
        Ok(())
    }

    pub async fn mark_notification_read(self: &Arc<Self>, id: NotificationId) -> Result<()> {
        let api = self.api().await?;
        api.mark_notification_read(&id).await?;
        if self.notification_feed.lock().await.mark_read(&id) {
            let _ = self.events.send(ClientEvent::NotificationsChanged);
            let _ = self.events.send(ClientEvent::UnreadChanged);
        }
        Ok(())
    }

    pub async fn mark_all_notifications_read(self: &Arc<Self>) -> Result<()> {
        let api = self.api().await?;
        api.mark_all_notifications_read().await?;
        self.notification_feed.lock().await.mark_all_read();
        let _ = self.events.send(ClientEvent::NotificationsChanged);
        let _ = self.events.send(ClientEvent::UnreadChanged);
        Ok(())
    }

    async fn enrich_visible_conversations(self: &Arc<Self>) {
        let ids: Vec<ConversationId> = {
            let store = self.store.lock().await;
            store.conversations().iter().map(|c| c.id.clone()).collect()
        };
        for id in ids {
            self.enrich_conversation_display(&id).await;
        }
    }

    async fn enrich_conversation_display(&self, conversation_id: &ConversationId) {
        let peer = {
            let store = self.store.lock().await;
            store.display_profile_needed(conversation_id)
        };
        let Some(peer) = peer else {
            return;
        };

        let cached = {
            let store = self.store.lock().await;
            store.cached_user(&peer).cloned()
        };
        let profile = match cached {
            Some(profile) => profile,
            None => {
                let Ok(api) = self.api().await else {
                    return;
                };
                match api.user_profile(&peer).await {
                    Ok(profile) => profile,
                    Err(err) => {
                        warn!(user_id = %peer, "profile fetch for display failed: {err:#}");
                        return;
                    }
                }
            }
        };

        let changed = self
            .store
            .lock()
            .await
            .apply_display_profile(conversation_id, &profile);
        if changed {
            let _ = self.events.send(ClientEvent::ConversationsChanged);
        }
    }

    // Snapshot read models; no caller mutates the cache directly.

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.store.lock().await.conversations().to_vec()
    }

    pub async fn messages_for(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.store.lock().await.messages(conversation_id).to_vec()
    }

    pub async fn is_conversation_unread(&self, conversation_id: &ConversationId) -> bool {
        self.store
            .lock()
            .await
            .is_conversation_unread(conversation_id)
    }

    pub async fn selected_conversation_id(&self) -> Option<ConversationId> {
        self.store.lock().await.selected_conversation().cloned()
    }

    pub async fn pending_recipient(&self) -> Option<PendingRecipient> {
        self.store.lock().await.pending_recipient().cloned()
    }

    pub async fn has_more_messages(&self, conversation_id: &ConversationId) -> bool {
        self.store.lock().await.has_more_messages(conversation_id)
    }

    pub async fn has_more_conversations(&self) -> bool {
        self.store.lock().await.has_more_conversations()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.notification_feed.lock().await.notifications().to_vec()
    }

    pub async fn unread_notification_count(&self) -> u64 {
        self.notification_feed.lock().await.unread_count()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
