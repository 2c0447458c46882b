//! Channel multiplexer: maps logical channels onto subscriptions over
//! the single transport and routes inbound frames to typed events.

use std::sync::Arc;

use serde_json::Value;
use shared::{
    domain::ConversationId,
    protocol::{
        ClientFrame, DeleteMessageEvent, Message, Notification, PostResponse,
        CONVERSATION_TOPIC_PREFIX, FEED_DESTINATION, NOTIFICATION_DESTINATION,
        PRIVATE_INBOX_DESTINATION,
    },
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::transport::SessionTransport;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    PrivateInbox,
    ConversationTopic(ConversationId),
    FeedBroadcast,
    NotificationInbox,
}

impl ChannelKind {
    pub fn destination(&self) -> String {
        match self {
            Self::PrivateInbox => PRIVATE_INBOX_DESTINATION.to_string(),
            Self::ConversationTopic(id) => format!("{CONVERSATION_TOPIC_PREFIX}{id}"),
            Self::FeedBroadcast => FEED_DESTINATION.to_string(),
            Self::NotificationInbox => NOTIFICATION_DESTINATION.to_string(),
        }
    }
}

/// Outcome of a subscribe call. Requests issued before the transport is
/// connected are registered and replayed on connect rather than
/// silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Sent,
    DeferredUntilConnect,
    AlreadySubscribed,
}

#[derive(Debug, Clone)]
pub enum InboundEvent {
    Message(Message),
    MessageDeleted(DeleteMessageEvent),
    FeedPost(PostResponse),
    Notification(Notification),
}

#[derive(Default)]
struct SubscriptionSet {
    private_inbox: bool,
    feed: bool,
    notifications: bool,
    conversation_topic: Option<ConversationId>,
}

impl SubscriptionSet {
    fn channels(&self) -> Vec<ChannelKind> {
        let mut channels = Vec::new();
        if self.private_inbox {
            channels.push(ChannelKind::PrivateInbox);
        }
        if self.feed {
            channels.push(ChannelKind::FeedBroadcast);
        }
        if self.notifications {
            channels.push(ChannelKind::NotificationInbox);
        }
        if let Some(id) = &self.conversation_topic {
            channels.push(ChannelKind::ConversationTopic(id.clone()));
        }
        channels
    }
}

pub struct ChannelMultiplexer {
    transport: Arc<SessionTransport>,
    subscriptions: Mutex<SubscriptionSet>,
}

impl ChannelMultiplexer {
    pub fn new(transport: Arc<SessionTransport>) -> Self {
        Self {
            transport,
            subscriptions: Mutex::new(SubscriptionSet::default()),
        }
    }

    pub async fn subscribe_private_inbox(&self) -> SubscribeOutcome {
        let mut subs = self.subscriptions.lock().await;
        if subs.private_inbox {
            return SubscribeOutcome::AlreadySubscribed;
        }
        subs.private_inbox = true;
        drop(subs);
        self.try_subscribe(ChannelKind::PrivateInbox).await
    }

    pub async fn subscribe_feed(&self) -> SubscribeOutcome {
        let mut subs = self.subscriptions.lock().await;
        if subs.feed {
            return SubscribeOutcome::AlreadySubscribed;
        }
        subs.feed = true;
        drop(subs);
        self.try_subscribe(ChannelKind::FeedBroadcast).await
    }

    pub async fn subscribe_notifications(&self) -> SubscribeOutcome {
        let mut subs = self.subscriptions.lock().await;
        if subs.notifications {
            return SubscribeOutcome::AlreadySubscribed;
        }
        subs.notifications = true;
        drop(subs);
        self.try_subscribe(ChannelKind::NotificationInbox).await
    }

    /// At most one conversation topic is active at a time: the user is
    /// viewing one conversation. Subscribing to a new one tears down
    /// the previous subscription first.
    pub async fn subscribe_conversation_topic(
        &self,
        conversation_id: ConversationId,
    ) -> SubscribeOutcome {
        let mut subs = self.subscriptions.lock().await;
        if subs.conversation_topic.as_ref() == Some(&conversation_id) {
            return SubscribeOutcome::AlreadySubscribed;
        }
        if let Some(previous) = subs.conversation_topic.take() {
            self.send_unsubscribe(ChannelKind::ConversationTopic(previous))
                .await;
        }
        subs.conversation_topic = Some(conversation_id.clone());
        drop(subs);
        self.try_subscribe(ChannelKind::ConversationTopic(conversation_id))
            .await
    }

    pub async fn unsubscribe_conversation_topic(&self) {
        let previous = self.subscriptions.lock().await.conversation_topic.take();
        if let Some(id) = previous {
            self.send_unsubscribe(ChannelKind::ConversationTopic(id))
                .await;
        }
    }

    pub async fn active_conversation_topic(&self) -> Option<ConversationId> {
        self.subscriptions.lock().await.conversation_topic.clone()
    }

    /// Replays every registered subscription. Invoked on each
    /// (re)connect; the transport forgets subscriptions across a hard
    /// reconnect.
    pub async fn resubscribe_all(&self) {
        let channels = self.subscriptions.lock().await.channels();
        for channel in channels {
            self.transport
                .send_frame(ClientFrame::Subscribe {
                    destination: channel.destination(),
                })
                .await;
        }
    }

    async fn try_subscribe(&self, channel: ChannelKind) -> SubscribeOutcome {
        let destination = channel.destination();
        if !self.transport.is_connected() {
            info!("channel mux: deferring subscription to {destination} until connect");
            return SubscribeOutcome::DeferredUntilConnect;
        }
        self.transport
            .send_frame(ClientFrame::Subscribe { destination })
            .await;
        SubscribeOutcome::Sent
    }

    async fn send_unsubscribe(&self, channel: ChannelKind) {
        if !self.transport.is_connected() {
            return;
        }
        self.transport
            .send_frame(ClientFrame::Unsubscribe {
                destination: channel.destination(),
            })
            .await;
    }

    /// Decodes a frame body according to the channel its destination
    /// names. Unknown destinations and malformed bodies are logged and
    /// dropped; a bad frame must never take down the inbound pump.
    pub fn route(destination: &str, body: Value) -> Option<InboundEvent> {
        let decoded = match destination {
            PRIVATE_INBOX_DESTINATION => serde_json::from_value(body).map(InboundEvent::Message),
            FEED_DESTINATION => serde_json::from_value(body).map(InboundEvent::FeedPost),
            NOTIFICATION_DESTINATION => {
                serde_json::from_value(body).map(InboundEvent::Notification)
            }
            other if other.starts_with(CONVERSATION_TOPIC_PREFIX) => {
                serde_json::from_value(body).map(InboundEvent::MessageDeleted)
            }
            other => {
                warn!("channel mux: frame for unknown destination {other} dropped");
                return None;
            }
        };
        match decoded {
            Ok(event) => Some(event),
            Err(err) => {
                warn!("channel mux: malformed frame body on {destination}: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/channels_tests.rs"]
mod tests;
