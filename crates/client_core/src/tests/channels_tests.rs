use serde_json::json;
use shared::domain::ConversationId;
use tokio::sync::mpsc;

use super::{ChannelKind, ChannelMultiplexer, InboundEvent, SubscribeOutcome};
use crate::transport::SessionTransport;

fn disconnected_mux() -> ChannelMultiplexer {
    let (tx, _rx) = mpsc::unbounded_channel();
    ChannelMultiplexer::new(SessionTransport::new("ws://127.0.0.1:1/ws", tx))
}

#[test]
fn channels_map_to_expected_destinations() {
    assert_eq!(ChannelKind::PrivateInbox.destination(), "/user/queue/messages");
    assert_eq!(ChannelKind::FeedBroadcast.destination(), "/user/queue/feed");
    assert_eq!(
        ChannelKind::NotificationInbox.destination(),
        "/user/queue/notifications"
    );
    assert_eq!(
        ChannelKind::ConversationTopic(ConversationId::from("c1")).destination(),
        "/topic/conversation/c1"
    );
}

#[tokio::test]
async fn subscriptions_before_connect_are_deferred_not_dropped() {
    let mux = disconnected_mux();
    assert_eq!(
        mux.subscribe_private_inbox().await,
        SubscribeOutcome::DeferredUntilConnect
    );
    assert_eq!(mux.subscribe_feed().await, SubscribeOutcome::DeferredUntilConnect);
    assert_eq!(
        mux.subscribe_notifications().await,
        SubscribeOutcome::DeferredUntilConnect
    );

    // Registered exactly once; a second request is a no-op.
    assert_eq!(
        mux.subscribe_private_inbox().await,
        SubscribeOutcome::AlreadySubscribed
    );
}

#[tokio::test]
async fn conversation_topic_subscription_is_exclusive() {
    let mux = disconnected_mux();
    mux.subscribe_conversation_topic(ConversationId::from("c1"))
        .await;
    assert_eq!(
        mux.active_conversation_topic().await,
        Some(ConversationId::from("c1"))
    );

    mux.subscribe_conversation_topic(ConversationId::from("c2"))
        .await;
    assert_eq!(
        mux.active_conversation_topic().await,
        Some(ConversationId::from("c2"))
    );

    assert_eq!(
        mux.subscribe_conversation_topic(ConversationId::from("c2"))
            .await,
        SubscribeOutcome::AlreadySubscribed
    );

    mux.unsubscribe_conversation_topic().await;
    assert_eq!(mux.active_conversation_topic().await, None);
}

#[test]
fn routes_private_inbox_frame_to_message() {
    let body = json!({
        "id": "m1",
        "conversationId": "c1",
        "senderId": "u2",
        "content": "hello",
        "messageType": "TEXT",
        "createdAt": "2024-05-01T10:00:00Z"
    });
    match ChannelMultiplexer::route("/user/queue/messages", body) {
        Some(InboundEvent::Message(message)) => {
            assert_eq!(message.id.as_str(), "m1");
            assert_eq!(message.conversation_id.as_str(), "c1");
            assert!(!message.is_deleted);
        }
        other => panic!("unexpected routing result: {other:?}"),
    }
}

#[test]
fn routes_conversation_topic_frame_to_delete_event() {
    let body = json!({ "messageId": "m1", "conversationId": "c1" });
    match ChannelMultiplexer::route("/topic/conversation/c1", body) {
        Some(InboundEvent::MessageDeleted(event)) => {
            assert_eq!(event.message_id.as_str(), "m1");
            assert_eq!(event.conversation_id.as_str(), "c1");
        }
        other => panic!("unexpected routing result: {other:?}"),
    }
}

#[test]
fn routes_feed_and_notification_frames() {
    let post = json!({
        "id": "p1",
        "authorId": "u2",
        "authorName": "Noa",
        "content": "new post",
        "createdAt": "2024-05-01T10:00:00Z"
    });
    assert!(matches!(
        ChannelMultiplexer::route("/user/queue/feed", post),
        Some(InboundEvent::FeedPost(_))
    ));

    let notification = json!({
        "id": "n1",
        "receiverId": "u1",
        "senderId": "u2",
        "senderName": "Noa",
        "type": "MESSAGE",
        "conversationId": "c1",
        "message": "sent you a message",
        "isRead": false,
        "createdAt": "2024-05-01T10:00:00Z"
    });
    assert!(matches!(
        ChannelMultiplexer::route("/user/queue/notifications", notification),
        Some(InboundEvent::Notification(_))
    ));
}

#[test]
fn unknown_destination_and_malformed_body_are_dropped() {
    assert!(ChannelMultiplexer::route("/user/queue/other", json!({})).is_none());
    assert!(ChannelMultiplexer::route("/user/queue/messages", json!({ "id": 42 })).is_none());
    assert!(ChannelMultiplexer::route("/topic/conversation/c1", json!("nope")).is_none());
}
