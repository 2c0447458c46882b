use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    AttachmentId, ConversationId, ConversationKind, MessageId, MessageType, NotificationId,
    NotificationKind, PostId, UserId,
};

/// Per-user queue on which every incoming message is delivered,
/// regardless of which conversation it belongs to.
pub const PRIVATE_INBOX_DESTINATION: &str = "/user/queue/messages";
pub const FEED_DESTINATION: &str = "/user/queue/feed";
pub const NOTIFICATION_DESTINATION: &str = "/user/queue/notifications";
/// Per-conversation topic carrying out-of-band events (delete notifications).
pub const CONVERSATION_TOPIC_PREFIX: &str = "/topic/conversation/";
pub const SEND_MESSAGE_DESTINATION: &str = "/app/chat.sendMessage";
pub const DELETE_MESSAGE_DESTINATION: &str = "/app/chat.deleteMessage";

/// Frames the client writes onto the session socket. The connect-time
/// credential travels in the upgrade request's Authorization header,
/// never inside a frame or the URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { destination: String },
    Unsubscribe { destination: String },
    Send { destination: String, body: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Message { destination: String, body: Value },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    /// Client-generated correlation id; present on a server echo of a
    /// locally-originated send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AttachmentId>,
    pub file_name: String,
    pub object_key: String,
    pub file_type: String,
    pub file_size: u64,
    /// Presigned download URL, filled in by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    #[serde(default)]
    pub name: Option<String>,
    pub participant_ids: Vec<UserId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_message_content: Option<String>,
    #[serde(default)]
    pub last_message_sender_id: Option<UserId>,
    #[serde(default)]
    pub last_message_type: Option<MessageType>,
    /// Client-side only, derived from the peer's profile for ONE_TO_ONE display.
    #[serde(skip)]
    pub display_name: Option<String>,
    #[serde(skip)]
    pub display_avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub receiver_id: UserId,
    pub sender_id: UserId,
    pub sender_name: String,
    #[serde(default)]
    pub sender_avatar_url: Option<String>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub post_id: Option<PostId>,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub content: Vec<Notification>,
    pub total_elements: u64,
    pub total_pages: u32,
    pub number: u32,
    pub size: u32,
    pub first: bool,
    pub last: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostResponse {
    pub id: PostId,
    pub author_id: UserId,
    pub author_name: String,
    #[serde(default)]
    pub author_avatar_url: Option<String>,
    pub content: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub comment_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Out-of-band soft-delete event delivered on the conversation topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageEvent {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
}

/// Body published to [`SEND_MESSAGE_DESTINATION`]. Exactly one of
/// `conversation_id` and `recipient_id` is set; the server resolves a
/// recipient into a (possibly new) conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessagePayload {
    pub message_id: MessageId,
}

/// The two outbound command shapes, matched exhaustively on the send path.
#[derive(Debug, Clone)]
pub enum ChatCommand {
    SendMessage(SendMessagePayload),
    DeleteMessage(DeleteMessagePayload),
}

impl ChatCommand {
    pub fn destination(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => SEND_MESSAGE_DESTINATION,
            Self::DeleteMessage(_) => DELETE_MESSAGE_DESTINATION,
        }
    }

    pub fn body(&self) -> serde_json::Result<Value> {
        match self {
            Self::SendMessage(payload) => serde_json::to_value(payload),
            Self::DeleteMessage(payload) => serde_json::to_value(payload),
        }
    }
}
