//! Outbound command builder: turns user actions into the publishable
//! command payloads, handling the two-phase upload-then-publish flow
//! for attachments.

use anyhow::Result;
use chrono::Utc;
use shared::{
    domain::{ConversationId, MessageId, MessageType, UserId},
    protocol::{DeleteMessagePayload, Message, SendMessagePayload},
};
use thiserror::Error;
use uuid::Uuid;

use crate::rest::ChatApi;

/// A file picked by the user, not yet uploaded. Only upload results
/// (object keys) ever travel over the session transport.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    Conversation(ConversationId),
    Recipient(UserId),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("no active session")]
    NoSession,
    #[error("send has no target: set exactly one of conversation_id or recipient_id")]
    MissingTarget,
    #[error("send has two targets: set exactly one of conversation_id or recipient_id")]
    AmbiguousTarget,
    #[error("attachment upload failed: {0}")]
    Upload(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Default)]
pub struct SendMessageRequest {
    pub conversation_id: Option<ConversationId>,
    pub recipient_id: Option<UserId>,
    pub content: String,
    pub attachments: Vec<LocalFile>,
}

impl SendMessageRequest {
    pub fn target(&self) -> Result<SendTarget, SendError> {
        match (&self.conversation_id, &self.recipient_id) {
            (Some(conversation), None) => Ok(SendTarget::Conversation(conversation.clone())),
            (None, Some(recipient)) => Ok(SendTarget::Recipient(recipient.clone())),
            (None, None) => Err(SendError::MissingTarget),
            (Some(_), Some(_)) => Err(SendError::AmbiguousTarget),
        }
    }
}

/// Phase 1 uploads via the REST collaborator; failure aborts the whole
/// send before anything is published. Phase 2 is the caller publishing
/// the returned payload, fire-and-forget; success is observed only when
/// the echo arrives on the private inbox.
pub async fn build_send_command(
    api: &dyn ChatApi,
    request: SendMessageRequest,
) -> Result<SendMessagePayload, SendError> {
    let target = request.target()?;

    let attachments = if request.attachments.is_empty() {
        Vec::new()
    } else {
        api.upload_attachments(request.attachments, &target)
            .await
            .map_err(SendError::Upload)?
    };

    let (conversation_id, recipient_id) = match target {
        SendTarget::Conversation(id) => (Some(id), None),
        SendTarget::Recipient(id) => (None, Some(id)),
    };

    Ok(SendMessagePayload {
        conversation_id,
        recipient_id,
        content: request.content,
        attachments,
        temp_id: Some(Uuid::new_v4().to_string()),
    })
}

pub fn build_delete_command(message_id: MessageId) -> DeleteMessagePayload {
    DeleteMessagePayload { message_id }
}

pub fn message_type_for(payload: &SendMessagePayload) -> MessageType {
    if payload.attachments.is_empty() {
        MessageType::Text
    } else {
        MessageType::Attachment
    }
}

/// Local echo entry for an outgoing send, correlated with the server
/// copy through `temp_id`. Only possible when the target conversation
/// is already known; a recipient-targeted send has no sequence to
/// insert into until the server materializes the conversation.
pub fn optimistic_echo(payload: &SendMessagePayload, sender: &UserId) -> Option<Message> {
    let conversation_id = payload.conversation_id.clone()?;
    let temp_id = payload.temp_id.clone()?;
    Some(Message {
        id: MessageId::new(temp_id.clone()),
        temp_id: Some(temp_id),
        conversation_id,
        sender_id: sender.clone(),
        content: payload.content.clone(),
        message_type: message_type_for(payload),
        attachments: payload.attachments.clone(),
        is_deleted: false,
        created_at: Utc::now(),
    })
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
