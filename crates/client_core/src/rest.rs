//! REST collaborator boundary. The trait is the seam the client and
//! the command builder depend on; `HttpChatApi` is the production
//! implementation over `reqwest`.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Response, StatusCode,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ConversationId, NotificationId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        AttachmentMeta, Conversation, Message, NotificationPage, UnreadCountResponse, UserProfile,
    },
};

use crate::commands::{LocalFile, SendTarget};

/// Non-success responses carry a JSON `ApiError` body; when the body is
/// something else (proxy error page, empty), the status code alone
/// determines the error code.
fn error_from(status: StatusCode, body: &str) -> ApiError {
    serde_json::from_str(body).unwrap_or_else(|_| {
        let code = match status {
            StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
            StatusCode::FORBIDDEN => ErrorCode::Forbidden,
            StatusCode::NOT_FOUND => ErrorCode::NotFound,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorCode::Validation,
            StatusCode::TOO_MANY_REQUESTS => ErrorCode::RateLimited,
            _ => ErrorCode::Internal,
        };
        ApiError::new(code, format!("request failed with status {status}"))
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(error_from(status, &body).into());
    }
    Ok(response.json().await?)
}

async fn check(response: Response) -> Result<()> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(error_from(status, &body).into());
    }
    Ok(())
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Paged, newest-activity-first; cursor derived from the oldest
    /// loaded entry's `updatedAt` + id.
    async fn conversations(&self, cursor: Option<&str>, size: usize) -> Result<Vec<Conversation>>;
    async fn conversation(&self, id: &ConversationId) -> Result<Conversation>;
    /// Paged, newest-first; cursor is the oldest loaded message id.
    async fn messages(
        &self,
        conversation_id: &ConversationId,
        cursor: Option<&str>,
        size: usize,
    ) -> Result<Vec<Message>>;
    async fn upload_attachments(
        &self,
        files: Vec<LocalFile>,
        target: &SendTarget,
    ) -> Result<Vec<AttachmentMeta>>;
    async fn user_profile(&self, id: &UserId) -> Result<UserProfile>;
    async fn notifications(&self, page: u32, size: usize) -> Result<NotificationPage>;
    async fn unread_count(&self) -> Result<u64>;
    async fn mark_notification_read(&self, id: &NotificationId) -> Result<()>;
    async fn mark_all_notifications_read(&self) -> Result<()>;
    async fn mark_conversation_read(&self, id: &ConversationId) -> Result<()>;
}

pub struct HttpChatApi {
    http: reqwest::Client,
    api_url: String,
    credential: String,
}

impl HttpChatApi {
    pub fn new(api_url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            credential: credential.into(),
        }
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn conversations(&self, cursor: Option<&str>, size: usize) -> Result<Vec<Conversation>> {
        let mut request = self
            .http
            .get(format!("{}/conversations", self.api_url))
            .bearer_auth(&self.credential)
            .query(&[("size", size.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        decode(request.send().await?).await
    }

    async fn conversation(&self, id: &ConversationId) -> Result<Conversation> {
        let response = self
            .http
            .get(format!("{}/conversations/{id}", self.api_url))
            .bearer_auth(&self.credential)
            .send()
            .await?;
        decode(response).await
    }

    async fn messages(
        &self,
        conversation_id: &ConversationId,
        cursor: Option<&str>,
        size: usize,
    ) -> Result<Vec<Message>> {
        let mut request = self
            .http
            .get(format!(
                "{}/conversations/{conversation_id}/messages",
                self.api_url
            ))
            .bearer_auth(&self.credential)
            .query(&[("size", size.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        decode(request.send().await?).await
    }

    async fn upload_attachments(
        &self,
        files: Vec<LocalFile>,
        target: &SendTarget,
    ) -> Result<Vec<AttachmentMeta>> {
        let mut form = Form::new();
        for file in files {
            let part = Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(&file.content_type)?;
            form = form.part("files", part);
        }
        form = match target {
            SendTarget::Conversation(id) => form.text("conversationId", id.to_string()),
            SendTarget::Recipient(id) => form.text("recipientId", id.to_string()),
        };
        let response = self
            .http
            .post(format!("{}/attachments", self.api_url))
            .bearer_auth(&self.credential)
            .multipart(form)
            .send()
            .await?;
        decode(response).await
    }

    async fn user_profile(&self, id: &UserId) -> Result<UserProfile> {
        let response = self
            .http
            .get(format!("{}/users/{id}", self.api_url))
            .bearer_auth(&self.credential)
            .send()
            .await?;
        decode(response).await
    }

    async fn notifications(&self, page: u32, size: usize) -> Result<NotificationPage> {
        let response = self
            .http
            .get(format!("{}/notifications", self.api_url))
            .bearer_auth(&self.credential)
            .query(&[("page", page.to_string()), ("size", size.to_string())])
            .send()
            .await?;
        decode(response).await
    }

    async fn unread_count(&self) -> Result<u64> {
        let response = self
            .http
            .get(format!("{}/notifications/unread-count", self.api_url))
            .bearer_auth(&self.credential)
            .send()
            .await?;
        let counted: UnreadCountResponse = decode(response).await?;
        Ok(counted.count)
    }

    async fn mark_notification_read(&self, id: &NotificationId) -> Result<()> {
        let response = self
            .http
            .put(format!("{}/notifications/{id}/read", self.api_url))
            .bearer_auth(&self.credential)
            .send()
            .await?;
        check(response).await
    }

    async fn mark_all_notifications_read(&self) -> Result<()> {
        let response = self
            .http
            .put(format!("{}/notifications/read-all", self.api_url))
            .bearer_auth(&self.credential)
            .send()
            .await?;
        check(response).await
    }

    async fn mark_conversation_read(&self, id: &ConversationId) -> Result<()> {
        let response = self
            .http
            .put(format!(
                "{}/notifications/conversation/{id}/read",
                self.api_url
            ))
            .bearer_auth(&self.credential)
            .send()
            .await?;
        check(response).await
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
