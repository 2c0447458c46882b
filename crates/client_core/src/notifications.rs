//! Notification read models: the notification list and the
//! server-confirmed global unread counter.
//!
//! This counter feeds the notification bell and is reconciled against
//! `GET /notifications/unread-count`; it is deliberately independent of
//! the per-conversation unread set in the chat store, which feeds
//! "new message" highlighting.

use shared::{
    domain::{ConversationId, NotificationId},
    protocol::Notification,
};

#[derive(Debug, Default)]
pub struct NotificationFeed {
    notifications: Vec<Notification>,
    unread_count: u64,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    /// Push-delivered notification: dedupe by id, prepend, bump the
    /// counter when it arrives unread. Returns false on a duplicate.
    pub fn apply_new(&mut self, notification: Notification) -> bool {
        if self.notifications.iter().any(|n| n.id == notification.id) {
            return false;
        }
        if !notification.is_read {
            self.unread_count += 1;
        }
        self.notifications.insert(0, notification);
        true
    }

    pub fn set_notifications(&mut self, notifications: Vec<Notification>) {
        self.notifications = notifications;
    }

    pub fn append_older(&mut self, page: Vec<Notification>) {
        for notification in page {
            if !self.notifications.iter().any(|n| n.id == notification.id) {
                self.notifications.push(notification);
            }
        }
    }

    /// Reconciles the counter from the server, which is the read-state
    /// authority.
    pub fn set_unread_count(&mut self, count: u64) {
        self.unread_count = count;
    }

    pub fn mark_read(&mut self, id: &NotificationId) -> bool {
        let Some(notification) = self
            .notifications
            .iter_mut()
            .find(|n| &n.id == id && !n.is_read)
        else {
            return false;
        };
        notification.is_read = true;
        self.unread_count = self.unread_count.saturating_sub(1);
        true
    }

    pub fn mark_all_read(&mut self) {
        for notification in &mut self.notifications {
            notification.is_read = true;
        }
        self.unread_count = 0;
    }

    /// Marks every unread notification tied to a conversation; returns
    /// how many were affected.
    pub fn mark_conversation_read(&mut self, conversation_id: &ConversationId) -> usize {
        let mut affected = 0;
        for notification in &mut self.notifications {
            if notification.conversation_id.as_ref() == Some(conversation_id)
                && !notification.is_read
            {
                notification.is_read = true;
                affected += 1;
            }
        }
        self.unread_count = self.unread_count.saturating_sub(affected as u64);
        affected
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
#[path = "tests/notifications_tests.rs"]
mod tests;
