//! Reconciliation state machine: the single authoritative client-side
//! cache of conversations, message sequences, unread markers, and the
//! pending recipient.
//!
//! Mutation is pure and synchronous; every network concern lives in the
//! client layer. Events may arrive duplicated or out of order across
//! channels, so every apply is idempotent and tolerant of entities that
//! have not materialized yet.

use std::collections::{HashMap, HashSet};

use shared::{
    domain::{ConversationId, ConversationKind, MessageId, UserId},
    protocol::{Conversation, Message, UserProfile},
};

/// A user the viewer intends to message before any conversation exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecipient {
    pub id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// What applying an inbound message did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageOutcome {
    pub appended: bool,
    /// False when the message referenced a conversation the list does
    /// not know yet; the caller is expected to fetch its metadata.
    pub conversation_known: bool,
    pub marked_unread: bool,
}

enum Placement {
    Duplicate,
    Replaced,
    Appended,
}

#[derive(Debug, Default)]
pub struct ChatStore {
    current_user: Option<UserProfile>,
    conversations: Vec<Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    unread: HashSet<ConversationId>,
    pending_recipient: Option<PendingRecipient>,
    selected: Option<ConversationId>,
    has_more_conversations: bool,
    has_more_messages: HashMap<ConversationId, bool>,
    user_cache: HashMap<UserId, UserProfile>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self {
            has_more_conversations: true,
            ..Self::default()
        }
    }

    pub fn set_current_user(&mut self, user: UserProfile) {
        self.current_user = Some(user);
    }

    pub fn current_user(&self) -> Option<&UserProfile> {
        self.current_user.as_ref()
    }

    /// Applies an inbound message with idempotence on both `id` and
    /// `temp_id`. A duplicate `id` is discarded; an echo carrying a
    /// known `temp_id` replaces the optimistic entry in place. The
    /// append happens even when the conversation is unknown: the
    /// sequence is keyed by `conversation_id` alone, and the list entry
    /// materializes later without disturbing it.
    pub fn apply_incoming_message(&mut self, msg: Message) -> MessageOutcome {
        let conversation_known = self.conversations.iter().any(|c| c.id == msg.conversation_id);

        let placement = {
            let sequence = self.messages.entry(msg.conversation_id.clone()).or_default();
            if sequence.iter().any(|m| m.id == msg.id) {
                Placement::Duplicate
            } else if let Some(slot) = msg.temp_id.as_deref().and_then(|temp_id| {
                sequence
                    .iter_mut()
                    .find(|m| m.temp_id.as_deref() == Some(temp_id))
            }) {
                *slot = msg.clone();
                Placement::Replaced
            } else {
                sequence.push(msg.clone());
                Placement::Appended
            }
        };

        if matches!(placement, Placement::Duplicate) {
            return MessageOutcome {
                appended: false,
                conversation_known,
                marked_unread: false,
            };
        }

        self.update_conversation_preview(&msg);

        let marked_unread = matches!(placement, Placement::Appended)
            && self
                .current_user
                .as_ref()
                .is_some_and(|me| me.id != msg.sender_id)
            && self.selected.as_ref() != Some(&msg.conversation_id);
        if marked_unread {
            self.unread.insert(msg.conversation_id.clone());
        }

        MessageOutcome {
            appended: matches!(placement, Placement::Appended),
            conversation_known,
            marked_unread,
        }
    }

    /// Locally-originated echo placeholder, keyed by `temp_id`. The
    /// server-confirmed copy replaces it via `apply_incoming_message`.
    pub fn insert_optimistic(&mut self, message: Message) {
        debug_assert!(message.temp_id.is_some());
        let sequence = self
            .messages
            .entry(message.conversation_id.clone())
            .or_default();
        if sequence.iter().any(|m| {
            m.id == message.id || (m.temp_id.is_some() && m.temp_id == message.temp_id)
        }) {
            return;
        }
        sequence.push(message.clone());
        self.update_conversation_preview(&message);
    }

    /// Soft delete in place: flag set, content cleared, position kept.
    /// A delete for a message outside the loaded page window is
    /// discarded; the server is the authority for `is_deleted`.
    pub fn apply_delete(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> bool {
        let Some(sequence) = self.messages.get_mut(conversation_id) else {
            return false;
        };
        let Some(message) = sequence.iter_mut().find(|m| &m.id == message_id) else {
            return false;
        };
        message.is_deleted = true;
        message.content.clear();
        true
    }

    /// Merge by id, never duplicate. When both sides carry preview
    /// fields the fresher `updated_at` wins; enrichment-only display
    /// fields survive the merge.
    pub fn upsert_conversation(&mut self, conversation: Conversation) -> bool {
        let inserted = match self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            Some(existing) => {
                if conversation.updated_at >= existing.updated_at {
                    let display_name = existing.display_name.take();
                    let display_avatar_url = existing.display_avatar_url.take();
                    *existing = conversation;
                    if existing.display_name.is_none() {
                        existing.display_name = display_name;
                    }
                    if existing.display_avatar_url.is_none() {
                        existing.display_avatar_url = display_avatar_url;
                    }
                }
                false
            }
            None => {
                self.conversations.push(conversation);
                true
            }
        };
        self.sort_conversations();
        inserted
    }

    pub fn merge_conversations(&mut self, page: Vec<Conversation>) {
        for conversation in page {
            self.upsert_conversation(conversation);
        }
    }

    /// Pagination append. A page shorter than `page_size` is the signal
    /// that no more pages exist.
    pub fn append_older_conversations(&mut self, page: Vec<Conversation>, page_size: usize) {
        self.has_more_conversations = page.len() >= page_size;
        self.merge_conversations(page);
    }

    /// First page for a conversation. REST pages arrive newest-first;
    /// sequences are kept chronological.
    pub fn set_messages(
        &mut self,
        conversation_id: &ConversationId,
        mut page: Vec<Message>,
        page_size: usize,
    ) {
        self.has_more_messages
            .insert(conversation_id.clone(), page.len() >= page_size);
        page.reverse();
        self.messages.insert(conversation_id.clone(), page);
    }

    /// Older page loaded via cursor. The splice is a single state
    /// update, so a reader never observes a transient partial list.
    pub fn prepend_older_messages(
        &mut self,
        conversation_id: &ConversationId,
        mut page: Vec<Message>,
        page_size: usize,
    ) {
        self.has_more_messages
            .insert(conversation_id.clone(), page.len() >= page_size);
        let sequence = self.messages.entry(conversation_id.clone()).or_default();
        let existing_ids: HashSet<&MessageId> = sequence.iter().map(|m| &m.id).collect();
        page.retain(|m| !existing_ids.contains(&m.id));
        drop(existing_ids);
        page.reverse();
        sequence.splice(0..0, page);
    }

    /// Exactly one conversation is selected at a time, or none.
    /// Selecting optimistically clears the unread flag; the server
    /// round trip is the caller's job.
    pub fn select_conversation(&mut self, conversation_id: Option<ConversationId>) {
        if let Some(id) = &conversation_id {
            self.unread.remove(id);
        }
        self.selected = conversation_id;
    }

    pub fn selected_conversation(&self) -> Option<&ConversationId> {
        self.selected.as_ref()
    }

    pub fn set_pending_recipient(&mut self, recipient: Option<PendingRecipient>) {
        self.pending_recipient = recipient;
    }

    pub fn pending_recipient(&self) -> Option<&PendingRecipient> {
        self.pending_recipient.as_ref()
    }

    /// Scans for a ONE_TO_ONE conversation containing both the pending
    /// recipient and the current user. Runs on every conversation-list
    /// change, so "conversation appeared" and "user was waiting to
    /// start one" can complete in either order. Clears the intent and
    /// returns the match for the caller to select.
    pub fn take_resolved_pending_recipient(&mut self) -> Option<ConversationId> {
        let me = &self.current_user.as_ref()?.id;
        let pending = &self.pending_recipient.as_ref()?.id;
        let found = self
            .conversations
            .iter()
            .find(|c| {
                c.kind == ConversationKind::OneToOne
                    && c.participant_ids.contains(me)
                    && c.participant_ids.contains(pending)
            })?
            .id
            .clone();
        self.pending_recipient = None;
        Some(found)
    }

    pub fn find_one_to_one_with(&self, user_id: &UserId) -> Option<&ConversationId> {
        let me = &self.current_user.as_ref()?.id;
        self.conversations
            .iter()
            .find(|c| {
                c.kind == ConversationKind::OneToOne
                    && c.participant_ids.contains(me)
                    && c.participant_ids.contains(user_id)
            })
            .map(|c| &c.id)
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn messages(&self, conversation_id: &ConversationId) -> &[Message] {
        self.messages
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_conversation_unread(&self, conversation_id: &ConversationId) -> bool {
        self.unread.contains(conversation_id)
    }

    pub fn unread_conversations(&self) -> &HashSet<ConversationId> {
        &self.unread
    }

    pub fn has_more_conversations(&self) -> bool {
        self.has_more_conversations
    }

    /// Not-yet-loaded conversations report true so the first page load
    /// is always attempted.
    pub fn has_more_messages(&self, conversation_id: &ConversationId) -> bool {
        self.has_more_messages
            .get(conversation_id)
            .copied()
            .unwrap_or(true)
    }

    pub fn cache_user_profile(&mut self, profile: UserProfile) {
        self.user_cache.insert(profile.id.clone(), profile);
    }

    pub fn cached_user(&self, user_id: &UserId) -> Option<&UserProfile> {
        self.user_cache.get(user_id)
    }

    /// The peer whose profile should fill a ONE_TO_ONE conversation's
    /// display fields, when they are still empty.
    pub fn display_profile_needed(&self, conversation_id: &ConversationId) -> Option<UserId> {
        let me = &self.current_user.as_ref()?.id;
        let conversation = self.conversations.iter().find(|c| &c.id == conversation_id)?;
        if conversation.kind != ConversationKind::OneToOne || conversation.display_name.is_some() {
            return None;
        }
        conversation
            .participant_ids
            .iter()
            .find(|id| *id != me)
            .cloned()
    }

    pub fn apply_display_profile(
        &mut self,
        conversation_id: &ConversationId,
        profile: &UserProfile,
    ) -> bool {
        self.user_cache
            .insert(profile.id.clone(), profile.clone());
        let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| &c.id == conversation_id)
        else {
            return false;
        };
        let changed = conversation.display_name.as_deref() != Some(profile.name.as_str());
        conversation.display_name = Some(profile.name.clone());
        conversation.display_avatar_url = profile.avatar_url.clone();
        changed
    }

    /// Teardown for logout. The store is explicitly owned, so lifetime
    /// ends here rather than with the process.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn update_conversation_preview(&mut self, msg: &Message) {
        let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == msg.conversation_id)
        else {
            return;
        };
        conversation.last_message_content = Some(msg.content.clone());
        conversation.last_message_sender_id = Some(msg.sender_id.clone());
        conversation.last_message_type = Some(msg.message_type);
        if msg.created_at > conversation.updated_at {
            conversation.updated_at = msg.created_at;
        }
        self.sort_conversations();
    }

    fn sort_conversations(&mut self) {
        self.conversations
            .sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
