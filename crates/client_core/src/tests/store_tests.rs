use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{ConversationId, ConversationKind, MessageId, MessageType, UserId},
    protocol::{Conversation, Message, UserProfile},
};

use super::{ChatStore, PendingRecipient};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn profile(id: &str, name: &str) -> UserProfile {
    UserProfile {
        id: UserId::from(id),
        name: name.to_string(),
        avatar_url: None,
    }
}

fn conversation(id: &str, participants: &[&str], updated: DateTime<Utc>) -> Conversation {
    Conversation {
        id: ConversationId::from(id),
        kind: if participants.len() == 2 {
            ConversationKind::OneToOne
        } else {
            ConversationKind::Group
        },
        name: None,
        participant_ids: participants.iter().map(|p| UserId::from(*p)).collect(),
        created_by: UserId::from(participants[0]),
        created_at: updated,
        updated_at: updated,
        last_message_content: None,
        last_message_sender_id: None,
        last_message_type: None,
        display_name: None,
        display_avatar_url: None,
    }
}

fn message(id: &str, conv: &str, sender: &str, content: &str, created: DateTime<Utc>) -> Message {
    Message {
        id: MessageId::from(id),
        temp_id: None,
        conversation_id: ConversationId::from(conv),
        sender_id: UserId::from(sender),
        content: content.to_string(),
        message_type: MessageType::Text,
        attachments: Vec::new(),
        is_deleted: false,
        created_at: created,
    }
}

fn store_for(me: &str) -> ChatStore {
    let mut store = ChatStore::new();
    store.set_current_user(profile(me, "me"));
    store
}

#[test]
fn duplicate_message_id_is_discarded() {
    let mut store = store_for("u1");
    store.upsert_conversation(conversation("c1", &["u1", "u2"], at(0)));

    let first = store.apply_incoming_message(message("m1", "c1", "u2", "hello", at(1)));
    assert!(first.appended);

    let second = store.apply_incoming_message(message("m1", "c1", "u2", "hello", at(1)));
    assert!(!second.appended);
    assert_eq!(store.messages(&ConversationId::from("c1")).len(), 1);
}

#[test]
fn server_echo_replaces_optimistic_entry_in_place() {
    let mut store = store_for("u1");
    store.upsert_conversation(conversation("c1", &["u1", "u2"], at(0)));

    let mut optimistic = message("tmp-1", "c1", "u1", "sending", at(1));
    optimistic.temp_id = Some("tmp-1".to_string());
    store.insert_optimistic(optimistic);

    let mut echo = message("m-server", "c1", "u1", "sending", at(2));
    echo.temp_id = Some("tmp-1".to_string());
    let outcome = store.apply_incoming_message(echo);

    assert!(!outcome.appended);
    assert!(!outcome.marked_unread);
    let sequence = store.messages(&ConversationId::from("c1"));
    assert_eq!(sequence.len(), 1);
    assert_eq!(sequence[0].id.as_str(), "m-server");
}

#[test]
fn incoming_message_updates_preview_and_resorts() {
    let mut store = store_for("u1");
    store.upsert_conversation(conversation("c1", &["u1", "u2"], at(100)));
    store.upsert_conversation(conversation("c2", &["u1", "u3"], at(50)));
    assert_eq!(store.conversations()[0].id.as_str(), "c1");

    store.apply_incoming_message(message("m1", "c2", "u3", "newest", at(200)));

    let list = store.conversations();
    assert_eq!(list[0].id.as_str(), "c2");
    assert_eq!(list[0].last_message_content.as_deref(), Some("newest"));
    assert_eq!(list[0].updated_at, at(200));
}

#[test]
fn message_for_unknown_conversation_is_kept() {
    let mut store = store_for("u1");

    let outcome = store.apply_incoming_message(message("m1", "c9", "u2", "first", at(1)));
    assert!(outcome.appended);
    assert!(!outcome.conversation_known);
    assert_eq!(store.messages(&ConversationId::from("c9")).len(), 1);

    // Metadata arrives later; the already-buffered sequence is untouched.
    store.upsert_conversation(conversation("c9", &["u1", "u2"], at(2)));
    assert_eq!(store.messages(&ConversationId::from("c9")).len(), 1);
    assert_eq!(store.conversations().len(), 1);
}

#[test]
fn unread_skips_own_and_selected_conversations() {
    let mut store = store_for("u1");
    store.upsert_conversation(conversation("c1", &["u1", "u2"], at(0)));
    store.upsert_conversation(conversation("c2", &["u1", "u3"], at(0)));

    // Own message never marks unread.
    let own = store.apply_incoming_message(message("m1", "c1", "u1", "mine", at(1)));
    assert!(!own.marked_unread);

    // Message into the selected conversation never marks unread.
    store.select_conversation(Some(ConversationId::from("c1")));
    let selected = store.apply_incoming_message(message("m2", "c1", "u2", "hi", at(2)));
    assert!(!selected.marked_unread);

    // Message from a peer into a background conversation does.
    let background = store.apply_incoming_message(message("m3", "c2", "u3", "yo", at(3)));
    assert!(background.marked_unread);
    assert!(store.is_conversation_unread(&ConversationId::from("c2")));
}

#[test]
fn selecting_clears_unread() {
    let mut store = store_for("u1");
    store.upsert_conversation(conversation("c1", &["u1", "u2"], at(0)));
    store.apply_incoming_message(message("m1", "c1", "u2", "hi", at(1)));
    assert!(store.is_conversation_unread(&ConversationId::from("c1")));

    store.select_conversation(Some(ConversationId::from("c1")));
    assert!(!store.is_conversation_unread(&ConversationId::from("c1")));
}

#[test]
fn soft_delete_clears_content_in_place() {
    let mut store = store_for("u1");
    store.upsert_conversation(conversation("c1", &["u1", "u2"], at(0)));
    store.apply_incoming_message(message("m1", "c1", "u2", "one", at(1)));
    store.apply_incoming_message(message("m2", "c1", "u2", "two", at(2)));
    store.apply_incoming_message(message("m3", "c1", "u2", "three", at(3)));

    assert!(store.apply_delete(&ConversationId::from("c1"), &MessageId::from("m2")));

    let sequence = store.messages(&ConversationId::from("c1"));
    assert_eq!(sequence.len(), 3);
    assert_eq!(sequence[1].id.as_str(), "m2");
    assert!(sequence[1].is_deleted);
    assert!(sequence[1].content.is_empty());
}

#[test]
fn delete_for_unloaded_message_is_discarded() {
    let mut store = store_for("u1");
    assert!(!store.apply_delete(&ConversationId::from("c1"), &MessageId::from("m1")));
}

#[test]
fn upsert_keeps_fresher_preview_and_display_fields() {
    let mut store = store_for("u1");
    let mut newer = conversation("c1", &["u1", "u2"], at(100));
    newer.last_message_content = Some("fresh".to_string());
    store.upsert_conversation(newer);
    store.apply_display_profile(&ConversationId::from("c1"), &profile("u2", "Noa"));

    // A stale list entry must not roll the preview back.
    let mut stale = conversation("c1", &["u1", "u2"], at(50));
    stale.last_message_content = Some("old".to_string());
    assert!(!store.upsert_conversation(stale));

    let entry = &store.conversations()[0];
    assert_eq!(entry.last_message_content.as_deref(), Some("fresh"));
    assert_eq!(entry.display_name.as_deref(), Some("Noa"));

    // A fresher entry wins but enrichment survives the merge.
    let mut fresher = conversation("c1", &["u1", "u2"], at(200));
    fresher.last_message_content = Some("freshest".to_string());
    store.upsert_conversation(fresher);
    let entry = &store.conversations()[0];
    assert_eq!(entry.last_message_content.as_deref(), Some("freshest"));
    assert_eq!(entry.display_name.as_deref(), Some("Noa"));
}

#[test]
fn short_conversation_page_ends_paging() {
    let mut store = store_for("u1");
    assert!(store.has_more_conversations());

    let full: Vec<_> = (0..20)
        .map(|i| conversation(&format!("c{i}"), &["u1", "u2", "u3"], at(i)))
        .collect();
    store.append_older_conversations(full, 20);
    assert!(store.has_more_conversations());

    let short: Vec<_> = (20..25)
        .map(|i| conversation(&format!("c{i}"), &["u1", "u2", "u3"], at(i)))
        .collect();
    store.append_older_conversations(short, 20);
    assert!(!store.has_more_conversations());
    assert_eq!(store.conversations().len(), 25);
}

#[test]
fn first_message_page_is_stored_chronologically() {
    let mut store = store_for("u1");
    let conv = ConversationId::from("c1");
    // REST pages arrive newest-first.
    let page = vec![
        message("m3", "c1", "u2", "three", at(3)),
        message("m2", "c1", "u2", "two", at(2)),
        message("m1", "c1", "u2", "one", at(1)),
    ];
    store.set_messages(&conv, page, 30);

    let ids: Vec<_> = store.messages(&conv).iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m1", "m2", "m3"]);
    assert!(!store.has_more_messages(&conv));
}

#[test]
fn older_page_prepends_without_duplicates() {
    let mut store = store_for("u1");
    let conv = ConversationId::from("c1");
    store.set_messages(
        &conv,
        vec![
            message("m4", "c1", "u2", "four", at(4)),
            message("m3", "c1", "u2", "three", at(3)),
        ],
        2,
    );
    assert!(store.has_more_messages(&conv));

    // The older page overlaps the window edge by one entry.
    store.prepend_older_messages(
        &conv,
        vec![
            message("m3", "c1", "u2", "three", at(3)),
            message("m2", "c1", "u2", "two", at(2)),
            message("m1", "c1", "u2", "one", at(1)),
        ],
        30,
    );

    let ids: Vec<_> = store.messages(&conv).iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m1", "m2", "m3", "m4"]);
    assert!(!store.has_more_messages(&conv));
}

#[test]
fn pending_recipient_resolves_in_either_order() {
    // Intent first, conversation second.
    let mut store = store_for("u1");
    store.set_pending_recipient(Some(PendingRecipient {
        id: UserId::from("u2"),
        name: "Noa".to_string(),
        avatar_url: None,
    }));
    assert!(store.take_resolved_pending_recipient().is_none());
    store.upsert_conversation(conversation("c1", &["u1", "u2"], at(0)));
    assert_eq!(
        store.take_resolved_pending_recipient(),
        Some(ConversationId::from("c1"))
    );
    assert!(store.pending_recipient().is_none());

    // Conversation first, intent second.
    let mut store = store_for("u1");
    store.upsert_conversation(conversation("c1", &["u1", "u2"], at(0)));
    store.set_pending_recipient(Some(PendingRecipient {
        id: UserId::from("u2"),
        name: "Noa".to_string(),
        avatar_url: None,
    }));
    assert_eq!(
        store.take_resolved_pending_recipient(),
        Some(ConversationId::from("c1"))
    );
}

#[test]
fn pending_recipient_ignores_group_conversations() {
    let mut store = store_for("u1");
    store.upsert_conversation(conversation("g1", &["u1", "u2", "u3"], at(0)));
    store.set_pending_recipient(Some(PendingRecipient {
        id: UserId::from("u2"),
        name: "Noa".to_string(),
        avatar_url: None,
    }));
    assert!(store.take_resolved_pending_recipient().is_none());
    assert!(store.pending_recipient().is_some());
}

#[test]
fn display_profile_needed_only_for_unenriched_one_to_one() {
    let mut store = store_for("u1");
    store.upsert_conversation(conversation("c1", &["u1", "u2"], at(0)));
    store.upsert_conversation(conversation("g1", &["u1", "u2", "u3"], at(0)));

    assert_eq!(
        store.display_profile_needed(&ConversationId::from("c1")),
        Some(UserId::from("u2"))
    );
    assert_eq!(store.display_profile_needed(&ConversationId::from("g1")), None);

    assert!(store.apply_display_profile(&ConversationId::from("c1"), &profile("u2", "Noa")));
    assert_eq!(store.display_profile_needed(&ConversationId::from("c1")), None);
    // Re-applying the same profile reports no change.
    assert!(!store.apply_display_profile(&ConversationId::from("c1"), &profile("u2", "Noa")));
}

#[test]
fn reset_returns_to_initial_state() {
    let mut store = store_for("u1");
    store.upsert_conversation(conversation("c1", &["u1", "u2"], at(0)));
    store.apply_incoming_message(message("m1", "c1", "u2", "hi", at(1)));
    store.select_conversation(Some(ConversationId::from("c1")));
    store.append_older_conversations(Vec::new(), 20);

    store.reset();

    assert!(store.current_user().is_none());
    assert!(store.conversations().is_empty());
    assert!(store.messages(&ConversationId::from("c1")).is_empty());
    assert!(store.unread_conversations().is_empty());
    assert!(store.selected_conversation().is_none());
    assert!(store.has_more_conversations());
}
