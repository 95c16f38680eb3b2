use pretty_assertions::assert_eq;

use super::{save_profile, shared};
use crate::backend::Backend;
use crate::chat::{ChatRoom, SEND_FAILED};
use crate::error::AppError;
use crate::models::Category;
use crate::testing::{session, ScriptedBackend};

#[tokio::test]
async fn only_attendees_get_in() {
    let backend = ScriptedBackend::new();
    let event = backend.seed_event("org", "Jazz Night", Category::Music, 1).await;

    let denied = ChatRoom::open(shared(&backend), Some(&session("u1")), &event.id).await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));

    let signed_out = ChatRoom::open(shared(&backend), None, &event.id).await;
    assert!(signed_out.err().is_some_and(|err| err.is_sign_in_required()));
}

#[tokio::test]
async fn first_visit_posts_the_welcome_once() {
    let backend = ScriptedBackend::new();
    save_profile(&backend, "org", "Olive", &[]).await;
    save_profile(&backend, "u1", "Ada", &[]).await;
    let event = backend.seed_event("org", "Jazz Night", Category::Music, 1).await;
    backend.store().insert_attendance(&event.id, "u1").await.unwrap();

    let room = ChatRoom::open(shared(&backend), Some(&session("u1")), &event.id)
        .await
        .unwrap();
    let messages = room.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].message,
        "Welcome Ada to Jazz Night! This event is organized by Olive. All about Jazz Night. There are currently 1 participants."
    );
    assert!(messages[0].is_organizer);
    assert_eq!(messages[0].sender_name.as_deref(), Some("Olive"));

    let attendance = backend
        .store()
        .find_attendance(&event.id, "u1")
        .await
        .unwrap()
        .unwrap();
    assert!(attendance.first_chat);

    let again = ChatRoom::open(shared(&backend), Some(&session("u1")), &event.id)
        .await
        .unwrap();
    assert_eq!(again.messages().len(), 1);
}

#[tokio::test]
async fn sent_messages_arrive_trimmed_and_blank_ones_are_dropped() {
    let backend = ScriptedBackend::new();
    let event = backend.seed_event("org", "Jazz Night", Category::Music, 1).await;
    backend.store().insert_attendance(&event.id, "u1").await.unwrap();
    let mut room = ChatRoom::open(shared(&backend), Some(&session("u1")), &event.id)
        .await
        .unwrap();
    let before = backend.mutation_count();

    assert!(room.send("   ").await.unwrap().is_none());
    assert_eq!(backend.mutation_count(), before);

    room.send("  see you there  ").await.unwrap();
    let arrived = room.next_message().await.unwrap();
    assert_eq!(arrived.message, "see you there");
    assert!(!arrived.is_organizer);
    assert_eq!(room.messages().last().map(|m| m.id.as_str()), Some(arrived.id.as_str()));
}

#[tokio::test]
async fn other_senders_show_up_in_order() {
    let backend = ScriptedBackend::new();
    let event = backend.seed_event("org", "Jazz Night", Category::Music, 1).await;
    backend.store().insert_attendance(&event.id, "u1").await.unwrap();
    let mut room = ChatRoom::open(shared(&backend), Some(&session("u1")), &event.id)
        .await
        .unwrap();
    let welcome = room.messages().len();

    backend.store().insert_message(&event.id, "org", "doors at 7").await.unwrap();
    backend.store().insert_message(&event.id, "u2", "bringing snacks").await.unwrap();

    let first = room.next_message().await.unwrap();
    let second = room.next_message().await.unwrap();
    assert!(first.is_organizer);
    assert_eq!(second.message, "bringing snacks");
    assert_eq!(room.messages().len(), welcome + 2);
}

#[tokio::test]
async fn failed_send_sets_the_error() {
    let backend = ScriptedBackend::new();
    let event = backend.seed_event("org", "Jazz Night", Category::Music, 1).await;
    backend.store().insert_attendance(&event.id, "u1").await.unwrap();
    let mut room = ChatRoom::open(shared(&backend), Some(&session("u1")), &event.id)
        .await
        .unwrap();

    backend.fail_mutations(true);
    assert!(room.send("hello").await.is_err());
    assert_eq!(room.error(), Some(SEND_FAILED));
}
