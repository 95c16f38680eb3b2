use chrono::Utc;
use pretty_assertions::assert_eq;

use super::shared;
use crate::backend::Backend;
use crate::error::AppError;
use crate::models::Category;
use crate::notify::{Notifier, ToastKind};
use crate::organizer::{self, DayCount, EventWindow, OrganizerDashboard, SAVE_FAILED};
use crate::testing::{draft, session, ScriptedBackend};

#[tokio::test]
async fn dashboard_counts_and_windows() {
    let backend = ScriptedBackend::new();
    let upcoming = backend.seed_event("org", "Jazz Night", Category::Music, 3).await;
    backend.seed_event("org", "Last Year", Category::Music, -2).await;
    backend.seed_event("someone", "Not Mine", Category::Art, 1).await;
    backend.store().insert_attendance(&upcoming.id, "u1").await.unwrap();
    backend.store().insert_attendance(&upcoming.id, "u2").await.unwrap();
    backend.store().insert_message(&upcoming.id, "u1", "hi").await.unwrap();

    let me = session("org");
    let mut dashboard =
        OrganizerDashboard::load(shared(&backend), Some(&me), Notifier::new(), EventWindow::All)
            .await
            .unwrap();
    assert_eq!(dashboard.events().len(), 2);
    let jazz = dashboard
        .events()
        .iter()
        .find(|summary| summary.event.id == upcoming.id)
        .unwrap();
    assert_eq!((jazz.rsvp_count, jazz.message_count), (2, 1));

    dashboard.set_window(EventWindow::Upcoming).await.unwrap();
    assert_eq!(dashboard.events().len(), 1);
    assert_eq!(dashboard.events()[0].event.title, "Jazz Night");

    dashboard.set_window(EventWindow::Past).await.unwrap();
    assert_eq!(dashboard.events().len(), 1);
    assert_eq!(dashboard.events()[0].event.title, "Last Year");
}

#[tokio::test]
async fn search_matches_title_or_description() {
    let backend = ScriptedBackend::new();
    backend.seed_event("org", "Jazz Night", Category::Music, 3).await;
    backend.seed_event("org", "Code Jam", Category::Tech, 4).await;
    let mut dashboard = OrganizerDashboard::load(
        shared(&backend),
        Some(&session("org")),
        Notifier::new(),
        EventWindow::All,
    )
    .await
    .unwrap();

    dashboard.search("ALL ABOUT code");
    let visible: Vec<&str> = dashboard
        .visible()
        .iter()
        .map(|summary| summary.event.title.as_str())
        .collect();
    assert_eq!(visible, vec!["Code Jam"]);

    dashboard.search("");
    assert_eq!(dashboard.visible().len(), 2);
}

#[tokio::test]
async fn create_validates_and_reports() {
    let backend = ScriptedBackend::new();
    let notifier = Notifier::new();
    let me = session("org");

    let mut missing_location = draft("Jazz Night", Category::Music, 2);
    missing_location.latitude = 0.0;
    let rejected =
        organizer::create_event(backend.as_ref(), Some(&me), &notifier, &missing_location).await;
    match rejected {
        Err(AppError::Validation(message)) => {
            assert_eq!(message, "Please select a location for your event")
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(backend.mutation_count(), 0);

    let created = organizer::create_event(
        backend.as_ref(),
        Some(&me),
        &notifier,
        &draft("Jazz Night", Category::Music, 2),
    )
    .await
    .unwrap();
    assert_eq!(created.organizer_id, "org");

    let toasts = notifier.drain();
    assert_eq!(toasts.len(), 2);
    assert_eq!((toasts[0].kind, toasts[0].message.as_str()), (ToastKind::Error, SAVE_FAILED));
    assert_eq!(
        (toasts[1].kind, toasts[1].message.as_str()),
        (ToastKind::Success, "Event created successfully")
    );
}

#[tokio::test]
async fn only_the_organizer_may_edit() {
    let backend = ScriptedBackend::new();
    let notifier = Notifier::new();
    let event = backend.seed_event("org", "Jazz Night", Category::Music, 2).await;
    let mut changes = draft("Jazz Night (late show)", Category::Music, 2);
    changes.datetime = event.datetime;

    let stranger = organizer::update_event(
        backend.as_ref(),
        Some(&session("u1")),
        &notifier,
        &event.id,
        &changes,
    )
    .await;
    assert!(matches!(stranger, Err(AppError::Forbidden(_))));

    let updated = organizer::update_event(
        backend.as_ref(),
        Some(&session("org")),
        &notifier,
        &event.id,
        &changes,
    )
    .await
    .unwrap();
    assert_eq!(updated.title, "Jazz Night (late show)");
    assert_eq!(
        notifier.snapshot().last().map(|toast| toast.message.clone()),
        Some("Event updated successfully".to_string())
    );
}

#[tokio::test]
async fn delete_cascades_and_is_limited_to_own_events() {
    let backend = ScriptedBackend::new();
    let mine = backend.seed_event("org", "Jazz Night", Category::Music, 2).await;
    let theirs = backend.seed_event("someone", "Not Mine", Category::Art, 2).await;
    backend.store().insert_attendance(&mine.id, "u1").await.unwrap();

    let notifier = Notifier::new();
    let mut dashboard = OrganizerDashboard::load(
        shared(&backend),
        Some(&session("org")),
        notifier.clone(),
        EventWindow::All,
    )
    .await
    .unwrap();

    assert!(matches!(
        dashboard.delete(&theirs.id).await,
        Err(AppError::Forbidden(_))
    ));
    dashboard.delete(&mine.id).await.unwrap();
    assert!(dashboard.events().is_empty());
    assert_eq!(backend.store().count_attendance(&mine.id).await.unwrap(), 0);
    assert_eq!(notifier.snapshot()[0].kind, ToastKind::Success);
    assert!(backend.store().get_event(&theirs.id).await.is_ok());
}

#[tokio::test]
async fn rsvps_group_by_day_and_dashboard_presence() {
    let backend = ScriptedBackend::new();
    let event = backend.seed_event("org", "Jazz Night", Category::Music, 2).await;
    backend.store().insert_attendance(&event.id, "u1").await.unwrap();
    backend.store().insert_attendance(&event.id, "u2").await.unwrap();

    let days = organizer::rsvps_by_day(backend.as_ref(), &event.id).await.unwrap();
    let today = Utc::now().date_naive();
    // A run straddling midnight UTC can split the two rows across days.
    let total: usize = days.iter().map(|day| day.count).sum();
    assert_eq!(total, 2);
    assert!(days.iter().all(|day| day.day <= today));
    if days.len() == 1 {
        assert_eq!(days[0], DayCount { day: today, count: 2 });
    }

    assert!(organizer::has_events(backend.as_ref(), Some(&session("org"))).await.unwrap());
    assert!(!organizer::has_events(backend.as_ref(), Some(&session("u1"))).await.unwrap());
}
