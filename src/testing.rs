//! Test double for the backend: a real in-memory store with switches for
//! failing requests, holding mutations open and counting them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Semaphore;

use crate::backend::{Backend, BackendError, EventQuery, LocalStore};
use crate::models::{Attendance, Category, ChatMessage, Event, EventDraft, Profile};
use crate::realtime::ChangeStream;
use crate::session::Session;

pub struct ScriptedBackend {
    store: LocalStore,
    fail_reads: AtomicBool,
    fail_mutations: AtomicBool,
    mutations: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            store: LocalStore::open_in_memory().expect("in-memory store"),
            fail_reads: AtomicBool::new(false),
            fail_mutations: AtomicBool::new(false),
            mutations: AtomicUsize::new(0),
            gate: Mutex::new(None),
        })
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn fail_mutations(&self, on: bool) {
        self.fail_mutations.store(on, Ordering::SeqCst);
    }

    /// Mutation requests issued so far, including failed ones.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// From now on every mutation waits for a permit on the returned gate.
    pub fn hold_mutations(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub async fn seed_event(&self, organizer_id: &str, title: &str, category: Category, days: i64) -> Event {
        self.store
            .insert_event(organizer_id, &draft(title, category, days))
            .await
            .unwrap()
    }

    fn read(&self) -> Result<(), BackendError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackendError::Http("simulated network failure".into()));
        }
        Ok(())
    }

    async fn mutate(&self) -> Result<(), BackendError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(BackendError::Http("simulated network failure".into()));
        }
        Ok(())
    }
}

pub fn draft(title: &str, category: Category, days: i64) -> EventDraft {
    EventDraft {
        title: title.into(),
        description: format!("All about {title}."),
        category,
        datetime: Utc::now() + Duration::days(days),
        location_name: format!("{title} Hall"),
        latitude: 43.6,
        longitude: -116.2,
    }
}

pub fn session(user_id: &str) -> Session {
    Session {
        display_name: Some(format!("{user_id} name")),
        ..Session::new(user_id)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>, BackendError> {
        self.read()?;
        self.store.list_events(query).await
    }

    async fn get_event(&self, id: &str) -> Result<Event, BackendError> {
        self.read()?;
        self.store.get_event(id).await
    }

    async fn insert_event(&self, organizer_id: &str, draft: &EventDraft) -> Result<Event, BackendError> {
        self.mutate().await?;
        self.store.insert_event(organizer_id, draft).await
    }

    async fn update_event(&self, id: &str, draft: &EventDraft) -> Result<Event, BackendError> {
        self.mutate().await?;
        self.store.update_event(id, draft).await
    }

    async fn delete_event(&self, id: &str) -> Result<(), BackendError> {
        self.mutate().await?;
        self.store.delete_event(id).await
    }

    async fn find_attendance(&self, event_id: &str, user_id: &str) -> Result<Option<Attendance>, BackendError> {
        self.read()?;
        self.store.find_attendance(event_id, user_id).await
    }

    async fn insert_attendance(&self, event_id: &str, user_id: &str) -> Result<Attendance, BackendError> {
        self.mutate().await?;
        self.store.insert_attendance(event_id, user_id).await
    }

    async fn delete_attendance(&self, event_id: &str, user_id: &str) -> Result<(), BackendError> {
        self.mutate().await?;
        self.store.delete_attendance(event_id, user_id).await
    }

    async fn count_attendance(&self, event_id: &str) -> Result<u64, BackendError> {
        self.read()?;
        self.store.count_attendance(event_id).await
    }

    async fn list_attendance(&self, event_id: &str) -> Result<Vec<Attendance>, BackendError> {
        self.read()?;
        self.store.list_attendance(event_id).await
    }

    async fn mark_first_chat(&self, attendance_id: &str) -> Result<(), BackendError> {
        self.mutate().await?;
        self.store.mark_first_chat(attendance_id).await
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
        self.read()?;
        self.store.get_profile(user_id).await
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<Profile, BackendError> {
        self.mutate().await?;
        self.store.upsert_profile(profile).await
    }

    async fn list_messages(&self, event_id: &str) -> Result<Vec<ChatMessage>, BackendError> {
        self.read()?;
        self.store.list_messages(event_id).await
    }

    async fn insert_message(&self, event_id: &str, sender_id: &str, text: &str) -> Result<ChatMessage, BackendError> {
        self.mutate().await?;
        self.store.insert_message(event_id, sender_id, text).await
    }

    async fn count_messages(&self, event_id: &str) -> Result<u64, BackendError> {
        self.read()?;
        self.store.count_messages(event_id).await
    }

    fn changes(&self) -> &dyn ChangeStream {
        self.store.changes()
    }
}
