//! Per-event chat room, open to attendees only.

use std::sync::Arc;

use crate::backend::{Backend, BackendError};
use crate::error::{AppError, AppResult};
use crate::models::{ChatMessage, Event};
use crate::realtime::{ChangeKey, ChangeKind, Subscription, Table};
use crate::session::{require_session, Session};

pub const NOT_AN_ATTENDEE: &str = "You need to RSVP to this event to access the chat room.";
pub const SEND_FAILED: &str = "Failed to send message. Please try again.";

pub fn welcome_message(
    attendee_name: &str,
    event: &Event,
    organizer_name: &str,
    participants: u64,
) -> String {
    format!(
        "Welcome {attendee_name} to {title}! This event is organized by {organizer_name}. {description} There are currently {participants} participants.",
        title = event.title,
        description = event.description,
    )
}

pub struct ChatRoom {
    backend: Arc<dyn Backend>,
    session: Session,
    event: Event,
    messages: Vec<ChatMessage>,
    subscription: Subscription,
    error: Option<String>,
}

impl ChatRoom {
    /// Enters the chat for `event_id`. The first visit of an attendee posts a
    /// welcome message on the organizer's behalf.
    pub async fn open(
        backend: Arc<dyn Backend>,
        session: Option<&Session>,
        event_id: &str,
    ) -> AppResult<Self> {
        let session = require_session(session)?.clone();
        let attendance = backend
            .find_attendance(event_id, &session.user_id)
            .await?
            .ok_or_else(|| AppError::Forbidden(NOT_AN_ATTENDEE.into()))?;
        let event = backend.get_event(event_id).await?;

        let subscription = backend
            .changes()
            .subscribe(ChangeKey::with_eq(Table::Messages, "event_id", event_id));

        if !attendance.first_chat {
            backend.mark_first_chat(&attendance.id).await?;
            if let Err(err) = post_welcome(backend.as_ref(), &session, &event).await {
                tracing::warn!(event_id, "welcome message failed: {err}");
            }
        }

        let mut room = Self {
            backend,
            session,
            event,
            messages: Vec::new(),
            subscription,
            error: None,
        };
        room.reload().await?;
        Ok(room)
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Posts `text` as the signed-in user. Blank input is ignored. The new
    /// message shows up through [`ChatRoom::next_message`].
    pub async fn send(&mut self, text: &str) -> AppResult<Option<ChatMessage>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        match self
            .backend
            .insert_message(&self.event.id, &self.session.user_id, text)
            .await
        {
            Ok(message) => {
                self.error = None;
                Ok(Some(self.flag(message)))
            }
            Err(err) => {
                tracing::warn!(event_id = %self.event.id, "message send failed: {err}");
                self.error = Some(SEND_FAILED.into());
                Err(err.into())
            }
        }
    }

    /// Waits for the next new message in this room and appends it. Returns
    /// `None` once the change stream is closed.
    pub async fn next_message(&mut self) -> Option<ChatMessage> {
        loop {
            let change = self.subscription.recv().await?;
            match change.kind {
                ChangeKind::Insert => {
                    let message = match serde_json::from_value::<ChatMessage>(change.row) {
                        Ok(message) => self.flag(message),
                        Err(err) => {
                            tracing::warn!("undecodable message row: {err}");
                            continue;
                        }
                    };
                    if self.messages.iter().any(|known| known.id == message.id) {
                        continue;
                    }
                    self.messages.push(message.clone());
                    return Some(message);
                }
                ChangeKind::Resync => {
                    if let Err(err) = self.reload().await {
                        tracing::warn!(event_id = %self.event.id, "chat resync failed: {err}");
                    }
                }
                ChangeKind::Update | ChangeKind::Delete => {}
            }
        }
    }

    async fn reload(&mut self) -> Result<(), BackendError> {
        let messages = self.backend.list_messages(&self.event.id).await?;
        self.messages = messages
            .into_iter()
            .map(|message| self.flag(message))
            .collect();
        Ok(())
    }

    fn flag(&self, mut message: ChatMessage) -> ChatMessage {
        message.is_organizer = message.sender_id == self.event.organizer_id;
        message
    }
}

async fn post_welcome(
    backend: &dyn Backend,
    session: &Session,
    event: &Event,
) -> Result<ChatMessage, BackendError> {
    let attendee = backend.get_profile(&session.user_id).await?;
    let organizer = backend.get_profile(&event.organizer_id).await?;
    let participants = backend.count_attendance(&event.id).await?;

    let attendee_name = attendee
        .map(|profile| profile.full_name)
        .filter(|name| !name.trim().is_empty())
        .or_else(|| session.display_name.clone())
        .unwrap_or_else(|| "there".to_string());
    let organizer_name = organizer
        .map(|profile| profile.full_name)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "the organizer".to_string());

    let text = welcome_message(&attendee_name, event, &organizer_name, participants);
    backend
        .insert_message(&event.id, &event.organizer_id, &text)
        .await
}
