//! Per-event attendance toggle.
//!
//! Each card owns its attending flag and attendee count. The flag follows
//! `Unknown -> Checking -> {Attending, NotAttending}`; a toggle moves through
//! `Updating` to the opposite state, or back where it started on failure.
//! The count is refetched on mount and whenever the backend reports a change
//! to the event's attendance rows.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, Notify};

use crate::backend::Backend;
use crate::error::{AppError, AppResult};
use crate::models::Event;
use crate::notify::Notifier;
use crate::realtime::{ChangeKey, Subscription, Table};
use crate::session::{require_session, Session};

pub const RSVP_FAILED: &str = "Failed to update RSVP. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RsvpState {
    Unknown,
    Checking,
    Attending,
    NotAttending,
    /// A toggle is in flight; `attending` is the state it started from.
    Updating { attending: bool },
}

impl RsvpState {
    fn settled(attending: bool) -> Self {
        if attending {
            RsvpState::Attending
        } else {
            RsvpState::NotAttending
        }
    }

    /// The flag to display, if known.
    pub fn attending(self) -> Option<bool> {
        match self {
            RsvpState::Attending => Some(true),
            RsvpState::NotAttending => Some(false),
            RsvpState::Updating { attending } => Some(attending),
            RsvpState::Unknown | RsvpState::Checking => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Joined,
    Left,
    /// Another toggle was in flight, or the state was not yet known.
    Ignored,
    /// The card was torn down before the response arrived.
    Discarded,
}

#[derive(Debug, Clone, Serialize)]
pub struct RsvpView {
    pub event_id: String,
    pub state: RsvpState,
    pub attendee_count: u64,
    pub is_past: bool,
    pub can_chat: bool,
}

#[derive(Debug)]
struct CardState {
    rsvp: RsvpState,
    count: u64,
    mounted: bool,
    /// Bumped on every mount and teardown so stale responses can be told apart.
    generation: u64,
}

pub struct RsvpCard {
    event: Event,
    session: Option<Session>,
    backend: Arc<dyn Backend>,
    notifier: Notifier,
    state: Mutex<CardState>,
    subscription: AsyncMutex<Option<Subscription>>,
    teardown: Notify,
}

impl RsvpCard {
    pub fn new(
        event: Event,
        session: Option<Session>,
        backend: Arc<dyn Backend>,
        notifier: Notifier,
    ) -> Self {
        Self {
            event,
            session,
            backend,
            notifier,
            state: Mutex::new(CardState {
                rsvp: RsvpState::Unknown,
                count: 0,
                mounted: false,
                generation: 0,
            }),
            subscription: AsyncMutex::new(None),
            teardown: Notify::new(),
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn state(&self) -> RsvpState {
        self.lock().rsvp
    }

    pub fn attendee_count(&self) -> u64 {
        self.lock().count
    }

    pub fn is_mounted(&self) -> bool {
        self.lock().mounted
    }

    /// Subscribes to attendance changes, then loads the flag and count.
    pub async fn mount(&self) {
        let generation = {
            let mut state = self.lock();
            state.mounted = true;
            state.generation += 1;
            state.rsvp = RsvpState::Checking;
            state.generation
        };

        let key = ChangeKey::with_eq(Table::Attendance, "event_id", self.event.id.clone());
        *self.subscription.lock().await = Some(self.backend.changes().subscribe(key));

        let checked = match &self.session {
            Some(session) => match self
                .backend
                .find_attendance(&self.event.id, &session.user_id)
                .await
            {
                Ok(found) => RsvpState::settled(found.is_some()),
                Err(err) => {
                    tracing::warn!(event_id = %self.event.id, "rsvp status check failed: {err}");
                    RsvpState::Unknown
                }
            },
            None => RsvpState::NotAttending,
        };
        {
            let mut state = self.lock();
            if state.generation == generation && state.rsvp == RsvpState::Checking {
                state.rsvp = checked;
            }
        }

        self.refresh_count().await;
    }

    /// Tears the card down: the change subscription is dropped and any
    /// response still in flight is discarded when it lands.
    pub async fn unmount(&self) {
        {
            let mut state = self.lock();
            state.mounted = false;
            state.generation += 1;
        }
        self.teardown.notify_waiters();
        *self.subscription.lock().await = None;
    }

    /// Refetches the attendee count and applies it if still mounted.
    pub async fn refresh_count(&self) {
        let generation = self.lock().generation;
        match self.backend.count_attendance(&self.event.id).await {
            Ok(count) => {
                let mut state = self.lock();
                if state.mounted && state.generation == generation {
                    state.count = count;
                }
            }
            Err(err) => {
                tracing::warn!(event_id = %self.event.id, "attendee count fetch failed: {err}");
            }
        }
    }

    /// Waits for the next attendance change on this event and refreshes the
    /// count. Returns `false` once the card is torn down or the stream ends.
    pub async fn next_change(&self) -> bool {
        let mut guard = self.subscription.lock().await;
        let notified = self.teardown.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.is_mounted() {
            *guard = None;
            return false;
        }
        let Some(subscription) = guard.as_mut() else {
            return false;
        };

        let change = tokio::select! {
            change = subscription.recv() => change,
            _ = &mut notified => None,
        };
        drop(guard);

        match change {
            Some(change) => {
                tracing::trace!(event_id = %self.event.id, kind = ?change.kind, "attendance changed");
                self.refresh_count().await;
                true
            }
            None => false,
        }
    }

    /// Flips attendance for the signed-in user.
    ///
    /// A second call while one is in flight is ignored. Failures restore the
    /// previous state, raise an error toast and are returned; nothing is
    /// retried.
    pub async fn toggle(&self) -> AppResult<ToggleOutcome> {
        let user_id = require_session(self.session.as_ref())?.user_id.clone();
        if self.event.is_past(Utc::now()) {
            return Err(AppError::Validation("This event has already ended".into()));
        }

        let (was_attending, generation) = {
            let mut state = self.lock();
            let was_attending = match state.rsvp {
                RsvpState::Attending => true,
                RsvpState::NotAttending => false,
                RsvpState::Updating { .. } | RsvpState::Unknown | RsvpState::Checking => {
                    return Ok(ToggleOutcome::Ignored)
                }
            };
            state.rsvp = RsvpState::Updating {
                attending: was_attending,
            };
            (was_attending, state.generation)
        };

        let result = if was_attending {
            self.backend
                .delete_attendance(&self.event.id, &user_id)
                .await
        } else {
            self.backend
                .insert_attendance(&self.event.id, &user_id)
                .await
                .map(|_| ())
        };

        let mut state = self.lock();
        if !state.mounted || state.generation != generation {
            tracing::debug!(event_id = %self.event.id, "dropping rsvp response for torn-down card");
            return Ok(ToggleOutcome::Discarded);
        }

        match result {
            Ok(()) => {
                state.rsvp = RsvpState::settled(!was_attending);
                Ok(if was_attending {
                    ToggleOutcome::Left
                } else {
                    ToggleOutcome::Joined
                })
            }
            Err(err) => {
                state.rsvp = RsvpState::settled(was_attending);
                drop(state);
                tracing::warn!(event_id = %self.event.id, %user_id, "rsvp update failed: {err}");
                self.notifier.error(RSVP_FAILED);
                Err(AppError::Backend(err))
            }
        }
    }

    pub fn view(&self) -> RsvpView {
        let state = self.lock();
        let is_past = self.event.is_past(Utc::now());
        RsvpView {
            event_id: self.event.id.clone(),
            state: state.rsvp,
            attendee_count: state.count,
            is_past,
            can_chat: state.rsvp == RsvpState::Attending && !is_past,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CardState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displayed_flag_during_update_is_the_starting_one() {
        assert_eq!(RsvpState::Updating { attending: true }.attending(), Some(true));
        assert_eq!(RsvpState::Checking.attending(), None);
        assert_eq!(RsvpState::settled(false), RsvpState::NotAttending);
    }
}
