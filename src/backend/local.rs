use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{Backend, BackendError, EventQuery};
use crate::models::{Attendance, Category, ChatMessage, Event, EventDraft, Profile};
use crate::realtime::{Change, ChangeHub, ChangeKind, ChangeStream, Table};
use crate::utils;

const EVENT_COLUMNS: &str =
    "id, title, description, category, datetime, location_name, latitude, longitude, organizer_id";
const ATTENDANCE_COLUMNS: &str = "id, event_id, user_id, first_chat, created_at";

/// SQLite-backed stand-in for the hosted backend. Used when no backend URL
/// is configured, and by the test suite.
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    hub: ChangeHub,
}

impl LocalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        utils::ensure_parent(path.as_ref());
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        store.seed_if_empty()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, BackendError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS events(
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL,
                datetime TEXT NOT NULL,
                location_name TEXT NOT NULL DEFAULT '',
                latitude REAL NOT NULL DEFAULT 0,
                longitude REAL NOT NULL DEFAULT 0,
                organizer_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS events_by_datetime ON events(datetime);
            CREATE TABLE IF NOT EXISTS profiles(
                id TEXT PRIMARY KEY,
                full_name TEXT NOT NULL DEFAULT '',
                bio TEXT NOT NULL DEFAULT '',
                location TEXT NOT NULL DEFAULT '',
                interest_tags TEXT NOT NULL DEFAULT '[]',
                updated_at TEXT
            );
            CREATE TABLE IF NOT EXISTS event_attendees(
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                first_chat INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE(event_id, user_id)
            );
            CREATE TABLE IF NOT EXISTS messages(
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                sender_id TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            hub: ChangeHub::new(),
        })
    }

    fn seed_if_empty(&self) -> Result<(), BackendError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(());
        }

        let now = Utc::now();
        let samples = [
            sample_draft("Jazz Night", Category::Music, "Blue Room", now + Duration::days(1)),
            sample_draft("Code Jam", Category::Tech, "Public Library", now + Duration::days(6)),
            sample_draft("Mural Walk", Category::Art, "Old Town", now + Duration::days(14)),
        ];
        for draft in &samples {
            insert_event_row(&conn, "demo-organizer", draft)?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, BackendError> {
        self.conn
            .lock()
            .map_err(|_| BackendError::Task("local store mutex poisoned".into()))
    }

    /// Runs `op` against the connection on the blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, BackendError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| BackendError::Task("local store mutex poisoned".into()))?;
            op(&guard)
        })
        .await
        .map_err(|err| BackendError::Task(err.to_string()))?
    }

    fn publish<T: serde::Serialize>(&self, table: Table, kind: ChangeKind, row: &T) {
        match serde_json::to_value(row) {
            Ok(value) => self.hub.publish(Change::new(table, kind, value)),
            Err(err) => tracing::warn!(%table, "unable to encode change row: {err}"),
        }
    }
}

#[async_trait]
impl Backend for LocalStore {
    async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>, BackendError> {
        let query = query.clone();
        self.run(move |conn| {
            let mut clauses: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn ToSql>> = Vec::new();

            if !query.categories.is_empty() {
                let marks = vec!["?"; query.categories.len()].join(", ");
                clauses.push(format!("category IN ({marks})"));
                for category in &query.categories {
                    values.push(Box::new(category.clone()));
                }
            }
            if let Some(organizer) = &query.organizer_id {
                clauses.push("organizer_id = ?".into());
                values.push(Box::new(organizer.clone()));
            }
            if let Some(from) = query.from {
                clauses.push("datetime >= ?".into());
                values.push(Box::new(from));
            }
            if let Some(until) = query.until {
                clauses.push("datetime < ?".into());
                values.push(Box::new(until));
            }

            let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events");
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY datetime ASC, rowid ASC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), event_from_row)?;
            // SQLite's lower() only folds ASCII, so text matching happens here.
            let needle = query.text.as_deref().map(str::to_lowercase);
            let mut out = Vec::new();
            for row in rows {
                let event = row?;
                let matches = needle.as_deref().map_or(true, |needle| {
                    utils::contains_ignore_case(&event.title, needle)
                        || utils::contains_ignore_case(&event.location_name, needle)
                });
                if matches {
                    out.push(event);
                }
            }
            Ok(out)
        })
        .await
    }

    async fn get_event(&self, id: &str) -> Result<Event, BackendError> {
        let id = id.to_string();
        self.run(move |conn| fetch_event(conn, &id)).await
    }

    async fn insert_event(
        &self,
        organizer_id: &str,
        draft: &EventDraft,
    ) -> Result<Event, BackendError> {
        let organizer_id = organizer_id.to_string();
        let draft = draft.clone();
        let event = self
            .run(move |conn| insert_event_row(conn, &organizer_id, &draft))
            .await?;
        self.publish(Table::Events, ChangeKind::Insert, &event);
        Ok(event)
    }

    async fn update_event(&self, id: &str, draft: &EventDraft) -> Result<Event, BackendError> {
        let id = id.to_string();
        let draft = draft.clone();
        let event = self
            .run(move |conn| {
                let changed = conn.execute(
                    "UPDATE events SET title = ?2, description = ?3, category = ?4, datetime = ?5,
                       location_name = ?6, latitude = ?7, longitude = ?8
                     WHERE id = ?1",
                    params![
                        id,
                        draft.title,
                        draft.description,
                        draft.category.as_str(),
                        draft.datetime,
                        draft.location_name,
                        draft.latitude,
                        draft.longitude
                    ],
                )?;
                if changed == 0 {
                    return Err(BackendError::NotFound(format!("event {id}")));
                }
                fetch_event(conn, &id)
            })
            .await?;
        self.publish(Table::Events, ChangeKind::Update, &event);
        Ok(event)
    }

    async fn delete_event(&self, id: &str) -> Result<(), BackendError> {
        let id = id.to_string();
        let (event, attendees) = self
            .run(move |conn| {
                let event = fetch_event(conn, &id)?;
                let attendees = attendance_rows(conn, &id)?;
                conn.execute("DELETE FROM events WHERE id = ?1", params![id])?;
                Ok((event, attendees))
            })
            .await?;
        for attendance in &attendees {
            self.publish(Table::Attendance, ChangeKind::Delete, attendance);
        }
        self.publish(Table::Events, ChangeKind::Delete, &event);
        Ok(())
    }

    async fn find_attendance(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<Attendance>, BackendError> {
        let event_id = event_id.to_string();
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let found = conn
                .query_row(
                    &format!(
                        "SELECT {ATTENDANCE_COLUMNS} FROM event_attendees
                         WHERE event_id = ?1 AND user_id = ?2"
                    ),
                    params![event_id, user_id],
                    attendance_from_row,
                )
                .optional()?;
            Ok(found)
        })
        .await
    }

    async fn insert_attendance(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Attendance, BackendError> {
        let attendance = Attendance {
            id: Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            user_id: user_id.to_string(),
            first_chat: false,
            created_at: Utc::now(),
        };
        let row = attendance.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO event_attendees (id, event_id, user_id, first_chat, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![row.id, row.event_id, row.user_id, row.created_at],
            )?;
            Ok(())
        })
        .await?;
        self.publish(Table::Attendance, ChangeKind::Insert, &attendance);
        Ok(attendance)
    }

    async fn delete_attendance(&self, event_id: &str, user_id: &str) -> Result<(), BackendError> {
        let event_id = event_id.to_string();
        let user_id = user_id.to_string();
        let removed = self
            .run(move |conn| {
                let existing = conn
                    .query_row(
                        &format!(
                            "SELECT {ATTENDANCE_COLUMNS} FROM event_attendees
                             WHERE event_id = ?1 AND user_id = ?2"
                        ),
                        params![event_id, user_id],
                        attendance_from_row,
                    )
                    .optional()?;
                conn.execute(
                    "DELETE FROM event_attendees WHERE event_id = ?1 AND user_id = ?2",
                    params![event_id, user_id],
                )?;
                Ok(existing)
            })
            .await?;
        if let Some(attendance) = removed {
            self.publish(Table::Attendance, ChangeKind::Delete, &attendance);
        }
        Ok(())
    }

    async fn count_attendance(&self, event_id: &str) -> Result<u64, BackendError> {
        let event_id = event_id.to_string();
        self.run(move |conn| {
            count_where(conn, "SELECT COUNT(*) FROM event_attendees WHERE event_id = ?1", &event_id)
        })
        .await
    }

    async fn list_attendance(&self, event_id: &str) -> Result<Vec<Attendance>, BackendError> {
        let event_id = event_id.to_string();
        self.run(move |conn| attendance_rows(conn, &event_id)).await
    }

    async fn mark_first_chat(&self, attendance_id: &str) -> Result<(), BackendError> {
        let attendance_id = attendance_id.to_string();
        let updated = self
            .run(move |conn| {
                let changed = conn.execute(
                    "UPDATE event_attendees SET first_chat = 1 WHERE id = ?1",
                    params![attendance_id],
                )?;
                if changed == 0 {
                    return Err(BackendError::NotFound(format!("attendance {attendance_id}")));
                }
                let row = conn.query_row(
                    &format!("SELECT {ATTENDANCE_COLUMNS} FROM event_attendees WHERE id = ?1"),
                    params![attendance_id],
                    attendance_from_row,
                )?;
                Ok(row)
            })
            .await?;
        self.publish(Table::Attendance, ChangeKind::Update, &updated);
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
        let user_id = user_id.to_string();
        self.run(move |conn| fetch_profile(conn, &user_id)).await
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<Profile, BackendError> {
        let profile = profile.clone();
        let (saved, existed) = self
            .run(move |conn| {
                let existed = fetch_profile(conn, &profile.id)?.is_some();
                let tags = serde_json::to_string(&profile.interest_tags)
                    .map_err(|err| BackendError::Decode(err.to_string()))?;
                conn.execute(
                    "INSERT INTO profiles (id, full_name, bio, location, interest_tags, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                       full_name = excluded.full_name,
                       bio = excluded.bio,
                       location = excluded.location,
                       interest_tags = excluded.interest_tags,
                       updated_at = excluded.updated_at",
                    params![
                        profile.id,
                        profile.full_name,
                        profile.bio,
                        profile.location,
                        tags,
                        profile.updated_at
                    ],
                )?;
                Ok((profile, existed))
            })
            .await?;
        let kind = if existed {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        self.publish(Table::Profiles, kind, &saved);
        Ok(saved)
    }

    async fn list_messages(&self, event_id: &str) -> Result<Vec<ChatMessage>, BackendError> {
        let event_id = event_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.event_id, m.sender_id, p.full_name, m.message, m.created_at
                 FROM messages m LEFT JOIN profiles p ON p.id = m.sender_id
                 WHERE m.event_id = ?1
                 ORDER BY m.created_at ASC, m.rowid ASC",
            )?;
            let rows = stmt.query_map(params![event_id], message_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    async fn insert_message(
        &self,
        event_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<ChatMessage, BackendError> {
        let mut message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: None,
            message: text.to_string(),
            created_at: Utc::now(),
            is_organizer: false,
        };
        let row = message.clone();
        message.sender_name = self
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO messages (id, event_id, sender_id, message, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        row.id,
                        row.event_id,
                        row.sender_id,
                        row.message,
                        row.created_at
                    ],
                )?;
                Ok(fetch_profile(conn, &row.sender_id)?.map(|profile| profile.full_name))
            })
            .await?;
        self.publish(Table::Messages, ChangeKind::Insert, &message);
        Ok(message)
    }

    async fn count_messages(&self, event_id: &str) -> Result<u64, BackendError> {
        let event_id = event_id.to_string();
        self.run(move |conn| {
            count_where(conn, "SELECT COUNT(*) FROM messages WHERE event_id = ?1", &event_id)
        })
        .await
    }

    fn changes(&self) -> &dyn ChangeStream {
        &self.hub
    }
}

fn count_where(conn: &Connection, sql: &str, key: &str) -> Result<u64, BackendError> {
    let count: i64 = conn.query_row(sql, params![key], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Stable id: the same organizer posting the same title at the same time
/// maps to one row.
fn event_id(organizer_id: &str, draft: &EventDraft) -> String {
    let mut hasher = Sha256::new();
    hasher.update(organizer_id.as_bytes());
    hasher.update(b"|");
    hasher.update(draft.datetime.to_rfc3339().as_bytes());
    hasher.update(b"|");
    hasher.update(draft.title.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn insert_event_row(
    conn: &Connection,
    organizer_id: &str,
    draft: &EventDraft,
) -> Result<Event, BackendError> {
    let event = Event {
        id: event_id(organizer_id, draft),
        title: draft.title.clone(),
        description: draft.description.clone(),
        category: draft.category,
        datetime: draft.datetime,
        location_name: draft.location_name.clone(),
        latitude: draft.latitude,
        longitude: draft.longitude,
        organizer_id: organizer_id.to_string(),
    };
    conn.execute(
        "INSERT INTO events (id, title, description, category, datetime, location_name,
                             latitude, longitude, organizer_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            event.id,
            event.title,
            event.description,
            event.category.as_str(),
            event.datetime,
            event.location_name,
            event.latitude,
            event.longitude,
            event.organizer_id,
            Utc::now()
        ],
    )?;
    Ok(event)
}

fn fetch_event(conn: &Connection, id: &str) -> Result<Event, BackendError> {
    conn.query_row(
        &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
        params![id],
        event_from_row,
    )
    .optional()?
    .ok_or_else(|| BackendError::NotFound(format!("event {id}")))
}

fn fetch_profile(conn: &Connection, user_id: &str) -> Result<Option<Profile>, BackendError> {
    let found = conn
        .query_row(
            "SELECT id, full_name, bio, location, interest_tags, updated_at
             FROM profiles WHERE id = ?1",
            params![user_id],
            profile_from_row,
        )
        .optional()?;
    Ok(found)
}

fn attendance_rows(conn: &Connection, event_id: &str) -> Result<Vec<Attendance>, BackendError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM event_attendees
         WHERE event_id = ?1 ORDER BY created_at ASC, rowid ASC"
    ))?;
    let rows = stmt.query_map(params![event_id], attendance_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let category: String = row.get(3)?;
    Ok(Event {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        category: Category::from(category),
        datetime: row.get(4)?,
        location_name: row.get(5)?,
        latitude: row.get(6)?,
        longitude: row.get(7)?,
        organizer_id: row.get(8)?,
    })
}

fn attendance_from_row(row: &Row<'_>) -> rusqlite::Result<Attendance> {
    Ok(Attendance {
        id: row.get(0)?,
        event_id: row.get(1)?,
        user_id: row.get(2)?,
        first_chat: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    let tags: String = row.get(4)?;
    let interest_tags: Vec<String> = serde_json::from_str(&tags).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(Profile {
        id: row.get(0)?,
        full_name: row.get(1)?,
        bio: row.get(2)?,
        location: row.get(3)?,
        interest_tags,
        updated_at: row.get(5)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        event_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        message: row.get(4)?,
        created_at: row.get(5)?,
        is_organizer: false,
    })
}

fn sample_draft(
    title: &str,
    category: Category,
    location: &str,
    start: DateTime<Utc>,
) -> EventDraft {
    EventDraft {
        title: title.to_string(),
        description: format!("{title} at {location}"),
        category,
        datetime: start,
        location_name: location.to_string(),
        latitude: 43.615,
        longitude: -116.2023,
    }
}
