use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header::HeaderValue, Client, Method, RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

use super::{Backend, BackendError, EventQuery};
use crate::config::RemoteSettings;
use crate::models::{Attendance, ChatMessage, Event, EventDraft, Profile};
use crate::realtime::{Change, ChangeHub, ChangeKind, ChangeStream, Table};

const USER_AGENT: &str = "event-feed/0.1";
const REQUEST_TIMEOUT_SECS: u64 = 20;
const MESSAGE_SELECT: &str = "id,event_id,sender_id,message,created_at,sender:profiles(full_name)";

/// Client for a PostgREST-style hosted backend (`/rest/v1/<table>`).
///
/// Only this client's own writes reach its change hub; pushes from other
/// clients need a transport that publishes into [`RestBackend::hub`].
pub struct RestBackend {
    client: Client,
    base_url: Url,
    anon_key: String,
    access_token: Option<String>,
    hub: ChangeHub,
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    id: String,
    event_id: String,
    sender_id: String,
    message: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    sender: Option<SenderRow>,
}

#[derive(Debug, Deserialize)]
struct SenderRow {
    full_name: Option<String>,
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> Self {
        ChatMessage {
            id: row.id,
            event_id: row.event_id,
            sender_id: row.sender_id,
            sender_name: row.sender.and_then(|sender| sender.full_name),
            message: row.message,
            created_at: row.created_at,
            is_organizer: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct NewEventRow<'a> {
    #[serde(flatten)]
    draft: &'a EventDraft,
    organizer_id: &'a str,
}

impl RestBackend {
    pub fn new(settings: RemoteSettings) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| BackendError::Http(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url,
            anon_key: settings.anon_key,
            access_token: settings.access_token,
            hub: ChangeHub::new(),
        })
    }

    /// The hub this backend publishes to. Push transports feed it too.
    pub fn hub(&self) -> &ChangeHub {
        &self.hub
    }

    fn table_url(&self, table: Table) -> Result<Url, BackendError> {
        self.base_url
            .join(&format!("rest/v1/{}", table.as_str()))
            .map_err(|err| BackendError::Http(err.to_string()))
    }

    fn request(&self, method: Method, table: Table) -> Result<RequestBuilder, BackendError> {
        let url = self.table_url(table)?;
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        Ok(self
            .client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|err| BackendError::Http(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn rows<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Vec<T>, BackendError> {
        let response = self.send(request).await?;
        let body = response
            .text()
            .await
            .map_err(|err| BackendError::Http(err.to_string()))?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&body).map_err(|err| BackendError::Decode(err.to_string()))
    }

    async fn first_row<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, BackendError> {
        Ok(self.rows(request).await?.into_iter().next())
    }

    async fn count(&self, table: Table, filters: &[(&str, String)]) -> Result<u64, BackendError> {
        let request = self
            .request(Method::HEAD, table)?
            .query(&[("select", "id")])
            .query(filters)
            .header("Prefer", "count=exact");
        let response = self.send(request).await?;
        parse_content_range(response.headers().get("content-range"))
    }

    fn publish<T: Serialize>(&self, table: Table, kind: ChangeKind, row: &T) {
        match serde_json::to_value(row) {
            Ok(value) => self.hub.publish(Change::new(table, kind, value)),
            Err(err) => tracing::warn!(%table, "unable to encode change row: {err}"),
        }
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>, BackendError> {
        let mut params: Vec<(&str, String)> = vec![
            ("select", "*".into()),
            ("order", "datetime.asc".into()),
        ];
        if !query.categories.is_empty() {
            let names = query
                .categories
                .iter()
                .map(|name| quote(name))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("category", format!("in.({names})")));
        }
        if let Some(organizer) = &query.organizer_id {
            params.push(("organizer_id", format!("eq.{organizer}")));
        }
        if let Some(from) = query.from {
            params.push(("datetime", format!("gte.{}", timestamp(from))));
        }
        if let Some(until) = query.until {
            params.push(("datetime", format!("lt.{}", timestamp(until))));
        }
        if let Some(text) = &query.text {
            let pattern = quote(&format!("%{text}%"));
            params.push((
                "or",
                format!("(title.ilike.{pattern},location_name.ilike.{pattern})"),
            ));
        }

        let request = self.request(Method::GET, Table::Events)?.query(&params);
        self.rows(request).await
    }

    async fn get_event(&self, id: &str) -> Result<Event, BackendError> {
        let request = self
            .request(Method::GET, Table::Events)?
            .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))]);
        self.first_row(request)
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("event {id}")))
    }

    async fn insert_event(
        &self,
        organizer_id: &str,
        draft: &EventDraft,
    ) -> Result<Event, BackendError> {
        let request = self
            .request(Method::POST, Table::Events)?
            .header("Prefer", "return=representation")
            .json(&NewEventRow {
                draft,
                organizer_id,
            });
        let event: Event = self
            .first_row(request)
            .await?
            .ok_or_else(|| BackendError::Decode("insert returned no row".into()))?;
        self.publish(Table::Events, ChangeKind::Insert, &event);
        Ok(event)
    }

    async fn update_event(&self, id: &str, draft: &EventDraft) -> Result<Event, BackendError> {
        let request = self
            .request(Method::PATCH, Table::Events)?
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(draft);
        let event: Event = self
            .first_row(request)
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("event {id}")))?;
        self.publish(Table::Events, ChangeKind::Update, &event);
        Ok(event)
    }

    async fn delete_event(&self, id: &str) -> Result<(), BackendError> {
        let request = self
            .request(Method::DELETE, Table::Events)?
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation");
        let removed: Vec<Event> = self.rows(request).await?;
        for event in &removed {
            self.publish(Table::Events, ChangeKind::Delete, event);
        }
        Ok(())
    }

    async fn find_attendance(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<Attendance>, BackendError> {
        let request = self.request(Method::GET, Table::Attendance)?.query(&[
            ("select", "*".to_string()),
            ("event_id", format!("eq.{event_id}")),
            ("user_id", format!("eq.{user_id}")),
        ]);
        self.first_row(request).await
    }

    async fn insert_attendance(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Attendance, BackendError> {
        let request = self
            .request(Method::POST, Table::Attendance)?
            .header("Prefer", "return=representation")
            .json(&json!({
                "event_id": event_id,
                "user_id": user_id,
                "first_chat": false,
            }));
        let attendance: Attendance = self
            .first_row(request)
            .await?
            .ok_or_else(|| BackendError::Decode("insert returned no row".into()))?;
        self.publish(Table::Attendance, ChangeKind::Insert, &attendance);
        Ok(attendance)
    }

    async fn delete_attendance(&self, event_id: &str, user_id: &str) -> Result<(), BackendError> {
        let request = self
            .request(Method::DELETE, Table::Attendance)?
            .query(&[
                ("event_id", format!("eq.{event_id}")),
                ("user_id", format!("eq.{user_id}")),
            ])
            .header("Prefer", "return=representation");
        let removed: Vec<Attendance> = self.rows(request).await?;
        for attendance in &removed {
            self.publish(Table::Attendance, ChangeKind::Delete, attendance);
        }
        Ok(())
    }

    async fn count_attendance(&self, event_id: &str) -> Result<u64, BackendError> {
        self.count(Table::Attendance, &[("event_id", format!("eq.{event_id}"))])
            .await
    }

    async fn list_attendance(&self, event_id: &str) -> Result<Vec<Attendance>, BackendError> {
        let request = self.request(Method::GET, Table::Attendance)?.query(&[
            ("select", "*".to_string()),
            ("event_id", format!("eq.{event_id}")),
            ("order", "created_at.asc".to_string()),
        ]);
        self.rows(request).await
    }

    async fn mark_first_chat(&self, attendance_id: &str) -> Result<(), BackendError> {
        let request = self
            .request(Method::PATCH, Table::Attendance)?
            .query(&[("id", format!("eq.{attendance_id}"))])
            .header("Prefer", "return=representation")
            .json(&json!({ "first_chat": true }));
        let updated: Attendance = self
            .first_row(request)
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("attendance {attendance_id}")))?;
        self.publish(Table::Attendance, ChangeKind::Update, &updated);
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
        let request = self
            .request(Method::GET, Table::Profiles)?
            .query(&[("select", "*".to_string()), ("id", format!("eq.{user_id}"))]);
        self.first_row(request).await
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<Profile, BackendError> {
        let request = self
            .request(Method::POST, Table::Profiles)?
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(profile);
        let saved: Profile = self
            .first_row(request)
            .await?
            .unwrap_or_else(|| profile.clone());
        self.publish(Table::Profiles, ChangeKind::Update, &saved);
        Ok(saved)
    }

    async fn list_messages(&self, event_id: &str) -> Result<Vec<ChatMessage>, BackendError> {
        let request = self.request(Method::GET, Table::Messages)?.query(&[
            ("select", MESSAGE_SELECT.to_string()),
            ("event_id", format!("eq.{event_id}")),
            ("order", "created_at.asc".to_string()),
        ]);
        let rows: Vec<MessageRow> = self.rows(request).await?;
        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }

    async fn insert_message(
        &self,
        event_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<ChatMessage, BackendError> {
        let request = self
            .request(Method::POST, Table::Messages)?
            .query(&[("select", MESSAGE_SELECT)])
            .header("Prefer", "return=representation")
            .json(&json!({
                "event_id": event_id,
                "sender_id": sender_id,
                "message": text,
            }));
        let row: MessageRow = self
            .first_row(request)
            .await?
            .ok_or_else(|| BackendError::Decode("insert returned no row".into()))?;
        let message = ChatMessage::from(row);
        self.publish(Table::Messages, ChangeKind::Insert, &message);
        Ok(message)
    }

    async fn count_messages(&self, event_id: &str) -> Result<u64, BackendError> {
        self.count(Table::Messages, &[("event_id", format!("eq.{event_id}"))])
            .await
    }

    fn changes(&self) -> &dyn ChangeStream {
        &self.hub
    }
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Double-quotes a filter value so commas and parentheses stay literal.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Total from a `Content-Range` header such as `0-9/42` or `*/0`.
fn parse_content_range(header: Option<&HeaderValue>) -> Result<u64, BackendError> {
    let raw = header
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| BackendError::Decode("missing content-range header".into()))?;
    raw.rsplit('/')
        .next()
        .and_then(|total| total.trim().parse::<u64>().ok())
        .ok_or_else(|| BackendError::Decode(format!("unreadable content-range {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use crate::realtime::ChangeKey;
    use httpmock::Method::{DELETE, GET, HEAD, POST};
    use httpmock::MockServer;

    fn backend(server: &MockServer, token: Option<&str>) -> RestBackend {
        RestBackend::new(RemoteSettings {
            base_url: Url::parse(&server.base_url()).unwrap(),
            anon_key: "anon-key".into(),
            access_token: token.map(str::to_string),
        })
        .unwrap()
    }

    fn event_row(id: &str, title: &str, category: &str) -> serde_json::Value {
        json!({
            "id": id,
            "title": title,
            "description": "",
            "category": category,
            "datetime": "2030-06-01T19:00:00+00:00",
            "location_name": "Hall",
            "latitude": 1.0,
            "longitude": 2.0,
            "organizer_id": "org"
        })
    }

    #[tokio::test]
    async fn list_events_sends_filters_and_auth_headers() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/v1/events")
                .query_param("select", "*")
                .query_param("order", "datetime.asc")
                .query_param("category", "in.(\"Music\",\"Tech\")")
                .query_param("or", "(title.ilike.\"%jam%\",location_name.ilike.\"%jam%\")")
                .header("apikey", "anon-key")
                .header("authorization", "Bearer user-jwt");
            then.status(200).json_body(json!([event_row("e1", "Code Jam", "Tech")]));
        });

        let query = EventQuery::default()
            .in_categories(["Music", "Tech"])
            .matching("jam");
        let events = backend(&server, Some("user-jwt"))
            .list_events(&query)
            .await
            .unwrap();

        mock.assert();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, Category::Tech);
    }

    #[tokio::test]
    async fn counts_come_from_content_range() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(HEAD)
                .path("/rest/v1/event_attendees")
                .query_param("event_id", "eq.e1")
                .header("prefer", "count=exact")
                .header("authorization", "Bearer anon-key");
            then.status(200).header("content-range", "0-2/3");
        });

        let count = backend(&server, None).count_attendance("e1").await.unwrap();
        mock.assert();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn rejected_requests_surface_status_and_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/rest/v1/event_attendees");
            then.status(409).body("duplicate key");
        });

        let err = backend(&server, None)
            .insert_attendance("e1", "u1")
            .await
            .unwrap_err();
        match err {
            BackendError::Api { status, body } => {
                assert_eq!(status, 409);
                assert_eq!(body, "duplicate key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn own_writes_are_published_as_changes() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/rest/v1/event_attendees")
                .header("prefer", "return=representation")
                .json_body(json!({"event_id": "e1", "user_id": "u1", "first_chat": false}));
            then.status(201).json_body(json!([{
                "id": "a1",
                "event_id": "e1",
                "user_id": "u1",
                "first_chat": false,
                "created_at": "2030-01-01T00:00:00+00:00"
            }]));
        });
        server.mock(|when, then| {
            when.method(DELETE)
                .path("/rest/v1/event_attendees")
                .query_param("event_id", "eq.e1")
                .query_param("user_id", "eq.u1");
            then.status(200).json_body(json!([{
                "id": "a1",
                "event_id": "e1",
                "user_id": "u1",
                "first_chat": false,
                "created_at": "2030-01-01T00:00:00+00:00"
            }]));
        });

        let backend = backend(&server, None);
        let mut changes = backend
            .changes()
            .subscribe(ChangeKey::with_eq(Table::Attendance, "event_id", "e1"));

        let attendance = backend.insert_attendance("e1", "u1").await.unwrap();
        assert_eq!(attendance.id, "a1");
        backend.delete_attendance("e1", "u1").await.unwrap();

        assert_eq!(changes.recv().await.unwrap().kind, ChangeKind::Insert);
        assert_eq!(changes.recv().await.unwrap().kind, ChangeKind::Delete);
    }

    #[tokio::test]
    async fn messages_flatten_sender_names() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/rest/v1/messages")
                .query_param("event_id", "eq.e1")
                .query_param("order", "created_at.asc");
            then.status(200).json_body(json!([
                {
                    "id": "m1",
                    "event_id": "e1",
                    "sender_id": "u1",
                    "message": "hello",
                    "created_at": "2030-01-01T00:00:00+00:00",
                    "sender": {"full_name": "Ada"}
                },
                {
                    "id": "m2",
                    "event_id": "e1",
                    "sender_id": "u2",
                    "message": "hi",
                    "created_at": "2030-01-01T00:01:00+00:00",
                    "sender": null
                }
            ]));
        });

        let messages = backend(&server, None).list_messages("e1").await.unwrap();
        assert_eq!(messages[0].sender_name.as_deref(), Some("Ada"));
        assert_eq!(messages[1].sender_name, None);
    }

    #[tokio::test]
    async fn missing_event_is_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/rest/v1/events").query_param("id", "eq.nope");
            then.status(200).json_body(json!([]));
        });

        let result = backend(&server, None).get_event("nope").await;
        assert!(matches!(result, Err(BackendError::NotFound(_))));
    }

    #[test]
    fn content_range_parsing() {
        let value = HeaderValue::from_static("*/0");
        assert_eq!(parse_content_range(Some(&value)).unwrap(), 0);
        let value = HeaderValue::from_static("0-24/120");
        assert_eq!(parse_content_range(Some(&value)).unwrap(), 120);
        assert!(parse_content_range(None).is_err());
    }
}
