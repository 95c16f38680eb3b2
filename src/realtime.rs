//! Change notifications.
//!
//! Stored-data changes are fanned out through a [`ChangeHub`]. Anything that
//! learns about a change (a local write, a remote push transport, a poller)
//! publishes it on the hub; consumers hold a [`Subscription`] scoped to a
//! table and an optional `column = value` row filter. Dropping the
//! subscription unsubscribes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

const HUB_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Events,
    #[serde(rename = "event_attendees")]
    Attendance,
    Messages,
    Profiles,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Events => "events",
            Table::Attendance => "event_attendees",
            Table::Messages => "messages",
            Table::Profiles => "profiles",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// The subscriber fell behind and missed changes; refetch everything.
    Resync,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub table: Table,
    pub kind: ChangeKind,
    /// The affected row (the old row for deletes).
    pub row: Value,
}

impl Change {
    pub fn new(table: Table, kind: ChangeKind, row: Value) -> Self {
        Self { table, kind, row }
    }

    fn resync(table: Table) -> Self {
        Self::new(table, ChangeKind::Resync, Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeKey {
    pub table: Table,
    pub filter: Option<RowFilter>,
}

impl ChangeKey {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            filter: None,
        }
    }

    pub fn with_eq(table: Table, column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            table,
            filter: Some(RowFilter {
                column: column.into(),
                value: value.into(),
            }),
        }
    }

    pub fn matches(&self, change: &Change) -> bool {
        if change.table != self.table {
            return false;
        }
        if change.kind == ChangeKind::Resync {
            return true;
        }
        match &self.filter {
            None => true,
            Some(filter) => match change.row.get(&filter.column) {
                Some(Value::String(s)) => *s == filter.value,
                Some(Value::Null) | None => false,
                Some(other) => other.to_string() == filter.value,
            },
        }
    }
}

/// Anything that can hand out change subscriptions.
pub trait ChangeStream: Send + Sync {
    fn subscribe(&self, key: ChangeKey) -> Subscription;
}

pub struct ChangeHub {
    tx: broadcast::Sender<Change>,
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, change: Change) {
        if self.tx.send(change).is_err() {
            tracing::trace!("change published with no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ChangeStream for ChangeHub {
    fn subscribe(&self, key: ChangeKey) -> Subscription {
        Subscription {
            key,
            rx: self.tx.subscribe(),
        }
    }
}

pub struct Subscription {
    key: ChangeKey,
    rx: broadcast::Receiver<Change>,
}

impl Subscription {
    pub fn key(&self) -> &ChangeKey {
        &self.key
    }

    /// Next change matching the key. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Change> {
        loop {
            match self.rx.recv().await {
                Ok(change) if self.key.matches(&change) => return Some(change),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(table = %self.key.table, skipped, "change subscriber lagged");
                    return Some(Change::resync(self.key.table));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscription_only_sees_matching_rows() {
        let hub = ChangeHub::new();
        let mut sub = hub.subscribe(ChangeKey::with_eq(Table::Attendance, "event_id", "e1"));

        hub.publish(Change::new(
            Table::Messages,
            ChangeKind::Insert,
            json!({"event_id": "e1"}),
        ));
        hub.publish(Change::new(
            Table::Attendance,
            ChangeKind::Insert,
            json!({"event_id": "e2"}),
        ));
        hub.publish(Change::new(
            Table::Attendance,
            ChangeKind::Delete,
            json!({"event_id": "e1", "user_id": "u1"}),
        ));

        let change = sub.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.row["user_id"], "u1");
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let hub = ChangeHub::new();
        let sub = hub.subscribe(ChangeKey::table(Table::Events));
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn closed_hub_ends_the_stream() {
        let hub = ChangeHub::new();
        let mut sub = hub.subscribe(ChangeKey::table(Table::Events));
        drop(hub);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn numeric_filter_values_compare_as_text() {
        let key = ChangeKey::with_eq(Table::Messages, "event_id", "42");
        let change = Change::new(Table::Messages, ChangeKind::Insert, json!({"event_id": 42}));
        assert!(key.matches(&change));
    }
}
