// src/archive/mod.rs
//
// Append-only record of a REPL conversation.
// The engine reports every command, response line, error, and connection
// change to its archivists; backends persist them as rows of an `events` table.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod rqlite;
pub mod sqlite;
pub mod writer;

pub use rqlite::RqliteArchive;
pub use sqlite::SqliteArchive;
pub use writer::{ArchiveWriter, WriterSettings};

/// Table definition shared by the SQLite and rqlite backends
pub(crate) const EVENTS_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    data TEXT NOT NULL
)";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rqlite rejected statement: {0}")]
    Rqlite(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unreadable archive row: {0}")]
    Corrupt(String),

    #[error("archive worker: {0}")]
    Worker(String),
}

// ============================================================================
// Events
// ============================================================================

/// Kinds of archived events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    UserCommand,
    SystemResponse,
    SystemError,
    ConnectionOpened,
    ConnectionClosed,
}

/// Direction of payload-carrying events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::UserCommand,
        EventKind::SystemResponse,
        EventKind::SystemError,
        EventKind::ConnectionOpened,
        EventKind::ConnectionClosed,
    ];

    /// Name stored in the `event_type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::UserCommand => "USER_COMMAND",
            EventKind::SystemResponse => "SYSTEM_RESPONSE",
            EventKind::SystemError => "SYSTEM_ERROR",
            EventKind::ConnectionOpened => "CONNECTION_OPENED",
            EventKind::ConnectionClosed => "CONNECTION_CLOSED",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str().eq_ignore_ascii_case(name))
    }

    /// `None` for connection lifecycle events
    pub fn direction(&self) -> Option<Direction> {
        match self {
            EventKind::UserCommand => Some(Direction::Outgoing),
            EventKind::SystemResponse => Some(Direction::Incoming),
            EventKind::SystemError => Some(Direction::Error),
            EventKind::ConnectionOpened | EventKind::ConnectionClosed => None,
        }
    }

    /// Key of the payload inside the `data` JSON object
    fn data_key(&self) -> Option<&'static str> {
        match self {
            EventKind::UserCommand => Some("command"),
            EventKind::SystemResponse => Some("response"),
            EventKind::SystemError => Some("error"),
            EventKind::ConnectionOpened | EventKind::ConnectionClosed => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable archive record
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEvent {
    pub kind: EventKind,
    pub payload: String,
    pub timestamp: DateTime<Local>,
}

impl ArchiveEvent {
    pub fn new(kind: EventKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            timestamp: Local::now(),
        }
    }

    /// JSON text for the `data` column
    pub fn data_json(&self) -> String {
        let mut data = serde_json::Map::new();
        if let Some(key) = self.kind.data_key() {
            data.insert(key.to_string(), serde_json::Value::String(self.payload.clone()));
        }
        serde_json::Value::Object(data).to_string()
    }

    pub fn timestamp_str(&self) -> String {
        self.timestamp.to_rfc3339()
    }
}

/// An event as read back from a backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    pub id: i64,
    pub kind: EventKind,
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl StoredEvent {
    pub(crate) fn from_columns(
        id: i64,
        event_type: &str,
        timestamp: String,
        data: &str,
    ) -> Result<Self, ArchiveError> {
        let kind = EventKind::from_name(event_type)
            .ok_or_else(|| ArchiveError::Corrupt(format!("unknown event type {}", event_type)))?;
        Ok(Self {
            id,
            kind,
            timestamp,
            data: serde_json::from_str(data)?,
        })
    }

    /// The command, response, or error text, if the event carries one
    pub fn payload(&self) -> Option<&str> {
        self.kind
            .data_key()
            .and_then(|key| self.data.get(key))
            .and_then(|v| v.as_str())
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Receiver of archive events. Implementations must return quickly: `record`
/// is called from the serial reader thread for every completed line.
pub trait Archivist: Send + Sync {
    fn record_event(&self, event: ArchiveEvent);

    fn record(&self, kind: EventKind, payload: &str) {
        self.record_event(ArchiveEvent::new(kind, payload));
    }
}

/// Persistent store driven by the archive writer
#[async_trait]
pub trait ArchiveBackend: Send {
    /// Append a batch in order, as one transaction where the store supports it.
    async fn append(&mut self, events: &[ArchiveEvent]) -> Result<(), ArchiveError>;

    fn name(&self) -> &'static str;
}
