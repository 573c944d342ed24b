// src/archive/sqlite.rs
//
// SQLite-backed archive. One `events` row per archived event; the `data`
// column carries the payload as a small JSON object.

use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;

use super::{ArchiveBackend, ArchiveError, ArchiveEvent, EventKind, StoredEvent, EVENTS_SCHEMA_SQL};

type EventRow = (i64, String, String, String);

fn map_row(row: &rusqlite::Row) -> rusqlite::Result<EventRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

pub struct SqliteArchive {
    conn: Connection,
}

impl SqliteArchive {
    /// Open (or create) the archive file, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ArchiveError::Worker(format!("Failed to create archive dir: {}", e))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        // WAL mode so a history query can read while the writer appends
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;

        let archive = Self::with_connection(conn)?;
        tlog!("[archive] SQLite archive at {:?}", path);
        Ok(archive)
    }

    pub fn open_in_memory() -> Result<Self, ArchiveError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, ArchiveError> {
        conn.execute_batch(EVENTS_SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Insert a batch of events. Uses a single transaction.
    pub fn insert_events(&mut self, events: &[ArchiveEvent]) -> Result<(), ArchiveError> {
        if events.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO events (event_type, timestamp, data) VALUES (?1, ?2, ?3)",
            )?;
            for event in events {
                stmt.execute(params![
                    event.kind.as_str(),
                    event.timestamp_str(),
                    event.data_json(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Events in insertion order, optionally restricted to one kind.
    pub fn events(&self, kind: Option<EventKind>) -> Result<Vec<StoredEvent>, ArchiveError> {
        let mut rows: Vec<EventRow> = Vec::new();

        match kind {
            Some(kind) => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT id, event_type, timestamp, data FROM events WHERE event_type = ?1 ORDER BY id",
                )?;
                for row in stmt.query_map(params![kind.as_str()], map_row)? {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare_cached("SELECT id, event_type, timestamp, data FROM events ORDER BY id")?;
                for row in stmt.query_map([], map_row)? {
                    rows.push(row?);
                }
            }
        }

        rows.into_iter()
            .map(|(id, event_type, timestamp, data)| {
                StoredEvent::from_columns(id, &event_type, timestamp, &data)
            })
            .collect()
    }

    /// The most recent `limit` events, oldest first, optionally restricted to
    /// one kind. Only those rows are read.
    pub fn recent_events(
        &self,
        kind: Option<EventKind>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, ArchiveError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows: Vec<EventRow> = Vec::new();

        match kind {
            Some(kind) => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT id, event_type, timestamp, data FROM events WHERE event_type = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                for row in stmt.query_map(params![kind.as_str(), limit], map_row)? {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT id, event_type, timestamp, data FROM events ORDER BY id DESC LIMIT ?1",
                )?;
                for row in stmt.query_map(params![limit], map_row)? {
                    rows.push(row?);
                }
            }
        }

        rows.into_iter()
            .rev()
            .map(|(id, event_type, timestamp, data)| {
                StoredEvent::from_columns(id, &event_type, timestamp, &data)
            })
            .collect()
    }

    pub fn clear(&mut self) -> Result<(), ArchiveError> {
        self.conn.execute("DELETE FROM events", [])?;
        Ok(())
    }
}

#[async_trait]
impl ArchiveBackend for SqliteArchive {
    async fn append(&mut self, events: &[ArchiveEvent]) -> Result<(), ArchiveError> {
        self.insert_events(events)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_query_all() {
        let mut archive = SqliteArchive::open_in_memory().unwrap();
        archive
            .insert_events(&[
                ArchiveEvent::new(EventKind::ConnectionOpened, ""),
                ArchiveEvent::new(EventKind::UserCommand, "2 2 + ."),
                ArchiveEvent::new(EventKind::SystemResponse, "4 ok"),
            ])
            .unwrap();

        let events = archive.events(None).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, EventKind::ConnectionOpened);
        assert_eq!(events[0].data, serde_json::json!({}));
        assert_eq!(events[1].payload(), Some("2 2 + ."));
        assert_eq!(events[2].data, serde_json::json!({"response": "4 ok"}));
        assert!(events[0].id < events[1].id && events[1].id < events[2].id);
    }

    #[test]
    fn test_query_by_kind() {
        let mut archive = SqliteArchive::open_in_memory().unwrap();
        archive
            .insert_events(&[
                ArchiveEvent::new(EventKind::UserCommand, "words"),
                ArchiveEvent::new(EventKind::SystemError, "write failed"),
                ArchiveEvent::new(EventKind::UserCommand, "bye"),
            ])
            .unwrap();

        let commands = archive.events(Some(EventKind::UserCommand)).unwrap();
        let payloads: Vec<_> = commands.iter().filter_map(|e| e.payload()).collect();
        assert_eq!(payloads, vec!["words", "bye"]);
        assert_eq!(archive.events(Some(EventKind::SystemError)).unwrap().len(), 1);
    }

    #[test]
    fn test_recent_and_clear() {
        let mut archive = SqliteArchive::open_in_memory().unwrap();
        let batch: Vec<_> = (0..5)
            .map(|i| ArchiveEvent::new(EventKind::SystemResponse, i.to_string()))
            .collect();
        archive.insert_events(&batch).unwrap();

        let recent = archive.recent_events(None, 2).unwrap();
        let payloads: Vec<_> = recent.iter().filter_map(|e| e.payload()).collect();
        assert_eq!(payloads, vec!["3", "4"]);
        assert_eq!(archive.recent_events(None, 50).unwrap().len(), 5);

        archive.clear().unwrap();
        assert!(archive.events(None).unwrap().is_empty());
    }

    #[test]
    fn test_recent_events_of_one_kind() {
        let mut archive = SqliteArchive::open_in_memory().unwrap();
        archive
            .insert_events(&[
                ArchiveEvent::new(EventKind::UserCommand, "1 ."),
                ArchiveEvent::new(EventKind::SystemResponse, "1 . 1 ok"),
                ArchiveEvent::new(EventKind::UserCommand, "2 ."),
                ArchiveEvent::new(EventKind::UserCommand, "3 ."),
                ArchiveEvent::new(EventKind::SystemResponse, "3 . 3 ok"),
            ])
            .unwrap();

        let recent = archive.recent_events(Some(EventKind::UserCommand), 2).unwrap();
        let payloads: Vec<_> = recent.iter().filter_map(|e| e.payload()).collect();
        assert_eq!(payloads, vec!["2 .", "3 ."]);
        assert!(archive.recent_events(None, 0).unwrap().is_empty());
    }

    #[test]
    fn test_file_archive_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("archive.db");
        {
            let mut archive = SqliteArchive::open(&path).unwrap();
            archive
                .insert_events(&[ArchiveEvent::new(EventKind::UserCommand, ": sq dup * ;")])
                .unwrap();
        }
        let archive = SqliteArchive::open(&path).unwrap();
        let events = archive.events(None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload(), Some(": sq dup * ;"));
    }
}
