// src/archive/rqlite.rs
//
// rqlite-backed archive over its HTTP API.
// Writes go to /db/execute as parameterised statements in one transaction;
// reads go to /db/query. Same `events` table as the SQLite backend.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{ArchiveBackend, ArchiveError, ArchiveEvent, EventKind, StoredEvent, EVENTS_SCHEMA_SQL};

/// Default HTTP port of an rqlite node
pub const DEFAULT_RQLITE_PORT: u16 = 4001;

const INSERT_SQL: &str = "INSERT INTO events (event_type, timestamp, data) VALUES (?, ?, ?)";

pub struct RqliteArchive {
    client: reqwest::Client,
    base_url: String,
}

impl RqliteArchive {
    /// Connect to a node and create the events table if needed.
    pub async fn connect(host: &str, port: u16) -> Result<Self, ArchiveError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        let archive = Self {
            client,
            base_url: format!("http://{}:{}", host, port),
        };

        archive.execute(json!([[EVENTS_SCHEMA_SQL]])).await?;
        tlog!("[archive] rqlite archive at {}", archive.base_url);
        Ok(archive)
    }

    /// Events in insertion order, optionally restricted to one kind.
    pub async fn events(&self, kind: Option<EventKind>) -> Result<Vec<StoredEvent>, ArchiveError> {
        self.query(query_statement(kind, None)).await
    }

    /// The most recent `limit` events, oldest first.
    pub async fn recent_events(
        &self,
        kind: Option<EventKind>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, ArchiveError> {
        let mut events = self.query(query_statement(kind, Some(limit))).await?;
        events.reverse();
        Ok(events)
    }

    pub async fn clear(&self) -> Result<(), ArchiveError> {
        self.execute(json!([["DELETE FROM events"]])).await
    }

    async fn query(&self, statement: Value) -> Result<Vec<StoredEvent>, ArchiveError> {
        let response: Value = self
            .client
            .post(format!("{}/db/query", self.base_url))
            .json(&statement)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_query_response(&response)
    }

    async fn execute(&self, statements: Value) -> Result<(), ArchiveError> {
        let response: Value = self
            .client
            .post(format!("{}/db/execute?transaction", self.base_url))
            .json(&statements)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        check_execute_response(&response)
    }
}

#[async_trait]
impl ArchiveBackend for RqliteArchive {
    async fn append(&mut self, events: &[ArchiveEvent]) -> Result<(), ArchiveError> {
        if events.is_empty() {
            return Ok(());
        }
        self.execute(insert_statements(events)).await
    }

    fn name(&self) -> &'static str {
        "rqlite"
    }
}

// ============================================================================
// Request / Response Helpers
// ============================================================================

/// Parameterised INSERT statements in rqlite's `[[sql, args...], ...]` form
fn insert_statements(events: &[ArchiveEvent]) -> Value {
    Value::Array(
        events
            .iter()
            .map(|e| json!([INSERT_SQL, e.kind.as_str(), e.timestamp_str(), e.data_json()]))
            .collect(),
    )
}

/// rqlite answers HTTP 200 even when a statement fails; errors sit per result.
/// SELECT over `events`. With a limit the newest rows come first.
fn query_statement(kind: Option<EventKind>, limit: Option<usize>) -> Value {
    let mut sql = String::from("SELECT id, event_type, timestamp, data FROM events");
    let mut args: Vec<Value> = Vec::new();
    if let Some(kind) = kind {
        sql.push_str(" WHERE event_type = ?");
        args.push(json!(kind.as_str()));
    }
    match limit {
        Some(limit) => {
            sql.push_str(" ORDER BY id DESC LIMIT ?");
            args.push(json!(limit));
        }
        None => sql.push_str(" ORDER BY id"),
    }

    let mut statement = vec![Value::String(sql)];
    statement.extend(args);
    json!([statement])
}

fn check_execute_response(response: &Value) -> Result<(), ArchiveError> {
    if let Some(err) = response.get("error").and_then(Value::as_str) {
        return Err(ArchiveError::Rqlite(err.to_string()));
    }
    let results = response
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| ArchiveError::Rqlite("response has no results".to_string()))?;

    for result in results {
        if let Some(err) = result.get("error").and_then(Value::as_str) {
            return Err(ArchiveError::Rqlite(err.to_string()));
        }
    }
    Ok(())
}

fn parse_query_response(response: &Value) -> Result<Vec<StoredEvent>, ArchiveError> {
    check_execute_response(response)?;

    let Some(result) = response
        .get("results")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
    else {
        return Ok(Vec::new());
    };

    // An empty table comes back without a "values" key
    let Some(values) = result.get("values").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    values
        .iter()
        .map(|row| {
            let cols = row
                .as_array()
                .filter(|c| c.len() == 4)
                .ok_or_else(|| ArchiveError::Corrupt(format!("unexpected row shape: {}", row)))?;
            let id = cols[0]
                .as_i64()
                .ok_or_else(|| ArchiveError::Corrupt(format!("bad id: {}", cols[0])))?;
            let text = |v: &Value| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ArchiveError::Corrupt(format!("expected text, got {}", v)))
            };
            StoredEvent::from_columns(id, &text(&cols[1])?, text(&cols[2])?, &text(&cols[3])?)
        })
        .collect()
}
