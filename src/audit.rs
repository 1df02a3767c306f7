// ==============================================================================
// audit.rs - Run Journal
// ==============================================================================
// Description: Append-only trail of pipeline runs, staged partitions, merged
//              windows and version pruning, kept in the local state database
// Author: Matt Barham
// Created: 2026-02-12
// Modified: 2026-03-04
// Version: 1.0.0
// ==============================================================================

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

use crate::error::PipelineResult;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS run_journal (
    id          TEXT PRIMARY KEY,
    run_id      TEXT NOT NULL,
    timestamp   TEXT NOT NULL,
    event_type  TEXT NOT NULL,
    resource    TEXT,
    details     TEXT NOT NULL,
    severity    TEXT NOT NULL
);";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    RunStarted,
    RunCompleted,
    RunFailed,
    StructureCreated,
    PartitionStaged,
    WindowMerged,
    VersionsPruned,
    StaleTempsRemoved,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::RunStarted => "run_started",
            AuditEventType::RunCompleted => "run_completed",
            AuditEventType::RunFailed => "run_failed",
            AuditEventType::StructureCreated => "structure_created",
            AuditEventType::PartitionStaged => "partition_staged",
            AuditEventType::WindowMerged => "window_merged",
            AuditEventType::VersionsPruned => "versions_pruned",
            AuditEventType::StaleTempsRemoved => "stale_temps_removed",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

impl LogSeverity {
    fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Info => "info",
            LogSeverity::Warning => "warning",
            LogSeverity::Error => "error",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub resource: Option<String>,
    pub details: serde_json::Value,
    pub severity: LogSeverity,
}

impl AuditEvent {
    pub fn new(
        run_id: Uuid,
        event_type: AuditEventType,
        resource: Option<String>,
        details: serde_json::Value,
    ) -> Self {
        let severity = match event_type {
            AuditEventType::RunFailed => LogSeverity::Error,
            AuditEventType::StaleTempsRemoved => LogSeverity::Warning,
            _ => LogSeverity::Info,
        };

        Self {
            id: Uuid::new_v4(),
            run_id,
            timestamp: Utc::now(),
            event_type,
            resource,
            details,
            severity,
        }
    }
}

/// Journal for one pipeline run
pub struct RunJournal {
    conn: Connection,
    run_id: Uuid,
}

impl RunJournal {
    pub fn open<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        Self::init(Connection::open(path.as_ref())?)
    }

    pub fn open_in_memory() -> PipelineResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> PipelineResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            run_id: Uuid::new_v4(),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn insert(&self, event: &AuditEvent) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO run_journal (id, run_id, timestamp, event_type, resource, details, severity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.id.to_string(),
                event.run_id.to_string(),
                event.timestamp.to_rfc3339(),
                event.event_type.as_str(),
                event.resource,
                event.details.to_string(),
                event.severity.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Record an event; journal failures are logged and never abort the run
    pub fn record(&self, event_type: AuditEventType, resource: Option<&str>, details: serde_json::Value) {
        let event = AuditEvent::new(self.run_id, event_type, resource.map(str::to_string), details);
        if let Err(e) = self.insert(&event) {
            warn!("Failed to write journal event {:?}: {}", event_type, e);
        }
    }

    /// Events of this run, oldest first
    pub fn events(&self) -> PipelineResult<Vec<(AuditEventType, Option<String>, serde_json::Value)>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_type, resource, details FROM run_journal
             WHERE run_id = ?1 ORDER BY timestamp, rowid",
        )?;
        let rows = stmt.query_map(params![self.run_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (event_type, resource, details) = row?;
            // Stored names are the serde names, so decode through serde
            let event_type: AuditEventType =
                match serde_json::from_value(serde_json::Value::String(event_type)) {
                    Ok(t) => t,
                    Err(_) => continue,
                };
            let details = serde_json::from_str(&details).unwrap_or(serde_json::Value::Null);
            events.push((event_type, resource, details));
        }
        Ok(events)
    }
}
