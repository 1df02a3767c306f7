// ==============================================================================
// checkpoint.rs - Persisted Merge Checkpoints
// ==============================================================================
// Description: Stores the next unmerged load-buffer row per target structure
//              in a local SQLite database, one transaction per committed window
// Author: Matt Barham
// Created: 2026-02-12
// Modified: 2026-03-04
// Version: 1.0.0
// ==============================================================================

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::models::MergeCheckpoint;
use crate::query::afl::ArrayName;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS merge_checkpoints (
    target       TEXT PRIMARY KEY,
    source       TEXT NOT NULL,
    next_row_id  INTEGER NOT NULL,
    rows_merged  INTEGER NOT NULL,
    windows      INTEGER NOT NULL,
    run_id       TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);";

/// A checkpoint as read back from disk
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCheckpoint {
    pub source: String,
    pub checkpoint: MergeCheckpoint,
    pub run_id: String,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed checkpoint table
pub struct CheckpointStore {
    conn: Connection,
}

impl CheckpointStore {
    pub fn open<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> PipelineResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> PipelineResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Last committed checkpoint for `target`, if any
    pub fn load(&self, target: &ArrayName) -> PipelineResult<Option<StoredCheckpoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT source, next_row_id, rows_merged, windows, run_id, updated_at
             FROM merge_checkpoints WHERE target = ?1",
        )?;

        let row = stmt
            .query_row(params![target.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .optional()?;

        let Some((source, next_row_id, rows_merged, windows, run_id, updated_at)) = row else {
            return Ok(None);
        };

        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| PipelineError::InvalidSchema(format!("bad checkpoint timestamp: {}", e)))?
            .with_timezone(&Utc);

        Ok(Some(StoredCheckpoint {
            source,
            checkpoint: MergeCheckpoint {
                next_row_id: from_sql_int(next_row_id)?,
                rows_merged: from_sql_int(rows_merged)?,
                windows: from_sql_int(windows)?,
            },
            run_id,
            updated_at,
        }))
    }

    /// Record a committed window; replaces any earlier checkpoint for `target`
    pub fn commit(
        &mut self,
        run_id: Uuid,
        source: &ArrayName,
        target: &ArrayName,
        checkpoint: &MergeCheckpoint,
    ) -> PipelineResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO merge_checkpoints
                 (target, source, next_row_id, rows_merged, windows, run_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(target) DO UPDATE SET
                 source = excluded.source,
                 next_row_id = excluded.next_row_id,
                 rows_merged = excluded.rows_merged,
                 windows = excluded.windows,
                 run_id = excluded.run_id,
                 updated_at = excluded.updated_at",
            params![
                target.as_str(),
                source.as_str(),
                to_sql_int(checkpoint.next_row_id)?,
                to_sql_int(checkpoint.rows_merged)?,
                to_sql_int(checkpoint.windows)?,
                run_id.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        debug!(
            "Checkpoint {} -> {}: next row {}",
            source, target, checkpoint.next_row_id
        );
        Ok(())
    }

    /// Forget the checkpoint once a merge has finished
    pub fn clear(&self, target: &ArrayName) -> PipelineResult<()> {
        self.conn.execute(
            "DELETE FROM merge_checkpoints WHERE target = ?1",
            params![target.as_str()],
        )?;
        Ok(())
    }
}

fn to_sql_int(value: u64) -> PipelineResult<i64> {
    i64::try_from(value)
        .map_err(|_| PipelineError::InvalidSchema(format!("checkpoint value {} exceeds i64", value)))
}

fn from_sql_int(value: i64) -> PipelineResult<u64> {
    u64::try_from(value)
        .map_err(|_| PipelineError::InvalidSchema(format!("negative checkpoint value {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn names() -> (ArrayName, ArrayName) {
        (
            ArrayName::new("study_gt_load").unwrap(),
            ArrayName::new("study_gt").unwrap(),
        )
    }

    #[test]
    fn test_commit_load_clear() {
        let mut store = CheckpointStore::open_in_memory().unwrap();
        let (source, target) = names();
        let run = Uuid::new_v4();

        assert!(store.load(&target).unwrap().is_none());

        let first = MergeCheckpoint {
            next_row_id: 1_000_000,
            rows_merged: 1_000_000,
            windows: 1,
        };
        store.commit(run, &source, &target, &first).unwrap();

        let second = MergeCheckpoint {
            next_row_id: 2_000_000,
            rows_merged: 2_000_000,
            windows: 2,
        };
        store.commit(run, &source, &target, &second).unwrap();

        let stored = store.load(&target).unwrap().unwrap();
        assert_eq!(stored.checkpoint, second);
        assert_eq!(stored.source, "study_gt_load");
        assert_eq!(stored.run_id, run.to_string());

        store.clear(&target).unwrap();
        assert!(store.load(&target).unwrap().is_none());
    }

    #[test]
    fn test_checkpoint_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let (source, target) = names();

        {
            let mut store = CheckpointStore::open(&path).unwrap();
            store
                .commit(Uuid::new_v4(), &source, &target, &MergeCheckpoint::starting_at(42))
                .unwrap();
        }

        let reopened = CheckpointStore::open(&path).unwrap();
        let stored = reopened.load(&target).unwrap().unwrap();
        assert_eq!(stored.checkpoint.next_row_id, 42);
    }

    #[test]
    fn test_rejects_values_beyond_i64() {
        let mut store = CheckpointStore::open_in_memory().unwrap();
        let (source, target) = names();
        let huge = MergeCheckpoint::starting_at(u64::MAX);
        assert!(store.commit(Uuid::new_v4(), &source, &target, &huge).is_err());
    }
}
