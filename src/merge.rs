// ==============================================================================
// merge.rs - Chunked Resumable Merge
// ==============================================================================
// Description: Drains a load buffer into its dimensioned target in bounded
//              row windows, checkpointing each window and pruning old versions
// Author: Matt Barham
// Created: 2026-02-12
// Modified: 2026-03-12
// Version: 1.0.0
// ==============================================================================
// Window loop:
//   start = --begin | stored checkpoint | 0
//   loop:
//     n = count(between(source, start, start + size - 1))
//     n == 0 -> done
//     insert(redimension(<window>, target), target)
//     checkpoint(start + size); every k windows prune versions below the latest
// A buffer that fits in one window (and starts at row 0) is merged by a
// single whole-buffer statement.
// ==============================================================================

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::{AuditEventType, RunJournal};
use crate::checkpoint::CheckpointStore;
use crate::config::MergeSettings;
use crate::discovery::Discovery;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{MergeCheckpoint, VersionWatermark};
use crate::query::afl::{ArrayName, Expr, Ident, Query};
use crate::query::client::{fetch_scalar_as, QueryExecutor};

/// Chromosome name → id translation applied to each window before redimensioning
#[derive(Debug, Clone)]
pub struct IndexLookup {
    /// Structure whose single dimension enumerates the names
    pub index: ArrayName,
    /// Name attribute, present in both the index and the source
    pub name_attr: Ident,
    /// Output attribute carrying the looked-up position
    pub output: Ident,
}

impl IndexLookup {
    pub fn chromosomes(chroms: ArrayName) -> PipelineResult<Self> {
        Ok(Self {
            index: chroms,
            name_attr: Ident::new("chrom")?,
            output: Ident::new("chromid")?,
        })
    }

    /// Translate the name attribute of `source` rows read through `input`
    pub fn apply(&self, input: Expr, source: &ArrayName) -> Expr {
        input.index_lookup(
            Expr::array(&self.index).project(&[&self.name_attr]),
            source.attr(&self.name_attr),
            self.output.clone(),
        )
    }
}

/// Outcome of one merge run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Row the run started from
    pub resumed_from: u64,
    /// Insert statements committed by this run
    pub windows: u64,
    /// Rows committed by this run
    pub rows_merged: u64,
    /// First row not merged (end of buffer once the run completes)
    pub next_row_id: u64,
    pub versions_pruned: u64,
    /// Source rows left behind an empty window (known only for runs from row 0)
    pub rows_unmerged: u64,
}

/// Merge of one load buffer into one target
pub struct ChunkedMerge<'a, E: QueryExecutor + ?Sized> {
    executor: &'a E,
    source: ArrayName,
    target: ArrayName,
    settings: MergeSettings,
    lookup: Option<IndexLookup>,
}

impl<'a, E: QueryExecutor + ?Sized> ChunkedMerge<'a, E> {
    pub fn new(executor: &'a E, source: ArrayName, target: ArrayName, settings: MergeSettings) -> Self {
        Self {
            executor,
            source,
            target,
            settings,
            lookup: None,
        }
    }

    pub fn with_index_lookup(mut self, lookup: IndexLookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Rows selected for one window (or the whole buffer when `range` is None)
    fn window_input(&self, range: Option<(u64, u64)>) -> Expr {
        let mut input = Expr::array(&self.source);
        if let Some((start, end)) = range {
            input = input.between(start, end);
        }
        match &self.lookup {
            Some(lookup) => lookup.apply(input, &self.source),
            None => input,
        }
    }

    /// Statement committing one window
    pub fn window_statement(&self, range: Option<(u64, u64)>) -> Query {
        Query::Insert {
            input: self.window_input(range).redimension(&self.target),
            into: self.target.clone(),
        }
    }

    /// Row to start from: explicit begin, else a checkpoint for the same source, else 0
    fn resume_point(&self, checkpoints: &CheckpointStore) -> PipelineResult<MergeCheckpoint> {
        if let Some(begin) = self.settings.begin {
            info!("Merging {} from explicit row {}", self.source, begin);
            return Ok(MergeCheckpoint::starting_at(begin));
        }

        match checkpoints.load(&self.target)? {
            Some(stored) if stored.source == self.source.as_str() => {
                info!(
                    "Resuming merge into {} at row {} (checkpoint from run {}, {})",
                    self.target, stored.checkpoint.next_row_id, stored.run_id, stored.updated_at
                );
                Ok(stored.checkpoint)
            }
            Some(stored) => {
                warn!(
                    "Ignoring checkpoint for {} written by a merge from {}",
                    self.target, stored.source
                );
                Ok(MergeCheckpoint::starting_at(0))
            }
            None => Ok(MergeCheckpoint::starting_at(0)),
        }
    }

    /// Run the merge to completion.
    ///
    /// A failing window aborts the run; every window committed before it is
    /// recorded in the checkpoint store so a rerun continues after it.
    pub async fn run(
        &self,
        checkpoints: &mut CheckpointStore,
        journal: &RunJournal,
    ) -> PipelineResult<MergeReport> {
        self.settings
            .validate()
            .map_err(|e| PipelineError::InvalidSchema(e.to_string()))?;

        let mut progress = self.resume_point(checkpoints)?;
        let mut report = MergeReport {
            resumed_from: progress.next_row_id,
            next_row_id: progress.next_row_id,
            ..MergeReport::default()
        };

        let mut expected = None;
        if progress.next_row_id == 0 {
            let total = Discovery::new(self.executor).row_count(&self.source).await?;
            if total <= self.settings.window_size {
                info!(
                    "{} holds {} rows, merging into {} in one statement",
                    self.source, total, self.target
                );
                self.executor.execute(&self.window_statement(None)).await?;
                report.windows = 1;
                report.rows_merged = total;
                report.next_row_id = total;
                journal.record(
                    AuditEventType::WindowMerged,
                    Some(self.target.as_str()),
                    json!({ "start": 0, "rows": total, "whole_buffer": true }),
                );
                checkpoints.clear(&self.target)?;
                return Ok(report);
            }
            info!(
                "{} holds {} rows, merging into {} in windows of {}",
                self.source, total, self.target, self.settings.window_size
            );
            expected = Some(total);
        }

        let size = self.settings.window_size;
        loop {
            let start = progress.next_row_id;
            let end = start.checked_add(size - 1).ok_or_else(|| {
                PipelineError::InvalidSchema(format!("window at {} overflows the row space", start))
            })?;

            let window_count = Query::Read(Expr::array(&self.source).between(start, end).count());
            let rows: u64 = fetch_scalar_as(self.executor, &window_count).await?;
            if rows == 0 {
                debug!("No rows in [{}, {}], merge complete", start, end);
                break;
            }

            self.executor.execute(&self.window_statement(Some((start, end)))).await?;

            progress.next_row_id = end + 1;
            progress.rows_merged += rows;
            progress.windows += 1;
            checkpoints.commit(journal.run_id(), &self.source, &self.target, &progress)?;

            report.windows += 1;
            report.rows_merged += rows;
            report.next_row_id = progress.next_row_id;

            info!(
                "Merged rows [{}, {}] into {}: {} rows ({} total)",
                start, end, self.target, rows, report.rows_merged
            );
            journal.record(
                AuditEventType::WindowMerged,
                Some(self.target.as_str()),
                json!({ "start": start, "end": end, "rows": rows, "total": report.rows_merged }),
            );

            let every = u64::from(self.settings.prune_every);
            if every > 0 && report.windows % every == 0 {
                let watermark = self.prune_versions().await?;
                report.versions_pruned += 1;
                journal.record(
                    AuditEventType::VersionsPruned,
                    Some(self.target.as_str()),
                    json!({ "below": watermark.0 }),
                );
            }
        }

        if let Some(total) = expected.filter(|t| report.rows_merged < *t) {
            report.rows_unmerged = total - report.rows_merged;
            warn!(
                "Merge into {} stopped at the empty window from row {}: {} of {} rows of {} merged",
                self.target,
                report.next_row_id,
                report.rows_merged,
                total,
                self.source
            );
        }

        checkpoints.clear(&self.target)?;
        info!(
            "Merge into {} complete: {} windows, {} rows",
            self.target, report.windows, report.rows_merged
        );
        Ok(report)
    }

    /// Remove every version of the target below its latest one
    async fn prune_versions(&self) -> PipelineResult<VersionWatermark> {
        let latest = VersionWatermark(Discovery::new(self.executor).latest_version(&self.target).await?);
        info!("Pruning versions of {} below {}", self.target, latest.0);
        self.executor
            .execute(&Query::RemoveVersions {
                array: self.target.clone(),
                below: latest.0,
            })
            .await?;
        Ok(latest)
    }
}
