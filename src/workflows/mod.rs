// ==============================================================================
// workflows/mod.rs - Pipeline Workflows
// ==============================================================================
// Description: End-to-end orchestrations behind each CLI subcommand
// Author: Matt Barham
// Created: 2026-02-16
// Modified: 2026-03-06
// Version: 1.0.0
// ==============================================================================

pub mod allele_counts;
pub mod merge;
pub mod redimension;

pub use allele_counts::{AlleleCountsOptions, AlleleCountsReport, AlleleCountsWorkflow};
pub use merge::MergeWorkflow;
pub use redimension::{RedimensionOptions, RedimensionReport, RedimensionWorkflow};

use anyhow::{Context, Result};
use std::path::Path;

use crate::audit::RunJournal;
use crate::checkpoint::CheckpointStore;

/// Local state carried through one run: merge checkpoints and the journal
pub struct RunState {
    pub checkpoints: CheckpointStore,
    pub journal: RunJournal,
}

impl RunState {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            checkpoints: CheckpointStore::open(path)
                .with_context(|| format!("Failed to open checkpoint store {:?}", path))?,
            journal: RunJournal::open(path)
                .with_context(|| format!("Failed to open run journal {:?}", path))?,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            checkpoints: CheckpointStore::open_in_memory()?,
            journal: RunJournal::open_in_memory()?,
        })
    }
}
