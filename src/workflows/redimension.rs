// ==============================================================================
// redimension.rs - Variant & Genotype Redimension Workflow
// ==============================================================================
// Description: Declares the final var/gt structures and fills them from their
//              load buffers, translating chromosome names to ids on the way
// Author: Matt Barham
// Created: 2026-02-18
// Modified: 2026-03-12
// Version: 1.0.0
// ==============================================================================
// Extents:
//   chromid  0 .. high(<base>_chroms), chunk 1
//   pos      1 .. max(<base>_var_load.pos), chunk 200000
//   var      1 .. max(<base>_var_load.var), one chunk
//   sampleid 0 .. high(<base>_samples), samples chunk
// ==============================================================================

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::time::Instant;
use tracing::info;

use crate::audit::AuditEventType;
use crate::config::MergeSettings;
use crate::discovery::{Discovery, RedimensionBounds};
use crate::error::{PipelineError, PipelineResult};
use crate::merge::{ChunkedMerge, IndexLookup, MergeReport};
use crate::models::{
    ArrayLayout, AttributeSpec, AttributeType, DimensionSpec, HighBound, StructureSchema,
};
use crate::query::afl::{ArrayName, Expr, Ident, Query};
use crate::query::client::QueryExecutor;
use crate::workflows::RunState;

const POS_CHUNK: u64 = 200_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct RedimensionOptions {
    pub skip_gt: bool,
    pub skip_var: bool,
    /// Window policy for the gt merge
    pub merge: MergeSettings,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RedimensionReport {
    pub created: Vec<String>,
    pub var_stored: bool,
    pub gt: Option<MergeReport>,
}

fn ident(name: &str) -> PipelineResult<Ident> {
    Ident::new(name)
}

fn variant_dims(bounds: &RedimensionBounds) -> PipelineResult<Vec<DimensionSpec>> {
    let var_chunk = u64::try_from(bounds.var_high).map_err(|_| {
        PipelineError::InvalidSchema(format!("var high {} is negative", bounds.var_high))
    })?;
    Ok(vec![
        DimensionSpec::new(ident("chromid")?, 0, HighBound::Fixed(bounds.chrom_high), 1)?,
        DimensionSpec::new(ident("pos")?, 1, HighBound::Fixed(bounds.pos_high), POS_CHUNK)?,
        DimensionSpec::new(ident("var")?, 1, HighBound::Fixed(bounds.var_high), var_chunk)?,
    ])
}

pub fn var_schema(bounds: &RedimensionBounds) -> PipelineResult<StructureSchema> {
    StructureSchema::new(
        vec![
            AttributeSpec::nullable(ident("id")?, AttributeType::String),
            AttributeSpec::new(ident("ref")?, AttributeType::String),
            AttributeSpec::new(ident("alt")?, AttributeType::String),
            AttributeSpec::new(ident("alleles")?, AttributeType::UInt32),
            AttributeSpec::nullable(ident("qual")?, AttributeType::Float),
            AttributeSpec::nullable(ident("filter")?, AttributeType::String),
            AttributeSpec::nullable(ident("info")?, AttributeType::String),
            AttributeSpec::nullable(ident("format")?, AttributeType::String),
        ],
        variant_dims(bounds)?,
    )
}

pub fn gt_schema(bounds: &RedimensionBounds) -> PipelineResult<StructureSchema> {
    let mut dims = variant_dims(bounds)?;
    dims.push(DimensionSpec::new(
        ident("sampleid")?,
        0,
        HighBound::Fixed(bounds.sample_high),
        bounds.sample_chunk,
    )?);
    StructureSchema::new(
        vec![
            AttributeSpec::nullable(ident("gt")?, AttributeType::Gt16),
            AttributeSpec::nullable(ident("unparsed")?, AttributeType::String),
        ],
        dims,
    )
}

pub struct RedimensionWorkflow<'a, E: QueryExecutor + ?Sized> {
    executor: &'a E,
    layout: ArrayLayout,
    options: RedimensionOptions,
}

impl<'a, E: QueryExecutor + ?Sized> RedimensionWorkflow<'a, E> {
    pub fn new(executor: &'a E, layout: ArrayLayout, options: RedimensionOptions) -> Self {
        Self {
            executor,
            layout,
            options,
        }
    }

    pub async fn run(&self, state: &mut RunState) -> Result<RedimensionReport> {
        let discovery = Discovery::new(self.executor);
        let mut report = RedimensionReport::default();

        let bounds = discovery
            .redimension_bounds(&self.layout)
            .await
            .context("Failed to discover redimension bounds")?;
        info!(
            "chrom_high {}, pos_high {}, var_high {}, sample_high {}",
            bounds.chrom_high, bounds.pos_high, bounds.var_high, bounds.sample_high
        );

        let var = self.layout.var();
        let gt = self.layout.gt();
        for (name, schema) in [(&var, var_schema(&bounds)?), (&gt, gt_schema(&bounds)?)] {
            if self.create_if_missing(name, schema, state).await? {
                report.created.push(name.to_string());
            }
        }

        if self.options.skip_var {
            info!("Skipping var redimension");
        } else {
            info!("Redimensioning var array");
            let started = Instant::now();
            let var_load = self.layout.var_load();
            let lookup = IndexLookup::chromosomes(self.layout.chroms())?;
            self.executor
                .execute(&Query::Store {
                    input: lookup.apply(Expr::array(&var_load), &var_load).redimension(&var),
                    into: var.clone(),
                })
                .await
                .with_context(|| format!("Failed to redimension {} into {}", var_load, var))?;
            report.var_stored = true;
            info!(
                "Finished variation array redimension - time: {:?}",
                started.elapsed()
            );
        }

        if self.options.skip_gt {
            info!("Skipping gt redimension");
        } else {
            info!("Redimensioning genotype array");
            let started = Instant::now();
            let merge = ChunkedMerge::new(self.executor, self.layout.gt_load(), gt, self.options.merge)
                .with_index_lookup(IndexLookup::chromosomes(self.layout.chroms())?)
                .run(&mut state.checkpoints, &state.journal)
                .await
                .context("Failed to redimension genotype array")?;
            info!(
                "Finished genotype array redimension - time: {:?}",
                started.elapsed()
            );
            report.gt = Some(merge);
        }

        Ok(report)
    }

    /// Declare `name` unless the store already has it; true when created
    async fn create_if_missing(
        &self,
        name: &ArrayName,
        schema: StructureSchema,
        state: &RunState,
    ) -> Result<bool> {
        if Discovery::new(self.executor).exists(name).await? {
            info!("{} exists - will not recreate", name);
            return Ok(false);
        }

        self.executor
            .execute(&Query::Create {
                name: name.clone(),
                schema,
            })
            .await
            .with_context(|| format!("Failed to create {}", name))?;
        state.journal.record(
            AuditEventType::StructureCreated,
            Some(name.as_str()),
            json!({}),
        );
        Ok(true)
    }
}
