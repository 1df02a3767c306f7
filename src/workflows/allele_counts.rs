// ==============================================================================
// allele_counts.rs - Population × Allele Count Workflow
// ==============================================================================
// Description: Discovers bounds, allocates the flat index, stages every
//              population × allele partition and merges the load buffer into
//              the final allele-count structure
// Author: Matt Barham
// Created: 2026-02-16
// Modified: 2026-03-12
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::allocator::{allocate_uniform, AllocationPlan};
use crate::audit::AuditEventType;
use crate::config::MergeSettings;
use crate::discovery::{AlleleCountBounds, Discovery};
use crate::error::PipelineResult;
use crate::merge::{ChunkedMerge, MergeReport};
use crate::models::{
    ArrayLayout, AttributeSpec, AttributeType, DimensionSpec, HighBound, StructureSchema,
};
use crate::query::afl::{Ident, Query};
use crate::query::client::QueryExecutor;
use crate::staging::StagedCommitPipeline;
use crate::workflows::RunState;

#[derive(Debug, Clone, Copy, Default)]
pub struct AlleleCountsOptions {
    pub merge: MergeSettings,
    /// Remove temporaries left by a killed run before staging
    pub drop_stale_temps: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlleleCountsReport {
    pub partitions_staged: usize,
    /// Size of the flat index space (0 when staging was skipped)
    pub flat_rows: u64,
    pub merge: MergeReport,
}

/// Final structure: one count per variant × population × allele
pub fn allele_counts_schema(bounds: &AlleleCountBounds) -> PipelineResult<StructureSchema> {
    let mut dims: Vec<DimensionSpec> = bounds.variant_dims.iter().take(3).cloned().collect();
    let last_popid = bounds.populations.len() as i64 - 1;
    dims.push(DimensionSpec::new(
        Ident::new("popid")?,
        0,
        HighBound::Fixed(last_popid),
        1,
    )?);
    dims.push(DimensionSpec::new(
        Ident::new("allele")?,
        -1,
        HighBound::Fixed(i64::from(bounds.max_allele)),
        u64::from(bounds.max_allele) + 2,
    )?);

    StructureSchema::new(
        vec![AttributeSpec::nullable(Ident::new("count")?, AttributeType::UInt64)],
        dims,
    )
}

pub struct AlleleCountsWorkflow<'a, E: QueryExecutor + ?Sized> {
    executor: &'a E,
    layout: ArrayLayout,
    options: AlleleCountsOptions,
}

impl<'a, E: QueryExecutor + ?Sized> AlleleCountsWorkflow<'a, E> {
    pub fn new(executor: &'a E, layout: ArrayLayout, options: AlleleCountsOptions) -> Self {
        Self {
            executor,
            layout,
            options,
        }
    }

    pub async fn run(&self, state: &mut RunState) -> Result<AlleleCountsReport> {
        let target = self.layout.allele_counts();
        let load = self.layout.allele_counts_load();

        let resuming = self.options.merge.begin.is_some()
            || state
                .checkpoints
                .load(&target)
                .context("Failed to read merge checkpoint")?
                .is_some();

        let (partitions_staged, flat_rows) = if resuming {
            info!("Load buffer {} already staged, resuming merge into {}", load, target);
            (0, 0)
        } else {
            let plan = self.stage_all(state).await?;
            if plan.is_empty() {
                return Ok(AlleleCountsReport {
                    partitions_staged: 0,
                    flat_rows: 0,
                    merge: MergeReport::default(),
                });
            }
            (plan.len(), plan.total_rows())
        };

        let merge = ChunkedMerge::new(self.executor, load, target, self.options.merge)
            .run(&mut state.checkpoints, &state.journal)
            .await
            .context("Failed to merge allele counts")?;

        Ok(AlleleCountsReport {
            partitions_staged,
            flat_rows,
            merge,
        })
    }

    /// Discover, allocate and stage every partition into a fresh load buffer
    async fn stage_all(&self, state: &RunState) -> Result<AllocationPlan> {
        let discovery = Discovery::new(self.executor);
        let journal = &state.journal;
        let base = self.layout.base().as_str();

        let bounds = discovery
            .allele_count_bounds(&self.layout)
            .await
            .context("Failed to discover allele-count bounds")?;
        info!(
            "{} variants, max allele {}, {} population groups",
            bounds.row_count,
            bounds.max_allele,
            bounds.populations.len()
        );

        // Every range is fixed before the first write
        let plan = allocate_uniform(&bounds.populations, bounds.row_count, bounds.max_allele)
            .context("Failed to allocate flat index space")?;
        info!(
            "Allocated {} partitions over {} flat rows",
            plan.len(),
            plan.total_rows()
        );
        if plan.is_empty() {
            warn!("{} holds no variants, nothing to stage", self.layout.var());
            return Ok(plan);
        }

        let pipeline = StagedCommitPipeline::new(self.executor, &self.layout, bounds.sample_dim.clone())?;

        if self.options.drop_stale_temps {
            let dropped = pipeline
                .drop_stale_temps()
                .await
                .context("Failed to remove stale temporary structures")?;
            if dropped > 0 {
                journal.record(
                    AuditEventType::StaleTempsRemoved,
                    Some(base),
                    json!({ "dropped": dropped }),
                );
            }
        }

        let load = self.layout.allele_counts_load();
        if discovery.exists(&load).await? {
            anyhow::bail!(
                "{} already exists; remove it or resume the merge with --begin",
                load
            );
        }
        pipeline
            .create_load_buffer()
            .await
            .with_context(|| format!("Failed to create load buffer {}", load))?;
        journal.record(AuditEventType::StructureCreated, Some(load.as_str()), json!({}));

        let target = self.layout.allele_counts();
        if discovery.exists(&target).await? {
            info!("{} exists - will not recreate", target);
        } else {
            let schema = allele_counts_schema(&bounds)?;
            self.executor
                .execute(&Query::Create {
                    name: target.clone(),
                    schema,
                })
                .await
                .with_context(|| format!("Failed to create {}", target))?;
            journal.record(AuditEventType::StructureCreated, Some(target.as_str()), json!({}));
        }

        let total = plan.len();
        for (done, allocation) in plan.allocations().iter().enumerate() {
            pipeline
                .stage(allocation)
                .await
                .with_context(|| format!("Failed to stage partition {}", allocation.partition))?;

            info!(
                "Staged {} ({}/{}), rows {}..={}",
                allocation.partition,
                done + 1,
                total,
                allocation.range_start,
                allocation.range_end()
            );
            journal.record(
                AuditEventType::PartitionStaged,
                Some(&allocation.partition.to_string()),
                serde_json::to_value(allocation).unwrap_or_default(),
            );
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::afl::ArrayName;
    use crate::query::record::RecordSet;
    use crate::testing::FakeStore;

    fn layout() -> ArrayLayout {
        ArrayLayout::new(ArrayName::new("study").unwrap())
    }

    /// Study with AFR/EUR samples, max allele 2, 1000 variants
    fn study_store() -> FakeStore {
        FakeStore::new(|q| {
            let text = q.to_string();
            Ok(match text.as_str() {
                "aggregate(study_var,max(alleles))" => RecordSet::column("alleles_max", ["2"]),
                "count(study_var)" => RecordSet::column("count", ["1000"]),
                "count(study_allele_counts_load)" => RecordSet::column("count", ["12000"]),
                t if t.starts_with("count(between(study_allele_counts_load,10000,") => {
                    RecordSet::column("count", ["2000"])
                }
                t if t.starts_with("count(between(") => RecordSet::column("count", ["0"]),
                "uniq(sort(project(study_samples,population),population))" => {
                    RecordSet::column("population", ["AFR", "EUR"])
                }
                "dimensions(study_var)" => RecordSet::parse(
                    b"name,start,length,chunk_interval\n\
'chromid',0,25,1\n'pos',1,249250621,200000\n'var',1,4,4\n",
                )?,
                "dimensions(study_samples)" => {
                    RecordSet::parse(b"name,start,length,chunk_interval\n'row',0,60,20\n")?
                }
                t if t.starts_with("filter(list('arrays')") => {
                    RecordSet::column("name", Vec::<String>::new())
                }
                other => panic!("unexpected query {}", other),
            })
        })
    }

    #[tokio::test]
    async fn test_full_run() {
        let store = study_store();
        let mut state = RunState::in_memory().unwrap();
        let workflow = AlleleCountsWorkflow::new(&store, layout(), AlleleCountsOptions::default());

        let report = workflow.run(&mut state).await.unwrap();
        assert_eq!(report.partitions_staged, 12);
        assert_eq!(report.flat_rows, 12_000);
        assert_eq!(report.merge.windows, 1);
        assert_eq!(report.merge.rows_merged, 12_000);

        let mutations = store.mutations();
        assert!(mutations[0].starts_with("create array study_allele_counts_load <"));
        assert_eq!(
            mutations[1],
            "create array study_allele_counts <count:uint64 null> \
             [chromid=0:24,1,0,pos=1:249250621,200000,0,var=1:4,4,0,popid=0:2,1,0,allele=-1:2,4,0]"
        );
        // Two creates, six statements per partition, one merge
        assert_eq!(mutations.len(), 2 + 12 * 6 + 1);
        assert_eq!(
            mutations.last().unwrap(),
            "insert(redimension(study_allele_counts_load,study_allele_counts),study_allele_counts)"
        );
        assert!(store.live_arrays().iter().all(|a| !a.contains("temp")));

        let staged = state
            .journal
            .events()
            .unwrap()
            .into_iter()
            .filter(|e| e.0 == AuditEventType::PartitionStaged)
            .collect::<Vec<_>>();
        assert_eq!(staged.len(), 12);
        assert_eq!(staged[0].1.as_deref(), Some("AFR/ploidy"));
        assert_eq!(staged[11].2["range_start"], 11_000);
    }

    #[tokio::test]
    async fn test_empty_var_array_stages_nothing() {
        let store = FakeStore::new(|q| {
            let text = q.to_string();
            Ok(match text.as_str() {
                "count(study_var)" => RecordSet::column("count", ["0"]),
                "uniq(sort(project(study_samples,population),population))" => {
                    RecordSet::column("population", ["AFR"])
                }
                "dimensions(study_var)" => RecordSet::parse(
                    b"name,start,length,chunk_interval\n\
'chromid',0,25,1\n'pos',1,249250621,200000\n'var',1,4,4\n",
                )?,
                "dimensions(study_samples)" => {
                    RecordSet::parse(b"name,start,length,chunk_interval\n'row',0,60,20\n")?
                }
                other => panic!("unexpected query {}", other),
            })
        });
        let mut state = RunState::in_memory().unwrap();
        let workflow = AlleleCountsWorkflow::new(&store, layout(), AlleleCountsOptions::default());

        let report = workflow.run(&mut state).await.unwrap();
        assert_eq!(report.partitions_staged, 0);
        assert_eq!(report.flat_rows, 0);
        assert_eq!(report.merge, MergeReport::default());
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_partition_failure_stops_before_merge() {
        let store = study_store()
            .failing_when(|q| q.to_string() == "insert(study_temp2,study_allele_counts_load)");
        let mut state = RunState::in_memory().unwrap();
        let workflow = AlleleCountsWorkflow::new(&store, layout(), AlleleCountsOptions::default());

        let err = workflow.run(&mut state).await.unwrap_err();
        assert!(format!("{:#}", err).contains("AFR/ploidy"));
        assert!(!store
            .queries()
            .iter()
            .any(|q| q.to_string() == "count(study_allele_counts_load)"));
        assert!(!store.exists("study_temp1"));
        assert!(!store.exists("study_temp2"));
    }

    #[tokio::test]
    async fn test_begin_skips_staging() {
        let store = study_store();
        let mut state = RunState::in_memory().unwrap();
        let options = AlleleCountsOptions {
            merge: MergeSettings {
                window_size: 5000,
                begin: Some(10_000),
                prune_every: 0,
            },
            drop_stale_temps: false,
        };
        let workflow = AlleleCountsWorkflow::new(&store, layout(), options);

        let report = workflow.run(&mut state).await.unwrap();
        assert_eq!(report.partitions_staged, 0);
        assert_eq!(report.merge.resumed_from, 10_000);
        assert_eq!(report.merge.rows_merged, 2000);
        assert_eq!(
            store.mutations(),
            vec![
                "insert(redimension(between(study_allele_counts_load,10000,14999),\
                 study_allele_counts),study_allele_counts)"
            ]
        );
        // Nothing was rediscovered or recreated
        assert!(!store
            .queries()
            .iter()
            .any(|q| q.to_string() == "count(study_var)"));
    }
}
