// ==============================================================================
// staging.rs - Staged Commit Pipeline
// ==============================================================================
// Description: Computes one population × allele partition, reshapes it through
//              two temporary structures and appends it to the load buffer
// Author: Matt Barham
// Created: 2026-02-09
// Modified: 2026-03-04
// Version: 1.0.0
// ==============================================================================
// Per partition:
//   1. store(<count query shifted by range_start>, temp1)
//   2. create array temp2 <load buffer attributes> [idx=start:end]
//   3. redimension_store(temp1, temp2)
//   4. insert(temp2, load buffer)
//   5. remove(temp2), remove(temp1)  -- always, success or failure
// The store cannot insert an unshaped result into a dimensioned target, so
// the reshape through temp2 is mandatory.
// ==============================================================================

use tracing::{debug, info, warn};

use crate::config::LOAD_CHUNK_SIZE;
use crate::discovery::Discovery;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    Allele, ArrayLayout, AttributeSpec, AttributeType, DimensionSpec, HighBound, IndexAllocation,
    Population, StructureSchema,
};
use crate::query::afl::{AggCall, ArrayName, Expr, Ident, Predicate, Query, Term};
use crate::query::client::QueryExecutor;

/// Column names shared by the load buffer and its staging structures
struct Columns {
    gt: Ident,
    sampleid: Ident,
    chromid: Ident,
    pos: Ident,
    var: Ident,
    ac: Ident,
    count: Ident,
    population: Ident,
    popid: Ident,
    allele: Ident,
    row: Ident,
    idx: Ident,
    ploidy: Ident,
    allele_count: Ident,
}

impl Columns {
    fn new() -> PipelineResult<Self> {
        Ok(Self {
            gt: Ident::new("gt")?,
            sampleid: Ident::new("sampleid")?,
            chromid: Ident::new("chromid")?,
            pos: Ident::new("pos")?,
            var: Ident::new("var")?,
            ac: Ident::new("ac")?,
            count: Ident::new("count")?,
            population: Ident::new("population")?,
            popid: Ident::new("popid")?,
            allele: Ident::new("allele")?,
            row: Ident::new("row")?,
            idx: Ident::new("idx")?,
            ploidy: Ident::new("ploidy")?,
            allele_count: Ident::new("allele_count")?,
        })
    }

    fn attributes(&self) -> Vec<AttributeSpec> {
        vec![
            AttributeSpec::new(self.chromid.clone(), AttributeType::Int64),
            AttributeSpec::new(self.pos.clone(), AttributeType::Int64),
            AttributeSpec::new(self.var.clone(), AttributeType::Int64),
            AttributeSpec::nullable(self.count.clone(), AttributeType::UInt64),
            AttributeSpec::new(self.population.clone(), AttributeType::String),
            AttributeSpec::new(self.popid.clone(), AttributeType::Int64),
            AttributeSpec::new(self.allele.clone(), AttributeType::Int64),
        ]
    }
}

/// Stages partitions of one base array into its allele-count load buffer
pub struct StagedCommitPipeline<'a, E: QueryExecutor + ?Sized> {
    executor: &'a E,
    layout: &'a ArrayLayout,
    sample_dim: Ident,
    columns: Columns,
}

impl<'a, E: QueryExecutor + ?Sized> StagedCommitPipeline<'a, E> {
    pub fn new(executor: &'a E, layout: &'a ArrayLayout, sample_dim: Ident) -> PipelineResult<Self> {
        Ok(Self {
            executor,
            layout,
            sample_dim,
            columns: Columns::new()?,
        })
    }

    /// Open-ended schema of the shared load buffer
    pub fn load_buffer_schema(&self) -> PipelineResult<StructureSchema> {
        StructureSchema::new(
            self.columns.attributes(),
            vec![DimensionSpec::new(
                self.columns.idx.clone(),
                0,
                HighBound::Unbounded,
                LOAD_CHUNK_SIZE,
            )?],
        )
    }

    /// Load-buffer shape bounded to one partition's range
    pub fn staging_schema(&self, allocation: &IndexAllocation) -> PipelineResult<StructureSchema> {
        if allocation.range_length == 0 {
            return Err(PipelineError::InvalidSchema(format!(
                "empty range for partition {}",
                allocation.partition
            )));
        }
        StructureSchema::new(
            self.columns.attributes(),
            vec![DimensionSpec::new(
                self.columns.idx.clone(),
                allocation.range_start as i64,
                HighBound::Fixed(allocation.range_end() as i64),
                LOAD_CHUNK_SIZE,
            )?],
        )
    }

    pub async fn create_load_buffer(&self) -> PipelineResult<()> {
        let query = Query::Create {
            name: self.layout.allele_counts_load(),
            schema: self.load_buffer_schema()?,
        };
        self.executor.execute(&query).await
    }

    /// Genotype cells the partition aggregates over
    fn source(&self, population: &Population) -> Expr {
        let c = &self.columns;
        let gt = Expr::array(&self.layout.gt()).project(&[&c.gt]);
        match population {
            Population::Global => gt,
            Population::Named(label) => gt.cross_join(
                Expr::array(&self.layout.samples())
                    .filter(Predicate::Eq(c.population.clone(), Term::Str(label.clone()))),
                vec![(c.sampleid.clone(), self.sample_dim.clone())],
            ),
        }
    }

    /// Per-cell transform: ploidy for the pseudo-allele, presence count otherwise
    fn transform(&self, allele: Allele) -> Term {
        let c = &self.columns;
        match allele {
            Allele::Ploidy => Term::call(&c.ploidy, vec![Term::attr(&c.gt)]),
            Allele::Index(i) => Term::call(
                &c.allele_count,
                vec![Term::attr(&c.gt), Term::Int(i as i64)],
            ),
        }
    }

    /// Count rows keyed by variant, labelled and shifted into the partition's range
    pub fn partition_query(&self, allocation: &IndexAllocation) -> PipelineResult<Expr> {
        let c = &self.columns;
        let partition = &allocation.partition;
        let range_start = i64::try_from(allocation.range_start).map_err(|_| {
            PipelineError::InvalidSchema(format!("range start {} overflows", allocation.range_start))
        })?;
        let sum = AggCall::Sum(c.ac.clone());
        let sum_name = Ident::new(sum.output_name())?;

        Ok(self
            .source(&partition.population)
            .apply(vec![(c.ac.clone(), self.transform(partition.allele))])
            .aggregate(
                vec![sum],
                vec![c.chromid.clone(), c.pos.clone(), c.var.clone()],
            )
            .rename(sum_name, c.count.clone())
            .apply(vec![
                (
                    c.population.clone(),
                    Term::Str(partition.population.label().to_string()),
                ),
                (c.popid.clone(), Term::Int(partition.population_id)),
                (c.allele.clone(), Term::Int(partition.allele.coordinate())),
            ])
            .unpack(c.row.clone())
            .apply(vec![(
                c.idx.clone(),
                Term::attr(&c.row).plus(Term::Int(range_start)),
            )]))
    }

    /// Stage one partition into the load buffer.
    ///
    /// Temporary structures are removed whatever the outcome; the first
    /// failure (stage, then cleanup) is returned.
    pub async fn stage(&self, allocation: &IndexAllocation) -> PipelineResult<()> {
        let temp1 = self.layout.temp1();
        let temp2 = self.layout.temp2();
        let mut attempted: Vec<ArrayName> = Vec::with_capacity(2);

        let staged = self.run_steps(allocation, &temp1, &temp2, &mut attempted).await;
        let cleaned = self.cleanup(&attempted).await;

        match (staged, cleaned) {
            (Err(e), _) => {
                warn!("Partition {} failed: {}", allocation.partition, e);
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn run_steps(
        &self,
        allocation: &IndexAllocation,
        temp1: &ArrayName,
        temp2: &ArrayName,
        attempted: &mut Vec<ArrayName>,
    ) -> PipelineResult<()> {
        debug!(
            "Staging {} into [{}, {}]",
            allocation.partition,
            allocation.range_start,
            allocation.range_end()
        );

        let staging_schema = self.staging_schema(allocation)?;

        attempted.push(temp1.clone());
        self.executor
            .execute(&Query::Store {
                input: self.partition_query(allocation)?,
                into: temp1.clone(),
            })
            .await?;

        attempted.push(temp2.clone());
        self.executor
            .execute(&Query::Create {
                name: temp2.clone(),
                schema: staging_schema,
            })
            .await?;

        self.executor
            .execute(&Query::RedimensionStore {
                source: temp1.clone(),
                target: temp2.clone(),
            })
            .await?;

        self.executor
            .execute(&Query::Insert {
                input: Expr::array(temp2),
                into: self.layout.allele_counts_load(),
            })
            .await
    }

    /// Remove temporaries in reverse creation order; keeps going after a failure
    async fn cleanup(&self, attempted: &[ArrayName]) -> PipelineResult<()> {
        let mut first_error = None;
        for name in attempted.iter().rev() {
            if let Err(e) = self.executor.execute(&Query::Remove(name.clone())).await {
                warn!("Failed to remove temporary structure {}: {}", name, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Remove temporaries left behind by a killed run; returns how many were dropped
    pub async fn drop_stale_temps(&self) -> PipelineResult<usize> {
        let discovery = Discovery::new(self.executor);
        let mut dropped = 0;
        for name in [self.layout.temp1(), self.layout.temp2()] {
            if discovery.exists(&name).await? {
                info!("Removing stale temporary structure {}", name);
                self.executor.execute(&Query::Remove(name)).await?;
                dropped += 1;
            }
        }
        Ok(dropped)
    }
}
