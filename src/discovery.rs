// ==============================================================================
// discovery.rs - Schema & Bounds Discovery
// ==============================================================================
// Description: Read-only queries that size the derived structures: dimension
//              extents, row counts, allele maxima and population labels
// Author: Matt Barham
// Created: 2026-02-05
// Modified: 2026-03-12
// Version: 1.0.0
// ==============================================================================

use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::models::{ArrayLayout, DimensionSpec, HighBound, Population};
use crate::query::afl::{AggCall, ArrayName, Expr, Ident, Predicate, Query, Term};
use crate::query::client::{fetch_column_as, fetch_scalar_as, QueryExecutor};

/// Lengths at or above this are reported by the store for `*` dimensions
const UNBOUNDED_LENGTH: u64 = 1 << 61;

/// One row of `dimensions(<array>)`.
///
/// `start`/`length` are the declared extent; `low`/`high` bound the cells
/// actually written.
#[derive(Debug, Deserialize)]
struct DimensionRow {
    name: String,
    start: i64,
    length: u64,
    chunk_interval: u64,
    #[serde(default)]
    high: Option<i64>,
}

impl DimensionRow {
    fn to_spec(&self) -> PipelineResult<DimensionSpec> {
        let high = if self.length >= UNBOUNDED_LENGTH {
            HighBound::Unbounded
        } else {
            HighBound::Fixed(self.start + self.length as i64 - 1)
        };
        DimensionSpec::new(Ident::new(self.name.as_str())?, self.start, high, self.chunk_interval)
    }
}

/// Everything needed to size the allele-count structures
#[derive(Debug, Clone)]
pub struct AlleleCountBounds {
    /// Variant key axes (chromid, pos, var)
    pub variant_dims: Vec<DimensionSpec>,
    /// Variants per population group
    pub row_count: u64,
    pub max_allele: u32,
    /// Sorted named populations, global last
    pub populations: Vec<Population>,
    /// Axis of the sample table joined against the gt sample axis
    pub sample_dim: Ident,
}

/// Extents of the gt/var structures built from their load buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedimensionBounds {
    pub chrom_high: i64,
    pub pos_high: i64,
    pub var_high: i64,
    pub sample_high: i64,
    pub sample_chunk: u64,
}

/// Discovery queries against one executor
pub struct Discovery<'a, E: QueryExecutor + ?Sized> {
    executor: &'a E,
}

impl<'a, E: QueryExecutor + ?Sized> Discovery<'a, E> {
    pub fn new(executor: &'a E) -> Self {
        Self { executor }
    }

    async fn dimension_rows(&self, array: &ArrayName) -> PipelineResult<Vec<DimensionRow>> {
        let query = Query::Read(Expr::Dimensions(array.clone()));
        let rows: Vec<DimensionRow> = self.executor.fetch_records(&query).await?.deserialize()?;
        if rows.is_empty() {
            return Err(PipelineError::EmptyResult(query.to_string()));
        }
        Ok(rows)
    }

    /// Declared extents of every axis of `array`
    pub async fn dimensions(&self, array: &ArrayName) -> PipelineResult<Vec<DimensionSpec>> {
        let dims = self
            .dimension_rows(array)
            .await?
            .iter()
            .map(DimensionRow::to_spec)
            .collect::<PipelineResult<Vec<_>>>()?;
        debug!("Dimensions of {}: {:?}", array, dims);
        Ok(dims)
    }

    /// Highest written coordinate of the first axis of `array` and that
    /// axis' chunk interval. Open-ended axes report their data bound too.
    async fn populated_high(&self, array: &ArrayName) -> PipelineResult<(i64, u64)> {
        let first = self
            .dimension_rows(array)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::EmptyResult(format!("dimensions({})", array)))?;
        let high = first.high.ok_or_else(|| {
            PipelineError::InvalidSchema(format!("dimensions({}) reports no high column", array))
        })?;
        // An array with no cells reports high below its start
        if high < first.start {
            return Err(PipelineError::EmptyResult(format!("dimensions({})", array)));
        }
        Ok((high, first.chunk_interval))
    }

    /// First axis of `array`
    async fn first_dimension(&self, array: &ArrayName) -> PipelineResult<DimensionSpec> {
        self.dimensions(array)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::EmptyResult(format!("dimensions({})", array)))
    }

    /// Number of non-empty cells
    pub async fn row_count(&self, array: &ArrayName) -> PipelineResult<u64> {
        let query = Query::Read(Expr::array(array).count());
        let count = fetch_scalar_as(self.executor, &query).await?;
        debug!("count({}) = {}", array, count);
        Ok(count)
    }

    /// `max(<attr>)` over the whole array
    pub async fn max_of<T>(&self, array: &ArrayName, attr: &str) -> PipelineResult<T>
    where
        T: std::str::FromStr + std::fmt::Debug,
    {
        let query = Query::Read(
            Expr::array(array).aggregate(vec![AggCall::Max(Ident::new(attr)?)], Vec::new()),
        );
        let value = fetch_scalar_as(self.executor, &query).await?;
        debug!("max({}.{}) = {:?}", array, attr, value);
        Ok(value)
    }

    /// Distinct values of the population column, sorted, with `global` appended.
    ///
    /// A sample population literally named `global` folds into the appended
    /// group. Fails with `EmptyResult` when the sample table names no population.
    pub async fn populations(&self, samples: &ArrayName) -> PipelineResult<Vec<Population>> {
        let population = Ident::new("population")?;
        let query = Query::Read(
            Expr::array(samples)
                .project(&[&population])
                .sort(&[&population])
                .uniq(),
        );
        let labels: Vec<String> = fetch_column_as(self.executor, &query).await?;
        if labels.iter().any(|l| l == crate::models::GLOBAL_POPULATION) {
            warn!(
                "{} labels samples '{}'; they are counted only in the all-sample group",
                samples,
                crate::models::GLOBAL_POPULATION
            );
        }

        let distinct: BTreeSet<String> = labels
            .into_iter()
            .filter(|l| !l.is_empty() && l != crate::models::GLOBAL_POPULATION)
            .collect();

        if distinct.is_empty() {
            return Err(PipelineError::EmptyResult(query.to_string()));
        }

        let mut populations: Vec<Population> = distinct.into_iter().map(Population::Named).collect();
        populations.push(Population::Global);
        debug!("Populations: {:?}", populations);
        Ok(populations)
    }

    /// Whether a structure with this name is declared in the store
    pub async fn exists(&self, array: &ArrayName) -> PipelineResult<bool> {
        let query = Query::Read(Expr::ListArrays.filter(Predicate::Eq(
            Ident::new("name")?,
            Term::Str(array.as_str().to_string()),
        )));
        Ok(!self.executor.fetch_records(&query).await?.is_empty())
    }

    /// Highest version id of `array`
    pub async fn latest_version(&self, array: &ArrayName) -> PipelineResult<u64> {
        let query = Query::Read(
            Expr::Versions(array.clone())
                .aggregate(vec![AggCall::Max(Ident::new("version_id")?)], Vec::new()),
        );
        fetch_scalar_as(self.executor, &query).await
    }

    /// Sizes for the population × allele cross-tabulation
    pub async fn allele_count_bounds(&self, layout: &ArrayLayout) -> PipelineResult<AlleleCountBounds> {
        let var = layout.var();
        let row_count = self.row_count(&var).await?;
        // max() over no cells is null
        let max_allele: u32 = if row_count == 0 {
            0
        } else {
            self.max_of(&var, "alleles").await?
        };
        let populations = self.populations(&layout.samples()).await?;
        let sample_dim = self.first_dimension(&layout.samples()).await?.name;
        let variant_dims = self.dimensions(&var).await?;

        if variant_dims.len() < 3 {
            return Err(PipelineError::InvalidSchema(format!(
                "{} has {} dimensions, expected chromid, pos, var",
                var,
                variant_dims.len()
            )));
        }

        Ok(AlleleCountBounds {
            variant_dims,
            row_count,
            max_allele,
            populations,
            sample_dim,
        })
    }

    /// Extents for the gt/var structures
    pub async fn redimension_bounds(&self, layout: &ArrayLayout) -> PipelineResult<RedimensionBounds> {
        let (chrom_high, _) = self.populated_high(&layout.chroms()).await?;
        let (sample_high, sample_chunk) = self.populated_high(&layout.samples()).await?;
        let var_load = layout.var_load();

        let bounds = RedimensionBounds {
            chrom_high,
            pos_high: self.max_of(&var_load, "pos").await?,
            var_high: self.max_of(&var_load, "var").await?,
            sample_high,
            sample_chunk,
        };
        debug!("Redimension bounds: {:?}", bounds);
        Ok(bounds)
    }
}
