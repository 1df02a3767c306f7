// ==============================================================================
// models.rs - Pipeline Data Models
// ==============================================================================
// Description: Structure schemas, partitions, index allocations and merge state
// Author: Matt Barham
// Created: 2026-02-02
// Modified: 2026-03-12
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PipelineError, PipelineResult};
use crate::query::afl::{ArrayName, Ident};

/// Label of the synthetic population covering every sample
pub const GLOBAL_POPULATION: &str = "global";

/// Upper end of a dimension: a fixed index or open-ended (`*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighBound {
    Fixed(i64),
    Unbounded,
}

impl fmt::Display for HighBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HighBound::Fixed(v) => write!(f, "{}", v),
            HighBound::Unbounded => f.write_str("*"),
        }
    }
}

/// One axis of a multidimensional structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionSpec {
    pub name: Ident,
    pub low: i64,
    pub high: HighBound,
    pub chunk_size: u64,
}

impl DimensionSpec {
    pub fn new(name: Ident, low: i64, high: HighBound, chunk_size: u64) -> PipelineResult<Self> {
        if let HighBound::Fixed(h) = high {
            if low > h {
                return Err(PipelineError::InvalidSchema(format!(
                    "dimension {}: low bound {} exceeds high bound {}",
                    name, low, h
                )));
            }
        }
        if chunk_size == 0 {
            return Err(PipelineError::InvalidSchema(format!(
                "dimension {}: chunk size must be positive",
                name
            )));
        }
        Ok(Self {
            name,
            low,
            high,
            chunk_size,
        })
    }

    /// Number of cells along this axis, if bounded
    pub fn length(&self) -> Option<u64> {
        match self.high {
            HighBound::Fixed(h) => Some((h - self.low + 1) as u64),
            HighBound::Unbounded => None,
        }
    }
}

impl fmt::Display for DimensionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{},{},0", self.name, self.low, self.high, self.chunk_size)
    }
}

/// Attribute types used by the derived structures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Int64,
    UInt64,
    UInt32,
    Float,
    /// Packed genotype type provided by the gt plugin
    Gt16,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Int64 => "int64",
            AttributeType::UInt64 => "uint64",
            AttributeType::UInt32 => "uint32",
            AttributeType::Float => "float",
            AttributeType::Gt16 => "gt16",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: Ident,
    pub ty: AttributeType,
    pub nullable: bool,
}

impl AttributeSpec {
    pub fn new(name: Ident, ty: AttributeType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
        }
    }

    pub fn nullable(name: Ident, ty: AttributeType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
        }
    }
}

impl fmt::Display for AttributeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.ty.as_str())?;
        if self.nullable {
            f.write_str(" null")?;
        }
        Ok(())
    }
}

/// Attribute and dimension declaration for a new structure.
/// Immutable once declared to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureSchema {
    attributes: Vec<AttributeSpec>,
    dimensions: Vec<DimensionSpec>,
}

impl StructureSchema {
    pub fn new(attributes: Vec<AttributeSpec>, dimensions: Vec<DimensionSpec>) -> PipelineResult<Self> {
        if attributes.is_empty() {
            return Err(PipelineError::InvalidSchema("no attributes".into()));
        }
        if dimensions.is_empty() {
            return Err(PipelineError::InvalidSchema("no dimensions".into()));
        }

        let mut names: Vec<&str> = attributes
            .iter()
            .map(|a| a.name.as_str())
            .chain(dimensions.iter().map(|d| d.name.as_str()))
            .collect();
        names.sort_unstable();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(PipelineError::InvalidSchema(format!("duplicate name {}", w[0])));
        }

        Ok(Self {
            attributes,
            dimensions,
        })
    }

    pub fn attributes(&self) -> &[AttributeSpec] {
        &self.attributes
    }

    pub fn dimensions(&self) -> &[DimensionSpec] {
        &self.dimensions
    }
}

impl fmt::Display for StructureSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<")?;
        for (i, attr) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", attr)?;
        }
        f.write_str("> [")?;
        for (i, dim) in self.dimensions.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", dim)?;
        }
        f.write_str("]")
    }
}

/// Population group: a named sample population or the synthetic global group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Population {
    Named(String),
    Global,
}

impl Population {
    pub fn label(&self) -> &str {
        match self {
            Population::Named(name) => name,
            Population::Global => GLOBAL_POPULATION,
        }
    }
}

impl fmt::Display for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Allele coordinate of a partition: the ploidy pseudo-allele or an allele index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Allele {
    Ploidy,
    Index(u32),
}

impl Allele {
    /// Value stored in the `allele` dimension (ploidy is -1)
    pub fn coordinate(&self) -> i64 {
        match self {
            Allele::Ploidy => -1,
            Allele::Index(i) => *i as i64,
        }
    }

    /// Ploidy first, then 0..=max_allele ascending
    pub fn sequence(max_allele: u32) -> impl Iterator<Item = Allele> {
        std::iter::once(Allele::Ploidy).chain((0..=max_allele).map(Allele::Index))
    }
}

impl fmt::Display for Allele {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Allele::Ploidy => f.write_str("ploidy"),
            Allele::Index(i) => write!(f, "{}", i),
        }
    }
}

/// One cell of the population × allele cross-product
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub population: Population,
    /// Position of the population in the `popid` dimension
    pub population_id: i64,
    pub allele: Allele,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.population, self.allele)
    }
}

/// Contiguous slice of the flat index reserved for one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexAllocation {
    pub partition: Partition,
    pub range_start: u64,
    pub range_length: u64,
}

impl IndexAllocation {
    /// Inclusive last index of the range
    pub fn range_end(&self) -> u64 {
        self.range_start + self.range_length - 1
    }
}

/// Exclusive lower bound of load-buffer rows not yet merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeCheckpoint {
    pub next_row_id: u64,
    pub rows_merged: u64,
    pub windows: u64,
}

impl MergeCheckpoint {
    pub fn starting_at(next_row_id: u64) -> Self {
        Self {
            next_row_id,
            rows_merged: 0,
            windows: 0,
        }
    }
}

/// Highest retained version id of a target structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionWatermark(pub u64);

/// Names of every structure derived from one base array
#[derive(Debug, Clone)]
pub struct ArrayLayout {
    base: ArrayName,
}

impl ArrayLayout {
    pub fn new(base: ArrayName) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &ArrayName {
        &self.base
    }

    fn derived(&self, suffix: &str) -> ArrayName {
        self.base.with_suffix(suffix)
    }

    pub fn gt(&self) -> ArrayName {
        self.derived("gt")
    }

    pub fn gt_load(&self) -> ArrayName {
        self.derived("gt_load")
    }

    pub fn var(&self) -> ArrayName {
        self.derived("var")
    }

    pub fn var_load(&self) -> ArrayName {
        self.derived("var_load")
    }

    pub fn samples(&self) -> ArrayName {
        self.derived("samples")
    }

    pub fn chroms(&self) -> ArrayName {
        self.derived("chroms")
    }

    pub fn load(&self) -> ArrayName {
        self.derived("load")
    }

    pub fn allele_counts(&self) -> ArrayName {
        self.derived("allele_counts")
    }

    pub fn allele_counts_load(&self) -> ArrayName {
        self.derived("allele_counts_load")
    }

    pub fn temp1(&self) -> ArrayName {
        self.derived("temp1")
    }

    pub fn temp2(&self) -> ArrayName {
        self.derived("temp2")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(s: &str) -> Ident {
        Ident::new(s).unwrap()
    }

    #[test]
    fn test_dimension_invariants() {
        assert!(DimensionSpec::new(ident("pos"), 5, HighBound::Fixed(4), 10).is_err());
        assert!(DimensionSpec::new(ident("pos"), 1, HighBound::Fixed(4), 0).is_err());

        let dim = DimensionSpec::new(ident("pos"), 1, HighBound::Fixed(1000), 200000).unwrap();
        assert_eq!(dim.length(), Some(1000));
        assert_eq!(dim.to_string(), "pos=1:1000,200000,0");

        let open = DimensionSpec::new(ident("idx"), 0, HighBound::Unbounded, 1000000).unwrap();
        assert_eq!(open.length(), None);
        assert_eq!(open.to_string(), "idx=0:*,1000000,0");
    }

    #[test]
    fn test_schema_render_and_duplicates() {
        let schema = StructureSchema::new(
            vec![
                AttributeSpec::new(ident("chrom"), AttributeType::String),
                AttributeSpec::nullable(ident("count"), AttributeType::UInt64),
            ],
            vec![DimensionSpec::new(ident("idx"), 0, HighBound::Unbounded, 1000000).unwrap()],
        )
        .unwrap();
        assert_eq!(schema.to_string(), "<chrom:string,count:uint64 null> [idx=0:*,1000000,0]");

        let dup = StructureSchema::new(
            vec![AttributeSpec::new(ident("idx"), AttributeType::Int64)],
            vec![DimensionSpec::new(ident("idx"), 0, HighBound::Unbounded, 10).unwrap()],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_allele_sequence() {
        let seq: Vec<Allele> = Allele::sequence(2).collect();
        assert_eq!(
            seq,
            vec![Allele::Ploidy, Allele::Index(0), Allele::Index(1), Allele::Index(2)]
        );
        assert_eq!(Allele::Ploidy.coordinate(), -1);
        assert_eq!(Allele::Index(2).coordinate(), 2);
    }

    #[test]
    fn test_layout_names() {
        let layout = ArrayLayout::new(ArrayName::new("interimV3").unwrap());
        assert_eq!(layout.gt_load().as_str(), "interimV3_gt_load");
        assert_eq!(layout.allele_counts_load().as_str(), "interimV3_allele_counts_load");
        assert_eq!(layout.temp2().as_str(), "interimV3_temp2");
    }
}
