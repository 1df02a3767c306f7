// ==============================================================================
// allocator.rs - Flat Index Space Allocator
// ==============================================================================
// Description: Reserves a disjoint, contiguous flat-index range for every
//              population × allele partition before any data is staged
// Author: Matt Barham
// Created: 2026-02-06
// Modified: 2026-03-12
// Version: 1.0.0
// ==============================================================================
// Algorithm:
//   offset = 0
//   for group in groups (discovery order, global last):
//     for allele in [ploidy, 0, 1, ..., max_allele]:
//       reserve [offset, offset + group.row_count)
//       offset += group.row_count
//   total = sum(row_count) × (max_allele + 2)
// ==============================================================================

use serde::Serialize;
use std::collections::HashSet;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{Allele, IndexAllocation, Partition, Population};

/// One population group and its row count (one row per variant)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationGroup {
    pub population: Population,
    pub row_count: u64,
}

/// Ordered allocations covering `[0, total_rows)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationPlan {
    allocations: Vec<IndexAllocation>,
    total_rows: u64,
}

impl AllocationPlan {
    pub fn allocations(&self) -> &[IndexAllocation] {
        &self.allocations
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn find(&self, population: &str, allele: Allele) -> Option<&IndexAllocation> {
        self.allocations
            .iter()
            .find(|a| a.partition.population.label() == population && a.partition.allele == allele)
    }
}

/// Allocate every group the same row count
pub fn allocate_uniform(
    populations: &[Population],
    row_count: u64,
    max_allele: u32,
) -> PipelineResult<AllocationPlan> {
    let groups: Vec<PopulationGroup> = populations
        .iter()
        .map(|p| PopulationGroup {
            population: p.clone(),
            row_count,
        })
        .collect();
    allocate(&groups, max_allele)
}

/// Assign flat-index ranges in fixed group/allele order.
///
/// Groups keep their given order except that the global group is always
/// placed last. Every allele of a group reserves `row_count` indexes, so
/// groups with no variants produce no allocations.
pub fn allocate(groups: &[PopulationGroup], max_allele: u32) -> PipelineResult<AllocationPlan> {
    let mut seen = HashSet::new();
    for group in groups {
        if !seen.insert(group.population.label()) {
            return Err(PipelineError::InvalidSchema(format!(
                "population {} listed twice",
                group.population
            )));
        }
    }

    let ordered = groups
        .iter()
        .filter(|g| g.population != Population::Global)
        .chain(groups.iter().filter(|g| g.population == Population::Global));

    let mut allocations = Vec::with_capacity(groups.len() * (max_allele as usize + 2));
    let mut offset: u64 = 0;

    for (population_id, group) in ordered.enumerate() {
        // A group without variants reserves nothing but keeps its id
        if group.row_count == 0 {
            continue;
        }
        for allele in Allele::sequence(max_allele) {
            allocations.push(IndexAllocation {
                partition: Partition {
                    population: group.population.clone(),
                    population_id: population_id as i64,
                    allele,
                },
                range_start: offset,
                range_length: group.row_count,
            });
            offset = offset.checked_add(group.row_count).ok_or_else(|| {
                PipelineError::InvalidSchema("flat index space exceeds u64".to_string())
            })?;
        }
    }

    Ok(AllocationPlan {
        allocations,
        total_rows: offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(s: &str) -> Population {
        Population::Named(s.to_string())
    }

    fn three_groups() -> Vec<Population> {
        vec![named("AFR"), named("EUR"), Population::Global]
    }

    #[test]
    fn test_twelve_thousand_rows_across_three_groups() {
        let plan = allocate_uniform(&three_groups(), 1000, 2).unwrap();

        assert_eq!(plan.len(), 12);
        assert_eq!(plan.total_rows(), 12_000);
        assert!(plan.allocations().iter().all(|a| a.range_length == 1000));

        // AFR: ploidy,0,1,2 then EUR: ploidy,0 precede EUR/1
        let eur1 = plan.find("EUR", Allele::Index(1)).unwrap();
        assert_eq!(eur1.range_start, 6 * 1000);
        assert_eq!(eur1.partition.population_id, 1);

        let global_ploidy = plan.find("global", Allele::Ploidy).unwrap();
        assert_eq!(global_ploidy.range_start, 8000);
        assert_eq!(global_ploidy.partition.population_id, 2);
    }

    #[test]
    fn test_ranges_are_disjoint_and_cover_total() {
        let groups = vec![
            PopulationGroup {
                population: named("CHB"),
                row_count: 7,
            },
            PopulationGroup {
                population: Population::Global,
                row_count: 11,
            },
            PopulationGroup {
                population: named("YRI"),
                row_count: 3,
            },
        ];
        let plan = allocate(&groups, 3).unwrap();

        let mut ranges: Vec<(u64, u64)> = plan
            .allocations()
            .iter()
            .map(|a| (a.range_start, a.range_start + a.range_length))
            .collect();
        ranges.sort();

        let mut expected_start = 0;
        for (start, end) in &ranges {
            assert_eq!(*start, expected_start, "gap or overlap at {}", start);
            expected_start = *end;
        }
        assert_eq!(expected_start, plan.total_rows());
        assert_eq!(plan.total_rows(), (7 + 11 + 3) * 5);
    }

    #[test]
    fn test_global_is_always_last() {
        let plan = allocate_uniform(&[Population::Global, named("AFR")], 10, 0).unwrap();
        let order: Vec<&str> = plan
            .allocations()
            .iter()
            .map(|a| a.partition.population.label())
            .collect();
        assert_eq!(order, vec!["AFR", "AFR", "global", "global"]);
    }

    #[test]
    fn test_allocation_is_deterministic() {
        let a = allocate_uniform(&three_groups(), 1234, 4).unwrap();
        let b = allocate_uniform(&three_groups(), 1234, 4).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_duplicate_groups() {
        assert!(allocate_uniform(&[named("AFR"), named("AFR")], 10, 1).is_err());
    }

    #[test]
    fn test_no_variants_is_an_empty_plan() {
        let plan = allocate_uniform(&three_groups(), 0, 2).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.total_rows(), 0);

        // An empty group in the middle leaves the others contiguous with stable ids
        let groups = vec![
            PopulationGroup {
                population: named("AFR"),
                row_count: 4,
            },
            PopulationGroup {
                population: named("EUR"),
                row_count: 0,
            },
            PopulationGroup {
                population: Population::Global,
                row_count: 4,
            },
        ];
        let plan = allocate(&groups, 0).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.total_rows(), 16);
        let global = plan.find("global", Allele::Ploidy).unwrap();
        assert_eq!(global.range_start, 8);
        assert_eq!(global.partition.population_id, 2);
    }
}
