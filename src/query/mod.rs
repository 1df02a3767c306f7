// ==============================================================================
// query/mod.rs - Array Store Query Modules
// ==============================================================================
// Description: Typed statement builder, result records and executors
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-02-19
// Version: 1.0.0
// ==============================================================================

pub mod afl;
pub mod client;
pub mod record;

pub use afl::{AggCall, ArrayName, Expr, Ident, Predicate, Query, Term};
pub use client::{fetch_column_as, fetch_scalar_as, IqueryClient, QueryExecutor};
pub use record::RecordSet;
