// ==============================================================================
// lib.rs - Variant Array Pipeline Library
// ==============================================================================
// Description: Library interface for allele-count aggregation and chunked
//              redimension of variant arrays
// Author: Matt Barham
// Created: 2026-02-02
// Modified: 2026-03-06
// Version: 1.0.0
// ==============================================================================

pub mod error;
pub mod validator;
pub mod config;
pub mod models;
pub mod query;
pub mod discovery;
pub mod allocator;
pub mod staging;
pub mod checkpoint;
pub mod audit;
pub mod merge;
pub mod workflows;

#[cfg(test)]
mod testing;
