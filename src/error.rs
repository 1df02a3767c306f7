// ==============================================================================
// error.rs - Pipeline Error Taxonomy
// ==============================================================================
// Description: Typed errors raised by the query interface and pipeline stages
// Author: Matt Barham
// Created: 2026-02-02
// Modified: 2026-03-12
// Version: 1.0.0
// ==============================================================================

use thiserror::Error;

/// Errors that can occur while talking to the array store or staging data
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The store could not be reached (client missing, connection refused)
    #[error("Cannot reach array store: {0}")]
    Connection(String),

    /// The store ran the query and reported a failure
    #[error("Query failed (status {status}): {query}\n{stderr}")]
    Query {
        query: String,
        status: i32,
        stderr: String,
    },

    /// A fetched row does not have as many fields as its header
    #[error("Schema mismatch at row {row}: header has {expected} fields, row has {found}")]
    SchemaMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// A read expected at least one value and got none
    #[error("Empty result for query: {0}")]
    EmptyResult(String),

    #[error("Cannot decode value '{value}' from query: {query}")]
    Decode { query: String, value: String },

    #[error("Invalid identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: String },

    #[error("Invalid structure schema: {0}")]
    InvalidSchema(String),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Checkpoint store error: {0}")]
    Checkpoint(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Fatal before any data is written: nothing to clean up
    pub fn is_connection(&self) -> bool {
        matches!(self, PipelineError::Connection(_))
    }
}

/// Whether any cause behind a workflow error is a connection failure
pub fn is_unreachable(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<PipelineError>())
        .any(PipelineError::is_connection)
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_reports_query_text() {
        let err = PipelineError::Query {
            query: "remove(x_temp1)".to_string(),
            status: 1,
            stderr: "SCIDB_LE_ARRAY_DOESNT_EXIST".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("remove(x_temp1)"));
        assert!(msg.contains("SCIDB_LE_ARRAY_DOESNT_EXIST"));
        assert!(!err.is_connection());
    }

    #[test]
    fn test_connection_error_flag() {
        assert!(PipelineError::Connection("refused".into()).is_connection());
    }

    #[test]
    fn test_unreachable_through_context() {
        let err = anyhow::Error::from(PipelineError::Connection("local:1239".into()))
            .context("Failed to discover redimension bounds");
        assert!(is_unreachable(&err));

        let err = anyhow::Error::from(PipelineError::EmptyResult("count(x)".into()))
            .context("Failed to merge allele counts");
        assert!(!is_unreachable(&err));
    }
}
