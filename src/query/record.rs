// ==============================================================================
// record.rs - Query Result Records
// ==============================================================================
// Description: Header-described record sets parsed from iquery CSV output
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-03-12
// Version: 1.0.0
// ==============================================================================
// Format: CSV, header row first, strings quoted with single quotes
// Example:
//   name,start,length,chunk_interval,chunk_overlap,low,high,type
//   'pos',1,249250621,200000,0,10177,249240543,'int64'
// ==============================================================================

use csv::{ReaderBuilder, StringRecord};
use serde::de::DeserializeOwned;

use crate::error::{PipelineError, PipelineResult};

/// Rows of a read query, all sharing one header
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    header: StringRecord,
    rows: Vec<StringRecord>,
}

impl RecordSet {
    /// Build a record set, rejecting any row whose width differs from the header
    pub fn new(header: StringRecord, rows: Vec<StringRecord>) -> PipelineResult<Self> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != header.len() {
                return Err(PipelineError::SchemaMismatch {
                    row: i + 1,
                    expected: header.len(),
                    found: row.len(),
                });
            }
        }
        Ok(Self { header, rows })
    }

    /// Parse raw `iquery -o csv` output
    pub fn parse(output: &[u8]) -> PipelineResult<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .quote(b'\'')
            .double_quote(false)
            .escape(Some(b'\\'))
            .trim(csv::Trim::All)
            .from_reader(output);

        let mut records = reader.records();
        let header = match records.next() {
            Some(first) => first?,
            None => return Ok(Self::default()),
        };

        let rows = records.collect::<Result<Vec<_>, _>>()?;
        Self::new(header, rows)
    }

    /// Single-attribute result, one row per value
    pub fn column<I, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            header: StringRecord::from(vec![name]),
            rows: values
                .into_iter()
                .map(|v| StringRecord::from(vec![v.as_ref()]))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Field values of the first attribute, in result order
    pub fn first_column(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|r| r.get(0).map(str::to_string))
            .collect()
    }

    /// Decode every row into `T`, resolving field names against the header once
    pub fn deserialize<T: DeserializeOwned>(&self) -> PipelineResult<Vec<T>> {
        self.rows
            .iter()
            .map(|row| row.deserialize(Some(&self.header)).map_err(PipelineError::from))
            .collect()
    }
}
