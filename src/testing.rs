// ==============================================================================
// testing.rs - Scripted Array Store for Unit Tests
// ==============================================================================
// Description: In-memory QueryExecutor that records every statement, tracks
//              which structures exist and answers reads from a closure
// Author: Matt Barham
// Created: 2026-02-05
// Modified: 2026-02-26
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::error::{PipelineError, PipelineResult};
use crate::query::afl::Query;
use crate::query::client::QueryExecutor;
use crate::query::record::RecordSet;

type ReadHandler = Box<dyn Fn(&Query) -> PipelineResult<RecordSet> + Send + Sync>;
type FailPredicate = Box<dyn Fn(&Query) -> bool + Send + Sync>;

pub struct FakeStore {
    reads: ReadHandler,
    fail_when: Option<FailPredicate>,
    log: Mutex<Vec<Query>>,
    arrays: Mutex<BTreeSet<String>>,
}

impl FakeStore {
    pub fn new<F>(reads: F) -> Self
    where
        F: Fn(&Query) -> PipelineResult<RecordSet> + Send + Sync + 'static,
    {
        Self {
            reads: Box::new(reads),
            fail_when: None,
            log: Mutex::new(Vec::new()),
            arrays: Mutex::new(BTreeSet::new()),
        }
    }

    /// Make every mutation matching `pred` fail with a query error
    pub fn failing_when<P>(mut self, pred: P) -> Self
    where
        P: Fn(&Query) -> bool + Send + Sync + 'static,
    {
        self.fail_when = Some(Box::new(pred));
        self
    }

    /// Pretend a structure already exists
    pub fn with_array(self, name: &str) -> Self {
        self.arrays.lock().unwrap().insert(name.to_string());
        self
    }

    /// Every statement seen, in order
    pub fn queries(&self) -> Vec<Query> {
        self.log.lock().unwrap().clone()
    }

    /// Rendered text of every mutation, in order
    pub fn mutations(&self) -> Vec<String> {
        self.queries()
            .iter()
            .filter(|q| q.is_mutation())
            .map(|q| q.to_string())
            .collect()
    }

    pub fn live_arrays(&self) -> BTreeSet<String> {
        self.arrays.lock().unwrap().clone()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.arrays.lock().unwrap().contains(name)
    }
}

#[async_trait]
impl QueryExecutor for FakeStore {
    async fn execute(&self, query: &Query) -> PipelineResult<()> {
        self.log.lock().unwrap().push(query.clone());

        if self.fail_when.as_ref().is_some_and(|p| p(query)) {
            return Err(PipelineError::Query {
                query: query.to_string(),
                status: 1,
                stderr: "injected failure".to_string(),
            });
        }

        let mut arrays = self.arrays.lock().unwrap();
        match query {
            Query::Create { name, .. } | Query::Store { into: name, .. } => {
                arrays.insert(name.to_string());
            }
            Query::Remove(name) => {
                if !arrays.remove(name.as_str()) {
                    return Err(PipelineError::Query {
                        query: query.to_string(),
                        status: 1,
                        stderr: "SCIDB_LE_ARRAY_DOESNT_EXIST".to_string(),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn fetch_records(&self, query: &Query) -> PipelineResult<RecordSet> {
        self.log.lock().unwrap().push(query.clone());
        (self.reads)(query)
    }
}
