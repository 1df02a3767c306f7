// ==============================================================================
// client.rs - Query Execution Interface
// ==============================================================================
// Description: Executor trait consumed by the pipeline and its iquery-backed
//              implementation
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-03-12
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

use crate::config::Endpoint;
use crate::error::{PipelineError, PipelineResult};
use crate::query::afl::Query;
use crate::query::record::RecordSet;

/// Diagnostics iquery prints when the coordinator cannot be reached
const CONNECTION_MARKERS: &[&str] = &[
    "Connection refused",
    "SCIDB_LE_CONNECTION_ERROR",
    "SCIDB_SE_NETWORK",
    "Could not resolve host",
];

/// Runs typed queries against the array store.
///
/// Every call blocks until the store answers; implementations must not
/// reorder calls.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a statement for its side effect only
    async fn execute(&self, query: &Query) -> PipelineResult<()>;

    /// Run a read and return its header-described rows
    async fn fetch_records(&self, query: &Query) -> PipelineResult<RecordSet>;

    /// First cell of the first attribute; `EmptyResult` when there is none
    async fn fetch_scalar(&self, query: &Query) -> PipelineResult<String> {
        self.fetch_records(query)
            .await?
            .first_column()
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::EmptyResult(query.to_string()))
    }

    /// Every cell of the first attribute, in result order
    async fn fetch_column(&self, query: &Query) -> PipelineResult<Vec<String>> {
        Ok(self.fetch_records(query).await?.first_column())
    }
}

/// Fetch a scalar and parse it
pub async fn fetch_scalar_as<T, E>(executor: &E, query: &Query) -> PipelineResult<T>
where
    T: FromStr,
    E: QueryExecutor + ?Sized,
{
    let value = executor.fetch_scalar(query).await?;
    parse_value(query, &value)
}

/// Fetch a column and parse every value
pub async fn fetch_column_as<T, E>(executor: &E, query: &Query) -> PipelineResult<Vec<T>>
where
    T: FromStr,
    E: QueryExecutor + ?Sized,
{
    executor
        .fetch_column(query)
        .await?
        .iter()
        .map(|v| parse_value(query, v))
        .collect()
}

fn parse_value<T: FromStr>(query: &Query, value: &str) -> PipelineResult<T> {
    value.trim().parse::<T>().map_err(|_| PipelineError::Decode {
        query: query.to_string(),
        value: value.to_string(),
    })
}

/// Executor that shells out to the `iquery` client
#[derive(Debug, Clone)]
pub struct IqueryClient {
    binary: PathBuf,
    endpoint: Endpoint,
}

impl IqueryClient {
    pub fn new(binary: impl Into<PathBuf>, endpoint: Endpoint) -> Self {
        Self {
            binary: binary.into(),
            endpoint,
        }
    }

    /// Arguments for one invocation; `fetch` selects `-aq` over `-anq`
    fn arguments(&self, query: &Query, fetch: bool) -> Vec<String> {
        let mut args = Vec::with_capacity(8);
        if let Some(host) = &self.endpoint.host {
            args.push("-c".to_string());
            args.push(host.clone());
        }
        args.push("-p".to_string());
        args.push(self.endpoint.port.to_string());
        args.push("-o".to_string());
        args.push("csv".to_string());
        args.push(if fetch { "-aq" } else { "-anq" }.to_string());
        args.push(query.to_string());
        args
    }

    async fn run(&self, query: &Query, fetch: bool) -> PipelineResult<Vec<u8>> {
        let text = query.to_string();
        debug!("iquery {}: {}", if fetch { "fetch" } else { "exec" }, text);
        let start = Instant::now();

        let output = Command::new(&self.binary)
            .args(self.arguments(query, fetch))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => PipelineError::Connection(format!(
                    "query client {:?} not found",
                    self.binary
                )),
                _ => PipelineError::Io(e),
            })?;

        debug!("Query finished in {:.3}s", start.elapsed().as_secs_f64());

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if CONNECTION_MARKERS.iter().any(|m| stderr.contains(m)) {
                return Err(PipelineError::Connection(format!("{}: {}", self.endpoint, stderr)));
            }
            return Err(PipelineError::Query {
                query: text,
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl QueryExecutor for IqueryClient {
    async fn execute(&self, query: &Query) -> PipelineResult<()> {
        self.run(query, false).await.map(|_| ())
    }

    async fn fetch_records(&self, query: &Query) -> PipelineResult<RecordSet> {
        let stdout = self.run(query, true).await?;
        RecordSet::parse(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::afl::{ArrayName, Expr};
    use crate::testing::FakeStore;

    fn count_query() -> Query {
        Expr::array(&ArrayName::new("study").unwrap()).count().into()
    }

    #[test]
    fn test_arguments_local_and_remote() {
        let local = IqueryClient::new("iquery", Endpoint::parse("local", 1239));
        let args = local.arguments(&count_query(), true);
        assert_eq!(args, vec!["-p", "1239", "-o", "csv", "-aq", "count(study)"]);

        let remote = IqueryClient::new("iquery", Endpoint::parse("scidb10", 1239));
        let args = remote.arguments(&Query::Remove(ArrayName::new("t").unwrap()), false);
        assert_eq!(
            args,
            vec!["-c", "scidb10", "-p", "1239", "-o", "csv", "-anq", "remove(t)"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_connection_error() {
        let client = IqueryClient::new(
            "/nonexistent/bin/iquery-for-tests",
            Endpoint::parse("local", 1239),
        );
        let err = client.execute(&count_query()).await.unwrap_err();
        assert!(err.is_connection());
    }

    /// Client whose binary is a shell script with the given body
    #[cfg(unix)]
    fn script_client(dir: &tempfile::TempDir, body: &str) -> IqueryClient {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("iquery");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        IqueryClient::new(path, Endpoint::parse("local", 1239))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_refused_connection_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = script_client(
            &dir,
            "echo 'SystemException: Connection refused' >&2\nexit 1",
        );

        let err = client.fetch_records(&count_query()).await.unwrap_err();
        assert!(err.is_connection());
        assert!(err.to_string().contains("local:1239"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_query_carries_status_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let client = script_client(
            &dir,
            "echo 'UserException: SCIDB_LE_ARRAY_DOESNT_EXIST' >&2\nexit 2",
        );

        match client.execute(&count_query()).await {
            Err(PipelineError::Query {
                query,
                status,
                stderr,
            }) => {
                assert_eq!(query, "count(study)");
                assert_eq!(status, 2);
                assert_eq!(stderr, "UserException: SCIDB_LE_ARRAY_DOESNT_EXIST");
            }
            other => panic!("expected query error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_fetch_parses_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let client = script_client(&dir, "printf 'count\\n2500000\\n'");

        let n: u64 = fetch_scalar_as(&client, &count_query()).await.unwrap();
        assert_eq!(n, 2_500_000);
    }

    #[tokio::test]
    async fn test_scalar_helpers() {
        let store = FakeStore::new(|_| Ok(RecordSet::column("count", ["2500000"])));
        let n: u64 = fetch_scalar_as(&store, &count_query()).await.unwrap();
        assert_eq!(n, 2_500_000);

        let empty = FakeStore::new(|_| Ok(RecordSet::column("count", Vec::<String>::new())));
        let err = fetch_scalar_as::<u64, _>(&empty, &count_query()).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyResult(_)));

        let text = FakeStore::new(|_| Ok(RecordSet::column("count", ["#Error!"])));
        let err = fetch_scalar_as::<u64, _>(&text, &count_query()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode { .. }));
    }
}
