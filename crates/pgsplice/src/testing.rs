//! Test-support utilities: whitespace-insensitive statement comparison and a
//! recording client.
//!
//! Both are plain functions and types, independent of any test framework's
//! matcher machinery, so they work the same under `#[test]`, `#[tokio::test]`,
//! or a custom harness.

use crate::client::GenericClient;
use crate::error::{SpliceError, SpliceResult};
use crate::fragment::Statement;
use std::sync::Mutex;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// Collapse whitespace runs to single spaces and trim the ends.
pub fn normalize_whitespace(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-insensitive statement equality.
///
/// Text is compared after normalizing whitespace runs; parameters are
/// compared by their `Debug` rendering (`Debug` is a supertrait of `ToSql`,
/// so every bound value renders itself).
pub fn statements_match(actual: &Statement, expected: &Statement) -> bool {
    normalize_whitespace(actual.text()) == normalize_whitespace(expected.text())
        && rendered_params(actual) == rendered_params(expected)
}

fn rendered_params(stmt: &Statement) -> Vec<String> {
    stmt.params().iter().map(|p| format!("{p:?}")).collect()
}

/// One statement observed by a [`RecordingClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    pub sql: String,
    /// Bound parameters rendered via `Debug`, in placeholder order.
    pub params: Vec<String>,
}

/// A [`GenericClient`] that records every statement instead of talking to a
/// database.
///
/// Queries return no rows and `execute` reports zero affected rows, which is
/// enough to drive the executor paths ("assert zero statements sent", "assert
/// the batch rolled back"). A statement whose text contains the configured
/// needle fails instead, for exercising abort paths.
#[derive(Debug, Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<RecordedCall>>,
    fail_on: Option<String>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any statement whose text contains `needle`.
    pub fn fail_on(needle: impl Into<String>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(needle.into()),
        }
    }

    /// Every recorded call, in send order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("recording client poisoned").clone()
    }

    /// Statement texts only, in send order.
    pub fn statements(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.sql).collect()
    }

    fn record(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> SpliceResult<()> {
        self.calls
            .lock()
            .expect("recording client poisoned")
            .push(RecordedCall {
                sql: sql.to_string(),
                params: params.iter().map(|p| format!("{p:?}")).collect(),
            });

        if let Some(needle) = &self.fail_on {
            if sql.contains(needle.as_str()) {
                return Err(SpliceError::Other(format!(
                    "injected failure for statement containing '{needle}'"
                )));
            }
        }
        Ok(())
    }
}

impl GenericClient for RecordingClient {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> SpliceResult<Vec<Row>> {
        self.record(sql, params)?;
        Ok(Vec::new())
    }

    async fn query_one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> SpliceResult<Row> {
        self.record(sql, params)?;
        Err(SpliceError::not_found("recording client returns no rows"))
    }

    async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> SpliceResult<Option<Row>> {
        self.record(sql, params)?;
        Ok(None)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> SpliceResult<u64> {
        self.record(sql, params)?;
        Ok(0)
    }
}
