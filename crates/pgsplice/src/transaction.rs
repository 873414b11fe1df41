//! Transactional execution.
//!
//! Transaction boundaries are driven with literal `BEGIN` / `COMMIT` /
//! `ROLLBACK` statements on a [`GenericClient`] rather than through
//! `tokio_postgres::Client::transaction()`. That keeps the executor usable
//! with any client implementation (including test doubles) and makes the
//! boundary statements themselves observable.
//!
//! Every `BEGIN` is paired with exactly one terminal `COMMIT` or `ROLLBACK`:
//! the body's error triggers the rollback path, and a cancelled in-flight
//! statement surfaces as an error from the body, taking the same path.
//!
//! Calling [`run_transaction`] while a transaction is already active on the
//! same connection issues a second `BEGIN`; Postgres warns and continues the
//! existing transaction, so the inner commit/rollback moves the *outer*
//! boundary. Use [`run_savepoint`] inside an active transaction for true
//! nested isolation.
//!
//! # Example
//!
//! ```ignore
//! use pgsplice::{frag, run_transaction};
//!
//! let total = run_transaction(&client, || async {
//!     frag("UPDATE account SET balance = balance - 100 WHERE id = 1")
//!         .execute(&client)
//!         .await?;
//!     frag("UPDATE account SET balance = balance + 100 WHERE id = 2")
//!         .execute(&client)
//!         .await
//! })
//! .await?;
//! ```

use crate::client::GenericClient;
use crate::error::SpliceResult;
use crate::fragment::Fragment;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_postgres::Row;

/// Global counter for savepoint naming.
static SAVEPOINT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_savepoint_name() -> String {
    let n = SAVEPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("pgsplice_sp_{n}")
}

/// Run `body` inside a transaction.
///
/// Issues `BEGIN`, awaits the body, then `COMMIT` on success. On any error
/// from the body, issues `ROLLBACK` and re-raises the original error
/// unchanged; a failure of the rollback itself is reported via `tracing` but
/// never replaces the original error as what the caller observes.
pub async fn run_transaction<C, F, Fut, T>(conn: &C, body: F) -> SpliceResult<T>
where
    C: GenericClient,
    F: FnOnce() -> Fut,
    Fut: Future<Output = SpliceResult<T>>,
{
    conn.execute("BEGIN", &[]).await?;
    match body().await {
        Ok(value) => {
            conn.execute("COMMIT", &[]).await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_err) = conn.execute("ROLLBACK", &[]).await {
                tracing::error!(
                    error = %rollback_err,
                    "rollback failed after aborted transaction"
                );
            }
            Err(error)
        }
    }
}

/// Run `body` inside a savepoint on an already-active transaction.
///
/// Issues `SAVEPOINT <name>` with a process-unique generated name, then
/// `RELEASE SAVEPOINT` on success or `ROLLBACK TO SAVEPOINT` on error, so a
/// failing inner block does not abort the enclosing transaction.
pub async fn run_savepoint<C, F, Fut, T>(conn: &C, body: F) -> SpliceResult<T>
where
    C: GenericClient,
    F: FnOnce() -> Fut,
    Fut: Future<Output = SpliceResult<T>>,
{
    let name = next_savepoint_name();
    conn.execute(&format!("SAVEPOINT {name}"), &[]).await?;
    match body().await {
        Ok(value) => {
            conn.execute(&format!("RELEASE SAVEPOINT {name}"), &[])
                .await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_err) = conn
                .execute(&format!("ROLLBACK TO SAVEPOINT {name}"), &[])
                .await
            {
                tracing::error!(
                    error = %rollback_err,
                    savepoint = %name,
                    "rollback to savepoint failed"
                );
            }
            Err(error)
        }
    }
}

/// Execute `statements` in order inside one transaction, returning each
/// statement's rows.
///
/// An empty list is a no-op: nothing is sent to the connection, not even
/// `BEGIN`. The first failing statement aborts the batch and rolls the
/// transaction back.
pub async fn execute_all<C: GenericClient>(
    conn: &C,
    statements: Vec<Fragment>,
) -> SpliceResult<Vec<Vec<Row>>> {
    if statements.is_empty() {
        return Ok(Vec::new());
    }

    run_transaction(conn, || async {
        let mut results = Vec::with_capacity(statements.len());
        for statement in &statements {
            results.push(statement.fetch_all(conn).await?);
        }
        Ok(results)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpliceError;
    use crate::fragment::frag;
    use crate::testing::RecordingClient;

    #[tokio::test]
    async fn commits_on_success() {
        let conn = RecordingClient::new();

        let value = run_transaction(&conn, || async { Ok(7) }).await.unwrap();

        assert_eq!(value, 7);
        assert_eq!(conn.statements(), ["BEGIN", "COMMIT"]);
    }

    #[tokio::test]
    async fn rolls_back_and_reraises_on_body_error() {
        let conn = RecordingClient::new();

        let err = run_transaction(&conn, || async {
            Err::<(), _>(SpliceError::validation("boom"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, SpliceError::Validation(_)));
        assert_eq!(conn.statements(), ["BEGIN", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn nested_transactions_reissue_begin() {
        let conn = RecordingClient::new();

        run_transaction(&conn, || async {
            run_transaction(&conn, || async { Ok(()) }).await
        })
        .await
        .unwrap();

        assert_eq!(conn.statements(), ["BEGIN", "BEGIN", "COMMIT", "COMMIT"]);
    }

    #[tokio::test]
    async fn savepoint_releases_on_success() {
        let conn = RecordingClient::new();

        run_savepoint(&conn, || async { Ok(()) }).await.unwrap();

        let stmts = conn.statements();
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("SAVEPOINT pgsplice_sp_"));
        assert!(stmts[1].starts_with("RELEASE SAVEPOINT pgsplice_sp_"));
    }

    #[tokio::test]
    async fn savepoint_rolls_back_on_error() {
        let conn = RecordingClient::new();

        let err = run_savepoint(&conn, || async {
            Err::<(), _>(SpliceError::validation("inner"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, SpliceError::Validation(_)));
        let stmts = conn.statements();
        assert!(stmts[1].starts_with("ROLLBACK TO SAVEPOINT pgsplice_sp_"));
    }

    #[tokio::test]
    async fn execute_all_empty_sends_nothing() {
        let conn = RecordingClient::new();

        let results = execute_all(&conn, Vec::new()).await.unwrap();

        assert!(results.is_empty());
        assert!(conn.calls().is_empty());
    }

    #[tokio::test]
    async fn execute_all_wraps_statements_in_one_transaction() {
        let conn = RecordingClient::new();

        execute_all(&conn, vec![frag("DELETE FROM a"), frag("DELETE FROM b")])
            .await
            .unwrap();

        assert_eq!(
            conn.statements(),
            ["BEGIN", "DELETE FROM a", "DELETE FROM b", "COMMIT"]
        );
    }

    #[tokio::test]
    async fn execute_all_aborts_on_first_failure() {
        let conn = RecordingClient::fail_on("DELETE FROM b");

        let err = execute_all(
            &conn,
            vec![
                frag("DELETE FROM a"),
                frag("DELETE FROM b"),
                frag("DELETE FROM c"),
            ],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SpliceError::Other(_)));
        assert_eq!(
            conn.statements(),
            ["BEGIN", "DELETE FROM a", "DELETE FROM b", "ROLLBACK"]
        );
    }
}
