//! Bulk table truncation.
//!
//! Discovers every base table in a schema and truncates all of them with a
//! single `TRUNCATE ... RESTART IDENTITY` statement. One statement, not one
//! per table: foreign-key ordering between the tables becomes irrelevant and
//! identity sequences reset atomically together.

use crate::client::GenericClient;
use crate::error::{SpliceError, SpliceResult};
use crate::fragment::{Fragment, frag, join};
use crate::ident::qualified;
use crate::transaction::run_transaction;

/// Build the single truncate statement for the given tables.
pub fn build_truncate(schema: &str, tables: &[String]) -> Fragment {
    let mut stmt = frag("TRUNCATE ");
    stmt.push_fragment(join(
        tables.iter().map(|table| qualified(schema, table)),
        ",",
    ));
    stmt.push(" RESTART IDENTITY");
    stmt
}

/// Truncate every base table in the `public` schema.
pub async fn clear_all_tables<C: GenericClient>(conn: &C) -> SpliceResult<()> {
    clear_all_tables_in(conn, "public").await
}

/// Truncate every base table in `schema`, inside one transaction.
///
/// If the schema has no base tables this is a no-op: the catalog query still
/// runs and the (trivial) transaction still commits, but no `TRUNCATE` is
/// sent.
pub async fn clear_all_tables_in<C: GenericClient>(conn: &C, schema: &str) -> SpliceResult<()> {
    run_transaction(conn, || async {
        let mut catalog = frag(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = ",
        );
        catalog
            .push_bind(schema.to_string())
            .push(" AND table_type = 'BASE TABLE' ORDER BY table_name");

        let rows = catalog.fetch_all(conn).await?;
        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row
                .try_get(0)
                .map_err(|e| SpliceError::decode("table_name", e.to_string()))?;
            tables.push(name);
        }

        if tables.is_empty() {
            return Ok(());
        }

        tracing::debug!(schema, tables = tables.len(), "truncating all base tables");
        build_truncate(schema, &tables).execute(conn).await?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingClient;

    #[test]
    fn truncate_lists_every_table_in_one_statement() {
        let tables = vec!["song".to_string(), "artist".to_string()];
        let stmt = build_truncate("public", &tables).compose();

        assert_eq!(
            stmt.text(),
            r#"TRUNCATE "public"."song","public"."artist" RESTART IDENTITY"#
        );
        assert!(stmt.params().is_empty());
    }

    #[test]
    fn truncate_quotes_awkward_names() {
        let tables = vec![r#"user"s"#.to_string()];
        let stmt = build_truncate("public", &tables).compose();
        assert_eq!(
            stmt.text(),
            r#"TRUNCATE "public"."user""s" RESTART IDENTITY"#
        );
    }

    #[tokio::test]
    async fn no_tables_means_no_truncate() {
        let conn = RecordingClient::new();

        clear_all_tables(&conn).await.unwrap();

        let stmts = conn.statements();
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[0], "BEGIN");
        assert!(stmts[1].contains("information_schema.tables"));
        assert_eq!(stmts[2], "COMMIT");
        assert!(!stmts.iter().any(|s| s.contains("TRUNCATE")));
    }

    #[tokio::test]
    async fn schema_name_is_a_bound_parameter() {
        let conn = RecordingClient::new();

        clear_all_tables_in(&conn, "audit").await.unwrap();

        let calls = conn.calls();
        assert!(calls[1].sql.contains("table_schema = $1"));
        assert_eq!(calls[1].params, [r#""audit""#]);
    }
}
