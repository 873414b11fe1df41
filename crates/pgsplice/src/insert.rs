//! INSERT statement construction with conflict handling.
//!
//! [`build_insert`] turns an ordered [`Record`] into a fragment of the shape
//!
//! ```sql
//! INSERT INTO "t" ("c1","c2") VALUES ($1,$2) <conflict clause> RETURNING *
//! ```
//!
//! and [`derive_insert_result`] reduces the returned rows to a well-defined
//! result under the chosen [`OnConflict`] policy: skipping a conflicting row
//! is only legal under `DO NOTHING`, and more than one returned row is always
//! a cardinality error for a single-record insert.

use crate::client::GenericClient;
use crate::error::{SpliceError, SpliceResult};
use crate::fragment::{Fragment, frag, join};
use crate::ident::quote;
use crate::param::Param;
use crate::transaction::run_transaction;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// An ordered column → value mapping for one insert row.
///
/// Column order in the generated statement matches insertion order exactly;
/// nothing is sorted or deduplicated.
#[derive(Clone, Debug, Default)]
pub struct Record {
    columns: Vec<(String, Param)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column value.
    pub fn set<T: ToSql + Send + Sync + 'static>(mut self, column: &str, value: T) -> Self {
        self.columns.push((column.to_string(), Param::new(value)));
        self
    }

    /// Set an optional column value (`None` => skip the column).
    pub fn set_opt<T: ToSql + Send + Sync + 'static>(self, column: &str, value: Option<T>) -> Self {
        if let Some(v) = value {
            self.set(column, v)
        } else {
            self
        }
    }

    /// Set a JSON column from any serializable value.
    pub fn set_json<T: serde::Serialize>(self, column: &str, value: &T) -> serde_json::Result<Self> {
        let json_val = serde_json::to_value(value)?;
        Ok(self.set(column, json_val))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column names in statement order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(c, _)| c.as_str())
    }

    fn column_list(&self) -> Fragment {
        join(self.columns.iter().map(|(c, _)| quote(c)), ",")
    }

    fn value_list(&self) -> Fragment {
        join(
            self.columns.iter().map(|(_, v)| {
                let mut f = Fragment::empty();
                f.push_param(v.clone());
                f
            }),
            ",",
        )
    }
}

/// Uniqueness target for an `ON CONFLICT` clause: a named column or a named
/// constraint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConflictTarget {
    Column(String),
    Constraint(String),
}

impl ConflictTarget {
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    pub fn constraint(name: impl Into<String>) -> Self {
        Self::Constraint(name.into())
    }

    fn write_clause(&self, stmt: &mut Fragment) {
        match self {
            Self::Column(column) => {
                stmt.push("(");
                stmt.push_fragment(quote(column));
                stmt.push(")");
            }
            Self::Constraint(constraint) => {
                stmt.push("ON CONSTRAINT ");
                stmt.push_fragment(quote(constraint));
            }
        }
    }
}

/// Conflict-resolution policy for an insert.
///
/// `DoUpdate` carries its target by construction: an update policy without a
/// uniqueness target is not representable, so that caller error cannot reach
/// statement building.
#[derive(Clone, Debug, Default)]
pub enum OnConflict {
    /// No conflict clause; a collision surfaces as a unique-violation error.
    #[default]
    Default,
    /// `DO NOTHING`, optionally restricted to one target.
    DoNothing(Option<ConflictTarget>),
    /// `DO UPDATE SET ...` on the given target.
    DoUpdate(ConflictTarget),
}

impl OnConflict {
    /// Bare `ON CONFLICT DO NOTHING`.
    pub fn do_nothing() -> Self {
        Self::DoNothing(None)
    }

    /// `ON CONFLICT <target> DO NOTHING`.
    pub fn do_nothing_on(target: ConflictTarget) -> Self {
        Self::DoNothing(Some(target))
    }

    /// `ON CONFLICT <target> DO UPDATE SET ...`.
    pub fn do_update(target: ConflictTarget) -> Self {
        Self::DoUpdate(target)
    }

    /// Whether a conflicting row may legally be skipped, i.e. whether zero
    /// returned rows is a valid outcome rather than a cardinality error.
    pub fn allows_skip(&self) -> bool {
        matches!(self, Self::DoNothing(_))
    }
}

/// Build the insert fragment for one record.
///
/// An empty record inserts defaults (`INSERT INTO "t" DEFAULT VALUES`); an
/// empty record combined with `DoUpdate` is rejected before anything is
/// built, since there is nothing to `SET`.
pub fn build_insert(
    table: &str,
    record: &Record,
    policy: &OnConflict,
) -> SpliceResult<Fragment> {
    if record.is_empty() && matches!(policy, OnConflict::DoUpdate(_)) {
        return Err(SpliceError::validation(
            "insert: DO UPDATE requires at least one column",
        ));
    }

    let mut stmt = frag("INSERT INTO ");
    stmt.push_fragment(quote(table));

    if record.is_empty() {
        stmt.push(" DEFAULT VALUES");
    } else {
        stmt.push(" (");
        stmt.push_fragment(record.column_list());
        stmt.push(") VALUES (");
        stmt.push_fragment(record.value_list());
        stmt.push(")");
    }

    match policy {
        OnConflict::Default => {}
        OnConflict::DoNothing(target) => {
            stmt.push(" ON CONFLICT ");
            if let Some(target) = target {
                target.write_clause(&mut stmt);
                stmt.push(" ");
            }
            stmt.push("DO NOTHING");
        }
        OnConflict::DoUpdate(target) => {
            stmt.push(" ON CONFLICT ");
            target.write_clause(&mut stmt);
            // The SET list re-binds the same values as a fresh placeholder
            // set, in the original column order.
            stmt.push(" DO UPDATE SET (");
            stmt.push_fragment(record.column_list());
            stmt.push(") = (");
            stmt.push_fragment(record.value_list());
            stmt.push(")");
        }
    }

    stmt.push(" RETURNING *");
    Ok(stmt)
}

/// Build one insert fragment per record.
///
/// Records may have differing key sets; each is compiled independently.
pub fn build_insert_all(
    table: &str,
    records: &[Record],
    policy: &OnConflict,
) -> SpliceResult<Vec<Fragment>> {
    records
        .iter()
        .map(|record| build_insert(table, record, policy))
        .collect()
}

/// Reduce the rows returned by a single-record insert to its result.
///
/// - exactly one row → `Some(row)`
/// - zero rows → `None` when the policy allows skipping, otherwise a
///   cardinality error
/// - more than one row → a cardinality error regardless of policy; a
///   single-record insert must affect at most one row
pub fn derive_insert_result<R>(rows: Vec<R>, policy: &OnConflict) -> SpliceResult<Option<R>> {
    let mut rows = rows;
    match rows.len() {
        0 if policy.allows_skip() => Ok(None),
        0 => Err(SpliceError::no_rows("insert returned no row unexpectedly")),
        1 => Ok(rows.pop()),
        got => Err(SpliceError::too_many_rows(1, got)),
    }
}

/// Insert one record and return the inserted row, or `None` when a conflict
/// was skipped under a `DO NOTHING` policy.
pub async fn insert_one<C: GenericClient>(
    conn: &C,
    table: &str,
    record: &Record,
    policy: &OnConflict,
) -> SpliceResult<Option<Row>> {
    let stmt = build_insert(table, record, policy)?;
    let rows = stmt.fetch_all(conn).await?;
    derive_insert_result(rows, policy)
}

/// Insert all records in one transaction, in record order, returning the
/// inserted rows. Rows skipped under a `DO NOTHING` policy are omitted.
///
/// All fragments are built up front, so caller-contract errors surface before
/// any statement is sent.
pub async fn insert_all<C: GenericClient>(
    conn: &C,
    table: &str,
    records: &[Record],
    policy: &OnConflict,
) -> SpliceResult<Vec<Row>> {
    let fragments = build_insert_all(table, records, policy)?;
    if fragments.is_empty() {
        return Ok(Vec::new());
    }

    run_transaction(conn, || async {
        let mut inserted = Vec::with_capacity(fragments.len());
        for fragment in &fragments {
            let rows = fragment.fetch_all(conn).await?;
            if let Some(row) = derive_insert_result(rows, policy)? {
                inserted.push(row);
            }
        }
        Ok(inserted)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingClient;

    fn song() -> Record {
        Record::new()
            .set("name", "Take On Me")
            .set("artist", "A-ha")
            .set("rating", 5_i32)
    }

    #[test]
    fn insert_composes_columns_in_record_order() {
        let stmt = build_insert("song", &song(), &OnConflict::Default)
            .unwrap()
            .compose();

        assert_eq!(
            stmt.text(),
            r#"INSERT INTO "song" ("name","artist","rating") VALUES ($1,$2,$3) RETURNING *"#
        );
        assert_eq!(stmt.params().len(), 3);
        let rendered: Vec<String> = stmt.params().iter().map(|p| format!("{p:?}")).collect();
        assert_eq!(rendered, [r#""Take On Me""#, r#""A-ha""#, "5"]);
    }

    #[test]
    fn bare_ignore_appends_do_nothing() {
        let record = Record::new().set("name", "x");
        let stmt = build_insert("song", &record, &OnConflict::do_nothing())
            .unwrap()
            .compose();

        assert_eq!(
            stmt.text(),
            r#"INSERT INTO "song" ("name") VALUES ($1) ON CONFLICT DO NOTHING RETURNING *"#
        );
    }

    #[test]
    fn ignore_on_column_names_the_target() {
        let record = Record::new().set("name", "x");
        let policy = OnConflict::do_nothing_on(ConflictTarget::column("name"));
        let stmt = build_insert("song", &record, &policy).unwrap().compose();

        assert_eq!(
            stmt.text(),
            r#"INSERT INTO "song" ("name") VALUES ($1) ON CONFLICT ("name") DO NOTHING RETURNING *"#
        );
    }

    #[test]
    fn ignore_on_constraint_names_the_constraint() {
        let record = Record::new().set("name", "x");
        let policy = OnConflict::do_nothing_on(ConflictTarget::constraint("song_name_key"));
        let stmt = build_insert("song", &record, &policy).unwrap().compose();

        assert_eq!(
            stmt.text(),
            r#"INSERT INTO "song" ("name") VALUES ($1) ON CONFLICT ON CONSTRAINT "song_name_key" DO NOTHING RETURNING *"#
        );
    }

    #[test]
    fn update_rebinds_values_as_fresh_placeholders() {
        let record = Record::new().set("name", "x").set("artist", "y");
        let policy = OnConflict::do_update(ConflictTarget::column("name"));
        let stmt = build_insert("song", &record, &policy).unwrap().compose();

        assert_eq!(
            stmt.text(),
            r#"INSERT INTO "song" ("name","artist") VALUES ($1,$2) ON CONFLICT ("name") DO UPDATE SET ("name","artist") = ($3,$4) RETURNING *"#
        );
        // Values are duplicated in the parameter list, not reused by
        // reference.
        assert_eq!(stmt.params().len(), 4);
        let rendered: Vec<String> = stmt.params().iter().map(|p| format!("{p:?}")).collect();
        assert_eq!(rendered, [r#""x""#, r#""y""#, r#""x""#, r#""y""#]);
    }

    #[test]
    fn update_on_constraint_names_the_constraint() {
        let record = Record::new().set("name", "x");
        let policy = OnConflict::do_update(ConflictTarget::constraint("song_name_key"));
        let stmt = build_insert("song", &record, &policy).unwrap().compose();

        assert_eq!(
            stmt.text(),
            r#"INSERT INTO "song" ("name") VALUES ($1) ON CONFLICT ON CONSTRAINT "song_name_key" DO UPDATE SET ("name") = ($2) RETURNING *"#
        );
    }

    #[test]
    fn empty_record_inserts_defaults() {
        let stmt = build_insert("audit_log", &Record::new(), &OnConflict::Default)
            .unwrap()
            .compose();
        assert_eq!(
            stmt.text(),
            r#"INSERT INTO "audit_log" DEFAULT VALUES RETURNING *"#
        );
    }

    #[test]
    fn empty_record_with_update_policy_is_rejected() {
        let policy = OnConflict::do_update(ConflictTarget::column("id"));
        let err = build_insert("song", &Record::new(), &policy).unwrap_err();
        assert!(matches!(err, SpliceError::Validation(_)));
    }

    #[test]
    fn set_opt_skips_absent_columns() {
        let record = Record::new()
            .set("name", "x")
            .set_opt("artist", None::<String>)
            .set_opt("rating", Some(3_i32));
        let cols: Vec<&str> = record.columns().collect();
        assert_eq!(cols, ["name", "rating"]);
    }

    #[test]
    fn set_json_binds_a_json_value() {
        let record = Record::new()
            .set_json("tags", &vec!["synth", "pop"])
            .unwrap();
        let stmt = build_insert("song", &record, &OnConflict::Default)
            .unwrap()
            .compose();
        assert_eq!(
            stmt.text(),
            r#"INSERT INTO "song" ("tags") VALUES ($1) RETURNING *"#
        );
    }

    #[test]
    fn records_with_differing_key_sets_compile_independently() {
        let records = vec![
            Record::new().set("name", "a"),
            Record::new().set("name", "b").set("rating", 1_i32),
        ];
        let fragments = build_insert_all("song", &records, &OnConflict::Default).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(
            fragments[0].compose().text(),
            r#"INSERT INTO "song" ("name") VALUES ($1) RETURNING *"#
        );
        assert_eq!(
            fragments[1].compose().text(),
            r#"INSERT INTO "song" ("name","rating") VALUES ($1,$2) RETURNING *"#
        );
    }

    #[test]
    fn derive_one_row_yields_the_row() {
        let row = derive_insert_result(vec![10], &OnConflict::Default).unwrap();
        assert_eq!(row, Some(10));
    }

    #[test]
    fn derive_zero_rows_is_absent_under_do_nothing() {
        let row = derive_insert_result::<i32>(vec![], &OnConflict::do_nothing()).unwrap();
        assert_eq!(row, None);

        let targeted = OnConflict::do_nothing_on(ConflictTarget::column("name"));
        let row = derive_insert_result::<i32>(vec![], &targeted).unwrap();
        assert_eq!(row, None);
    }

    #[test]
    fn derive_zero_rows_errors_without_ignore() {
        let err = derive_insert_result::<i32>(vec![], &OnConflict::Default).unwrap_err();
        assert!(matches!(err, SpliceError::NoRows(_)));

        let update = OnConflict::do_update(ConflictTarget::column("name"));
        let err = derive_insert_result::<i32>(vec![], &update).unwrap_err();
        assert!(matches!(err, SpliceError::NoRows(_)));
    }

    #[test]
    fn derive_multiple_rows_always_errors() {
        for policy in [
            OnConflict::Default,
            OnConflict::do_nothing(),
            OnConflict::do_update(ConflictTarget::column("name")),
        ] {
            let err = derive_insert_result(vec![1, 2], &policy).unwrap_err();
            assert!(matches!(err, SpliceError::TooManyRows { expected: 1, got: 2 }));
        }
    }

    #[tokio::test]
    async fn insert_all_runs_in_one_transaction() {
        let conn = RecordingClient::new();
        let records = vec![
            Record::new().set("name", "a"),
            Record::new().set("name", "b"),
        ];

        // The recording client returns no rows, which DO NOTHING treats as
        // skipped conflicts.
        let inserted = insert_all(&conn, "song", &records, &OnConflict::do_nothing())
            .await
            .unwrap();

        assert!(inserted.is_empty());
        let stmts = conn.statements();
        assert_eq!(stmts.len(), 4);
        assert_eq!(stmts[0], "BEGIN");
        assert!(stmts[1].starts_with(r#"INSERT INTO "song""#));
        assert!(stmts[2].starts_with(r#"INSERT INTO "song""#));
        assert_eq!(stmts[3], "COMMIT");
    }

    #[tokio::test]
    async fn insert_all_rolls_back_on_cardinality_error() {
        let conn = RecordingClient::new();
        let records = vec![Record::new().set("name", "a")];

        // No rows back and no ignore policy: the cardinality error must roll
        // the transaction back.
        let err = insert_all(&conn, "song", &records, &OnConflict::Default)
            .await
            .unwrap_err();

        assert!(matches!(err, SpliceError::NoRows(_)));
        assert_eq!(conn.statements().last().map(String::as_str), Some("ROLLBACK"));
    }

    #[tokio::test]
    async fn insert_all_of_nothing_sends_nothing() {
        let conn = RecordingClient::new();
        let inserted = insert_all(&conn, "song", &[], &OnConflict::Default)
            .await
            .unwrap();
        assert!(inserted.is_empty());
        assert!(conn.calls().is_empty());
    }
}
