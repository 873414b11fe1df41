//! Composable SQL fragments.
//!
//! A [`Fragment`] is a tree of literal SQL text, bound values, and nested
//! fragments. Nothing touches the database at construction time;
//! [`Fragment::compose`] flattens the tree into a single [`Statement`] with
//! `$1, $2, ...` placeholders and an aligned parameter list.
//!
//! # Example
//!
//! ```ignore
//! use pgsplice::{frag, and};
//!
//! let mut q = frag("SELECT id, name FROM song WHERE ");
//! q.push_fragment(and([
//!     { let mut c = frag("artist = "); c.push_bind("A-ha"); c },
//!     { let mut c = frag("rating >= "); c.push_bind(4_i32); c },
//! ]));
//!
//! let stmt = q.compose();
//! assert_eq!(
//!     stmt.text(),
//!     "SELECT id, name FROM song WHERE artist = $1 AND rating >= $2"
//! );
//! ```
//!
//! Placeholder numbering is a structural invariant: a bound value can never
//! drift out of alignment with its placeholder, no matter how fragments are
//! nested, because both are emitted by the same traversal.

use crate::client::GenericClient;
use crate::error::SpliceResult;
use crate::param::{Param, ParamList};
use std::fmt::Write;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

#[derive(Clone, Debug)]
enum Part {
    /// Literal SQL copied into the output verbatim. Covers both plain text
    /// and raw inlines; neither is ever parametrized.
    Text(String),
    /// A value sent as a bound parameter, numbered at compose time.
    Bind(Param),
    /// A nested fragment spliced in place, recursively.
    Sub(Fragment),
}

/// A composable piece of SQL.
///
/// Fragments are pure data: freely cloned, shared, and nested. A fragment
/// never owns a connection or transaction.
#[derive(Clone, Debug, Default)]
pub struct Fragment {
    parts: Vec<Part>,
}

/// Start a fragment from literal SQL.
pub fn frag(sql: impl Into<String>) -> Fragment {
    Fragment::new(sql)
}

/// Literal SQL inlined verbatim, never parametrized.
///
/// Alias of [`frag`]; named for call sites where the point is to opt out of
/// parametrization for a value-like input.
pub fn raw(sql: impl Into<String>) -> Fragment {
    Fragment::new(sql)
}

/// A fragment that is exactly one bound value, with no surrounding text.
pub fn param<T: ToSql + Send + Sync + 'static>(value: T) -> Fragment {
    let mut f = Fragment::empty();
    f.push_bind(value);
    f
}

/// Interleave `fragments` with a literal `delimiter`.
///
/// Empty input yields the empty fragment.
pub fn join(fragments: impl IntoIterator<Item = Fragment>, delimiter: &str) -> Fragment {
    let mut out = Fragment::empty();
    for (i, fragment) in fragments.into_iter().enumerate() {
        if i > 0 {
            out.push(delimiter);
        }
        out.push_fragment(fragment);
    }
    out
}

/// Join clauses with `" AND "`.
///
/// Empty input yields literal `TRUE`, the identity for conjunction.
pub fn and(clauses: impl IntoIterator<Item = Fragment>) -> Fragment {
    let mut clauses = clauses.into_iter().peekable();
    if clauses.peek().is_none() {
        return frag("TRUE");
    }
    join(clauses, " AND ")
}

/// Join clauses with `" OR "`.
///
/// Empty input yields literal `FALSE`, the identity for disjunction.
pub fn or(clauses: impl IntoIterator<Item = Fragment>) -> Fragment {
    let mut clauses = clauses.into_iter().peekable();
    if clauses.peek().is_none() {
        return frag("FALSE");
    }
    join(clauses, " OR ")
}

impl Fragment {
    /// Create a fragment from literal SQL.
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        if sql.is_empty() {
            return Self::empty();
        }
        Self {
            parts: vec![Part::Text(sql)],
        }
    }

    /// Create an empty fragment.
    pub fn empty() -> Self {
        Self { parts: Vec::new() }
    }

    /// Whether this fragment contains no text, binds, or nested fragments.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Append literal SQL (no parameters).
    pub fn push(&mut self, sql: &str) -> &mut Self {
        if sql.is_empty() {
            return self;
        }

        match self.parts.last_mut() {
            Some(Part::Text(last)) => last.push_str(sql),
            _ => self.parts.push(Part::Text(sql.to_string())),
        }
        self
    }

    /// Append a bound value. A placeholder is emitted in its place at compose
    /// time.
    pub fn push_bind<T>(&mut self, value: T) -> &mut Self
    where
        T: ToSql + Send + Sync + 'static,
    {
        self.parts.push(Part::Bind(Param::new(value)));
        self
    }

    pub(crate) fn push_param(&mut self, param: Param) -> &mut Self {
        self.parts.push(Part::Bind(param));
        self
    }

    /// Append a nested fragment.
    ///
    /// The splice is deferred: the child keeps its own structure until compose
    /// time, when its placeholders are numbered continuously with this
    /// fragment's own binds.
    pub fn push_fragment(&mut self, sub: Fragment) -> &mut Self {
        if !sub.is_empty() {
            self.parts.push(Part::Sub(sub));
        }
        self
    }

    /// Flatten this fragment tree into one statement.
    ///
    /// A single left-to-right depth-first walk copies literal text verbatim
    /// and assigns `$1..$k` to bound values in encounter order; the k-th
    /// placeholder always corresponds to the k-th entry of the returned
    /// parameter list. Never fails and performs no SQL validation.
    pub fn compose(&self) -> Statement {
        let mut text = String::new();
        let mut params = ParamList::new();
        self.write_into(&mut text, &mut params);
        Statement { text, params }
    }

    fn write_into(&self, out: &mut String, params: &mut ParamList) {
        for part in &self.parts {
            match part {
                Part::Text(sql) => out.push_str(sql),
                Part::Bind(p) => {
                    let idx = params.push_param(p.clone());
                    let _ = write!(out, "${idx}");
                }
                Part::Sub(sub) => sub.write_into(out, params),
            }
        }
    }

    /// Compose and execute, returning all rows.
    pub async fn fetch_all(&self, conn: &impl GenericClient) -> SpliceResult<Vec<Row>> {
        self.compose().fetch_all(conn).await
    }

    /// Compose and execute, returning the first row.
    ///
    /// Returns [`crate::SpliceError::NotFound`] if no rows are returned.
    pub async fn fetch_one(&self, conn: &impl GenericClient) -> SpliceResult<Row> {
        self.compose().fetch_one(conn).await
    }

    /// Compose and execute, returning the first row, if any.
    pub async fn fetch_opt(&self, conn: &impl GenericClient) -> SpliceResult<Option<Row>> {
        self.compose().fetch_opt(conn).await
    }

    /// Compose and execute, returning the affected row count.
    pub async fn execute(&self, conn: &impl GenericClient) -> SpliceResult<u64> {
        self.compose().execute(conn).await
    }
}

/// A composed statement: final text with `$1..$k` placeholders and the
/// aligned parameter list.
///
/// Derived and ephemeral; composing the same fragment twice yields identical
/// statements.
#[derive(Clone, Debug)]
pub struct Statement {
    text: String,
    params: ParamList,
}

impl Statement {
    /// The statement text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The bound parameters, in placeholder order.
    pub fn params(&self) -> &ParamList {
        &self.params
    }

    /// Parameter refs compatible with `tokio-postgres`.
    pub fn params_ref(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.as_refs()
    }

    /// Execute and return all rows.
    pub async fn fetch_all(&self, conn: &impl GenericClient) -> SpliceResult<Vec<Row>> {
        tracing::debug!(sql = %self.text, params = self.params.len(), "query");
        conn.query(&self.text, &self.params_ref()).await
    }

    /// Execute and return the first row.
    ///
    /// Returns [`crate::SpliceError::NotFound`] if no rows are returned.
    pub async fn fetch_one(&self, conn: &impl GenericClient) -> SpliceResult<Row> {
        tracing::debug!(sql = %self.text, params = self.params.len(), "query");
        conn.query_one(&self.text, &self.params_ref()).await
    }

    /// Execute and return the first row, if any.
    pub async fn fetch_opt(&self, conn: &impl GenericClient) -> SpliceResult<Option<Row>> {
        tracing::debug!(sql = %self.text, params = self.params.len(), "query");
        conn.query_opt(&self.text, &self.params_ref()).await
    }

    /// Execute and return the affected row count.
    pub async fn execute(&self, conn: &impl GenericClient) -> SpliceResult<u64> {
        tracing::debug!(sql = %self.text, params = self.params.len(), "execute");
        conn.execute(&self.text, &self.params_ref()).await
    }
}
