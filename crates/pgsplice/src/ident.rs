//! SQL identifier quoting.
//!
//! Identifiers (table, column, schema, constraint names) cannot be sent as
//! bound parameters, so they are always rendered as double-quoted literals
//! with embedded quotes escaped by doubling. Quoting is unconditional; no
//! attempt is made to detect "safe" unquoted names.

use crate::fragment::Fragment;

/// Append `name` to `out` as a double-quoted identifier.
pub(crate) fn push_quoted(out: &mut String, name: &str) {
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
            out.push('"');
        } else {
            out.push(ch);
        }
    }
    out.push('"');
}

/// A fragment containing `identifier` as a double-quoted SQL identifier.
///
/// # Example
/// ```ignore
/// assert_eq!(quote("song").compose().text(), r#""song""#);
/// assert_eq!(quote(r#"has"quote"#).compose().text(), r#""has""quote""#);
/// ```
pub fn quote(identifier: &str) -> Fragment {
    let mut out = String::with_capacity(identifier.len() + 2);
    push_quoted(&mut out, identifier);
    Fragment::new(out)
}

/// A fragment containing a schema-qualified, quoted name: `"schema"."name"`.
pub fn qualified(schema: &str, name: &str) -> Fragment {
    let mut out = String::with_capacity(schema.len() + name.len() + 5);
    push_quoted(&mut out, schema);
    out.push('.');
    push_quoted(&mut out, name);
    Fragment::new(out)
}
