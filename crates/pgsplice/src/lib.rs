//! # pgsplice
//!
//! Composable, parameter-safe SQL for PostgreSQL.
//!
//! ## Features
//!
//! - **Fragments**: compose statements from nested pieces without tracking
//!   placeholder indices; values are always bound, never spliced into text
//! - **Inserts**: single- and multi-row INSERT with `ON CONFLICT` policies
//!   and well-defined result cardinality
//! - **Transactions**: BEGIN/COMMIT/ROLLBACK around statement batches, with
//!   rollback-on-error and savepoints for nested isolation
//! - **Truncation**: one-statement `TRUNCATE ... RESTART IDENTITY` across
//!   every base table of a schema
//! - **Testing**: whitespace-insensitive statement matching and a recording
//!   client for asserting exactly which statements were sent
//!
//! ## Fragments
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
//! let songs = q.fetch_all(&client).await?;
//! ```
//!
//! ## Inserts with conflict handling
//!
//! ```ignore
//! use pgsplice::{insert_one, ConflictTarget, OnConflict, Record};
//!
//! let record = Record::new()
//!     .set("name", "Take On Me")
//!     .set("artist", "A-ha")
//!     .set("rating", 5_i32);
//!
//! // `None` when the row already existed and was skipped.
//! let row = insert_one(
//!     &client,
//!     "song",
//!     &record,
//!     &OnConflict::do_nothing_on(ConflictTarget::column("name")),
//! )
//! .await?;
//! ```

pub mod client;
pub mod error;
pub mod fragment;
pub mod ident;
pub mod insert;
pub mod param;
pub mod testing;
pub mod transaction;
pub mod truncate;

pub use client::GenericClient;
pub use error::{SpliceError, SpliceResult};
pub use fragment::{Fragment, Statement, and, frag, join, or, param, raw};
pub use ident::{qualified, quote};
pub use insert::{
    ConflictTarget, OnConflict, Record, build_insert, build_insert_all, derive_insert_result,
    insert_all, insert_one,
};
pub use param::{Param, ParamList};
pub use testing::{RecordingClient, normalize_whitespace, statements_match};
pub use transaction::{execute_all, run_savepoint, run_transaction};
pub use truncate::{build_truncate, clear_all_tables, clear_all_tables_in};

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(feature = "pool")]
pub use pool::{create_pool, create_pool_sized, create_pool_with_tls};

#[cfg(feature = "migrate")]
pub mod migrate;

#[cfg(feature = "migrate")]
pub use migrate::{Direction, MigrateOptions, MigrationOutcome, redo, run_migrations};
