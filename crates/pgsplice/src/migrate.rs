//! SQL migrations via [`refinery`].
//!
//! The migration runner is an opaque subsystem: it receives a connection and
//! a small option set and owns everything else. Migration files live in a
//! directory (default `migrations/`) named `V<version>__<name>.sql`, or
//! `V<version>__<name>.up.sql` with an optional matching `.down.sql` for
//! rollback. History is kept in a configurable table (default
//! `pgmigrations`).

use crate::error::{SpliceError, SpliceResult};
use crate::ident::push_quoted;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub use refinery::{Migration, Report, Runner, SchemaVersion, Target};

/// Direction of a migration run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Options for [`run_migrations`].
#[derive(Clone, Debug)]
pub struct MigrateOptions {
    /// History table holding applied migrations.
    pub migrations_table: String,
    /// Directory containing migration files.
    pub dir: PathBuf,
    pub direction: Direction,
    /// How many migrations to apply or roll back. `None` means unbounded for
    /// `Up` and one step for `Down`.
    pub count: Option<usize>,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            migrations_table: "pgmigrations".to_string(),
            dir: PathBuf::from("migrations"),
            direction: Direction::Up,
            count: None,
        }
    }
}

/// A migration discovered on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationFile {
    pub version: i64,
    pub name: String,
    pub up_path: PathBuf,
    pub down_path: Option<PathBuf>,
}

/// An applied row from the history table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
}

/// What a [`run_migrations`] call did.
#[derive(Debug)]
pub enum MigrationOutcome {
    Applied(Report),
    RolledBack(Vec<AppliedMigration>),
}

/// Parse `V<version>__<name>[.up|.down].sql`; returns `(version, name, is_down)`.
fn parse_file_name(file_name: &str) -> Option<(i64, String, bool)> {
    let stem = file_name.strip_prefix('V')?;
    let (stem, down) = if let Some(s) = stem.strip_suffix(".down.sql") {
        (s, true)
    } else if let Some(s) = stem.strip_suffix(".up.sql") {
        (s, false)
    } else {
        (stem.strip_suffix(".sql")?, false)
    };

    let (version_str, name) = stem.split_once("__")?;
    if name.is_empty() {
        return None;
    }
    let version = version_str.parse::<i64>().ok().filter(|v| *v > 0)?;
    Some((version, name.to_string(), down))
}

/// Scan a migrations directory, pairing up/down files by version.
pub fn scan_dir(dir: impl AsRef<Path>) -> SpliceResult<Vec<MigrationFile>> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|e| {
        SpliceError::Migration(format!(
            "failed to read migrations dir {}: {e}",
            dir.display()
        ))
    })?;

    let mut by_version: BTreeMap<i64, (String, Option<PathBuf>, Option<PathBuf>)> =
        BTreeMap::new();

    for entry in entries {
        let entry = entry.map_err(|e| {
            SpliceError::Migration(format!("failed to read entry in {}: {e}", dir.display()))
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some((version, name, down)) = parse_file_name(file_name) else {
            continue;
        };

        let slot = by_version
            .entry(version)
            .or_insert_with(|| (name.clone(), None, None));
        if slot.0 != name {
            return Err(SpliceError::Migration(format!(
                "conflicting names for migration version {version}: '{}' vs '{name}'",
                slot.0
            )));
        }

        let target = if down { &mut slot.2 } else { &mut slot.1 };
        if target.replace(path).is_some() {
            return Err(SpliceError::Migration(format!(
                "duplicate {} migration for version {version}",
                if down { "down" } else { "up" }
            )));
        }
    }

    by_version
        .into_iter()
        .map(|(version, (name, up, down))| {
            let up_path = up.ok_or_else(|| {
                SpliceError::Migration(format!(
                    "migration V{version}__{name} has a down file but no up file"
                ))
            })?;
            Ok(MigrationFile {
                version,
                name,
                up_path,
                down_path: down,
            })
        })
        .collect()
}

fn read_sql(path: &Path) -> SpliceResult<String> {
    fs::read_to_string(path)
        .map_err(|e| SpliceError::Migration(format!("failed to read {}: {e}", path.display())))
}

fn schema_version(v: i64) -> SpliceResult<SchemaVersion> {
    SchemaVersion::try_from(v)
        .map_err(|_| SpliceError::Migration(format!("migration version out of range: {v}")))
}

fn quote_history_table(name: &str) -> SpliceResult<String> {
    let mut parts = Vec::new();
    for part in name.split('.') {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(SpliceError::Migration(format!(
                "invalid migrations table name: {name}"
            )));
        }
        let mut quoted = String::with_capacity(part.len() + 2);
        push_quoted(&mut quoted, part);
        parts.push(quoted);
    }
    Ok(parts.join("."))
}

async fn fetch_applied(
    client: &mut tokio_postgres::Client,
    table: &str,
) -> SpliceResult<Vec<AppliedMigration>> {
    let table = quote_history_table(table)?;
    let sql = format!("SELECT version::bigint, name FROM {table} ORDER BY version ASC");

    let rows = match client.query(&sql, &[]).await {
        Ok(rows) => rows,
        Err(err) => {
            // 42P01: history table does not exist yet, nothing applied.
            if err
                .as_db_error()
                .is_some_and(|db| db.code().code() == "42P01")
            {
                return Ok(Vec::new());
            }
            return Err(SpliceError::from_db_error(err));
        }
    };

    Ok(rows
        .iter()
        .map(|row| AppliedMigration {
            version: row.get(0),
            name: row.get(1),
        })
        .collect())
}

async fn run_up(
    client: &mut tokio_postgres::Client,
    options: &MigrateOptions,
) -> SpliceResult<Report> {
    let files = scan_dir(&options.dir)?;
    let mut migrations = Vec::with_capacity(files.len());
    for file in &files {
        let sql = read_sql(&file.up_path)?;
        // Feed refinery canonical names regardless of *.up.sql on disk.
        let canonical = format!("V{}__{}.sql", file.version, file.name);
        migrations.push(Migration::unapplied(&canonical, &sql)?);
    }

    let mut runner = Runner::new(&migrations);
    runner.set_migration_table_name(&options.migrations_table);

    if let Some(count) = options.count {
        let target_version = if count == 0 {
            Some(0)
        } else {
            let applied: HashSet<i64> = fetch_applied(client, &options.migrations_table)
                .await?
                .into_iter()
                .map(|m| m.version)
                .collect();
            files
                .iter()
                .filter(|f| !applied.contains(&f.version))
                .nth(count - 1)
                .map(|f| f.version)
        };
        // Fewer pending migrations than `count` means no target: run them all.
        if let Some(v) = target_version {
            runner = runner.set_target(Target::Version(schema_version(v)?));
        }
    }

    tracing::info!(dir = %options.dir.display(), "applying migrations");
    Ok(runner.run_async(client).await?)
}

async fn run_down(
    client: &mut tokio_postgres::Client,
    options: &MigrateOptions,
) -> SpliceResult<Vec<AppliedMigration>> {
    let steps = options.count.unwrap_or(1);
    if steps == 0 {
        return Ok(Vec::new());
    }

    let files: HashMap<i64, MigrationFile> = scan_dir(&options.dir)?
        .into_iter()
        .map(|f| (f.version, f))
        .collect();

    let applied = fetch_applied(client, &options.migrations_table).await?;
    if steps > applied.len() {
        return Err(SpliceError::Migration(format!(
            "cannot roll back {steps} step(s): only {} applied migration(s)",
            applied.len()
        )));
    }

    let history_table = quote_history_table(&options.migrations_table)?;
    let delete_sql = format!("DELETE FROM {history_table} WHERE version = $1");

    // Newest first.
    let to_roll: Vec<AppliedMigration> = applied.iter().rev().take(steps).cloned().collect();
    for migration in &to_roll {
        let Some(file) = files.get(&migration.version) else {
            return Err(SpliceError::Migration(format!(
                "cannot roll back V{}__{}: migration file not found in {}",
                migration.version,
                migration.name,
                options.dir.display()
            )));
        };
        let Some(down_path) = &file.down_path else {
            return Err(SpliceError::Migration(format!(
                "cannot roll back V{}__{}: missing down migration (.down.sql)",
                file.version, file.name
            )));
        };
        let down_sql = read_sql(down_path)?;

        let tx = client
            .transaction()
            .await
            .map_err(SpliceError::from_db_error)?;
        tx.batch_execute(&down_sql)
            .await
            .map_err(SpliceError::from_db_error)?;
        let deleted = tx
            .execute(&delete_sql, &[&migration.version])
            .await
            .map_err(SpliceError::from_db_error)?;
        if deleted == 0 {
            return Err(SpliceError::Migration(format!(
                "history row for version {} disappeared during rollback",
                migration.version
            )));
        }
        tx.commit().await.map_err(SpliceError::from_db_error)?;

        tracing::info!(version = migration.version, name = %migration.name, "rolled back migration");
    }

    Ok(to_roll)
}

/// Run migrations in the configured direction.
pub async fn run_migrations(
    client: &mut tokio_postgres::Client,
    options: &MigrateOptions,
) -> SpliceResult<MigrationOutcome> {
    match options.direction {
        Direction::Up => Ok(MigrationOutcome::Applied(run_up(client, options).await?)),
        Direction::Down => Ok(MigrationOutcome::RolledBack(
            run_down(client, options).await?,
        )),
    }
}

/// Roll the latest applied migration back, then re-apply it.
pub async fn redo(
    client: &mut tokio_postgres::Client,
    options: &MigrateOptions,
) -> SpliceResult<Report> {
    let down = MigrateOptions {
        direction: Direction::Down,
        count: Some(1),
        ..options.clone()
    };
    run_down(client, &down).await?;

    let up = MigrateOptions {
        direction: Direction::Up,
        count: Some(1),
        ..options.clone()
    };
    run_up(client, &up).await
}

#[cfg(test)]
mod tests {
    use super::{MigrateOptions, parse_file_name, quote_history_table, scan_dir};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn make_temp_dir() -> std::path::PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("pgsplice-migrate-test-{nonce}"));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    #[test]
    fn default_options_match_conventions() {
        let opts = MigrateOptions::default();
        assert_eq!(opts.migrations_table, "pgmigrations");
        assert_eq!(opts.dir, std::path::PathBuf::from("migrations"));
        assert!(opts.count.is_none());
    }

    #[test]
    fn parse_file_name_variants() {
        assert_eq!(
            parse_file_name("V1__init.sql"),
            Some((1, "init".to_string(), false))
        );
        assert_eq!(
            parse_file_name("V2__song.up.sql"),
            Some((2, "song".to_string(), false))
        );
        assert_eq!(
            parse_file_name("V2__song.down.sql"),
            Some((2, "song".to_string(), true))
        );
        assert_eq!(parse_file_name("not_a_migration.sql"), None);
        assert_eq!(parse_file_name("V0__too_low.sql"), None);
        assert_eq!(parse_file_name("V3__.sql"), None);
    }

    #[test]
    fn scan_dir_pairs_up_and_down_files() {
        let dir = make_temp_dir();
        std::fs::write(dir.join("V1__init.sql"), "CREATE TABLE a(id int);").expect("write");
        std::fs::write(dir.join("V2__song.up.sql"), "CREATE TABLE song(id int);")
            .expect("write");
        std::fs::write(dir.join("V2__song.down.sql"), "DROP TABLE song;").expect("write");

        let files = scan_dir(&dir).expect("scan");
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].version, 1);
        assert!(files[0].down_path.is_none());
        assert_eq!(files[1].version, 2);
        assert!(files[1].down_path.is_some());

        std::fs::remove_dir_all(dir).expect("cleanup");
    }

    #[test]
    fn scan_dir_rejects_down_without_up() {
        let dir = make_temp_dir();
        std::fs::write(dir.join("V3__x.down.sql"), "DROP TABLE x;").expect("write");

        let err = scan_dir(&dir).expect_err("must fail");
        assert!(err.to_string().contains("no up file"));

        std::fs::remove_dir_all(dir).expect("cleanup");
    }

    #[test]
    fn history_table_names_are_validated_and_quoted() {
        assert_eq!(quote_history_table("pgmigrations").unwrap(), r#""pgmigrations""#);
        assert_eq!(
            quote_history_table("audit.pgmigrations").unwrap(),
            r#""audit"."pgmigrations""#
        );
        assert!(quote_history_table("bad name").is_err());
        assert!(quote_history_table("").is_err());
    }
}
