//! Schema migration framework.
//!
//! Numbered SQL migrations are embedded at compile time via `include_str!`.
//! Each migration runs exactly once, tracked by the `schema_version` table.
//!
//! For databases created before the framework existed, the bootstrap step
//! detects the `contacts` table and marks migration 001 as applied so the
//! baseline SQL never runs against an already-populated database.

use rusqlite::Connection;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("migrations/001_baseline.sql"),
}];

/// Create the `schema_version` table if it doesn't exist.
fn ensure_schema_version_table(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Failed to create schema_version table: {}", e))
}

/// Return the highest applied migration version, or 0 if none.
fn current_version(conn: &Connection) -> Result<i32, String> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to read schema version: {}", e))
}

/// Detect a pre-framework database and mark the baseline as applied.
fn bootstrap_existing_db(conn: &Connection) -> Result<bool, String> {
    let version = current_version(conn)?;
    if version > 0 {
        return Ok(false);
    }

    let has_contacts: bool = conn
        .prepare("SELECT 1 FROM contacts LIMIT 1")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if has_contacts {
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            [1],
        )
        .map_err(|e| format!("Failed to bootstrap schema version: {}", e))?;
        log::info!("Migration bootstrap: marked v1 (baseline) as applied for existing database");
        return Ok(true);
    }

    Ok(false)
}

/// Back up the database before applying migrations.
///
/// Uses SQLite's online backup API to write `<db_path>.pre-migration.bak`.
/// Only called when there are pending migrations.
fn backup_before_migration(conn: &Connection) -> Result<(), String> {
    let db_path: String = conn
        .query_row("PRAGMA database_list", [], |row| row.get(2))
        .map_err(|e| format!("Failed to get database path: {}", e))?;

    if db_path.is_empty() || db_path == ":memory:" {
        return Ok(());
    }

    let backup_path = format!("{}.pre-migration.bak", db_path);
    let mut backup_conn = Connection::open(&backup_path)
        .map_err(|e| format!("Failed to open backup file: {}", e))?;

    let backup = rusqlite::backup::Backup::new(conn, &mut backup_conn)
        .map_err(|e| format!("Failed to initialize pre-migration backup: {}", e))?;

    backup
        .step(-1)
        .map_err(|e| format!("Pre-migration backup failed: {}", e))?;

    log::info!("Pre-migration backup created at {}", backup_path);
    Ok(())
}

/// Run all pending migrations.
///
/// Returns the number of migrations applied (0 if already up-to-date).
/// Fails if the database is newer than the highest known migration.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    ensure_schema_version_table(conn)?;
    bootstrap_existing_db(conn)?;

    let current = current_version(conn)?;
    let max_known = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);

    if current > max_known {
        return Err(format!(
            "Database schema version ({}) is newer than this build supports ({}). \
             Please upgrade salesdesk.",
            current, max_known
        ));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        return Ok(0);
    }

    backup_before_migration(conn)?;

    for migration in &pending {
        conn.execute_batch(migration.sql)
            .map_err(|e| format!("Migration v{} failed: {}", migration.version, e))?;

        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )
        .map_err(|e| format!("Failed to record migration v{}: {}", migration.version, e))?;

        log::info!("Applied migration v{}", migration.version);
    }

    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_db() -> Connection {
        Connection::open_in_memory().expect("in-memory db")
    }

    #[test]
    fn test_fresh_db_applies_baseline() {
        let conn = mem_db();
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, 1);
        assert_eq!(current_version(&conn).expect("version query"), 1);

        conn.execute(
            "INSERT INTO contacts (id, category_id, current_phase, sales_stage, business_name,
             created_at, updated_at)
             VALUES ('c1', 'cat', 1, 'Lead', 'Acme', '2026-01-01', '2026-01-01')",
            [],
        )
        .expect("contacts table should exist");

        conn.execute(
            "INSERT INTO stage_history (contact_id, from_phase, from_stage, to_phase, to_stage, changed_at)
             VALUES ('c1', 1, 'Lead', 2, 'Request Demo', '2026-01-02')",
            [],
        )
        .expect("stage_history table should exist");
    }

    #[test]
    fn test_phase_check_constraint() {
        let conn = mem_db();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO contacts (id, category_id, current_phase, sales_stage, created_at, updated_at)
             VALUES ('bad', 'cat', 4, 'Lead', '2026-01-01', '2026-01-01')",
            [],
        );
        assert!(result.is_err(), "phase 4 should violate the CHECK constraint");
    }

    #[test]
    fn test_bootstrap_existing_db() {
        let conn = mem_db();
        conn.execute_batch(
            "CREATE TABLE contacts (
                id TEXT PRIMARY KEY,
                category_id TEXT NOT NULL,
                sales_stage TEXT NOT NULL
            );
            INSERT INTO contacts (id, category_id, sales_stage) VALUES ('old', 'cat', 'Lead');",
        )
        .expect("seed existing db");

        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, 0, "bootstrap should mark v1 as applied, not run SQL");
        assert_eq!(current_version(&conn).unwrap(), 1);

        let stage: String = conn
            .query_row("SELECT sales_stage FROM contacts WHERE id = 'old'", [], |row| {
                row.get(0)
            })
            .expect("existing data should be preserved");
        assert_eq!(stage, "Lead");
    }

    #[test]
    fn test_forward_compat_guard() {
        let conn = mem_db();
        ensure_schema_version_table(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (999)", [])
            .unwrap();

        let err = run_migrations(&conn).unwrap_err();
        assert!(err.contains("newer than this build"), "{}", err);
    }

    #[test]
    fn test_idempotency() {
        let conn = mem_db();
        assert_eq!(run_migrations(&conn).expect("first run"), 1);
        assert_eq!(run_migrations(&conn).expect("second run"), 0);
        assert_eq!(current_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_pre_migration_backup_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("test_backup.db");

        let conn = Connection::open(&db_path).expect("open db");
        conn.execute_batch("PRAGMA journal_mode=WAL;").unwrap();
        assert_eq!(run_migrations(&conn).expect("migrations should succeed"), 1);

        let backup_path = dir.path().join("test_backup.db.pre-migration.bak");
        assert!(backup_path.exists(), "backup should exist at {}", backup_path.display());
    }
}
