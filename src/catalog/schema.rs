//! SQLite schema and migrations for the catalog store.
//!
//! The `meta` table is the unencrypted metadata header: schema version and
//! the store-level key-derivation salt live there so migrations and key
//! derivation can run before any sealed value is touched. Migration is
//! monotonic and runs on open; downgrade is not supported.

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize or migrate the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    let current = get_schema_version(conn)?;
    if current < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS providers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            base_url TEXT NOT NULL,
            auth_cipher BLOB NOT NULL,
            kind TEXT NOT NULL,
            discovery TEXT NOT NULL,
            static_models TEXT NOT NULL DEFAULT '[]',
            declared_rpm INTEGER,
            declared_burst INTEGER,
            max_concurrency INTEGER,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS models (
            id TEXT PRIMARY KEY,
            provider_id TEXT NOT NULL,
            vendor_id TEXT NOT NULL,
            display_name TEXT,
            discovered_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            withdrawn INTEGER NOT NULL DEFAULT 0,
            caps TEXT NOT NULL DEFAULT '{}',
            release_date TEXT,
            metadata TEXT,
            UNIQUE (provider_id, vendor_id),
            FOREIGN KEY (provider_id) REFERENCES providers(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS verification_runs (
            id TEXT PRIMARY KEY,
            model_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            trigger TEXT NOT NULL,
            job_id TEXT,
            suite_version INTEGER NOT NULL,
            usage_input INTEGER NOT NULL DEFAULT 0,
            usage_output INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (model_id) REFERENCES models(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS probe_results (
            run_id TEXT NOT NULL,
            probe TEXT NOT NULL,
            outcome TEXT NOT NULL,
            score REAL,
            first_token_ms INTEGER,
            total_ms INTEGER,
            evidence_hash TEXT,
            evidence_cipher BLOB,
            error_kind TEXT,
            detail TEXT,
            PRIMARY KEY (run_id, probe),
            FOREIGN KEY (run_id) REFERENCES verification_runs(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS score_snapshots (
            model_id TEXT PRIMARY KEY,
            source_run_id TEXT NOT NULL,
            overall INTEGER NOT NULL,
            coding REAL NOT NULL,
            responsiveness REAL NOT NULL,
            reliability REAL NOT NULL,
            feature_richness REAL NOT NULL,
            cost_effectiveness REAL NOT NULL,
            recency REAL NOT NULL,
            classifications TEXT NOT NULL DEFAULT '',
            features INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (model_id) REFERENCES models(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS pricing_samples (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            model_id TEXT NOT NULL,
            input_per_mtok REAL NOT NULL,
            output_per_mtok REAL NOT NULL,
            cached_read_per_mtok REAL,
            effective_at TEXT NOT NULL,
            FOREIGN KEY (model_id) REFERENCES models(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS limit_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            model_id TEXT NOT NULL,
            declared_rpm INTEGER,
            remaining INTEGER,
            reset_at TEXT,
            observed_at TEXT NOT NULL,
            FOREIGN KEY (model_id) REFERENCES models(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS issues (
            id TEXT PRIMARY KEY,
            subject_kind TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            severity TEXT NOT NULL,
            kind TEXT NOT NULL,
            description TEXT NOT NULL,
            workaround TEXT,
            first_seen_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            open INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            selector TEXT NOT NULL,
            cadence TEXT NOT NULL,
            overlap TEXT NOT NULL,
            paused INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            last_run_at TEXT
        );

        CREATE TABLE IF NOT EXISTS subscriptions_durable (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kinds TEXT NOT NULL DEFAULT '[]',
            providers TEXT NOT NULL DEFAULT '[]',
            models TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_runs_model ON verification_runs(model_id, started_at);
        CREATE INDEX IF NOT EXISTS idx_snapshots_overall ON score_snapshots(overall DESC);
        CREATE INDEX IF NOT EXISTS idx_snapshots_class
            ON score_snapshots(classifications, overall DESC);
        CREATE INDEX IF NOT EXISTS idx_models_provider ON models(provider_id, last_seen_at);
        CREATE INDEX IF NOT EXISTS idx_issues_subject ON issues(subject_id, open);
        CREATE INDEX IF NOT EXISTS idx_pricing_model ON pricing_samples(model_id, effective_at);
        CREATE INDEX IF NOT EXISTS idx_limits_model ON limit_snapshots(model_id, observed_at);
        ",
    )?;

    set_meta(conn, "schema_version", &SCHEMA_VERSION.to_string())?;
    Ok(())
}

/// Read a metadata header value.
pub fn get_meta(conn: &Connection, key: &str) -> SqliteResult<Option<String>> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .optional()
}

/// Write a metadata header value.
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> SqliteResult<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

/// Current schema version; 0 when uninitialised.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    Ok(get_meta(conn, "schema_version")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_schema() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_idempotent_initialization() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_meta_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        set_meta(&conn, "store_salt", "abcd").unwrap();
        assert_eq!(get_meta(&conn, "store_salt").unwrap().as_deref(), Some("abcd"));
        set_meta(&conn, "store_salt", "efgh").unwrap();
        assert_eq!(get_meta(&conn, "store_salt").unwrap().as_deref(), Some("efgh"));
        assert_eq!(get_meta(&conn, "missing").unwrap(), None);
    }

    #[test]
    fn test_provider_delete_cascades() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO providers (id, name, base_url, auth_cipher, kind, discovery, created_at)
             VALUES ('p1', 'P', 'https://x', x'00', 'openai-compatible', 'endpoint', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO models (id, provider_id, vendor_id, discovered_at, last_seen_at)
             VALUES ('m1', 'p1', 'x-fast', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM providers WHERE id = 'p1'", []).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM models", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
