//! Database migrations for CareerNavigator.
//!
//! Tracks applied migrations by name and runs each only once.

use rusqlite::Connection;

/// Settings table (key-value store for client preferences).
const MIGRATION_001_SETTINGS: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (unixepoch())
);
"#;

/// Token table. The CHECK pins it to a single row so a write replaces both
/// tokens in one statement.
const MIGRATION_002_AUTH_TOKENS: &str = r#"
CREATE TABLE IF NOT EXISTS auth_tokens (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    access_token TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    token_type TEXT NOT NULL DEFAULT 'bearer',
    expires_at INTEGER,
    updated_at INTEGER NOT NULL DEFAULT (unixepoch())
);
"#;

/// Session snapshots, kept apart from tokens.
const MIGRATION_003_SESSION_STATE: &str = r#"
CREATE TABLE IF NOT EXISTS session_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (unixepoch())
);
"#;

/// All migrations in order. Each is (name, sql).
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_settings", MIGRATION_001_SETTINGS),
    ("002_auth_tokens", MIGRATION_002_AUTH_TOKENS),
    ("003_session_state", MIGRATION_003_SESSION_STATE),
];

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL DEFAULT (unixepoch())
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?)",
            [name],
            |row| row.get(0),
        )?;

        if !applied {
            tracing::info!(migration = %name, "Running migration");
            conn.execute_batch(sql)?;
            conn.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
            tracing::info!(migration = %name, "Migration complete");
        }
    }

    Ok(())
}
