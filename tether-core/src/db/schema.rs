//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: instances, events, checkpoints, command log
    r#"
    -- One row per session; liveness columns are the only mutable state
    CREATE TABLE IF NOT EXISTS instances (
        instance_id      TEXT PRIMARY KEY,
        project          TEXT NOT NULL,
        role             TEXT NOT NULL,
        context_percent  INTEGER NOT NULL DEFAULT 0,
        current_task     TEXT,
        host_location    TEXT NOT NULL,
        last_heartbeat   DATETIME NOT NULL,
        created_at       DATETIME NOT NULL,
        closed_at        DATETIME
    );

    CREATE INDEX IF NOT EXISTS idx_instances_project
        ON instances(project, last_heartbeat);

    -- Append-only, gap-free sequence per instance
    CREATE TABLE IF NOT EXISTS events (
        event_id         TEXT PRIMARY KEY,
        instance_id      TEXT NOT NULL REFERENCES instances(instance_id),
        event_type       TEXT NOT NULL,
        sequence_num     INTEGER NOT NULL,
        timestamp        DATETIME NOT NULL,
        payload          JSON NOT NULL,
        metadata         JSON,

        UNIQUE(instance_id, sequence_num)
    );

    CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);

    CREATE TABLE IF NOT EXISTS checkpoints (
        checkpoint_id    TEXT PRIMARY KEY,
        instance_id      TEXT NOT NULL REFERENCES instances(instance_id),
        checkpoint_type  TEXT NOT NULL,
        sequence_num     INTEGER NOT NULL,
        context_percent  INTEGER,
        work_state       JSON NOT NULL,
        metadata         JSON NOT NULL,
        size_bytes       INTEGER NOT NULL,
        created_at       DATETIME NOT NULL,

        UNIQUE(instance_id, sequence_num)
    );

    CREATE INDEX IF NOT EXISTS idx_checkpoints_instance
        ON checkpoints(instance_id, created_at);

    CREATE TABLE IF NOT EXISTS command_log (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        instance_id       TEXT NOT NULL REFERENCES instances(instance_id),
        command_type      TEXT NOT NULL,
        action            TEXT NOT NULL,
        tool_name         TEXT,
        parameters        JSON NOT NULL,
        result            TEXT,
        success           INTEGER NOT NULL,
        execution_time_ms INTEGER NOT NULL,
        tags              JSON NOT NULL,
        timestamp         DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_command_log_instance
        ON command_log(instance_id, timestamp);
    "#,
    // Version 2: causal parent link for chain-walk replay
    r#"
    ALTER TABLE events ADD COLUMN parent_event_id TEXT;

    CREATE INDEX IF NOT EXISTS idx_events_parent ON events(parent_event_id);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)
                .map_err(crate::error::Error::storage("run migration"))?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])
                .map_err(crate::error::Error::storage("bump schema version"))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["instances", "events", "checkpoints", "command_log"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_foreign_keys_reference_instances() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        run_migrations(&conn).unwrap();

        for table in ["events", "checkpoints", "command_log"] {
            let fk_targets: Vec<String> = conn
                .prepare(&format!("PRAGMA foreign_key_list({})", table))
                .unwrap()
                .query_map([], |row| row.get::<_, String>(2))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect();

            assert!(
                fk_targets.iter().any(|t| t == "instances"),
                "{} should reference instances",
                table
            );
        }
    }

    #[test]
    fn test_event_sequence_is_unique_per_instance() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute_batch(
            r#"
            INSERT INTO instances VALUES ('a-PS-000001', 'a', 'PS', 0, NULL, 'h', '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z', NULL);
            INSERT INTO events (event_id, instance_id, event_type, sequence_num, timestamp, payload)
                VALUES ('e1', 'a-PS-000001', 'note_added', 1, '2026-01-01T00:00:00.000000Z', '{}');
            "#,
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO events (event_id, instance_id, event_type, sequence_num, timestamp, payload)
             VALUES ('e2', 'a-PS-000001', 'note_added', 1, '2026-01-01T00:00:00.000000Z', '{}')",
            [],
        );
        assert!(dup.is_err());
    }
}
