//! Database migrations for SoulSnaps

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Initial schema (v1): memories with sync bookkeeping
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            mood TEXT NOT NULL DEFAULT 'neutral',
            photo_uri TEXT,
            audio_uri TEXT,
            latitude REAL,
            longitude REAL,
            location_name TEXT,
            is_favorite INTEGER NOT NULL DEFAULT 0,
            media_size_bytes INTEGER NOT NULL DEFAULT 0,
            sync_state TEXT NOT NULL DEFAULT 'PENDING',
            retry_count INTEGER NOT NULL DEFAULT 0,
            remote_id TEXT UNIQUE,
            remote_photo_path TEXT,
            remote_audio_path TEXT,
            last_sync_error TEXT,
            synced_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_memories_owner ON memories(owner_id);
        CREATE INDEX IF NOT EXISTS idx_memories_sync_state ON memories(sync_state);
        CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}

/// Persistent sync queue (v2)
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task TEXT NOT NULL,
            kind TEXT NOT NULL,
            memory_id INTEGER,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            enqueued_at TEXT NOT NULL,
            last_attempt_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sync_queue_attempts ON sync_queue(attempts);

        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )?;
    Ok(())
}

/// Key-value store for quotas, plans and onboarding progress (v3)
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        INSERT INTO schema_version (version) VALUES (3);
        "#,
    )?;
    Ok(())
}
