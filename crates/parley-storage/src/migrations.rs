//! Database schema migrations.
//!
//! Applies the initial schema: visitor_profiles, conversations, messages,
//! and the schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use parley_core::error::ParleyError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ParleyError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS visitor_profiles (
            id              TEXT PRIMARY KEY NOT NULL,
            visitor_id      TEXT NOT NULL UNIQUE,
            first_seen_at   INTEGER NOT NULL,
            last_seen_at    INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id                  TEXT PRIMARY KEY NOT NULL,
            visitor_id          TEXT NOT NULL,
            visitor_profile_id  TEXT REFERENCES visitor_profiles (id),
            page_url            TEXT NOT NULL DEFAULT '',
            page_title          TEXT NOT NULL DEFAULT '',
            referrer            TEXT,
            started_at          INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_visitor
            ON conversations (visitor_id, started_at DESC);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY NOT NULL,
            conversation_id TEXT NOT NULL REFERENCES conversations (id),
            sender          TEXT NOT NULL
                            CHECK (sender IN ('user', 'bot', 'system')),
            message_type    TEXT NOT NULL
                            CHECK (message_type IN ('text', 'file', 'announcement', 'error')),
            text            TEXT NOT NULL DEFAULT '',
            file_name       TEXT,
            file_size       INTEGER,
            file_type       TEXT,
            confidence      REAL,
            intent          TEXT,
            created_at      INTEGER NOT NULL,
            seq             INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages (conversation_id, seq);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ParleyError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}
