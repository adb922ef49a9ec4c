//! Database schema migrations for SQLite.
//!
//! Each migration transforms the schema from version N to N+1.

use rusqlite::Connection;

use circlenet_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema. Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "schema migrated");
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per identity whose status is not None
        CREATE TABLE connections (
            identity BLOB PRIMARY KEY,        -- 32 bytes, hash of the domain
            odin_id TEXT NOT NULL,
            display_name TEXT NOT NULL DEFAULT '',
            status INTEGER NOT NULL,          -- 1=connected, 2=blocked
            access_is_revoked INTEGER NOT NULL DEFAULT 0,
            data BLOB NOT NULL,               -- CBOR payload, circle/app maps cleared
            created INTEGER NOT NULL,
            modified INTEGER NOT NULL
        );

        -- Reverse index: which domains belong to which circle
        CREATE TABLE circle_members (
            circle_id BLOB NOT NULL,          -- 16 bytes
            member_id BLOB NOT NULL,          -- 32 bytes, hash of the domain
            domain TEXT NOT NULL,
            domain_type INTEGER NOT NULL,     -- 1=identity, 2=youauth
            data BLOB NOT NULL,               -- CBOR circle grant
            PRIMARY KEY (circle_id, member_id)
        );

        -- App circle grants per member
        CREATE TABLE app_grants (
            member_id BLOB NOT NULL,
            app_id BLOB NOT NULL,
            circle_id BLOB NOT NULL,
            data BLOB NOT NULL,
            PRIMARY KEY (member_id, app_id, circle_id)
        );

        CREATE INDEX idx_connections_status_created ON connections(status, created);
        CREATE INDEX idx_circle_members_member ON circle_members(member_id);
        "#,
    )?;

    Ok(())
}
