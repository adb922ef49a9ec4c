//! SQLite implementation of the ConnectionStore trait.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use circlenet_core::{AppId, CircleId, ConnectionStatus, IdentityKey};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    check_write, domain_type_from_i32, domain_type_to_i32, AppGrantRecord, CircleMemberRecord,
    ConnectionCursor, ConnectionPage, ConnectionRecord, ConnectionStore, ConnectionWrite,
};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path, running migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(StoreError::poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(StoreError::join)?
    }
}

fn invalid_blob(idx: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, name.into(), rusqlite::types::Type::Blob)
}

fn conversion_failure(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Integer, Box::new(e))
}

fn identity_at(row: &rusqlite::Row<'_>, idx: usize, name: &str) -> rusqlite::Result<IdentityKey> {
    let bytes: Vec<u8> = row.get(idx)?;
    IdentityKey::try_from(bytes.as_slice()).map_err(|_| invalid_blob(idx, name))
}

fn circle_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<CircleId> {
    let bytes: Vec<u8> = row.get(idx)?;
    CircleId::try_from(bytes.as_slice()).map_err(|_| invalid_blob(idx, "circle_id"))
}

fn row_to_connection(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionRecord> {
    let status: i32 = row.get(3)?;
    Ok(ConnectionRecord {
        identity: identity_at(row, 0, "identity")?,
        odin_id: row.get(1)?,
        display_name: row.get(2)?,
        status: ConnectionStatus::from_i32(status).map_err(|e| conversion_failure(3, e))?,
        access_is_revoked: row.get(4)?,
        data: row.get(5)?,
        created: row.get(6)?,
        modified: row.get(7)?,
    })
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<CircleMemberRecord> {
    let domain_type: i32 = row.get(3)?;
    Ok(CircleMemberRecord {
        circle_id: circle_at(row, 0)?,
        member: identity_at(row, 1, "member_id")?,
        domain: row.get(2)?,
        domain_type: domain_type_from_i32(domain_type).ok_or_else(|| {
            rusqlite::Error::IntegralValueOutOfRange(3, i64::from(domain_type))
        })?,
        data: row.get(4)?,
    })
}

fn row_to_app_grant(row: &rusqlite::Row<'_>) -> rusqlite::Result<AppGrantRecord> {
    let app_bytes: Vec<u8> = row.get(1)?;
    Ok(AppGrantRecord {
        member: identity_at(row, 0, "member_id")?,
        app_id: AppId::try_from(app_bytes.as_slice()).map_err(|_| invalid_blob(1, "app_id"))?,
        circle_id: circle_at(row, 2)?,
        data: row.get(3)?,
    })
}

const CONNECTION_COLUMNS: &str =
    "identity, odin_id, display_name, status, access_is_revoked, data, created, modified";

#[async_trait]
impl ConnectionStore for SqliteStore {
    async fn get_connection(&self, identity: &IdentityKey) -> Result<Option<ConnectionRecord>> {
        let identity = *identity;
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {CONNECTION_COLUMNS} FROM connections WHERE identity = ?1"),
                params![identity.as_bytes().as_slice()],
                row_to_connection,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn save_connection(&self, write: ConnectionWrite) -> Result<()> {
        check_write(&write)?;

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let r = &write.record;
            let member = r.identity.as_bytes().as_slice();

            tx.execute(
                "INSERT INTO connections (
                    identity, odin_id, display_name, status, access_is_revoked,
                    data, created, modified
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(identity) DO UPDATE SET
                    odin_id = excluded.odin_id,
                    display_name = excluded.display_name,
                    status = excluded.status,
                    access_is_revoked = excluded.access_is_revoked,
                    data = excluded.data,
                    created = excluded.created,
                    modified = excluded.modified",
                params![
                    member,
                    r.odin_id,
                    r.display_name,
                    r.status.to_i32(),
                    r.access_is_revoked,
                    r.data,
                    r.created,
                    r.modified,
                ],
            )?;

            tx.execute(
                "DELETE FROM circle_members WHERE member_id = ?1",
                params![member],
            )?;
            for m in &write.circle_members {
                tx.execute(
                    "INSERT INTO circle_members (circle_id, member_id, domain, domain_type, data)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        m.circle_id.as_bytes().as_slice(),
                        member,
                        m.domain,
                        domain_type_to_i32(m.domain_type),
                        m.data,
                    ],
                )?;
            }

            tx.execute("DELETE FROM app_grants WHERE member_id = ?1", params![member])?;
            for g in &write.app_grants {
                tx.execute(
                    "INSERT INTO app_grants (member_id, app_id, circle_id, data)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        member,
                        g.app_id.as_bytes().as_slice(),
                        g.circle_id.as_bytes().as_slice(),
                        g.data,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_connection(&self, identity: &IdentityKey) -> Result<bool> {
        let identity = *identity;
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let key = identity.as_bytes().as_slice();

            let removed = tx.execute("DELETE FROM connections WHERE identity = ?1", params![key])?;
            tx.execute("DELETE FROM circle_members WHERE member_id = ?1", params![key])?;
            tx.execute("DELETE FROM app_grants WHERE member_id = ?1", params![key])?;

            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list_connections(
        &self,
        status: ConnectionStatus,
        count: usize,
        cursor: Option<ConnectionCursor>,
    ) -> Result<ConnectionPage> {
        if count == 0 {
            return Ok(ConnectionPage::default());
        }

        self.run(move |conn| {
            let limit = i64::try_from(count.saturating_add(1)).unwrap_or(i64::MAX);

            let mut records = match cursor {
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {CONNECTION_COLUMNS} FROM connections
                         WHERE status = ?1
                         ORDER BY created DESC, identity DESC
                         LIMIT ?2"
                    ))?;
                    let rows = stmt
                        .query_map(params![status.to_i32(), limit], row_to_connection)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
                Some(c) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {CONNECTION_COLUMNS} FROM connections
                         WHERE status = ?1
                           AND (created < ?2 OR (created = ?2 AND identity < ?3))
                         ORDER BY created DESC, identity DESC
                         LIMIT ?4"
                    ))?;
                    let rows = stmt
                        .query_map(
                            params![
                                status.to_i32(),
                                c.created,
                                c.identity.as_bytes().as_slice(),
                                limit
                            ],
                            row_to_connection,
                        )?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
            };

            let next_cursor = if records.len() > count {
                records.truncate(count);
                records.last().map(|r| ConnectionCursor {
                    created: r.created,
                    identity: r.identity,
                })
            } else {
                None
            };

            Ok(ConnectionPage {
                records,
                next_cursor,
            })
        })
        .await
    }

    async fn get_circle_members(&self, circle_id: CircleId) -> Result<Vec<CircleMemberRecord>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT circle_id, member_id, domain, domain_type, data
                 FROM circle_members WHERE circle_id = ?1
                 ORDER BY member_id",
            )?;
            let rows = stmt
                .query_map(params![circle_id.as_bytes().as_slice()], row_to_member)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_member_circles(&self, member: &IdentityKey) -> Result<Vec<CircleMemberRecord>> {
        let member = *member;
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT circle_id, member_id, domain, domain_type, data
                 FROM circle_members WHERE member_id = ?1
                 ORDER BY circle_id",
            )?;
            let rows = stmt
                .query_map(params![member.as_bytes().as_slice()], row_to_member)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_app_grants(&self, member: &IdentityKey) -> Result<Vec<AppGrantRecord>> {
        let member = *member;
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT member_id, app_id, circle_id, data
                 FROM app_grants WHERE member_id = ?1
                 ORDER BY app_id, circle_id",
            )?;
            let rows = stmt
                .query_map(params![member.as_bytes().as_slice()], row_to_app_grant)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_grant_row, member_row, record};

    #[tokio::test]
    async fn test_save_and_get_connection() {
        let store = SqliteStore::open_memory().unwrap();
        let rec = record("frodo.dotyou.cloud", ConnectionStatus::Connected, 100);

        store
            .save_connection(ConnectionWrite {
                record: rec.clone(),
                circle_members: vec![],
                app_grants: vec![],
            })
            .await
            .unwrap();

        let loaded = store.get_connection(&rec.identity).await.unwrap().unwrap();
        assert_eq!(loaded, rec);
    }

    #[tokio::test]
    async fn test_save_replaces_side_rows() {
        let store = SqliteStore::open_memory().unwrap();
        let rec = record("sam.dotyou.cloud", ConnectionStatus::Connected, 100);
        let a = CircleId::generate();
        let b = CircleId::generate();
        let app = AppId::generate();

        store
            .save_connection(ConnectionWrite {
                record: rec.clone(),
                circle_members: vec![member_row(&rec, a), member_row(&rec, b)],
                app_grants: vec![app_grant_row(&rec, app, a)],
            })
            .await
            .unwrap();
        assert_eq!(store.get_member_circles(&rec.identity).await.unwrap().len(), 2);

        store
            .save_connection(ConnectionWrite {
                record: rec.clone(),
                circle_members: vec![member_row(&rec, b)],
                app_grants: vec![],
            })
            .await
            .unwrap();

        let circles = store.get_member_circles(&rec.identity).await.unwrap();
        assert_eq!(circles.len(), 1);
        assert_eq!(circles[0].circle_id, b);
        assert!(store.get_circle_members(a).await.unwrap().is_empty());
        assert!(store.get_app_grants(&rec.identity).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let store = SqliteStore::open_memory().unwrap();
        let rec = record("merry.dotyou.cloud", ConnectionStatus::Connected, 100);
        let circle = CircleId::generate();

        store
            .save_connection(ConnectionWrite {
                record: rec.clone(),
                circle_members: vec![member_row(&rec, circle)],
                app_grants: vec![app_grant_row(&rec, AppId::generate(), circle)],
            })
            .await
            .unwrap();

        assert!(store.delete_connection(&rec.identity).await.unwrap());
        assert!(store.get_connection(&rec.identity).await.unwrap().is_none());
        assert!(store.get_circle_members(circle).await.unwrap().is_empty());
        assert!(store.get_app_grants(&rec.identity).await.unwrap().is_empty());

        assert!(!store.delete_connection(&rec.identity).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_foreign_side_rows() {
        let store = SqliteStore::open_memory().unwrap();
        let rec = record("pippin.dotyou.cloud", ConnectionStatus::Connected, 1);
        let other = record("gandalf.dotyou.cloud", ConnectionStatus::Connected, 1);

        let result = store
            .save_connection(ConnectionWrite {
                record: rec,
                circle_members: vec![member_row(&other, CircleId::generate())],
                app_grants: vec![],
            })
            .await;
        assert!(matches!(result, Err(StoreError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_list_connections_pages_newest_first() {
        let store = SqliteStore::open_memory().unwrap();
        for (i, name) in ["a.example.com", "b.example.com", "c.example.com", "d.example.com"]
            .iter()
            .enumerate()
        {
            store
                .save_connection(ConnectionWrite {
                    record: record(name, ConnectionStatus::Connected, i as i64),
                    circle_members: vec![],
                    app_grants: vec![],
                })
                .await
                .unwrap();
        }
        store
            .save_connection(ConnectionWrite {
                record: record("blocked.example.com", ConnectionStatus::Blocked, 10),
                circle_members: vec![],
                app_grants: vec![],
            })
            .await
            .unwrap();

        let first = store
            .list_connections(ConnectionStatus::Connected, 3, None)
            .await
            .unwrap();
        let names: Vec<_> = first.records.iter().map(|r| r.odin_id.as_str()).collect();
        assert_eq!(names, vec!["d.example.com", "c.example.com", "b.example.com"]);

        let second = store
            .list_connections(ConnectionStatus::Connected, 3, first.next_cursor)
            .await
            .unwrap();
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.records[0].odin_id, "a.example.com");
        assert!(second.next_cursor.is_none());

        let blocked = store
            .list_connections(ConnectionStatus::Blocked, 10, None)
            .await
            .unwrap();
        assert_eq!(blocked.records.len(), 1);
    }

    #[tokio::test]
    async fn test_on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.db");
        let rec = record("bilbo.dotyou.cloud", ConnectionStatus::Blocked, 5);

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .save_connection(ConnectionWrite {
                    record: rec.clone(),
                    circle_members: vec![],
                    app_grants: vec![],
                })
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let loaded = reopened.get_connection(&rec.identity).await.unwrap().unwrap();
        assert_eq!(loaded.status, ConnectionStatus::Blocked);
    }
}
