//! In-memory implementation of the ConnectionStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use circlenet_core::{AppId, CircleId, ConnectionStatus, IdentityKey};

use crate::error::{Result, StoreError};
use crate::traits::{
    check_write, AppGrantRecord, CircleMemberRecord, ConnectionCursor, ConnectionPage,
    ConnectionRecord, ConnectionStore, ConnectionWrite,
};

const MIN_KEY: IdentityKey = IdentityKey::from_bytes([0x00; 32]);
const MAX_KEY: IdentityKey = IdentityKey::from_bytes([0xff; 32]);

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    connections: HashMap<IdentityKey, ConnectionRecord>,

    /// (circle, member) -> row, so a circle's members come out in key order.
    circle_members: BTreeMap<(CircleId, IdentityKey), CircleMemberRecord>,

    /// (member, app, circle) -> row.
    app_grants: BTreeMap<(IdentityKey, AppId, CircleId), AppGrantRecord>,
}

impl MemoryStoreInner {
    fn clear_side_rows(&mut self, member: &IdentityKey) {
        self.circle_members.retain(|(_, m), _| m != member);
        self.app_grants.retain(|(m, _, _), _| m != member);
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn get_connection(&self, identity: &IdentityKey) -> Result<Option<ConnectionRecord>> {
        let inner = self.inner.read().map_err(StoreError::poisoned)?;
        Ok(inner.connections.get(identity).cloned())
    }

    async fn save_connection(&self, write: ConnectionWrite) -> Result<()> {
        check_write(&write)?;

        let mut inner = self.inner.write().map_err(StoreError::poisoned)?;
        let identity = write.record.identity;

        inner.clear_side_rows(&identity);
        for m in write.circle_members {
            inner.circle_members.insert((m.circle_id, identity), m);
        }
        for g in write.app_grants {
            inner.app_grants.insert((identity, g.app_id, g.circle_id), g);
        }
        inner.connections.insert(identity, write.record);

        Ok(())
    }

    async fn delete_connection(&self, identity: &IdentityKey) -> Result<bool> {
        let mut inner = self.inner.write().map_err(StoreError::poisoned)?;
        inner.clear_side_rows(identity);
        Ok(inner.connections.remove(identity).is_some())
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

        let inner = self.inner.read().map_err(StoreError::poisoned)?;

        let mut matching: Vec<&ConnectionRecord> = inner
            .connections
            .values()
            .filter(|r| r.status == status)
            .filter(|r| match cursor {
                None => true,
                Some(c) => (r.created, r.identity) < (c.created, c.identity),
            })
            .collect();
        matching.sort_by(|a, b| (b.created, b.identity).cmp(&(a.created, a.identity)));

        let more = matching.len() > count;
        let records: Vec<ConnectionRecord> =
            matching.into_iter().take(count).cloned().collect();
        let next_cursor = if more {
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
    }

    async fn get_circle_members(&self, circle_id: CircleId) -> Result<Vec<CircleMemberRecord>> {
        let inner = self.inner.read().map_err(StoreError::poisoned)?;
        Ok(inner
            .circle_members
            .range((circle_id, MIN_KEY)..=(circle_id, MAX_KEY))
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn get_member_circles(&self, member: &IdentityKey) -> Result<Vec<CircleMemberRecord>> {
        let inner = self.inner.read().map_err(StoreError::poisoned)?;
        Ok(inner
            .circle_members
            .iter()
            .filter(|((_, m), _)| m == member)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn get_app_grants(&self, member: &IdentityKey) -> Result<Vec<AppGrantRecord>> {
        let inner = self.inner.read().map_err(StoreError::poisoned)?;
        Ok(inner
            .app_grants
            .iter()
            .filter(|((m, _, _), _)| m == member)
            .map(|(_, row)| row.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_grant_row, member_row, record};

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        let rec = record("frodo.dotyou.cloud", ConnectionStatus::Connected, 1);
        let circle = CircleId::generate();

        store
            .save_connection(ConnectionWrite {
                record: rec.clone(),
                circle_members: vec![member_row(&rec, circle)],
                app_grants: vec![app_grant_row(&rec, AppId::generate(), circle)],
            })
            .await
            .unwrap();

        assert_eq!(store.get_connection(&rec.identity).await.unwrap(), Some(rec.clone()));
        assert_eq!(store.get_circle_members(circle).await.unwrap().len(), 1);
        assert_eq!(store.get_app_grants(&rec.identity).await.unwrap().len(), 1);

        assert!(store.delete_connection(&rec.identity).await.unwrap());
        assert!(store.get_circle_members(circle).await.unwrap().is_empty());
        assert!(store.get_app_grants(&rec.identity).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_rejects_none_status() {
        let store = MemoryStore::new();
        let rec = record("sam.dotyou.cloud", ConnectionStatus::None, 1);
        let result = store
            .save_connection(ConnectionWrite {
                record: rec,
                circle_members: vec![],
                app_grants: vec![],
            })
            .await;
        assert!(matches!(result, Err(StoreError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_circle_members_are_isolated_per_circle() {
        let store = MemoryStore::new();
        let a = CircleId::generate();
        let b = CircleId::generate();

        for name in ["a.example.com", "b.example.com", "c.example.com"] {
            let rec = record(name, ConnectionStatus::Connected, 1);
            let circles = if name == "b.example.com" {
                vec![member_row(&rec, a), member_row(&rec, b)]
            } else {
                vec![member_row(&rec, a)]
            };
            store
                .save_connection(ConnectionWrite {
                    record: rec,
                    circle_members: circles,
                    app_grants: vec![],
                })
                .await
                .unwrap();
        }

        let in_a = store.get_circle_members(a).await.unwrap();
        assert_eq!(in_a.len(), 3);
        assert!(in_a.windows(2).all(|w| w[0].member < w[1].member));

        let in_b = store.get_circle_members(b).await.unwrap();
        assert_eq!(in_b.len(), 1);
        assert_eq!(in_b[0].domain, "b.example.com");
    }

    #[tokio::test]
    async fn test_memory_paging_matches_sqlite_order() {
        let memory = MemoryStore::new();
        let sqlite = crate::SqliteStore::open_memory().unwrap();

        // Same created time forces the identity tiebreak.
        for name in ["a.example.com", "b.example.com", "c.example.com", "d.example.com", "e.example.com"] {
            let write = ConnectionWrite {
                record: record(name, ConnectionStatus::Connected, 42),
                circle_members: vec![],
                app_grants: vec![],
            };
            memory.save_connection(write.clone()).await.unwrap();
            sqlite.save_connection(write).await.unwrap();
        }

        let mut mem_cursor = None;
        let mut sql_cursor = None;
        loop {
            let m = memory
                .list_connections(ConnectionStatus::Connected, 2, mem_cursor)
                .await
                .unwrap();
            let s = sqlite
                .list_connections(ConnectionStatus::Connected, 2, sql_cursor)
                .await
                .unwrap();
            assert_eq!(m.records, s.records);
            assert_eq!(m.next_cursor, s.next_cursor);
            if m.next_cursor.is_none() {
                break;
            }
            mem_cursor = m.next_cursor;
            sql_cursor = s.next_cursor;
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_paging_visits_every_connection_once(
            created in proptest::collection::vec(0i64..5, 1..20),
            page in 1usize..6,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = MemoryStore::new();
                for (i, c) in created.iter().enumerate() {
                    let name = format!("member{}.example.com", i);
                    store
                        .save_connection(ConnectionWrite {
                            record: record(&name, ConnectionStatus::Connected, *c),
                            circle_members: vec![],
                            app_grants: vec![],
                        })
                        .await
                        .unwrap();
                }

                let mut seen = Vec::new();
                let mut cursor = None;
                loop {
                    let p = store
                        .list_connections(ConnectionStatus::Connected, page, cursor)
                        .await
                        .unwrap();
                    seen.extend(p.records.iter().map(|r| (r.created, r.identity)));
                    match p.next_cursor {
                        Some(c) => cursor = Some(c),
                        None => break,
                    }
                }

                assert_eq!(seen.len(), created.len());
                assert!(seen.windows(2).all(|w| w[0] > w[1]));
            });
        }
    }
}
