//! Maps identity connection registrations onto the three connection tables.
//!
//! The connection row carries the ICR with its circle and app grant maps
//! emptied. Circle grants live in `circle_members` rows and app grants in
//! `app_grants` rows, so circle membership can be enumerated without
//! decoding every connection. Writes replace all three in one commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use circlenet_core::{
    now_millis, CircleId, ConnectionRequestOrigin, ConnectionStatus, DomainType, OdinId,
};
use circlenet_keys::{
    AccessExchangeGrant, AppCircleGrant, CircleGrant, EccEncryptedPayload,
    EncryptedClientAccessToken,
};
use circlenet_store::{
    AppGrantRecord, CircleMemberRecord, ConnectionCursor, ConnectionRecord, ConnectionStore,
    ConnectionWrite,
};

use crate::error::{NetworkError, Result};
use crate::icr::{ContactRequestData, IdentityConnectionRegistration};

/// Encode a value as CBOR.
pub(crate) fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| NetworkError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Decode a CBOR value.
pub(crate) fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| NetworkError::Serialization(e.to_string()))
}

/// The serialized body of a connection row.
#[derive(Serialize, Deserialize)]
struct ConnectionPayload {
    odin_id: OdinId,
    /// Circle and app grant maps are always empty here.
    access_grant: Option<AccessExchangeGrant>,
    encrypted_client_access_token: Option<EncryptedClientAccessToken>,
    temporary_weak_client_access_token: Option<EccEncryptedPayload>,
    temp_weak_key_store_key: Option<EccEncryptedPayload>,
    original_contact_data: ContactRequestData,
    connection_request_origin: ConnectionRequestOrigin,
    introducer_odin_id: Option<OdinId>,
    verification_hash: Option<Vec<u8>>,
}

/// A member of a circle as recorded in the membership table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircleDomain {
    pub domain: OdinId,
    pub domain_type: DomainType,
}

/// One page of registrations.
#[derive(Debug, Clone)]
pub struct IcrPage {
    pub results: Vec<IdentityConnectionRegistration>,
    pub cursor: Option<ConnectionCursor>,
}

/// Storage adapter for identity connection registrations.
pub struct CircleNetworkStorage<S: ConnectionStore> {
    store: Arc<S>,
}

impl<S: ConnectionStore> Clone for CircleNetworkStorage<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ConnectionStore> CircleNetworkStorage<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load a registration with its circle and app grants reassembled.
    pub async fn get(&self, odin_id: &OdinId) -> Result<Option<IdentityConnectionRegistration>> {
        match self.store.get_connection(&odin_id.key()).await? {
            Some(record) => Ok(Some(self.assemble(record).await?)),
            None => Ok(None),
        }
    }

    /// Persist a registration. A registration in state `None` is deleted.
    pub async fn upsert(&self, icr: &IdentityConnectionRegistration) -> Result<()> {
        if icr.status == ConnectionStatus::None {
            self.delete(&icr.odin_id).await?;
            return Ok(());
        }

        let identity = icr.odin_id.key();

        let mut circle_members = Vec::new();
        let mut app_grants = Vec::new();
        let mut stripped = icr.access_grant.clone();

        if let Some(grant) = stripped.as_mut() {
            for (circle_id, circle_grant) in std::mem::take(&mut grant.circle_grants) {
                circle_members.push(CircleMemberRecord {
                    circle_id,
                    member: identity,
                    domain: icr.odin_id.to_string(),
                    domain_type: DomainType::Identity,
                    data: to_cbor(&circle_grant)?,
                });
            }
            for (app_id, by_circle) in std::mem::take(&mut grant.app_grants) {
                for (circle_id, app_grant) in by_circle {
                    app_grants.push(AppGrantRecord {
                        member: identity,
                        app_id,
                        circle_id,
                        data: to_cbor(&app_grant)?,
                    });
                }
            }
        }

        let payload = ConnectionPayload {
            odin_id: icr.odin_id.clone(),
            access_grant: stripped,
            encrypted_client_access_token: icr.encrypted_client_access_token.clone(),
            temporary_weak_client_access_token: icr.temporary_weak_client_access_token.clone(),
            temp_weak_key_store_key: icr.temp_weak_key_store_key.clone(),
            original_contact_data: icr.original_contact_data.clone(),
            connection_request_origin: icr.connection_request_origin,
            introducer_odin_id: icr.introducer_odin_id.clone(),
            verification_hash: icr.verification_hash.clone(),
        };

        let record = ConnectionRecord {
            identity,
            odin_id: icr.odin_id.to_string(),
            display_name: icr.original_contact_data.name.clone().unwrap_or_default(),
            status: icr.status,
            access_is_revoked: icr.access_grant.as_ref().is_some_and(|g| g.is_revoked),
            data: to_cbor(&payload)?,
            created: icr.created,
            modified: if icr.last_updated > 0 {
                icr.last_updated
            } else {
                now_millis()
            },
        };

        self.store
            .save_connection(ConnectionWrite {
                record,
                circle_members,
                app_grants,
            })
            .await?;

        Ok(())
    }

    /// Remove a registration and every membership and app grant row.
    pub async fn delete(&self, odin_id: &OdinId) -> Result<bool> {
        Ok(self.store.delete_connection(&odin_id.key()).await?)
    }

    /// Registrations with the given status, newest first.
    pub async fn get_list(
        &self,
        status: ConnectionStatus,
        count: usize,
        cursor: Option<ConnectionCursor>,
    ) -> Result<IcrPage> {
        let page = self.store.list_connections(status, count, cursor).await?;
        let mut results = Vec::with_capacity(page.records.len());
        for record in page.records {
            results.push(self.assemble(record).await?);
        }
        Ok(IcrPage {
            results,
            cursor: page.next_cursor,
        })
    }

    /// Domains recorded as members of a circle.
    pub async fn domains_in_circle(&self, circle_id: CircleId) -> Result<Vec<CircleDomain>> {
        let rows = self.store.get_circle_members(circle_id).await?;
        rows.into_iter()
            .map(|row| {
                Ok(CircleDomain {
                    domain: OdinId::new(&row.domain)?,
                    domain_type: row.domain_type,
                })
            })
            .collect()
    }

    async fn assemble(&self, record: ConnectionRecord) -> Result<IdentityConnectionRegistration> {
        let payload: ConnectionPayload = from_cbor(&record.data)?;
        let mut access_grant = payload.access_grant;

        if let Some(grant) = access_grant.as_mut() {
            let mut circle_grants = BTreeMap::new();
            for row in self.store.get_member_circles(&record.identity).await? {
                let circle_grant: CircleGrant = from_cbor(&row.data)?;
                circle_grants.insert(row.circle_id, circle_grant);
            }
            grant.circle_grants = circle_grants;

            for row in self.store.get_app_grants(&record.identity).await? {
                let app_grant: AppCircleGrant = from_cbor(&row.data)?;
                grant.add_update_app_circle_grant(app_grant);
            }
        }

        Ok(IdentityConnectionRegistration {
            odin_id: payload.odin_id,
            status: record.status,
            access_grant,
            encrypted_client_access_token: payload.encrypted_client_access_token,
            temporary_weak_client_access_token: payload.temporary_weak_client_access_token,
            temp_weak_key_store_key: payload.temp_weak_key_store_key,
            original_contact_data: payload.original_contact_data,
            connection_request_origin: payload.connection_request_origin,
            introducer_odin_id: payload.introducer_odin_id,
            verification_hash: payload.verification_hash,
            created: record.created,
            last_updated: record.modified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circlenet_core::{system_circles, AppId, PermissionKey, PermissionSet};
    use circlenet_keys::{AccessRegistration, SecretKey, SymmetricKeyEncrypted};
    use circlenet_store::{MemoryStore, SqliteStore};

    fn circle_grant(circle_id: CircleId) -> CircleGrant {
        CircleGrant {
            circle_id,
            permission_set: PermissionSet::new([PermissionKey::ReadConnections]),
            key_store_key_encrypted_drive_grants: vec![],
            key_store_key_encrypted_icr_key: None,
            created: 1,
            last_updated: 1,
        }
    }

    fn connected(domain: &str, circles: &[CircleId], apps: &[(AppId, CircleId)]) -> IdentityConnectionRegistration {
        let master_key = SecretKey::generate();
        let ksk = SecretKey::generate();
        let (reg, _) = AccessRegistration::create(&ksk).unwrap();

        let mut grant = AccessExchangeGrant {
            master_key_encrypted_key_store_key: Some(
                SymmetricKeyEncrypted::encrypt(&master_key, &ksk).unwrap(),
            ),
            access_registration: Some(reg),
            created: 10,
            modified: 10,
            ..Default::default()
        };
        for c in circles {
            grant.circle_grants.insert(*c, circle_grant(*c));
        }
        for (app_id, circle_id) in apps {
            grant.add_update_app_circle_grant(AppCircleGrant {
                app_id: *app_id,
                circle_id: *circle_id,
                permission_set: PermissionSet::new([PermissionKey::ReadCircleMembership]),
                key_store_key_encrypted_drive_grants: vec![],
            });
        }

        let mut icr = IdentityConnectionRegistration::none(OdinId::new(domain).unwrap());
        icr.status = ConnectionStatus::Connected;
        icr.access_grant = Some(grant);
        icr.original_contact_data.name = Some("Frodo".into());
        icr.created = 100;
        icr.last_updated = 100;
        icr
    }

    #[tokio::test]
    async fn test_roundtrip_reassembles_grants() {
        let storage = CircleNetworkStorage::new(Arc::new(MemoryStore::new()));
        let friends = CircleId::generate();
        let app = AppId::generate();
        let icr = connected(
            "frodo.dotyou.cloud",
            &[system_circles::CONFIRMED_CONNECTIONS, friends],
            &[(app, friends)],
        );

        storage.upsert(&icr).await.unwrap();
        let loaded = storage.get(&icr.odin_id).await.unwrap().unwrap();
        assert_eq!(loaded, icr);

        let members = storage.domains_in_circle(friends).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].domain, icr.odin_id);
    }

    #[tokio::test]
    async fn test_upsert_replaces_membership() {
        let storage = CircleNetworkStorage::new(Arc::new(SqliteStore::open_memory().unwrap()));
        let friends = CircleId::generate();
        let mut icr = connected("sam.dotyou.cloud", &[friends], &[(AppId::generate(), friends)]);
        storage.upsert(&icr).await.unwrap();

        if let Some(grant) = icr.access_grant.as_mut() {
            grant.remove_circle(friends);
        }
        storage.upsert(&icr).await.unwrap();

        assert!(storage.domains_in_circle(friends).await.unwrap().is_empty());
        let loaded = storage.get(&icr.odin_id).await.unwrap().unwrap();
        let grant = loaded.access_grant.unwrap();
        assert!(grant.circle_grants.is_empty());
        assert!(grant.app_grants.is_empty());
    }

    #[tokio::test]
    async fn test_none_status_deletes() {
        let storage = CircleNetworkStorage::new(Arc::new(MemoryStore::new()));
        let friends = CircleId::generate();
        let mut icr = connected("merry.dotyou.cloud", &[friends], &[]);
        storage.upsert(&icr).await.unwrap();

        icr.status = ConnectionStatus::None;
        storage.upsert(&icr).await.unwrap();

        assert!(storage.get(&icr.odin_id).await.unwrap().is_none());
        assert!(storage.domains_in_circle(friends).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blocked_without_grant() {
        let storage = CircleNetworkStorage::new(Arc::new(MemoryStore::new()));
        let mut icr = IdentityConnectionRegistration::none(OdinId::new("sauron.example.com").unwrap());
        icr.status = ConnectionStatus::Blocked;
        icr.created = 5;
        icr.last_updated = 5;
        storage.upsert(&icr).await.unwrap();

        let loaded = storage.get(&icr.odin_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ConnectionStatus::Blocked);
        assert!(loaded.access_grant.is_none());

        let page = storage
            .get_list(ConnectionStatus::Blocked, 10, None)
            .await
            .unwrap();
        assert_eq!(page.results.len(), 1);
        assert!(page.cursor.is_none());
    }
}
