//! Materializes circle definitions and app registrations into encrypted
//! grants for one connection's key-store key.

use std::collections::BTreeMap;
use std::sync::Arc;

use circlenet_core::{
    now_millis, validate_drive_grants, CircleDefinition, CircleId, DriveGrantRequest,
    PermissionSet, PermissionedDrive,
};
use circlenet_keys::{
    AppCircleGrant, CircleGrant, DriveGrant, ExchangeGrant, SecretKey, SymmetricKeyEncrypted,
};

use crate::collaborators::{CircleDefinitions, DriveDirectory, RedactedAppRegistration};
use crate::context::OwnerSecrets;
use crate::error::{ClientErrorCode, NetworkError, Result};

/// Builds circle, app and exchange grants from their definitions.
#[derive(Clone)]
pub struct CircleMembershipService {
    circles: Arc<dyn CircleDefinitions>,
    drives: Arc<dyn DriveDirectory>,
}

impl CircleMembershipService {
    pub fn new(circles: Arc<dyn CircleDefinitions>, drives: Arc<dyn DriveDirectory>) -> Self {
        Self { circles, drives }
    }

    pub fn circles(&self) -> &dyn CircleDefinitions {
        self.circles.as_ref()
    }

    pub fn drives(&self) -> &dyn DriveDirectory {
        self.drives.as_ref()
    }

    pub async fn get_circle(&self, circle_id: CircleId) -> Result<CircleDefinition> {
        self.circles.get_circle(circle_id).await?.ok_or_else(|| {
            NetworkError::client(
                ClientErrorCode::UnknownCircle,
                format!("circle {} does not exist", circle_id),
            )
        })
    }

    /// A missing circle counts as disabled.
    pub async fn is_circle_enabled(&self, circle_id: CircleId) -> Result<bool> {
        Ok(self
            .circles
            .get_circle(circle_id)
            .await?
            .is_some_and(|c| !c.disabled))
    }

    /// Check drive grant requests are well formed and name existing drives.
    pub async fn assert_valid_drive_grants(&self, requests: &[DriveGrantRequest]) -> Result<()> {
        validate_drive_grants(requests).map_err(|e| {
            NetworkError::client(ClientErrorCode::InvalidCircleDefinition, e.to_string())
        })?;
        for request in requests {
            let target = request.permissioned_drive.drive;
            if self.drives.get_drive(&target).await?.is_none() {
                return Err(NetworkError::client(
                    ClientErrorCode::UnknownDrive,
                    format!("drive {} does not exist", target),
                ));
            }
        }
        Ok(())
    }

    /// Drive grants under `key_store_key`.
    ///
    /// Read grants carry the drive's storage key, which can only be
    /// re-wrapped when the master key is available.
    pub async fn create_drive_grants(
        &self,
        key_store_key: &SecretKey,
        requests: &[DriveGrantRequest],
        master_key: Option<&SecretKey>,
    ) -> Result<Vec<DriveGrant>> {
        let mut grants = Vec::with_capacity(requests.len());
        for request in requests {
            let permissioned = request.permissioned_drive;
            let drive = self.drives.get_drive(&permissioned.drive).await?.ok_or_else(|| {
                NetworkError::client(
                    ClientErrorCode::UnknownDrive,
                    format!("drive {} does not exist", permissioned.drive),
                )
            })?;

            let wrapped = if permissioned.permission.has_read() {
                let master_key = master_key.ok_or_else(|| {
                    NetworkError::security("master key required to share a drive storage key")
                })?;
                let storage_key = drive
                    .master_key_encrypted_storage_key
                    .decrypt_key_clone(master_key)?;
                Some(SymmetricKeyEncrypted::encrypt(key_store_key, &storage_key)?)
            } else {
                None
            };

            grants.push(DriveGrant::new(
                drive.id,
                PermissionedDrive::new(drive.target, permissioned.permission),
                wrapped,
            )?);
        }
        Ok(grants)
    }

    /// Materialize a circle for one connection.
    ///
    /// The ICR key is wrapped into the grant when the circle's keys let its
    /// members call us back and the owner's secrets are present.
    pub async fn create_circle_grant(
        &self,
        key_store_key: &SecretKey,
        definition: &CircleDefinition,
        owner: Option<&OwnerSecrets>,
    ) -> Result<CircleGrant> {
        let master_key = owner.map(|o| &o.master_key);
        let drive_grants = self
            .create_drive_grants(key_store_key, &definition.drive_grants, master_key)
            .await?;

        let icr_key = match owner {
            Some(o) if definition.permissions.requires_icr_key() => {
                Some(SymmetricKeyEncrypted::encrypt(key_store_key, &o.icr_key)?)
            }
            _ => None,
        };

        let now = now_millis();
        Ok(CircleGrant {
            circle_id: definition.id,
            permission_set: definition.permissions.clone(),
            key_store_key_encrypted_drive_grants: drive_grants,
            key_store_key_encrypted_icr_key: icr_key,
            created: now,
            last_updated: now,
        })
    }

    /// An exchange grant for an arbitrary permission set and drives.
    pub async fn create_exchange_grant(
        &self,
        key_store_key: &SecretKey,
        permission_set: PermissionSet,
        drives: &[DriveGrantRequest],
        master_key: Option<&SecretKey>,
    ) -> Result<ExchangeGrant> {
        let drive_grants = self
            .create_drive_grants(key_store_key, drives, master_key)
            .await?;
        let master_key_encrypted_key_store_key = match master_key {
            Some(mk) => Some(SymmetricKeyEncrypted::encrypt(mk, key_store_key)?),
            None => None,
        };

        let now = now_millis();
        Ok(ExchangeGrant {
            permission_set,
            key_store_key_encrypted_drive_grants: drive_grants,
            master_key_encrypted_key_store_key,
            is_revoked: false,
            created: now,
            modified: now,
        })
    }

    /// What an app contributes to members of one of its authorized circles.
    pub async fn create_app_circle_grant(
        &self,
        key_store_key: &SecretKey,
        app: &RedactedAppRegistration,
        circle_id: CircleId,
        master_key: Option<&SecretKey>,
    ) -> Result<AppCircleGrant> {
        let request = &app.circle_member_permission_grant;
        let exchange = self
            .create_exchange_grant(
                key_store_key,
                request.permission_set.clone(),
                &request.drives,
                master_key,
            )
            .await?;

        Ok(AppCircleGrant {
            app_id: app.app_id,
            circle_id,
            permission_set: exchange.permission_set,
            key_store_key_encrypted_drive_grants: exchange.key_store_key_encrypted_drive_grants,
        })
    }

    /// Exchange grants for every enabled circle, keyed by circle id, plus the
    /// list of circles that were enabled.
    pub async fn map_circle_grants_to_exchange_grants<'a>(
        &self,
        grants: impl IntoIterator<Item = &'a CircleGrant>,
    ) -> Result<(BTreeMap<String, ExchangeGrant>, Vec<CircleId>)> {
        let mut exchange = BTreeMap::new();
        let mut enabled = Vec::new();

        for grant in grants {
            if !self.is_circle_enabled(grant.circle_id).await? {
                continue;
            }
            exchange.insert(
                grant.circle_id.to_string(),
                ExchangeGrant {
                    permission_set: grant.permission_set.clone(),
                    key_store_key_encrypted_drive_grants: grant
                        .key_store_key_encrypted_drive_grants
                        .clone(),
                    master_key_encrypted_key_store_key: None,
                    is_revoked: false,
                    created: grant.created,
                    modified: grant.last_updated,
                },
            );
            enabled.push(grant.circle_id);
        }

        Ok((exchange, enabled))
    }
}
