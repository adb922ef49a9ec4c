//! Grant model: the encrypted capability bundles held per connection.
//!
//! ```text
//! AccessExchangeGrant
//!   ├─ master_key_encrypted_key_store_key
//!   ├─ circle_grants: CircleId -> CircleGrant
//!   │     └─ drive grants + optional ICR key, all under the key-store key
//!   └─ app_grants: AppId -> CircleId -> AppCircleGrant
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use circlenet_core::{AppId, CircleId, DriveId, PermissionSet, PermissionedDrive};

use crate::crypto::SymmetricKeyEncrypted;
use crate::error::{KeysError, Result};
use crate::token::AccessRegistration;

/// Access to one drive, with its storage key wrapped under the key-store key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveGrant {
    pub drive_id: DriveId,
    pub permissioned_drive: PermissionedDrive,
    /// Present exactly when the permission includes read.
    pub key_store_key_encrypted_storage_key: Option<SymmetricKeyEncrypted>,
}

impl DriveGrant {
    pub fn new(
        drive_id: DriveId,
        permissioned_drive: PermissionedDrive,
        key_store_key_encrypted_storage_key: Option<SymmetricKeyEncrypted>,
    ) -> Result<Self> {
        let grant = Self {
            drive_id,
            permissioned_drive,
            key_store_key_encrypted_storage_key,
        };
        grant.validate()?;
        Ok(grant)
    }

    /// Read access without the storage key is a contradiction.
    pub fn validate(&self) -> Result<()> {
        let has_key = self
            .key_store_key_encrypted_storage_key
            .as_ref()
            .is_some_and(|k| !k.is_empty());
        if self.permissioned_drive.permission.has_read() && !has_key {
            return Err(KeysError::InvalidGrant(format!(
                "drive {} grants read without a storage key",
                self.permissioned_drive.drive
            )));
        }
        Ok(())
    }

    pub fn redacted(&self) -> RedactedDriveGrant {
        RedactedDriveGrant {
            drive_id: self.drive_id,
            permissioned_drive: self.permissioned_drive,
            has_storage_key: self.key_store_key_encrypted_storage_key.is_some(),
        }
    }
}

/// Materialized permissions of one circle for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleGrant {
    pub circle_id: CircleId,
    pub permission_set: PermissionSet,
    pub key_store_key_encrypted_drive_grants: Vec<DriveGrant>,
    pub key_store_key_encrypted_icr_key: Option<SymmetricKeyEncrypted>,
    pub created: i64,
    pub last_updated: i64,
}

impl CircleGrant {
    pub fn redacted(&self) -> RedactedCircleGrant {
        RedactedCircleGrant {
            circle_id: self.circle_id,
            permission_set: self.permission_set.clone(),
            drive_grants: self
                .key_store_key_encrypted_drive_grants
                .iter()
                .map(DriveGrant::redacted)
                .collect(),
        }
    }
}

/// Extra capabilities an app contributes for members of one of its
/// authorized circles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCircleGrant {
    pub app_id: AppId,
    pub circle_id: CircleId,
    pub permission_set: PermissionSet,
    pub key_store_key_encrypted_drive_grants: Vec<DriveGrant>,
}

impl AppCircleGrant {
    /// View as a plain exchange grant, as used in permission contexts.
    pub fn to_exchange_grant(&self) -> ExchangeGrant {
        ExchangeGrant {
            permission_set: self.permission_set.clone(),
            key_store_key_encrypted_drive_grants: self.key_store_key_encrypted_drive_grants.clone(),
            master_key_encrypted_key_store_key: None,
            is_revoked: false,
            created: 0,
            modified: 0,
        }
    }

    pub fn redacted(&self) -> RedactedExchangeGrant {
        self.to_exchange_grant().redacted()
    }
}

/// A permission set plus drive grants, the unit a permission context is
/// built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeGrant {
    pub permission_set: PermissionSet,
    pub key_store_key_encrypted_drive_grants: Vec<DriveGrant>,
    /// Only set when the grant is created for the owner.
    pub master_key_encrypted_key_store_key: Option<SymmetricKeyEncrypted>,
    pub is_revoked: bool,
    pub created: i64,
    pub modified: i64,
}

impl ExchangeGrant {
    pub fn redacted(&self) -> RedactedExchangeGrant {
        RedactedExchangeGrant {
            permission_set: self.permission_set.clone(),
            drive_grants: self
                .key_store_key_encrypted_drive_grants
                .iter()
                .map(DriveGrant::redacted)
                .collect(),
            is_revoked: self.is_revoked,
        }
    }
}

/// The full capability bundle for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessExchangeGrant {
    /// `None` while the key-store key only exists in its temporary
    /// ECC-encrypted form.
    pub master_key_encrypted_key_store_key: Option<SymmetricKeyEncrypted>,
    pub circle_grants: BTreeMap<CircleId, CircleGrant>,
    pub app_grants: BTreeMap<AppId, BTreeMap<CircleId, AppCircleGrant>>,
    pub access_registration: Option<AccessRegistration>,
    pub is_revoked: bool,
    pub created: i64,
    pub modified: i64,
}

impl AccessExchangeGrant {
    pub fn is_valid(&self) -> bool {
        !self.is_revoked
            && self
                .access_registration
                .as_ref()
                .is_some_and(AccessRegistration::is_valid)
    }

    /// Insert or replace an app's grant for one circle.
    pub fn add_update_app_circle_grant(&mut self, grant: AppCircleGrant) {
        self.app_grants
            .entry(grant.app_id)
            .or_default()
            .insert(grant.circle_id, grant);
    }

    /// Remove an app's grant for one circle. Returns true if one existed.
    pub fn remove_app_circle_grant(&mut self, app_id: AppId, circle_id: CircleId) -> bool {
        let Some(by_circle) = self.app_grants.get_mut(&app_id) else {
            return false;
        };
        let removed = by_circle.remove(&circle_id).is_some();
        if by_circle.is_empty() {
            self.app_grants.remove(&app_id);
        }
        removed
    }

    /// Drop every trace of a circle: its grant and every app grant for it.
    pub fn remove_circle(&mut self, circle_id: CircleId) {
        self.circle_grants.remove(&circle_id);
        for by_circle in self.app_grants.values_mut() {
            by_circle.remove(&circle_id);
        }
        self.app_grants.retain(|_, by_circle| !by_circle.is_empty());
    }

    pub fn has_circle(&self, circle_id: CircleId) -> bool {
        self.circle_grants.contains_key(&circle_id)
    }

    pub fn redacted(&self) -> RedactedAccessExchangeGrant {
        RedactedAccessExchangeGrant {
            is_revoked: self.is_revoked,
            circle_grants: self.circle_grants.values().map(CircleGrant::redacted).collect(),
            app_grants: self
                .app_grants
                .iter()
                .flat_map(|(app_id, by_circle)| {
                    by_circle.values().map(move |g| RedactedAppCircleGrant {
                        app_id: *app_id,
                        circle_id: g.circle_id,
                        permission_set: g.permission_set.clone(),
                        drive_grants: g
                            .key_store_key_encrypted_drive_grants
                            .iter()
                            .map(DriveGrant::redacted)
                            .collect(),
                    })
                })
                .collect(),
        }
    }
}

/// Drive grant with key material stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedDriveGrant {
    pub drive_id: DriveId,
    pub permissioned_drive: PermissionedDrive,
    pub has_storage_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedCircleGrant {
    pub circle_id: CircleId,
    pub permission_set: PermissionSet,
    pub drive_grants: Vec<RedactedDriveGrant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedAppCircleGrant {
    pub app_id: AppId,
    pub circle_id: CircleId,
    pub permission_set: PermissionSet,
    pub drive_grants: Vec<RedactedDriveGrant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedExchangeGrant {
    pub permission_set: PermissionSet,
    pub drive_grants: Vec<RedactedDriveGrant>,
    pub is_revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedAccessExchangeGrant {
    pub is_revoked: bool,
    pub circle_grants: Vec<RedactedCircleGrant>,
    pub app_grants: Vec<RedactedAppCircleGrant>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;
    use circlenet_core::{DrivePermission, PermissionKey, TargetDrive};
    use uuid::Uuid;

    fn target(n: u128) -> TargetDrive {
        TargetDrive::new(Uuid::from_u128(n), Uuid::from_u128(n))
    }

    fn app_grant(app: AppId, circle: CircleId) -> AppCircleGrant {
        AppCircleGrant {
            app_id: app,
            circle_id: circle,
            permission_set: PermissionSet::new([PermissionKey::ReadConnections]),
            key_store_key_encrypted_drive_grants: vec![],
        }
    }

    #[test]
    fn test_read_grant_requires_storage_key() {
        let pd = PermissionedDrive::new(target(1), DrivePermission::READ);
        assert!(DriveGrant::new(DriveId::generate(), pd, None).is_err());

        let wrapped =
            SymmetricKeyEncrypted::encrypt(&SecretKey::generate(), &SecretKey::generate()).unwrap();
        assert!(DriveGrant::new(DriveId::generate(), pd, Some(wrapped)).is_ok());
    }

    #[test]
    fn test_write_only_grant_needs_no_key() {
        let pd = PermissionedDrive::new(target(2), DrivePermission::WRITE);
        assert!(DriveGrant::new(DriveId::generate(), pd, None).is_ok());
    }

    #[test]
    fn test_validity_tracks_both_revocation_flags() {
        let (reg, _) = AccessRegistration::create(&SecretKey::generate()).unwrap();
        let mut grant = AccessExchangeGrant {
            access_registration: Some(reg),
            ..Default::default()
        };
        assert!(grant.is_valid());

        grant.is_revoked = true;
        assert!(!grant.is_valid());

        grant.is_revoked = false;
        if let Some(reg) = grant.access_registration.as_mut() {
            reg.is_revoked = true;
        }
        assert!(!grant.is_valid());

        grant.access_registration = None;
        assert!(!grant.is_valid());
    }

    #[test]
    fn test_remove_circle_scrubs_app_grants() {
        let app = AppId::generate();
        let keep = CircleId::generate();
        let drop_me = CircleId::generate();

        let mut grant = AccessExchangeGrant::default();
        grant.add_update_app_circle_grant(app_grant(app, keep));
        grant.add_update_app_circle_grant(app_grant(app, drop_me));

        grant.remove_circle(drop_me);
        assert_eq!(grant.app_grants[&app].len(), 1);
        assert!(grant.app_grants[&app].contains_key(&keep));

        grant.remove_circle(keep);
        assert!(grant.app_grants.is_empty());

        // idempotent
        grant.remove_circle(keep);
        assert!(grant.app_grants.is_empty());
    }

    #[test]
    fn test_add_update_app_circle_grant_overwrites() {
        let app = AppId::generate();
        let circle = CircleId::generate();
        let mut grant = AccessExchangeGrant::default();

        grant.add_update_app_circle_grant(app_grant(app, circle));
        let mut replacement = app_grant(app, circle);
        replacement.permission_set = PermissionSet::new([PermissionKey::UseTransitRead]);
        grant.add_update_app_circle_grant(replacement.clone());

        assert_eq!(grant.app_grants[&app][&circle], replacement);
    }
}
