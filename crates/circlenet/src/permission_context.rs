//! Request-scoped authorization built from a connection's grants.

use std::collections::BTreeMap;

use circlenet_core::{
    CircleId, DriveId, DrivePermission, PermissionKey, PermissionSet, TargetDrive,
};
use circlenet_keys::{DriveGrant, ExchangeGrant, SecretKey};

use crate::error::{NetworkError, Result};

/// One source of permissions inside a context: a circle, an app's circle
/// grant, or a synthetic grant such as the feed drive writer.
#[derive(Debug, Clone)]
pub struct PermissionGroup {
    pub permission_set: PermissionSet,
    pub drive_grants: Vec<DriveGrant>,
    /// Opens the storage keys in `drive_grants`. `None` for groups whose
    /// drives carry no keys.
    key_store_key: Option<SecretKey>,
}

impl PermissionGroup {
    pub fn new(
        permission_set: PermissionSet,
        drive_grants: Vec<DriveGrant>,
        key_store_key: Option<SecretKey>,
    ) -> Self {
        Self {
            permission_set,
            drive_grants,
            key_store_key,
        }
    }

    pub fn from_exchange_grant(grant: &ExchangeGrant, key_store_key: Option<SecretKey>) -> Self {
        Self::new(
            grant.permission_set.clone(),
            grant.key_store_key_encrypted_drive_grants.clone(),
            key_store_key,
        )
    }
}

/// The permissions a caller holds for the duration of one request.
#[derive(Debug, Clone, Default)]
pub struct PermissionContext {
    groups: BTreeMap<String, PermissionGroup>,
    shared_secret: Option<SecretKey>,
    enabled_circles: Vec<CircleId>,
}

impl PermissionContext {
    pub fn new(
        groups: BTreeMap<String, PermissionGroup>,
        shared_secret: Option<SecretKey>,
        enabled_circles: Vec<CircleId>,
    ) -> Self {
        Self {
            groups,
            shared_secret,
            enabled_circles,
        }
    }

    /// Add or replace a group, returning the one it replaced.
    pub fn insert_group(
        &mut self,
        key: impl Into<String>,
        group: PermissionGroup,
    ) -> Option<PermissionGroup> {
        self.groups.insert(key.into(), group)
    }

    pub fn group(&self, key: &str) -> Option<&PermissionGroup> {
        self.groups.get(key)
    }

    pub fn group_keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Circles whose grants contributed to this context.
    pub fn enabled_circles(&self) -> &[CircleId] {
        &self.enabled_circles
    }

    /// Secret shared with the remote identity for payload encryption.
    pub fn shared_secret(&self) -> Option<&SecretKey> {
        self.shared_secret.as_ref()
    }

    /// Every permission key held by any group.
    pub fn permission_keys(&self) -> PermissionSet {
        self.groups
            .values()
            .fold(PermissionSet::empty(), |acc, g| acc.union(&g.permission_set))
    }

    pub fn has_permission(&self, key: PermissionKey) -> bool {
        self.groups
            .values()
            .any(|g| g.permission_set.has_key(key))
    }

    pub fn assert_has_permission(&self, key: PermissionKey) -> Result<()> {
        if self.has_permission(key) {
            Ok(())
        } else {
            Err(NetworkError::security(format!(
                "permission context lacks {:?}",
                key
            )))
        }
    }

    /// Union of everything granted on a drive.
    pub fn drive_permission(&self, drive: &TargetDrive) -> DrivePermission {
        self.groups
            .values()
            .flat_map(|g| g.drive_grants.iter())
            .filter(|dg| dg.permissioned_drive.drive == *drive)
            .fold(DrivePermission::NONE, |acc, dg| {
                acc | dg.permissioned_drive.permission
            })
    }

    pub fn has_drive_permission(&self, drive: &TargetDrive, permission: DrivePermission) -> bool {
        self.drive_permission(drive).contains(permission)
    }

    pub fn drive_id(&self, drive: &TargetDrive) -> Option<DriveId> {
        self.groups
            .values()
            .flat_map(|g| g.drive_grants.iter())
            .find(|dg| dg.permissioned_drive.drive == *drive)
            .map(|dg| dg.drive_id)
    }

    /// The storage key of a drive, from the first group that can open it.
    ///
    /// `Ok(None)` means the caller may have access but no group carries the
    /// key, as with anonymous drives.
    pub fn get_drive_storage_key(&self, drive: &TargetDrive) -> Result<Option<SecretKey>> {
        for group in self.groups.values() {
            let Some(ksk) = group.key_store_key.as_ref() else {
                continue;
            };
            let wrapped = group
                .drive_grants
                .iter()
                .filter(|dg| dg.permissioned_drive.drive == *drive)
                .find_map(|dg| dg.key_store_key_encrypted_storage_key.as_ref());
            if let Some(wrapped) = wrapped {
                return Ok(Some(wrapped.decrypt_key_clone(ksk)?));
            }
        }
        Ok(None)
    }
}
