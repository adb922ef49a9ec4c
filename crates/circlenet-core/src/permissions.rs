//! Permission vocabulary: capability keys and drive permission bitmasks.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::TargetDrive;

/// Bitmask of what a grant allows on a drive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrivePermission(u32);

impl DrivePermission {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const READ_WRITE: Self = Self(1 | 2);
    pub const REACT: Self = Self(4);
    pub const COMMENT: Self = Self(8);
    pub const ALL: Self = Self(1 | 2 | 4 | 8);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Read access requires the drive storage key to be shared.
    pub const fn has_read(self) -> bool {
        self.contains(Self::READ)
    }

    pub const fn has_write(self) -> bool {
        self.contains(Self::WRITE)
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DrivePermission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for DrivePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("None");
        }
        let mut parts = Vec::new();
        if self.contains(Self::READ) {
            parts.push("Read");
        }
        if self.contains(Self::WRITE) {
            parts.push("Write");
        }
        if self.contains(Self::REACT) {
            parts.push("React");
        }
        if self.contains(Self::COMMENT) {
            parts.push("Comment");
        }
        f.write_str(&parts.join("|"))
    }
}

/// A capability key that can be held by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum PermissionKey {
    ReadConnections = 10,
    ManageConnections = 20,
    ReadConnectionRequests = 30,
    ReadCircleMembership = 50,
    ReadWhoIFollow = 80,
    ReadMyFollowers = 130,
    ManageFeed = 150,
    SendDataToOtherIdentitiesOnMyBehalf = 210,
    SendPushNotifications = 300,
    SendIntroductions = 400,
    UseTransitWrite = 880,
    UseTransitRead = 881,
}

impl PermissionKey {
    pub const fn to_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Result<Self> {
        Ok(match value {
            10 => Self::ReadConnections,
            20 => Self::ManageConnections,
            30 => Self::ReadConnectionRequests,
            50 => Self::ReadCircleMembership,
            80 => Self::ReadWhoIFollow,
            130 => Self::ReadMyFollowers,
            150 => Self::ManageFeed,
            210 => Self::SendDataToOtherIdentitiesOnMyBehalf,
            300 => Self::SendPushNotifications,
            400 => Self::SendIntroductions,
            880 => Self::UseTransitWrite,
            881 => Self::UseTransitRead,
            other => return Err(CoreError::UnknownPermissionKey(other)),
        })
    }

    /// Keys whose holders must be able to call the remote peer, and therefore
    /// receive the ICR key inside their circle grant.
    pub const fn requires_icr_key(self) -> bool {
        matches!(
            self,
            Self::UseTransitRead | Self::UseTransitWrite | Self::SendIntroductions
        )
    }
}

/// An ordered set of capability keys.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionSet {
    keys: BTreeSet<PermissionKey>,
}

impl PermissionSet {
    pub fn new(keys: impl IntoIterator<Item = PermissionKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_key(&self, key: PermissionKey) -> bool {
        self.keys.contains(&key)
    }

    pub fn insert(&mut self, key: PermissionKey) {
        self.keys.insert(key);
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = PermissionKey> + '_ {
        self.keys.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn union(&self, other: &PermissionSet) -> PermissionSet {
        Self {
            keys: self.keys.union(&other.keys).copied().collect(),
        }
    }

    pub fn requires_icr_key(&self) -> bool {
        self.keys.iter().any(|k| k.requires_icr_key())
    }
}

impl FromIterator<PermissionKey> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = PermissionKey>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// A drive paired with the permission granted on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionedDrive {
    pub drive: TargetDrive,
    pub permission: DrivePermission,
}

impl PermissionedDrive {
    pub const fn new(drive: TargetDrive, permission: DrivePermission) -> Self {
        Self { drive, permission }
    }
}

/// Request to grant access to a drive, as declared by a circle or an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriveGrantRequest {
    pub permissioned_drive: PermissionedDrive,
}

impl DriveGrantRequest {
    pub const fn new(drive: TargetDrive, permission: DrivePermission) -> Self {
        Self {
            permissioned_drive: PermissionedDrive::new(drive, permission),
        }
    }
}

/// Permission keys plus drive grants, as requested by an app for the
/// members of the circles it authorizes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionSetGrantRequest {
    pub permission_set: PermissionSet,
    pub drives: Vec<DriveGrantRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_permission_contains() {
        assert!(DrivePermission::READ_WRITE.contains(DrivePermission::READ));
        assert!(DrivePermission::READ_WRITE.contains(DrivePermission::WRITE));
        assert!(!DrivePermission::WRITE.has_read());
        assert!(DrivePermission::ALL.has_read());
        assert!(DrivePermission::NONE.is_none());
        assert_eq!(
            DrivePermission::READ | DrivePermission::WRITE,
            DrivePermission::READ_WRITE
        );
    }

    #[test]
    fn test_drive_permission_debug() {
        assert_eq!(format!("{:?}", DrivePermission::NONE), "None");
        assert_eq!(format!("{:?}", DrivePermission::READ_WRITE), "Read|Write");
    }

    #[test]
    fn test_permission_key_codes_roundtrip() {
        for key in [
            PermissionKey::ReadConnections,
            PermissionKey::ManageConnections,
            PermissionKey::ReadCircleMembership,
            PermissionKey::UseTransitWrite,
            PermissionKey::UseTransitRead,
        ] {
            assert_eq!(PermissionKey::from_i32(key.to_i32()).unwrap(), key);
        }
        assert!(PermissionKey::from_i32(-1).is_err());
    }

    #[test]
    fn test_permission_set_union_is_ordered() {
        let a = PermissionSet::new([PermissionKey::UseTransitWrite]);
        let b = PermissionSet::new([PermissionKey::ReadConnections]);
        let merged = a.union(&b);
        let keys: Vec<_> = merged.keys().collect();
        assert_eq!(
            keys,
            vec![PermissionKey::ReadConnections, PermissionKey::UseTransitWrite]
        );
    }

    #[test]
    fn test_requires_icr_key() {
        assert!(PermissionSet::new([PermissionKey::UseTransitRead]).requires_icr_key());
        assert!(!PermissionSet::new([PermissionKey::ReadConnections]).requires_icr_key());
    }
}
