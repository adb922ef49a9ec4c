//! Circle definitions and the built-in system circles and drives.

use serde::{Deserialize, Serialize};

use crate::permissions::{DriveGrantRequest, PermissionSet};
use crate::types::CircleId;

/// A named, reusable bundle of drive grants and permission keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleDefinition {
    pub id: CircleId,
    pub name: String,
    pub description: String,
    pub drive_grants: Vec<DriveGrantRequest>,
    pub permissions: PermissionSet,
    pub disabled: bool,
    pub created: i64,
    pub last_updated: i64,
}

impl CircleDefinition {
    pub fn new(id: CircleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            drive_grants: Vec::new(),
            permissions: PermissionSet::empty(),
            disabled: false,
            created: 0,
            last_updated: 0,
        }
    }

    pub fn with_drive_grants(mut self, grants: impl IntoIterator<Item = DriveGrantRequest>) -> Self {
        self.drive_grants = grants.into_iter().collect();
        self
    }

    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn is_system_circle(&self) -> bool {
        system_circles::is_system_circle(self.id)
    }
}

/// Built-in circles used to bootstrap trust levels. They cannot be deleted.
pub mod system_circles {
    use uuid::Uuid;

    use crate::types::CircleId;

    /// Every fully trusted connection is a member of this circle.
    pub const CONFIRMED_CONNECTIONS: CircleId =
        CircleId::from_uuid(Uuid::from_u128(0xba4f_80d2_eac4_4b5b_a6c3_e7c8_f3e4_f6a1));

    /// Connections created through an introduction land here until confirmed.
    pub const AUTO_CONNECTIONS: CircleId =
        CircleId::from_uuid(Uuid::from_u128(0x9e22_b429_30fb_4fe5_a28c_3b6e_c0b1_5d47));

    pub fn is_system_circle(id: CircleId) -> bool {
        id == CONFIRMED_CONNECTIONS || id == AUTO_CONNECTIONS
    }
}

/// Built-in drives referenced by the permission context builder.
pub mod system_drives {
    use uuid::Uuid;

    use crate::types::TargetDrive;

    /// Drive every connected identity may push feed content into.
    pub const FEED_DRIVE: TargetDrive = TargetDrive::new(
        Uuid::from_u128(0x4db4_9422_ebad_02e9_9ab9_6e9c_477d_1e08),
        Uuid::from_u128(0x2af6_8fe7_2fb8_4b36_8d37_c3ea_f6c5_fa37),
    );

    /// Scratch drive YouAuth sessions use to stage transit uploads.
    pub const TRANSIENT_TEMP_DRIVE: TargetDrive = TargetDrive::new(
        Uuid::from_u128(0x9058_6c5d_3fcd_4d7d_a9d5_d4e4_cd0c_21d3),
        Uuid::from_u128(0x9058_6c5d_3fcd_4d7d_a9d5_d4e4_cd0c_21d3),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_circles_are_distinct() {
        assert_ne!(
            system_circles::CONFIRMED_CONNECTIONS,
            system_circles::AUTO_CONNECTIONS
        );
        assert!(CircleDefinition::new(system_circles::AUTO_CONNECTIONS, "auto").is_system_circle());
        assert!(!CircleDefinition::new(CircleId::generate(), "friends").is_system_circle());
    }
}
