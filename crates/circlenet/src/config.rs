//! Tenant-wide settings for the circle network.

use serde::{Deserialize, Serialize};

use circlenet_core::{system_drives, DrivePermission, PermissionSet, TargetDrive};

/// Configuration for the circle network service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Keys every connected identity holds regardless of circles.
    pub additional_permission_keys_for_connected_identities: PermissionSet,
    /// Permission connected identities get on anonymous-readable drives.
    pub anonymous_drive_permission_for_connected_identities: DrivePermission,
    /// Whether permission contexts include anonymous-readable drives at all.
    pub include_anonymous_drives: bool,
    /// Drive every connected identity may write feed content to.
    pub feed_drive: TargetDrive,
    /// Drive YouAuth sessions stage transit uploads on.
    pub transient_temp_drive: TargetDrive,
    /// Upper bound on `count` for paged connection listings.
    pub max_page_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            additional_permission_keys_for_connected_identities: PermissionSet::empty(),
            anonymous_drive_permission_for_connected_identities: DrivePermission::READ,
            include_anonymous_drives: true,
            feed_drive: system_drives::FEED_DRIVE,
            transient_temp_drive: system_drives::TRANSIENT_TEMP_DRIVE,
            max_page_size: 1000,
        }
    }
}
