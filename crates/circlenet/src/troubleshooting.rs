//! Diagnostic view comparing a connection's materialized circle grants with
//! the live circle definitions.

use serde::Serialize;

use circlenet_core::{
    CircleDefinition, CircleId, DriveGrantRequest, DrivePermission, PermissionSet, TargetDrive,
};
use circlenet_keys::CircleGrant;

use crate::collaborators::StorageDrive;

#[derive(Debug, Clone, Default, Serialize)]
pub struct IcrTroubleshootingInfo {
    pub circles: Vec<CircleInfo>,
}

impl IcrTroubleshootingInfo {
    /// True if every circle the identity belongs to matches its definition.
    pub fn is_consistent(&self) -> bool {
        self.circles.iter().all(|c| {
            !c.analysis.is_circle_member
                || (c.analysis.permission_keys_are_valid
                    && c.analysis
                        .drive_grant_analysis
                        .iter()
                        .all(|d| d.drive_grant_is_valid))
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircleInfo {
    pub circle_definition_id: CircleId,
    pub circle_definition_name: String,
    pub circle_definition_drive_grant_count: usize,
    pub analysis: CircleAnalysis,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircleAnalysis {
    pub is_circle_member: bool,
    pub summary: String,
    pub permission_keys_are_valid: bool,
    pub expected_permission_keys: PermissionSet,
    pub actual_permission_keys: PermissionSet,
    pub drive_grant_analysis: Vec<DriveGrantInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriveGrantInfo {
    pub drive_name: String,
    pub target_drive: TargetDrive,
    pub drive_is_granted: bool,
    pub drive_permission_is_valid: bool,
    pub has_valid_encryption_key: bool,
    pub drive_grant_is_valid: bool,
    pub expected_drive_permission: DrivePermission,
    pub actual_drive_permission: DrivePermission,
    pub encrypted_key_length: usize,
}

/// Compare one circle definition with the grant a member holds for it.
///
/// `drives` pairs each of the definition's drive grant requests with the
/// drive it names, if that drive still exists.
pub fn analyze_circle(
    definition: &CircleDefinition,
    circle_grant: Option<&CircleGrant>,
    drives: &[(DriveGrantRequest, Option<StorageDrive>)],
) -> CircleInfo {
    let is_circle_member = circle_grant.is_some();
    let actual_permission_keys = circle_grant
        .map(|g| g.permission_set.clone())
        .unwrap_or_default();

    let mut drive_grant_analysis = Vec::new();
    if let Some(grant) = circle_grant {
        for (expected, drive) in drives {
            drive_grant_analysis.push(analyze_drive(grant, expected, drive.as_ref()));
        }
    }

    CircleInfo {
        circle_definition_id: definition.id,
        circle_definition_name: definition.name.clone(),
        circle_definition_drive_grant_count: definition.drive_grants.len(),
        analysis: CircleAnalysis {
            is_circle_member,
            summary: if is_circle_member {
                "Identity is in this circle".to_string()
            } else {
                "Identity is not a member of this circle".to_string()
            },
            permission_keys_are_valid: definition.permissions == actual_permission_keys,
            expected_permission_keys: definition.permissions.clone(),
            actual_permission_keys,
            drive_grant_analysis,
        },
    }
}

fn analyze_drive(
    grant: &CircleGrant,
    expected: &DriveGrantRequest,
    drive: Option<&StorageDrive>,
) -> DriveGrantInfo {
    let expected_pd = expected.permissioned_drive;
    let granted = grant
        .key_store_key_encrypted_drive_grants
        .iter()
        .find(|dg| dg.permissioned_drive == expected_pd);

    let drive_is_granted = granted.is_some();
    let encrypted_key_length = granted
        .and_then(|dg| dg.key_store_key_encrypted_storage_key.as_ref())
        .map_or(0, |k| k.len());
    let actual_drive_permission = granted
        .map(|dg| dg.permissioned_drive.permission)
        .unwrap_or(DrivePermission::NONE);

    let drive_permission_is_valid = expected_pd.permission == actual_drive_permission;
    // Write without read needs no storage key.
    let has_valid_encryption_key = !expected_pd.permission.has_read() || encrypted_key_length > 0;

    DriveGrantInfo {
        drive_name: drive.map(|d| d.name.clone()).unwrap_or_default(),
        target_drive: drive.map_or(expected_pd.drive, |d| d.target),
        drive_is_granted,
        drive_permission_is_valid,
        has_valid_encryption_key,
        drive_grant_is_valid: drive_is_granted
            && drive_permission_is_valid
            && has_valid_encryption_key,
        expected_drive_permission: expected_pd.permission,
        actual_drive_permission,
        encrypted_key_length,
    }
}
