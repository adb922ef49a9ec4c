//! Validation rules for identity names and circle definitions.

use std::collections::HashSet;

use crate::circle::CircleDefinition;
use crate::error::{CoreError, Result};
use crate::permissions::DriveGrantRequest;

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;
const MAX_CIRCLE_NAME_LEN: usize = 80;

/// Validate an already lower-cased domain name.
///
/// Requires at least two labels of `[a-z0-9-]`, none starting or ending
/// with a hyphen.
pub fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return Err(CoreError::InvalidOdinId(format!(
            "length {} outside 1..={}",
            domain.len(),
            MAX_DOMAIN_LEN
        )));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(CoreError::InvalidOdinId(format!(
            "{domain} needs at least two labels"
        )));
    }

    for label in labels {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(CoreError::InvalidOdinId(format!("bad label in {domain}")));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(CoreError::InvalidOdinId(format!(
                "label may not start or end with '-' in {domain}"
            )));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(CoreError::InvalidOdinId(format!(
                "invalid character in {domain}"
            )));
        }
    }

    Ok(())
}

/// Validate the drive grants of a circle or app.
///
/// A drive may only appear once, and a grant with no permission bits is
/// meaningless.
pub fn validate_drive_grants(grants: &[DriveGrantRequest]) -> Result<()> {
    let mut seen = HashSet::new();
    for grant in grants {
        let pd = &grant.permissioned_drive;
        if pd.permission.is_none() {
            return Err(CoreError::InvalidDriveGrant(format!(
                "drive {} granted with no permission",
                pd.drive
            )));
        }
        if !seen.insert(pd.drive) {
            return Err(CoreError::InvalidDriveGrant(format!(
                "drive {} granted more than once",
                pd.drive
            )));
        }
    }
    Ok(())
}

/// Validate a circle definition before it is stored or propagated.
pub fn validate_circle_definition(def: &CircleDefinition) -> Result<()> {
    let name = def.name.trim();
    if name.is_empty() {
        return Err(CoreError::InvalidCircleDefinition("name is required".into()));
    }
    if name.len() > MAX_CIRCLE_NAME_LEN {
        return Err(CoreError::InvalidCircleDefinition(format!(
            "name longer than {MAX_CIRCLE_NAME_LEN}"
        )));
    }
    validate_drive_grants(&def.drive_grants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::DrivePermission;
    use crate::types::{CircleId, TargetDrive};
    use uuid::Uuid;

    fn drive(n: u128) -> TargetDrive {
        TargetDrive::new(Uuid::from_u128(n), Uuid::from_u128(n + 1))
    }

    #[test]
    fn test_valid_domains() {
        assert!(validate_domain("frodo.dotyou.cloud").is_ok());
        assert!(validate_domain("a-b.c0").is_ok());
    }

    #[test]
    fn test_invalid_domains() {
        assert!(validate_domain("localhost").is_err());
        assert!(validate_domain("a..b").is_err());
        assert!(validate_domain("a-.b").is_err());
        assert!(validate_domain("UPPER.case").is_err());
    }

    #[test]
    fn test_duplicate_drive_grant_rejected() {
        let grants = vec![
            DriveGrantRequest::new(drive(1), DrivePermission::READ),
            DriveGrantRequest::new(drive(1), DrivePermission::WRITE),
        ];
        assert!(validate_drive_grants(&grants).is_err());
    }

    #[test]
    fn test_empty_permission_rejected() {
        let grants = vec![DriveGrantRequest::new(drive(1), DrivePermission::NONE)];
        assert!(validate_drive_grants(&grants).is_err());
    }

    #[test]
    fn test_circle_definition_requires_name() {
        let def = CircleDefinition::new(CircleId::generate(), "   ");
        assert!(validate_circle_definition(&def).is_err());

        let def = CircleDefinition::new(CircleId::generate(), "friends")
            .with_drive_grants([DriveGrantRequest::new(drive(3), DrivePermission::READ)]);
        assert!(validate_circle_definition(&def).is_ok());
    }
}
