//! Explicit caller context passed to every network operation.
//!
//! Nothing is resolved from ambient state: whoever calls the service says
//! who the caller is, what it may do and whether the owner's secrets are
//! unlocked for this request.

use std::sync::Arc;

use circlenet_core::{CircleId, OdinId, PermissionKey, PermissionSet};
use circlenet_keys::{SecretKey, X25519StaticSecret};

use crate::error::{NetworkError, Result};

/// How much the tenant trusts the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    Anonymous,
    Authenticated,
    Connected,
    /// The tenant acting on its own behalf without an owner session,
    /// e.g. while processing an inbound connection request.
    System,
    Owner,
}

/// Secrets only present during an owner session.
#[derive(Debug)]
pub struct OwnerSecrets {
    pub master_key: SecretKey,
    pub icr_key: SecretKey,
    /// Opens temporary ECC-encrypted token and key-store key material.
    pub ecc_key: X25519StaticSecret,
}

/// Who is calling, and with which capabilities.
#[derive(Debug, Clone)]
pub struct CallerContext {
    odin_id: Option<OdinId>,
    security_level: SecurityLevel,
    permissions: PermissionSet,
    circle_ids: Vec<CircleId>,
    owner_secrets: Option<Arc<OwnerSecrets>>,
}

impl CallerContext {
    /// An owner session with its secrets unlocked.
    pub fn owner(secrets: OwnerSecrets) -> Self {
        Self {
            odin_id: None,
            security_level: SecurityLevel::Owner,
            permissions: PermissionSet::empty(),
            circle_ids: Vec::new(),
            owner_secrets: Some(Arc::new(secrets)),
        }
    }

    /// The tenant's own background processing: full permissions, no secrets.
    pub fn system() -> Self {
        Self {
            odin_id: None,
            security_level: SecurityLevel::System,
            permissions: PermissionSet::empty(),
            circle_ids: Vec::new(),
            owner_secrets: None,
        }
    }

    /// A local app holding the given permission keys.
    pub fn app(permissions: PermissionSet) -> Self {
        Self {
            odin_id: None,
            security_level: SecurityLevel::Authenticated,
            permissions,
            circle_ids: Vec::new(),
            owner_secrets: None,
        }
    }

    /// A remote identity calling through transit.
    pub fn remote(
        odin_id: OdinId,
        security_level: SecurityLevel,
        permissions: PermissionSet,
        circle_ids: Vec<CircleId>,
    ) -> Self {
        Self {
            odin_id: Some(odin_id),
            security_level,
            permissions,
            circle_ids,
            owner_secrets: None,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            odin_id: None,
            security_level: SecurityLevel::Anonymous,
            permissions: PermissionSet::empty(),
            circle_ids: Vec::new(),
            owner_secrets: None,
        }
    }

    pub fn odin_id(&self) -> Option<&OdinId> {
        self.odin_id.as_ref()
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    pub fn circle_ids(&self) -> &[CircleId] {
        &self.circle_ids
    }

    pub fn is_owner(&self) -> bool {
        self.security_level == SecurityLevel::Owner
    }

    /// Owner and system callers hold every permission key.
    pub fn has_permission(&self, key: PermissionKey) -> bool {
        matches!(
            self.security_level,
            SecurityLevel::Owner | SecurityLevel::System
        ) || self.permissions.has_key(key)
    }

    pub fn assert_has_permission(&self, key: PermissionKey) -> Result<()> {
        if self.has_permission(key) {
            Ok(())
        } else {
            Err(NetworkError::security(format!(
                "caller lacks permission {:?}",
                key
            )))
        }
    }

    pub fn assert_can_manage_connections(&self) -> Result<()> {
        self.assert_has_permission(PermissionKey::ManageConnections)
    }

    pub fn has_master_key(&self) -> bool {
        self.owner_secrets.is_some()
    }

    /// The owner's secrets, or a security error if this is not an
    /// unlocked owner session.
    pub fn owner_secrets(&self) -> Result<&OwnerSecrets> {
        self.owner_secrets
            .as_deref()
            .ok_or_else(|| NetworkError::security("master key required"))
    }

    pub fn master_key(&self) -> Result<&SecretKey> {
        Ok(&self.owner_secrets()?.master_key)
    }

    /// Secrets if present, without failing.
    pub(crate) fn try_owner_secrets(&self) -> Option<&OwnerSecrets> {
        self.owner_secrets.as_deref()
    }
}
