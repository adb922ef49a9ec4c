//! Interfaces to the services the circle network consumes but does not own.
//!
//! Circle definitions, the drive directory and app registrations live
//! elsewhere in the tenant. Their failures surface as
//! [`NetworkError::Collaborator`](crate::NetworkError::Collaborator).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use circlenet_core::{
    AppId, CircleDefinition, CircleId, DriveId, OdinId, PermissionSetGrantRequest, TargetDrive,
};
use circlenet_keys::SymmetricKeyEncrypted;

// ─────────────────────────────────────────────────────────────────────────────
// Circle definitions
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait CircleDefinitions: Send + Sync {
    async fn get_circle(&self, id: CircleId) -> anyhow::Result<Option<CircleDefinition>>;

    async fn list_circles(&self, include_system: bool) -> anyhow::Result<Vec<CircleDefinition>>;

    async fn update_circle(&self, definition: &CircleDefinition) -> anyhow::Result<()>;

    async fn delete_circle(&self, id: CircleId) -> anyhow::Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Drives
// ─────────────────────────────────────────────────────────────────────────────

/// Drive metadata as seen by the circle network. File contents are not
/// reachable from here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDrive {
    pub id: DriveId,
    pub name: String,
    pub target: TargetDrive,
    pub allow_anonymous_reads: bool,
    pub master_key_encrypted_storage_key: SymmetricKeyEncrypted,
}

#[async_trait]
pub trait DriveDirectory: Send + Sync {
    async fn get_drive(&self, target: &TargetDrive) -> anyhow::Result<Option<StorageDrive>>;

    async fn list_drives(&self) -> anyhow::Result<Vec<StorageDrive>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Apps
// ─────────────────────────────────────────────────────────────────────────────

/// The parts of an app registration that affect connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedAppRegistration {
    pub app_id: AppId,
    pub name: String,
    pub is_revoked: bool,
    /// Members of these circles receive `circle_member_permission_grant`.
    pub authorized_circles: Vec<CircleId>,
    pub circle_member_permission_grant: PermissionSetGrantRequest,
}

impl RedactedAppRegistration {
    /// Revoked apps authorize nothing.
    pub fn authorizes(&self, circle_id: CircleId) -> bool {
        !self.is_revoked && self.authorized_circles.contains(&circle_id)
    }
}

#[async_trait]
pub trait AppRegistry: Send + Sync {
    /// Registered apps. Implementations may include revoked apps; callers
    /// go through [`RedactedAppRegistration::authorizes`].
    async fn registered_apps(&self) -> anyhow::Result<Vec<RedactedAppRegistration>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Finalized { odin_id: OdinId },
    Blocked { odin_id: OdinId },
    Unblocked { odin_id: OdinId },
    Deleted { odin_id: OdinId },
}

/// Sink for connection lifecycle notifications. Delivery is best effort.
#[async_trait]
pub trait ConnectionEvents: Send + Sync {
    async fn publish(&self, event: ConnectionEvent);
}

/// Everything the network service consumes from the rest of the tenant.
#[derive(Clone)]
pub struct Collaborators {
    pub circles: Arc<dyn CircleDefinitions>,
    pub drives: Arc<dyn DriveDirectory>,
    pub apps: Arc<dyn AppRegistry>,
    pub events: Arc<dyn ConnectionEvents>,
}
