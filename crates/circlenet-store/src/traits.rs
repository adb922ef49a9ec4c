//! ConnectionStore trait: the abstract interface for connection persistence.
//!
//! Three tables back a tenant's network:
//!
//! - `connections`: one row per remote identity that is not `None`
//! - `circle_members`: `(circle, member)` rows carrying the member's
//!   serialized circle grant
//! - `app_grants`: `(member, app, circle)` rows carrying serialized app
//!   circle grants
//!
//! Payloads are opaque bytes at this layer.

use async_trait::async_trait;

use circlenet_core::{AppId, CircleId, ConnectionStatus, DomainType, IdentityKey};

use crate::error::{Result, StoreError};

/// A row of the `connections` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub identity: IdentityKey,
    pub odin_id: String,
    pub display_name: String,
    pub status: ConnectionStatus,
    pub access_is_revoked: bool,
    pub data: Vec<u8>,
    pub created: i64,
    pub modified: i64,
}

/// A row of the `circle_members` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircleMemberRecord {
    pub circle_id: CircleId,
    pub member: IdentityKey,
    pub domain: String,
    pub domain_type: DomainType,
    pub data: Vec<u8>,
}

/// A row of the `app_grants` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppGrantRecord {
    pub member: IdentityKey,
    pub app_id: AppId,
    pub circle_id: CircleId,
    pub data: Vec<u8>,
}

/// Everything written for one connection in a single commit.
///
/// The member's circle rows and app grant rows are replaced wholesale:
/// rows not listed here are deleted.
#[derive(Debug, Clone)]
pub struct ConnectionWrite {
    pub record: ConnectionRecord,
    pub circle_members: Vec<CircleMemberRecord>,
    pub app_grants: Vec<AppGrantRecord>,
}

/// Position in a `created DESC` listing of connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionCursor {
    pub created: i64,
    pub identity: IdentityKey,
}

/// One page of connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPage {
    pub records: Vec<ConnectionRecord>,
    /// `None` when this was the last page.
    pub next_cursor: Option<ConnectionCursor>,
}

/// Async interface for connection persistence.
///
/// Every write that touches more than one table is atomic.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_connection(&self, identity: &IdentityKey) -> Result<Option<ConnectionRecord>>;

    /// Upsert the connection row and replace its circle member and app grant
    /// rows, all in one transaction.
    async fn save_connection(&self, write: ConnectionWrite) -> Result<()>;

    /// Delete the connection row plus its circle member and app grant rows.
    ///
    /// Returns true if a connection row existed.
    async fn delete_connection(&self, identity: &IdentityKey) -> Result<bool>;

    /// List connections with the given status, newest first.
    async fn list_connections(
        &self,
        status: ConnectionStatus,
        count: usize,
        cursor: Option<ConnectionCursor>,
    ) -> Result<ConnectionPage>;

    // ─────────────────────────────────────────────────────────────────────────
    // Circle membership
    // ─────────────────────────────────────────────────────────────────────────

    /// All members of a circle, in member key order.
    async fn get_circle_members(&self, circle_id: CircleId) -> Result<Vec<CircleMemberRecord>>;

    /// All circles a member belongs to.
    async fn get_member_circles(&self, member: &IdentityKey) -> Result<Vec<CircleMemberRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // App grants
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_app_grants(&self, member: &IdentityKey) -> Result<Vec<AppGrantRecord>>;
}

pub(crate) fn domain_type_to_i32(domain_type: DomainType) -> i32 {
    match domain_type {
        DomainType::Identity => 1,
        DomainType::YouAuth => 2,
    }
}

pub(crate) fn domain_type_from_i32(value: i32) -> Option<DomainType> {
    match value {
        1 => Some(DomainType::Identity),
        2 => Some(DomainType::YouAuth),
        _ => None,
    }
}

/// Side rows in a write must all belong to the connection being written.
pub(crate) fn check_write(write: &ConnectionWrite) -> Result<()> {
    let identity = write.record.identity;
    if write.record.status == ConnectionStatus::None {
        return Err(StoreError::InvalidData(
            "a connection with status None is never persisted".into(),
        ));
    }
    if write.circle_members.iter().any(|m| m.member != identity)
        || write.app_grants.iter().any(|g| g.member != identity)
    {
        return Err(StoreError::InvalidData(format!(
            "side rows do not belong to {:?}",
            identity
        )));
    }
    Ok(())
}
