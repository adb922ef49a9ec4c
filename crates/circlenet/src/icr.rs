//! The identity connection registration (ICR): one tenant's record of its
//! relationship with one remote identity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use circlenet_core::{
    system_circles, CircleId, ConnectionRequestOrigin, ConnectionStatus, OdinId,
};
use circlenet_keys::{
    AccessExchangeGrant, EccEncryptedPayload, EncryptedClientAccessToken,
    RedactedAccessExchangeGrant,
};

/// What the remote identity told us about itself when connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRequestData {
    pub name: Option<String>,
    pub image_id: Option<Uuid>,
}

/// How the owner's copy of a new connection's client access token arrives.
#[derive(Debug, Clone)]
pub enum ConnectionKeys {
    /// The owner was present: token already under the ICR key, and the
    /// grant's key-store key already under the master key.
    Strong {
        encrypted_cat: EncryptedClientAccessToken,
    },
    /// No owner session: token and key-store key addressed to the owner's
    /// ECC key until an owner session upgrades them.
    Weak {
        temporary_weak_client_access_token: EccEncryptedPayload,
        temp_weak_key_store_key: EccEncryptedPayload,
    },
}

/// Everything needed to record a newly established connection.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub odin_id: OdinId,
    pub access_grant: AccessExchangeGrant,
    pub keys: ConnectionKeys,
    pub contact_data: ContactRequestData,
    pub origin: ConnectionRequestOrigin,
    pub introducer: Option<OdinId>,
    pub verification_hash: Option<Vec<u8>>,
}

/// The aggregate root for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConnectionRegistration {
    pub odin_id: OdinId,
    pub status: ConnectionStatus,
    pub access_grant: Option<AccessExchangeGrant>,
    pub encrypted_client_access_token: Option<EncryptedClientAccessToken>,
    /// Present only until the token encryption is upgraded.
    pub temporary_weak_client_access_token: Option<EccEncryptedPayload>,
    /// Present only until the key-store key encryption is upgraded.
    pub temp_weak_key_store_key: Option<EccEncryptedPayload>,
    pub original_contact_data: ContactRequestData,
    pub connection_request_origin: ConnectionRequestOrigin,
    pub introducer_odin_id: Option<OdinId>,
    pub verification_hash: Option<Vec<u8>>,
    pub created: i64,
    pub last_updated: i64,
}

impl IdentityConnectionRegistration {
    /// The registration of an identity we have no row for.
    pub fn none(odin_id: OdinId) -> Self {
        Self {
            odin_id,
            status: ConnectionStatus::None,
            access_grant: None,
            encrypted_client_access_token: None,
            temporary_weak_client_access_token: None,
            temp_weak_key_store_key: None,
            original_contact_data: ContactRequestData::default(),
            connection_request_origin: ConnectionRequestOrigin::default(),
            introducer_odin_id: None,
            verification_hash: None,
            created: 0,
            last_updated: -1,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn is_blocked(&self) -> bool {
        self.status == ConnectionStatus::Blocked
    }

    /// True if the access grant exists and neither it nor its registration
    /// is revoked.
    pub fn has_valid_access_grant(&self) -> bool {
        self.access_grant
            .as_ref()
            .is_some_and(AccessExchangeGrant::is_valid)
    }

    /// Circles this identity holds a grant for.
    pub fn circle_ids(&self) -> Vec<CircleId> {
        self.access_grant
            .as_ref()
            .map(|g| g.circle_grants.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_circle(&self, circle_id: CircleId) -> bool {
        self.access_grant
            .as_ref()
            .is_some_and(|g| g.has_circle(circle_id))
    }

    /// An introduced connection not yet confirmed by the owner: its only
    /// circle is the auto-connections system circle.
    pub fn is_unconfirmed_auto_connection(&self) -> bool {
        let ids = self.circle_ids();
        ids.len() == 1 && ids[0] == system_circles::AUTO_CONNECTIONS
    }

    pub fn redacted(&self) -> RedactedIdentityConnectionRegistration {
        RedactedIdentityConnectionRegistration {
            odin_id: self.odin_id.clone(),
            status: self.status,
            created: self.created,
            last_updated: self.last_updated,
            original_contact_data: self.original_contact_data.clone(),
            access_grant: self.access_grant.as_ref().map(AccessExchangeGrant::redacted),
            connection_request_origin: self.connection_request_origin,
            introducer_odin_id: self.introducer_odin_id.clone(),
        }
    }
}

/// An ICR with all key material removed, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedIdentityConnectionRegistration {
    pub odin_id: OdinId,
    pub status: ConnectionStatus,
    pub created: i64,
    pub last_updated: i64,
    pub original_contact_data: ContactRequestData,
    pub access_grant: Option<RedactedAccessExchangeGrant>,
    pub connection_request_origin: ConnectionRequestOrigin,
    pub introducer_odin_id: Option<OdinId>,
}
