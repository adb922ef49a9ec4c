//! Strong type definitions for circlenet.
//!
//! Circle ids, app ids and drive ids are all 128-bit UUIDs underneath, but each
//! gets its own newtype so a circle id can never be passed where an app id is
//! expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::validation::validate_domain;

/// Domain name of an identity, always stored lower-cased.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OdinId(String);

impl OdinId {
    /// Parse and normalize a domain name.
    pub fn new(domain: impl AsRef<str>) -> Result<Self> {
        let normalized = domain.as_ref().trim().to_ascii_lowercase();
        validate_domain(&normalized)?;
        Ok(Self(normalized))
    }

    /// The ASCII domain.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable table key for this identity.
    pub fn key(&self) -> IdentityKey {
        IdentityKey::derive(&self.0)
    }
}

impl fmt::Debug for OdinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OdinId({})", self.0)
    }
}

impl fmt::Display for OdinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OdinId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for OdinId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<OdinId> for String {
    fn from(id: OdinId) -> Self {
        id.0
    }
}

impl AsRef<str> for OdinId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A 32-byte hash of an identity's domain, used as a table key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey(pub [u8; 32]);

impl IdentityKey {
    fn derive(domain: &str) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key("circlenet-v0-identity-key");
        hasher.update(domain.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey({})", &self.to_hex()[..16])
    }
}

impl TryFrom<&[u8]> for IdentityKey {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> std::result::Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Get the raw bytes.
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// Derive a stable id from a name.
            pub fn derive(name: &str) -> Self {
                Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0.simple())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> std::result::Result<Self, Self::Error> {
                let arr: [u8; 16] = slice.try_into()?;
                Ok(Self::from_bytes(arr))
            }
        }
    };
}

uuid_id!(
    /// Identifier of a circle definition.
    CircleId
);

uuid_id!(
    /// Identifier of a registered app.
    AppId
);

uuid_id!(
    /// Identifier of a storage drive.
    DriveId
);

/// Stable, owner-independent address of a drive: alias plus type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetDrive {
    pub alias: Uuid,
    pub drive_type: Uuid,
}

impl TargetDrive {
    pub const fn new(alias: Uuid, drive_type: Uuid) -> Self {
        Self { alias, drive_type }
    }
}

impl fmt::Display for TargetDrive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.alias.simple(), self.drive_type.simple())
    }
}

/// Lifecycle state of a connection.
///
/// `None` is never persisted; the absence of a row is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum ConnectionStatus {
    #[default]
    None = 0,
    Connected = 1,
    Blocked = 2,
}

impl ConnectionStatus {
    pub const fn to_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Connected),
            2 => Ok(Self::Blocked),
            other => Err(CoreError::UnknownConnectionStatus(other)),
        }
    }
}

/// How a connection request came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionRequestOrigin {
    /// The owner sent or accepted the request themselves.
    #[default]
    IdentityOwner,
    /// A third identity introduced the two parties.
    Introduction,
}

/// Kind of domain that can be a circle member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DomainType {
    #[default]
    Identity,
    YouAuth,
}

/// Current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
