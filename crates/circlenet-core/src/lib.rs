//! # Circlenet Core
//!
//! Pure vocabulary shared by every circlenet crate: identity names, circle and
//! drive identifiers, permission sets and circle definitions.
//!
//! This crate contains no I/O and no key material. Everything here is plain
//! data plus the validation rules that guard it.
//!
//! ## Key Types
//!
//! - [`OdinId`] - Domain name of a remote identity
//! - [`CircleId`] / [`AppId`] / [`DriveId`] - Typed 128-bit identifiers
//! - [`PermissionSet`] - Capability keys granted to a caller
//! - [`DrivePermission`] - Read/write bitmask for a drive
//! - [`CircleDefinition`] - A named, reusable bundle of drive grants and keys

pub mod circle;
pub mod error;
pub mod permissions;
pub mod types;
pub mod validation;

pub use circle::{system_circles, system_drives, CircleDefinition};
pub use error::{CoreError, Result};
pub use permissions::{
    DriveGrantRequest, DrivePermission, PermissionKey, PermissionSet, PermissionSetGrantRequest,
    PermissionedDrive,
};
pub use types::{
    now_millis, AppId, CircleId, ConnectionRequestOrigin, ConnectionStatus, DomainType, DriveId,
    IdentityKey, OdinId, TargetDrive,
};
pub use validation::{validate_circle_definition, validate_drive_grants};
