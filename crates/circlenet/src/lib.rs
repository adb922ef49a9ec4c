//! # Circlenet
//!
//! The circle network engine: one tenant's connections to other identities,
//! the circles those identities belong to, and the permissions they carry
//! when they call back.
//!
//! ## Overview
//!
//! - **Connections**: an identity connection registration (ICR) per remote
//!   identity, moving between no row, `Connected` and `Blocked`
//! - **Circles**: named bundles of drive grants and permission keys,
//!   materialized into each member's grant under that connection's
//!   key-store key
//! - **Apps**: registered apps may extend members of authorized circles
//!   with their own grants
//! - **Permission contexts**: what a remote caller may do for one request,
//!   built from its grants and the token it presented
//!
//! ## Key Concepts
//!
//! - **Key-store key**: per-connection key that wraps drive storage keys.
//!   Held under the master key, and under the token half key given to the
//!   remote identity.
//! - **System circles**: confirmed connections and auto (introduced)
//!   connections. They cannot be deleted.
//! - **Weak keys**: a connection accepted without an owner session keeps its
//!   keys under the owner's ECC key until an owner session upgrades them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use circlenet::memory::{
//!     MemoryAppRegistry, MemoryCircleDefinitions, MemoryDriveDirectory, RecordingEvents,
//! };
//! use circlenet::store::SqliteStore;
//! use circlenet::{CallerContext, CircleNetworkService, Collaborators, NetworkConfig};
//!
//! async fn example(owner: CallerContext, frodo: circlenet::core::OdinId) {
//!     let store = SqliteStore::open("circles.db").unwrap();
//!     let collaborators = Collaborators {
//!         circles: Arc::new(MemoryCircleDefinitions::new()),
//!         drives: Arc::new(MemoryDriveDirectory::new()),
//!         apps: Arc::new(MemoryAppRegistry::new()),
//!         events: Arc::new(RecordingEvents::new()),
//!     };
//!     let network = CircleNetworkService::new(store, collaborators, NetworkConfig::default());
//!
//!     if network.is_connected(&owner, &frodo).await.unwrap() {
//!         network.block(&owner, &frodo).await.unwrap();
//!     }
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `circlenet::core` - Identifiers, permission vocabulary, circle definitions
//! - `circlenet::keys` - Key wrapping, grants and access tokens
//! - `circlenet::store` - Connection storage, SQLite and in-memory

pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod icr;
pub mod locks;
pub mod maintenance;
pub mod membership;
pub mod memory;
pub mod network;
pub mod permission_context;
pub mod storage;
pub mod troubleshooting;
pub mod verification;

// Re-export component crates
pub use circlenet_core as core;
pub use circlenet_keys as keys;
pub use circlenet_store as store;

// Re-export main types for convenience
pub use collaborators::{
    AppRegistry, CircleDefinitions, Collaborators, ConnectionEvent, ConnectionEvents,
    DriveDirectory, RedactedAppRegistration, StorageDrive,
};
pub use config::NetworkConfig;
pub use context::{CallerContext, OwnerSecrets, SecurityLevel};
pub use error::{ClientErrorCode, ErrorKind, NetworkError, Result};
pub use icr::{
    ConnectRequest, ConnectionKeys, ContactRequestData, IdentityConnectionRegistration,
    RedactedIdentityConnectionRegistration,
};
pub use locks::IdentityLocks;
pub use maintenance::SweepReport;
pub use membership::CircleMembershipService;
pub use network::{CircleNetworkService, CircleUpdateReport};
pub use permission_context::{PermissionContext, PermissionGroup};
pub use storage::{CircleDomain, CircleNetworkStorage, IcrPage};
pub use troubleshooting::IcrTroubleshootingInfo;
pub use verification::{create_verification_hash, verification_hashes_match};
