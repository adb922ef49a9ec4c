//! # Circlenet Testkit
//!
//! Testing utilities for circlenet.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a tenant with an owner session, in-memory collaborators,
//!   system circles and drives, and helpers to connect identities
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use circlenet_testkit::fixtures::{identity, TenantFixture};
//!
//! async fn example() {
//!     let tenant = TenantFixture::new();
//!     let peer = tenant.connect(&identity(1), &[]).await.unwrap();
//!     assert!(tenant
//!         .network
//!         .is_connected(&tenant.owner, &peer.odin_id)
//!         .await
//!         .unwrap());
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use circlenet_testkit::generators::odin_id;
//!
//! proptest! {
//!     #[test]
//!     fn identity_keys_are_stable(id in odin_id()) {
//!         prop_assert_eq!(id.key(), id.key());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{identities, identity, ConnectedPeer, TenantFixture, TestDrive};
