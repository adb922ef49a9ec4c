//! # circlenet store
//!
//! Storage abstraction for a tenant's connections. Provides a trait-based
//! interface with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`ConnectionStore`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`ConnectionWrite`] - One connection plus its circle and app grant rows
//!
//! ## Usage
//!
//! ```rust,no_run
//! use circlenet_store::{ConnectionStore, SqliteStore};
//! use circlenet_core::ConnectionStatus;
//!
//! async fn example() {
//!     let store = SqliteStore::open("network.db").unwrap();
//!
//!     let page = store
//!         .list_connections(ConnectionStatus::Connected, 50, None)
//!         .await
//!         .unwrap();
//!     for record in page.records {
//!         println!("{}", record.odin_id);
//!     }
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Atomic saves**: a connection row and its side rows commit together
//! - **Full replace**: saving a connection replaces all of its side rows
//! - **No `None` rows**: a connection in state `None` is deleted, never stored

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    AppGrantRecord, CircleMemberRecord, ConnectionCursor, ConnectionPage, ConnectionRecord,
    ConnectionStore, ConnectionWrite,
};
