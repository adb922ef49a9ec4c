//! # circlenet keys
//!
//! Key material and encrypted grants for circle-based connections.
//!
//! ## Key Hierarchy
//!
//! ```text
//! MasterKey (owner secret)
//!   └─ KeyStoreKey (per connection)
//!         ├─ drive StorageKey (inside each DriveGrant)
//!         └─ IcrKey
//!               └─ ClientAccessToken
//! ```
//!
//! Only the key-store key is ever wrapped directly under the master key.
//! Every unwrapped key is a [`SecretKey`], which zeroizes on drop.
//!
//! ## Temporary ECC channel
//!
//! A connection accepted without the master key carries its token and
//! key-store key as [`EccEncryptedPayload`]s addressed to the owner's
//! X25519 key until an owner session upgrades them.

pub mod crypto;
pub mod ecc;
pub mod envelope;
pub mod error;
pub mod grant;
pub mod token;

pub use crypto::{
    EncryptionNonce, EphemeralKeyPair, SecretKey, SharedKey, SymmetricKeyEncrypted,
    X25519PublicKey, X25519StaticSecret,
};
pub use ecc::EccEncryptedPayload;
pub use envelope::{EncryptionFormat, SymmetricEncrypted};
pub use error::{KeysError, Result};
pub use grant::{
    AccessExchangeGrant, AppCircleGrant, CircleGrant, DriveGrant, ExchangeGrant,
    RedactedAccessExchangeGrant, RedactedAppCircleGrant, RedactedCircleGrant, RedactedDriveGrant,
    RedactedExchangeGrant,
};
pub use token::{
    AccessRegistration, ClientAccessToken, ClientAuthenticationToken, EncryptedClientAccessToken,
};
