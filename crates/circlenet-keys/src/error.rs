//! Error types for key handling.

use thiserror::Error;

/// Errors that can occur while wrapping, unwrapping or validating keys.
///
/// Messages never include key bytes.
#[derive(Debug, Error)]
pub enum KeysError {
    /// Encryption error.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Decryption error (wrong key or tampered ciphertext).
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// A remote caller presented a key that does not open its registration.
    #[error("invalid remote key")]
    InvalidRemoteKey,

    /// Access registration has been revoked.
    #[error("access registration revoked")]
    Revoked,

    /// A grant violates the key hierarchy.
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Core error.
    #[error("core error: {0}")]
    CoreError(#[from] circlenet_core::CoreError),
}

/// Result type for key operations.
pub type Result<T> = std::result::Result<T, KeysError>;
