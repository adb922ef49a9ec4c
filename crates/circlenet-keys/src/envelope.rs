//! Symmetric encrypted data envelope.
//!
//! Wraps arbitrary bytes (serialized tokens, for instance) under a
//! [`SecretKey`] with the metadata needed to open them again.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{EncryptionNonce, SecretKey};
use crate::error::Result;

/// Format identifier for encrypted data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncryptionFormat {
    /// ChaCha20-Poly1305 with 256-bit key.
    ChaCha20Poly1305 = 1,
}

/// Ciphertext plus the nonce and format used to produce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymmetricEncrypted {
    pub format: EncryptionFormat,
    pub nonce: EncryptionNonce,
    /// Includes the authentication tag.
    pub ciphertext: Vec<u8>,
}

impl SymmetricEncrypted {
    /// Encrypt plaintext with the given key.
    pub fn encrypt(plaintext: &[u8], key: &SecretKey) -> Result<Self> {
        let nonce = EncryptionNonce::generate();
        let ciphertext = key.encrypt(plaintext, &nonce)?;

        Ok(Self {
            format: EncryptionFormat::ChaCha20Poly1305,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt with the given key. The plaintext zeroizes on drop.
    pub fn decrypt(&self, key: &SecretKey) -> Result<Zeroizing<Vec<u8>>> {
        match self.format {
            EncryptionFormat::ChaCha20Poly1305 => {
                Ok(Zeroizing::new(key.decrypt(&self.ciphertext, &self.nonce)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = SecretKey::generate();
        let envelope = SymmetricEncrypted::encrypt(b"hello, encrypted world!", &key).unwrap();
        let decrypted = envelope.decrypt(&key).unwrap();
        assert_eq!(decrypted.as_slice(), b"hello, encrypted world!");
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = SymmetricEncrypted::encrypt(b"secret", &SecretKey::generate()).unwrap();
        assert!(envelope.decrypt(&SecretKey::generate()).is_err());
    }
}
