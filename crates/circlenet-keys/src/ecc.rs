//! Temporary ECC-encrypted material.
//!
//! When a connection is accepted by a caller that does not hold the master
//! key, the client access token and key-store key cannot be wrapped under
//! the ICR key or master key. They are instead encrypted to the owner's
//! X25519 public key and upgraded later by an owner session.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{
    EncryptionNonce, EphemeralKeyPair, SecretKey, X25519PublicKey, X25519StaticSecret,
};
use crate::error::{KeysError, Result};

/// Bytes encrypted to an X25519 public key with an ephemeral sender key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EccEncryptedPayload {
    /// Recipient the payload was encrypted for.
    pub recipient_public: X25519PublicKey,

    /// Ephemeral X25519 public key (sender's side of ECDH).
    pub ephemeral_public: X25519PublicKey,

    pub nonce: EncryptionNonce,

    pub ciphertext: Vec<u8>,
}

impl EccEncryptedPayload {
    /// Encrypt `plaintext` so only the holder of `recipient_public`'s secret
    /// can read it.
    pub fn encrypt(plaintext: &[u8], recipient_public: &X25519PublicKey) -> Result<Self> {
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();

        let shared = ephemeral.diffie_hellman(recipient_public);
        let wrap_key = shared.derive_encryption_key(&context(recipient_public, &ephemeral_public));

        let nonce = EncryptionNonce::generate();
        let ciphertext = wrap_key.encrypt(plaintext, &nonce)?;

        Ok(Self {
            recipient_public: *recipient_public,
            ephemeral_public,
            nonce,
            ciphertext,
        })
    }

    /// Encrypt a symmetric key.
    pub fn encrypt_key(key: &SecretKey, recipient_public: &X25519PublicKey) -> Result<Self> {
        Self::encrypt(key.as_bytes(), recipient_public)
    }

    /// Decrypt using the recipient's secret.
    pub fn decrypt(&self, recipient_secret: &X25519StaticSecret) -> Result<Zeroizing<Vec<u8>>> {
        if recipient_secret.public_key() != self.recipient_public {
            return Err(KeysError::DecryptionError(
                "payload was encrypted for a different key".into(),
            ));
        }

        let shared = recipient_secret.diffie_hellman(&self.ephemeral_public);
        let wrap_key =
            shared.derive_encryption_key(&context(&self.recipient_public, &self.ephemeral_public));

        Ok(Zeroizing::new(wrap_key.decrypt(&self.ciphertext, &self.nonce)?))
    }

    /// Decrypt a symmetric key produced by [`EccEncryptedPayload::encrypt_key`].
    pub fn decrypt_key(&self, recipient_secret: &X25519StaticSecret) -> Result<SecretKey> {
        let bytes = self.decrypt(recipient_secret)?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            KeysError::DecryptionError(format!(
                "invalid key length: expected 32, got {}",
                bytes.len()
            ))
        })?;
        Ok(SecretKey::from_bytes(arr))
    }
}

fn context(recipient: &X25519PublicKey, ephemeral: &X25519PublicKey) -> [u8; 64] {
    let mut ctx = [0u8; 64];
    ctx[..32].copy_from_slice(recipient.as_bytes());
    ctx[32..].copy_from_slice(ephemeral.as_bytes());
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecc_key_roundtrip() {
        let owner = X25519StaticSecret::generate();
        let ksk = SecretKey::generate();

        let payload = EccEncryptedPayload::encrypt_key(&ksk, &owner.public_key()).unwrap();
        let recovered = payload.decrypt_key(&owner).unwrap();

        assert!(ksk.ct_eq(&recovered));
    }

    #[test]
    fn test_ecc_wrong_recipient_fails() {
        let owner = X25519StaticSecret::generate();
        let someone_else = X25519StaticSecret::generate();

        let payload = EccEncryptedPayload::encrypt(b"token", &owner.public_key()).unwrap();
        assert!(payload.decrypt(&someone_else).is_err());
    }

    #[test]
    fn test_ecc_tampered_ciphertext_fails() {
        let owner = X25519StaticSecret::generate();
        let mut payload = EccEncryptedPayload::encrypt(b"token", &owner.public_key()).unwrap();
        payload.ciphertext[0] ^= 0xff;
        assert!(payload.decrypt(&owner).is_err());
    }
}
