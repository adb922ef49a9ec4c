//! Client access tokens and the access registrations that validate them.
//!
//! A [`ClientAccessToken`] (CAT) is what one identity presents when calling
//! another: a half key that opens the server-side [`AccessRegistration`],
//! plus a shared secret for payload encryption. The owner keeps its copy of
//! a connection's CAT as an [`EncryptedClientAccessToken`] under the ICR key.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use circlenet_core::now_millis;

use crate::crypto::{SecretKey, SymmetricKeyEncrypted};
use crate::envelope::SymmetricEncrypted;
use crate::error::{KeysError, Result};

/// The part of a CAT sent on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAuthenticationToken {
    /// Id of the access registration this token opens.
    pub id: Uuid,
    pub access_token_half_key: SecretKey,
}

/// Token pair used to authenticate as a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAccessToken {
    pub id: Uuid,
    pub access_token_half_key: SecretKey,
    pub shared_secret: SecretKey,
}

impl ClientAccessToken {
    pub fn to_authentication_token(&self) -> ClientAuthenticationToken {
        ClientAuthenticationToken {
            id: self.id,
            access_token_half_key: self.access_token_half_key.clone(),
        }
    }

    /// Serialize to CBOR. The buffer zeroizes on drop.
    pub fn to_bytes(&self) -> Result<zeroize::Zeroizing<Vec<u8>>> {
        let mut buf = zeroize::Zeroizing::new(Vec::new());
        ciborium::into_writer(self, &mut *buf)
            .map_err(|e| KeysError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| KeysError::SerializationError(e.to_string()))
    }
}

/// A CAT encrypted under the owner's ICR key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedClientAccessToken {
    pub encrypted_data: SymmetricEncrypted,
}

impl EncryptedClientAccessToken {
    pub fn encrypt(icr_key: &SecretKey, token: &ClientAccessToken) -> Result<Self> {
        let plain = token.to_bytes()?;
        Ok(Self {
            encrypted_data: SymmetricEncrypted::encrypt(&plain, icr_key)?,
        })
    }

    pub fn decrypt(&self, icr_key: &SecretKey) -> Result<ClientAccessToken> {
        let plain = self.encrypted_data.decrypt(icr_key)?;
        ClientAccessToken::from_bytes(&plain)
    }

    pub fn is_empty(&self) -> bool {
        self.encrypted_data.ciphertext.is_empty()
    }
}

/// Server-side record of an issued CAT.
///
/// Holds the key-store key wrapped under the token half key, so only a
/// caller presenting the half key can unlock the grant's drive keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRegistration {
    pub id: Uuid,
    pub client_access_key_encrypted_key_store_key: SymmetricKeyEncrypted,
    pub access_key_store_key_encrypted_shared_secret: SymmetricKeyEncrypted,
    pub is_revoked: bool,
    pub created: i64,
}

impl AccessRegistration {
    /// Issue a new token for the given key-store key.
    pub fn create(key_store_key: &SecretKey) -> Result<(Self, ClientAccessToken)> {
        let half_key = SecretKey::generate();
        let shared_secret = SecretKey::generate();

        let registration = Self {
            id: Uuid::new_v4(),
            client_access_key_encrypted_key_store_key: SymmetricKeyEncrypted::encrypt(
                &half_key,
                key_store_key,
            )?,
            access_key_store_key_encrypted_shared_secret: SymmetricKeyEncrypted::encrypt(
                key_store_key,
                &shared_secret,
            )?,
            is_revoked: false,
            created: now_millis(),
        };

        let token = ClientAccessToken {
            id: registration.id,
            access_token_half_key: half_key,
            shared_secret,
        };

        Ok((registration, token))
    }

    pub fn is_valid(&self) -> bool {
        !self.is_revoked
    }

    /// Verify that `half_key` is the key this registration was issued with.
    pub fn assert_valid_remote_key(&self, half_key: &SecretKey) -> Result<()> {
        if self.is_revoked {
            return Err(KeysError::Revoked);
        }
        self.client_access_key_encrypted_key_store_key
            .decrypt_key_clone(half_key)
            .map(drop)
            .map_err(|_| KeysError::InvalidRemoteKey)
    }

    /// Unlock the key-store key with a presented token.
    pub fn decrypt_using_client_authentication_token(
        &self,
        token: &ClientAuthenticationToken,
    ) -> Result<SecretKey> {
        if self.is_revoked {
            return Err(KeysError::Revoked);
        }
        if token.id != self.id {
            return Err(KeysError::InvalidRemoteKey);
        }
        self.client_access_key_encrypted_key_store_key
            .decrypt_key_clone(&token.access_token_half_key)
            .map_err(|_| KeysError::InvalidRemoteKey)
    }

    /// Recover the shared secret given the unlocked key-store key.
    pub fn shared_secret(&self, key_store_key: &SecretKey) -> Result<SecretKey> {
        self.access_key_store_key_encrypted_shared_secret
            .decrypt_key_clone(key_store_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_token_opens_registration() {
        let ksk = SecretKey::generate();
        let (reg, cat) = AccessRegistration::create(&ksk).unwrap();

        reg.assert_valid_remote_key(&cat.access_token_half_key).unwrap();

        let unlocked = reg
            .decrypt_using_client_authentication_token(&cat.to_authentication_token())
            .unwrap();
        assert!(unlocked.ct_eq(&ksk));
        assert!(reg.shared_secret(&unlocked).unwrap().ct_eq(&cat.shared_secret));
    }

    #[test]
    fn test_foreign_half_key_rejected() {
        let (reg, _) = AccessRegistration::create(&SecretKey::generate()).unwrap();
        assert!(matches!(
            reg.assert_valid_remote_key(&SecretKey::generate()),
            Err(KeysError::InvalidRemoteKey)
        ));
    }

    #[test]
    fn test_revoked_registration_rejects_everything() {
        let (mut reg, cat) = AccessRegistration::create(&SecretKey::generate()).unwrap();
        reg.is_revoked = true;
        assert!(!reg.is_valid());
        assert!(matches!(
            reg.assert_valid_remote_key(&cat.access_token_half_key),
            Err(KeysError::Revoked)
        ));
    }

    #[test]
    fn test_token_with_wrong_id_rejected() {
        let ksk = SecretKey::generate();
        let (reg, cat) = AccessRegistration::create(&ksk).unwrap();
        let mut auth = cat.to_authentication_token();
        auth.id = Uuid::new_v4();
        assert!(reg.decrypt_using_client_authentication_token(&auth).is_err());
    }

    #[test]
    fn test_encrypted_cat_under_icr_key() {
        let icr_key = SecretKey::generate();
        let (_, cat) = AccessRegistration::create(&SecretKey::generate()).unwrap();

        let encrypted = EncryptedClientAccessToken::encrypt(&icr_key, &cat).unwrap();
        assert!(!encrypted.is_empty());

        let decrypted = encrypted.decrypt(&icr_key).unwrap();
        assert_eq!(decrypted.id, cat.id);
        assert!(decrypted.shared_secret.ct_eq(&cat.shared_secret));
        assert!(encrypted.decrypt(&SecretKey::generate()).is_err());
    }
}
