//! Connection verification codes.
//!
//! Both sides of a connection derive the same hash from the random code in
//! the request and the shared secret of the client access token, so either
//! side can later prove it holds the same connection.

use subtle::ConstantTimeEq;

use circlenet_keys::SecretKey;

const VERIFICATION_CONTEXT: &str = "circlenet-v0-connection-verification";

/// Hash binding a request's random code to the connection's shared secret.
pub fn create_verification_hash(random_code: &[u8], shared_secret: &SecretKey) -> Vec<u8> {
    let key = blake3::derive_key(VERIFICATION_CONTEXT, shared_secret.as_bytes());
    blake3::keyed_hash(&key, random_code).as_bytes().to_vec()
}

/// Constant-time comparison of two verification hashes.
pub fn verification_hashes_match(expected: &[u8], presented: &[u8]) -> bool {
    expected.len() == presented.len() && bool::from(expected.ct_eq(presented))
}
