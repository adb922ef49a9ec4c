//! Per-identity advisory locks.
//!
//! Every read-modify-write of a registration holds the lock for that
//! identity, so two concurrent mutations of the same connection apply one
//! after the other instead of the later write dropping the earlier one.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use circlenet_core::IdentityKey;

/// Lock table keyed by identity.
#[derive(Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<IdentityKey, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one identity's registration.
    pub async fn lock(&self, identity: IdentityKey) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            // Entries only referenced by the table are idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(identity).or_default())
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(n: u8) -> IdentityKey {
        IdentityKey::from_bytes([n; 32])
    }

    #[tokio::test]
    async fn test_same_identity_is_serialized() {
        let locks = Arc::new(IdentityLocks::new());
        let guard = locks.lock(key(1)).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock(key(1)).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_identities_do_not_block() {
        let locks = IdentityLocks::new();
        let _a = locks.lock(key(1)).await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.lock(key(2)))
            .await
            .unwrap();
        assert_eq!(locks.locks.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_idle_entries_are_pruned() {
        let locks = IdentityLocks::new();
        drop(locks.lock(key(1)).await);
        drop(locks.lock(key(2)).await);
        let _c = locks.lock(key(3)).await;
        assert_eq!(locks.locks.lock().await.len(), 1);
    }
}
