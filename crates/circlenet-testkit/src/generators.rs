//! Proptest generators for property-based testing.

use proptest::prelude::*;
use uuid::Uuid;

use circlenet_core::{
    AppId, CircleId, DrivePermission, OdinId, PermissionKey, PermissionSet, TargetDrive,
};

/// Generate a valid identity domain.
pub fn odin_id() -> impl Strategy<Value = OdinId> {
    "[a-z][a-z0-9]{0,15}\\.[a-z]{2,8}\\.cloud"
        .prop_map(|domain| OdinId::new(domain).expect("generated domain is valid"))
}

/// Generate a random CircleId.
pub fn circle_id() -> impl Strategy<Value = CircleId> {
    any::<u128>().prop_map(|n| CircleId::from_uuid(Uuid::from_u128(n)))
}

/// Generate a random AppId.
pub fn app_id() -> impl Strategy<Value = AppId> {
    any::<u128>().prop_map(|n| AppId::from_uuid(Uuid::from_u128(n)))
}

/// Generate a random TargetDrive.
pub fn target_drive() -> impl Strategy<Value = TargetDrive> {
    (any::<u128>(), any::<u128>())
        .prop_map(|(alias, kind)| TargetDrive::new(Uuid::from_u128(alias), Uuid::from_u128(kind)))
}

/// Generate a PermissionKey.
pub fn permission_key() -> impl Strategy<Value = PermissionKey> {
    prop_oneof![
        Just(PermissionKey::ReadConnections),
        Just(PermissionKey::ManageConnections),
        Just(PermissionKey::ReadConnectionRequests),
        Just(PermissionKey::ReadCircleMembership),
        Just(PermissionKey::ReadWhoIFollow),
        Just(PermissionKey::ReadMyFollowers),
        Just(PermissionKey::ManageFeed),
        Just(PermissionKey::SendDataToOtherIdentitiesOnMyBehalf),
        Just(PermissionKey::SendPushNotifications),
        Just(PermissionKey::SendIntroductions),
        Just(PermissionKey::UseTransitWrite),
        Just(PermissionKey::UseTransitRead),
    ]
}

/// Generate a permission set of up to `max_keys` keys.
pub fn permission_set(max_keys: usize) -> impl Strategy<Value = PermissionSet> {
    prop::collection::vec(permission_key(), 0..=max_keys).prop_map(PermissionSet::new)
}

/// Generate a non-empty drive permission.
pub fn drive_permission() -> impl Strategy<Value = DrivePermission> {
    (1u32..=15).prop_map(DrivePermission::from_bits)
}

/// Pick subsets of a fixed pool of circles, as an app's authorized circles
/// before and after an update.
#[derive(Debug, Clone)]
pub struct AuthorizationChange {
    pub before: Vec<usize>,
    pub after: Vec<usize>,
}

/// Generate an [`AuthorizationChange`] over a pool of `pool` circles.
pub fn authorization_change(pool: usize) -> impl Strategy<Value = AuthorizationChange> {
    let subset = move || {
        prop::collection::btree_set(0..pool, 0..=pool).prop_map(|s| s.into_iter().collect())
    };
    (subset(), subset()).prop_map(|(before, after)| AuthorizationChange { before, after })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_domains_round_trip(id in odin_id()) {
            let again = OdinId::new(id.as_str()).unwrap();
            prop_assert_eq!(again.key(), id.key());
        }

        #[test]
        fn generated_permission_sets_hold_their_keys(keys in prop::collection::vec(permission_key(), 0..6)) {
            let set = PermissionSet::new(keys.clone());
            for key in keys {
                prop_assert!(set.has_key(key));
            }
        }

        #[test]
        fn authorization_change_stays_in_pool(change in authorization_change(4)) {
            prop_assert!(change.before.iter().chain(change.after.iter()).all(|i| *i < 4));
        }
    }
}
