//! Permission contexts for remote callers, over transit and YouAuth.

use circlenet::core::{
    system_circles, system_drives, DriveGrantRequest, DrivePermission, PermissionKey,
    PermissionSet, PermissionSetGrantRequest,
};
use circlenet::keys::AccessRegistration;
use circlenet::store::MemoryStore;
use circlenet::{ErrorKind, NetworkConfig, SecurityLevel};
use circlenet_testkit::{identity, TenantFixture};

#[tokio::test]
async fn test_transit_context_contents() {
    let tenant = TenantFixture::new();
    let photos = tenant.add_drive("Photos", false);
    let public = tenant.add_drive("Public", true);
    let friends = tenant.add_circle(
        "Friends",
        PermissionSet::new([PermissionKey::UseTransitRead]),
        [DriveGrantRequest::new(photos.target(), DrivePermission::READ)],
    );
    let frodo = identity(1);
    let peer = tenant.connect(&frodo, &[friends.id]).await.unwrap();

    let (context, circles) = tenant
        .network
        .create_transit_permission_context(&frodo, &peer.auth_token())
        .await
        .unwrap();

    assert!(circles.contains(&friends.id));
    assert!(circles.contains(&system_circles::CONFIRMED_CONNECTIONS));
    assert_eq!(context.enabled_circles(), circles.as_slice());
    assert!(context.group(&friends.id.to_string()).is_some());
    assert!(context.group("feed_drive_writer").is_some());
    assert!(context.group("anonymous_drives").is_some());

    assert!(context.has_permission(PermissionKey::UseTransitRead));
    assert!(!context.has_permission(PermissionKey::ManageConnections));
    assert!(context
        .shared_secret()
        .unwrap()
        .ct_eq(&peer.token.shared_secret));

    // Circle drive: readable with its storage key
    assert!(context.has_drive_permission(&photos.target(), DrivePermission::READ));
    let key = context.get_drive_storage_key(&photos.target()).unwrap().unwrap();
    assert!(key.ct_eq(&photos.storage_key));

    // Feed: write only
    assert!(context.has_drive_permission(&system_drives::FEED_DRIVE, DrivePermission::WRITE));
    assert!(!context.has_drive_permission(&system_drives::FEED_DRIVE, DrivePermission::READ));

    // Anonymous drive: readable, no key
    assert_eq!(
        context.drive_permission(&public.target()),
        DrivePermission::READ
    );
    assert!(context.get_drive_storage_key(&public.target()).unwrap().is_none());
}

#[tokio::test]
async fn test_disabled_circle_is_excluded() {
    let tenant = TenantFixture::new();
    let photos = tenant.add_drive("Photos", false);
    let friends = tenant.add_circle(
        "Friends",
        PermissionSet::new([PermissionKey::ReadCircleMembership]),
        [DriveGrantRequest::new(photos.target(), DrivePermission::READ)],
    );
    let frodo = identity(1);
    let peer = tenant.connect(&frodo, &[friends.id]).await.unwrap();

    let mut disabled = friends.clone();
    disabled.disabled = true;
    tenant.put_circle(disabled);

    let (context, circles) = tenant
        .network
        .create_transit_permission_context(&frodo, &peer.auth_token())
        .await
        .unwrap();
    assert!(!circles.contains(&friends.id));
    assert!(context.group(&friends.id.to_string()).is_none());
    assert!(!context.has_permission(PermissionKey::ReadCircleMembership));
    assert_eq!(context.drive_permission(&photos.target()), DrivePermission::NONE);
}

#[tokio::test]
async fn test_transit_context_rejects_bad_callers() {
    let tenant = TenantFixture::new();
    let frodo = identity(1);
    let sam = identity(2);
    let frodo_peer = tenant.connect(&frodo, &[]).await.unwrap();
    let sam_peer = tenant.connect(&sam, &[]).await.unwrap();

    // Someone else's token
    let err = tenant
        .network
        .create_transit_permission_context(&frodo, &sam_peer.auth_token())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    // Never connected
    let err = tenant
        .network
        .create_transit_permission_context(&identity(3), &frodo_peer.auth_token())
        .await
        .unwrap_err();
    assert!(err.is_security());

    // Blocked, even with the right token
    tenant.network.block(&tenant.owner, &frodo).await.unwrap();
    let err = tenant
        .network
        .create_transit_permission_context(&frodo, &frodo_peer.auth_token())
        .await
        .unwrap_err();
    assert!(err.is_security());
}

#[tokio::test]
async fn test_you_auth_context() {
    let tenant = TenantFixture::new();
    let friends = tenant.add_circle(
        "Friends",
        PermissionSet::new([PermissionKey::ReadCircleMembership]),
        [],
    );
    let frodo = identity(1);
    let peer = tenant.connect(&frodo, &[friends.id]).await.unwrap();

    // A YouAuth session gets its own registration over the same key-store key
    let (registration, token) = AccessRegistration::create(&peer.key_store_key).unwrap();
    let (caller, context) = tenant
        .network
        .try_create_connected_you_auth_context(
            &frodo,
            &token.to_authentication_token(),
            &registration,
        )
        .await
        .unwrap()
        .expect("connected identity gets a context");

    assert_eq!(caller.odin_id(), Some(&frodo));
    assert_eq!(caller.security_level(), SecurityLevel::Connected);
    assert!(caller.circle_ids().contains(&friends.id));
    assert!(caller.has_permission(PermissionKey::ReadCircleMembership));
    assert!(caller.has_permission(PermissionKey::UseTransitWrite));

    let transient = context.group("transient_temp_drive").unwrap();
    assert!(transient.permission_set.has_key(PermissionKey::ReadConnections));
    assert!(context.has_drive_permission(
        &system_drives::TRANSIENT_TEMP_DRIVE,
        DrivePermission::WRITE
    ));
    assert!(context.shared_secret().unwrap().ct_eq(&token.shared_secret));
}

#[tokio::test]
async fn test_you_auth_context_absent_for_blocked_or_unknown() {
    let tenant = TenantFixture::new();
    let frodo = identity(1);
    let peer = tenant.connect(&frodo, &[]).await.unwrap();
    let (registration, token) = AccessRegistration::create(&peer.key_store_key).unwrap();

    let unknown = tenant
        .network
        .try_create_connected_you_auth_context(
            &identity(2),
            &token.to_authentication_token(),
            &registration,
        )
        .await
        .unwrap();
    assert!(unknown.is_none());

    tenant.network.block(&tenant.owner, &frodo).await.unwrap();
    let blocked = tenant
        .network
        .try_create_connected_you_auth_context(
            &frodo,
            &token.to_authentication_token(),
            &registration,
        )
        .await
        .unwrap();
    assert!(blocked.is_none());
}

#[tokio::test]
async fn test_app_grants_apply_over_transit_only() {
    let tenant = TenantFixture::new();
    let friends = tenant.add_circle("Friends", PermissionSet::empty(), []);
    let app = tenant.add_app(
        "Chat",
        &[friends.id],
        PermissionSetGrantRequest {
            permission_set: PermissionSet::new([PermissionKey::SendPushNotifications]),
            drives: Vec::new(),
        },
    );
    let frodo = identity(1);
    let peer = tenant.connect(&frodo, &[friends.id]).await.unwrap();

    let (transit, _) = tenant
        .network
        .create_transit_permission_context(&frodo, &peer.auth_token())
        .await
        .unwrap();
    assert!(transit.has_permission(PermissionKey::SendPushNotifications));
    assert!(transit
        .group(&format!("{}-{}", app.app_id, friends.id))
        .is_some());

    let (registration, token) = AccessRegistration::create(&peer.key_store_key).unwrap();
    let (_, you_auth) = tenant
        .network
        .try_create_connected_you_auth_context(
            &frodo,
            &token.to_authentication_token(),
            &registration,
        )
        .await
        .unwrap()
        .unwrap();
    assert!(!you_auth.has_permission(PermissionKey::SendPushNotifications));
}

#[tokio::test]
async fn test_configured_extras() {
    let config = NetworkConfig {
        additional_permission_keys_for_connected_identities: PermissionSet::new([
            PermissionKey::ReadWhoIFollow,
        ]),
        include_anonymous_drives: false,
        ..NetworkConfig::default()
    };
    let tenant = TenantFixture::with_store(MemoryStore::new(), config);
    let public = tenant.add_drive("Public", true);
    let frodo = identity(1);
    let peer = tenant.connect(&frodo, &[]).await.unwrap();

    let (context, _) = tenant
        .network
        .create_transit_permission_context(&frodo, &peer.auth_token())
        .await
        .unwrap();
    assert!(context.has_permission(PermissionKey::ReadWhoIFollow));
    assert!(context.group("additional_permission_keys").is_some());
    assert!(context.group("anonymous_drives").is_none());
    assert_eq!(context.drive_permission(&public.target()), DrivePermission::NONE);
}
