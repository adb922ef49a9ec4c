//! App grant reconciliation against circle membership.

use std::collections::BTreeSet;

use circlenet::core::{
    AppId, CircleId, DriveGrantRequest, DrivePermission, OdinId, PermissionKey, PermissionSet,
    PermissionSetGrantRequest,
};
use circlenet_testkit::generators::authorization_change;
use circlenet_testkit::{identity, TenantFixture};
use proptest::prelude::*;

fn member_grant(keys: impl IntoIterator<Item = PermissionKey>) -> PermissionSetGrantRequest {
    PermissionSetGrantRequest {
        permission_set: PermissionSet::new(keys),
        drives: Vec::new(),
    }
}

async fn app_circles(tenant: &TenantFixture, odin_id: &OdinId, app_id: AppId) -> BTreeSet<CircleId> {
    let icr = tenant.network.get_icr(&tenant.owner, odin_id).await.unwrap();
    icr.access_grant
        .unwrap()
        .app_grants
        .get(&app_id)
        .map(|by_circle| by_circle.keys().copied().collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_reconcile_follows_authorized_circles() {
    let tenant = TenantFixture::new();
    let a = tenant.add_circle("A", PermissionSet::empty(), []).id;
    let b = tenant.add_circle("B", PermissionSet::empty(), []).id;
    let c = tenant.add_circle("C", PermissionSet::empty(), []).id;
    let frodo = identity(1);
    tenant.connect(&frodo, &[a, b, c]).await.unwrap();

    let app = tenant.add_app("Chat", &[a, b], member_grant([PermissionKey::ReadConnections]));
    tenant
        .network
        .reconcile_authorized_circles(&tenant.owner, None, &app)
        .await
        .unwrap();
    assert_eq!(
        app_circles(&tenant, &frodo, app.app_id).await,
        BTreeSet::from([a, b])
    );

    let app = tenant.update_app(&app, &[b, c]).await.unwrap();
    assert_eq!(
        app_circles(&tenant, &frodo, app.app_id).await,
        BTreeSet::from([b, c])
    );

    // Running the same reconciliation again changes nothing
    tenant
        .network
        .reconcile_authorized_circles(&tenant.owner, Some(&app), &app)
        .await
        .unwrap();
    assert_eq!(
        app_circles(&tenant, &frodo, app.app_id).await,
        BTreeSet::from([b, c])
    );
}

#[tokio::test]
async fn test_revoked_app_loses_all_grants() {
    let tenant = TenantFixture::new();
    let a = tenant.add_circle("A", PermissionSet::empty(), []).id;
    let frodo = identity(1);
    tenant.connect(&frodo, &[a]).await.unwrap();

    let app = tenant.add_app("Chat", &[a], member_grant([PermissionKey::ReadConnections]));
    tenant
        .network
        .reconcile_authorized_circles(&tenant.owner, None, &app)
        .await
        .unwrap();
    assert!(!app_circles(&tenant, &frodo, app.app_id).await.is_empty());

    let mut revoked = app.clone();
    revoked.is_revoked = true;
    tenant.apps.upsert(revoked.clone()).unwrap();
    tenant
        .network
        .handle_app_registration_changed(&tenant.owner, Some(&app), &revoked)
        .await
        .unwrap();

    let icr = tenant.network.get_icr(&tenant.owner, &frodo).await.unwrap();
    assert!(!icr.access_grant.unwrap().app_grants.contains_key(&app.app_id));
}

#[tokio::test]
async fn test_revoked_app_stays_revoked_through_grants_and_repair() {
    let tenant = TenantFixture::new();
    let a = tenant.add_circle("A", PermissionSet::empty(), []).id;
    let b = tenant.add_circle("B", PermissionSet::empty(), []).id;
    let frodo = identity(1);
    tenant.connect(&frodo, &[a]).await.unwrap();

    let app = tenant.add_app("Chat", &[a, b], member_grant([PermissionKey::ReadConnections]));
    let mut revoked = app.clone();
    revoked.is_revoked = true;
    tenant.apps.upsert(revoked.clone()).unwrap();
    tenant
        .network
        .handle_app_registration_changed(&tenant.owner, Some(&app), &revoked)
        .await
        .unwrap();

    tenant
        .network
        .grant_circle(&tenant.owner, b, &frodo)
        .await
        .unwrap();
    tenant.network.auto_fix(&tenant.owner).await.unwrap();

    assert!(app_circles(&tenant, &frodo, app.app_id).await.is_empty());
}

#[tokio::test]
async fn test_new_connection_includes_app_grants() {
    let tenant = TenantFixture::new();
    let photos = tenant.add_drive("Photos", false);
    let a = tenant.add_circle("A", PermissionSet::empty(), []).id;
    let app = tenant.add_app(
        "Gallery",
        &[a],
        PermissionSetGrantRequest {
            permission_set: PermissionSet::empty(),
            drives: vec![DriveGrantRequest::new(photos.target(), DrivePermission::READ)],
        },
    );

    let frodo = identity(1);
    let peer = tenant.connect(&frodo, &[a]).await.unwrap();

    let icr = tenant.network.get_icr(&tenant.owner, &frodo).await.unwrap();
    let grant = icr.access_grant.unwrap();
    let app_grant = &grant.app_grants[&app.app_id][&a];
    let storage_key = app_grant.key_store_key_encrypted_drive_grants[0]
        .key_store_key_encrypted_storage_key
        .as_ref()
        .unwrap()
        .decrypt_key_clone(&peer.key_store_key)
        .unwrap();
    assert!(storage_key.ct_eq(&photos.storage_key));
}

#[tokio::test]
async fn test_revoking_circle_drops_its_app_grants() {
    let tenant = TenantFixture::new();
    let a = tenant.add_circle("A", PermissionSet::empty(), []).id;
    let b = tenant.add_circle("B", PermissionSet::empty(), []).id;
    let app = tenant.add_app("Chat", &[a, b], member_grant([PermissionKey::ReadConnections]));

    let frodo = identity(1);
    tenant.connect(&frodo, &[a, b]).await.unwrap();
    assert_eq!(
        app_circles(&tenant, &frodo, app.app_id).await,
        BTreeSet::from([a, b])
    );

    tenant
        .network
        .revoke_circle_access(&tenant.owner, a, &frodo)
        .await
        .unwrap();
    assert_eq!(
        app_circles(&tenant, &frodo, app.app_id).await,
        BTreeSet::from([b])
    );
}

#[tokio::test]
async fn test_blocked_member_is_skipped() {
    let tenant = TenantFixture::new();
    let a = tenant.add_circle("A", PermissionSet::empty(), []).id;
    let frodo = identity(1);
    let gollum = identity(7);
    tenant.connect(&frodo, &[a]).await.unwrap();
    tenant.connect(&gollum, &[a]).await.unwrap();
    tenant.network.block(&tenant.owner, &gollum).await.unwrap();

    let app = tenant.add_app("Chat", &[a], member_grant([PermissionKey::ReadConnections]));
    tenant
        .network
        .reconcile_authorized_circles(&tenant.owner, None, &app)
        .await
        .unwrap();

    assert_eq!(
        app_circles(&tenant, &frodo, app.app_id).await,
        BTreeSet::from([a])
    );
    assert!(app_circles(&tenant, &gollum, app.app_id).await.is_empty());
}

#[tokio::test]
async fn test_reconcile_requires_owner() {
    let tenant = TenantFixture::new();
    let a = tenant.add_circle("A", PermissionSet::empty(), []).id;
    let app = tenant.add_app("Chat", &[a], member_grant([]));

    let err = tenant
        .network
        .reconcile_authorized_circles(&tenant.system, None, &app)
        .await
        .unwrap_err();
    assert!(err.is_security());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn reconcile_grants_exactly_authorized_circles(change in authorization_change(4)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (granted, expected) = runtime.block_on(async {
            let tenant = TenantFixture::new();
            let pool: Vec<CircleId> = (0..4)
                .map(|i| tenant.add_circle(&format!("Circle {i}"), PermissionSet::empty(), []).id)
                .collect();
            let frodo = identity(1);
            tenant.connect(&frodo, &pool).await.unwrap();

            let before: Vec<CircleId> = change.before.iter().map(|i| pool[*i]).collect();
            let after: Vec<CircleId> = change.after.iter().map(|i| pool[*i]).collect();

            let app = tenant.add_app("Chat", &before, member_grant([PermissionKey::ReadConnections]));
            tenant
                .network
                .reconcile_authorized_circles(&tenant.owner, None, &app)
                .await
                .unwrap();
            let app = tenant.update_app(&app, &after).await.unwrap();

            (
                app_circles(&tenant, &frodo, app.app_id).await,
                after.into_iter().collect::<BTreeSet<_>>(),
            )
        });
        prop_assert_eq!(granted, expected);
    }
}
