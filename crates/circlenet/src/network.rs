//! The circle network service.
//!
//! Owns the lifecycle of identity connection registrations and keeps each
//! connection's materialized grants in step with circle definitions and app
//! registrations. Remote callers are turned into permission contexts here.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use circlenet_core::{
    now_millis, system_circles, validate_circle_definition, AppId, CircleDefinition, CircleId,
    ConnectionRequestOrigin, ConnectionStatus, DomainType, DriveGrantRequest, DrivePermission,
    OdinId, PermissionKey, PermissionSet, PermissionedDrive,
};
use circlenet_keys::{
    AccessExchangeGrant, AccessRegistration, AppCircleGrant, CircleGrant, ClientAccessToken,
    ClientAuthenticationToken, DriveGrant, EncryptedClientAccessToken, SecretKey,
    SymmetricKeyEncrypted,
};
use circlenet_store::{ConnectionCursor, ConnectionStore};

use crate::collaborators::{
    AppRegistry, Collaborators, ConnectionEvent, ConnectionEvents, RedactedAppRegistration,
};
use crate::config::NetworkConfig;
use crate::context::{CallerContext, OwnerSecrets, SecurityLevel};
use crate::error::{ClientErrorCode, NetworkError, Result};
use crate::icr::{ConnectRequest, ConnectionKeys, IdentityConnectionRegistration};
use crate::locks::IdentityLocks;
use crate::membership::CircleMembershipService;
use crate::permission_context::{PermissionContext, PermissionGroup};
use crate::storage::{CircleNetworkStorage, IcrPage};

const FEED_DRIVE_WRITER_GROUP: &str = "feed_drive_writer";
const ADDITIONAL_KEYS_GROUP: &str = "additional_permission_keys";
const ANONYMOUS_DRIVES_GROUP: &str = "anonymous_drives";
const TRANSIENT_TEMP_DRIVE_GROUP: &str = "transient_temp_drive";

/// Result of propagating a circle definition change to its members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircleUpdateReport {
    /// Members whose grant was re-derived from the new definition.
    pub updated: Vec<OdinId>,
    /// Members listed in the circle whose registration is not connected or
    /// does not hold the circle's grant. Left untouched.
    pub inconsistent_members: Vec<OdinId>,
}

/// The circle network engine for one tenant.
pub struct CircleNetworkService<S: ConnectionStore> {
    pub(crate) storage: CircleNetworkStorage<S>,
    pub(crate) membership: CircleMembershipService,
    pub(crate) apps: Arc<dyn AppRegistry>,
    pub(crate) events: Arc<dyn ConnectionEvents>,
    pub(crate) locks: IdentityLocks,
    pub(crate) config: NetworkConfig,
}

impl<S: ConnectionStore> CircleNetworkService<S> {
    /// Create a service over a store it takes ownership of.
    pub fn new(store: S, collaborators: Collaborators, config: NetworkConfig) -> Self {
        Self::with_shared_store(Arc::new(store), collaborators, config)
    }

    /// Create a service over a store shared with other components.
    pub fn with_shared_store(
        store: Arc<S>,
        collaborators: Collaborators,
        config: NetworkConfig,
    ) -> Self {
        Self {
            storage: CircleNetworkStorage::new(store),
            membership: CircleMembershipService::new(
                collaborators.circles,
                collaborators.drives,
            ),
            apps: collaborators.apps,
            events: collaborators.events,
            locks: IdentityLocks::new(),
            config,
        }
    }

    pub fn storage(&self) -> &CircleNetworkStorage<S> {
        &self.storage
    }

    pub fn membership(&self) -> &CircleMembershipService {
        &self.membership
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connection lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a finished connection handshake.
    ///
    /// Any existing registration for the identity is replaced.
    pub async fn connect(&self, ctx: &CallerContext, request: ConnectRequest) -> Result<()> {
        ctx.assert_can_manage_connections()?;

        let (encrypted_cat, weak_cat, weak_ksk) = match request.keys {
            ConnectionKeys::Strong { encrypted_cat } => {
                if encrypted_cat.is_empty() {
                    return Err(NetworkError::security("encrypted client access token is empty"));
                }
                (Some(encrypted_cat), None, None)
            }
            ConnectionKeys::Weak {
                temporary_weak_client_access_token,
                temp_weak_key_store_key,
            } => {
                if temporary_weak_client_access_token.ciphertext.is_empty()
                    || temp_weak_key_store_key.ciphertext.is_empty()
                {
                    return Err(NetworkError::security("temporary connection keys are empty"));
                }
                (
                    None,
                    Some(temporary_weak_client_access_token),
                    Some(temp_weak_key_store_key),
                )
            }
        };

        if request.access_grant.access_registration.is_none() {
            return Err(NetworkError::security("access grant has no registration"));
        }

        let odin_id = request.odin_id;
        let _guard = self.locks.lock(odin_id.key()).await;

        let now = now_millis();
        let icr = IdentityConnectionRegistration {
            odin_id: odin_id.clone(),
            status: ConnectionStatus::Connected,
            access_grant: Some(request.access_grant),
            encrypted_client_access_token: encrypted_cat,
            temporary_weak_client_access_token: weak_cat,
            temp_weak_key_store_key: weak_ksk,
            original_contact_data: request.contact_data,
            connection_request_origin: request.origin,
            introducer_odin_id: request.introducer,
            verification_hash: request.verification_hash,
            created: now,
            last_updated: now,
        };
        self.storage.upsert(&icr).await?;

        tracing::info!(
            odin_id = %odin_id,
            origin = ?icr.connection_request_origin,
            circles = icr.circle_ids().len(),
            "connection finalized"
        );
        self.events
            .publish(ConnectionEvent::Finalized { odin_id })
            .await;
        Ok(())
    }

    /// Remove a connected identity. Anything else is left as is and
    /// `false` is returned.
    pub async fn disconnect(&self, ctx: &CallerContext, odin_id: &OdinId) -> Result<bool> {
        ctx.assert_can_manage_connections()?;
        let _guard = self.locks.lock(odin_id.key()).await;

        let icr = self.load(odin_id).await?;
        if !icr.is_connected() {
            tracing::debug!(odin_id = %odin_id, status = ?icr.status, "disconnect ignored");
            return Ok(false);
        }

        self.storage.delete(odin_id).await?;
        tracing::info!(odin_id = %odin_id, "disconnected");
        self.events
            .publish(ConnectionEvent::Deleted {
                odin_id: odin_id.clone(),
            })
            .await;
        Ok(true)
    }

    /// Block an identity, whether or not it was ever connected.
    ///
    /// A connected identity keeps its grant so unblocking can restore it.
    /// Every status can be blocked, so this returns `true` on success.
    pub async fn block(&self, ctx: &CallerContext, odin_id: &OdinId) -> Result<bool> {
        ctx.assert_can_manage_connections()?;
        let _guard = self.locks.lock(odin_id.key()).await;

        let mut icr = self.load(odin_id).await?;
        let now = now_millis();
        if !icr.is_connected() {
            icr.created = now;
        }
        icr.status = ConnectionStatus::Blocked;
        icr.last_updated = now;
        self.storage.upsert(&icr).await?;

        tracing::info!(odin_id = %odin_id, "blocked");
        self.events
            .publish(ConnectionEvent::Blocked {
                odin_id: odin_id.clone(),
            })
            .await;
        Ok(true)
    }

    /// Lift a block. The identity returns to connected if its grant is still
    /// valid, otherwise the registration is removed.
    pub async fn unblock(&self, ctx: &CallerContext, odin_id: &OdinId) -> Result<bool> {
        ctx.assert_can_manage_connections()?;
        let _guard = self.locks.lock(odin_id.key()).await;

        let mut icr = self.load(odin_id).await?;
        if !icr.is_blocked() {
            return Ok(false);
        }

        icr.status = if icr.has_valid_access_grant() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::None
        };
        icr.last_updated = now_millis();
        self.storage.upsert(&icr).await?;

        tracing::info!(odin_id = %odin_id, status = ?icr.status, "unblocked");
        self.events
            .publish(ConnectionEvent::Unblocked {
                odin_id: odin_id.clone(),
            })
            .await;
        Ok(true)
    }

    /// Delete a registration regardless of its status.
    pub async fn revoke_connection(&self, ctx: &CallerContext, odin_id: &OdinId) -> Result<()> {
        ctx.assert_can_manage_connections()?;
        let _guard = self.locks.lock(odin_id.key()).await;

        let existed = self.storage.delete(odin_id).await?;
        tracing::info!(odin_id = %odin_id, existed, "connection revoked");
        self.events
            .publish(ConnectionEvent::Deleted {
                odin_id: odin_id.clone(),
            })
            .await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// The registration for an identity; status `None` if there is no row.
    pub async fn get_icr(
        &self,
        ctx: &CallerContext,
        odin_id: &OdinId,
    ) -> Result<IdentityConnectionRegistration> {
        ctx.assert_has_permission(PermissionKey::ReadConnections)?;
        self.load(odin_id).await
    }

    /// Any caller may ask about itself. Asking about others requires
    /// permission to manage connections.
    pub async fn is_connected(&self, ctx: &CallerContext, odin_id: &OdinId) -> Result<bool> {
        if ctx.odin_id() != Some(odin_id) {
            ctx.assert_can_manage_connections()?;
        }
        Ok(self.load(odin_id).await?.is_connected())
    }

    /// Fails with a security error if the identity is blocked.
    pub async fn assert_connection_is_none_or_valid(
        &self,
        ctx: &CallerContext,
        odin_id: &OdinId,
    ) -> Result<()> {
        let icr = self.get_icr(ctx, odin_id).await?;
        if icr.is_blocked() {
            return Err(NetworkError::security(format!("{} is blocked", odin_id)));
        }
        Ok(())
    }

    /// The registration for an identity presenting a token.
    ///
    /// The token's half key must open the registration's access grant.
    pub async fn get_icr_with_remote_token(
        &self,
        odin_id: &OdinId,
        token: &ClientAuthenticationToken,
    ) -> Result<IdentityConnectionRegistration> {
        let icr = self.load(odin_id).await?;
        let registration = icr
            .access_grant
            .as_ref()
            .and_then(|g| g.access_registration.as_ref())
            .ok_or_else(|| NetworkError::security("unauthorized action"))?;
        registration.assert_valid_remote_key(&token.access_token_half_key)?;
        Ok(icr)
    }

    /// The access registration of a connected identity, if `half_key`
    /// belongs to it.
    pub async fn get_access_registration(
        &self,
        odin_id: &OdinId,
        half_key: &SecretKey,
    ) -> Result<AccessRegistration> {
        let icr = self.load(odin_id).await?;
        if !icr.is_connected() {
            return Err(NetworkError::security("unauthorized action"));
        }
        let registration = icr
            .access_grant
            .and_then(|g| g.access_registration)
            .ok_or_else(|| NetworkError::security("unauthorized action"))?;
        registration.assert_valid_remote_key(half_key)?;
        Ok(registration)
    }

    pub async fn get_connected_identities(
        &self,
        ctx: &CallerContext,
        count: usize,
        cursor: Option<ConnectionCursor>,
    ) -> Result<IcrPage> {
        self.list_by_status(ctx, ConnectionStatus::Connected, count, cursor)
            .await
    }

    pub async fn get_blocked_profiles(
        &self,
        ctx: &CallerContext,
        count: usize,
        cursor: Option<ConnectionCursor>,
    ) -> Result<IcrPage> {
        self.list_by_status(ctx, ConnectionStatus::Blocked, count, cursor)
            .await
    }

    /// Identities recorded as members of a circle.
    pub async fn get_circle_members(
        &self,
        ctx: &CallerContext,
        circle_id: CircleId,
    ) -> Result<Vec<OdinId>> {
        ctx.assert_has_permission(PermissionKey::ReadCircleMembership)?;
        Ok(self
            .storage
            .domains_in_circle(circle_id)
            .await?
            .into_iter()
            .filter(|d| d.domain_type == DomainType::Identity)
            .map(|d| d.domain)
            .collect())
    }

    async fn list_by_status(
        &self,
        ctx: &CallerContext,
        status: ConnectionStatus,
        count: usize,
        cursor: Option<ConnectionCursor>,
    ) -> Result<IcrPage> {
        ctx.assert_has_permission(PermissionKey::ReadConnections)?;
        let count = count.min(self.config.max_page_size);
        self.storage.get_list(status, count, cursor).await
    }

    pub(crate) async fn load(&self, odin_id: &OdinId) -> Result<IdentityConnectionRegistration> {
        Ok(self
            .storage
            .get(odin_id)
            .await?
            .unwrap_or_else(|| IdentityConnectionRegistration::none(odin_id.clone())))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Circle grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a connected identity to a circle.
    pub async fn grant_circle(
        &self,
        ctx: &CallerContext,
        circle_id: CircleId,
        odin_id: &OdinId,
    ) -> Result<()> {
        let owner = ctx.owner_secrets()?;
        let _guard = self.locks.lock(odin_id.key()).await;

        let mut icr = self.load(odin_id).await?;
        if !icr.is_connected() {
            return Err(NetworkError::security(format!(
                "{} must be connected to join a circle",
                odin_id
            )));
        }
        if icr.has_circle(circle_id) {
            return Err(NetworkError::client(
                ClientErrorCode::IdentityAlreadyMemberOfCircle,
                format!("{} is already a member of {}", odin_id, circle_id),
            ));
        }
        if icr.is_unconfirmed_auto_connection() {
            return Err(NetworkError::client(
                ClientErrorCode::CannotGrantAutoConnectedMoreCircles,
                format!("{} must be confirmed before joining more circles", odin_id),
            ));
        }

        let ksk = self.unlock_key_store_key(owner, &mut icr)?;
        let grant = access_grant_mut(&mut icr)?;
        self.add_circle_grant(owner, &ksk, grant, circle_id).await?;
        touch(&mut icr);
        self.storage.upsert(&icr).await?;

        tracing::info!(odin_id = %odin_id, circle = %circle_id, "circle granted");
        Ok(())
    }

    /// Remove an identity from a circle, with every app grant tied to it.
    pub async fn revoke_circle_access(
        &self,
        ctx: &CallerContext,
        circle_id: CircleId,
        odin_id: &OdinId,
    ) -> Result<()> {
        ctx.owner_secrets()?;
        let _guard = self.locks.lock(odin_id.key()).await;

        let mut icr = self.load(odin_id).await?;
        let Some(grant) = icr.access_grant.as_mut() else {
            return Ok(());
        };
        grant.remove_circle(circle_id);
        touch(&mut icr);
        self.storage.upsert(&icr).await?;

        tracing::info!(odin_id = %odin_id, circle = %circle_id, "circle revoked");
        Ok(())
    }

    /// Materialize a circle, and every app authorizing it, into a grant.
    ///
    /// No membership rules are checked here.
    pub(crate) async fn add_circle_grant(
        &self,
        owner: &OwnerSecrets,
        key_store_key: &SecretKey,
        grant: &mut AccessExchangeGrant,
        circle_id: CircleId,
    ) -> Result<()> {
        let definition = self.membership.get_circle(circle_id).await?;
        let circle_grant = self
            .membership
            .create_circle_grant(key_store_key, &definition, Some(owner))
            .await?;
        grant.circle_grants.insert(circle_id, circle_grant);

        for app in self.apps.registered_apps().await? {
            if !app.authorizes(circle_id) {
                continue;
            }
            let app_grant = self
                .membership
                .create_app_circle_grant(key_store_key, &app, circle_id, Some(&owner.master_key))
                .await?;
            grant.add_update_app_circle_grant(app_grant);
        }
        Ok(())
    }

    /// The connection's key-store key, upgrading its encryption first if it
    /// is still addressed to the owner's ECC key.
    pub(crate) fn unlock_key_store_key(
        &self,
        owner: &OwnerSecrets,
        icr: &mut IdentityConnectionRegistration,
    ) -> Result<SecretKey> {
        upgrade_key_store_key_in_place(owner, icr)?;
        let wrapped = icr
            .access_grant
            .as_ref()
            .and_then(|g| g.master_key_encrypted_key_store_key.as_ref())
            .ok_or_else(|| {
                NetworkError::client(
                    ClientErrorCode::InvalidConnectionKeys,
                    format!("{} has no key-store key", icr.odin_id),
                )
            })?;
        Ok(wrapped.decrypt_key_clone(&owner.master_key)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Circle definitions
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a changed circle definition and re-derive every member's grant.
    ///
    /// Members are processed before the definition is stored so a failure
    /// leaves the old definition in place.
    pub async fn update_circle_definition(
        &self,
        ctx: &CallerContext,
        definition: CircleDefinition,
    ) -> Result<CircleUpdateReport> {
        let owner = ctx.owner_secrets()?;
        validate_circle_definition(&definition).map_err(|e| {
            NetworkError::client(ClientErrorCode::InvalidCircleDefinition, e.to_string())
        })?;
        self.membership
            .assert_valid_drive_grants(&definition.drive_grants)
            .await?;

        let circle_id = definition.id;
        let mut report = CircleUpdateReport::default();

        for member in self.storage.domains_in_circle(circle_id).await? {
            if member.domain_type != DomainType::Identity {
                continue;
            }
            let odin_id = member.domain;
            let _guard = self.locks.lock(odin_id.key()).await;

            let mut icr = self.load(&odin_id).await?;
            if !icr.is_connected() || !icr.has_circle(circle_id) {
                tracing::warn!(
                    odin_id = %odin_id,
                    circle = %circle_id,
                    status = ?icr.status,
                    "circle member without a matching grant"
                );
                report.inconsistent_members.push(odin_id);
                continue;
            }

            let ksk = self.unlock_key_store_key(owner, &mut icr)?;
            let circle_grant = self
                .membership
                .create_circle_grant(&ksk, &definition, Some(owner))
                .await?;
            let grant = access_grant_mut(&mut icr)?;
            grant.circle_grants.insert(circle_id, circle_grant);
            touch(&mut icr);
            self.storage.upsert(&icr).await?;
            report.updated.push(odin_id);
        }

        self.membership.circles().update_circle(&definition).await?;
        tracing::info!(
            circle = %circle_id,
            updated = report.updated.len(),
            inconsistent = report.inconsistent_members.len(),
            "circle definition updated"
        );
        Ok(report)
    }

    /// Delete a circle definition that no longer has members.
    pub async fn delete_circle_definition(
        &self,
        ctx: &CallerContext,
        circle_id: CircleId,
    ) -> Result<()> {
        ctx.owner_secrets()?;
        if system_circles::is_system_circle(circle_id) {
            return Err(NetworkError::client(
                ClientErrorCode::InvalidCircleDefinition,
                "system circles cannot be deleted",
            ));
        }

        let members = self.storage.domains_in_circle(circle_id).await?;
        if !members.is_empty() {
            return Err(NetworkError::client(
                ClientErrorCode::CannotDeleteCircleWithMembers,
                format!("circle {} still has {} members", circle_id, members.len()),
            ));
        }

        self.membership.circles().delete_circle(circle_id).await?;
        tracing::info!(circle = %circle_id, "circle definition deleted");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Apps
    // ─────────────────────────────────────────────────────────────────────────

    /// Bring every affected member's app grants in line with an app's
    /// authorized circles.
    ///
    /// Grants are removed for circles only `old` authorized, and created or
    /// overwritten for every circle `new` authorizes. A revoked app
    /// authorizes nothing.
    pub async fn reconcile_authorized_circles(
        &self,
        ctx: &CallerContext,
        old: Option<&RedactedAppRegistration>,
        new: &RedactedAppRegistration,
    ) -> Result<()> {
        let owner = ctx.owner_secrets()?;
        let app_id = new.app_id;

        let new_circles: BTreeSet<CircleId> = if new.is_revoked {
            BTreeSet::new()
        } else {
            new.authorized_circles.iter().copied().collect()
        };
        let old_circles: BTreeSet<CircleId> = old
            .map(|o| o.authorized_circles.iter().copied().collect())
            .unwrap_or_default();

        for circle_id in old_circles.difference(&new_circles) {
            for odin_id in self.identity_members(*circle_id).await? {
                let _guard = self.locks.lock(odin_id.key()).await;
                let mut icr = self.load(&odin_id).await?;
                let Some(grant) = icr.access_grant.as_mut() else {
                    continue;
                };
                if grant.remove_app_circle_grant(app_id, *circle_id) {
                    touch(&mut icr);
                    self.storage.upsert(&icr).await?;
                }
            }
        }

        for circle_id in &new_circles {
            for odin_id in self.identity_members(*circle_id).await? {
                let _guard = self.locks.lock(odin_id.key()).await;
                let mut icr = self.load(&odin_id).await?;
                if !icr.is_connected() || !icr.has_circle(*circle_id) {
                    tracing::warn!(
                        odin_id = %odin_id,
                        circle = %circle_id,
                        app = %app_id,
                        "skipping app grant for member without circle grant"
                    );
                    continue;
                }

                let ksk = self.unlock_key_store_key(owner, &mut icr)?;
                let app_grant = self
                    .membership
                    .create_app_circle_grant(&ksk, new, *circle_id, Some(&owner.master_key))
                    .await?;
                access_grant_mut(&mut icr)?.add_update_app_circle_grant(app_grant);
                touch(&mut icr);
                self.storage.upsert(&icr).await?;
            }
        }

        tracing::info!(
            app = %app_id,
            circles = new_circles.len(),
            removed = old_circles.difference(&new_circles).count(),
            "app circle grants reconciled"
        );
        Ok(())
    }

    /// Hook for app registration changes.
    pub async fn handle_app_registration_changed(
        &self,
        ctx: &CallerContext,
        old: Option<&RedactedAppRegistration>,
        new: &RedactedAppRegistration,
    ) -> Result<()> {
        self.reconcile_authorized_circles(ctx, old, new).await
    }

    async fn identity_members(&self, circle_id: CircleId) -> Result<Vec<OdinId>> {
        Ok(self
            .storage
            .domains_in_circle(circle_id)
            .await?
            .into_iter()
            .filter(|d| d.domain_type == DomainType::Identity)
            .map(|d| d.domain)
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Initial grants for new connections
    // ─────────────────────────────────────────────────────────────────────────

    /// Circle grants for a new connection: the requested circles plus the
    /// system circle matching how the connection came about.
    pub async fn create_circle_grant_list_with_system_circle(
        &self,
        ctx: &CallerContext,
        key_store_key: &SecretKey,
        circle_ids: &[CircleId],
        origin: ConnectionRequestOrigin,
    ) -> Result<BTreeMap<CircleId, CircleGrant>> {
        let owner = ctx.try_owner_secrets();
        let mut grants = BTreeMap::new();
        for circle_id in with_system_circle(circle_ids, origin) {
            let definition = self.membership.get_circle(circle_id).await?;
            let grant = self
                .membership
                .create_circle_grant(key_store_key, &definition, owner)
                .await?;
            grants.insert(circle_id, grant);
        }
        Ok(grants)
    }

    /// App grants for a new connection, covering the same circles as
    /// [`Self::create_circle_grant_list_with_system_circle`].
    pub async fn create_app_circle_grant_list_with_system_circle(
        &self,
        ctx: &CallerContext,
        key_store_key: &SecretKey,
        circle_ids: &[CircleId],
        origin: ConnectionRequestOrigin,
    ) -> Result<BTreeMap<AppId, BTreeMap<CircleId, AppCircleGrant>>> {
        let master_key = ctx.try_owner_secrets().map(|o| &o.master_key);
        let circles = with_system_circle(circle_ids, origin);
        let mut grants: BTreeMap<_, BTreeMap<_, _>> = BTreeMap::new();

        for app in self.apps.registered_apps().await? {
            for circle_id in circles.iter().copied().filter(|c| app.authorizes(*c)) {
                let grant = self
                    .membership
                    .create_app_circle_grant(key_store_key, &app, circle_id, master_key)
                    .await?;
                grants.entry(app.app_id).or_default().insert(circle_id, grant);
            }
        }
        Ok(grants)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permission contexts
    // ─────────────────────────────────────────────────────────────────────────

    /// The permission context for a connected identity calling over transit.
    pub async fn create_transit_permission_context(
        &self,
        odin_id: &OdinId,
        token: &ClientAuthenticationToken,
    ) -> Result<(PermissionContext, Vec<CircleId>)> {
        let icr = self.get_icr_with_remote_token(odin_id, token).await?;
        if !icr.has_valid_access_grant() {
            return Err(NetworkError::security("invalid token"));
        }
        if !icr.is_connected() {
            return Err(NetworkError::security("invalid connection"));
        }

        let registration = icr
            .access_grant
            .as_ref()
            .and_then(|g| g.access_registration.clone())
            .ok_or_else(|| NetworkError::security("invalid token"))?;
        self.create_permission_context_internal(&icr, token, &registration, true)
            .await
    }

    /// A caller and permission context for a connected identity signed in
    /// through YouAuth.
    ///
    /// `registration` is the YouAuth session's own registration, not the
    /// connection's. Returns `None` when the identity is blocked or not
    /// validly connected.
    pub async fn try_create_connected_you_auth_context(
        &self,
        odin_id: &OdinId,
        token: &ClientAuthenticationToken,
        registration: &AccessRegistration,
    ) -> Result<Option<(CallerContext, PermissionContext)>> {
        let icr = self.load(odin_id).await?;
        if icr.is_blocked() || !(icr.has_valid_access_grant() && icr.is_connected()) {
            return Ok(None);
        }

        let (mut permissions, enabled_circles) = self
            .create_permission_context_internal(&icr, token, registration, false)
            .await?;

        let transient_keys = PermissionSet::new([
            PermissionKey::UseTransitWrite,
            PermissionKey::ReadConnections,
        ]);
        let drive_grants = match self
            .membership
            .drives()
            .get_drive(&self.config.transient_temp_drive)
            .await?
        {
            Some(drive) => vec![DriveGrant {
                drive_id: drive.id,
                permissioned_drive: PermissionedDrive::new(drive.target, DrivePermission::WRITE),
                key_store_key_encrypted_storage_key: None,
            }],
            None => {
                tracing::warn!(
                    drive = %self.config.transient_temp_drive,
                    "transient temp drive is not registered"
                );
                Vec::new()
            }
        };
        permissions.insert_group(
            TRANSIENT_TEMP_DRIVE_GROUP,
            PermissionGroup::new(transient_keys, drive_grants, None),
        );

        let caller = CallerContext::remote(
            odin_id.clone(),
            SecurityLevel::Connected,
            permissions.permission_keys(),
            enabled_circles,
        );
        Ok(Some((caller, permissions)))
    }

    async fn create_permission_context_internal(
        &self,
        icr: &IdentityConnectionRegistration,
        token: &ClientAuthenticationToken,
        registration: &AccessRegistration,
        apply_app_circle_grants: bool,
    ) -> Result<(PermissionContext, Vec<CircleId>)> {
        let access_grant = icr
            .access_grant
            .as_ref()
            .ok_or_else(|| NetworkError::security("invalid token"))?;

        let ksk = registration.decrypt_using_client_authentication_token(token)?;
        let shared_secret = registration.shared_secret(&ksk)?;

        let (circle_grants, mut enabled_circles) = self
            .membership
            .map_circle_grants_to_exchange_grants(access_grant.circle_grants.values())
            .await?;

        let mut groups: BTreeMap<String, PermissionGroup> = circle_grants
            .iter()
            .map(|(key, grant)| {
                (
                    key.clone(),
                    PermissionGroup::from_exchange_grant(grant, Some(ksk.clone())),
                )
            })
            .collect();

        if apply_app_circle_grants {
            for (app_id, by_circle) in &access_grant.app_grants {
                for (circle_id, app_grant) in by_circle {
                    let already_enabled = enabled_circles.contains(circle_id);
                    if !already_enabled && !self.membership.is_circle_enabled(*circle_id).await? {
                        continue;
                    }
                    if !already_enabled {
                        enabled_circles.push(*circle_id);
                    }

                    let key = format!("{}-{}", app_id, circle_id);
                    let candidate = PermissionGroup::from_exchange_grant(
                        &app_grant.to_exchange_grant(),
                        Some(ksk.clone()),
                    );
                    if let Some(existing) = groups.get(&key) {
                        let existing_json = redacted_json(existing)?;
                        let new_json = redacted_json(&candidate)?;
                        if existing_json != new_json {
                            tracing::warn!(
                                odin_id = %icr.odin_id,
                                app = %app_id,
                                circle = %circle_id,
                                existing = %existing_json,
                                new = %new_json,
                                "conflicting app circle grants"
                            );
                        }
                        continue;
                    }
                    groups.insert(key, candidate);
                }
            }
        }

        match self
            .membership
            .drives()
            .get_drive(&self.config.feed_drive)
            .await?
        {
            Some(_) => {
                let feed_ksk = SecretKey::generate();
                let grant = self
                    .membership
                    .create_exchange_grant(
                        &feed_ksk,
                        PermissionSet::empty(),
                        &[DriveGrantRequest::new(
                            self.config.feed_drive,
                            DrivePermission::WRITE,
                        )],
                        None,
                    )
                    .await?;
                groups.insert(
                    FEED_DRIVE_WRITER_GROUP.to_string(),
                    PermissionGroup::from_exchange_grant(&grant, Some(feed_ksk)),
                );
            }
            None => {
                tracing::warn!(drive = %self.config.feed_drive, "feed drive is not registered");
            }
        }

        let additional = &self.config.additional_permission_keys_for_connected_identities;
        if !additional.is_empty() {
            groups.insert(
                ADDITIONAL_KEYS_GROUP.to_string(),
                PermissionGroup::new(additional.clone(), Vec::new(), None),
            );
        }

        if self.config.include_anonymous_drives {
            let permission = self.config.anonymous_drive_permission_for_connected_identities;
            // Anonymous drives are not encrypted, so these grants carry no key.
            let drive_grants: Vec<DriveGrant> = self
                .membership
                .drives()
                .list_drives()
                .await?
                .into_iter()
                .filter(|d| d.allow_anonymous_reads)
                .map(|d| DriveGrant {
                    drive_id: d.id,
                    permissioned_drive: PermissionedDrive::new(d.target, permission),
                    key_store_key_encrypted_storage_key: None,
                })
                .collect();
            if !drive_grants.is_empty() {
                groups.insert(
                    ANONYMOUS_DRIVES_GROUP.to_string(),
                    PermissionGroup::new(PermissionSet::empty(), drive_grants, None),
                );
            }
        }

        tracing::debug!(
            odin_id = %icr.odin_id,
            groups = groups.len(),
            circles = enabled_circles.len(),
            "permission context created"
        );
        let context = PermissionContext::new(groups, Some(shared_secret), enabled_circles.clone());
        Ok((context, enabled_circles))
    }
}

/// The requested circles plus the system circle for `origin`, deduplicated
/// and in request order.
fn with_system_circle(circle_ids: &[CircleId], origin: ConnectionRequestOrigin) -> Vec<CircleId> {
    let system = match origin {
        ConnectionRequestOrigin::Introduction => system_circles::AUTO_CONNECTIONS,
        ConnectionRequestOrigin::IdentityOwner => system_circles::CONFIRMED_CONNECTIONS,
    };
    let mut circles = Vec::with_capacity(circle_ids.len() + 1);
    for id in circle_ids.iter().copied().chain(std::iter::once(system)) {
        if !circles.contains(&id) {
            circles.push(id);
        }
    }
    circles
}

fn access_grant_mut(
    icr: &mut IdentityConnectionRegistration,
) -> Result<&mut AccessExchangeGrant> {
    let odin_id = icr.odin_id.clone();
    icr.access_grant.as_mut().ok_or_else(|| {
        NetworkError::client(
            ClientErrorCode::IdentityMustBeConnected,
            format!("{} has no access grant", odin_id),
        )
    })
}

pub(crate) fn touch(icr: &mut IdentityConnectionRegistration) {
    let now = now_millis();
    icr.last_updated = now;
    if let Some(grant) = icr.access_grant.as_mut() {
        grant.modified = now;
    }
}

fn redacted_json(group: &PermissionGroup) -> Result<String> {
    let redacted: Vec<_> = group.drive_grants.iter().map(DriveGrant::redacted).collect();
    serde_json::to_string(&(&group.permission_set, redacted))
        .map_err(|e| NetworkError::Serialization(e.to_string()))
}

/// Re-wrap a key-store key still addressed to the owner's ECC key under the
/// master key. Returns true if anything changed.
pub(crate) fn upgrade_key_store_key_in_place(
    owner: &OwnerSecrets,
    icr: &mut IdentityConnectionRegistration,
) -> Result<bool> {
    let Some(weak) = icr.temp_weak_key_store_key.as_ref() else {
        return Ok(false);
    };
    let ksk = weak.decrypt_key(&owner.ecc_key)?;
    let wrapped = SymmetricKeyEncrypted::encrypt(&owner.master_key, &ksk)?;
    access_grant_mut(icr)?.master_key_encrypted_key_store_key = Some(wrapped);
    icr.temp_weak_key_store_key = None;
    Ok(true)
}

/// Re-encrypt a client access token still addressed to the owner's ECC key
/// under the ICR key. Returns true if anything changed.
pub(crate) fn upgrade_token_in_place(
    owner: &OwnerSecrets,
    icr: &mut IdentityConnectionRegistration,
) -> Result<bool> {
    let Some(weak) = icr.temporary_weak_client_access_token.as_ref() else {
        return Ok(false);
    };
    let bytes = weak.decrypt(&owner.ecc_key)?;
    let token = ClientAccessToken::from_bytes(&bytes)?;
    icr.encrypted_client_access_token = Some(EncryptedClientAccessToken::encrypt(
        &owner.icr_key,
        &token,
    )?);
    icr.temporary_weak_client_access_token = None;
    Ok(true)
}
