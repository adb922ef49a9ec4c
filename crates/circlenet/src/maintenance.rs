//! Owner-session upkeep of existing connections: key upgrades, confirming
//! introduced connections, diagnostics and repair, and reacting to drive
//! changes.

use circlenet_core::{
    system_circles, ConnectionStatus, DriveGrantRequest, DrivePermission, OdinId,
    PermissionKey,
};
use circlenet_store::{ConnectionCursor, ConnectionStore};

use crate::collaborators::StorageDrive;
use crate::context::{CallerContext, OwnerSecrets};
use crate::error::{ClientErrorCode, NetworkError, Result};
use crate::network::{
    touch, upgrade_key_store_key_in_place, upgrade_token_in_place, CircleNetworkService,
    CircleUpdateReport,
};
use crate::troubleshooting::{analyze_circle, IcrTroubleshootingInfo};
use crate::verification::verification_hashes_match;

const SWEEP_PAGE_SIZE: usize = 100;

/// Outcome of a sweep over many connections. Failures are logged and do
/// not stop the sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub visited: usize,
    pub changed: usize,
    pub failed: usize,
}

impl<S: ConnectionStore> CircleNetworkService<S> {
    // ─────────────────────────────────────────────────────────────────────────
    // Key upgrades
    // ─────────────────────────────────────────────────────────────────────────

    /// Move a connection's client access token from ECC encryption to the
    /// ICR key. Returns true if it was upgraded.
    pub async fn upgrade_token_encryption_if_needed(
        &self,
        ctx: &CallerContext,
        odin_id: &OdinId,
    ) -> Result<bool> {
        let owner = ctx.owner_secrets()?;
        let _guard = self.locks.lock(odin_id.key()).await;

        let mut icr = self.load(odin_id).await?;
        if !upgrade_token_in_place(owner, &mut icr)? {
            return Ok(false);
        }
        self.storage.upsert(&icr).await?;
        tracing::debug!(odin_id = %odin_id, "client access token upgraded");
        Ok(true)
    }

    /// Move a connection's key-store key from ECC encryption to the master
    /// key. Returns true if it was upgraded.
    pub async fn upgrade_key_store_key_encryption_if_needed(
        &self,
        ctx: &CallerContext,
        odin_id: &OdinId,
    ) -> Result<bool> {
        let owner = ctx.owner_secrets()?;
        let _guard = self.locks.lock(odin_id.key()).await;

        let mut icr = self.load(odin_id).await?;
        if !upgrade_key_store_key_in_place(owner, &mut icr)? {
            return Ok(false);
        }
        self.storage.upsert(&icr).await?;
        tracing::debug!(odin_id = %odin_id, "key-store key upgraded");
        Ok(true)
    }

    /// Run both upgrades across every connected identity.
    pub async fn upgrade_weak_client_access_tokens(
        &self,
        ctx: &CallerContext,
    ) -> Result<SweepReport> {
        let owner = ctx.owner_secrets()?;
        let mut report = SweepReport::default();

        for odin_id in self.connected_identity_ids().await? {
            report.visited += 1;
            match self.upgrade_both(owner, &odin_id).await {
                Ok(true) => report.changed += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(odin_id = %odin_id, error = %e, "key upgrade failed");
                }
            }
        }

        tracing::info!(
            visited = report.visited,
            upgraded = report.changed,
            failed = report.failed,
            "weak connection keys swept"
        );
        Ok(report)
    }

    async fn upgrade_both(&self, owner: &OwnerSecrets, odin_id: &OdinId) -> Result<bool> {
        let _guard = self.locks.lock(odin_id.key()).await;
        let mut icr = self.load(odin_id).await?;
        let token = upgrade_token_in_place(owner, &mut icr)?;
        let ksk = upgrade_key_store_key_in_place(owner, &mut icr)?;
        if token || ksk {
            self.storage.upsert(&icr).await?;
        }
        Ok(token || ksk)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introductions
    // ─────────────────────────────────────────────────────────────────────────

    /// Promote an introduced connection to a confirmed one.
    ///
    /// Upgrades the connection's keys, then swaps the auto-connections
    /// circle for the confirmed-connections circle in a single write.
    pub async fn confirm_connection(&self, ctx: &CallerContext, odin_id: &OdinId) -> Result<()> {
        let owner = ctx.owner_secrets()?;
        let _guard = self.locks.lock(odin_id.key()).await;

        let mut icr = self.load(odin_id).await?;
        if !icr.is_connected() {
            return Err(NetworkError::client(
                ClientErrorCode::IdentityMustBeConnected,
                format!("{} is not connected", odin_id),
            ));
        }
        if !icr.has_circle(system_circles::AUTO_CONNECTIONS) {
            return Err(NetworkError::client(
                ClientErrorCode::NotAnAutoConnection,
                format!("{} was not auto-connected", odin_id),
            ));
        }

        upgrade_token_in_place(owner, &mut icr)?;
        let ksk = self.unlock_key_store_key(owner, &mut icr)?;

        let grant = icr.access_grant.as_mut().ok_or_else(|| {
            NetworkError::client(
                ClientErrorCode::IdentityMustBeConnected,
                format!("{} has no access grant", odin_id),
            )
        })?;
        grant.remove_circle(system_circles::AUTO_CONNECTIONS);
        if !grant.has_circle(system_circles::CONFIRMED_CONNECTIONS) {
            self.add_circle_grant(owner, &ksk, grant, system_circles::CONFIRMED_CONNECTIONS)
                .await?;
        }
        touch(&mut icr);
        self.storage.upsert(&icr).await?;

        tracing::info!(odin_id = %odin_id, "introduced connection confirmed");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────────

    /// Check a verification hash presented for a connection.
    ///
    /// Callers other than the identity itself need permission to read
    /// connections.
    pub async fn verify_connection_code(
        &self,
        ctx: &CallerContext,
        odin_id: &OdinId,
        presented_hash: &[u8],
    ) -> Result<bool> {
        if ctx.odin_id() != Some(odin_id) {
            ctx.assert_has_permission(PermissionKey::ReadConnections)?;
        }

        let icr = self.load(odin_id).await?;
        if !icr.is_connected() {
            return Ok(false);
        }
        Ok(icr
            .verification_hash
            .as_deref()
            .is_some_and(|expected| verification_hashes_match(expected, presented_hash)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Diagnostics and repair
    // ─────────────────────────────────────────────────────────────────────────

    /// Compare a connection's grants with every circle definition.
    pub async fn get_troubleshooting_info(
        &self,
        ctx: &CallerContext,
        odin_id: &OdinId,
    ) -> Result<IcrTroubleshootingInfo> {
        ctx.owner_secrets()?;
        let icr = self.load(odin_id).await?;
        let grant = icr.access_grant.as_ref().ok_or_else(|| {
            NetworkError::client(
                ClientErrorCode::IdentityMustBeConnected,
                format!("{} has no access grant", odin_id),
            )
        })?;

        let mut info = IcrTroubleshootingInfo::default();
        for definition in self.membership.circles().list_circles(true).await? {
            let mut drives = Vec::with_capacity(definition.drive_grants.len());
            for request in &definition.drive_grants {
                let drive = self
                    .membership
                    .drives()
                    .get_drive(&request.permissioned_drive.drive)
                    .await?;
                drives.push((*request, drive));
            }
            info.circles.push(analyze_circle(
                &definition,
                grant.circle_grants.get(&definition.id),
                &drives,
            ));
        }
        Ok(info)
    }

    /// Rebuild every connected identity's circle grants from the current
    /// definitions, then reconcile every registered app.
    ///
    /// Grants for circles that no longer exist are dropped. `changed` counts
    /// identities whose grants differed from their definitions.
    pub async fn auto_fix(&self, ctx: &CallerContext) -> Result<SweepReport> {
        let owner = ctx.owner_secrets()?;
        let mut report = SweepReport::default();

        for odin_id in self.connected_identity_ids().await? {
            report.visited += 1;
            match self.rebuild_circle_grants(owner, &odin_id).await {
                Ok(true) => report.changed += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(odin_id = %odin_id, error = %e, "auto-fix failed");
                }
            }
        }

        for app in self.apps.registered_apps().await? {
            if let Err(e) = self.reconcile_authorized_circles(ctx, None, &app).await {
                report.failed += 1;
                tracing::error!(app = %app.app_id, error = %e, "app reconciliation failed");
            }
        }

        tracing::info!(
            visited = report.visited,
            fixed = report.changed,
            failed = report.failed,
            "auto-fix complete"
        );
        Ok(report)
    }

    /// Returns true if anything was rewritten.
    async fn rebuild_circle_grants(&self, owner: &OwnerSecrets, odin_id: &OdinId) -> Result<bool> {
        let _guard = self.locks.lock(odin_id.key()).await;
        let mut icr = self.load(odin_id).await?;
        if !icr.is_connected() {
            return Ok(false);
        }

        let circle_ids = icr.circle_ids();
        let before = icr.access_grant.as_ref().map(|g| g.redacted());
        let upgraded = upgrade_key_store_key_in_place(owner, &mut icr)?;
        let ksk = self.unlock_key_store_key(owner, &mut icr)?;
        let grant = icr.access_grant.as_mut().ok_or_else(|| {
            NetworkError::client(
                ClientErrorCode::IdentityMustBeConnected,
                format!("{} has no access grant", odin_id),
            )
        })?;

        for circle_id in circle_ids {
            grant.remove_circle(circle_id);
            if self.membership.circles().get_circle(circle_id).await?.is_none() {
                tracing::warn!(
                    odin_id = %odin_id,
                    circle = %circle_id,
                    "dropping grant for deleted circle"
                );
                continue;
            }
            self.add_circle_grant(owner, &ksk, grant, circle_id).await?;
        }

        // Key material is re-wrapped on every rebuild; compare what it grants.
        if !upgraded && before.as_ref() == Some(&grant.redacted()) {
            return Ok(false);
        }
        touch(&mut icr);
        self.storage.upsert(&icr).await?;
        Ok(true)
    }

    async fn connected_identity_ids(&self) -> Result<Vec<OdinId>> {
        let mut ids = Vec::new();
        let mut cursor: Option<ConnectionCursor> = None;
        loop {
            let page = self
                .storage
                .get_list(ConnectionStatus::Connected, SWEEP_PAGE_SIZE, cursor)
                .await?;
            ids.extend(page.results.into_iter().map(|icr| icr.odin_id));
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(ids),
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Drive hooks
    // ─────────────────────────────────────────────────────────────────────────

    /// Give confirmed connections read access to a new anonymous drive.
    pub async fn handle_drive_added(
        &self,
        ctx: &CallerContext,
        drive: &StorageDrive,
    ) -> Result<Option<CircleUpdateReport>> {
        if !drive.allow_anonymous_reads {
            return Ok(None);
        }
        let mut definition = self
            .membership
            .get_circle(system_circles::CONFIRMED_CONNECTIONS)
            .await?;
        if grants_drive(&definition.drive_grants, drive) {
            return Ok(None);
        }

        definition
            .drive_grants
            .push(DriveGrantRequest::new(drive.target, DrivePermission::READ));
        tracing::info!(
            drive = %drive.target,
            "granting confirmed connections a new anonymous drive"
        );
        self.update_circle_definition(ctx, definition).await.map(Some)
    }

    /// Keep the confirmed-connections circle in step with a drive's
    /// anonymous-read setting.
    pub async fn handle_drive_updated(
        &self,
        ctx: &CallerContext,
        drive: &StorageDrive,
    ) -> Result<Option<CircleUpdateReport>> {
        let mut definition = self
            .membership
            .get_circle(system_circles::CONFIRMED_CONNECTIONS)
            .await?;
        let granted = grants_drive(&definition.drive_grants, drive);

        match (drive.allow_anonymous_reads, granted) {
            (true, false) => {
                definition
                    .drive_grants
                    .push(DriveGrantRequest::new(drive.target, DrivePermission::READ));
            }
            (false, true) => {
                definition
                    .drive_grants
                    .retain(|g| g.permissioned_drive.drive != drive.target);
            }
            _ => return Ok(None),
        }

        tracing::info!(
            drive = %drive.target,
            anonymous = drive.allow_anonymous_reads,
            "confirmed connections drive access changed"
        );
        self.update_circle_definition(ctx, definition).await.map(Some)
    }
}

fn grants_drive(requests: &[DriveGrantRequest], drive: &StorageDrive) -> bool {
    requests
        .iter()
        .any(|g| g.permissioned_drive.drive == drive.target)
}
