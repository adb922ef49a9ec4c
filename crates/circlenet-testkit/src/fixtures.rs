//! Test fixtures and helpers.
//!
//! A [`TenantFixture`] is one tenant with an unlocked owner session,
//! in-memory collaborators and the system circles and drives in place.

use std::sync::Arc;

use uuid::Uuid;

use circlenet::memory::{
    MemoryAppRegistry, MemoryCircleDefinitions, MemoryDriveDirectory, RecordingEvents,
};
use circlenet::{
    create_verification_hash, CallerContext, CircleNetworkService, Collaborators,
    ConnectRequest, ConnectionKeys, ContactRequestData, NetworkConfig, OwnerSecrets,
    RedactedAppRegistration, Result, StorageDrive,
};
use circlenet_core::{
    now_millis, system_circles, system_drives, AppId, CircleDefinition, CircleId,
    ConnectionRequestOrigin, DriveGrantRequest, DriveId, OdinId, PermissionSet,
    PermissionSetGrantRequest, TargetDrive,
};
use circlenet_keys::{
    AccessExchangeGrant, AccessRegistration, ClientAccessToken, ClientAuthenticationToken,
    EccEncryptedPayload, EncryptedClientAccessToken, SecretKey, SymmetricKeyEncrypted,
    X25519PublicKey, X25519StaticSecret,
};
use circlenet_store::{ConnectionStore, MemoryStore};

/// Random code every fixture connection's verification hash is built from.
pub const VERIFICATION_CODE: &[u8] = b"fixture-verification-code";

/// A drive registered with the fixture, with its plaintext storage key.
pub struct TestDrive {
    pub drive: StorageDrive,
    pub storage_key: SecretKey,
}

impl TestDrive {
    pub fn target(&self) -> TargetDrive {
        self.drive.target
    }
}

/// What the remote side of a fixture connection holds.
pub struct ConnectedPeer {
    pub odin_id: OdinId,
    pub token: ClientAccessToken,
    pub key_store_key: SecretKey,
}

impl ConnectedPeer {
    pub fn auth_token(&self) -> ClientAuthenticationToken {
        self.token.to_authentication_token()
    }
}

/// One tenant and its circle network.
pub struct TenantFixture<S: ConnectionStore = MemoryStore> {
    pub owner: CallerContext,
    pub system: CallerContext,
    pub ecc_public: X25519PublicKey,
    pub circles: Arc<MemoryCircleDefinitions>,
    pub drives: Arc<MemoryDriveDirectory>,
    pub apps: Arc<MemoryAppRegistry>,
    pub events: Arc<RecordingEvents>,
    pub network: CircleNetworkService<S>,
}

impl TenantFixture<MemoryStore> {
    /// A tenant backed by the in-memory store.
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new(), NetworkConfig::default())
    }
}

impl Default for TenantFixture<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ConnectionStore> TenantFixture<S> {
    /// A tenant over the given store.
    pub fn with_store(store: S, config: NetworkConfig) -> Self {
        let ecc_key = X25519StaticSecret::generate();
        let ecc_public = ecc_key.public_key();
        let owner = CallerContext::owner(OwnerSecrets {
            master_key: SecretKey::generate(),
            icr_key: SecretKey::generate(),
            ecc_key,
        });

        let circles = Arc::new(MemoryCircleDefinitions::new());
        let drives = Arc::new(MemoryDriveDirectory::new());
        let apps = Arc::new(MemoryAppRegistry::new());
        let events = Arc::new(RecordingEvents::new());

        let network = CircleNetworkService::new(
            store,
            Collaborators {
                circles: circles.clone(),
                drives: drives.clone(),
                apps: apps.clone(),
                events: events.clone(),
            },
            config,
        );

        let fixture = Self {
            owner,
            system: CallerContext::system(),
            ecc_public,
            circles,
            drives,
            apps,
            events,
            network,
        };

        fixture.put_circle(CircleDefinition::new(
            system_circles::CONFIRMED_CONNECTIONS,
            "Confirmed Connections",
        ));
        fixture.put_circle(CircleDefinition::new(
            system_circles::AUTO_CONNECTIONS,
            "Auto Connections",
        ));
        fixture.register_drive("Feed", system_drives::FEED_DRIVE, false);
        fixture.register_drive("Transient Temp", system_drives::TRANSIENT_TEMP_DRIVE, false);
        fixture
    }

    pub fn secrets(&self) -> &OwnerSecrets {
        self.owner
            .owner_secrets()
            .expect("fixture owner context holds secrets")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Collaborator setup
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a new drive with a fresh storage key.
    pub fn add_drive(&self, name: &str, allow_anonymous_reads: bool) -> TestDrive {
        let target = TargetDrive::new(Uuid::new_v4(), Uuid::new_v4());
        self.register_drive(name, target, allow_anonymous_reads)
    }

    fn register_drive(
        &self,
        name: &str,
        target: TargetDrive,
        allow_anonymous_reads: bool,
    ) -> TestDrive {
        let storage_key = SecretKey::generate();
        let drive = StorageDrive {
            id: DriveId::generate(),
            name: name.to_string(),
            target,
            allow_anonymous_reads,
            master_key_encrypted_storage_key: SymmetricKeyEncrypted::encrypt(
                &self.secrets().master_key,
                &storage_key,
            )
            .expect("wrap storage key"),
        };
        self.drives.insert(drive.clone()).expect("insert drive");
        TestDrive { drive, storage_key }
    }

    /// Define a new circle.
    pub fn add_circle(
        &self,
        name: &str,
        permissions: PermissionSet,
        drive_grants: impl IntoIterator<Item = DriveGrantRequest>,
    ) -> CircleDefinition {
        let mut definition = CircleDefinition::new(CircleId::generate(), name)
            .with_permissions(permissions)
            .with_drive_grants(drive_grants);
        definition.created = now_millis();
        definition.last_updated = definition.created;
        self.put_circle(definition.clone());
        definition
    }

    pub fn put_circle(&self, definition: CircleDefinition) {
        self.circles.insert(definition).expect("insert circle");
    }

    /// Register an app authorizing the given circles. Does not reconcile.
    pub fn add_app(
        &self,
        name: &str,
        authorized_circles: &[CircleId],
        member_grant: PermissionSetGrantRequest,
    ) -> RedactedAppRegistration {
        let app = RedactedAppRegistration {
            app_id: AppId::generate(),
            name: name.to_string(),
            is_revoked: false,
            authorized_circles: authorized_circles.to_vec(),
            circle_member_permission_grant: member_grant,
        };
        self.apps.upsert(app.clone()).expect("register app");
        app
    }

    /// Replace an app registration and reconcile it, as the app service
    /// would after an update.
    pub async fn update_app(
        &self,
        old: &RedactedAppRegistration,
        authorized_circles: &[CircleId],
    ) -> Result<RedactedAppRegistration> {
        let mut new = old.clone();
        new.authorized_circles = authorized_circles.to_vec();
        self.apps.upsert(new.clone()).expect("register app");
        self.network
            .handle_app_registration_changed(&self.owner, Some(old), &new)
            .await?;
        Ok(new)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────────

    /// Connect an identity the owner invited, placing it in `circles` plus
    /// the confirmed-connections circle.
    pub async fn connect(&self, odin_id: &OdinId, circles: &[CircleId]) -> Result<ConnectedPeer> {
        let secrets = self.secrets();
        let key_store_key = SecretKey::generate();
        let (registration, token) = AccessRegistration::create(&key_store_key)?;

        let access_grant = self
            .pending_grant(
                &self.owner,
                &key_store_key,
                registration,
                circles,
                ConnectionRequestOrigin::IdentityOwner,
                Some(SymmetricKeyEncrypted::encrypt(&secrets.master_key, &key_store_key)?),
            )
            .await?;

        self.network
            .connect(
                &self.owner,
                ConnectRequest {
                    odin_id: odin_id.clone(),
                    access_grant,
                    keys: ConnectionKeys::Strong {
                        encrypted_cat: EncryptedClientAccessToken::encrypt(
                            &secrets.icr_key,
                            &token,
                        )?,
                    },
                    contact_data: ContactRequestData {
                        name: Some(odin_id.to_string()),
                        image_id: None,
                    },
                    origin: ConnectionRequestOrigin::IdentityOwner,
                    introducer: None,
                    verification_hash: Some(create_verification_hash(
                        VERIFICATION_CODE,
                        &token.shared_secret,
                    )),
                },
            )
            .await?;

        Ok(ConnectedPeer {
            odin_id: odin_id.clone(),
            token,
            key_store_key,
        })
    }

    /// Connect an identity through an introduction, with no owner session:
    /// the connection lands in the auto-connections circle with its keys
    /// still under the owner's ECC key.
    pub async fn connect_introduced(
        &self,
        odin_id: &OdinId,
        introducer: &OdinId,
    ) -> Result<ConnectedPeer> {
        let key_store_key = SecretKey::generate();
        let (registration, token) = AccessRegistration::create(&key_store_key)?;

        let access_grant = self
            .pending_grant(
                &self.system,
                &key_store_key,
                registration,
                &[],
                ConnectionRequestOrigin::Introduction,
                None,
            )
            .await?;

        let token_bytes = token.to_bytes()?;
        self.network
            .connect(
                &self.system,
                ConnectRequest {
                    odin_id: odin_id.clone(),
                    access_grant,
                    keys: ConnectionKeys::Weak {
                        temporary_weak_client_access_token: EccEncryptedPayload::encrypt(
                            &token_bytes,
                            &self.ecc_public,
                        )?,
                        temp_weak_key_store_key: EccEncryptedPayload::encrypt_key(
                            &key_store_key,
                            &self.ecc_public,
                        )?,
                    },
                    contact_data: ContactRequestData::default(),
                    origin: ConnectionRequestOrigin::Introduction,
                    introducer: Some(introducer.clone()),
                    verification_hash: None,
                },
            )
            .await?;

        Ok(ConnectedPeer {
            odin_id: odin_id.clone(),
            token,
            key_store_key,
        })
    }

    async fn pending_grant(
        &self,
        ctx: &CallerContext,
        key_store_key: &SecretKey,
        registration: AccessRegistration,
        circles: &[CircleId],
        origin: ConnectionRequestOrigin,
        master_key_encrypted_key_store_key: Option<SymmetricKeyEncrypted>,
    ) -> Result<AccessExchangeGrant> {
        let circle_grants = self
            .network
            .create_circle_grant_list_with_system_circle(ctx, key_store_key, circles, origin)
            .await?;
        let app_grants = self
            .network
            .create_app_circle_grant_list_with_system_circle(ctx, key_store_key, circles, origin)
            .await?;

        let now = now_millis();
        Ok(AccessExchangeGrant {
            master_key_encrypted_key_store_key,
            circle_grants,
            app_grants,
            access_registration: Some(registration),
            is_revoked: false,
            created: now,
            modified: now,
        })
    }
}

/// A distinct, valid identity per index.
pub fn identity(index: usize) -> OdinId {
    OdinId::new(format!("peer{index}.dotyou.cloud")).expect("valid fixture domain")
}

/// Identities for multi-party tests.
pub fn identities(count: usize) -> Vec<OdinId> {
    (0..count).map(identity).collect()
}
