//! In-memory implementations of the collaborator traits.
//!
//! These are primarily for testing and for embedding the network in a
//! process that has no separate circle, drive or app services.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use circlenet_core::{AppId, CircleDefinition, CircleId, TargetDrive};

use crate::collaborators::{
    AppRegistry, CircleDefinitions, ConnectionEvent, ConnectionEvents, DriveDirectory,
    RedactedAppRegistration, StorageDrive,
};

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("lock poisoned")
}

/// Circle definitions held in a map.
#[derive(Default)]
pub struct MemoryCircleDefinitions {
    inner: RwLock<BTreeMap<CircleId, CircleDefinition>>,
}

impl MemoryCircleDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a definition directly.
    pub fn insert(&self, definition: CircleDefinition) -> anyhow::Result<()> {
        self.inner
            .write()
            .map_err(poisoned)?
            .insert(definition.id, definition);
        Ok(())
    }
}

#[async_trait]
impl CircleDefinitions for MemoryCircleDefinitions {
    async fn get_circle(&self, id: CircleId) -> anyhow::Result<Option<CircleDefinition>> {
        Ok(self.inner.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn list_circles(&self, include_system: bool) -> anyhow::Result<Vec<CircleDefinition>> {
        Ok(self
            .inner
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|c| include_system || !c.is_system_circle())
            .cloned()
            .collect())
    }

    async fn update_circle(&self, definition: &CircleDefinition) -> anyhow::Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if !inner.contains_key(&definition.id) {
            anyhow::bail!("circle {} does not exist", definition.id);
        }
        inner.insert(definition.id, definition.clone());
        Ok(())
    }

    async fn delete_circle(&self, id: CircleId) -> anyhow::Result<()> {
        self.inner.write().map_err(poisoned)?.remove(&id);
        Ok(())
    }
}

/// Drives held in a map keyed by target.
#[derive(Default)]
pub struct MemoryDriveDirectory {
    inner: RwLock<BTreeMap<TargetDrive, StorageDrive>>,
}

impl MemoryDriveDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, drive: StorageDrive) -> anyhow::Result<()> {
        self.inner
            .write()
            .map_err(poisoned)?
            .insert(drive.target, drive);
        Ok(())
    }
}

#[async_trait]
impl DriveDirectory for MemoryDriveDirectory {
    async fn get_drive(&self, target: &TargetDrive) -> anyhow::Result<Option<StorageDrive>> {
        Ok(self.inner.read().map_err(poisoned)?.get(target).cloned())
    }

    async fn list_drives(&self) -> anyhow::Result<Vec<StorageDrive>> {
        Ok(self.inner.read().map_err(poisoned)?.values().cloned().collect())
    }
}

/// App registrations held in a map.
#[derive(Default)]
pub struct MemoryAppRegistry {
    inner: RwLock<BTreeMap<AppId, RedactedAppRegistration>>,
}

impl MemoryAppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a registration, returning the previous one.
    pub fn upsert(
        &self,
        app: RedactedAppRegistration,
    ) -> anyhow::Result<Option<RedactedAppRegistration>> {
        Ok(self.inner.write().map_err(poisoned)?.insert(app.app_id, app))
    }
}

#[async_trait]
impl AppRegistry for MemoryAppRegistry {
    async fn registered_apps(&self) -> anyhow::Result<Vec<RedactedAppRegistration>> {
        Ok(self
            .inner
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|a| !a.is_revoked)
            .cloned()
            .collect())
    }
}

/// Event sink that keeps every event it receives.
#[derive(Default)]
pub struct RecordingEvents {
    events: RwLock<Vec<ConnectionEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events
            .read()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConnectionEvents for RecordingEvents {
    async fn publish(&self, event: ConnectionEvent) {
        match self.events.write() {
            Ok(mut events) => events.push(event),
            Err(_) => tracing::warn!(?event, "dropping connection event, sink poisoned"),
        }
    }
}
