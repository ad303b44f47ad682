//! Read-side contracts for the entities the engine consumes but does not own:
//! studios, rooms, coaches, clients and tenant settings.
//!
//! Every lookup is tenant-scoped. An entity registered under one tenant is
//! invisible to every other tenant.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Failure of the backing store itself (not "not found").
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("directory unavailable: {0}")]
pub struct DirectoryError(pub String);

pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[async_trait]
pub trait StudioDirectory: Send + Sync {
    async fn find_studio(&self, tenant_id: Ulid, id: Ulid) -> DirectoryResult<Option<Studio>>;
}

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn find_room(&self, tenant_id: Ulid, id: Ulid) -> DirectoryResult<Option<Room>>;

    /// All rooms of a studio, active or not, in a stable order.
    async fn list_rooms(&self, tenant_id: Ulid, studio_id: Ulid) -> DirectoryResult<Vec<Room>>;
}

#[async_trait]
pub trait CoachDirectory: Send + Sync {
    async fn find_coach(&self, tenant_id: Ulid, id: Ulid) -> DirectoryResult<Option<Coach>>;

    async fn list_coaches(&self, tenant_id: Ulid) -> DirectoryResult<Vec<Coach>>;
}

#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn find_client(&self, tenant_id: Ulid, id: Ulid) -> DirectoryResult<Option<Client>>;
}

#[async_trait]
pub trait TenantSettingsStore: Send + Sync {
    async fn settings(&self, tenant_id: Ulid) -> DirectoryResult<TenantSettings>;
}

// ── In-memory implementation ─────────────────────────────────────

/// DashMap-backed directory. Listings come back in id order.
#[derive(Default)]
pub struct InMemoryDirectory {
    studios: DashMap<Ulid, Studio>,
    rooms: DashMap<Ulid, Room>,
    coaches: DashMap<Ulid, Coach>,
    clients: DashMap<Ulid, Client>,
    settings: DashMap<Ulid, TenantSettings>,
}

/// JSON seed for [`InMemoryDirectory`] and the in-memory ledger.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectorySnapshot {
    pub studios: Vec<Studio>,
    pub rooms: Vec<Room>,
    pub coaches: Vec<Coach>,
    pub clients: Vec<Client>,
    pub packages: Vec<ClientPackage>,
    pub tenant_settings: Vec<(Ulid, TenantSettings)>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: &DirectorySnapshot) -> Self {
        let dir = Self::new();
        for s in &snapshot.studios {
            dir.put_studio(s.clone());
        }
        for r in &snapshot.rooms {
            dir.put_room(r.clone());
        }
        for c in &snapshot.coaches {
            dir.put_coach(c.clone());
        }
        for c in &snapshot.clients {
            dir.put_client(c.clone());
        }
        for (tenant_id, settings) in &snapshot.tenant_settings {
            dir.put_settings(*tenant_id, settings.clone());
        }
        dir
    }

    pub fn put_studio(&self, studio: Studio) {
        self.studios.insert(studio.id, studio);
    }

    pub fn put_room(&self, room: Room) {
        self.rooms.insert(room.id, room);
    }

    pub fn put_coach(&self, coach: Coach) {
        self.coaches.insert(coach.id, coach);
    }

    pub fn put_client(&self, client: Client) {
        self.clients.insert(client.id, client);
    }

    pub fn put_settings(&self, tenant_id: Ulid, settings: TenantSettings) {
        self.settings.insert(tenant_id, settings);
    }

    pub fn set_room_active(&self, id: Ulid, active: bool) {
        if let Some(mut room) = self.rooms.get_mut(&id) {
            room.is_active = active;
        }
    }
}

fn scoped<T: Clone>(
    map: &DashMap<Ulid, T>,
    id: Ulid,
    tenant_of: impl Fn(&T) -> Ulid,
    tenant_id: Ulid,
) -> Option<T> {
    map.get(&id)
        .filter(|e| tenant_of(e.value()) == tenant_id)
        .map(|e| e.value().clone())
}

#[async_trait]
impl StudioDirectory for InMemoryDirectory {
    async fn find_studio(&self, tenant_id: Ulid, id: Ulid) -> DirectoryResult<Option<Studio>> {
        Ok(scoped(&self.studios, id, |s| s.tenant_id, tenant_id))
    }
}

#[async_trait]
impl RoomDirectory for InMemoryDirectory {
    async fn find_room(&self, tenant_id: Ulid, id: Ulid) -> DirectoryResult<Option<Room>> {
        Ok(scoped(&self.rooms, id, |r| r.tenant_id, tenant_id))
    }

    async fn list_rooms(&self, tenant_id: Ulid, studio_id: Ulid) -> DirectoryResult<Vec<Room>> {
        let mut rooms: Vec<Room> = self
            .rooms
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.studio_id == studio_id)
            .map(|e| e.value().clone())
            .collect();
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }
}

#[async_trait]
impl CoachDirectory for InMemoryDirectory {
    async fn find_coach(&self, tenant_id: Ulid, id: Ulid) -> DirectoryResult<Option<Coach>> {
        Ok(scoped(&self.coaches, id, |c| c.tenant_id, tenant_id))
    }

    async fn list_coaches(&self, tenant_id: Ulid) -> DirectoryResult<Vec<Coach>> {
        let mut coaches: Vec<Coach> = self
            .coaches
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .map(|e| e.value().clone())
            .collect();
        coaches.sort_by_key(|c| c.id);
        Ok(coaches)
    }
}

#[async_trait]
impl ClientDirectory for InMemoryDirectory {
    async fn find_client(&self, tenant_id: Ulid, id: Ulid) -> DirectoryResult<Option<Client>> {
        Ok(scoped(&self.clients, id, |c| c.tenant_id, tenant_id))
    }
}

#[async_trait]
impl TenantSettingsStore for InMemoryDirectory {
    async fn settings(&self, tenant_id: Ulid) -> DirectoryResult<TenantSettings> {
        Ok(self
            .settings
            .get(&tenant_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}
