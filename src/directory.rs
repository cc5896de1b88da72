//! Principal and device records. Principals are never deleted, only
//! deactivated; devices carry the last-seen timestamps the telemetry path
//! keeps fresh.

use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clock::Clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    User,
    Supervisor,
}

/// A user or supervisor credential holder. The PIN is stored as an Argon2id
/// PHC string; the raw PIN never lands here.
#[derive(Clone, Debug)]
pub struct Principal {
    pub id: Uuid,
    pub team_id: Uuid,
    pub kind: PrincipalKind,
    pub code: String,
    pub pin_hash: String,
    pub active: bool,
    pub pin_rotated_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
pub struct Device {
    pub id: Uuid,
    pub team_id: Uuid,
    pub active: bool,
    pub last_seen_at: Option<OffsetDateTime>,
    pub last_gps_at: Option<OffsetDateTime>,
}

/// In-memory registry of principals and devices. Provisioning is an admin
/// concern; this store only supports the lookups and touches the core needs.
pub struct Directory {
    clock: Arc<dyn Clock>,
    principals: Mutex<HashMap<Uuid, Principal>>,
    devices: Mutex<HashMap<Uuid, Device>>,
}

impl Directory {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            principals: Mutex::new(HashMap::new()),
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert_principal(&self, principal: Principal) {
        let mut principals = self.principals.lock().await;
        principals.insert(principal.id, principal);
    }

    pub async fn insert_device(&self, device: Device) {
        let mut devices = self.devices.lock().await;
        devices.insert(device.id, device);
    }

    pub async fn principal(&self, id: Uuid) -> Option<Principal> {
        let principals = self.principals.lock().await;
        principals.get(&id).cloned()
    }

    pub async fn device(&self, id: Uuid) -> Option<Device> {
        let devices = self.devices.lock().await;
        devices.get(&id).cloned()
    }

    /// Team-scoped lookup by user-facing code. Codes are unique per team and
    /// kind; the first match wins.
    pub async fn find_principal_by_code(
        &self,
        team_id: Uuid,
        code: &str,
        kind: PrincipalKind,
    ) -> Option<Principal> {
        let principals = self.principals.lock().await;
        principals
            .values()
            .find(|p| p.team_id == team_id && p.kind == kind && p.code == code)
            .cloned()
    }

    /// The team's supervisor credential. Fleets provision one active
    /// supervisor principal per team.
    pub async fn find_supervisor(&self, team_id: Uuid) -> Option<Principal> {
        let principals = self.principals.lock().await;
        principals
            .values()
            .find(|p| p.team_id == team_id && p.kind == PrincipalKind::Supervisor && p.active)
            .cloned()
    }

    /// Deactivate instead of delete; history keeps referring to the id.
    pub async fn deactivate_principal(&self, id: Uuid) {
        let mut principals = self.principals.lock().await;
        if let Some(principal) = principals.get_mut(&id) {
            principal.active = false;
        }
    }

    pub async fn rotate_pin(&self, id: Uuid, new_pin_hash: String) {
        let now = self.clock.now();
        let mut principals = self.principals.lock().await;
        if let Some(principal) = principals.get_mut(&id) {
            principal.pin_hash = new_pin_hash;
            principal.pin_rotated_at = now;
        }
    }

    pub async fn touch_seen(&self, device_id: Uuid) {
        let now = self.clock.now();
        let mut devices = self.devices.lock().await;
        if let Some(device) = devices.get_mut(&device_id) {
            device.last_seen_at = Some(now);
        }
    }

    pub async fn touch_gps(&self, device_id: Uuid) {
        let now = self.clock.now();
        let mut devices = self.devices.lock().await;
        if let Some(device) = devices.get_mut(&device_id) {
            device.last_gps_at = Some(now);
            device.last_seen_at = Some(now);
        }
    }
}
