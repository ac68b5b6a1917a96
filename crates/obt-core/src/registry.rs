//! Registry of discovered devices, partitioned into unowned and owned sets.
//!
//! # Invariants
//!
//! - A device UUID is in at most one set at any instant
//! - Recording a device that is already present updates it in place
//! - Snapshots preserve first-discovery order, so menu indices are stable
//!   between two snapshots with no intervening mutation
//!
//! # Thread Safety
//!
//! Both sets live behind one `parking_lot::RwLock`, so moving a device between
//! sets is a single critical section and a snapshot never observes a device in
//! both sets or in neither mid-move. Locks are never held across an await point
//! or a collaborator call.

use crate::device::{DeviceIdentity, DeviceKind};
use crate::identifiers::DeviceId;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct RegistryState {
    unowned: IndexMap<DeviceId, DeviceIdentity>,
    owned: IndexMap<DeviceId, DeviceIdentity>,
}

impl RegistryState {
    fn set(&self, kind: DeviceKind) -> &IndexMap<DeviceId, DeviceIdentity> {
        match kind {
            DeviceKind::Unowned => &self.unowned,
            DeviceKind::Owned => &self.owned,
        }
    }

    fn set_mut(&mut self, kind: DeviceKind) -> &mut IndexMap<DeviceId, DeviceIdentity> {
        match kind {
            DeviceKind::Unowned => &mut self.unowned,
            DeviceKind::Owned => &mut self.owned,
        }
    }
}

/// Whether a record call added a device or refreshed an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Device was not in this set before
    Inserted,
    /// Device was already in this set and its record was replaced
    Updated,
}

/// Shared, concurrency-safe device registry.
///
/// Cloning yields another handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a device reported as unowned
    pub fn record_unowned(&self, identity: DeviceIdentity) -> RecordOutcome {
        self.record(DeviceKind::Unowned, identity)
    }

    /// Record a device reported as owned
    pub fn record_owned(&self, identity: DeviceIdentity) -> RecordOutcome {
        self.record(DeviceKind::Owned, identity)
    }

    /// Insert or update `identity` in the `kind` set.
    ///
    /// If the device is currently in the other set it is moved, since the
    /// device's own report of its ownership state is authoritative.
    pub fn record(&self, kind: DeviceKind, identity: DeviceIdentity) -> RecordOutcome {
        let other = match kind {
            DeviceKind::Unowned => DeviceKind::Owned,
            DeviceKind::Owned => DeviceKind::Unowned,
        };
        let mut state = self.state.write();
        if state.set_mut(other).shift_remove(&identity.id).is_some() {
            debug!(device = %identity.id, from = %other, to = %kind, "Device changed ownership state");
        }
        match state.set_mut(kind).insert(identity.id, identity) {
            Some(_) => RecordOutcome::Updated,
            None => RecordOutcome::Inserted,
        }
    }

    /// Remove a device from the `kind` set, returning its record if it was present
    pub fn remove(&self, device: DeviceId, kind: DeviceKind) -> Option<DeviceIdentity> {
        self.state.write().set_mut(kind).shift_remove(&device)
    }

    /// Point-in-time copy of the `kind` set in first-discovery order
    pub fn snapshot(&self, kind: DeviceKind) -> Vec<DeviceIdentity> {
        self.state.read().set(kind).values().cloned().collect()
    }

    /// Look up a device in the `kind` set
    pub fn get(&self, device: DeviceId, kind: DeviceKind) -> Option<DeviceIdentity> {
        self.state.read().set(kind).get(&device).cloned()
    }

    /// Whether the device is in the `kind` set
    pub fn contains(&self, device: DeviceId, kind: DeviceKind) -> bool {
        self.state.read().set(kind).contains_key(&device)
    }

    /// Which set, if any, holds the device
    pub fn locate(&self, device: DeviceId) -> Option<DeviceKind> {
        let state = self.state.read();
        if state.unowned.contains_key(&device) {
            Some(DeviceKind::Unowned)
        } else if state.owned.contains_key(&device) {
            Some(DeviceKind::Owned)
        } else {
            None
        }
    }

    /// Number of devices in the `kind` set
    pub fn len(&self, kind: DeviceKind) -> usize {
        self.state.read().set(kind).len()
    }

    /// Whether both sets are empty
    pub fn is_empty(&self) -> bool {
        let state = self.state.read();
        state.unowned.is_empty() && state.owned.is_empty()
    }

    /// Drop every device from both sets
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.unowned.clear();
        state.owned.clear();
    }
}
