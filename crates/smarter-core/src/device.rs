//! Advertised replicas and their health

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Health of a single replica
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceHealth {
    /// Replica can be allocated
    Healthy,
    /// Replica must not be allocated
    Unhealthy,
}

impl DeviceHealth {
    /// Wire value understood by the kubelet
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceHealth::Healthy => "Healthy",
            DeviceHealth::Unhealthy => "Unhealthy",
        }
    }
}

impl fmt::Display for DeviceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One synthetic replica of a resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    /// Replica id, unique within its resource
    pub id: String,

    /// Current health
    pub health: DeviceHealth,
}

/// Fixed-membership set of replicas shared between a plugin's tasks
///
/// Membership never changes after construction. Health only moves from
/// `Healthy` to `Unhealthy`.
#[derive(Debug, Clone)]
pub struct DeviceSet {
    devices: Arc<RwLock<Vec<Device>>>,
}

impl DeviceSet {
    /// Synthesize `count` healthy replicas with ids `"0"..count`
    pub fn synthesize(count: u32) -> Self {
        let devices = (0..count)
            .map(|i| Device {
                id: i.to_string(),
                health: DeviceHealth::Healthy,
            })
            .collect();

        Self {
            devices: Arc::new(RwLock::new(devices)),
        }
    }

    /// Number of replicas
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Whether the set has no replicas
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Whether `id` names a replica of this set
    pub fn contains(&self, id: &str) -> bool {
        self.devices.read().iter().any(|d| d.id == id)
    }

    /// Mark a replica unhealthy
    ///
    /// Returns `true` only when the health actually changed.
    pub fn mark_unhealthy(&self, id: &str) -> bool {
        let mut devices = self.devices.write();
        match devices.iter_mut().find(|d| d.id == id) {
            Some(device) if device.health == DeviceHealth::Healthy => {
                device.health = DeviceHealth::Unhealthy;
                true
            }
            _ => false,
        }
    }

    /// Copy of the current replica list
    pub fn snapshot(&self) -> Vec<Device> {
        self.devices.read().clone()
    }
}
