//! Configuration types

use serde::{Deserialize, Serialize};
use smarter_core::{kubelet_socket_in, DesiredResourceSpec, DEVICE_PLUGIN_PATH};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable listing the health-check categories to disable
pub const ENV_DISABLE_HEALTH_CHECKS: &str = "DP_DISABLE_HEALTHCHECKS";

/// Health-check category fed by GPU XID events
pub const XID_HEALTH_CHECK: &str = "xids";

/// Every health-check category, used when the toggle is `all`
pub const ALL_HEALTH_CHECKS: &str = "xids";

/// Ordered list of configured resource families
///
/// The file is a bare list:
///
/// ```yaml
/// - devicematch: ^ttyUSB[0-9]+$
///   nummaxdevices: 1
/// - devicematch: nvidia-gpu
///   nummaxdevices: 4
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct DeviceConfig {
    /// Resource families, in file order
    pub devices: Vec<DesiredResourceSpec>,
}

impl DeviceConfig {
    /// Create a configuration from a list of specs
    pub fn new(devices: Vec<DesiredResourceSpec>) -> Self {
        Self { devices }
    }

    /// Number of configured families
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether nothing is configured
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Health-check toggles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthCheckConfig {
    disabled: String,
}

impl HealthCheckConfig {
    /// Read the toggle from [`ENV_DISABLE_HEALTH_CHECKS`]
    pub fn from_env() -> Self {
        Self::from_value(&std::env::var(ENV_DISABLE_HEALTH_CHECKS).unwrap_or_default())
    }

    /// Parse a toggle value such as `all`, `xids` or an empty string
    pub fn from_value(value: &str) -> Self {
        let mut disabled = value.trim().to_lowercase();
        if disabled == "all" {
            disabled = ALL_HEALTH_CHECKS.to_string();
        }
        Self { disabled }
    }

    /// Whether the named category is disabled
    pub fn is_disabled(&self, check: &str) -> bool {
        self.disabled.contains(check)
    }

    /// Whether XID health events are consumed
    pub fn xids_enabled(&self) -> bool {
        !self.is_disabled(XID_HEALTH_CHECK)
    }
}

/// Runtime settings of the manager
///
/// Defaults match a standard kubelet node; tests point the roots at
/// temporary directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Root scanned for device nodes
    pub device_root: PathBuf,

    /// Root scanned for GPU sysfs entries
    pub sysfs_root: PathBuf,

    /// Kubelet device plugin directory
    pub plugin_dir: PathBuf,

    /// Recursion depth below `device_root`
    pub scan_depth: usize,

    /// Deadline for the post-bind readiness connection
    pub self_check_timeout: Duration,

    /// Deadline for reaching the kubelet registration socket
    pub register_timeout: Duration,

    /// Delay between failed restart batches (zero retries immediately)
    pub restart_backoff: Duration,

    /// Attach GPU control device nodes to GPU allocations
    pub pass_device_specs: bool,

    /// Health-check toggles
    pub health_checks: HealthCheckConfig,
}

impl ManagerSettings {
    /// Path of the kubelet registration socket
    pub fn kubelet_socket(&self) -> PathBuf {
        kubelet_socket_in(&self.plugin_dir)
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            device_root: PathBuf::from(default_device_root()),
            sysfs_root: PathBuf::from(default_sysfs_root()),
            plugin_dir: PathBuf::from(DEVICE_PLUGIN_PATH),
            scan_depth: default_scan_depth(),
            self_check_timeout: default_self_check_timeout(),
            register_timeout: default_register_timeout(),
            restart_backoff: default_restart_backoff(),
            pass_device_specs: false,
            health_checks: HealthCheckConfig::default(),
        }
    }
}

fn default_device_root() -> &'static str {
    "/dev"
}

fn default_sysfs_root() -> &'static str {
    "/sys/devices"
}

fn default_scan_depth() -> usize {
    10
}

fn default_self_check_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_register_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_restart_backoff() -> Duration {
    Duration::from_secs(1)
}
