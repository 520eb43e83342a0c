//! Settings builder

use crate::types::{HealthCheckConfig, ManagerSettings};
use std::path::PathBuf;
use std::time::Duration;

/// Builder for constructing runtime settings programmatically
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    settings: ManagerSettings,
}

impl SettingsBuilder {
    /// Create a new builder starting from the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device node root
    pub fn device_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.device_root = path.into();
        self
    }

    /// Set the GPU sysfs root
    pub fn sysfs_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.sysfs_root = path.into();
        self
    }

    /// Set the kubelet device plugin directory
    pub fn plugin_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.plugin_dir = path.into();
        self
    }

    /// Set the recursion depth below the device root
    pub fn scan_depth(mut self, depth: usize) -> Self {
        self.settings.scan_depth = depth;
        self
    }

    /// Set the readiness deadline after bind
    pub fn self_check_timeout(mut self, timeout: Duration) -> Self {
        self.settings.self_check_timeout = timeout;
        self
    }

    /// Set the kubelet registration deadline
    pub fn register_timeout(mut self, timeout: Duration) -> Self {
        self.settings.register_timeout = timeout;
        self
    }

    /// Set the delay between failed restart batches
    pub fn restart_backoff(mut self, backoff: Duration) -> Self {
        self.settings.restart_backoff = backoff;
        self
    }

    /// Attach GPU control devices to GPU allocations
    pub fn pass_device_specs(mut self, enabled: bool) -> Self {
        self.settings.pass_device_specs = enabled;
        self
    }

    /// Set the health-check toggles
    pub fn health_checks(mut self, checks: HealthCheckConfig) -> Self {
        self.settings.health_checks = checks;
        self
    }

    /// Build and validate the settings
    pub fn build(self) -> smarter_core::Result<ManagerSettings> {
        crate::validator::validate_settings(&self.settings)?;
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_builder() {
        let settings = SettingsBuilder::new()
            .device_root("/tmp/dev")
            .plugin_dir("/tmp/plugins")
            .register_timeout(Duration::from_millis(200))
            .pass_device_specs(true)
            .build()
            .unwrap();

        assert_eq!(settings.device_root, PathBuf::from("/tmp/dev"));
        assert_eq!(settings.kubelet_socket(), PathBuf::from("/tmp/plugins/kubelet.sock"));
        assert_eq!(settings.register_timeout, Duration::from_millis(200));
        assert!(settings.pass_device_specs);
        assert_eq!(settings.scan_depth, 10);
    }

    #[test]
    fn test_builder_rejects_zero_timeout() {
        let result = SettingsBuilder::new()
            .self_check_timeout(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }
}
