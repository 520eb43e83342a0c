//! Configuration validation

use crate::{DeviceConfig, ManagerSettings};
use regex::Regex;
use smarter_core::{Error, Result};

/// Validate the device configuration
///
/// Every pattern must compile. No partial configuration is honoured: the
/// first bad pattern fails the whole file.
pub fn validate_config(config: &DeviceConfig) -> Result<()> {
    if config.is_empty() {
        tracing::warn!("No devices configured, nothing will be advertised");
    }

    for spec in &config.devices {
        if spec.max_replicas == 0 {
            tracing::warn!(
                pattern = %spec.match_pattern,
                "nummaxdevices is 0, matched resources will advertise no replicas"
            );
        }

        if spec.is_nvidia_gpu() {
            continue;
        }

        if spec.match_pattern.is_empty() {
            tracing::warn!("Empty devicematch pattern matches every device");
        }

        Regex::new(&spec.match_pattern).map_err(|source| Error::Pattern {
            pattern: spec.match_pattern.clone(),
            source,
        })?;
    }

    Ok(())
}

/// Validate runtime settings
pub fn validate_settings(settings: &ManagerSettings) -> Result<()> {
    if settings.self_check_timeout.is_zero() {
        return Err(Error::Config("self_check_timeout must be > 0".to_string()));
    }

    if settings.register_timeout.is_zero() {
        return Err(Error::Config("register_timeout must be > 0".to_string()));
    }

    if settings.plugin_dir.as_os_str().is_empty() {
        return Err(Error::Config("plugin_dir cannot be empty".to_string()));
    }

    if settings.restart_backoff.is_zero() {
        tracing::warn!("restart_backoff is 0, failed restarts are retried without delay");
    }

    Ok(())
}
