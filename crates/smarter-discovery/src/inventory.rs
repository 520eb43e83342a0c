//! Inventory building from configuration and scan results

use crate::descriptor::{gpu_index, DescriptorBuilder};
use crate::scanner::{find_matching, scan_names};
use smarter_config::{DeviceConfig, ManagerSettings};
use smarter_core::{DeviceDescriptor, DeviceVariant, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Build the descriptor set for every configured resource family
///
/// Each root is scanned at most once. Patterns are applied in configuration
/// order and every matched name yields its own descriptor. When two matches
/// flatten to the same resource name the first one wins and the other is
/// reported.
pub fn discover(config: &DeviceConfig, settings: &ManagerSettings) -> Result<Vec<DeviceDescriptor>> {
    smarter_config::validate_config(config)?;

    let builder = DescriptorBuilder::new(settings);

    let wants_devices = config.devices.iter().any(|spec| !spec.is_nvidia_gpu());
    let wants_gpus = config.devices.iter().any(|spec| spec.is_nvidia_gpu());

    let device_names = if wants_devices {
        info!(root = %settings.device_root.display(), "Reading existing devices");
        read_names(&settings.device_root, settings.scan_depth)?
    } else {
        Vec::new()
    };

    let sysfs_names = if wants_gpus {
        info!(root = %settings.sysfs_root.display(), "Reading sysfs devices");
        read_names(&settings.sysfs_root, 0)?
    } else {
        Vec::new()
    };

    let mut descriptors = Vec::new();
    let mut seen = HashSet::new();

    for spec in &config.devices {
        let (matched, variant) = if spec.is_nvidia_gpu() {
            info!("Checking nvidia devices");
            let gpus = sysfs_names
                .iter()
                .filter(|name| gpu_index(name).is_some())
                .cloned()
                .collect::<Vec<_>>();
            (gpus, DeviceVariant::GpuSysfs)
        } else {
            info!(pattern = %spec.match_pattern, "Checking devices");
            (
                find_matching(&device_names, &spec.match_pattern)?,
                DeviceVariant::GenericFile,
            )
        };

        for name in matched {
            let descriptor = builder.build(spec, &name, variant);

            if !seen.insert(descriptor.resource_name.clone()) {
                warn!(
                    resource = %descriptor.resource_name,
                    device = %name,
                    pattern = %spec.match_pattern,
                    "Resource name already in use, skipping duplicate match"
                );
                continue;
            }

            info!(
                resource = %descriptor.resource_name,
                backing = %descriptor.backing_path.display(),
                socket = %descriptor.socket_path.display(),
                replicas = descriptor.replica_count,
                pattern = %spec.match_pattern,
                "Creating device"
            );
            descriptors.push(descriptor);
        }
    }

    Ok(descriptors)
}

fn read_names(root: &Path, depth: usize) -> Result<Vec<String>> {
    Ok(scan_names(root, depth)?.collect())
}
