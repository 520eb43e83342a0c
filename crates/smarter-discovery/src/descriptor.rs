//! Descriptor building

use smarter_config::ManagerSettings;
use smarter_core::{
    DesiredResourceSpec, DeviceDescriptor, DeviceVariant, NVIDIA_GPU_PATTERN, RESOURCE_PREFIX,
    SOCKET_PREFIX,
};
use std::path::PathBuf;

/// Flatten a nested device name into a resource/socket name component
///
/// Path separators become underscores. The result never contains `/` and
/// sanitizing twice changes nothing. Names that differ only by `/` versus
/// `_` (`a/b_c`, `a_b/c`) flatten to the same value.
pub fn sanitize(name: &str) -> String {
    name.replace('/', "_")
}

/// GPU index of a sysfs entry named `gpu.<digits>`
pub fn gpu_index(name: &str) -> Option<&str> {
    let index = name.strip_prefix("gpu.")?;
    if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
        Some(index)
    } else {
        None
    }
}

/// Builds descriptors rooted at the configured directories
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    device_root: PathBuf,
    sysfs_root: PathBuf,
    plugin_dir: PathBuf,
}

impl DescriptorBuilder {
    /// Create a builder from the runtime settings
    pub fn new(settings: &ManagerSettings) -> Self {
        Self {
            device_root: settings.device_root.clone(),
            sysfs_root: settings.sysfs_root.clone(),
            plugin_dir: settings.plugin_dir.clone(),
        }
    }

    /// Build the descriptor for one matched entry
    ///
    /// `matched_name` is relative to the device root for
    /// [`DeviceVariant::GenericFile`] and a `gpu.<n>` sysfs entry for
    /// [`DeviceVariant::GpuSysfs`].
    pub fn build(
        &self,
        spec: &DesiredResourceSpec,
        matched_name: &str,
        variant: DeviceVariant,
    ) -> DeviceDescriptor {
        match variant {
            DeviceVariant::GenericFile => {
                let flat = sanitize(matched_name);
                DeviceDescriptor {
                    resource_name: format!("{RESOURCE_PREFIX}{flat}"),
                    socket_path: self.socket_path(&flat),
                    backing_path: self.device_root.join(matched_name),
                    replica_count: spec.max_replicas,
                    variant,
                    variant_id: None,
                }
            }
            DeviceVariant::GpuSysfs => {
                let id = gpu_index(matched_name)
                    .map(str::to_string)
                    .unwrap_or_else(|| sanitize(matched_name));
                let flat = format!("{NVIDIA_GPU_PATTERN}{id}");
                DeviceDescriptor {
                    resource_name: format!("{RESOURCE_PREFIX}{flat}"),
                    socket_path: self.socket_path(&flat),
                    backing_path: self.sysfs_root.join(matched_name),
                    replica_count: spec.max_replicas,
                    variant,
                    variant_id: Some(id),
                }
            }
        }
    }

    fn socket_path(&self, flat_name: &str) -> PathBuf {
        self.plugin_dir
            .join(format!("{SOCKET_PREFIX}{flat_name}.sock"))
    }
}
