//! Resource model and well-known constants

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Device plugin API version announced at registration
pub const DEVICE_PLUGIN_API_VERSION: &str = "v1beta1";

/// Directory where the kubelet expects device plugin sockets
pub const DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins/";

/// File name of the kubelet registration socket inside [`DEVICE_PLUGIN_PATH`]
pub const KUBELET_SOCKET_NAME: &str = "kubelet.sock";

/// Prefix of every advertised resource name
pub const RESOURCE_PREFIX: &str = "smarter-devices/";

/// Prefix of every plugin socket file name
pub const SOCKET_PREFIX: &str = "smarter-";

/// Match pattern that selects NVIDIA GPUs from sysfs instead of device nodes
pub const NVIDIA_GPU_PATTERN: &str = "nvidia-gpu";

/// Environment variable handed to containers allocated a GPU
pub const NVIDIA_VISIBLE_DEVICES_ENV: &str = "NVIDIA_VISIBLE_DEVICES";

/// One configured resource family
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesiredResourceSpec {
    /// Regular expression matched against device names
    #[serde(rename = "devicematch", alias = "match_pattern")]
    pub match_pattern: String,

    /// Number of replicas advertised per matched device
    #[serde(rename = "nummaxdevices", alias = "max_replicas")]
    pub max_replicas: u32,
}

impl DesiredResourceSpec {
    /// Create a new resource spec
    pub fn new(match_pattern: impl Into<String>, max_replicas: u32) -> Self {
        Self {
            match_pattern: match_pattern.into(),
            max_replicas,
        }
    }

    /// Whether this spec selects GPUs from sysfs
    pub fn is_nvidia_gpu(&self) -> bool {
        self.match_pattern == NVIDIA_GPU_PATTERN
    }
}

/// Kind of backing resource behind a descriptor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceVariant {
    /// A device node handed to the container as-is
    GenericFile,
    /// An NVIDIA GPU discovered through sysfs
    GpuSysfs,
}

impl fmt::Display for DeviceVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceVariant::GenericFile => write!(f, "generic-file"),
            DeviceVariant::GpuSysfs => write!(f, "gpu-sysfs"),
        }
    }
}

/// Normalized description of one advertised resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Resource name advertised to the kubelet
    pub resource_name: String,

    /// Unix socket the plugin serves on
    pub socket_path: PathBuf,

    /// Device node or sysfs entry backing the resource
    pub backing_path: PathBuf,

    /// Number of replicas advertised
    pub replica_count: u32,

    /// Backing resource kind
    pub variant: DeviceVariant,

    /// Variant-specific identifier (GPU index)
    #[serde(default)]
    pub variant_id: Option<String>,
}

impl DeviceDescriptor {
    /// Socket file name, as announced to the kubelet
    pub fn socket_basename(&self) -> String {
        self.socket_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Path of the kubelet registration socket inside `plugin_dir`
pub fn kubelet_socket_in(plugin_dir: &Path) -> PathBuf {
    plugin_dir.join(KUBELET_SOCKET_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_yaml_keys() {
        let yaml = "- devicematch: ^snd$\n  nummaxdevices: 20\n";
        let specs: Vec<DesiredResourceSpec> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(specs, vec![DesiredResourceSpec::new("^snd$", 20)]);
    }

    #[test]
    fn test_nvidia_pattern() {
        assert!(DesiredResourceSpec::new("nvidia-gpu", 1).is_nvidia_gpu());
        assert!(!DesiredResourceSpec::new("nvidia.*", 1).is_nvidia_gpu());
    }

    #[test]
    fn test_socket_basename() {
        let descriptor = DeviceDescriptor {
            resource_name: "smarter-devices/ttyUSB0".to_string(),
            socket_path: PathBuf::from("/var/lib/kubelet/device-plugins/smarter-ttyUSB0.sock"),
            backing_path: PathBuf::from("/dev/ttyUSB0"),
            replica_count: 1,
            variant: DeviceVariant::GenericFile,
            variant_id: None,
        };
        assert_eq!(descriptor.socket_basename(), "smarter-ttyUSB0.sock");
    }

    #[test]
    fn test_kubelet_socket_path() {
        assert_eq!(
            kubelet_socket_in(Path::new(DEVICE_PLUGIN_PATH)),
            PathBuf::from("/var/lib/kubelet/device-plugins/kubelet.sock")
        );
    }
}
