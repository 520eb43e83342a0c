//! Container allocation grants

use crate::proto::{ContainerAllocateResponse, DeviceSpec};
use smarter_config::ManagerSettings;
use smarter_core::{DeviceDescriptor, DeviceVariant, NVIDIA_VISIBLE_DEVICES_ENV};
use std::path::{Path, PathBuf};

/// Driver control nodes a GPU container needs besides the GPU itself
pub const NVIDIA_CONTROL_DEVICES: [&str; 4] = [
    "nvidiactl",
    "nvidia-uvm",
    "nvidia-uvm-tools",
    "nvidia-modeset",
];

/// Device node permissions granted to containers
const DEVICE_PERMISSIONS: &str = "rw";

/// What a container receives when one of a resource's replicas is allocated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationPolicy {
    /// Expose the backing device node at the same path inside the container
    DeviceNode {
        /// Host device node
        path: PathBuf,
    },

    /// Select the GPU through the container runtime's visible-devices variable
    NvidiaGpu {
        /// GPU index
        gpu_id: String,
        /// Control nodes to pass as device specs, empty when disabled
        control_devices: Vec<PathBuf>,
    },
}

impl AllocationPolicy {
    /// Policy for a discovered resource
    pub fn for_descriptor(descriptor: &DeviceDescriptor, settings: &ManagerSettings) -> Self {
        match descriptor.variant {
            DeviceVariant::GenericFile => AllocationPolicy::DeviceNode {
                path: descriptor.backing_path.clone(),
            },
            DeviceVariant::GpuSysfs => {
                let control_devices = if settings.pass_device_specs {
                    NVIDIA_CONTROL_DEVICES
                        .iter()
                        .map(|name| settings.device_root.join(name))
                        .collect()
                } else {
                    Vec::new()
                };

                AllocationPolicy::NvidiaGpu {
                    gpu_id: descriptor.variant_id.clone().unwrap_or_default(),
                    control_devices,
                }
            }
        }
    }

    /// Grant for one container
    ///
    /// Every container gets the same grant regardless of which replica ids it
    /// was assigned: replicas share one physical device.
    pub fn container_response(&self) -> ContainerAllocateResponse {
        let mut response = ContainerAllocateResponse::default();

        match self {
            AllocationPolicy::DeviceNode { path } => {
                response.devices.push(device_spec(path));
            }
            AllocationPolicy::NvidiaGpu {
                gpu_id,
                control_devices,
            } => {
                response
                    .envs
                    .insert(NVIDIA_VISIBLE_DEVICES_ENV.to_string(), gpu_id.clone());
                response.devices.extend(
                    control_devices
                        .iter()
                        .filter(|path| path.exists())
                        .map(|path| device_spec(path)),
                );
            }
        }

        response
    }
}

fn device_spec(path: &Path) -> DeviceSpec {
    let path = path.to_string_lossy().into_owned();
    DeviceSpec {
        container_path: path.clone(),
        host_path: path,
        permissions: DEVICE_PERMISSIONS.to_string(),
    }
}
