//! Device discovery for the smarter device manager
//!
//! Walks the device and sysfs roots, filters entry names against the
//! configured patterns and turns every match into a [`DeviceDescriptor`].
//!
//! [`DeviceDescriptor`]: smarter_core::DeviceDescriptor

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod descriptor;
pub mod inventory;
pub mod scanner;

pub use descriptor::{gpu_index, sanitize, DescriptorBuilder};
pub use inventory::discover;
pub use scanner::{find_matching, scan_names, DeviceScan};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::descriptor::{sanitize, DescriptorBuilder};
    pub use crate::inventory::discover;
    pub use crate::scanner::{find_matching, scan_names, DeviceScan};
}
