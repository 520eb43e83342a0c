//! # Smarter Core
//!
//! Core types and error handling shared by every crate of the smarter
//! device manager:
//! - The resource model (`DesiredResourceSpec`, `DeviceDescriptor`)
//! - Advertised replicas (`Device`, `DeviceSet`)
//! - Well-known kubelet paths and protocol constants
//! - The error taxonomy

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod device;
pub mod error;
pub mod types;

pub use device::{Device, DeviceHealth, DeviceSet};
pub use error::{Error, Result};
pub use types::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::device::{Device, DeviceHealth, DeviceSet};
    pub use crate::error::{Error, Result};
    pub use crate::types::*;
}
