//! Kubelet device plugin instances
//!
//! One [`PluginInstance`] serves the device plugin API for a single
//! discovered resource over its own Unix socket and registers itself with
//! the kubelet. The [`ManagedPlugin`] and [`PluginFactory`] traits are the
//! seam the orchestrator drives instances through.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod allocation;
pub mod health;
pub mod instance;
pub mod lifecycle;
pub mod service;
pub mod transport;

/// Generated kubelet device plugin API (`v1beta1`)
pub mod proto {
    #![allow(missing_docs, unreachable_pub, missing_debug_implementations)]
    tonic::include_proto!("v1beta1");
}

pub use allocation::AllocationPolicy;
pub use health::HealthReporter;
pub use instance::{InstanceFactory, PluginInstance};
pub use lifecycle::{ManagedPlugin, PluginFactory, PluginState};
pub use service::DevicePluginService;
pub use transport::{dial, dial_until, DialError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::health::HealthReporter;
    pub use crate::instance::{InstanceFactory, PluginInstance};
    pub use crate::lifecycle::{ManagedPlugin, PluginFactory, PluginState};
}
