//! Plugin lifecycle seam used by the orchestrator

use async_trait::async_trait;
use smarter_core::{DeviceDescriptor, Result};
use std::fmt;

/// Lifecycle state of a plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    /// No socket, no server
    Stopped,
    /// Socket bound, waiting for the server to accept connections
    Starting,
    /// Server running and reachable
    Serving,
    /// Tearing down
    Stopping,
}

impl PluginState {
    /// Check if the plugin is serving
    pub fn is_serving(&self) -> bool {
        matches!(self, PluginState::Serving)
    }

    /// Check if the plugin is stopped
    pub fn is_stopped(&self) -> bool {
        matches!(self, PluginState::Stopped)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Stopped => write!(f, "stopped"),
            PluginState::Starting => write!(f, "starting"),
            PluginState::Serving => write!(f, "serving"),
            PluginState::Stopping => write!(f, "stopping"),
        }
    }
}

/// A device plugin the orchestrator can bring up and tear down
#[async_trait]
pub trait ManagedPlugin: Send + fmt::Debug {
    /// Resource name the plugin advertises
    fn resource_name(&self) -> &str;

    /// Current lifecycle state
    fn state(&self) -> PluginState;

    /// Start serving and register with the kubelet
    ///
    /// On failure the plugin is left stopped.
    async fn serve(&mut self) -> Result<()>;

    /// Stop serving and release the socket
    ///
    /// Calling this on a plugin that is not running does nothing.
    async fn stop(&mut self) -> Result<()>;
}

/// Creates fresh plugins from descriptors
pub trait PluginFactory: Send + Sync + fmt::Debug {
    /// Plugin type produced
    type Plugin: ManagedPlugin + 'static;

    /// Create a stopped plugin for `descriptor`
    fn create(&self, descriptor: &DeviceDescriptor) -> Self::Plugin;
}
