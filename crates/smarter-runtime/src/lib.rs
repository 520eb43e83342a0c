//! # Smarter Runtime
//!
//! Keeps one device plugin per discovered resource registered with the
//! kubelet:
//! - Restart batches that stop every plugin and serve fresh ones
//! - Kubelet restart detection through the plugin socket directory
//! - Reload on `SIGHUP`, shutdown on `SIGINT`, `SIGTERM` and `SIGQUIT`

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod events;
pub mod orchestrator;
pub mod signals;
pub mod watcher;

pub use events::{EventSources, ManagerEvent};
pub use orchestrator::Orchestrator;
pub use signals::ManagerSignal;
pub use watcher::{is_kubelet_restart, SocketDirWatcher, WatchEvent};

/// Runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Orchestrator created, loop not entered yet
    Initializing,
    /// Event loop running
    Running,
    /// Stopping every plugin
    ShuttingDown,
    /// Event loop exited
    Stopped,
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::events::{EventSources, ManagerEvent};
    pub use crate::orchestrator::Orchestrator;
    pub use crate::signals::ManagerSignal;
    pub use crate::RuntimeState;
}
