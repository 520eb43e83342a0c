//! Restart loop keeping every resource's plugin registered

use crate::events::{EventSources, ManagerEvent};
use crate::watcher::WatchEvent;
use crate::RuntimeState;
use smarter_core::{DeviceDescriptor, Result};
use smarter_plugin::{ManagedPlugin, PluginFactory};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, warn};

/// Drives one plugin per descriptor through restarts and shutdown
///
/// The descriptor set is fixed at construction. Every restart stops all
/// running plugins and serves fresh ones in descriptor order; the first
/// failure aborts the batch and leaves the restart pending.
#[derive(Debug)]
pub struct Orchestrator<F: PluginFactory> {
    factory: F,
    descriptors: Vec<DeviceDescriptor>,
    plugins: Vec<F::Plugin>,
    restart_pending: bool,
    restart_attempts: u32,
    restart_backoff: Duration,
    state: RuntimeState,
}

impl<F: PluginFactory> Orchestrator<F> {
    /// Create an orchestrator with a restart pending
    pub fn new(factory: F, descriptors: Vec<DeviceDescriptor>, restart_backoff: Duration) -> Self {
        Self {
            factory,
            descriptors,
            plugins: Vec::new(),
            restart_pending: true,
            restart_attempts: 0,
            restart_backoff,
            state: RuntimeState::Initializing,
        }
    }

    /// Resources the orchestrator manages, in serve order
    pub fn descriptors(&self) -> &[DeviceDescriptor] {
        &self.descriptors
    }

    /// Plugins started by the latest batch
    pub fn plugins(&self) -> &[F::Plugin] {
        &self.plugins
    }

    /// Live plugin for a resource name
    pub fn plugin(&self, resource_name: &str) -> Option<&F::Plugin> {
        self.plugins
            .iter()
            .find(|p| p.resource_name() == resource_name)
    }

    /// Whether the next loop iteration restarts every plugin
    pub fn restart_pending(&self) -> bool {
        self.restart_pending
    }

    /// Failed batches since the last successful one
    pub fn restart_attempts(&self) -> u32 {
        self.restart_attempts
    }

    /// Current runtime state
    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Ask for a restart on the next loop iteration
    pub fn request_restart(&mut self) {
        self.restart_pending = true;
    }

    /// Stop every plugin, then serve a fresh one per descriptor in order
    ///
    /// Returns the first serve error. Plugins served before the failure keep
    /// running until the next restart or shutdown.
    pub async fn restart_all(&mut self) -> Result<()> {
        self.restart_pending = true;
        self.stop_all().await;

        for descriptor in &self.descriptors {
            let mut plugin = self.factory.create(descriptor);
            if let Err(e) = plugin.serve().await {
                self.restart_attempts = self.restart_attempts.saturating_add(1);
                return Err(e);
            }
            self.plugins.push(plugin);
        }

        self.restart_pending = false;
        self.restart_attempts = 0;
        Ok(())
    }

    /// Stop every plugin in serve order
    ///
    /// Stop failures are logged and do not prevent the remaining plugins
    /// from being stopped.
    pub async fn stop_all(&mut self) {
        for mut plugin in self.plugins.drain(..) {
            if let Err(e) = plugin.stop().await {
                warn!(resource = %plugin.resource_name(), error = %e, "Failed to stop device plugin");
            }
        }
    }

    /// Stop every plugin and leave the loop state stopped
    pub async fn shutdown(&mut self) {
        self.state = RuntimeState::ShuttingDown;
        info!(plugins = self.plugins.len(), "Stopping device plugins");
        self.stop_all().await;
        self.state = RuntimeState::Stopped;
    }

    /// Run until a shutdown signal arrives or every event source closes
    ///
    /// Failed batches are retried after the restart backoff. Events keep
    /// being handled while a retry is scheduled, and a restart request
    /// cancels the wait.
    pub async fn run(&mut self, mut sources: EventSources) -> Result<()> {
        self.state = RuntimeState::Running;
        let mut retry_at: Option<Instant> = None;

        loop {
            if self.restart_pending && retry_at.is_none() {
                info!(
                    resources = self.descriptors.len(),
                    attempt = self.restart_attempts + 1,
                    "Starting device plugins"
                );

                match self.restart_all().await {
                    Ok(()) => info!(plugins = self.plugins.len(), "All device plugins registered"),
                    Err(e) => {
                        error!(
                            error = %e,
                            attempts = self.restart_attempts,
                            backoff = ?self.restart_backoff,
                            "Device plugin restart failed, retrying"
                        );
                        retry_at = Some(Instant::now() + self.restart_backoff);
                    }
                }
            }

            let event = tokio::select! {
                event = sources.next() => event,
                _ = wait_until(retry_at), if retry_at.is_some() => {
                    retry_at = None;
                    continue;
                }
            };

            let Some(event) = event else {
                info!("All event sources closed");
                break;
            };

            match event {
                ManagerEvent::Watch(WatchEvent::KubeletRestarted) => {
                    info!("Kubelet socket created, restarting device plugins");
                    self.request_restart();
                    retry_at = None;
                }
                ManagerEvent::Watch(WatchEvent::Error(e)) => {
                    warn!(error = %e, "Socket directory watch error");
                }
                ManagerEvent::Signal(signal) if signal.is_reload() => {
                    info!(signal = %signal, "Reload requested, restarting device plugins");
                    self.request_restart();
                    retry_at = None;
                }
                ManagerEvent::Signal(signal) => {
                    info!(signal = %signal, "Shutdown requested");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
