//! Device plugin instance bound to one resource

use crate::allocation::AllocationPolicy;
use crate::health::{health_source, run_health_checks, HealthReporter};
use crate::lifecycle::{ManagedPlugin, PluginFactory, PluginState};
use crate::proto::device_plugin_server::DevicePluginServer;
use crate::proto::registration_client::RegistrationClient;
use crate::proto::RegisterRequest;
use crate::service::DevicePluginService;
use crate::transport::{dial, dial_until};
use async_trait::async_trait;
use smarter_config::ManagerSettings;
use smarter_core::{DeviceDescriptor, DeviceSet, Error, Result, DEVICE_PLUGIN_API_VERSION};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, error, info, warn};

/// Time the server gets to finish open calls before it is aborted
const SERVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Buffered health changes per instance
const HEALTH_CHANNEL_CAPACITY: usize = 16;

/// Tasks and handles that exist only while the instance runs
#[derive(Debug)]
struct Running {
    stop: CancellationToken,
    server: JoinHandle<std::result::Result<(), tonic::transport::Error>>,
    health: JoinHandle<()>,
    reporter: Option<HealthReporter>,
}

/// gRPC device plugin server for one discovered resource
///
/// Owns its socket file while running. A stopped instance can be served
/// again; the orchestrator nevertheless creates fresh instances for every
/// restart.
#[derive(Debug)]
pub struct PluginInstance {
    descriptor: DeviceDescriptor,
    settings: Arc<ManagerSettings>,
    devices: DeviceSet,
    policy: AllocationPolicy,
    state: PluginState,
    running: Option<Running>,
}

impl PluginInstance {
    /// Create a stopped instance advertising `descriptor.replica_count`
    /// healthy replicas
    pub fn new(descriptor: DeviceDescriptor, settings: Arc<ManagerSettings>) -> Self {
        let devices = DeviceSet::synthesize(descriptor.replica_count);
        let policy = AllocationPolicy::for_descriptor(&descriptor, &settings);

        Self {
            descriptor,
            settings,
            devices,
            policy,
            state: PluginState::Stopped,
            running: None,
        }
    }

    /// Descriptor this instance serves
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Advertised replicas
    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    /// Allocation grant policy
    pub fn policy(&self) -> &AllocationPolicy {
        &self.policy
    }

    /// Handle for reporting unhealthy replicas, while running with health
    /// checks enabled
    pub fn health_reporter(&self) -> Option<HealthReporter> {
        self.running.as_ref().and_then(|r| r.reporter.clone())
    }

    /// Bind the socket and start the gRPC server
    ///
    /// Returns once the server accepts connections. Any failure leaves the
    /// instance stopped with no socket file and no tasks behind.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::Runtime(format!(
                "plugin '{}' is already running",
                self.descriptor.resource_name
            )));
        }

        self.state = PluginState::Starting;

        match self.launch().await {
            Ok(running) => {
                self.running = Some(running);
                self.state = PluginState::Serving;
                Ok(())
            }
            Err(e) => {
                self.state = PluginState::Stopped;
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<Running> {
        let socket = &self.descriptor.socket_path;
        let resource = &self.descriptor.resource_name;

        remove_socket(socket).await?;

        let listener = UnixListener::bind(socket).map_err(|source| Error::Bind {
            path: socket.clone(),
            source,
        })?;

        let stop = CancellationToken::new();
        let (updates, _) = broadcast::channel(HEALTH_CHANNEL_CAPACITY);

        let service = DevicePluginService::new(
            resource.clone(),
            self.devices.clone(),
            self.policy.clone(),
            stop.clone(),
            updates.clone(),
        );

        let shutdown = stop.clone();
        let server = tokio::spawn(async move {
            Server::builder()
                .add_service(DevicePluginServer::new(service))
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async move {
                    shutdown.cancelled().await
                })
                .await
        });

        debug!(resource = %resource, socket = %socket.display(), "Waiting for plugin server");

        if let Err(e) = wait_ready(socket, self.settings.self_check_timeout).await {
            error!(resource = %resource, error = %e, "Plugin server did not become ready");
            stop.cancel();
            server.abort();
            if let Err(cleanup) = remove_socket(socket).await {
                warn!(resource = %resource, error = %cleanup, "Failed to clean up socket");
            }
            return Err(e);
        }

        let (reporter, events) = match health_source(&self.settings.health_checks) {
            Some((reporter, events)) => (Some(reporter), Some(events)),
            None => (None, None),
        };

        let health = tokio::spawn(run_health_checks(
            resource.clone(),
            self.devices.clone(),
            events,
            updates,
            stop.clone(),
        ));

        Ok(Running {
            stop,
            server,
            health,
            reporter,
        })
    }

    /// Announce this plugin's socket and resource to the kubelet
    pub async fn register(&self) -> Result<()> {
        let resource = &self.descriptor.resource_name;

        if self.running.is_none() {
            return Err(Error::registration(resource, "plugin server is not running"));
        }

        let kubelet = self.settings.kubelet_socket();
        let timeout = self.settings.register_timeout;
        let deadline = Instant::now() + timeout;

        let channel = dial_until(&kubelet, deadline)
            .await
            .map_err(|e| Error::registration(resource, e))?;

        let request = RegisterRequest {
            version: DEVICE_PLUGIN_API_VERSION.to_string(),
            endpoint: self.descriptor.socket_basename(),
            resource_name: resource.clone(),
            options: None,
        };

        let mut client = RegistrationClient::new(channel);
        timeout_at(deadline, client.register(request))
            .await
            .map_err(|_| Error::registration(resource, format!("no reply within {timeout:?}")))?
            .map_err(|status| Error::registration(resource, status.message()))?;

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        let resource = &self.descriptor.resource_name;
        info!(resource = %resource, "Stopping plugin server");
        self.state = PluginState::Stopping;

        running.stop.cancel();
        drop(running.reporter);

        let mut server = running.server;
        match tokio::time::timeout(SERVER_SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(resource = %resource, error = %e, "Plugin server failed"),
            Ok(Err(e)) => warn!(resource = %resource, error = %e, "Plugin server task failed"),
            Err(_) => {
                warn!(resource = %resource, "Plugin server did not stop in time, aborting");
                server.abort();
            }
        }

        if let Err(e) = running.health.await {
            warn!(resource = %resource, error = %e, "Health task failed");
        }

        self.state = PluginState::Stopped;
        remove_socket(&self.descriptor.socket_path).await
    }
}

#[async_trait]
impl ManagedPlugin for PluginInstance {
    fn resource_name(&self) -> &str {
        &self.descriptor.resource_name
    }

    fn state(&self) -> PluginState {
        self.state
    }

    async fn serve(&mut self) -> Result<()> {
        let resource = self.descriptor.resource_name.clone();

        if let Err(e) = self.start().await {
            error!(resource = %resource, error = %e, "Could not start device plugin");
            return Err(e);
        }
        info!(
            resource = %resource,
            socket = %self.descriptor.socket_path.display(),
            "Serving device plugin"
        );

        if let Err(e) = self.register().await {
            error!(resource = %resource, error = %e, "Could not register device plugin");
            if let Err(stop_err) = self.shutdown().await {
                warn!(resource = %resource, error = %stop_err, "Failed to stop unregistered plugin");
            }
            return Err(e);
        }
        info!(resource = %resource, "Registered device plugin with kubelet");

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.shutdown().await
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.stop.cancel();
        }
    }
}

/// Wait until a gRPC server answers on `socket`
async fn wait_ready(socket: &Path, timeout: Duration) -> Result<()> {
    dial(socket, timeout)
        .await
        .map(drop)
        .map_err(|e| {
            debug!(socket = %socket.display(), error = %e, "Self-check dial failed");
            Error::SelfCheckTimeout {
                path: socket.to_path_buf(),
                timeout,
            }
        })
}

async fn remove_socket(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Creates [`PluginInstance`]s sharing one set of settings
#[derive(Debug, Clone)]
pub struct InstanceFactory {
    settings: Arc<ManagerSettings>,
}

impl InstanceFactory {
    /// Create a factory
    pub fn new(settings: Arc<ManagerSettings>) -> Self {
        Self { settings }
    }

    /// Settings handed to every instance
    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }
}

impl PluginFactory for InstanceFactory {
    type Plugin = PluginInstance;

    fn create(&self, descriptor: &DeviceDescriptor) -> PluginInstance {
        PluginInstance::new(descriptor.clone(), Arc::clone(&self.settings))
    }
}
