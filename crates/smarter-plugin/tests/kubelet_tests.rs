//! Plugin instances against a fake kubelet on a temporary socket

use smarter_config::{HealthCheckConfig, ManagerSettings, SettingsBuilder};
use smarter_core::{DeviceDescriptor, DeviceVariant, Error, NVIDIA_VISIBLE_DEVICES_ENV};
use smarter_plugin::proto::device_plugin_client::DevicePluginClient;
use smarter_plugin::proto::registration_server::{Registration, RegistrationServer};
use smarter_plugin::proto::{
    AllocateRequest, ContainerAllocateRequest, Empty, RegisterRequest,
};
use smarter_plugin::{dial, InstanceFactory, ManagedPlugin, PluginFactory, PluginState};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_stream::StreamExt;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

#[derive(Clone, Default)]
struct FakeKubelet {
    registered: Arc<Mutex<Vec<RegisterRequest>>>,
    reply_delay: Duration,
}

#[tonic::async_trait]
impl Registration for FakeKubelet {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<Empty>, Status> {
        self.registered.lock().unwrap().push(request.into_inner());
        tokio::time::sleep(self.reply_delay).await;
        Ok(Response::new(Empty {}))
    }
}

fn spawn_kubelet(plugin_dir: &Path) -> (FakeKubelet, tokio::task::JoinHandle<()>) {
    let kubelet = FakeKubelet::default();
    let listener = UnixListener::bind(plugin_dir.join("kubelet.sock")).unwrap();
    let handle = tokio::spawn(run_kubelet(listener, kubelet.clone()));
    (kubelet, handle)
}

async fn run_kubelet(listener: UnixListener, kubelet: FakeKubelet) {
    let _ = tonic::transport::Server::builder()
        .add_service(RegistrationServer::new(kubelet))
        .serve_with_incoming(UnixListenerStream::new(listener))
        .await;
}

fn settings(dir: &Path, pass_device_specs: bool) -> Arc<ManagerSettings> {
    Arc::new(
        SettingsBuilder::new()
            .device_root(dir)
            .plugin_dir(dir)
            .self_check_timeout(Duration::from_secs(5))
            .register_timeout(Duration::from_secs(1))
            .pass_device_specs(pass_device_specs)
            .health_checks(HealthCheckConfig::default())
            .build()
            .unwrap(),
    )
}

fn generic(dir: &Path, name: &str, replicas: u32) -> DeviceDescriptor {
    DeviceDescriptor {
        resource_name: format!("smarter-devices/{name}"),
        socket_path: dir.join(format!("smarter-{name}.sock")),
        backing_path: PathBuf::from("/dev").join(name),
        replica_count: replicas,
        variant: DeviceVariant::GenericFile,
        variant_id: None,
    }
}

fn gpu(dir: &Path, id: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        resource_name: format!("smarter-devices/nvidia-gpu{id}"),
        socket_path: dir.join(format!("smarter-nvidia-gpu{id}.sock")),
        backing_path: PathBuf::from("/sys/devices").join(format!("gpu.{id}")),
        replica_count: 1,
        variant: DeviceVariant::GpuSysfs,
        variant_id: Some(id.to_string()),
    }
}

async fn plugin_client(socket: &Path) -> DevicePluginClient<Channel> {
    let channel = dial(socket, Duration::from_secs(5)).await.unwrap();
    DevicePluginClient::new(channel)
}

#[tokio::test]
async fn test_serve_registers_with_kubelet() {
    let dir = tempfile::tempdir().unwrap();
    let (kubelet, server) = spawn_kubelet(dir.path());
    let factory = InstanceFactory::new(settings(dir.path(), false));
    let descriptor = generic(dir.path(), "ttyUSB0", 2);

    let mut instance = factory.create(&descriptor);
    instance.serve().await.unwrap();

    assert_eq!(instance.state(), PluginState::Serving);
    assert!(descriptor.socket_path.exists());

    {
        let registered = kubelet.registered.lock().unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].version, "v1beta1");
        assert_eq!(registered[0].endpoint, "smarter-ttyUSB0.sock");
        assert_eq!(registered[0].resource_name, "smarter-devices/ttyUSB0");
    }

    instance.stop().await.unwrap();
    assert!(!descriptor.socket_path.exists());
    instance.stop().await.unwrap();

    server.abort();
}

#[tokio::test]
async fn test_kubelet_absent_fails_registration() {
    let dir = tempfile::tempdir().unwrap();
    let factory = InstanceFactory::new(settings(dir.path(), false));
    let descriptor = generic(dir.path(), "snd", 1);

    let mut instance = factory.create(&descriptor);
    let err = instance.serve().await.unwrap_err();

    assert!(matches!(err, Error::Registration { .. }));
    assert!(instance.state().is_stopped());
    assert!(!descriptor.socket_path.exists());
}

#[tokio::test]
async fn test_list_and_watch_reports_health_changes() {
    let dir = tempfile::tempdir().unwrap();
    let (_kubelet, server) = spawn_kubelet(dir.path());
    let factory = InstanceFactory::new(settings(dir.path(), false));
    let descriptor = generic(dir.path(), "ttyUSB0", 2);

    let mut instance = factory.create(&descriptor);
    instance.serve().await.unwrap();

    let mut client = plugin_client(&descriptor.socket_path).await;
    let mut stream = client
        .list_and_watch(Empty {})
        .await
        .unwrap()
        .into_inner();

    let first = stream.next().await.unwrap().unwrap();
    let ids: Vec<_> = first.devices.iter().map(|d| d.id.clone()).collect();
    assert_eq!(ids, vec!["0", "1"]);
    assert!(first.devices.iter().all(|d| d.health == "Healthy"));

    let reporter = instance.health_reporter().unwrap();
    assert!(reporter.report_unhealthy("1").await);

    let second = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(second.devices[0].health, "Healthy");
    assert_eq!(second.devices[1].health, "Unhealthy");

    instance.stop().await.unwrap();

    let end = tokio::time::timeout(Duration::from_secs(3), stream.next())
        .await
        .unwrap();
    assert!(end.is_none());
    assert!(reporter.is_closed());

    server.abort();
}

#[tokio::test]
async fn test_allocate_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let (_kubelet, server) = spawn_kubelet(dir.path());
    let factory = InstanceFactory::new(settings(dir.path(), false));
    let descriptor = generic(dir.path(), "ttyUSB0", 2);

    let mut instance = factory.create(&descriptor);
    instance.serve().await.unwrap();
    let mut client = plugin_client(&descriptor.socket_path).await;

    let granted = client
        .allocate(AllocateRequest {
            container_requests: vec![ContainerAllocateRequest {
                devices_ids: vec!["0".to_string(), "1".to_string()],
            }],
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(granted.container_responses.len(), 1);
    assert_eq!(granted.container_responses[0].devices[0].host_path, "/dev/ttyUSB0");

    let status = client
        .allocate(AllocateRequest {
            container_requests: vec![ContainerAllocateRequest {
                devices_ids: vec!["0".to_string(), "2".to_string()],
            }],
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    drop(client);
    instance.stop().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_gpu_allocation_sets_visible_devices() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("nvidiactl"), b"").unwrap();
    let (_kubelet, server) = spawn_kubelet(dir.path());
    let factory = InstanceFactory::new(settings(dir.path(), true));
    let descriptor = gpu(dir.path(), "1");

    let mut instance = factory.create(&descriptor);
    instance.serve().await.unwrap();
    let mut client = plugin_client(&descriptor.socket_path).await;

    let granted = client
        .allocate(AllocateRequest {
            container_requests: vec![ContainerAllocateRequest {
                devices_ids: vec!["0".to_string()],
            }],
        })
        .await
        .unwrap()
        .into_inner();

    let grant = &granted.container_responses[0];
    assert_eq!(
        grant.envs.get(NVIDIA_VISIBLE_DEVICES_ENV).map(String::as_str),
        Some("1")
    );
    let hosts: Vec<_> = grant.devices.iter().map(|d| d.host_path.clone()).collect();
    assert_eq!(
        hosts,
        vec![dir.path().join("nvidiactl").to_string_lossy().into_owned()]
    );

    drop(client);
    instance.stop().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_undeletable_stale_path_fails_before_dialing_kubelet() {
    let dir = tempfile::tempdir().unwrap();
    let (kubelet, server) = spawn_kubelet(dir.path());
    let factory = InstanceFactory::new(settings(dir.path(), false));
    let descriptor = generic(dir.path(), "ttyUSB0", 1);

    // A non-empty directory where the socket should go cannot be unlinked
    std::fs::create_dir(&descriptor.socket_path).unwrap();
    std::fs::write(descriptor.socket_path.join("leftover"), b"x").unwrap();

    let mut instance = factory.create(&descriptor);
    let err = instance.serve().await.unwrap_err();

    match err {
        Error::Cleanup { path, .. } => assert_eq!(path, descriptor.socket_path),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(instance.state(), PluginState::Stopped);
    assert!(instance.health_reporter().is_none());
    assert!(kubelet.registered.lock().unwrap().is_empty());
    assert!(descriptor.socket_path.join("leftover").exists());

    server.abort();
}

#[tokio::test]
async fn test_register_shares_one_deadline_between_dial_and_call() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Arc::new(
        SettingsBuilder::new()
            .device_root(dir.path())
            .plugin_dir(dir.path())
            .self_check_timeout(Duration::from_secs(5))
            .register_timeout(Duration::from_secs(1))
            .build()
            .unwrap(),
    );
    let factory = InstanceFactory::new(settings);
    let mut instance = factory.create(&generic(dir.path(), "ttyUSB0", 1));
    instance.start().await.unwrap();

    // Kubelet shows up late and then never answers
    let kubelet = FakeKubelet {
        reply_delay: Duration::from_secs(10),
        ..FakeKubelet::default()
    };
    let plugin_dir = dir.path().to_path_buf();
    let late = kubelet.clone();
    let server = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(600)).await;
        let listener = UnixListener::bind(plugin_dir.join("kubelet.sock")).unwrap();
        run_kubelet(listener, late).await;
    });

    let started = std::time::Instant::now();
    let err = instance.register().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::Registration { .. }));
    assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1400), "{elapsed:?}");
    assert_eq!(kubelet.registered.lock().unwrap().len(), 1);

    instance.stop().await.unwrap();
    server.abort();
}
