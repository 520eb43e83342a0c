//! Device plugin gRPC service

use crate::allocation::AllocationPolicy;
use crate::proto::device_plugin_server::DevicePlugin;
use crate::proto::{
    self, AllocateRequest, AllocateResponse, DevicePluginOptions, Empty, ListAndWatchResponse,
    PreStartContainerRequest, PreStartContainerResponse,
};
use smarter_core::{DeviceSet, Error};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

/// Buffered device lists per open stream
const STREAM_BUFFER: usize = 4;

/// Implementation of the kubelet `DevicePlugin` service for one resource
#[derive(Debug, Clone)]
pub struct DevicePluginService {
    resource: String,
    devices: DeviceSet,
    policy: AllocationPolicy,
    stop: CancellationToken,
    updates: broadcast::Sender<String>,
}

impl DevicePluginService {
    /// Create the service
    ///
    /// Device streams end when `stop` fires and re-send the device list on
    /// every message published on `updates`.
    pub fn new(
        resource: impl Into<String>,
        devices: DeviceSet,
        policy: AllocationPolicy,
        stop: CancellationToken,
        updates: broadcast::Sender<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            devices,
            policy,
            stop,
            updates,
        }
    }

    fn device_list(&self) -> ListAndWatchResponse {
        device_list(&self.devices)
    }

    /// Check every requested id before building any grant
    fn check_request(&self, request: &AllocateRequest) -> Result<(), Error> {
        for container in &request.container_requests {
            for id in &container.devices_ids {
                if !self.devices.contains(id) {
                    return Err(Error::UnknownDevice {
                        resource: self.resource.clone(),
                        device_id: id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Wire form of the current replica list
pub(crate) fn device_list(devices: &DeviceSet) -> ListAndWatchResponse {
    ListAndWatchResponse {
        devices: devices
            .snapshot()
            .into_iter()
            .map(|d| proto::Device {
                id: d.id,
                health: d.health.as_str().to_string(),
            })
            .collect(),
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    type ListAndWatchStream = ReceiverStream<Result<ListAndWatchResponse, Status>>;

    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<DevicePluginOptions>, Status> {
        Ok(Response::new(DevicePluginOptions::default()))
    }

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListAndWatchStream>, Status> {
        info!(resource = %self.resource, "Kubelet opened device stream");

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let mut health = self.updates.subscribe();
        let stop = self.stop.clone();
        let devices = self.devices.clone();
        let resource = self.resource.clone();

        if tx.send(Ok(self.device_list())).await.is_err() {
            return Ok(Response::new(ReceiverStream::new(rx)));
        }

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = stop.cancelled() => break,
                    _ = tx.closed() => break,

                    update = health.recv() => match update {
                        Ok(id) => {
                            debug!(resource = %resource, device = %id, "Health changed, re-sending devices");
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(resource = %resource, skipped, "Health updates lagged, re-sending devices");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }

                if tx.send(Ok(device_list(&devices))).await.is_err() {
                    break;
                }
            }

            debug!(resource = %resource, "Device stream closed");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> Result<Response<AllocateResponse>, Status> {
        let request = request.into_inner();

        if let Err(e) = self.check_request(&request) {
            warn!(resource = %self.resource, error = %e, "Rejecting allocation");
            return Err(Status::invalid_argument(e.to_string()));
        }

        let container_responses = request
            .container_requests
            .iter()
            .map(|container| {
                info!(
                    resource = %self.resource,
                    devices = ?container.devices_ids,
                    "Allocating devices"
                );
                self.policy.container_response()
            })
            .collect();

        Ok(Response::new(AllocateResponse {
            container_responses,
        }))
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> Result<Response<PreStartContainerResponse>, Status> {
        Ok(Response::new(PreStartContainerResponse {}))
    }
}
