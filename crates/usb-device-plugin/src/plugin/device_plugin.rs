use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Result as TonicResult;
use tonic::Status;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::advertiser::Advertiser;
use super::api::device_plugin_server::DevicePlugin;
use super::api::device_plugin_server::DevicePluginServer;
use super::api::AllocateRequest;
use super::api::AllocateResponse;
use super::api::DevicePluginOptions;
use super::api::Empty;
use super::api::ListAndWatchResponse;
use super::api::PreStartContainerRequest;
use super::api::PreStartContainerResponse;
use super::api::PreferredAllocationRequest;
use super::api::PreferredAllocationResponse;
use super::api::RegisterRequest;
use super::registration;
use super::API_VERSION;
use crate::allocation;
use crate::allocation::UnknownDevicePolicy;
use crate::error::PluginError;
use crate::inventory::InventoryStore;
use crate::scanner::Scanner;

pub type FatalErrorSender = mpsc::UnboundedSender<PluginError>;
pub type ServerHandle = JoinHandle<Result<(), tonic::transport::Error>>;

/// Settings for one plugin instance.
#[derive(Debug, Clone)]
pub struct PluginSettings {
    /// socket file name reported to the kubelet, e.g. `bladerf-1700000000.sock`
    pub endpoint: String,
    /// extended resource name, e.g. `nuand.com/bladerf`
    pub resource_name: String,
    /// cadence of the `ListAndWatch` rescans
    pub scan_interval: Duration,
    pub unknown_device_policy: UnknownDevicePolicy,
}

/// USB Device Plugin for Kubernetes
pub struct UsbDevicePlugin {
    settings: PluginSettings,
    /// device plugin options
    options: DevicePluginOptions,
    scanner: Scanner,
    store: Arc<InventoryStore>,
}

impl UsbDevicePlugin {
    /// create a new USB Device Plugin instance
    pub fn new(settings: PluginSettings, scanner: Scanner, store: Arc<InventoryStore>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            options: DevicePluginOptions {
                pre_start_required: false,
                get_preferred_allocation_available: false,
            },
            scanner,
            store,
        })
    }

    pub fn settings(&self) -> &PluginSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<InventoryStore> {
        &self.store
    }

    /// Bind `socket_path` and serve the DevicePlugin service until cancelled.
    ///
    /// Fatal errors raised inside stream tasks are forwarded to `fatal_tx`.
    pub async fn start(
        self: &Arc<Self>,
        socket_path: &Path,
        fatal_tx: FatalErrorSender,
        cancellation_token: CancellationToken,
    ) -> Result<ServerHandle, PluginError> {
        info!("start device plugin server: {:?}", socket_path);

        let listen_error = |source| PluginError::Listen {
            path: socket_path.to_path_buf(),
            source,
        };

        // clean up old socket file if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).map_err(listen_error)?;
        }

        let listener = UnixListener::bind(socket_path).map_err(listen_error)?;

        let device_plugin_service =
            DevicePluginService::new(self.clone(), fatal_tx, cancellation_token.clone());
        let device_plugin_server = DevicePluginServer::new(device_plugin_service);

        info!("gRPC server is bound to: {:?}", socket_path);

        Ok(tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(device_plugin_server)
                .serve_with_incoming_shutdown(
                    tokio_stream::wrappers::UnixListenerStream::new(listener),
                    async move {
                        cancellation_token.cancelled().await;
                        info!("shutting down gRPC server");
                    },
                )
                .await
        }))
    }

    /// The request announcing this plugin to the kubelet.
    pub fn register_request(&self) -> RegisterRequest {
        RegisterRequest {
            version: API_VERSION.to_string(),
            endpoint: self.settings.endpoint.clone(),
            resource_name: self.settings.resource_name.clone(),
            options: Some(self.options),
        }
    }

    /// register device plugin with kubelet
    pub async fn register_with_kubelet(&self, kubelet_socket: &Path) -> Result<(), PluginError> {
        registration::register_with_kubelet(kubelet_socket, self.register_request()).await
    }

    fn advertiser(&self) -> Advertiser {
        Advertiser::new(
            self.scanner.clone(),
            self.store.clone(),
            self.settings.scan_interval,
        )
    }
}

/// DevicePlugin service implementation
pub struct DevicePluginService {
    device_plugin: Arc<UsbDevicePlugin>,
    fatal_tx: FatalErrorSender,
    cancellation_token: CancellationToken,
}

impl DevicePluginService {
    pub fn new(
        device_plugin: Arc<UsbDevicePlugin>,
        fatal_tx: FatalErrorSender,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            device_plugin,
            fatal_tx,
            cancellation_token,
        }
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    /// get device plugin options
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<DevicePluginOptions>> {
        debug!("getting device plugin options");

        Ok(Response::new(self.device_plugin.options))
    }

    type ListAndWatchStream =
        Pin<Box<dyn Stream<Item = Result<ListAndWatchResponse, Status>> + Send>>;

    /// list devices now and again after every rescan
    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<Self::ListAndWatchStream>> {
        info!("starting to watch device list");

        let (tx, rx) = mpsc::unbounded_channel();
        let advertiser = self.device_plugin.advertiser();
        let fatal_tx = self.fatal_tx.clone();
        let cancellation_token = self.cancellation_token.clone();

        // The advertiser outlives a closed stream and only stops on cancellation, so a
        // kubelet that reconnects without restarting leaves one rescan loop per call.
        tokio::spawn(async move {
            if let Err(e) = advertiser.run(&tx, &cancellation_token).await {
                error!("device advertisement failed: {e}");
                let _ = tx.send(Err(Status::internal(e.to_string())));
                if fatal_tx.send(e).is_err() {
                    warn!("no supervisor is listening for fatal errors");
                }
            }
        });

        let stream = tokio_stream::wrappers::UnboundedReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream)))
    }

    /// preferred allocation is not supported, always empty
    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> TonicResult<Response<PreferredAllocationResponse>> {
        let req = request.into_inner();
        debug!("getting preferred device allocation: {:?}", req);
        Ok(Response::new(PreferredAllocationResponse {
            container_responses: vec![],
        }))
    }

    /// allocate devices to container
    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> TonicResult<Response<AllocateResponse>> {
        let req = request.into_inner();
        info!("allocating devices to container: {:?}", req);

        let snapshot = self.device_plugin.store.snapshot();
        let response = allocation::allocate(
            &snapshot,
            &req,
            self.device_plugin.settings.unknown_device_policy,
        )
        .map_err(|e| {
            warn!("rejecting allocation: {e}");
            Status::not_found(e.to_string())
        })?;

        info!(
            "device allocation completed, allocated {} devices",
            response
                .container_responses
                .iter()
                .map(|r| r.devices.len())
                .sum::<usize>()
        );
        Ok(Response::new(response))
    }

    /// no pre-start work is needed
    async fn pre_start_container(
        &self,
        request: Request<PreStartContainerRequest>,
    ) -> TonicResult<Response<PreStartContainerResponse>> {
        let req = request.into_inner();
        debug!("pre-start container processing: {:?}", req);
        Ok(Response::new(PreStartContainerResponse {}))
    }
}
