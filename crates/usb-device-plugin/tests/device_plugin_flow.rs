use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use similar_asserts::assert_eq;
use test_log::test;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_stream::StreamExt;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use usb_device_plugin::allocation::UnknownDevicePolicy;
use usb_device_plugin::app::Application;
use usb_device_plugin::app::RunSettings;
use usb_device_plugin::inventory::InventoryStore;
use usb_device_plugin::plugin::api::device_plugin_client::DevicePluginClient;
use usb_device_plugin::plugin::api::registration_server::Registration;
use usb_device_plugin::plugin::api::registration_server::RegistrationServer;
use usb_device_plugin::plugin::api::AllocateRequest;
use usb_device_plugin::plugin::api::ContainerAllocateRequest;
use usb_device_plugin::plugin::api::Empty;
use usb_device_plugin::plugin::api::PreStartContainerRequest;
use usb_device_plugin::plugin::api::RegisterRequest;
use usb_device_plugin::plugin::device_plugin::PluginSettings;
use usb_device_plugin::plugin::registration::create_uds_channel;
use usb_device_plugin::plugin::UsbDevicePlugin;
use usb_device_plugin::scanner::Probe;
use usb_device_plugin::scanner::Scanner;
use usb_device_plugin::PluginError;

const LISTING: &str = "\
  Serial:         ABC123
  USB Bus:        1
  USB Address:    4
";

struct StaticProbe(&'static str);

#[async_trait]
impl Probe for StaticProbe {
    async fn list_devices(&self) -> Result<String, PluginError> {
        Ok(self.0.to_string())
    }
}

/// Serves a fixed listing until told to fail like a missing probe binary.
#[derive(Default)]
struct FailingProbe {
    failing: AtomicBool,
}

impl FailingProbe {
    fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Probe for FailingProbe {
    async fn list_devices(&self) -> Result<String, PluginError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PluginError::ProbeLaunch {
                command: "bladeRF-cli -p".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "bladeRF-cli not found"),
            });
        }
        Ok(LISTING.to_string())
    }
}

struct FakeKubelet {
    registered: mpsc::UnboundedSender<RegisterRequest>,
}

#[tonic::async_trait]
impl Registration for FakeKubelet {
    async fn register(&self, request: Request<RegisterRequest>) -> Result<Response<Empty>, Status> {
        let _ = self.registered.send(request.into_inner());
        Ok(Response::new(Empty {}))
    }
}

fn serve_kubelet(socket: &Path) -> mpsc::UnboundedReceiver<RegisterRequest> {
    let (registered, rx) = mpsc::unbounded_channel();
    let listener = UnixListener::bind(socket).expect("bind kubelet socket");
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(RegistrationServer::new(FakeKubelet { registered }))
            .serve_with_incoming(UnixListenerStream::new(listener))
            .await
    });
    rx
}

fn application(dir: &Path, probe: &'static str, watch_socket: bool) -> (Arc<Application>, PathBuf) {
    application_with(
        dir,
        Arc::new(StaticProbe(probe)),
        Duration::from_secs(5),
        watch_socket,
    )
}

fn application_with(
    dir: &Path,
    probe: Arc<dyn Probe>,
    scan_interval: Duration,
    watch_socket: bool,
) -> (Arc<Application>, PathBuf) {
    let scanner = Scanner::new(probe);
    let plugin = UsbDevicePlugin::new(
        PluginSettings {
            endpoint: "bladerf-1700000000.sock".to_string(),
            resource_name: "nuand.com/bladerf".to_string(),
            scan_interval,
            unknown_device_policy: UnknownDevicePolicy::Omit,
        },
        scanner.clone(),
        Arc::new(InventoryStore::new()),
    );
    let socket_path = dir.join("bladerf-1700000000.sock");
    let app = Application::new(
        plugin,
        scanner,
        RunSettings {
            socket_path: socket_path.clone(),
            kubelet_socket: dir.join("kubelet.sock"),
            registration_delay: Duration::from_millis(10),
            watch_socket,
        },
    );
    (Arc::new(app), socket_path)
}

#[test(tokio::test)]
async fn registers_advertises_and_allocates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut registrations = serve_kubelet(&dir.path().join("kubelet.sock"));
    let (app, socket_path) = application(dir.path(), LISTING, false);

    let running = {
        let app = app.clone();
        tokio::spawn(async move { app.run().await })
    };

    let registration = tokio::time::timeout(Duration::from_secs(10), registrations.recv())
        .await
        .expect("registered in time")
        .expect("registration request");
    assert_eq!(registration.version, "v1beta1");
    assert_eq!(registration.endpoint, "bladerf-1700000000.sock");
    assert_eq!(registration.resource_name, "nuand.com/bladerf");

    let channel = create_uds_channel(&socket_path).await.expect("dial plugin");
    let mut client = DevicePluginClient::new(channel);

    let options = client
        .get_device_plugin_options(Empty {})
        .await
        .expect("options")
        .into_inner();
    assert!(!options.pre_start_required);
    assert!(!options.get_preferred_allocation_available);

    let mut stream = client
        .list_and_watch(Empty {})
        .await
        .expect("list and watch")
        .into_inner();
    let first = stream
        .next()
        .await
        .expect("first advertisement")
        .expect("ok");
    let devices: Vec<_> = first
        .devices
        .iter()
        .map(|d| (d.id.as_str(), d.health.as_str()))
        .collect();
    assert_eq!(devices, vec![("ABC123", "Healthy")]);

    let allocation = client
        .allocate(AllocateRequest {
            container_requests: vec![ContainerAllocateRequest {
                devices_ids: vec!["ABC123".to_string(), "XYZ".to_string()],
            }],
        })
        .await
        .expect("allocate")
        .into_inner();
    assert_eq!(allocation.container_responses.len(), 1);
    let bound = &allocation.container_responses[0].devices;
    assert_eq!(bound.len(), 1);
    assert_eq!(bound[0].host_path, "/dev/bus/usb/001/004");
    assert_eq!(bound[0].container_path, "/dev/bus/usb/001/004");
    assert_eq!(bound[0].permissions, "rw");

    client
        .pre_start_container(PreStartContainerRequest {
            devices_ids: vec!["ABC123".to_string()],
        })
        .await
        .expect("pre-start");

    app.cancellation_token().cancel();
    let result = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("stopped in time")
        .expect("join");
    assert!(result.is_ok());
}

#[test(tokio::test)]
async fn socket_removal_stops_application() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut registrations = serve_kubelet(&dir.path().join("kubelet.sock"));
    let (app, socket_path) = application(dir.path(), LISTING, true);

    let running = {
        let app = app.clone();
        tokio::spawn(async move { app.run().await })
    };

    tokio::time::timeout(Duration::from_secs(10), registrations.recv())
        .await
        .expect("registered in time")
        .expect("registration request");

    std::fs::remove_file(&socket_path).expect("remove plugin socket");

    let result = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("stopped in time")
        .expect("join");
    assert!(matches!(result, Err(PluginError::SocketRemoved { .. })));
}

#[test(tokio::test)]
async fn missing_kubelet_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (app, _) = application(dir.path(), LISTING, false);

    let err = tokio::time::timeout(Duration::from_secs(10), app.run())
        .await
        .expect("finished in time")
        .expect_err("no kubelet to register with");
    assert!(matches!(err, PluginError::Connect { .. }));
    assert!(err.is_fatal());
    assert!(app.cancellation_token().is_cancelled());
}

#[test(tokio::test)]
async fn scan_failure_while_watching_stops_application() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut registrations = serve_kubelet(&dir.path().join("kubelet.sock"));
    let probe = Arc::new(FailingProbe::default());
    let (app, socket_path) =
        application_with(dir.path(), probe.clone(), Duration::from_millis(50), false);

    let running = {
        let app = app.clone();
        tokio::spawn(async move { app.run().await })
    };

    tokio::time::timeout(Duration::from_secs(10), registrations.recv())
        .await
        .expect("registered in time")
        .expect("registration request");

    let channel = create_uds_channel(&socket_path).await.expect("dial plugin");
    let mut stream = DevicePluginClient::new(channel)
        .list_and_watch(Empty {})
        .await
        .expect("list and watch")
        .into_inner();
    stream
        .next()
        .await
        .expect("first advertisement")
        .expect("ok");

    probe.fail();

    let result = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("stopped in time")
        .expect("join");
    assert!(matches!(result, Err(PluginError::ProbeLaunch { .. })));
    assert!(app.cancellation_token().is_cancelled());
}

#[test(tokio::test)]
async fn initial_scan_failure_stops_before_listening() {
    let dir = tempfile::tempdir().expect("tempdir");
    let probe = Arc::new(FailingProbe::default());
    probe.fail();
    let (app, socket_path) = application_with(dir.path(), probe, Duration::from_secs(5), false);

    let err = tokio::time::timeout(Duration::from_secs(10), app.run())
        .await
        .expect("finished in time")
        .expect_err("scanner binary is missing");
    assert!(matches!(err, PluginError::ProbeLaunch { .. }));
    assert!(!socket_path.exists());
}
