//! Start-up sequencing and the process-level decision on errors.
//!
//! Every component returns typed errors; this is the only place that decides the plugin
//! has to stop. The start-up order is scan, listen, wait, register. Afterwards the
//! application waits for the first of: a fatal error from a `ListAndWatch` stream, removal
//! of the plugin socket, the gRPC server exiting, or a shutdown signal.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::config::DaemonArgs;
use crate::error::PluginError;
use crate::inventory::InventoryStore;
use crate::liveness::SocketWatch;
use crate::plugin::device_plugin::PluginSettings;
use crate::plugin::UsbDevicePlugin;
use crate::scanner::CommandProbe;
use crate::scanner::Scanner;

/// Paths and timings used by [`Application::run`].
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub socket_path: PathBuf,
    pub kubelet_socket: PathBuf,
    pub registration_delay: Duration,
    pub watch_socket: bool,
}

pub struct Application {
    plugin: Arc<UsbDevicePlugin>,
    scanner: Scanner,
    run_settings: RunSettings,
    cancellation_token: CancellationToken,
}

impl Application {
    pub fn new(plugin: Arc<UsbDevicePlugin>, scanner: Scanner, run_settings: RunSettings) -> Self {
        Self {
            plugin,
            scanner,
            run_settings,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Wire up the production probe and paths from the command line.
    pub fn from_args(args: &DaemonArgs) -> Self {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let endpoint = args.endpoint_name(started_at);

        let scanner = Scanner::new(Arc::new(CommandProbe::new(
            args.probe.probe_command.clone(),
            args.probe.probe_args.clone(),
        )));
        let plugin = UsbDevicePlugin::new(
            PluginSettings {
                endpoint: endpoint.clone(),
                resource_name: args.resource_name.clone(),
                scan_interval: args.scan_interval(),
                unknown_device_policy: args.unknown_device_policy,
            },
            scanner.clone(),
            Arc::new(InventoryStore::new()),
        );

        Self::new(
            plugin,
            scanner,
            RunSettings {
                socket_path: args.device_plugin_dir.join(endpoint),
                kubelet_socket: args.kubelet_socket_path(),
                registration_delay: args.registration_delay(),
                watch_socket: args.watch_socket,
            },
        )
    }

    /// Token cancelled on shutdown; cancelling it stops the application cleanly.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Run until shutdown. An `Err` means the process must exit.
    pub async fn run(&self) -> Result<(), PluginError> {
        // every exit, early or not, stops the server and advertisers
        let _cancel_on_exit = self.cancellation_token.clone().drop_guard();

        let settings = self.plugin.settings();
        info!(
            "serving {} on {:?}",
            settings.resource_name, self.run_settings.socket_path
        );

        let outcome = self.scanner.scan().await?;
        if !outcome.found {
            warn!("no devices found at start-up");
        }
        self.plugin.store().replace(outcome.inventory);

        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        let mut server = self
            .plugin
            .start(
                &self.run_settings.socket_path,
                fatal_tx,
                self.cancellation_token.clone(),
            )
            .await?;

        let mut socket_watch = if self.run_settings.watch_socket {
            Some(SocketWatch::new(&self.run_settings.socket_path)?)
        } else {
            None
        };

        // give the server a moment before the kubelet dials it
        tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => return Ok(()),
            err = next_fatal(&mut fatal_rx) => return Err(err),
            _ = tokio::time::sleep(self.run_settings.registration_delay) => {}
        }
        self.plugin
            .register_with_kubelet(&self.run_settings.kubelet_socket)
            .await?;
        info!("device-plugin registration complete");

        // the server only stops after cancellation, so check the token first
        let result = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => Ok(()),
            _ = shutdown_signal() => {
                info!("shutdown signal received, stopping device plugin");
                Ok(())
            }
            err = next_fatal(&mut fatal_rx) => Err(err),
            err = watch_removal(socket_watch.as_mut()) => Err(err),
            result = &mut server => Err(server_exit(&self.run_settings.socket_path, result)),
        };

        result
    }
}

/// Waits for the first error that has to stop the plugin; recoverable ones are logged.
async fn next_fatal(fatal_rx: &mut mpsc::UnboundedReceiver<PluginError>) -> PluginError {
    loop {
        match fatal_rx.recv().await {
            Some(err) if err.is_fatal() => return err,
            Some(err) => warn!("recoverable device plugin error: {err}"),
            None => return std::future::pending().await,
        }
    }
}

async fn watch_removal(watch: Option<&mut SocketWatch>) -> PluginError {
    match watch {
        Some(watch) => watch.removed().await,
        None => std::future::pending().await,
    }
}

fn server_exit(
    socket_path: &Path,
    result: Result<Result<(), tonic::transport::Error>, tokio::task::JoinError>,
) -> PluginError {
    let message = match result {
        Ok(Ok(())) => "gRPC server exited".to_string(),
        Ok(Err(e)) => format!("gRPC server failed: {e}"),
        Err(e) => format!("gRPC server task failed: {e}"),
    };
    PluginError::Listen {
        path: socket_path.to_path_buf(),
        source: std::io::Error::other(message),
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::signal;
    use tokio::signal::unix::SignalKind;

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            warn!("cannot install signal handlers: {e}");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
    }
}
