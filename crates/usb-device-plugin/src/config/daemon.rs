use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use clap::Parser;

use crate::allocation::UnknownDevicePolicy;
use crate::plugin::DEVICE_PLUGIN_PATH;
use crate::plugin::KUBELET_SOCKET;

/// How to invoke the vendor probe.
#[derive(Args, Clone, Debug)]
pub struct ProbeArgs {
    #[arg(
        long,
        env = "USB_PLUGIN_PROBE_COMMAND",
        default_value = "bladeRF-cli",
        help = "Command that lists attached devices"
    )]
    pub probe_command: String,

    #[arg(
        long,
        env = "USB_PLUGIN_PROBE_ARGS",
        default_value = "-p",
        value_delimiter = ' ',
        allow_hyphen_values = true,
        help = "Arguments passed to the probe command, space separated"
    )]
    pub probe_args: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
pub struct ScanArgs {
    #[command(flatten)]
    pub probe: ProbeArgs,
}

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub probe: ProbeArgs,

    #[arg(
        long,
        env = "USB_PLUGIN_SOCKET_NAME",
        default_value = "bladerf",
        help = "Prefix of the plugin socket file, the start-up timestamp is appended"
    )]
    pub socket_name: String,

    #[arg(
        long,
        env = "USB_PLUGIN_RESOURCE_NAME",
        default_value = "nuand.com/bladerf",
        value_parser = parse_resource_name,
        help = "Extended resource name advertised to the kubelet, e.g. vendor.com/device"
    )]
    pub resource_name: String,

    #[arg(
        long,
        env = "USB_PLUGIN_DEVICE_PLUGIN_DIR",
        value_hint = clap::ValueHint::DirPath,
        default_value = DEVICE_PLUGIN_PATH,
        help = "Directory the kubelet watches for device plugin sockets"
    )]
    pub device_plugin_dir: PathBuf,

    #[arg(
        long,
        env = "USB_PLUGIN_KUBELET_SOCKET",
        value_hint = clap::ValueHint::FilePath,
        help = "Kubelet registration socket (defaults to <device-plugin-dir>/kubelet.sock)"
    )]
    pub kubelet_socket: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = 5,
        help = "Seconds between device rescans while the kubelet is watching"
    )]
    pub scan_interval_secs: u64,

    #[arg(
        long,
        default_value_t = 5,
        help = "Seconds to wait after binding the socket before registering"
    )]
    pub registration_delay_secs: u64,

    #[arg(
        long,
        help = "Exit when the plugin socket is removed (kubelet restart)",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub watch_socket: bool,

    #[arg(
        long,
        value_enum,
        default_value_t = UnknownDevicePolicy::Omit,
        help = "How Allocate treats device ids that are not in the inventory"
    )]
    pub unknown_device_policy: UnknownDevicePolicy,

    #[arg(
        long,
        env = "USB_PLUGIN_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to this file, rotated daily"
    )]
    pub log_file: Option<PathBuf>,
}

impl DaemonArgs {
    pub fn kubelet_socket_path(&self) -> PathBuf {
        self.kubelet_socket
            .clone()
            .unwrap_or_else(|| self.device_plugin_dir.join(KUBELET_SOCKET))
    }

    /// Socket file name for a plugin started at `unix_timestamp`.
    pub fn endpoint_name(&self, unix_timestamp: u64) -> String {
        format!("{}-{}.sock", self.socket_name, unix_timestamp)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn registration_delay(&self) -> Duration {
        Duration::from_secs(self.registration_delay_secs)
    }
}

/// Accepts `domain/name` with both sides non-empty.
fn parse_resource_name(value: &str) -> Result<String, String> {
    match value.split_once('/') {
        Some((domain, name)) if !domain.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(value.to_string())
        }
        _ => Err(format!(
            "resource name must look like `vendor.com/device`, got `{value}`"
        )),
    }
}
