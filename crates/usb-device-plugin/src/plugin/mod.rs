//! Kubelet device plugin integration.
//!
//! The main components are:
//! - [`UsbDevicePlugin`]: serves the `v1beta1` DevicePlugin service on a Unix socket
//! - [`advertiser::advertise`]: the scan/publish loop behind `ListAndWatch`
//! - [`registration::register_with_kubelet`]: the one-shot registration handshake

#![allow(clippy::doc_markdown)]
pub mod api {
    #![allow(clippy::doc_overindented_list_items)]
    tonic::include_proto!("v1beta1");
}

pub mod advertiser;
pub mod device_plugin;
pub mod registration;

pub use device_plugin::DevicePluginService;
pub use device_plugin::UsbDevicePlugin;

/// device plugin API version sent during registration
pub const API_VERSION: &str = "v1beta1";
/// directory where the kubelet expects plugin sockets
pub const DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins/";
/// kubelet registration socket name inside [`DEVICE_PLUGIN_PATH`]
pub const KUBELET_SOCKET: &str = "kubelet.sock";
