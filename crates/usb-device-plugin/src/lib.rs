//! Kubernetes device plugin for USB hardware discovered by a vendor probe.
//!
//! The plugin scans for devices with an external command, advertises them to the kubelet
//! over the `v1beta1` device plugin API and hands out the matching `/dev/bus/usb` nodes when
//! a container is scheduled.

pub mod allocation;
pub mod app;
pub mod config;
pub mod error;
pub mod inventory;
pub mod liveness;
pub mod logging;
pub mod plugin;
pub mod scanner;

pub use error::PluginError;
