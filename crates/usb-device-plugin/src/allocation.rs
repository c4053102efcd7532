//! Resolves kubelet allocation requests against an inventory snapshot.

use std::collections::HashMap;

use thiserror::Error;

use crate::inventory::Inventory;
use crate::plugin::api::AllocateRequest;
use crate::plugin::api::AllocateResponse;
use crate::plugin::api::ContainerAllocateResponse;
use crate::plugin::api::DeviceSpec;

/// cgroup permissions granted on an allocated device node
pub const DEVICE_PERMISSIONS: &str = "rw";

/// What to do with requested ids that are not in the inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UnknownDevicePolicy {
    /// leave unknown ids out of the response
    #[default]
    Omit,
    /// fail the whole request
    Reject,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown devices requested: {}", ids.join(", "))]
pub struct UnknownDevices {
    pub ids: Vec<String>,
}

/// Build one container response per container request, in request order.
///
/// Each known id yields a [`DeviceSpec`] exposing the usbfs node at the same path inside
/// the container. The inventory is only read.
pub fn allocate(
    inventory: &Inventory,
    request: &AllocateRequest,
    policy: UnknownDevicePolicy,
) -> Result<AllocateResponse, UnknownDevices> {
    let mut unknown = Vec::new();

    let container_responses = request
        .container_requests
        .iter()
        .map(|container_req| {
            let devices = container_req
                .devices_ids
                .iter()
                .filter_map(|id| match inventory.get(id) {
                    Some(record) => Some(DeviceSpec {
                        container_path: record.host_path.clone(),
                        host_path: record.host_path.clone(),
                        permissions: DEVICE_PERMISSIONS.to_string(),
                    }),
                    None => {
                        unknown.push(id.clone());
                        None
                    }
                })
                .collect();

            ContainerAllocateResponse {
                envs: HashMap::new(),
                mounts: Vec::new(),
                devices,
                annotations: HashMap::new(),
                cdi_devices: Vec::new(),
            }
        })
        .collect();

    if policy == UnknownDevicePolicy::Reject && !unknown.is_empty() {
        return Err(UnknownDevices { ids: unknown });
    }

    Ok(AllocateResponse {
        container_responses,
    })
}
