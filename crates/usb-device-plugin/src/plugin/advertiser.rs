use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::api::Device;
use super::api::ListAndWatchResponse;
use crate::error::PluginError;
use crate::inventory::Inventory;
use crate::inventory::InventoryStore;
use crate::scanner::Scanner;

pub type ListAndWatchSender = mpsc::UnboundedSender<Result<ListAndWatchResponse, Status>>;

/// Render an inventory snapshot as one `ListAndWatch` message.
pub fn to_list_and_watch_response(inventory: &Inventory) -> ListAndWatchResponse {
    ListAndWatchResponse {
        devices: inventory
            .values()
            .map(|record| Device {
                id: record.id.clone(),
                health: record.health.to_string(),
                topology: None,
            })
            .collect(),
    }
}

/// Periodically rescans devices and republishes the inventory.
#[derive(Clone)]
pub struct Advertiser {
    scanner: Scanner,
    store: Arc<InventoryStore>,
    interval: Duration,
}

impl Advertiser {
    pub fn new(scanner: Scanner, store: Arc<InventoryStore>, interval: Duration) -> Self {
        Self {
            scanner,
            store,
            interval,
        }
    }

    /// Scan, publish, wait; repeat until cancelled.
    ///
    /// A publish that fails because the stream went away is logged and the loop keeps its
    /// cadence. A scan failure ends the loop with the error.
    pub async fn run(
        &self,
        tx: &ListAndWatchSender,
        cancellation_token: &CancellationToken,
    ) -> Result<(), PluginError> {
        loop {
            let outcome = tokio::select! {
                _ = cancellation_token.cancelled() => break,
                outcome = self.scanner.scan() => outcome?,
            };
            if !outcome.found {
                debug!("no devices found");
            }
            self.store.replace(outcome.inventory);

            let response = to_list_and_watch_response(&self.store.snapshot());
            info!("sending {} devices", response.devices.len());
            if let Err(e) = tx.send(Ok(response)) {
                let err = PluginError::StreamSend {
                    message: e.to_string(),
                };
                warn!("{err}");
            }

            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("device advertisement stopped");
        Ok(())
    }
}
