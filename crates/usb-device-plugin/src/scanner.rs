//! Device discovery.
//!
//! Runs the vendor probe (`bladeRF-cli -p` by default) and turns its listing into an
//! [`Inventory`]. The listing is treated as whitespace separated tokens; a device is
//! recognised from a `Serial`, `Bus`, `Address` sequence, e.g.
//!
//! ```text
//!   Serial:         0123456789abcdef0123456789abcdef
//!   USB Bus:        2
//!   USB Address:    5
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::PluginError;
use crate::inventory::DeviceRecord;
use crate::inventory::Inventory;

/// Source of the raw device listing.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Run the probe and return its standard output.
    async fn list_devices(&self) -> Result<String, PluginError>;
}

/// Probe backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
}

impl CommandProbe {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Probe for CommandProbe {
    async fn list_devices(&self) -> Result<String, PluginError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| PluginError::ProbeLaunch {
                command: self.command_line(),
                source,
            })?;

        if !output.status.success() {
            return Err(PluginError::ProbeExit {
                command: self.command_line(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Result of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub inventory: Inventory,
    /// at least one device was found
    pub found: bool,
}

/// Builds a fresh inventory from the probe on every call.
#[derive(Clone)]
pub struct Scanner {
    probe: Arc<dyn Probe>,
}

impl Scanner {
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self { probe }
    }

    pub async fn scan(&self) -> Result<ScanOutcome, PluginError> {
        info!("discovering devices");
        let output = self.probe.list_devices().await?;
        debug!("probe output: {}", output);

        let inventory = parse_probe_output(&output);
        Ok(ScanOutcome {
            found: !inventory.is_empty(),
            inventory,
        })
    }
}

/// Parse a probe listing into device records.
///
/// A token containing `Serial` takes the next token as the pending serial. A token
/// containing `Bus` parses the next token as the pending bus number. A token containing
/// `Address` parses the next token as the address and, when both a serial and a bus are
/// pending, emits a record and clears them. Unparsable numbers are logged and skipped; a
/// bad address leaves the pending serial and bus in place.
pub fn parse_probe_output(output: &str) -> Inventory {
    let tokens: Vec<&str> = output.split_whitespace().collect();
    let mut inventory = Inventory::new();

    let mut pending_serial: Option<&str> = None;
    let mut pending_bus: Option<u32> = None;

    for (idx, token) in tokens.iter().enumerate() {
        let Some(next) = tokens.get(idx + 1).copied() else {
            break;
        };

        if token.contains("Serial") {
            pending_serial = Some(next);
        } else if token.contains("Bus") {
            pending_bus = match next.parse::<u32>() {
                Ok(bus) => Some(bus),
                Err(e) => {
                    warn!("invalid bus number {:?}: {}", next, e);
                    None
                }
            };
        } else if token.contains("Address") {
            let address = match next.parse::<u32>() {
                Ok(address) => address,
                Err(e) => {
                    warn!("invalid device address {:?}: {}", next, e);
                    continue;
                }
            };

            if let (Some(serial), Some(bus)) = (pending_serial, pending_bus) {
                let record = DeviceRecord::new(serial, bus, address);
                info!("found device {} in {}", record.id, record.host_path);
                inventory.insert(record.id.clone(), record);
                pending_serial = None;
                pending_bus = None;
            }
        }
    }

    inventory
}
