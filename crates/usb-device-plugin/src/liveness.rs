//! Watches the plugin socket for removal.
//!
//! The kubelet wipes the device plugin directory when it restarts, which drops every
//! registration. The plugin does not try to re-register; it reports the removal and lets
//! the process supervisor restart it.

use std::path::Path;
use std::path::PathBuf;

use notify::Event;
use notify::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::error::PluginError;

pub struct SocketWatch {
    path: PathBuf,
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    _watcher: RecommendedWatcher,
}

impl SocketWatch {
    pub fn new(path: &Path) -> Result<Self, PluginError> {
        let watch_error = |source| PluginError::Watch {
            path: path.to_path_buf(),
            source,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // receiver dropped means nobody cares any more
            let _ = tx.send(res);
        })
        .map_err(watch_error)?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        info!("watching plugin socket: {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            rx,
            _watcher: watcher,
        })
    }

    /// Resolves once the socket file is gone.
    pub async fn removed(&mut self) -> PluginError {
        loop {
            if !self.path.exists() {
                break;
            }
            match self.rx.recv().await {
                Some(Ok(event)) => {
                    debug!("plugin socket event: {:?}", event);
                    if matches!(event.kind, EventKind::Remove(_)) {
                        break;
                    }
                }
                Some(Err(e)) => error!("plugin socket watch error: {e}"),
                None => break,
            }
        }

        PluginError::SocketRemoved {
            path: self.path.clone(),
        }
    }
}
