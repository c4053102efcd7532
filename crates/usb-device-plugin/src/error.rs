use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Errors raised while discovering, advertising and registering devices.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to launch probe `{command}`: {source}")]
    ProbeLaunch {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("probe `{command}` exited with {status}: {stderr}")]
    ProbeExit {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("failed to send device list to kubelet: {message}")]
    StreamSend { message: String },
    #[error("failed to listen on {path:?}: {source}")]
    Listen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot connect to kubelet service at {path:?}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("cannot register to kubelet service: {0}")]
    Registration(#[from] tonic::Status),
    #[error("failed to watch {path:?}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("plugin socket {path:?} was removed, kubelet restarted")]
    SocketRemoved { path: PathBuf },
}

impl PluginError {
    /// Whether the process must terminate when this error surfaces.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PluginError::StreamSend { .. })
    }
}
