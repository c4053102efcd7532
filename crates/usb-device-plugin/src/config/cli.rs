use clap::{Parser, Subcommand};
use utils::version;

use crate::config::daemon::{DaemonArgs, ScanArgs};

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the device plugin daemon
    Daemon(Box<DaemonArgs>),
    /// Run the probe once and print the discovered devices as JSON
    Scan(ScanArgs),
}
