use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use usb_device_plugin::app::Application;
use usb_device_plugin::config::Cli;
use usb_device_plugin::config::Commands;
use usb_device_plugin::config::DaemonArgs;
use usb_device_plugin::config::ScanArgs;
use usb_device_plugin::logging;
use usb_device_plugin::scanner::CommandProbe;
use usb_device_plugin::scanner::Scanner;
use utils::version;

#[tokio::main]
async fn main() -> Result<()> {
    logging::setup_panic_hook();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::Scan(scan_args) => run_scan(scan_args).await,
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    let _guard = logging::init(daemon_args.log_file.as_deref())?;

    tracing::info!("Starting usb device plugin {}", &**version::VERSION);

    let app = Application::from_args(&daemon_args);
    if let Err(e) = app.run().await {
        // the socket file is left behind on purpose, the kubelet cleans its directory
        tracing::error!("device plugin stopped: {e}");
        return Err(e).context("fatal device plugin error");
    }

    tracing::info!("device plugin shut down");
    Ok(())
}

async fn run_scan(scan_args: ScanArgs) -> Result<()> {
    utils::logging::init();

    let scanner = Scanner::new(Arc::new(CommandProbe::new(
        scan_args.probe.probe_command,
        scan_args.probe.probe_args,
    )));
    let outcome = scanner.scan().await.context("device scan failed")?;

    let records: Vec<_> = outcome.inventory.values().collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&records).context("serialize inventory")?
    );
    Ok(())
}
