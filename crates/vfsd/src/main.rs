//! Entrypoint: parses CLI flags, loads configuration, brings up logging,
//! starts the bus connection, and waits for a shutdown signal.

mod bus;
mod logging;
mod peer;

use clap::Parser;
use futures_util::StreamExt;
use log::{error, info, warn};
use std::sync::Arc;
use vfsd_core::backend::mountable::MountableBackend;
use vfsd_core::backend::mountable::platform::{NullMonitor, PlatformMonitor, UdisksMonitor};
use vfsd_core::config::DaemonConfig;
use vfsd_core::credential::{CredentialStore, FileCredentialStore};
use vfsd_core::model::MountSpec;
use vfsd_core::scheduler::Scheduler;

#[derive(Parser, Debug)]
#[command(name = "vfsd", about = "Virtual-filesystem daemon")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// D-Bus address to connect to instead of the session bus.
    #[arg(long)]
    bus_address: Option<String>,

    /// Directory peer sockets are created under, overriding the default
    /// private temp-directory scheme.
    #[arg(long)]
    socket_dir: Option<String>,

    /// Overrides the configured log level (error, warn, info, debug, trace).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let mut config = match DaemonConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return std::process::ExitCode::from(1);
        }
    };
    if let Some(addr) = cli.bus_address.clone() {
        config.bus_address = Some(addr);
    }
    if let Some(dir) = cli.socket_dir.clone() {
        config.socket_dir = Some(dir);
    }
    if let Some(level) = cli.log_level.clone() {
        config.log_level = level;
    }

    logging::init(&config.log_level, config.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    match runtime.block_on(run(config)) {
        Ok(()) => std::process::ExitCode::from(0),
        Err(err) => {
            error!("fatal: {err}");
            std::process::ExitCode::from(1)
        }
    }
}

async fn run(config: DaemonConfig) -> zbus::Result<()> {
    let socket_dir = peer::socket_dir(config.socket_dir.as_deref())
        .map_err(|e| zbus::Error::Failure(e.to_string()))?;
    info!("peer sockets rooted at {}", socket_dir.display());

    let scheduler = Arc::new(Scheduler::new());

    let credentials: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::new(socket_dir.join("credentials")));

    let monitor: Arc<dyn PlatformMonitor> = match UdisksMonitor::connect().await {
        Ok(m) => Arc::new(m),
        Err(err) => {
            warn!("udisks2 unavailable, falling back to an inert monitor: {err}");
            Arc::new(NullMonitor::new())
        }
    };
    let mountable_backend = MountableBackend::new(monitor).await;
    scheduler.register_mount(MountSpec::new("computer", ""), mountable_backend);

    let daemon = bus::Daemon::new(
        scheduler.clone(),
        socket_dir.clone(),
        credentials,
        config.ftp_max_connections_per_pool,
    );
    let tracker = bus::MountpointTracker::new(scheduler.clone());

    let mut builder = match &config.bus_address {
        Some(addr) => zbus::connection::Builder::address(addr.as_str())?,
        None => zbus::connection::Builder::session()?,
    };
    builder = builder
        .name("org.vfsd.Daemon")?
        .serve_at("/org/vfsd/Daemon", daemon)?
        .serve_at("/org/vfsd/MountpointTracker", tracker)?;
    let connection = builder.build().await?;

    info!("vfsd connected to the bus as org.vfsd.Daemon");

    let dbus_proxy = zbus::fdo::DBusProxy::new(&connection).await?;
    let mut name_lost = dbus_proxy.receive_name_lost().await?;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| zbus::Error::Failure(e.to_string()))?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .map_err(|e| zbus::Error::Failure(e.to_string()))?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        signal = name_lost.next() => {
            warn!("lost bus name: {signal:?}");
            return Err(zbus::Error::Failure("bus name lost".into()));
        }
    }

    shutdown(&scheduler).await;
    let _ = std::fs::remove_dir_all(&socket_dir);
    Ok(())
}

/// Unmounts every registered backend before the process exits, so FTP
/// connections are closed and platform monitors stopped cleanly rather than
/// dropped mid-operation.
async fn shutdown(scheduler: &Scheduler) {
    for (object_path, display) in scheduler.list_mountpoints() {
        if let Some(backend) = scheduler.unregister_mount(&object_path) {
            info!("unmounting {display}");
            backend.unmount().await;
        }
    }
}
