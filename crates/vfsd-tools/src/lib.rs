//! Shared client plumbing for the bundled `vfs-*` tools: the bus proxies,
//! URI resolution against the daemon's mountpoint table, and the
//! channel-socket read/write helpers used by `vfs-cat`/`vfs-cp`.

pub mod proxy {
    use zbus::proxy;

    #[proxy(
        interface = "org.vfsd.Daemon",
        default_service = "org.vfsd.Daemon",
        default_path = "/org/vfsd/Daemon"
    )]
    pub trait Daemon {
        async fn get_connection(&self) -> zbus::Result<(String, String)>;
        async fn cancel(&self, connection_id: u64, serial: u32) -> zbus::Result<bool>;
        async fn mount(&self, uri: String) -> zbus::Result<String>;
    }

    #[proxy(
        interface = "org.vfsd.MountpointTracker",
        default_service = "org.vfsd.Daemon",
        default_path = "/org/vfsd/MountpointTracker"
    )]
    pub trait MountpointTracker {
        async fn list_mountpoints(&self) -> zbus::Result<Vec<(String, String)>>;
    }

    #[proxy(interface = "org.vfsd.Mount", default_service = "org.vfsd.Daemon")]
    pub trait Mount {
        async fn open_for_read(
            &self,
            path: String,
            connection_id: u64,
            serial: u32,
        ) -> zbus::Result<String>;
        async fn open_for_write(
            &self,
            path: String,
            append: bool,
            connection_id: u64,
            serial: u32,
        ) -> zbus::Result<String>;
        async fn get_info(&self, path: String) -> zbus::Result<(String, bool, u64)>;
        async fn enumerate(&self, path: String) -> zbus::Result<Vec<(String, bool)>>;
        async fn make_directory(&self, path: String) -> zbus::Result<()>;
        async fn delete(&self, path: String) -> zbus::Result<()>;
        async fn move_path(&self, src: String, dst: String) -> zbus::Result<()>;
        async fn set_display_name(&self, path: String, new_name: String) -> zbus::Result<String>;
        async fn mount_mountable(&self, path: String) -> zbus::Result<String>;
        async fn unmount_mountable(&self, path: String) -> zbus::Result<()>;
        async fn eject_mountable(&self, path: String) -> zbus::Result<()>;
    }
}

use anyhow::{Context, Result, bail};
use std::sync::atomic::{AtomicU32, Ordering};

/// Connects to the bus the daemon is reachable on: `VFSD_BUS_ADDRESS` if
/// set, otherwise the session bus.
pub async fn connect() -> Result<zbus::Connection> {
    let connection = match std::env::var("VFSD_BUS_ADDRESS") {
        Ok(addr) => zbus::connection::Builder::address(addr.as_str())?
            .build()
            .await
            .context("connecting to VFSD_BUS_ADDRESS")?,
        Err(_) => zbus::Connection::session()
            .await
            .context("connecting to the session bus")?,
    };
    Ok(connection)
}

/// A resolved mount target: the bus object path serving it, and the
/// backend-relative path the caller's URI named past the authority.
pub struct Target {
    pub object_path: String,
    pub path: String,
}

/// Splits `scheme://[user@]host[:port][/path]` into the authority prefix
/// (used to match against `ListMountpoints`) and the remainder path.
fn split_uri(uri: &str) -> Result<(String, String)> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| anyhow::anyhow!("'{uri}' is not a scheme://host URI"))?;
    let mut parts = rest.splitn(2, '/');
    let authority = parts.next().unwrap_or("");
    let path = parts.next().map(|p| format!("/{p}")).unwrap_or_default();
    Ok((format!("{scheme}://{authority}"), path))
}

/// Resolves a `scheme://host/path` URI to an object path: matches against
/// the daemon's already-mounted backends by authority prefix, auto-mounting
/// via `Daemon.Mount` when no match exists.
pub async fn resolve(connection: &zbus::Connection, uri: &str) -> Result<Target> {
    let (authority, path) = split_uri(uri)?;

    let tracker = proxy::MountpointTrackerProxy::new(connection).await?;
    for (object_path, display) in tracker.list_mountpoints().await? {
        if display.starts_with(&authority) {
            return Ok(Target { object_path, path });
        }
    }

    let daemon = proxy::DaemonProxy::new(connection).await?;
    let object_path = daemon
        .mount(authority.clone())
        .await
        .with_context(|| format!("mounting {authority}"))?;
    Ok(Target { object_path, path })
}

/// Per-process monotonically increasing serial for job keys; `connection_id`
/// is fixed at the process id since each CLI invocation is its own peer.
static SERIAL: AtomicU32 = AtomicU32::new(1);

pub fn connection_id() -> u64 {
    std::process::id() as u64
}

pub fn next_serial() -> u32 {
    SERIAL.fetch_add(1, Ordering::Relaxed)
}

/// Streams an entire open-for-read channel to `sink`, using the wire
/// protocol the daemon's channel multiplexer speaks.
pub async fn drain_channel_to(
    socket_path: &str,
    sink: &mut (impl tokio::io::AsyncWrite + Unpin),
) -> Result<()> {
    use vfsd_core::channel::{self, Reply, RequestOp};
    use vfsd_core::error::ErrorKind;

    let mut stream = tokio::net::UnixStream::connect(socket_path).await?;
    let mut seq = 1u32;
    loop {
        let request = channel::Request {
            op: RequestOp::Read,
            seq_nr: seq,
            arg1: 64 * 1024,
            arg2: 0,
            payload: Vec::new(),
        };
        channel::write_request(&mut stream, &request).await?;
        match channel::read_reply(&mut stream).await? {
            Reply::Data(_, data) if data.is_empty() => break,
            Reply::Data(_, data) => {
                tokio::io::AsyncWriteExt::write_all(sink, &data).await?;
            }
            Reply::Error(_, ErrorKind::Closed, _) => break,
            Reply::Error(_, kind, message) => bail!("{kind:?}: {message}"),
            other => bail!("unexpected reply to read: {other:?}"),
        }
        seq += 1;
    }
    let close = channel::Request {
        op: RequestOp::Close,
        seq_nr: seq,
        arg1: 0,
        arg2: 0,
        payload: Vec::new(),
    };
    channel::write_request(&mut stream, &close).await?;
    let _ = channel::read_reply(&mut stream).await;
    Ok(())
}

/// Pumps all bytes from `source` into an open-for-write channel.
pub async fn pump_channel_from(
    socket_path: &str,
    source: &mut (impl tokio::io::AsyncRead + Unpin),
) -> Result<()> {
    use vfsd_core::channel::{self, Reply, RequestOp};

    let mut stream = tokio::net::UnixStream::connect(socket_path).await?;
    let mut seq = 1u32;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = tokio::io::AsyncReadExt::read(source, &mut buf).await?;
        if n == 0 {
            break;
        }
        let request = channel::Request {
            op: RequestOp::Write,
            seq_nr: seq,
            arg1: n as u32,
            arg2: 0,
            payload: buf[..n].to_vec(),
        };
        channel::write_request(&mut stream, &request).await?;
        match channel::read_reply(&mut stream).await? {
            Reply::Written(_, _) => {}
            Reply::Error(_, kind, message) => bail!("{kind:?}: {message}"),
            other => bail!("unexpected reply to write: {other:?}"),
        }
        seq += 1;
    }
    let close = channel::Request {
        op: RequestOp::Close,
        seq_nr: seq,
        arg1: 0,
        arg2: 0,
        payload: Vec::new(),
    };
    channel::write_request(&mut stream, &close).await?;
    let _ = channel::read_reply(&mut stream).await;
    Ok(())
}
