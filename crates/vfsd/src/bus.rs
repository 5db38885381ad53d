//! The bus-facing object layout: `/org/vfsd/Daemon`, one
//! `/org/vfsd/mount/<N>` per mounted backend, and `/org/vfsd/MountpointTracker`.

use crate::peer;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use vfsd_core::backend::ftp::FtpBackend;
use vfsd_core::backend::{Backend, DirEntry, EntryKind, FileInfo, WriteMode};
use vfsd_core::channel::{self, Reply, Request, RequestOp};
use vfsd_core::credential::CredentialStore;
use vfsd_core::model::{JobKey, MountSpec};
use vfsd_core::scheduler::{Scheduler, run_cancellable};

pub struct Daemon {
    scheduler: Arc<Scheduler>,
    socket_dir: PathBuf,
    credentials: Arc<dyn CredentialStore>,
    ftp_max_connections: usize,
    next_connection_id: std::sync::atomic::AtomicU64,
}

impl Daemon {
    pub fn new(
        scheduler: Arc<Scheduler>,
        socket_dir: PathBuf,
        credentials: Arc<dyn CredentialStore>,
        ftp_max_connections: usize,
    ) -> Self {
        Daemon {
            scheduler,
            socket_dir,
            credentials,
            ftp_max_connections,
            next_connection_id: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

/// A mount target parsed from a `scheme://[user@]host[:port][/path]` URI.
/// Only the pieces the bundled backends understand are extracted; anything
/// else is rejected with `InvalidArgument`.
struct ParsedUri {
    scheme: String,
    user: Option<String>,
    host: String,
    port: Option<u16>,
}

fn parse_mount_uri(uri: &str) -> vfsd_core::error::VfsResult<ParsedUri> {
    let (scheme, rest) = uri.split_once("://").ok_or_else(|| {
        vfsd_core::error::VfsError::new(
            vfsd_core::error::ErrorKind::InvalidArgument,
            "missing scheme separator",
        )
    })?;
    let authority = rest.split('/').next().unwrap_or("");
    let (user, host_port) = match authority.split_once('@') {
        Some((u, hp)) => (Some(u.to_string()), hp),
        None => (None, authority),
    };
    let (host, port) = match host_port.split_once(':') {
        Some((h, p)) => (
            h.to_string(),
            Some(p.parse::<u16>().map_err(|_| {
                vfsd_core::error::VfsError::new(
                    vfsd_core::error::ErrorKind::InvalidArgument,
                    "invalid port",
                )
            })?),
        ),
        None => (host_port.to_string(), None),
    };
    Ok(ParsedUri {
        scheme: scheme.to_string(),
        user,
        host,
        port,
    })
}

#[zbus::interface(name = "org.vfsd.Daemon")]
impl Daemon {
    /// Creates a fresh primary/aux peer socket pair for one client
    /// connection and returns their filesystem paths.
    async fn get_connection(&self) -> zbus::fdo::Result<(String, String)> {
        let id = self
            .next_connection_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let dir = self.socket_dir.join(format!("conn-{id}"));
        std::fs::create_dir_all(&dir)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        let (_primary, _aux, addrs) =
            peer::bind(&dir).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        info!("issued peer connection {id} at {}", dir.display());
        Ok((
            addrs.primary.display().to_string(),
            addrs.aux.display().to_string(),
        ))
    }

    /// Cancels the job identified by `(connection_id, serial)`, if still
    /// live.
    async fn cancel(&self, connection_id: u64, serial: u32) -> bool {
        self.scheduler.cancel(JobKey {
            connection_id,
            serial,
        })
    }

    /// Mounts a backend from a `scheme://[user@]host[:port]` URI, returning
    /// the assigned `/org/vfsd/mount/<N>` object path.
    async fn mount(&self, uri: String) -> zbus::fdo::Result<String> {
        let parsed = parse_mount_uri(&uri).map_err(to_fdo_err)?;
        let mut spec = MountSpec::new(parsed.scheme.clone(), parsed.host.clone());
        if let Some(port) = parsed.port {
            spec = spec.with_port(port);
        }
        if let Some(user) = &parsed.user {
            spec = spec.with_user(user.clone());
        }

        let backend: Arc<dyn Backend> = match parsed.scheme.as_str() {
            "ftp" => {
                let port = parsed.port.unwrap_or(21);
                let backend = FtpBackend::mount(
                    &parsed.host,
                    port,
                    parsed.user.as_deref(),
                    self.credentials.as_ref(),
                    self.ftp_max_connections,
                )
                .await
                .map_err(to_fdo_err)?;
                Arc::new(backend)
            }
            other => {
                return Err(zbus::fdo::Error::Failed(format!(
                    "unsupported mount scheme: {other}"
                )));
            }
        };

        let object_path = self.scheduler.register_mount(spec, backend);
        info!("mounted {uri} at {object_path}");
        Ok(object_path)
    }
}

pub struct MountpointTracker {
    scheduler: Arc<Scheduler>,
}

impl MountpointTracker {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        MountpointTracker { scheduler }
    }
}

#[zbus::interface(name = "org.vfsd.MountpointTracker")]
impl MountpointTracker {
    async fn list_mountpoints(&self) -> Vec<(String, String)> {
        self.scheduler.list_mountpoints()
    }
}

/// One bus object per mounted backend instance, at `/org/vfsd/mount/<N>`.
/// Byte I/O (read/write/seek/close) happens on the dedicated channel socket
/// returned by `OpenForRead`/`OpenForWrite`, not over the bus itself.
pub struct MountObject {
    scheduler: Arc<Scheduler>,
    object_path: String,
    socket_dir: PathBuf,
}

impl MountObject {
    pub fn new(scheduler: Arc<Scheduler>, object_path: String, socket_dir: PathBuf) -> Self {
        MountObject {
            scheduler,
            object_path,
            socket_dir,
        }
    }

    fn backend(&self) -> zbus::fdo::Result<Arc<dyn vfsd_core::backend::Backend>> {
        self.scheduler
            .backend_for(&self.object_path)
            .ok_or_else(|| zbus::fdo::Error::Failed("mount no longer registered".into()))
    }
}

fn to_fdo_err(err: vfsd_core::error::VfsError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{:?}: {}", err.kind, err.message))
}

#[zbus::interface(name = "org.vfsd.Mount")]
impl MountObject {
    /// Opens `path` for reading, spawns a dedicated channel socket, and
    /// returns its filesystem path for the client to connect to.
    async fn open_for_read(
        &self,
        path: String,
        connection_id: u64,
        serial: u32,
    ) -> zbus::fdo::Result<String> {
        let backend = self.backend()?;
        let guard = self.scheduler.begin_job(
            JobKey {
                connection_id,
                serial,
            },
            &self.object_path,
        );
        let token = guard.token();
        let handle = run_cancellable(&token, backend.open_for_read(&path))
            .await
            .map_err(to_fdo_err)?;
        spawn_channel(self.socket_dir.clone(), backend, handle)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    async fn open_for_write(
        &self,
        path: String,
        append: bool,
        connection_id: u64,
        serial: u32,
    ) -> zbus::fdo::Result<String> {
        let backend = self.backend()?;
        let guard = self.scheduler.begin_job(
            JobKey {
                connection_id,
                serial,
            },
            &self.object_path,
        );
        let token = guard.token();
        let mode = if append {
            WriteMode::Append
        } else {
            WriteMode::Replace { make_backup: false }
        };
        let handle = run_cancellable(&token, backend.open_for_write(&path, mode))
            .await
            .map_err(to_fdo_err)?;
        spawn_channel(self.socket_dir.clone(), backend, handle)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    async fn get_info(&self, path: String) -> zbus::fdo::Result<(String, bool, u64)> {
        let backend = self.backend()?;
        let info: FileInfo = backend.query_info(&path).await.map_err(to_fdo_err)?;
        Ok((info.name, info.kind == EntryKind::Dir, info.size))
    }

    async fn enumerate(&self, path: String) -> zbus::fdo::Result<Vec<(String, bool)>> {
        let backend = self.backend()?;
        let entries: Vec<DirEntry> = backend.enumerate(&path).await.map_err(to_fdo_err)?;
        Ok(entries
            .into_iter()
            .map(|e| (e.name, e.kind == EntryKind::Dir))
            .collect())
    }

    async fn make_directory(&self, path: String) -> zbus::fdo::Result<()> {
        self.backend()?.make_directory(&path).await.map_err(to_fdo_err)
    }

    async fn delete(&self, path: String) -> zbus::fdo::Result<()> {
        self.backend()?.delete(&path).await.map_err(to_fdo_err)
    }

    async fn move_path(&self, src: String, dst: String) -> zbus::fdo::Result<()> {
        self.backend()?.move_path(&src, &dst).await.map_err(to_fdo_err)
    }

    async fn set_display_name(&self, path: String, new_name: String) -> zbus::fdo::Result<String> {
        self.backend()?
            .set_display_name(&path, &new_name)
            .await
            .map_err(to_fdo_err)
    }

    async fn mount_mountable(&self, path: String) -> zbus::fdo::Result<String> {
        self.backend()?.mount_mountable(&path).await.map_err(to_fdo_err)
    }

    async fn unmount_mountable(&self, path: String) -> zbus::fdo::Result<()> {
        self.backend()?.unmount_mountable(&path).await.map_err(to_fdo_err)
    }

    async fn eject_mountable(&self, path: String) -> zbus::fdo::Result<()> {
        self.backend()?.eject_mountable(&path).await.map_err(to_fdo_err)
    }
}

/// Creates a dedicated socketpair-backed channel for one open handle, spawns
/// the request/reply pump task, and returns the path the client connects to.
async fn spawn_channel(
    socket_dir: PathBuf,
    backend: Arc<dyn vfsd_core::backend::Backend>,
    handle: vfsd_core::backend::Handle,
) -> std::io::Result<String> {
    std::fs::create_dir_all(&socket_dir)?;
    let path = socket_dir.join(format!("channel-{handle}"));
    let _ = std::fs::remove_file(&path);
    let listener = tokio::net::UnixListener::bind(&path)?;
    let path_str = path.display().to_string();

    tokio::spawn(async move {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!("channel socket accept failed: {err}");
                return;
            }
        };
        if let Err(err) = pump_channel(stream, backend, handle).await {
            warn!("channel pump for handle {handle} ended: {err}");
        }
        let _ = std::fs::remove_file(&path);
    });

    Ok(path_str)
}

/// Runs the request/reply loop for one channel: reads fixed-header
/// requests, enforces strictly increasing sequence numbers (cancelling any
/// job still running at a lower sequence), dispatches to the backend, and
/// writes exactly one reply per request.
async fn pump_channel(
    mut stream: tokio::net::UnixStream,
    backend: Arc<dyn vfsd_core::backend::Backend>,
    handle: vfsd_core::backend::Handle,
) -> std::io::Result<()> {
    let mut seq = channel::SeqTracker::new();
    let mut current_token: Option<vfsd_core::model::CancellationToken> = None;

    loop {
        let request: Request = match channel::read_request(&mut stream).await {
            Ok(r) => r,
            Err(_) => break,
        };

        if request.op == RequestOp::Cancel {
            if let Some(token) = &current_token {
                token.cancel();
            }
            continue;
        }

        if !seq.accept(request.seq_nr) {
            let reply = Reply::Error(
                request.seq_nr,
                vfsd_core::error::ErrorKind::InvalidArgument,
                "sequence number did not increase".into(),
            );
            let _ = channel::write_reply(&mut stream, &reply).await;
            continue;
        }

        if let Some(token) = current_token.take() {
            token.cancel();
        }
        let token = vfsd_core::model::CancellationToken::new();
        current_token = Some(token.clone());

        let reply = dispatch(&backend, handle, &request, &token).await;
        if channel::write_reply(&mut stream, &reply).await.is_err() {
            break;
        }
        if matches!(reply, Reply::Closed(_)) {
            break;
        }
    }
    Ok(())
}

async fn dispatch(
    backend: &Arc<dyn vfsd_core::backend::Backend>,
    handle: vfsd_core::backend::Handle,
    request: &Request,
    token: &vfsd_core::model::CancellationToken,
) -> Reply {
    let seq = request.seq_nr;
    match request.op {
        RequestOp::Read => {
            match run_cancellable(token, backend.read(handle, request.arg1)).await {
                Ok(data) => Reply::Data(seq, data),
                Err(err) => Reply::Error(seq, err.kind, err.message),
            }
        }
        RequestOp::Write => {
            match run_cancellable(token, backend.write(handle, &request.payload)).await {
                Ok(n) => Reply::Written(seq, n),
                Err(err) => Reply::Error(seq, err.kind, err.message),
            }
        }
        RequestOp::SeekSet | RequestOp::SeekCur | RequestOp::SeekEnd => {
            let whence = match request.op {
                RequestOp::SeekSet => vfsd_core::backend::SeekWhence::Start,
                RequestOp::SeekCur => vfsd_core::backend::SeekWhence::Current,
                _ => vfsd_core::backend::SeekWhence::End,
            };
            let offset = request.seek_offset();
            match run_cancellable(token, backend.seek(handle, whence, offset)).await {
                Ok(pos) => Reply::SeekPos(seq, pos),
                Err(err) => Reply::Error(seq, err.kind, err.message),
            }
        }
        RequestOp::Close => match backend.close(handle).await {
            Ok(()) => Reply::Closed(seq),
            Err(err) => Reply::Error(seq, err.kind, err.message),
        },
        RequestOp::Cancel => unreachable!("handled before dispatch"),
    }
}
