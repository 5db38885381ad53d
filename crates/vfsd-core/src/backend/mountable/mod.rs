//! The synthetic `computer://` backend: aggregates platform drives, volumes,
//! and mounts into a stable, sorted, change-notifying directory listing.

pub mod aggregate;
pub mod platform;

use self::aggregate::{ComputerFile, build, diff};
use self::platform::{PlatformEvent, PlatformMonitor};
use crate::backend::{Backend, DirEntry, EntryKind, FileInfo, MonitorEvent};
use crate::error::{ErrorKind, VfsError, VfsResult};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

/// How long to wait after the first event in a burst before recomputing,
/// coalescing bursts of platform churn onto a single rebuild.
const DEBOUNCE: Duration = Duration::from_millis(200);

struct Snapshots {
    drives: Vec<aggregate::PlatformDrive>,
    volumes: Vec<aggregate::PlatformVolume>,
    mounts: Vec<aggregate::PlatformMount>,
}

pub struct MountableBackend {
    current: Mutex<Vec<ComputerFile>>,
    events: broadcast::Sender<MonitorEvent>,
    monitor: Arc<dyn PlatformMonitor>,
    state: Mutex<Snapshots>,
}

impl MountableBackend {
    pub async fn new(monitor: Arc<dyn PlatformMonitor>) -> Arc<Self> {
        let (drives, volumes, mounts) = monitor.snapshot().await;
        let initial = build(&drives, &volumes, &mounts);
        let (tx, _rx) = broadcast::channel(256);
        let backend = Arc::new(MountableBackend {
            current: Mutex::new(initial),
            events: tx,
            monitor: monitor.clone(),
            state: Mutex::new(Snapshots {
                drives,
                volumes,
                mounts,
            }),
        });
        backend.clone().spawn_event_loop();
        backend
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub fn current_listing(&self) -> Vec<ComputerFile> {
        self.current.lock().unwrap().clone()
    }

    fn spawn_event_loop(self: Arc<Self>) {
        let mut rx = self.monitor.subscribe();
        tokio::spawn(async move {
            loop {
                let first = match rx.recv().await {
                    Some(ev) => ev,
                    None => return,
                };
                self.apply(first);
                // Debounce: drain any further events received within the
                // window onto the same recompute.
                let deadline = tokio::time::sleep(DEBOUNCE);
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        _ = &mut deadline => break,
                        maybe = rx.recv() => match maybe {
                            Some(ev) => self.apply(ev),
                            None => return,
                        },
                    }
                }
                self.recompute();
            }
        });
    }

    fn apply(&self, event: PlatformEvent) {
        let mut state = self.state.lock().unwrap();
        match event {
            PlatformEvent::DriveAdded(d) | PlatformEvent::DriveChanged(d) => {
                state.drives.retain(|x| x.id != d.id);
                state.drives.push(d);
            }
            PlatformEvent::DriveRemoved(id) => state.drives.retain(|x| x.id != id),
            PlatformEvent::VolumeAdded(v) | PlatformEvent::VolumeChanged(v) => {
                state.volumes.retain(|x| x.id != v.id);
                state.volumes.push(v);
            }
            PlatformEvent::VolumeRemoved(id) => state.volumes.retain(|x| x.id != id),
            PlatformEvent::MountAdded(m) | PlatformEvent::MountChanged(m) => {
                state.mounts.retain(|x| x.id != m.id);
                state.mounts.push(m);
            }
            PlatformEvent::MountRemoved(id) => state.mounts.retain(|x| x.id != id),
        }
    }

    fn recompute(&self) {
        let new_list = {
            let state = self.state.lock().unwrap();
            build(&state.drives, &state.volumes, &state.mounts)
        };
        let mut current = self.current.lock().unwrap();
        let events = diff(&current, &new_list);
        *current = new_list;
        drop(current);
        for event in events {
            let _ = self.events.send(event);
        }
    }

    fn find(&self, filename: &str) -> Option<ComputerFile> {
        self.current
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.filename == filename)
            .cloned()
    }
}

fn path_filename(path: &str) -> &str {
    path.trim_start_matches('/')
}

#[async_trait::async_trait]
impl Backend for MountableBackend {
    fn description(&self) -> String {
        "computer://".to_string()
    }

    async fn query_info(&self, path: &str) -> VfsResult<FileInfo> {
        let name = path_filename(path);
        if name.is_empty() {
            return Ok(FileInfo {
                name: String::new(),
                kind: EntryKind::Dir,
                size: 0,
                modified: None,
                can_read: true,
                can_write: false,
                can_delete: false,
                symlink_target: None,
            });
        }
        let entry = self
            .find(name)
            .ok_or_else(|| VfsError::not_found(path))?;
        Ok(FileInfo {
            name: entry.filename,
            kind: EntryKind::Mountable,
            size: 0,
            modified: None,
            can_read: false,
            can_write: false,
            can_delete: false,
            symlink_target: entry.target_uri,
        })
    }

    async fn enumerate(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        if !path_filename(path).is_empty() {
            return Err(VfsError::new(ErrorKind::NotDirectory, "not a directory"));
        }
        Ok(self
            .current_listing()
            .into_iter()
            .map(|entry| DirEntry {
                name: entry.filename,
                kind: EntryKind::Mountable,
                size: None,
                modified: None,
            })
            .collect())
    }

    async fn open_for_read(&self, path: &str) -> VfsResult<crate::backend::Handle> {
        if path_filename(path).is_empty() {
            Err(VfsError::new(ErrorKind::IsDirectory, "root is a directory"))
        } else {
            Err(VfsError::not_supported("opening a mountable entry"))
        }
    }

    async fn mount_mountable(&self, path: &str) -> VfsResult<String> {
        let name = path_filename(path);
        let entry = self.find(name).ok_or_else(|| VfsError::not_found(path))?;
        if !entry.can_mount {
            return Err(VfsError::not_supported("mount-mountable on this entry"));
        }
        entry
            .target_uri
            .ok_or_else(|| VfsError::not_supported("mount produced no target"))
    }

    async fn unmount_mountable(&self, path: &str) -> VfsResult<()> {
        let name = path_filename(path);
        let entry = self.find(name).ok_or_else(|| VfsError::not_found(path))?;
        if !entry.can_unmount {
            return Err(VfsError::not_supported("unmount-mountable on this entry"));
        }
        Ok(())
    }

    async fn eject_mountable(&self, path: &str) -> VfsResult<()> {
        let name = path_filename(path);
        let entry = self.find(name).ok_or_else(|| VfsError::not_found(path))?;
        if !entry.can_eject {
            return Err(VfsError::not_supported("eject-mountable on this entry"));
        }
        Ok(())
    }

    async fn create_monitor(&self, path: &str) -> VfsResult<u64> {
        if path_filename(path).is_empty() {
            Ok(0) // the singleton root monitor
        } else {
            Err(VfsError::not_supported("monitor on a non-root mountable path"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use self::platform::NullMonitor;

    fn drive(id: &str, name: &str) -> aggregate::PlatformDrive {
        aggregate::PlatformDrive {
            id: id.into(),
            name: name.into(),
            icon: "drive-harddisk".into(),
            can_eject: false,
        }
    }

    async fn backend_with(monitor: Arc<NullMonitor>) -> Arc<MountableBackend> {
        MountableBackend::new(monitor).await
    }

    #[tokio::test]
    async fn enumerate_root_lists_seeded_drive() {
        let monitor = Arc::new(NullMonitor::new());
        monitor.seed(vec![drive("d1", "Disk")], vec![], vec![]);
        let backend = backend_with(monitor).await;
        let entries = backend.enumerate("/").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Disk.drive");
    }

    #[tokio::test]
    async fn enumerate_non_root_path_is_not_directory() {
        let backend = backend_with(Arc::new(NullMonitor::new())).await;
        let err = backend.enumerate("/Disk.drive").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotDirectory);
    }

    #[tokio::test]
    async fn open_root_is_directory_open_child_is_not_supported() {
        let monitor = Arc::new(NullMonitor::new());
        monitor.seed(vec![drive("d1", "Disk")], vec![], vec![]);
        let backend = backend_with(monitor).await;
        assert_eq!(
            backend.open_for_read("/").await.unwrap_err().kind,
            ErrorKind::IsDirectory
        );
        assert_eq!(
            backend.open_for_read("/Disk.drive").await.unwrap_err().kind,
            ErrorKind::NotSupported
        );
    }

    #[tokio::test]
    async fn mount_mountable_on_bare_drive_is_not_supported() {
        let monitor = Arc::new(NullMonitor::new());
        monitor.seed(vec![drive("d1", "Disk")], vec![], vec![]);
        let backend = backend_with(monitor).await;
        let err = backend.mount_mountable("/Disk.drive").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotSupported);
    }

    #[tokio::test]
    async fn query_info_unknown_entry_is_not_found() {
        let backend = backend_with(Arc::new(NullMonitor::new())).await;
        let err = backend.query_info("/Missing.drive").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn injected_event_eventually_updates_listing() {
        let monitor = Arc::new(NullMonitor::new());
        let backend = backend_with(monitor.clone()).await;
        assert_eq!(backend.enumerate("/").await.unwrap().len(), 0);
        let mut sub = backend.subscribe();
        monitor.inject(PlatformEvent::DriveAdded(drive("d1", "New")));
        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("event should arrive within debounce window")
            .unwrap();
        assert_eq!(event.path, "/New.drive");
        assert_eq!(backend.enumerate("/").await.unwrap().len(), 1);
    }
}
