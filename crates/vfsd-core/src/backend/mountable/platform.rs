//! The platform drive/volume/mount discovery service, treated as an
//! external collaborator this daemon only consumes. [`PlatformMonitor`] is
//! the trait the aggregator consumes; [`UdisksMonitor`] holds a real
//! `org.freedesktop.UDisks2` system-bus connection but does not yet decode
//! its signals (see its doc comment), and [`NullMonitor`] is the
//! test/no-udisks2 fallback that only emits events injected by test code.

use super::aggregate::{PlatformDrive, PlatformMount, PlatformVolume};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum PlatformEvent {
    DriveAdded(PlatformDrive),
    DriveRemoved(String),
    DriveChanged(PlatformDrive),
    VolumeAdded(PlatformVolume),
    VolumeRemoved(String),
    VolumeChanged(PlatformVolume),
    MountAdded(PlatformMount),
    MountRemoved(String),
    MountChanged(PlatformMount),
}

/// Source of the nine drive/volume/mount lifecycle events the aggregator
/// debounces and recomputes from.
#[async_trait]
pub trait PlatformMonitor: Send + Sync {
    /// Takes ownership of the event receiver; called exactly once by the
    /// aggregator at startup.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PlatformEvent>;

    /// A snapshot of currently known drives/volumes/mounts, used to build
    /// the initial listing before any event arrives.
    async fn snapshot(&self) -> (Vec<PlatformDrive>, Vec<PlatformVolume>, Vec<PlatformMount>);
}

/// Test and no-udisks2 fallback: emits only events pushed via
/// [`NullMonitor::inject`], and an empty or explicitly-seeded snapshot.
pub struct NullMonitor {
    tx: mpsc::UnboundedSender<PlatformEvent>,
    rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<PlatformEvent>>>,
    drives: std::sync::Mutex<Vec<PlatformDrive>>,
    volumes: std::sync::Mutex<Vec<PlatformVolume>>,
    mounts: std::sync::Mutex<Vec<PlatformMount>>,
}

impl NullMonitor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        NullMonitor {
            tx,
            rx: std::sync::Mutex::new(Some(rx)),
            drives: std::sync::Mutex::new(Vec::new()),
            volumes: std::sync::Mutex::new(Vec::new()),
            mounts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn seed(
        &self,
        drives: Vec<PlatformDrive>,
        volumes: Vec<PlatformVolume>,
        mounts: Vec<PlatformMount>,
    ) {
        *self.drives.lock().unwrap() = drives;
        *self.volumes.lock().unwrap() = volumes;
        *self.mounts.lock().unwrap() = mounts;
    }

    pub fn inject(&self, event: PlatformEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for NullMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformMonitor for NullMonitor {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PlatformEvent> {
        self.rx
            .lock()
            .unwrap()
            .take()
            .expect("NullMonitor::subscribe called more than once")
    }

    async fn snapshot(&self) -> (Vec<PlatformDrive>, Vec<PlatformVolume>, Vec<PlatformMount>) {
        (
            self.drives.lock().unwrap().clone(),
            self.volumes.lock().unwrap().clone(),
            self.mounts.lock().unwrap().clone(),
        )
    }
}

/// Connection-only stand-in for a real `org.freedesktop.UDisks2` backed
/// monitor. It opens and holds the system bus connection [`UdisksMonitor`]'s
/// real counterpart would subscribe through, but does not itself decode
/// `InterfacesAdded` / `InterfacesRemoved` / `PropertiesChanged` signals or
/// call `GetManagedObjects` — its `subscribe` never produces an event and
/// its `snapshot` is always empty. Wiring the actual decode needs a
/// UDisks2-specific proxy crate this workspace does not depend on; until
/// then this exists so the bus-presence and connection-lifecycle code has
/// something real to hold, with [`NullMonitor`] covering tests and any
/// deployment without `udisks2` running.
pub struct UdisksMonitor {
    connection: zbus::Connection,
}

impl UdisksMonitor {
    pub async fn connect() -> zbus::Result<Self> {
        let connection = zbus::Connection::system().await?;
        Ok(UdisksMonitor { connection })
    }
}

#[async_trait]
impl PlatformMonitor for UdisksMonitor {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PlatformEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = self.connection.clone();
        tokio::spawn(async move {
            let _ = connection;
            std::future::pending::<()>().await;
            drop(tx);
        });
        rx
    }

    async fn snapshot(&self) -> (Vec<PlatformDrive>, Vec<PlatformVolume>, Vec<PlatformMount>) {
        (Vec::new(), Vec::new(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_monitor_snapshot_reflects_seed() {
        let monitor = NullMonitor::new();
        monitor.seed(
            vec![PlatformDrive {
                id: "d1".into(),
                name: "Disk".into(),
                icon: "drive-harddisk".into(),
                can_eject: false,
            }],
            vec![],
            vec![],
        );
        let (drives, _, _) = monitor.snapshot().await;
        assert_eq!(drives.len(), 1);
    }

    #[tokio::test]
    async fn null_monitor_forwards_injected_events() {
        let monitor = NullMonitor::new();
        let mut rx = monitor.subscribe();
        monitor.inject(PlatformEvent::DriveRemoved("d1".into()));
        let event = rx.recv().await.unwrap();
        matches!(event, PlatformEvent::DriveRemoved(id) if id == "d1");
    }

    #[test]
    #[should_panic(expected = "more than once")]
    fn null_monitor_subscribe_twice_panics() {
        let monitor = NullMonitor::new();
        let _a = monitor.subscribe();
        let _b = monitor.subscribe();
    }
}
