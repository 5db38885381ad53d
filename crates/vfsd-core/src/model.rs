//! Core value types shared by the scheduler, the channel multiplexer, and
//! every backend: the mount routing key, the cancellation token, and job
//! bookkeeping identifiers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

/// The keyed identifier of a mount instance: scheme + host + port + user +
/// path-prefix, plus opaque backend-specific extras. Equality is structural,
/// so two specs naming the same remote endpoint compare equal regardless of
/// which client requested the mount.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MountSpec {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub path_prefix: String,
    pub extras: Vec<(String, String)>,
}

impl MountSpec {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        MountSpec {
            scheme: scheme.into(),
            host: host.into(),
            port: None,
            user: None,
            path_prefix: String::new(),
            extras: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = prefix.into();
        self
    }

    /// Object-path-safe rendering, used as part of `/org/vfsd/mount/<N>`'s
    /// companion `ListMountpoints` display string.
    pub fn display(&self) -> String {
        let mut s = format!("{}://", self.scheme);
        if let Some(user) = &self.user {
            s.push_str(user);
            s.push('@');
        }
        s.push_str(&self.host);
        if let Some(port) = self.port {
            s.push(':');
            s.push_str(&port.to_string());
        }
        s.push_str(&self.path_prefix);
        s
    }
}

/// Process-wide monotonic counter used to name `/org/vfsd/mount/<N>` object
/// paths, one per mounted backend instance.
#[derive(Debug, Default)]
pub struct MountCounter(AtomicU64);

impl MountCounter {
    pub fn new() -> Self {
        MountCounter(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// A cooperative cancellation signal shared between a job and whoever may
/// need to abort it (the scheduler's `Cancel` handler, a channel receiving a
/// new request on the same sequence).
///
/// Unlike an exception, cancelling a token never interrupts control flow by
/// itself: callers must poll [`CancellationToken::is_cancelled`] between I/O
/// steps, or await [`CancellationToken::cancelled`] alongside the operation
/// they want to make abortable.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already cancelled, otherwise waits for the
    /// next [`CancellationToken::cancel`] call. Intended to be raced against
    /// the real operation with `tokio::select!`.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies a job for cancellation lookups: the connection it arrived on
/// plus the bus message serial the client used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub connection_id: u64,
    pub serial: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_spec_equality_is_structural() {
        let a = MountSpec::new("ftp", "example.com").with_port(21);
        let b = MountSpec::new("ftp", "example.com").with_port(21);
        assert_eq!(a, b);
    }

    #[test]
    fn mount_spec_display_includes_user_and_port() {
        let spec = MountSpec::new("ftp", "example.com")
            .with_port(2121)
            .with_user("anon")
            .with_path_prefix("/pub");
        assert_eq!(spec.display(), "ftp://anon@example.com:2121/pub");
    }

    #[test]
    fn mount_counter_is_monotonic_and_starts_at_zero() {
        let counter = MountCounter::new();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
    }

    #[tokio::test]
    async fn cancellation_token_resolves_immediately_once_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn cancellation_token_wakes_pending_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::task::yield_now().await;
        token.cancel();
        handle.await.unwrap();
    }
}
