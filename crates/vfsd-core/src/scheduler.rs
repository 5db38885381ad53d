//! The job scheduler: registers mounted backends under bus object paths,
//! turns incoming requests into jobs, and guarantees exactly one terminal
//! reply per job.
//!
//! The live-jobs table and the registered-paths table each get their own
//! mutex, matching the "each shared resource guarded by its own mutex"
//! design used throughout this daemon's connection pool and cache layers.

use crate::backend::Backend;
use crate::error::{ErrorKind, VfsError, VfsResult};
use crate::model::{CancellationToken, JobKey, MountCounter, MountSpec};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

struct RegisteredMount {
    spec: MountSpec,
    backend: Arc<dyn Backend>,
}

/// One in-flight request. Carries everything needed to cancel it and to
/// guarantee it completes exactly once.
pub struct Job {
    pub key: JobKey,
    pub token: CancellationToken,
    object_path: String,
}

impl Job {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

#[derive(Default)]
pub struct Scheduler {
    counter: MountCounter,
    mounts: Mutex<HashMap<String, RegisteredMount>>,
    live_jobs: Mutex<HashMap<JobKey, Arc<Job>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            counter: MountCounter::new(),
            mounts: Mutex::new(HashMap::new()),
            live_jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a freshly mounted backend, returning the object path it was
    /// assigned (`/org/vfsd/mount/<N>`).
    pub fn register_mount(&self, spec: MountSpec, backend: Arc<dyn Backend>) -> String {
        let object_path = format!("/org/vfsd/mount/{}", self.counter.next());
        self.mounts
            .lock()
            .unwrap()
            .insert(object_path.clone(), RegisteredMount { spec, backend });
        object_path
    }

    pub fn unregister_mount(&self, object_path: &str) -> Option<Arc<dyn Backend>> {
        self.mounts
            .lock()
            .unwrap()
            .remove(object_path)
            .map(|m| m.backend)
    }

    pub fn backend_for(&self, object_path: &str) -> Option<Arc<dyn Backend>> {
        self.mounts
            .lock()
            .unwrap()
            .get(object_path)
            .map(|m| m.backend.clone())
    }

    /// Backs the `/org/vfsd/MountpointTracker` `ListMountpoints` method: a
    /// snapshot of (object path, display string) pairs.
    pub fn list_mountpoints(&self) -> Vec<(String, String)> {
        self.mounts
            .lock()
            .unwrap()
            .iter()
            .map(|(path, mount)| (path.clone(), mount.spec.display()))
            .collect()
    }

    /// Starts tracking a new job under `key`, returning a handle the caller
    /// uses to await cancellation and that the scheduler uses to serve
    /// `Cancel` bus calls. The job is auto-unregistered when the returned
    /// guard drops, before any reference the caller holds is dropped,
    /// matching the "unregistered before reference drop" invariant.
    pub fn begin_job(&self, key: JobKey, object_path: &str) -> JobGuard<'_> {
        let job = Arc::new(Job {
            key,
            token: CancellationToken::new(),
            object_path: object_path.to_string(),
        });
        self.live_jobs.lock().unwrap().insert(key, job.clone());
        JobGuard {
            scheduler: self,
            job,
        }
    }

    /// Services the bus `Cancel(serial)` method: cancels the job matching
    /// `(connection_id, serial)` if it is still live. Returns `true` if a
    /// matching job was found.
    pub fn cancel(&self, key: JobKey) -> bool {
        if let Some(job) = self.live_jobs.lock().unwrap().get(&key) {
            job.cancel();
            true
        } else {
            false
        }
    }

    pub fn live_job_count(&self) -> usize {
        self.live_jobs.lock().unwrap().len()
    }

    fn end_job(&self, key: JobKey) {
        self.live_jobs.lock().unwrap().remove(&key);
    }
}

/// RAII guard returned by [`Scheduler::begin_job`]; dropping it removes the
/// job from the live-jobs table.
pub struct JobGuard<'a> {
    scheduler: &'a Scheduler,
    job: Arc<Job>,
}

impl JobGuard<'_> {
    pub fn token(&self) -> CancellationToken {
        self.job.token.clone()
    }

    pub fn object_path(&self) -> &str {
        &self.job.object_path
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.end_job(self.job.key);
    }
}

/// Runs `fut`, racing it against the job's cancellation token. If the token
/// fires first, returns `Cancelled` without waiting for `fut` to unwind —
/// callers must ensure their future's own drop glue releases any connection
/// or socket it holds (see the FTP pool's return-on-drop behavior).
pub async fn run_cancellable<T, F>(token: &CancellationToken, fut: F) -> VfsResult<T>
where
    F: std::future::Future<Output = VfsResult<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(VfsError::new(ErrorKind::Cancelled, "operation cancelled")),
        res = fut => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use async_trait::async_trait;

    struct NoopBackend;

    #[async_trait]
    impl Backend for NoopBackend {
        fn description(&self) -> String {
            "noop".into()
        }
    }

    #[test]
    fn register_mount_assigns_sequential_paths() {
        let scheduler = Scheduler::new();
        let p1 = scheduler.register_mount(MountSpec::new("ftp", "a"), Arc::new(NoopBackend));
        let p2 = scheduler.register_mount(MountSpec::new("ftp", "b"), Arc::new(NoopBackend));
        assert_eq!(p1, "/org/vfsd/mount/0");
        assert_eq!(p2, "/org/vfsd/mount/1");
    }

    #[test]
    fn unregister_removes_and_returns_backend() {
        let scheduler = Scheduler::new();
        let path = scheduler.register_mount(MountSpec::new("ftp", "a"), Arc::new(NoopBackend));
        assert!(scheduler.backend_for(&path).is_some());
        assert!(scheduler.unregister_mount(&path).is_some());
        assert!(scheduler.backend_for(&path).is_none());
    }

    #[test]
    fn job_guard_unregisters_on_drop() {
        let scheduler = Scheduler::new();
        let key = JobKey {
            connection_id: 1,
            serial: 1,
        };
        {
            let _guard = scheduler.begin_job(key, "/org/vfsd/mount/0");
            assert_eq!(scheduler.live_job_count(), 1);
        }
        assert_eq!(scheduler.live_job_count(), 0);
    }

    #[test]
    fn cancel_unknown_job_returns_false() {
        let scheduler = Scheduler::new();
        let key = JobKey {
            connection_id: 1,
            serial: 1,
        };
        assert!(!scheduler.cancel(key));
    }

    #[tokio::test]
    async fn cancel_fires_before_pending_future_completes() {
        let scheduler = Scheduler::new();
        let key = JobKey {
            connection_id: 1,
            serial: 9,
        };
        let guard = scheduler.begin_job(key, "/org/vfsd/mount/0");
        let token = guard.token();
        scheduler.cancel(key);
        let result: VfsResult<()> = run_cancellable(&token, async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::Cancelled);
    }

    #[test]
    fn list_mountpoints_reflects_registered_specs() {
        let scheduler = Scheduler::new();
        scheduler.register_mount(
            MountSpec::new("ftp", "example.com").with_port(21),
            Arc::new(NoopBackend),
        );
        let mounts = scheduler.list_mountpoints();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].1, "ftp://example.com:21");
    }
}
