//! Backend trait and the value types its operations exchange.
//!
//! A backend is a capability bag: it implements whichever subset of file
//! operations its scheme supports, and every operation it doesn't implement
//! answers `NotSupported` by default. The original source modelled each
//! capability as an explicit `try` (non-blocking, run on the main loop) and
//! `run` (blocking, run on a worker) pair; here a single `async fn` covers
//! both roles, since the scheduler (see [`crate::scheduler`]) already runs
//! every backend call as a tokio task and moves genuinely blocking work onto
//! `spawn_blocking` internally — the try/run split was a concession to a
//! single-threaded callback loop that an async runtime doesn't need.

pub mod ftp;
pub mod mountable;

use crate::error::{ErrorKind, VfsError, VfsResult};
use async_trait::async_trait;
use std::time::SystemTime;

/// Opaque token identifying an open file handle on a backend. Only the
/// backend that issued it interprets its contents; the scheduler and the
/// channel layer pass it back unmodified.
pub type Handle = u64;

/// Maximum accepted length, in bytes, of a single directory-listing line
/// before the whole listing fails with `FilenameTooLong`.
pub const MAX_LIST_LINE_LEN: usize = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryKind {
    #[default]
    File,
    Dir,
    Symlink,
    Mountable,
}

#[derive(Debug, Clone, Default)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub can_read: bool,
    pub can_write: bool,
    pub can_delete: bool,
    pub symlink_target: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FsInfo {
    pub free_space: Option<u64>,
    pub total_space: Option<u64>,
    pub read_only: bool,
}

/// How an open-for-write call wants a pre-existing destination handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail if the file already exists in an incompatible way is not
    /// modelled here; this is a plain create/truncate.
    Replace { make_backup: bool },
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Start,
    Current,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEventKind {
    Created,
    Deleted,
    Changed,
}

#[derive(Debug, Clone)]
pub struct MonitorEvent {
    pub kind: MonitorEventKind,
    pub path: String,
}

/// A transport backend capable of mounting, enumerating, and performing byte
/// I/O against one scheme. All operations are async; unimplemented
/// capabilities answer [`ErrorKind::NotSupported`] by default so concrete
/// backends only override what they actually support.
#[async_trait]
pub trait Backend: Send + Sync {
    fn description(&self) -> String;

    async fn unmount(&self) {}

    async fn open_for_read(&self, _path: &str) -> VfsResult<Handle> {
        Err(VfsError::not_supported("open-for-read"))
    }

    async fn open_for_write(&self, _path: &str, _mode: WriteMode) -> VfsResult<Handle> {
        Err(VfsError::not_supported("open-for-write"))
    }

    async fn read(&self, _handle: Handle, _size: u32) -> VfsResult<Vec<u8>> {
        Err(VfsError::not_supported("read"))
    }

    async fn write(&self, _handle: Handle, _data: &[u8]) -> VfsResult<u32> {
        Err(VfsError::not_supported("write"))
    }

    async fn seek(&self, _handle: Handle, _whence: SeekWhence, _offset: i64) -> VfsResult<u64> {
        Err(VfsError::not_supported("seek"))
    }

    async fn close(&self, _handle: Handle) -> VfsResult<()> {
        Err(VfsError::not_supported("close"))
    }

    async fn query_info(&self, _path: &str) -> VfsResult<FileInfo> {
        Err(VfsError::not_supported("query-info"))
    }

    async fn query_fs_info(&self, _path: &str) -> VfsResult<FsInfo> {
        Err(VfsError::not_supported("query-fs-info"))
    }

    async fn enumerate(&self, _path: &str) -> VfsResult<Vec<DirEntry>> {
        Err(VfsError::not_supported("enumerate"))
    }

    async fn set_display_name(&self, _path: &str, _new_name: &str) -> VfsResult<String> {
        Err(VfsError::not_supported("set-display-name"))
    }

    async fn make_directory(&self, _path: &str) -> VfsResult<()> {
        Err(VfsError::not_supported("make-directory"))
    }

    async fn delete(&self, _path: &str) -> VfsResult<()> {
        Err(VfsError::not_supported("delete"))
    }

    async fn move_path(&self, _src: &str, _dst: &str) -> VfsResult<()> {
        Err(VfsError::not_supported("move"))
    }

    async fn create_monitor(&self, _path: &str) -> VfsResult<u64> {
        Err(VfsError::not_supported("create-monitor"))
    }

    async fn mount_mountable(&self, _path: &str) -> VfsResult<String> {
        Err(VfsError::not_supported("mount-mountable"))
    }

    async fn unmount_mountable(&self, _path: &str) -> VfsResult<()> {
        Err(VfsError::not_supported("unmount-mountable"))
    }

    async fn eject_mountable(&self, _path: &str) -> VfsResult<()> {
        Err(VfsError::not_supported("eject-mountable"))
    }
}

/// Helper shared by backends that reject writes outright (the mountable-list
/// backend; any future read-only backend).
pub fn read_only_error(op: &str) -> VfsError {
    VfsError::new(ErrorKind::NotSupported, format!("{op}: read-only backend"))
}
