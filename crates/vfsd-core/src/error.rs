//! The daemon's single error domain.
//!
//! Every backend operation resolves to either a success payload or a
//! [`VfsError`]. The error carries a [`ErrorKind`] that is stable across
//! backends (clients switch on the kind, not on backend-specific strings)
//! plus a human-readable message and, where applicable, the lower-level
//! cause that produced it.

use thiserror::Error;

/// The fixed set of error kinds a client can observe, independent of which
/// backend produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    IsDirectory,
    NotDirectory,
    NotSupported,
    PermissionDenied,
    InvalidFilename,
    InvalidArgument,
    NoSpace,
    Cancelled,
    Failed,
    Closed,
    FilenameTooLong,
    CantCreateBackup,
    HostNotFound,
    NotMountableFile,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::IsDirectory => "is-directory",
            ErrorKind::NotDirectory => "not-directory",
            ErrorKind::NotSupported => "not-supported",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::InvalidFilename => "invalid-filename",
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::NoSpace => "no-space",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Failed => "failed",
            ErrorKind::Closed => "closed",
            ErrorKind::FilenameTooLong => "filename-too-long",
            ErrorKind::CantCreateBackup => "cant-create-backup",
            ErrorKind::HostNotFound => "host-not-found",
            ErrorKind::NotMountableFile => "not-mountable-file",
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct VfsError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl VfsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        VfsError {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        kind: ErrorKind,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        VfsError {
            kind,
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn not_found(path: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("not found: {path}"))
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn not_supported(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NotSupported, format!("not supported: {what}"))
    }
}

impl From<std::io::Error> for VfsError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::TimedOut => ErrorKind::Failed,
            _ => ErrorKind::Failed,
        };
        VfsError::with_cause(kind, err.to_string(), err)
    }
}

impl From<zbus::Error> for VfsError {
    fn from(err: zbus::Error) -> Self {
        VfsError::with_cause(ErrorKind::Failed, err.to_string(), err)
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found_kind() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: VfsError = io_err.into();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn io_permission_denied_maps_through() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: VfsError = io_err.into();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
    }

    #[test]
    fn error_kind_as_str_is_stable() {
        assert_eq!(ErrorKind::FilenameTooLong.as_str(), "filename-too-long");
        assert_eq!(ErrorKind::NotMountableFile.as_str(), "not-mountable-file");
    }
}
