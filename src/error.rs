//! Error types for the S3 CSI driver

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the driver
pub type Result<T> = std::result::Result<T, Error>;

/// Status code reported back to the orchestrator for a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    DeadlineExceeded,
    Unavailable,
    Aborted,
    Internal,
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// Missing identifier, target or capabilities in a request
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Referenced bucket or volume does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A supervised unit for this volume already serves another mountpoint
    #[error(
        "volume {volume_id} is already mounted on host, but in a different directory. \
         We want {requested:?}, but it's in {existing:?}"
    )]
    VolumeConflict {
        volume_id: String,
        requested: PathBuf,
        existing: PathBuf,
    },

    #[error("Timeout after {timeout:?} waiting for mount at {target:?}")]
    MountTimeout { target: PathBuf, timeout: Duration },

    #[error("Timeout waiting for PID {pid} to end after {attempts} attempts")]
    ProcessWaitTimeout { pid: i32, attempts: u32 },

    /// The process supervisor could not be reached
    #[error("Supervisor transport error: {0}")]
    Transport(String),

    /// Supervisor reachable but refused or failed a request
    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("error running {command}\nargs: {args:?}\noutput: {output}")]
    UnderlyingTool {
        command: String,
        args: Vec<String>,
        output: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Errno(#[from] nix::errno::Errno),

    #[error("Process table error: {0}")]
    ProcFs(#[from] procfs::ProcError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Status code this error maps to on the wire
    pub fn code(&self) -> StatusCode {
        match self {
            Error::InvalidArgument(_) => StatusCode::InvalidArgument,
            Error::NotFound(_) => StatusCode::NotFound,
            Error::VolumeConflict { .. } => StatusCode::AlreadyExists,
            Error::MountTimeout { .. } | Error::ProcessWaitTimeout { .. } => {
                StatusCode::DeadlineExceeded
            }
            Error::Transport(_) => StatusCode::Unavailable,
            Error::Cancelled => StatusCode::Aborted,
            _ => StatusCode::Internal,
        }
    }

    /// Create an internal error from any displayable value
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Error::Internal(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_both_paths() {
        let err = Error::VolumeConflict {
            volume_id: "shared/vol".to_string(),
            requested: PathBuf::from("/a"),
            existing: PathBuf::from("/b"),
        };
        let msg = err.to_string();
        assert!(msg.contains("shared/vol"));
        assert!(msg.contains("\"/a\""));
        assert!(msg.contains("\"/b\""));
        assert_eq!(err.code(), StatusCode::AlreadyExists);
    }

    #[test]
    fn test_timeouts_map_to_deadline() {
        let err = Error::ProcessWaitTimeout { pid: 7, attempts: 20 };
        assert_eq!(err.code(), StatusCode::DeadlineExceeded);
        assert_eq!(
            Error::Transport("no bus".into()).code(),
            StatusCode::Unavailable
        );
    }
}
