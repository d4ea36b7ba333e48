//! Mount backends
//!
//! Each supported FUSE implementation is a [`MounterKind`]; [`new_mounter`]
//! turns a kind plus volume metadata and credentials into a [`Mounter`].
//!
//! # Architecture
//!
//! - `options`: validates user supplied mount options
//! - `launcher`: starts a FUSE binary directly and waits for the mount
//! - `supervised`: runs a FUSE binary under the host supervisor
//! - `staging`: copies binaries where the host supervisor can reach them
//! - `fuse_s3`, `s3fs`, `rclone`: argument building per backend

mod fuse_s3;
pub mod launcher;
pub mod options;
mod rclone;
mod s3fs;
pub mod staging;
pub mod supervised;

pub use fuse_s3::FuseS3Mounter;
pub use options::{filter_direct_mount_options, filter_mount_options, FilteredOptions};
pub use rclone::RcloneMounter;
pub use s3fs::S3fsMounter;

use crate::config::S3Config;
use crate::error::Result;
use crate::mount_table::MountTable;
use crate::supervisor::Supervisor;
use crate::volume::FsMeta;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Supported FUSE backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MounterKind {
    /// TigrisFS, the primary backend
    #[default]
    TigrisFs,
    /// GeeseFS; TigrisFS is a fork of it and takes the same arguments
    GeeseFs,
    S3fs,
    Rclone,
}

impl MounterKind {
    pub const ALL: [MounterKind; 4] = [
        MounterKind::TigrisFs,
        MounterKind::GeeseFs,
        MounterKind::S3fs,
        MounterKind::Rclone,
    ];

    /// Name as used in storage class parameters and binary names
    pub fn as_str(&self) -> &'static str {
        match self {
            MounterKind::TigrisFs => "tigrisfs",
            MounterKind::GeeseFs => "geesefs",
            MounterKind::S3fs => "s3fs",
            MounterKind::Rclone => "rclone",
        }
    }

    /// Pick the backend for a volume.
    ///
    /// A non-empty override wins over the cluster default. Unknown names
    /// fall back to TigrisFS so that old volumes keep mounting after the
    /// supported set changes.
    pub fn resolve(override_kind: Option<&str>, cluster_default: MounterKind) -> MounterKind {
        match override_kind.map(str::trim).filter(|s| !s.is_empty()) {
            None => cluster_default,
            Some(name) => name.parse().unwrap_or_else(|_| {
                warn!("Unknown mounter {:?}, using {}", name, MounterKind::TigrisFs);
                MounterKind::TigrisFs
            }),
        }
    }

    /// Extra options making a mount read-only
    pub fn read_only_options(&self) -> &'static [&'static str] {
        match self {
            MounterKind::Rclone => &["--read-only"],
            _ => &["-o", "ro"],
        }
    }
}

impl fmt::Display for MounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MounterKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        MounterKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown mounter type: {}", s))
    }
}

/// Where mount binaries come from and where the host sees them
#[derive(Debug, Clone)]
pub struct StagingPaths {
    /// Directory holding the binaries shipped in the driver image
    pub bin_source_dir: PathBuf,
    /// Plugin directory as mounted inside the driver container
    pub staging_dir: PathBuf,
    /// Same directory as seen from the host
    pub plugin_dir: PathBuf,
}

/// Shared collaborators for mount operations
#[derive(Clone)]
pub struct MountContext {
    pub supervisor: Arc<dyn Supervisor>,
    pub mount_table: Arc<dyn MountTable>,
    pub paths: StagingPaths,
}

/// A configured backend ready to mount one volume
#[async_trait]
pub trait Mounter: Send + Sync {
    fn kind(&self) -> MounterKind;

    /// Mount the volume at `target`
    async fn mount(&self, target: &Path, volume_id: &str, cancel: &CancellationToken)
        -> Result<()>;
}

/// Build the mounter for `kind`, capturing the credentials in `s3`.
pub fn new_mounter(
    kind: MounterKind,
    meta: FsMeta,
    s3: &S3Config,
    ctx: MountContext,
) -> Box<dyn Mounter> {
    match kind {
        MounterKind::TigrisFs | MounterKind::GeeseFs => {
            Box::new(FuseS3Mounter::new(kind, meta, s3, ctx))
        }
        MounterKind::S3fs => Box::new(S3fsMounter::new(meta, s3, ctx)),
        MounterKind::Rclone => Box::new(RcloneMounter::new(meta, s3, ctx)),
    }
}

/// Credential environment shared by all backends
pub(crate) fn credential_env(s3: &S3Config) -> Vec<(String, String)> {
    vec![
        ("AWS_ACCESS_KEY_ID".to_string(), s3.access_key_id.clone()),
        ("AWS_SECRET_ACCESS_KEY".to_string(), s3.secret_access_key.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_override_wins() {
        assert_eq!(
            MounterKind::resolve(Some("geesefs"), MounterKind::Rclone),
            MounterKind::GeeseFs
        );
        assert_eq!(
            MounterKind::resolve(None, MounterKind::Rclone),
            MounterKind::Rclone
        );
        assert_eq!(
            MounterKind::resolve(Some(""), MounterKind::S3fs),
            MounterKind::S3fs
        );
    }

    #[test]
    fn test_resolve_unknown_falls_back() {
        assert_eq!(
            MounterKind::resolve(Some("goofys"), MounterKind::Rclone),
            MounterKind::TigrisFs
        );
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in MounterKind::ALL {
            assert_eq!(kind.as_str().parse::<MounterKind>().unwrap(), kind);
        }
        let json = serde_json::to_string(&MounterKind::GeeseFs).unwrap();
        assert_eq!(json, "\"geesefs\"");
    }
}
