//! s3csi - Mount orchestration for an S3-backed CSI driver
//!
//! This library provisions bucket and prefix volumes and mounts them on
//! nodes through FUSE backends (TigrisFS, GeeseFS, s3fs, rclone), handing
//! long-lived mount processes to systemd so they survive driver restarts.

pub mod config;
pub mod driver;
pub mod error;
pub mod locks;
pub mod mount_table;
pub mod mounter;
pub mod reaper;
pub mod retry;
pub mod store;
pub mod supervisor;
pub mod volume;

pub use config::{Config, S3Config};
pub use driver::Driver;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, S3Config};
    pub use crate::driver::Driver;
    pub use crate::error::{Error, Result};
    pub use crate::mounter::MounterKind;
    pub use crate::volume::{FsMeta, VolumeId};
}
