//! Mount table inspection and OS unmount

use crate::error::{Error, Result};
use crate::retry::poll_until;
use nix::errno::Errno;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Interval between mountpoint checks while waiting for a mount
pub const MOUNT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// View of the host's mounts
pub trait MountTable: Send + Sync {
    /// Whether `path` is currently a mountpoint
    fn is_mount_point(&self, path: &Path) -> Result<bool>;

    /// Unmount `path`; not being mounted is not an error
    fn unmount(&self, path: &Path) -> Result<()>;
}

/// Mount table backed by `/proc/self/mountinfo` and `umount(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct HostMountTable;

impl MountTable for HostMountTable {
    fn is_mount_point(&self, path: &Path) -> Result<bool> {
        let path = resolve(path);
        let mounts = procfs::process::Process::myself()?.mountinfo()?;
        Ok(mounts.into_iter().any(|m| m.mount_point == path))
    }

    fn unmount(&self, path: &Path) -> Result<()> {
        info!("Unmounting {:?}", path);
        match nix::mount::umount(path) {
            Ok(()) => Ok(()),
            Err(Errno::EINVAL) | Err(Errno::ENOENT) => {
                debug!("{:?} is not mounted, nothing to unmount", path);
                Ok(())
            }
            Err(e) => {
                if self.is_mount_point(path)? {
                    Err(Error::Errno(e))
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn resolve(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Wait until `target` shows up as a mountpoint.
pub async fn wait_for_mount(
    table: &dyn MountTable,
    target: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    poll_until(
        MOUNT_POLL_INTERVAL,
        timeout,
        cancel,
        move || async move { table.is_mount_point(target) },
        || Error::MountTimeout {
            target: target.to_path_buf(),
            timeout,
        },
    )
    .await
}
