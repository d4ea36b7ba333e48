//! Staging of mount binaries into the plugin directory
//!
//! Supervised processes run on the host, so the FUSE binary shipped in the
//! driver image is copied to a directory the host can see.

use crate::error::{Error, Result};
use std::fs::{self, File, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::info;

/// Copy `from` to `to` unless `to` already has the same size and mtime.
///
/// Returns whether a copy was made. An outdated destination is removed
/// first so a running copy of the old binary does not cause `ETXTBSY`.
pub fn stage_binary(from: &Path, to: &Path) -> Result<bool> {
    let src = fs::metadata(from)
        .map_err(|e| Error::Config(format!("failed to stat {:?}: {}", from, e)))?;
    let src_mtime = src.modified()?;

    match fs::metadata(to) {
        Ok(dst) => {
            if dst.len() == src.len() && dst.modified()? == src_mtime {
                return Ok(false);
            }
            fs::remove_file(to).map_err(|e| {
                Error::internal(format!("error removing {:?} to update it: {}", to, e))
            })?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(Error::internal(format!("failed to stat {:?}: {}", to, e)));
        }
    }

    let copy_err = |e: std::io::Error| Error::internal(format!("error copying {:?} to {:?}: {}", from, to, e));
    fs::copy(from, to).map_err(copy_err)?;
    fs::set_permissions(to, Permissions::from_mode(0o755)).map_err(copy_err)?;
    File::options()
        .write(true)
        .open(to)
        .and_then(|f| f.set_modified(src_mtime))
        .map_err(copy_err)?;

    info!("Staged {:?} to {:?}", from, to);
    Ok(true)
}
