//! Unmount and FUSE process reaping
//!
//! FUSE daemons exit asynchronously after their mount is detached. The
//! orchestrator may reuse the target as soon as unpublish returns, so the
//! reaper waits for the daemon to actually be gone.

use crate::error::{Error, Result};
use crate::mount_table::MountTable;
use crate::retry::{sleep_or_cancel, Backoff};
use crate::supervisor::{Supervisor, UnitHandle, UnitState};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// View of the host's processes
pub trait ProcessTable: Send + Sync {
    /// All visible pids, excluding the calling process
    fn pids(&self) -> Result<Vec<i32>>;

    /// Command line of `pid`, one entry per argument
    fn cmdline(&self, pid: i32) -> Result<Vec<String>>;

    /// Whether signal 0 can be delivered to `pid`
    fn is_alive(&self, pid: i32) -> bool;
}

/// Process table backed by `/proc` and `kill(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct HostProcessTable;

impl ProcessTable for HostProcessTable {
    fn pids(&self) -> Result<Vec<i32>> {
        // Our own argv may name the target, as with `s3csi unpublish`
        let own = std::process::id() as i32;
        Ok(procfs::process::all_processes()?
            .filter_map(|p| p.ok())
            .map(|p| p.pid)
            .filter(|pid| *pid != own)
            .collect())
    }

    fn cmdline(&self, pid: i32) -> Result<Vec<String>> {
        Ok(procfs::process::Process::new(pid)?.cmdline()?)
    }

    fn is_alive(&self, pid: i32) -> bool {
        kill(Pid::from_raw(pid), None).is_ok()
    }
}

/// First process whose command line mentions `target`.
///
/// Processes that vanish or hide their cmdline during the scan are skipped.
pub fn find_fuse_mount_process(table: &dyn ProcessTable, target: &Path) -> Result<Option<i32>> {
    let needle = target.to_string_lossy();
    for pid in table.pids()? {
        let cmdline = match table.cmdline(pid) {
            Ok(cmdline) => cmdline,
            Err(_) => continue,
        };
        if cmdline.join(" ").contains(needle.as_ref()) {
            return Ok(Some(pid));
        }
    }
    Ok(None)
}

/// Wait for `pid` to exit, probing up to `max_attempts` times.
pub async fn wait_for_pid_exit(
    table: &dyn ProcessTable,
    pid: i32,
    max_attempts: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut backoff = Backoff::process_exit(max_attempts);
    while let Some(delay) = backoff.next_delay() {
        let cmdline = match table.cmdline(pid) {
            Ok(cmdline) => cmdline,
            Err(e) => {
                debug!("Couldn't read cmdline of PID {}: {}", pid, e);
                return Ok(());
            }
        };
        // A zombie keeps its pid but loses its cmdline
        if cmdline.is_empty() {
            warn!("Fuse process with PID {} seems dead", pid);
            return Ok(());
        }
        if !table.is_alive(pid) {
            info!("Fuse process with PID {} exited", pid);
            return Ok(());
        }
        info!(
            "Fuse process with PID {} still active, waiting {:?}",
            pid, delay
        );
        sleep_or_cancel(delay, cancel).await?;
    }
    Err(Error::ProcessWaitTimeout {
        pid,
        attempts: backoff.attempts(),
    })
}

/// Wait until no process serving `target` remains.
pub async fn wait_for_process_exit(
    table: &dyn ProcessTable,
    target: &Path,
    max_attempts: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    match find_fuse_mount_process(table, target)? {
        None => Ok(()),
        Some(pid) => wait_for_pid_exit(table, pid, max_attempts, cancel).await,
    }
}

/// Stop the supervised unit if it is running.
///
/// Returns whether a stop was issued.
pub async fn supervised_unmount(supervisor: &dyn Supervisor, unit: &UnitHandle) -> Result<bool> {
    let status = supervisor.inspect(&unit.name).await?;
    match status.state {
        UnitState::Absent | UnitState::Inactive | UnitState::Failed => {
            debug!("Unit {} is {:?}, nothing to stop", unit.name, status.state);
            Ok(false)
        }
        UnitState::Active | UnitState::Activating | UnitState::Deactivating => {
            info!("Stopping unit {}", unit.name);
            supervisor.stop(unit).await?;
            Ok(true)
        }
    }
}

/// Unmount `target` and wait for its FUSE daemon to go away.
pub async fn fuse_unmount(
    mounts: &dyn MountTable,
    processes: &dyn ProcessTable,
    target: &Path,
    max_attempts: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    mounts.unmount(target)?;

    let pid = match find_fuse_mount_process(processes, target) {
        Ok(Some(pid)) => pid,
        Ok(None) => {
            warn!(
                "Unable to find PID of fuse mount {:?}, it must have finished already",
                target
            );
            return Ok(());
        }
        Err(e) => {
            error!("Error getting PID of fuse mount: {}", e);
            return Ok(());
        }
    };

    info!(
        "Found fuse pid {} of mount {:?}, checking if it still runs",
        pid, target
    );
    wait_for_pid_exit(processes, pid, max_attempts, cancel).await
}
