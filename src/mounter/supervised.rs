//! Supervised mounts
//!
//! Hands the FUSE process to the host supervisor so that it outlives the
//! driver, detecting idempotent and conflicting re-invocations.

use super::launcher::launch_and_wait;
use super::staging::stage_binary;
use super::MountContext;
use crate::error::{Error, Result};
use crate::mount_table::wait_for_mount;
use crate::supervisor::{unit_name, CollectMode, UnitHandle, UnitSpec, UnitState};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long a supervised mount may take to appear
pub const SUPERVISED_MOUNT_TIMEOUT: Duration = Duration::from_secs(30);

/// A mount to run under the supervisor
#[derive(Debug, Clone)]
pub struct SupervisedLaunch {
    pub volume_id: String,
    pub target: PathBuf,
    /// Binary name, used for the unit name and the staged copy
    pub binary: String,
    pub description: String,
    /// Arguments after the staged executable; the target must come last
    pub exec_args: Vec<String>,
    /// Arguments used when falling back to a direct launch
    pub direct_args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Make sure a supervised process serves `launch.target`.
pub async fn ensure_mounted(
    ctx: &MountContext,
    launch: &SupervisedLaunch,
    cancel: &CancellationToken,
) -> Result<()> {
    let unit = UnitHandle::new(unit_name(&launch.binary, &launch.volume_id));
    let supervisor = ctx.supervisor.as_ref();

    if let Err(e) = supervisor.ping().await {
        match e {
            Error::Transport(msg) => {
                error!(
                    "failed to connect to process supervisor: {}, starting {} directly",
                    msg, launch.binary
                );
                return launch_and_wait(
                    ctx.mount_table.as_ref(),
                    &launch.target,
                    &launch.binary,
                    &launch.direct_args,
                    &launch.env,
                    cancel,
                )
                .await;
            }
            other => return Err(other),
        }
    }

    let status = supervisor.inspect(&unit.name).await?;
    match status.state {
        UnitState::Active | UnitState::Activating => {
            let current = status.mount_target().unwrap_or_default();
            if current != launch.target {
                // One unit per volume id: the same bucket/prefix cannot back
                // two mountpoints on one node.
                return Err(Error::VolumeConflict {
                    volume_id: launch.volume_id.clone(),
                    requested: launch.target.clone(),
                    existing: current,
                });
            }
            info!(
                "Unit {} already serves {:?}, waiting for mount",
                unit.name, launch.target
            );
            return wait_for_mount(
                ctx.mount_table.as_ref(),
                &launch.target,
                SUPERVISED_MOUNT_TIMEOUT,
                cancel,
            )
            .await;
        }
        UnitState::Absent => {}
        UnitState::Inactive | UnitState::Failed | UnitState::Deactivating => {
            warn!(
                "Unit {} left in state {:?}, stopping and resetting it",
                unit.name, status.state
            );
            supervisor.stop(&unit).await?;
            supervisor.reset_failed(&unit).await?;
        }
    }

    stage_binary(
        &ctx.paths.bin_source_dir.join(&launch.binary),
        &ctx.paths.staging_dir.join(&launch.binary),
    )?;

    supervisor
        .install_stop_override(&unit, &launch.target)
        .await?;

    let mut exec = vec![ctx
        .paths
        .plugin_dir
        .join(&launch.binary)
        .to_string_lossy()
        .into_owned()];
    exec.extend(launch.exec_args.iter().cloned());

    info!("Starting mount using supervisor: {}", exec.join(" "));
    let spec = UnitSpec {
        name: unit.name.clone(),
        description: launch.description.clone(),
        exec,
        env: launch.env.clone(),
        collect: CollectMode::InactiveOrFailed,
    };
    supervisor.ensure_running(&spec).await?;

    wait_for_mount(
        ctx.mount_table.as_ref(),
        &launch.target,
        SUPERVISED_MOUNT_TIMEOUT,
        cancel,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount_table::testing::FakeMountTable;
    use crate::mounter::StagingPaths;
    use crate::supervisor::testing::FakeSupervisor;
    use std::path::Path;
    use std::sync::Arc;

    struct Harness {
        _dir: tempfile::TempDir,
        supervisor: Arc<FakeSupervisor>,
        table: Arc<FakeMountTable>,
        ctx: MountContext,
    }

    fn harness(supervisor: FakeSupervisor) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        let staging = dir.path().join("csi");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(bin.join("true"), b"#!/bin/sh\n").unwrap();

        let supervisor = Arc::new(supervisor);
        let table = Arc::new(FakeMountTable::default());
        let ctx = MountContext {
            supervisor: supervisor.clone(),
            mount_table: table.clone(),
            paths: StagingPaths {
                bin_source_dir: bin,
                staging_dir: staging,
                plugin_dir: PathBuf::from("/var/lib/kubelet/plugins/ca.gmem.s3.csi"),
            },
        };
        Harness {
            _dir: dir,
            supervisor,
            table,
            ctx,
        }
    }

    fn launch(target: &str) -> SupervisedLaunch {
        SupervisedLaunch {
            volume_id: "shared/myvol".to_string(),
            target: PathBuf::from(target),
            binary: "true".to_string(),
            description: "mount for Kubernetes volume shared/myvol".to_string(),
            exec_args: vec!["-f".into(), "shared:myvol".into(), target.to_string()],
            direct_args: vec!["shared:myvol".into(), target.to_string()],
            env: vec![("AWS_ACCESS_KEY_ID".into(), "key".into())],
        }
    }

    #[tokio::test]
    async fn test_mount_is_idempotent() {
        let h = harness(FakeSupervisor::new());
        h.table.mount(Path::new("/mnt/a"));
        let cancel = CancellationToken::new();

        ensure_mounted(&h.ctx, &launch("/mnt/a"), &cancel).await.unwrap();
        ensure_mounted(&h.ctx, &launch("/mnt/a"), &cancel).await.unwrap();

        assert_eq!(h.supervisor.started.lock().len(), 1);
        assert_eq!(h.supervisor.units.lock().len(), 1);

        let started = h.supervisor.started.lock()[0].clone();
        assert_eq!(started.name, "true-shared_2fmyvol.service");
        assert_eq!(started.collect, CollectMode::InactiveOrFailed);
        assert_eq!(
            started.exec[0],
            "/var/lib/kubelet/plugins/ca.gmem.s3.csi/true"
        );
        assert_eq!(started.exec.last().unwrap(), "/mnt/a");
        assert_eq!(
            h.supervisor.overrides.lock()[0],
            (started.name.clone(), PathBuf::from("/mnt/a"))
        );
        assert!(h.ctx.paths.staging_dir.join("true").exists());
    }

    #[tokio::test]
    async fn test_conflicting_target_rejected() {
        let h = harness(FakeSupervisor::new());
        h.table.mount(Path::new("/mnt/a"));
        let cancel = CancellationToken::new();
        ensure_mounted(&h.ctx, &launch("/mnt/a"), &cancel).await.unwrap();

        let err = ensure_mounted(&h.ctx, &launch("/mnt/b"), &cancel)
            .await
            .unwrap_err();
        match err {
            Error::VolumeConflict {
                requested, existing, ..
            } => {
                assert_eq!(requested, PathBuf::from("/mnt/b"));
                assert_eq!(existing, PathBuf::from("/mnt/a"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let units = h.supervisor.units.lock();
        let unit = units.get("true-shared_2fmyvol.service").unwrap();
        assert_eq!(unit.state, UnitState::Active);
        assert_eq!(unit.mount_target(), Some(PathBuf::from("/mnt/a")));
        assert!(h.supervisor.stopped.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_unit_is_cleared_before_start() {
        let h = harness(FakeSupervisor::new());
        h.supervisor
            .insert("true-shared_2fmyvol.service", UnitState::Failed, &["/x", "/mnt/old"]);
        h.table.mount(Path::new("/mnt/a"));

        ensure_mounted(&h.ctx, &launch("/mnt/a"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*h.supervisor.stopped.lock(), vec!["true-shared_2fmyvol.service"]);
        assert_eq!(*h.supervisor.reset.lock(), vec!["true-shared_2fmyvol.service"]);
        assert_eq!(h.supervisor.started.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_supervisor_falls_back_to_direct() {
        let h = harness(FakeSupervisor::unreachable());
        h.table.mount(Path::new("/mnt/a"));

        ensure_mounted(&h.ctx, &launch("/mnt/a"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(h.supervisor.started.lock().is_empty());
        assert!(!h.ctx.paths.staging_dir.join("true").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_never_appears() {
        let h = harness(FakeSupervisor::new());
        let err = ensure_mounted(&h.ctx, &launch("/mnt/a"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MountTimeout { timeout, .. } if timeout == SUPERVISED_MOUNT_TIMEOUT));
    }
}
