//! Node service: publishing volumes onto target paths

use super::{AccessType, Driver, VolumeCapability};
use crate::config::S3Config;
use crate::error::{Error, Result};
use crate::mounter::{new_mounter, MounterKind};
use crate::reaper::{fuse_unmount, supervised_unmount};
use crate::supervisor::{unit_name, UnitHandle};
use crate::volume::{FsMeta, VolumeId};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Optional node features; none are currently offered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCapability {
    StageUnstageVolume,
    GetVolumeStats,
    ExpandVolume,
}

/// Backends whose mounts may be owned by a supervised unit
const SUPERVISED_KINDS: [MounterKind; 2] = [MounterKind::TigrisFs, MounterKind::GeeseFs];

#[derive(Debug, Clone, Default)]
pub struct NodePublishVolumeRequest {
    pub volume_id: String,
    pub target_path: PathBuf,
    pub capability: Option<VolumeCapability>,
    pub readonly: bool,
    pub volume_context: HashMap<String, String>,
    pub secrets: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeUnpublishVolumeRequest {
    pub volume_id: String,
    pub target_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: String,
}

fn require_target(target: &std::path::Path) -> Result<()> {
    if target.as_os_str().is_empty() {
        return Err(Error::InvalidArgument(
            "Target path missing in request".to_string(),
        ));
    }
    Ok(())
}

impl Driver {
    /// Mount the volume at the request's target path.
    pub async fn node_publish_volume(
        &self,
        req: NodePublishVolumeRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let volume_id = VolumeId::parse(&req.volume_id)?;
        require_target(&req.target_path)?;
        let capability = req.capability.ok_or_else(|| {
            Error::InvalidArgument("Volume capability missing in request".to_string())
        })?;
        if capability.access_type == AccessType::Block {
            return Err(Error::InvalidArgument(
                "Block access is not supported".to_string(),
            ));
        }

        let _guard = self.locks.lock(volume_id.as_str()).await;
        let target = &req.target_path;

        std::fs::create_dir_all(target).map_err(|e| {
            Error::internal(format!("failed to create target path {:?}: {}", target, e))
        })?;
        if self.ctx.mount_table.is_mount_point(target)? {
            info!("Volume {} is already mounted at {:?}", volume_id, target);
            return Ok(());
        }

        let s3 = S3Config::from_secrets(&req.secrets)?;
        let mut meta = FsMeta::from_volume_context(&volume_id, &req.volume_context);
        let kind = s3.mounter_kind(meta.mounter.as_deref(), self.config.mounter);
        if req.readonly {
            meta.mount_options
                .extend(kind.read_only_options().iter().map(|s| s.to_string()));
        }

        info!(
            "Publishing volume {} at {:?} using {}",
            volume_id, target, kind
        );
        let mounter = new_mounter(kind, meta, &s3, self.ctx.clone());
        mounter.mount(target, volume_id.as_str(), cancel).await?;

        info!("Volume {} successfully mounted to {:?}", volume_id, target);
        Ok(())
    }

    /// Unmount the target path and wait for the FUSE process to exit.
    pub async fn node_unpublish_volume(
        &self,
        req: NodeUnpublishVolumeRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let volume_id = VolumeId::parse(&req.volume_id)?;
        require_target(&req.target_path)?;

        let _guard = self.locks.lock(volume_id.as_str()).await;
        let target = &req.target_path;
        let supervisor = self.ctx.supervisor.as_ref();

        for kind in SUPERVISED_KINDS {
            let unit = UnitHandle::new(unit_name(kind.as_str(), volume_id.as_str()));
            match supervised_unmount(supervisor, &unit).await {
                Ok(true) => info!("Stopped unit {} for volume {}", unit.name, volume_id),
                Ok(false) => {}
                Err(Error::Transport(msg)) => {
                    warn!("Process supervisor unreachable ({}), unmounting directly", msg);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        fuse_unmount(
            self.ctx.mount_table.as_ref(),
            self.processes.as_ref(),
            target,
            self.config.unmount.process_wait_attempts,
            cancel,
        )
        .await?;

        info!("Volume {} unmounted from {:?}", volume_id, target);
        Ok(())
    }

    pub fn node_get_info(&self) -> NodeInfo {
        NodeInfo {
            node_id: self.config.node_id.clone(),
        }
    }

    pub fn node_get_capabilities(&self) -> Vec<NodeCapability> {
        Vec::new()
    }
}
