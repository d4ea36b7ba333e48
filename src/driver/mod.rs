//! CSI driver services
//!
//! [`Driver`] implements the controller, node and identity services on top
//! of the mount orchestration in [`crate::mounter`] and [`crate::reaper`].
//! The transport that carries requests in is not part of this crate; the
//! request and response types here mirror the CSI messages the driver
//! actually reads.

pub mod controller;
pub mod identity;
pub mod node;

use crate::config::Config;
use crate::locks::VolumeLocks;
use crate::mount_table::{HostMountTable, MountTable};
use crate::mounter::MountContext;
use crate::reaper::{HostProcessTable, ProcessTable};
use crate::store::ObjectStore;
use crate::supervisor::{Supervisor, SystemdSupervisor};
use std::sync::Arc;
use tracing::info;

/// How a volume may be attached across nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    SingleNodeWriter,
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
}

/// Whether the volume is consumed as a filesystem or a raw device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    #[default]
    Mount,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeCapability {
    pub access_mode: AccessMode,
    pub access_type: AccessType,
}

impl VolumeCapability {
    pub fn mount(access_mode: AccessMode) -> Self {
        VolumeCapability {
            access_mode,
            access_type: AccessType::Mount,
        }
    }
}

/// The only access mode the driver serves
pub const SUPPORTED_ACCESS_MODE: AccessMode = AccessMode::MultiNodeMultiWriter;

/// Shared state behind every service
pub struct Driver {
    config: Arc<Config>,
    ctx: MountContext,
    processes: Arc<dyn ProcessTable>,
    store: Arc<dyn ObjectStore>,
    locks: VolumeLocks,
}

impl Driver {
    pub fn new(
        config: Arc<Config>,
        supervisor: Arc<dyn Supervisor>,
        mount_table: Arc<dyn MountTable>,
        processes: Arc<dyn ProcessTable>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let ctx = MountContext {
            supervisor,
            mount_table,
            paths: config.paths.staging_paths(),
        };
        Driver {
            config,
            ctx,
            processes,
            store,
            locks: VolumeLocks::new(),
        }
    }

    /// Driver wired to the host's systemd, mount table and process table
    pub fn host(config: Arc<Config>, store: Arc<dyn ObjectStore>) -> Self {
        info!("driver: {}", config.driver_name);
        info!("Version: {}", crate::config::VENDOR_VERSION);
        let supervisor = Arc::new(SystemdSupervisor::new(&config.paths.unit_dir));
        Driver::new(
            config,
            supervisor,
            Arc::new(HostMountTable),
            Arc::new(HostProcessTable),
            store,
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
