//! Process supervision
//!
//! Mount processes can be handed to an external supervisor so they outlive
//! the driver. The [`Supervisor`] trait is the seam; [`SystemdSupervisor`]
//! is the production implementation.

mod systemd;

pub use systemd::SystemdSupervisor;

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Stop timeout written into the cleanup override
pub const STOP_TIMEOUT: Duration = Duration::from_secs(20);

/// Observed state of a supervised unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// No such unit is loaded
    Absent,
    /// Starting or reloading
    Activating,
    Active,
    /// Stopping
    Deactivating,
    Inactive,
    Failed,
}

impl UnitState {
    /// Parse a systemd `ActiveState` value
    pub fn from_active_state(state: &str) -> Self {
        match state {
            "active" => UnitState::Active,
            "activating" | "reloading" => UnitState::Activating,
            "deactivating" => UnitState::Deactivating,
            "failed" => UnitState::Failed,
            _ => UnitState::Inactive,
        }
    }

    /// Whether the unit currently owns a running process
    pub fn is_running(&self) -> bool {
        matches!(self, UnitState::Active | UnitState::Activating)
    }
}

/// Unit state plus the argument vector it was started with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub state: UnitState,
    pub exec_args: Vec<String>,
}

impl UnitStatus {
    pub fn absent() -> Self {
        UnitStatus {
            state: UnitState::Absent,
            exec_args: Vec::new(),
        }
    }

    /// Mount target recorded in the unit, which is its last argument
    pub fn mount_target(&self) -> Option<PathBuf> {
        self.exec_args.last().map(PathBuf::from)
    }
}

/// When the supervisor may forget a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
    Inactive,
    InactiveOrFailed,
}

impl CollectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectMode::Inactive => "inactive",
            CollectMode::InactiveOrFailed => "inactive-or-failed",
        }
    }
}

/// Everything needed to start a transient unit
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub name: String,
    pub description: String,
    /// Executable followed by its arguments
    pub exec: Vec<String>,
    pub env: Vec<(String, String)>,
    pub collect: CollectMode,
}

/// Handle to a unit known to the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitHandle {
    pub name: String,
}

impl UnitHandle {
    pub fn new(name: impl Into<String>) -> Self {
        UnitHandle { name: name.into() }
    }
}

/// External process supervisor
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Check that the supervisor is reachable; fails with `Error::Transport`
    async fn ping(&self) -> Result<()>;

    async fn inspect(&self, name: &str) -> Result<UnitStatus>;

    /// Start a transient unit from `spec`
    async fn ensure_running(&self, spec: &UnitSpec) -> Result<UnitHandle>;

    /// Stop a unit, returning once the stop job has completed
    async fn stop(&self, unit: &UnitHandle) -> Result<()>;

    /// Clear a unit's failure record
    async fn reset_failed(&self, unit: &UnitHandle) -> Result<()>;

    /// Arrange for `target` to be force-unmounted whenever the unit stops
    async fn install_stop_override(&self, unit: &UnitHandle, target: &Path) -> Result<()>;
}

/// Escape a string for use inside a unit name.
///
/// ASCII letters and digits are kept (a leading digit is escaped), every
/// other byte becomes `_` followed by two lowercase hex digits. The empty
/// string becomes `_`.
pub fn escape_unit_component(s: &str) -> String {
    if s.is_empty() {
        return "_".to_string();
    }

    let mut out = String::with_capacity(s.len());
    for (i, b) in s.bytes().enumerate() {
        if b.is_ascii_alphabetic() || (i > 0 && b.is_ascii_digit()) {
            out.push(b as char);
        } else {
            out.push('_');
            out.push_str(&format!("{:02x}", b));
        }
    }
    out
}

/// Unit name for a mount binary serving a volume
pub fn unit_name(binary: &str, volume_id: &str) -> String {
    format!("{}-{}.service", binary, escape_unit_component(volume_id))
}
