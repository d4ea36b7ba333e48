//! Configuration for the S3 CSI driver
//!
//! [`Config`] is built once at startup and shared read-only by every
//! request handler. [`S3Config`] is resolved per request from its secrets.

use crate::error::{Error, Result};
use crate::mounter::{MounterKind, StagingPaths};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Name the driver registers under
pub const DRIVER_NAME: &str = "ca.gmem.s3.csi";

/// Version reported to the orchestrator
pub const VENDOR_VERSION: &str = "v1.34.7";

/// Plugin directory used when `PLUGIN_DIR` is unset
pub const DEFAULT_PLUGIN_DIR: &str = "/var/lib/kubelet/plugins/ca.gmem.s3.csi";

/// Default number of liveness probes before giving up on a FUSE process
pub const DEFAULT_PROCESS_WAIT_ATTEMPTS: u32 = 20;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name the driver registers under
    pub driver_name: String,

    /// Identifier of the node this instance runs on
    pub node_id: String,

    /// CSI endpoint, e.g. `unix:///csi/csi.sock`
    pub endpoint: String,

    /// Mounter used when neither the volume nor the secret names one
    pub mounter: MounterKind,

    /// Filesystem locations
    pub paths: PathsConfig,

    /// Unmount configuration
    pub unmount: UnmountConfig,
}

/// Filesystem locations used while mounting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Plugin directory as seen from the host
    pub plugin_dir: PathBuf,

    /// Plugin directory as mounted inside the driver container
    pub staging_dir: PathBuf,

    /// Directory holding the mount binaries shipped with the driver
    pub bin_source_dir: PathBuf,

    /// Runtime unit directory of the host supervisor
    pub unit_dir: PathBuf,
}

/// Unmount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmountConfig {
    /// Liveness probes before a lingering FUSE process is reported
    pub process_wait_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            driver_name: DRIVER_NAME.to_string(),
            node_id: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_default(),
            endpoint: "unix:///csi/csi.sock".to_string(),
            mounter: MounterKind::default(),
            paths: PathsConfig::default(),
            unmount: UnmountConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            staging_dir: PathBuf::from("/csi"),
            bin_source_dir: PathBuf::from("/usr/bin"),
            unit_dir: PathBuf::from("/run/systemd/system"),
        }
    }
}

impl Default for UnmountConfig {
    fn default() -> Self {
        UnmountConfig {
            process_wait_attempts: DEFAULT_PROCESS_WAIT_ATTEMPTS,
        }
    }
}

impl PathsConfig {
    pub fn staging_paths(&self) -> StagingPaths {
        StagingPaths {
            bin_source_dir: self.bin_source_dir.clone(),
            staging_dir: self.staging_dir.clone(),
            plugin_dir: self.plugin_dir.clone(),
        }
    }
}

impl Config {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Config = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(dir) = get("PLUGIN_DIR") {
            self.paths.plugin_dir = PathBuf::from(dir);
        }
        if let Some(node_id) = get("NODE_ID") {
            self.node_id = node_id;
        }
        if let Some(endpoint) = get("CSI_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(mounter) = get("S3_MOUNTER") {
            self.mounter = MounterKind::resolve(Some(mounter.as_str()), self.mounter);
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            Error::Config(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path.as_ref(), content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.driver_name.is_empty() {
            return Err(Error::InvalidConfig("Driver name is required".to_string()));
        }

        if self.node_id.is_empty() {
            return Err(Error::InvalidConfig(
                "Node ID is required (set NODE_ID)".to_string(),
            ));
        }

        if self.unmount.process_wait_attempts == 0 {
            return Err(Error::InvalidConfig(
                "process_wait_attempts must be greater than 0".to_string(),
            ));
        }

        for (name, dir) in [
            ("plugin_dir", &self.paths.plugin_dir),
            ("staging_dir", &self.paths.staging_dir),
            ("bin_source_dir", &self.paths.bin_source_dir),
            ("unit_dir", &self.paths.unit_dir),
        ] {
            if !dir.is_absolute() {
                return Err(Error::InvalidConfig(format!(
                    "{} must be an absolute path, got {:?}",
                    name, dir
                )));
            }
        }

        Ok(())
    }
}

/// Object store connection settings for a single request
#[derive(Clone, Default, PartialEq, Eq)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Mounter named by the secret, overriding the driver default
    pub mounter: Option<String>,
}

impl S3Config {
    /// Read connection settings from request secrets
    pub fn from_secrets(secrets: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| secrets.get(key).cloned().unwrap_or_default();

        let config = S3Config {
            endpoint: get("endpoint"),
            region: get("region"),
            access_key_id: get("accessKeyID"),
            secret_access_key: get("secretAccessKey"),
            mounter: secrets.get("mounter").filter(|m| !m.is_empty()).cloned(),
        };

        if config.access_key_id.is_empty() || config.secret_access_key.is_empty() {
            return Err(Error::InvalidArgument(
                "accessKeyID and secretAccessKey are required in secrets".to_string(),
            ));
        }
        Ok(config)
    }

    /// Effective mounter: volume override, then secret, then driver default
    pub fn mounter_kind(&self, volume_override: Option<&str>, default: MounterKind) -> MounterKind {
        let cluster_default = MounterKind::resolve(self.mounter.as_deref(), default);
        MounterKind::resolve(volume_override, cluster_default)
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("mounter", &self.mounter)
            .finish()
    }
}
