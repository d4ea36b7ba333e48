//! systemd-backed supervisor
//!
//! Drives the host's systemd through `systemctl` and `systemd-run`. The
//! driver container is expected to have the host's D-Bus socket mounted.

use super::{Supervisor, UnitHandle, UnitSpec, UnitState, UnitStatus, STOP_TIMEOUT};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Name of the drop-in holding the forced unmount on stop
pub const STOP_OVERRIDE_FILE: &str = "50-StopProps.conf";

/// Name of the environment file holding mount credentials
pub const CREDENTIALS_FILE: &str = "credentials.env";

/// Supervisor talking to systemd via its command line tools
#[derive(Debug, Clone)]
pub struct SystemdSupervisor {
    /// Directory holding runtime unit drop-ins (normally `/run/systemd/system`)
    unit_dir: PathBuf,
    systemctl: String,
    systemd_run: String,
}

impl SystemdSupervisor {
    pub fn new(unit_dir: impl Into<PathBuf>) -> Self {
        SystemdSupervisor {
            unit_dir: unit_dir.into(),
            systemctl: "systemctl".to_string(),
            systemd_run: "systemd-run".to_string(),
        }
    }

    /// Use different binaries for `systemctl` and `systemd-run`
    pub fn with_programs(mut self, systemctl: &str, systemd_run: &str) -> Self {
        self.systemctl = systemctl.to_string();
        self.systemd_run = systemd_run.to_string();
        self
    }

    /// Drop-in directory for a unit
    pub fn drop_in_dir(&self, unit: &str) -> PathBuf {
        self.unit_dir.join(format!("{}.d", unit))
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        debug!("Running {} {:?}", program, args);
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Transport(format!("failed to run {}: {}", program, e)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_connection_failure(&stderr) {
            Err(Error::Transport(stderr))
        } else {
            Err(Error::Supervisor(format!(
                "{} {} failed: {}",
                program,
                args.join(" "),
                stderr
            )))
        }
    }

    async fn systemctl(&self, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.run(&self.systemctl, &args).await
    }

    /// Write the credentials of a unit to a private environment file
    fn write_env_file(&self, unit: &str, env: &[(String, String)]) -> Result<PathBuf> {
        let dir = self.drop_in_dir(unit);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(CREDENTIALS_FILE);

        let content: String = env
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect();
        write_private(&path, content.as_bytes())?;
        Ok(path)
    }

    /// Delete the credentials of a unit once it no longer runs
    fn remove_env_file(&self, unit: &str) -> Result<()> {
        let path = self.drop_in_dir(unit).join(CREDENTIALS_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Supervisor(format!("error removing {:?}: {}", path, e))),
        }
    }
}

#[async_trait]
impl Supervisor for SystemdSupervisor {
    async fn ping(&self) -> Result<()> {
        self.systemctl(&["show", "--property=Version"]).await?;
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<UnitStatus> {
        let out = self
            .systemctl(&["show", name, "--property=LoadState,ActiveState,ExecStart"])
            .await?;
        Ok(parse_show_output(&out))
    }

    async fn ensure_running(&self, spec: &UnitSpec) -> Result<UnitHandle> {
        let mut args = vec![
            format!("--unit={}", spec.name),
            format!("--description={}", spec.description),
            format!("--property=CollectMode={}", spec.collect.as_str()),
        ];
        if !spec.env.is_empty() {
            let env_file = self.write_env_file(&spec.name, &spec.env)?;
            args.push(format!("--property=EnvironmentFile={}", env_file.display()));
        }
        args.push("--".to_string());
        args.extend(spec.exec.iter().cloned());

        info!("Starting systemd unit {}", spec.name);
        self.run(&self.systemd_run, &args).await.map_err(|e| match e {
            Error::Supervisor(msg) => Error::Supervisor(format!(
                "error starting systemd unit {} on host: {}",
                spec.name, msg
            )),
            other => other,
        })?;

        Ok(UnitHandle::new(&spec.name))
    }

    async fn stop(&self, unit: &UnitHandle) -> Result<()> {
        // systemctl waits for the stop job unless --no-block is given
        let stopped = self.systemctl(&["stop", &unit.name]).await;
        self.remove_env_file(&unit.name)?;
        stopped?;
        info!("systemd unit {} is stopped", unit.name);
        Ok(())
    }

    async fn reset_failed(&self, unit: &UnitHandle) -> Result<()> {
        match self.systemctl(&["reset-failed", &unit.name]).await {
            Err(Error::Supervisor(msg)) if msg.contains("not loaded") => {
                debug!("Unit {} already collected", unit.name);
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    async fn install_stop_override(&self, unit: &UnitHandle, target: &Path) -> Result<()> {
        let dir = self.drop_in_dir(&unit.name);
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Supervisor(format!("error creating directory {:?}: {}", dir, e)))?;

        let path = dir.join(STOP_OVERRIDE_FILE);
        write_private(&path, stop_override_content(target).as_bytes())
            .map_err(|e| Error::Supervisor(format!("error writing {:?}: {}", path, e)))?;
        Ok(())
    }
}

/// Drop-in forcing a lazy unmount of `target` when the unit stops
pub fn stop_override_content(target: &Path) -> String {
    format!(
        "[Service]\nExecStopPost=/bin/umount -f -l {}\nTimeoutStopSec={}\n",
        target.display(),
        STOP_TIMEOUT.as_secs()
    )
}

fn is_connection_failure(stderr: &str) -> bool {
    stderr.contains("Failed to connect to bus")
        || stderr.contains("System has not been booted with systemd")
        || stderr.contains("Failed to get D-Bus connection")
}

fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(content)
}

/// Parse `systemctl show --property=LoadState,ActiveState,ExecStart`
pub fn parse_show_output(out: &str) -> UnitStatus {
    let mut load_state = "";
    let mut active_state = "";
    let mut exec_args = Vec::new();

    for line in out.lines() {
        if let Some(value) = line.strip_prefix("LoadState=") {
            load_state = value.trim();
        } else if let Some(value) = line.strip_prefix("ActiveState=") {
            active_state = value.trim();
        } else if let Some(value) = line.strip_prefix("ExecStart=") {
            exec_args = parse_exec_argv(value);
        }
    }

    if load_state == "not-found" || active_state.is_empty() {
        return UnitStatus::absent();
    }

    let state = UnitState::from_active_state(active_state);
    if state.is_running() && exec_args.is_empty() {
        warn!("Running unit reports no ExecStart arguments");
    }
    UnitStatus { state, exec_args }
}

/// Extract `argv[]` from an ExecStart property value
fn parse_exec_argv(value: &str) -> Vec<String> {
    let Some(start) = value.find("argv[]=") else {
        return Vec::new();
    };
    let rest = &value[start + "argv[]=".len()..];
    let end = rest.find(" ;").unwrap_or(rest.len());
    rest[..end].split_whitespace().map(str::to_string).collect()
}
