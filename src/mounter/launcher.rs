//! Direct (unsupervised) FUSE process launcher

use crate::error::{Error, Result};
use crate::mount_table::{wait_for_mount, MountTable};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a directly launched mount may take to appear
pub const DIRECT_MOUNT_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `program` and wait for `target` to become a mountpoint.
///
/// The program is expected to daemonize: it is waited on, and a non-zero
/// exit fails the call with its captured stdout.
pub async fn launch_and_wait(
    table: &dyn MountTable,
    target: &Path,
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    cancel: &CancellationToken,
) -> Result<()> {
    info!("Mounting fuse with command: {} and args: {:?}", program, args);

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(false);

    // A daemon that keeps stdout open holds the pipe until it exits
    let output = tokio::select! {
        output = command.output() => output.map_err(|e| Error::UnderlyingTool {
            command: program.to_string(),
            args: args.to_vec(),
            output: e.to_string(),
        })?,
        _ = cancel.cancelled() => {
            warn!("Launch of {} cancelled", program);
            return Err(Error::Cancelled);
        }
    };

    if !output.status.success() {
        return Err(Error::UnderlyingTool {
            command: program.to_string(),
            args: args.to_vec(),
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
        });
    }

    debug!("{} exited, waiting for mount at {:?}", program, target);
    wait_for_mount(table, target, DIRECT_MOUNT_TIMEOUT, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount_table::testing::FakeMountTable;

    #[tokio::test]
    async fn test_failing_tool_reports_output() {
        let table = FakeMountTable::default();
        let cancel = CancellationToken::new();
        let err = launch_and_wait(
            &table,
            Path::new("/mnt/never"),
            "sh",
            &["-c".to_string(), "echo bucket missing; exit 3".to_string()],
            &[],
            &cancel,
        )
        .await
        .unwrap_err();

        match err {
            Error::UnderlyingTool { command, output, .. } => {
                assert_eq!(command, "sh");
                assert!(output.contains("bucket missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_error() {
        let table = FakeMountTable::default();
        let cancel = CancellationToken::new();
        let err = launch_and_wait(
            &table,
            Path::new("/mnt/never"),
            "/nonexistent/fuse-binary",
            &[],
            &[],
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::UnderlyingTool { .. }));
    }

    #[tokio::test]
    async fn test_cancel_while_stdout_held_open() {
        let table = FakeMountTable::default();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        // The background sleep inherits stdout after the shell exits
        let started = std::time::Instant::now();
        let err = launch_and_wait(
            &table,
            Path::new("/mnt/never"),
            "sh",
            &["-c".to_string(), "sleep 5 & exit 0".to_string()],
            &[],
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_success_waits_for_mount() {
        let table = FakeMountTable::default();
        table.mount(Path::new("/mnt/ok"));
        let cancel = CancellationToken::new();
        launch_and_wait(
            &table,
            Path::new("/mnt/ok"),
            "sh",
            &["-c".to_string(), "test \"$AWS_ACCESS_KEY_ID\" = key".to_string()],
            &[("AWS_ACCESS_KEY_ID".to_string(), "key".to_string())],
            &cancel,
        )
        .await
        .unwrap();
    }
}
