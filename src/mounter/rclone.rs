//! rclone backend

use super::launcher::launch_and_wait;
use super::options::filter_direct_mount_options;
use super::{credential_env, MountContext, Mounter, MounterKind};
use crate::config::S3Config;
use crate::error::Result;
use crate::volume::FsMeta;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

const RCLONE_COMMAND: &str = "rclone";

pub struct RcloneMounter {
    meta: FsMeta,
    url: String,
    region: String,
    env: Vec<(String, String)>,
    ctx: MountContext,
}

impl RcloneMounter {
    pub fn new(meta: FsMeta, s3: &S3Config, ctx: MountContext) -> Self {
        RcloneMounter {
            meta,
            url: s3.endpoint.clone(),
            region: s3.region.clone(),
            env: credential_env(s3),
            ctx,
        }
    }

    pub fn build_args(&self, target: &Path) -> Vec<String> {
        let remote = if self.meta.prefix.is_empty() {
            format!(":s3:{}", self.meta.bucket)
        } else {
            format!(":s3:{}/{}", self.meta.bucket, self.meta.prefix)
        };
        let mut args = vec![
            "mount".to_string(),
            remote,
            target.to_string_lossy().into_owned(),
            "--daemon".to_string(),
            "--s3-provider=AWS".to_string(),
            "--s3-env-auth=true".to_string(),
            format!("--s3-endpoint={}", self.url),
            "--allow-other".to_string(),
            "--vfs-cache-mode=writes".to_string(),
        ];
        if !self.region.is_empty() {
            args.push(format!("--s3-region={}", self.region));
        }
        args.extend(filter_direct_mount_options(&self.meta.mount_options).args);
        args
    }
}

#[async_trait]
impl Mounter for RcloneMounter {
    fn kind(&self) -> MounterKind {
        MounterKind::Rclone
    }

    async fn mount(
        &self,
        target: &Path,
        _volume_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = self.build_args(target);
        launch_and_wait(
            self.ctx.mount_table.as_ref(),
            target,
            RCLONE_COMMAND,
            &args,
            &self.env,
            cancel,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount_table::testing::FakeMountTable;
    use crate::mounter::StagingPaths;
    use crate::supervisor::testing::FakeSupervisor;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn test_build_args() {
        let ctx = MountContext {
            supervisor: Arc::new(FakeSupervisor::new()),
            mount_table: Arc::new(FakeMountTable::default()),
            paths: StagingPaths {
                bin_source_dir: PathBuf::from("/usr/bin"),
                staging_dir: PathBuf::from("/csi"),
                plugin_dir: PathBuf::from("/plugins"),
            },
        };
        let s3 = S3Config {
            endpoint: "https://s3".to_string(),
            ..Default::default()
        };
        let meta = FsMeta {
            bucket: "b".to_string(),
            prefix: String::new(),
            mounter: None,
            mount_options: vec!["--no-systemd".to_string(), "--read-only".to_string()],
            capacity_bytes: 0,
        };

        let args = RcloneMounter::new(meta, &s3, ctx).build_args(Path::new("/mnt/t"));
        assert_eq!(&args[..3], ["mount", ":s3:b", "/mnt/t"]);
        assert!(args.contains(&"--s3-endpoint=https://s3".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--s3-region")));
        assert_eq!(args.last().unwrap(), "--read-only");
        assert!(!args.contains(&"--no-systemd".to_string()));
    }

    #[test]
    fn test_log_file_kept() {
        let ctx = MountContext {
            supervisor: Arc::new(FakeSupervisor::new()),
            mount_table: Arc::new(FakeMountTable::default()),
            paths: StagingPaths {
                bin_source_dir: PathBuf::from("/usr/bin"),
                staging_dir: PathBuf::from("/csi"),
                plugin_dir: PathBuf::from("/plugins"),
            },
        };
        let meta = FsMeta {
            bucket: "b".to_string(),
            prefix: "p".to_string(),
            mounter: None,
            mount_options: vec!["--log-file=/tmp/rclone.log".to_string(), "--cache".to_string()],
            capacity_bytes: 0,
        };

        let args = RcloneMounter::new(meta, &S3Config::default(), ctx).build_args(Path::new("/mnt/t"));
        assert_eq!(args[1], ":s3:b/p");
        assert_eq!(&args[args.len() - 2..], ["--log-file=/tmp/rclone.log", "--cache"]);
    }
}
