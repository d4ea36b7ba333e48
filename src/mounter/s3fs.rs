//! s3fs backend
//!
//! s3fs is always launched directly; it forks into the background itself.

use super::launcher::launch_and_wait;
use super::options::filter_direct_mount_options;
use super::{credential_env, MountContext, Mounter, MounterKind};
use crate::config::S3Config;
use crate::error::Result;
use crate::volume::FsMeta;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

const S3FS_COMMAND: &str = "s3fs";

pub struct S3fsMounter {
    meta: FsMeta,
    url: String,
    region: String,
    env: Vec<(String, String)>,
    ctx: MountContext,
}

impl S3fsMounter {
    pub fn new(meta: FsMeta, s3: &S3Config, ctx: MountContext) -> Self {
        S3fsMounter {
            meta,
            url: s3.endpoint.clone(),
            region: s3.region.clone(),
            env: credential_env(s3),
            ctx,
        }
    }

    pub fn build_args(&self, target: &Path) -> Vec<String> {
        let mut args = vec![
            format!("{}:/{}", self.meta.bucket, self.meta.prefix),
            target.to_string_lossy().into_owned(),
            "-o".to_string(),
            "use_path_request_style".to_string(),
            "-o".to_string(),
            format!("url={}", self.url),
            "-o".to_string(),
            "allow_other".to_string(),
            "-o".to_string(),
            "mp_umask=000".to_string(),
        ];
        if !self.region.is_empty() {
            args.push("-o".to_string());
            args.push(format!("endpoint={}", self.region));
        }
        args.extend(filter_direct_mount_options(&self.meta.mount_options).args);
        args
    }
}

#[async_trait]
impl Mounter for S3fsMounter {
    fn kind(&self) -> MounterKind {
        MounterKind::S3fs
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
            S3FS_COMMAND,
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
            region: "us-east-1".to_string(),
            ..Default::default()
        };
        let meta = FsMeta {
            bucket: "b".to_string(),
            prefix: "p".to_string(),
            mounter: Some("s3fs".to_string()),
            mount_options: vec!["-o".to_string(), "nonempty".to_string()],
            capacity_bytes: 0,
        };

        let args = S3fsMounter::new(meta, &s3, ctx).build_args(Path::new("/mnt/t"));
        assert_eq!(&args[..2], ["b:/p", "/mnt/t"]);
        assert!(args.contains(&"url=https://s3".to_string()));
        assert!(args.contains(&"endpoint=us-east-1".to_string()));
        assert_eq!(&args[args.len() - 2..], ["-o", "nonempty"]);
    }
}
