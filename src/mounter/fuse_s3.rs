//! TigrisFS / GeeseFS backend

use super::launcher::launch_and_wait;
use super::options::filter_mount_options;
use super::supervised::{ensure_mounted, SupervisedLaunch};
use super::{credential_env, MountContext, Mounter, MounterKind};
use crate::config::S3Config;
use crate::error::Result;
use crate::volume::FsMeta;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Unprivileged uid/gid the mount process drops to (nobody:nogroup)
const UNPRIVILEGED_ID: &str = "65534";

/// Mounter for TigrisFS and its upstream GeeseFS
pub struct FuseS3Mounter {
    kind: MounterKind,
    meta: FsMeta,
    endpoint: String,
    region: String,
    env: Vec<(String, String)>,
    ctx: MountContext,
}

/// Arguments for one mount, before the mode specific prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuseS3Args {
    pub args: Vec<String>,
    pub supervised: bool,
}

impl FuseS3Mounter {
    pub fn new(kind: MounterKind, meta: FsMeta, s3: &S3Config, ctx: MountContext) -> Self {
        FuseS3Mounter {
            kind,
            meta,
            endpoint: s3.endpoint.clone(),
            region: s3.region.clone(),
            env: credential_env(s3),
            ctx,
        }
    }

    fn binary(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Common arguments: region, privilege drop, filtered options, then
    /// `bucket[:prefix]` and the target.
    pub fn build_args(&self, target: &Path) -> FuseS3Args {
        let mut args = Vec::new();
        if !self.region.is_empty() {
            args.push("--region".to_string());
            args.push(self.region.clone());
        }
        args.extend(
            ["--setuid", UNPRIVILEGED_ID, "--setgid", UNPRIVILEGED_ID]
                .iter()
                .map(|s| s.to_string()),
        );

        let filtered = filter_mount_options(&self.meta.mount_options);
        args.extend(filtered.args);

        let full_path = if self.meta.prefix.is_empty() {
            self.meta.bucket.clone()
        } else {
            format!("{}:{}", self.meta.bucket, self.meta.prefix)
        };
        args.push(full_path);
        args.push(target.to_string_lossy().into_owned());

        FuseS3Args {
            args,
            supervised: filtered.supervised,
        }
    }

    /// Arguments for a direct launch: the binary daemonizes and logs to
    /// the driver's stderr.
    fn direct_args(&self, args: &[String]) -> Vec<String> {
        let mut direct = vec![
            "--endpoint".to_string(),
            self.endpoint.clone(),
            "-o".to_string(),
            "allow_other".to_string(),
            "--log-file".to_string(),
            "/dev/stderr".to_string(),
        ];
        direct.extend(args.iter().cloned());
        direct
    }

    /// Arguments for a supervised launch: the binary stays in the
    /// foreground under the supervisor.
    fn supervised_args(&self, args: &[String]) -> Vec<String> {
        let mut supervised = vec![
            "-f".to_string(),
            "-o".to_string(),
            "allow_other".to_string(),
            "--endpoint".to_string(),
            self.endpoint.clone(),
        ];
        supervised.extend(args.iter().cloned());
        supervised
    }

    fn display_name(&self) -> &'static str {
        match self.kind {
            MounterKind::GeeseFs => "GeeseFS",
            _ => "TigrisFS",
        }
    }
}

#[async_trait]
impl Mounter for FuseS3Mounter {
    fn kind(&self) -> MounterKind {
        self.kind
    }

    async fn mount(
        &self,
        target: &Path,
        volume_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let built = self.build_args(target);
        let direct_args = self.direct_args(&built.args);

        if !built.supervised {
            return launch_and_wait(
                self.ctx.mount_table.as_ref(),
                target,
                self.binary(),
                &direct_args,
                &self.env,
                cancel,
            )
            .await;
        }

        let launch = SupervisedLaunch {
            volume_id: volume_id.to_string(),
            target: target.to_path_buf(),
            binary: self.binary().to_string(),
            description: format!(
                "{} mount for Kubernetes volume {}",
                self.display_name(),
                volume_id
            ),
            exec_args: self.supervised_args(&built.args),
            direct_args,
            env: self.env.clone(),
        };
        ensure_mounted(&self.ctx, &launch, cancel).await
    }
}
