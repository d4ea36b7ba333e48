//! s3csi - S3 CSI driver mount tooling
//!
//! Usage:
//!   s3csi config                          - Print the effective configuration
//!   s3csi publish <volume_id> <target>    - Mount a volume on this node
//!   s3csi unpublish <volume_id> <target>  - Unmount a volume and reap its process
//!   s3csi sanitize <name>                 - Show the volume id a name maps to
//!   s3csi units <volume_id>               - Show supervised units of a volume

use clap::{Parser, Subcommand};
use s3csi::{
    driver::{
        node::{NodePublishVolumeRequest, NodeUnpublishVolumeRequest},
        AccessMode, VolumeCapability,
    },
    mounter::MounterKind,
    store::MemoryStore,
    supervisor::{unit_name, Supervisor, SystemdSupervisor},
    volume::{VolumeId, MOUNTER_KEY, OPTIONS_KEY},
    Config, Driver, Error, Result,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "s3csi")]
#[command(version)]
#[command(about = "Mount orchestration for the S3 CSI driver")]
struct Cli {
    /// Configuration file path; defaults plus environment when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config,

    /// Mount a volume at a target path
    Publish {
        /// Volume id, `bucket` or `bucket/prefix`
        volume_id: String,

        /// Target directory
        target: PathBuf,

        /// Mounter to use instead of the configured default
        #[arg(long)]
        mounter: Option<String>,

        /// Mount options, as given in the storage class
        #[arg(long, allow_hyphen_values = true)]
        options: Option<String>,

        /// Object store endpoint
        #[arg(long, env = "S3_ENDPOINT", default_value = "")]
        endpoint: String,

        #[arg(long, env = "S3_REGION", default_value = "")]
        region: String,

        /// Mount read-only
        #[arg(long)]
        readonly: bool,
    },

    /// Unmount a volume and wait for its FUSE process to exit
    Unpublish {
        volume_id: String,
        target: PathBuf,
    },

    /// Show the volume id a requested volume name maps to
    Sanitize {
        name: String,

        /// Shared bucket the volume would live in
        #[arg(long)]
        bucket: Option<String>,
    },

    /// Show the supervised units for a volume
    Units { volume_id: String },
}

fn main() {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    // Run the command
    if let Err(e) = run_command(cli.command, cli.config.as_deref()) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(expand_tilde(path)),
        None => Config::from_env(),
    }
}

fn run_command(command: Commands, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;

    match command {
        Commands::Config => cmd_config(&config),

        Commands::Publish {
            volume_id,
            target,
            mounter,
            options,
            endpoint,
            region,
            readonly,
        } => {
            let mut context = HashMap::new();
            if let Some(mounter) = mounter {
                context.insert(MOUNTER_KEY.to_string(), mounter);
            }
            if let Some(options) = options {
                context.insert(OPTIONS_KEY.to_string(), options);
            }
            let secrets = secrets_from_env(endpoint, region)?;
            let req = NodePublishVolumeRequest {
                volume_id,
                target_path: target,
                capability: Some(VolumeCapability::mount(AccessMode::MultiNodeMultiWriter)),
                readonly,
                volume_context: context,
                secrets,
            };
            with_driver(config, |driver, cancel| async move {
                driver.node_publish_volume(req, &cancel).await
            })
        }

        Commands::Unpublish { volume_id, target } => {
            let req = NodeUnpublishVolumeRequest {
                volume_id,
                target_path: target,
            };
            with_driver(config, |driver, cancel| async move {
                driver.node_unpublish_volume(req, &cancel).await
            })
        }

        Commands::Sanitize { name, bucket } => {
            let volume_id = VolumeId::for_new_volume(&name, bucket.as_deref())?;
            println!("{}", volume_id);
            Ok(())
        }

        Commands::Units { volume_id } => cmd_units(&config, &volume_id),
    }
}

fn cmd_config(config: &Config) -> Result<()> {
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    println!("{}", json);
    Ok(())
}

/// Credentials come from the standard AWS environment variables
fn secrets_from_env(endpoint: String, region: String) -> Result<HashMap<String, String>> {
    let get = |key: &str| {
        std::env::var(key).map_err(|_| Error::InvalidArgument(format!("{} is not set", key)))
    };

    let mut secrets = HashMap::new();
    secrets.insert("accessKeyID".to_string(), get("AWS_ACCESS_KEY_ID")?);
    secrets.insert("secretAccessKey".to_string(), get("AWS_SECRET_ACCESS_KEY")?);
    secrets.insert("endpoint".to_string(), endpoint);
    secrets.insert("region".to_string(), region);
    Ok(secrets)
}

/// Run one driver operation, cancelling it on Ctrl-C
fn with_driver<F, Fut>(config: Config, op: F) -> Result<()>
where
    F: FnOnce(Arc<Driver>, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Runtime::new().map_err(|e| Error::Internal(e.to_string()))?;

    runtime.block_on(async {
        let driver = Arc::new(Driver::host(Arc::new(config), Arc::new(MemoryStore::new())));
        let cancel = CancellationToken::new();

        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling");
                    cancel.cancel();
                }
            })
        };

        let result = op(driver, cancel).await;
        watcher.abort();
        result
    })
}

fn cmd_units(config: &Config, volume_id: &str) -> Result<()> {
    let volume_id = VolumeId::parse(volume_id)?;
    let supervisor = SystemdSupervisor::new(&config.paths.unit_dir);

    let runtime = tokio::runtime::Runtime::new().map_err(|e| Error::Internal(e.to_string()))?;
    runtime.block_on(async {
        supervisor.ping().await?;

        println!("Units for volume {}", volume_id);
        println!("=========================");
        for kind in [MounterKind::TigrisFs, MounterKind::GeeseFs] {
            let name = unit_name(kind.as_str(), volume_id.as_str());
            let status = supervisor.inspect(&name).await?;
            match status.mount_target() {
                Some(target) => println!("{}: {:?} serving {:?}", name, status.state, target),
                None => println!("{}: {:?}", name, status.state),
            }
        }
        Ok(())
    })
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
