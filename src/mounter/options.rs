//! Mount option filtering
//!
//! User supplied options are forwarded to the FUSE binary only after the
//! supervision flag has been consumed and unsafe flags have been removed.

use tracing::warn;

/// Option that disables process supervision for a volume
pub const NO_SUPERVISION_FLAG: &str = "--no-systemd";

/// Flags the driver always sets itself.
///
/// `setuid`/`setgid` pin the mount process to nobody:nogroup, `endpoint`
/// comes from the backend configuration, and foreground mode is decided by
/// the launcher.
const ALWAYS_DENIED: &[&str] = &["setuid", "setgid", "endpoint", "f", "foreground"];

/// Flags naming paths inside the driver container.
///
/// A supervised process runs on the host and cannot see those paths.
const DENIED_WHEN_SUPERVISED: &[&str] = &["log-file", "shared-config", "cache"];

/// Result of filtering a raw option list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilteredOptions {
    /// Options to forward, in their original order
    pub args: Vec<String>,
    /// Whether the mount should run under the process supervisor
    pub supervised: bool,
    /// Options removed by the policy
    pub dropped: Vec<String>,
}

/// Bare key of a flag: leading dashes and any `=value` removed
pub fn option_key(opt: &str) -> &str {
    let stripped = opt
        .strip_prefix("--")
        .or_else(|| opt.strip_prefix('-'))
        .unwrap_or(opt);
    match stripped.split_once('=') {
        Some((key, _)) => key,
        None => stripped,
    }
}

/// Whether `key` may be forwarded in the given supervision mode
pub fn is_allowed(key: &str, supervised: bool) -> bool {
    if key.is_empty() || ALWAYS_DENIED.contains(&key) {
        return false;
    }
    !(supervised && DENIED_WHEN_SUPERVISED.contains(&key))
}

/// Filter raw mount options.
pub fn filter_mount_options(raw: &[String]) -> FilteredOptions {
    let supervised = !raw.iter().any(|o| o == NO_SUPERVISION_FLAG);
    filter_with(raw, supervised)
}

/// Filter options for a backend that never runs under the supervisor
pub fn filter_direct_mount_options(raw: &[String]) -> FilteredOptions {
    filter_with(raw, false)
}

fn filter_with(raw: &[String], supervised: bool) -> FilteredOptions {
    let mut filtered = FilteredOptions {
        supervised,
        ..Default::default()
    };

    let mut skip_value = false;
    for opt in raw.iter().filter(|o| !o.is_empty()) {
        if opt == NO_SUPERVISION_FLAG {
            continue;
        }

        if !opt.starts_with('-') {
            if skip_value {
                // value of a denied `--flag value` pair
                filtered.dropped.push(opt.clone());
            } else {
                filtered.args.push(opt.clone());
            }
            skip_value = false;
            continue;
        }

        let key = option_key(opt);
        if is_allowed(key, supervised) {
            filtered.args.push(opt.clone());
            skip_value = false;
        } else {
            warn!("Dropping mount option {:?} (supervised: {})", opt, supervised);
            filtered.dropped.push(opt.clone());
            skip_value = !key.is_empty() && !opt.contains('=') && takes_value(key);
        }
    }

    filtered
}

/// Denied flags that carry their value as the next argument
fn takes_value(key: &str) -> bool {
    !matches!(key, "f" | "foreground")
}
