//! Volume identifiers and filesystem metadata
//!
//! A volume id is either `bucket` (the volume owns the whole bucket) or
//! `bucket/prefix` (the volume lives under a prefix of a shared bucket).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;

/// Longest name usable as-is; longer names collapse to a digest
pub const MAX_VOLUME_NAME_LEN: usize = 63;

/// Volume context key overriding the target bucket
pub const BUCKET_KEY: &str = "bucket";

/// Volume context key overriding the mounter type
pub const MOUNTER_KEY: &str = "mounter";

/// Volume context key holding whitespace separated mount options
pub const OPTIONS_KEY: &str = "options";

/// Volume context key carrying the requested capacity
pub const CAPACITY_KEY: &str = "capacity";

/// Normalize a requested volume name.
///
/// The name is lower-cased; names longer than 63 characters are replaced by
/// the hex SHA-1 digest of the lower-cased name.
pub fn sanitize_volume_name(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.len() > MAX_VOLUME_NAME_LEN {
        hex::encode(Sha1::digest(lower.as_bytes()))
    } else {
        lower
    }
}

/// A logical volume identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeId(String);

impl VolumeId {
    /// Wrap an existing identifier, rejecting empty ones
    pub fn parse(id: &str) -> Result<Self> {
        if id.is_empty() {
            return Err(Error::InvalidArgument(
                "Volume ID missing in request".to_string(),
            ));
        }
        Ok(VolumeId(id.to_string()))
    }

    /// Build the identifier for a new volume.
    ///
    /// Without a bucket override the sanitized name is the bucket. With one,
    /// the sanitized name becomes a prefix inside that bucket.
    pub fn for_new_volume(name: &str, bucket_override: Option<&str>) -> Result<Self> {
        let sanitized = sanitize_volume_name(name);
        if sanitized.is_empty() {
            return Err(Error::InvalidArgument(
                "Unable to sanitise volume name".to_string(),
            ));
        }

        match bucket_override.filter(|b| !b.is_empty()) {
            Some(bucket) => {
                let bucket = bucket.trim_end_matches('/');
                Ok(VolumeId(format!("{}/{}", bucket, sanitized)))
            }
            None => Ok(VolumeId(sanitized)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(bucket, prefix)` on the first `/`; prefix is empty for
    /// whole-bucket volumes.
    pub fn bucket_prefix(&self) -> (&str, &str) {
        split_bucket_prefix(&self.0)
    }

    /// Whether this volume owns its entire bucket
    pub fn is_whole_bucket(&self) -> bool {
        !self.0.contains('/')
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a volume id into bucket and prefix
pub fn split_bucket_prefix(volume_id: &str) -> (&str, &str) {
    match volume_id.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix),
        None => (volume_id, ""),
    }
}

/// Per-volume filesystem metadata, fixed at provisioning time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsMeta {
    /// Bucket holding the volume
    pub bucket: String,

    /// Prefix inside the bucket, empty for whole-bucket volumes
    pub prefix: String,

    /// Mounter type override
    pub mounter: Option<String>,

    /// Raw mount options in the order given
    pub mount_options: Vec<String>,

    /// Requested capacity in bytes
    pub capacity_bytes: i64,
}

impl FsMeta {
    /// Rebuild metadata from a volume id and the volume context returned
    /// by volume creation.
    pub fn from_volume_context(volume_id: &VolumeId, ctx: &HashMap<String, String>) -> Self {
        let (bucket, prefix) = volume_id.bucket_prefix();

        let mount_options = ctx
            .get(OPTIONS_KEY)
            .map(|opts| opts.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        FsMeta {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            mounter: ctx.get(MOUNTER_KEY).filter(|m| !m.is_empty()).cloned(),
            mount_options,
            capacity_bytes: ctx
                .get(CAPACITY_KEY)
                .and_then(|c| c.parse().ok())
                .unwrap_or(0),
        }
    }
}
