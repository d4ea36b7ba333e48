//! Object store operations used by the controller service
//!
//! Volumes are buckets, or directory-like prefixes inside a shared bucket.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Bucket and prefix management on an S3-compatible store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Remove a bucket and everything in it; fails with `NotFound` when the
    /// bucket does not exist
    async fn remove_bucket(&self, bucket: &str) -> Result<()>;

    /// Create the directory marker for `prefix`; an empty prefix is a no-op
    async fn create_prefix(&self, bucket: &str, prefix: &str) -> Result<()>;

    /// Remove every object under `prefix`
    async fn remove_prefix(&self, bucket: &str, prefix: &str) -> Result<()>;
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly
    pub fn put(&self, bucket: &str, key: &str) -> Result<()> {
        let mut buckets = self.buckets.lock();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::NotFound(format!("bucket {}", bucket)))?;
        objects.insert(key.to_string());
        Ok(())
    }

    /// Keys stored in `bucket`, sorted
    pub fn objects(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .get(bucket)
            .map(|objects| objects.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }
}

fn prefix_marker(prefix: &str) -> String {
    format!("{}/", prefix.trim_end_matches('/'))
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.lock().contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        if bucket.is_empty() {
            return Err(Error::ObjectStore("bucket name is empty".to_string()));
        }
        info!("Creating bucket {}", bucket);
        self.buckets.lock().entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        match self.buckets.lock().remove(bucket) {
            Some(objects) => {
                info!("Removed bucket {} with {} objects", bucket, objects.len());
                Ok(())
            }
            None => Err(Error::NotFound(format!("bucket {}", bucket))),
        }
    }

    async fn create_prefix(&self, bucket: &str, prefix: &str) -> Result<()> {
        if prefix.is_empty() {
            return Ok(());
        }
        debug!("Creating prefix {} in bucket {}", prefix, bucket);
        self.put(bucket, &prefix_marker(prefix))
    }

    async fn remove_prefix(&self, bucket: &str, prefix: &str) -> Result<()> {
        let marker = prefix_marker(prefix);
        let mut buckets = self.buckets.lock();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::NotFound(format!("bucket {}", bucket)))?;
        objects.retain(|key| !key.starts_with(&marker));
        Ok(())
    }
}
