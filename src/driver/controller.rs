//! Controller service: volume provisioning in the object store

use super::{Driver, VolumeCapability, SUPPORTED_ACCESS_MODE};
use crate::config::S3Config;
use crate::error::{Error, Result};
use crate::volume::{VolumeId, BUCKET_KEY, CAPACITY_KEY};
use std::collections::HashMap;
use tracing::{debug, info};

/// Controller operations the driver supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerCapability {
    CreateDeleteVolume,
}

const CONTROLLER_CAPABILITIES: &[ControllerCapability] = &[ControllerCapability::CreateDeleteVolume];

#[derive(Debug, Clone, Default)]
pub struct CreateVolumeRequest {
    pub name: String,
    pub capacity_bytes: i64,
    pub parameters: HashMap<String, String>,
    pub secrets: HashMap<String, String>,
    pub capabilities: Vec<VolumeCapability>,
}

/// A provisioned volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub volume_id: String,
    pub capacity_bytes: i64,
    /// Creation parameters plus `capacity`, handed back on every publish
    pub volume_context: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteVolumeRequest {
    pub volume_id: String,
    pub secrets: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidateVolumeCapabilitiesRequest {
    pub volume_id: String,
    pub capabilities: Vec<VolumeCapability>,
    pub secrets: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidateVolumeCapabilitiesResponse {
    /// Set when every requested capability is supported
    pub confirmed: Option<Vec<VolumeCapability>>,
    pub message: String,
}

impl Driver {
    fn check_controller_capability(&self, cap: ControllerCapability) -> Result<()> {
        if CONTROLLER_CAPABILITIES.contains(&cap) {
            Ok(())
        } else {
            Err(Error::InvalidArgument(format!("unsupported capability {:?}", cap)))
        }
    }

    /// Provision a bucket, or a prefix inside the bucket named by the
    /// `bucket` parameter.
    pub async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume> {
        let volume_id =
            VolumeId::for_new_volume(&req.name, req.parameters.get(BUCKET_KEY).map(String::as_str))?;
        self.check_controller_capability(ControllerCapability::CreateDeleteVolume)?;

        if req.capabilities.is_empty() {
            return Err(Error::InvalidArgument(
                "Volume Capabilities missing in request".to_string(),
            ));
        }

        debug!("Got a request to create volume {}", volume_id);
        S3Config::from_secrets(&req.secrets)?;
        let (bucket, prefix) = volume_id.bucket_prefix();

        let exists = self.store.bucket_exists(bucket).await.map_err(|e| {
            Error::ObjectStore(format!("failed to check if bucket {} exists: {}", volume_id, e))
        })?;
        if !exists {
            self.store.create_bucket(bucket).await.map_err(|e| {
                Error::ObjectStore(format!("failed to create bucket {}: {}", bucket, e))
            })?;
        }

        self.store.create_prefix(bucket, prefix).await.map_err(|e| {
            Error::ObjectStore(format!("failed to create prefix {}: {}", prefix, e))
        })?;

        info!("Created volume {}", volume_id);
        let mut volume_context = req.parameters.clone();
        volume_context.insert(CAPACITY_KEY.to_string(), req.capacity_bytes.to_string());

        Ok(Volume {
            volume_id: volume_id.to_string(),
            capacity_bytes: req.capacity_bytes,
            volume_context,
        })
    }

    /// Remove a whole-bucket volume's bucket, or a prefix volume's objects.
    pub async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<()> {
        let volume_id = VolumeId::parse(&req.volume_id)?;
        self.check_controller_capability(ControllerCapability::CreateDeleteVolume)?;
        debug!("Deleting volume {}", volume_id);

        S3Config::from_secrets(&req.secrets)?;
        let (bucket, prefix) = volume_id.bucket_prefix();

        if prefix.is_empty() {
            match self.store.remove_bucket(bucket).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            info!("Bucket {} removed", bucket);
        } else {
            self.store
                .remove_prefix(bucket, prefix)
                .await
                .map_err(|e| Error::ObjectStore(format!("unable to remove prefix: {}", e)))?;
            info!("Prefix {} removed", prefix);
        }
        Ok(())
    }

    pub async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse> {
        let volume_id = VolumeId::parse(&req.volume_id)?;
        if req.capabilities.is_empty() {
            return Err(Error::InvalidArgument(
                "Volume capabilities missing in request".to_string(),
            ));
        }

        S3Config::from_secrets(&req.secrets)?;
        let (bucket, _) = volume_id.bucket_prefix();
        if !self.store.bucket_exists(bucket).await? {
            return Err(Error::NotFound(format!(
                "bucket of volume with id {} does not exist",
                volume_id
            )));
        }

        if req
            .capabilities
            .iter()
            .any(|c| c.access_mode != SUPPORTED_ACCESS_MODE)
        {
            return Ok(ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: "Only multi node multi writer is supported".to_string(),
            });
        }

        Ok(ValidateVolumeCapabilitiesResponse {
            confirmed: Some(vec![VolumeCapability::mount(SUPPORTED_ACCESS_MODE)]),
            message: String::new(),
        })
    }

    pub fn controller_get_capabilities(&self) -> Vec<ControllerCapability> {
        CONTROLLER_CAPABILITIES.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{secrets, test_driver};
    use super::super::AccessMode;
    use super::*;

    fn create_request(name: &str, bucket: Option<&str>) -> CreateVolumeRequest {
        let mut parameters = HashMap::new();
        if let Some(bucket) = bucket {
            parameters.insert(BUCKET_KEY.to_string(), bucket.to_string());
        }
        parameters.insert("mounter".to_string(), "geesefs".to_string());
        CreateVolumeRequest {
            name: name.to_string(),
            capacity_bytes: 1 << 30,
            parameters,
            secrets: secrets(),
            capabilities: vec![VolumeCapability::mount(AccessMode::MultiNodeMultiWriter)],
        }
    }

    #[tokio::test]
    async fn test_create_whole_bucket_volume() {
        let t = test_driver();
        let volume = t.driver.create_volume(create_request("MyVol", None)).await.unwrap();

        assert_eq!(volume.volume_id, "myvol");
        assert_eq!(volume.volume_context["capacity"], "1073741824");
        assert_eq!(volume.volume_context["mounter"], "geesefs");
        assert!(t.store.objects("myvol").is_empty());
    }

    #[tokio::test]
    async fn test_create_prefix_volume_in_existing_bucket() {
        let t = test_driver();
        let first = t
            .driver
            .create_volume(create_request("a", Some("shared")))
            .await
            .unwrap();
        t.driver
            .create_volume(create_request("b", Some("shared")))
            .await
            .unwrap();

        assert_eq!(first.volume_id, "shared/a");
        assert_eq!(t.store.bucket_count(), 1);
        assert_eq!(t.store.objects("shared"), vec!["a/", "b/"]);
    }

    #[tokio::test]
    async fn test_create_requires_capabilities() {
        let t = test_driver();
        let mut req = create_request("vol", None);
        req.capabilities.clear();
        let err = t.driver.create_volume(req).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_bucket_is_ok() {
        let t = test_driver();
        t.driver
            .delete_volume(DeleteVolumeRequest {
                volume_id: "gone".to_string(),
                secrets: secrets(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_empty_id_rejected() {
        let t = test_driver();
        let err = t
            .driver
            .delete_volume(DeleteVolumeRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_validate_capabilities() {
        let t = test_driver();
        t.driver.create_volume(create_request("vol", None)).await.unwrap();

        let mut req = ValidateVolumeCapabilitiesRequest {
            volume_id: "vol".to_string(),
            capabilities: vec![VolumeCapability::mount(AccessMode::MultiNodeMultiWriter)],
            secrets: secrets(),
        };
        let resp = t.driver.validate_volume_capabilities(req.clone()).await.unwrap();
        assert!(resp.confirmed.is_some());

        req.capabilities = vec![VolumeCapability::mount(AccessMode::SingleNodeWriter)];
        let resp = t.driver.validate_volume_capabilities(req.clone()).await.unwrap();
        assert!(resp.confirmed.is_none());
        assert!(!resp.message.is_empty());

        req.volume_id = "missing/prefix".to_string();
        let err = t.driver.validate_volume_capabilities(req).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_controller_capabilities() {
        let t = test_driver();
        assert_eq!(
            t.driver.controller_get_capabilities(),
            vec![ControllerCapability::CreateDeleteVolume]
        );
    }
}
