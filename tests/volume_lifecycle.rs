//! Provisioning a volume and deleting it again through the controller service

use s3csi::driver::controller::{CreateVolumeRequest, DeleteVolumeRequest};
use s3csi::driver::{AccessMode, Driver, VolumeCapability};
use s3csi::mount_table::HostMountTable;
use s3csi::reaper::HostProcessTable;
use s3csi::store::{MemoryStore, ObjectStore};
use s3csi::supervisor::SystemdSupervisor;
use s3csi::Config;
use std::collections::HashMap;
use std::sync::Arc;

fn driver(store: Arc<MemoryStore>, unit_dir: &std::path::Path) -> Driver {
    let mut config = Config::default();
    config.node_id = "test-node".to_string();
    Driver::new(
        Arc::new(config),
        Arc::new(SystemdSupervisor::new(unit_dir)),
        Arc::new(HostMountTable),
        Arc::new(HostProcessTable),
        store,
    )
}

fn secrets() -> HashMap<String, String> {
    let mut secrets = HashMap::new();
    secrets.insert("accessKeyID".to_string(), "AKID".to_string());
    secrets.insert("secretAccessKey".to_string(), "SECRET".to_string());
    secrets.insert("endpoint".to_string(), "https://storage.example.com".to_string());
    secrets
}

fn create_request(parameters: &[(&str, &str)]) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: "myvol".to_string(),
        capacity_bytes: 0,
        parameters: parameters
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        secrets: secrets(),
        capabilities: vec![VolumeCapability::mount(AccessMode::MultiNodeMultiWriter)],
    }
}

#[tokio::test]
async fn test_whole_bucket_volume_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let driver = driver(store.clone(), dir.path());

    let volume = driver.create_volume(create_request(&[])).await.unwrap();
    assert_eq!(volume.volume_id, "myvol");
    assert_eq!(volume.volume_context.get("capacity").map(String::as_str), Some("0"));
    assert!(store.bucket_exists("myvol").await.unwrap());

    driver
        .delete_volume(DeleteVolumeRequest {
            volume_id: volume.volume_id,
            secrets: secrets(),
        })
        .await
        .unwrap();
    assert!(!store.bucket_exists("myvol").await.unwrap());
}

#[tokio::test]
async fn test_shared_bucket_volume_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let driver = driver(store.clone(), dir.path());

    let volume = driver
        .create_volume(create_request(&[("bucket", "shared")]))
        .await
        .unwrap();
    assert_eq!(volume.volume_id, "shared/myvol");
    assert_eq!(volume.volume_context.get("bucket").map(String::as_str), Some("shared"));
    assert_eq!(store.objects("shared"), vec!["myvol/"]);

    store.put("shared", "myvol/file.txt").unwrap();
    store.put("shared", "other/file.txt").unwrap();

    driver
        .delete_volume(DeleteVolumeRequest {
            volume_id: volume.volume_id,
            secrets: secrets(),
        })
        .await
        .unwrap();

    assert!(store.bucket_exists("shared").await.unwrap());
    assert_eq!(store.objects("shared"), vec!["other/file.txt"]);
}
