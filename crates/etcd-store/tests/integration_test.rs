//! Integration tests for the etcd client and lock
//!
//! These tests require a running etcd with the v2 API enabled.
//! Set ETCD_URL to run.

use etcd_store::{DistributedLock, EtcdClient, EtcdConf, KeyValueStore, StoreError, SHORT_LOCK_TTL};
use std::sync::Arc;
use std::time::Duration;

fn store() -> Arc<dyn KeyValueStore> {
    let url = std::env::var("ETCD_URL").unwrap_or_else(|_| "http://127.0.0.1:2379".to_string());
    let conf = EtcdConf {
        urls: vec![url],
        ..Default::default()
    };
    Arc::new(EtcdClient::new(&conf).expect("Failed to create client"))
}

fn key(name: &str) -> String {
    format!("/midonet-cni-it/{}/{}", std::process::id(), name)
}

#[tokio::test]
#[ignore] // Requires running etcd
async fn test_create_conflict() {
    let store = store();
    let key = key("create");
    let _ = store.delete(&key).await;

    store.create(&key, "a", None).await.expect("Failed to create key");
    let err = store.create(&key, "b", None).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));

    store.delete(&key).await.expect("Failed to delete key");
}

#[tokio::test]
#[ignore]
async fn test_list_and_delete_dir() {
    let store = store();
    let dir = key("dir");
    store.set(&format!("{}/a", dir), "1").await.expect("Failed to set");
    store.set(&format!("{}/b", dir), "2").await.expect("Failed to set");

    let nodes = store.list(&dir).await.expect("Failed to list");
    assert_eq!(nodes.len(), 2);

    store.delete_dir(&dir).await.expect("Failed to delete dir");
    assert!(store.list(&dir).await.unwrap_err().is_not_found());
}

#[tokio::test]
#[ignore]
async fn test_lock_handoff() {
    let store = store();
    let key = key("lock");

    let first = DistributedLock::new(Arc::clone(&store), key.clone(), SHORT_LOCK_TTL)
        .acquire()
        .await
        .expect("Failed to acquire");

    let contender = DistributedLock::new(Arc::clone(&store), key.clone(), SHORT_LOCK_TTL);
    let waiter = tokio::spawn(async move { contender.acquire().await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());

    first.release().await.expect("Failed to release");
    let second = waiter.await.unwrap().expect("Failed to acquire after release");
    second.release().await.expect("Failed to release");
}
