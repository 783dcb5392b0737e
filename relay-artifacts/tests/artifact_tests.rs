use std::sync::Arc;

use relay_artifacts::{ArtifactDeleteHook, ArtifactStore};
use relay_types::HostConfig;

fn local_store(dir: &tempfile::TempDir) -> ArtifactStore {
    let config = HostConfig {
        data_dir: dir.path().to_string_lossy().to_string(),
        ..HostConfig::default()
    };
    ArtifactStore::from_config(&config).unwrap()
}

#[tokio::test]
async fn put_then_get_returns_exact_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    let bytes = vec![0u8, 1, 2, 250, 251, 252];
    let put = store
        .put("sess1", "blob.bin", bytes.clone(), "application/octet-stream")
        .await
        .unwrap();

    assert!(put.uri.contains("/uploads/sess1/"));
    assert!(put.uri.ends_with("/blob.bin"));
    assert_eq!(put.size, bytes.len() as u64);

    let fetched = store.get(&put.uri).await.unwrap();
    assert_eq!(fetched, bytes);
}

#[tokio::test]
async fn list_returns_session_artifacts_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    store
        .put("sess1", "a.txt", b"one".to_vec(), "text/plain")
        .await
        .unwrap();
    store
        .put("sess1", "b.txt", b"two".to_vec(), "text/plain")
        .await
        .unwrap();
    store
        .put("sess2", "c.txt", b"three".to_vec(), "text/plain")
        .await
        .unwrap();

    let listed = store.list("sess1").await.unwrap();
    assert_eq!(listed.len(), 2);
    let names: Vec<&str> = listed.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    let put = store
        .put("sess1", "gone.txt", b"bye".to_vec(), "text/plain")
        .await
        .unwrap();

    store.delete("sess1", &put.artifact_id).await.unwrap();
    assert!(store.get(&put.uri).await.is_err());
    assert!(store.list("sess1").await.unwrap().is_empty());

    // Repeated deletes of the same (and of a never-existing) id succeed.
    store.delete("sess1", &put.artifact_id).await.unwrap();
    store.delete("sess1", "never-existed").await.unwrap();
}

#[tokio::test]
async fn delete_sweeps_legacy_prefixes() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    // Objects written before the uploads/ migration.
    let legacy = dir.path().join("image-generator/art9");
    std::fs::create_dir_all(&legacy).unwrap();
    std::fs::write(legacy.join("old.png"), b"png").unwrap();

    store.delete("any-session", "art9").await.unwrap();
    assert!(!legacy.join("old.png").exists());
}

struct CountingHook(std::sync::atomic::AtomicUsize);

#[async_trait::async_trait]
impl ArtifactDeleteHook for CountingHook {
    async fn on_artifact_deleted(&self, _session_id: &str, _artifact_id: &str) -> anyhow::Result<()> {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn delete_fires_hook_once_per_call() {
    let dir = tempfile::tempdir().unwrap();
    let hook = Arc::new(CountingHook(std::sync::atomic::AtomicUsize::new(0)));
    let store = local_store(&dir).with_delete_hook(hook.clone());

    store.delete("sess1", "whatever").await.unwrap();
    store.delete("sess1", "whatever").await.unwrap();
    assert_eq!(hook.0.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn fresh_uri_resolves_same_object() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir);

    let put = store
        .put("sess1", "img.png", b"imagedata".to_vec(), "image/png")
        .await
        .unwrap();
    let refreshed = store.fresh_uri(&put.uri).await.unwrap();
    assert_eq!(store.get(&refreshed).await.unwrap(), b"imagedata".to_vec());
}
