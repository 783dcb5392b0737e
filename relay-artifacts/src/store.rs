use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use http::Method;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{ObjectStore, PutPayload};
use relay_types::HostConfig;
use serde::Serialize;

use crate::backend::{build_backend, build_local_backend, Backend};
use crate::{LEGACY_PREFIXES, UPLOADS_PREFIX};

/// Best-effort cleanup of derived resources (vector-store records and the
/// file registry) when an artifact is deleted. Failures are logged, never
/// surfaced.
#[async_trait]
pub trait ArtifactDeleteHook: Send + Sync {
    async fn on_artifact_deleted(&self, session_id: &str, artifact_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Uploaded,
    /// Set once the document-ingestion collaborator has indexed the file.
    Analyzed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredArtifact {
    pub artifact_id: String,
    pub name: String,
    pub uri: String,
    pub size: u64,
    pub status: ArtifactStatus,
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub artifact_id: String,
    pub uri: String,
    pub size: u64,
    pub mime_type: String,
}

/// Uniform `put`/`get`/`delete`/`list` over the blob backend with a
/// local-filesystem fallback when credentials are absent or a cloud write
/// fails.
pub struct ArtifactStore {
    backend: Backend,
    fallback: Arc<LocalFileSystem>,
    fallback_public_base: String,
    sas_ttl: Duration,
    force_azure: bool,
    size_threshold: u64,
    hook: Option<Arc<dyn ArtifactDeleteHook>>,
}

impl ArtifactStore {
    pub fn from_config(config: &HostConfig) -> Result<Self> {
        let backend = build_backend(config)?;
        let (fallback, fallback_public_base) = match build_local_backend(config)? {
            Backend::Local { store, public_base } => (store, public_base),
            Backend::Azure { .. } => unreachable!("build_local_backend returns Local"),
        };
        Ok(ArtifactStore {
            backend,
            fallback,
            fallback_public_base,
            sas_ttl: config.sas_duration,
            force_azure: config.force_azure_blob,
            size_threshold: config.azure_blob_size_threshold,
            hook: None,
        })
    }

    pub fn with_delete_hook(mut self, hook: Arc<dyn ArtifactDeleteHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    fn artifact_path(session_id: &str, artifact_id: &str, name: &str) -> Result<ObjectPath> {
        let name = sanitize_name(name)?;
        ensure_safe_segment(session_id)?;
        ensure_safe_segment(artifact_id)?;
        Ok(ObjectPath::from(format!(
            "{UPLOADS_PREFIX}/{session_id}/{artifact_id}/{name}"
        )))
    }

    /// Upload bytes, returning a URI reachable for at least the configured
    /// SAS lifetime. A failed cloud write degrades to the local store.
    pub async fn put(
        &self,
        session_id: &str,
        name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<PutResult> {
        let artifact_id = uuid::Uuid::new_v4().to_string();
        let size = bytes.len() as u64;
        let path = Self::artifact_path(session_id, &artifact_id, name)?;
        let payload = Bytes::from(bytes);

        if let Backend::Azure { store, .. } = &self.backend {
            if self.force_azure || size >= self.size_threshold {
                match store.put(&path, PutPayload::from(payload.clone())).await {
                    Ok(_) => {
                        let uri = self.backend_uri(&path).await?;
                        return Ok(PutResult {
                            artifact_id,
                            uri,
                            size,
                            mime_type: mime_type.to_string(),
                        });
                    }
                    Err(err) => {
                        tracing::warn!(
                            "blob put failed for {path}, falling back to local storage: {err}"
                        );
                    }
                }
            }
        }

        self.fallback
            .put(&path, PutPayload::from(payload))
            .await
            .with_context(|| format!("failed to write artifact {path}"))?;
        Ok(PutResult {
            artifact_id,
            uri: self.local_uri(&path),
            size,
            mime_type: mime_type.to_string(),
        })
    }

    /// Fetch artifact bytes by URI. Expired signatures are irrelevant here:
    /// the object is re-read by its underlying blob name.
    pub async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let path = object_path_of_uri(uri)
            .ok_or_else(|| anyhow!("uri does not reference the artifact store: {uri}"))?;

        if let Backend::Azure { store, .. } = &self.backend {
            match store.get(&path).await {
                Ok(result) => {
                    return Ok(result.bytes().await?.to_vec());
                }
                Err(object_store::Error::NotFound { .. }) => {}
                Err(err) => return Err(err).with_context(|| format!("failed to fetch {path}")),
            }
        }

        let result = self
            .fallback
            .get(&path)
            .await
            .with_context(|| format!("artifact not found: {path}"))?;
        Ok(result.bytes().await?.to_vec())
    }

    /// Re-sign an existing URI from the underlying blob name.
    pub async fn fresh_uri(&self, uri: &str) -> Result<String> {
        let path = object_path_of_uri(uri)
            .ok_or_else(|| anyhow!("uri does not reference the artifact store: {uri}"))?;
        match &self.backend {
            Backend::Azure { .. } => self.backend_uri(&path).await,
            Backend::Local { .. } => Ok(self.local_uri(&path)),
        }
    }

    /// Idempotent: succeeds whether or not anything existed. Sweeps the
    /// canonical prefix and the legacy layouts, then fires the delete hook.
    pub async fn delete(&self, session_id: &str, artifact_id: &str) -> Result<()> {
        ensure_safe_segment(session_id)?;
        ensure_safe_segment(artifact_id)?;

        let mut prefixes = vec![format!("{UPLOADS_PREFIX}/{session_id}/{artifact_id}")];
        for legacy in LEGACY_PREFIXES {
            prefixes.push(format!("{legacy}/{artifact_id}"));
        }

        for prefix in &prefixes {
            let prefix = ObjectPath::from(prefix.as_str());
            if let Backend::Azure { store, .. } = &self.backend {
                delete_prefix(store.as_ref(), &prefix).await;
            }
            delete_prefix(self.fallback.as_ref(), &prefix).await;
        }

        if let Some(hook) = &self.hook {
            if let Err(err) = hook.on_artifact_deleted(session_id, artifact_id).await {
                tracing::warn!("artifact delete hook failed for {artifact_id}: {err}");
            }
        }
        Ok(())
    }

    /// All artifacts currently persisted for a session, freshly signed.
    pub async fn list(&self, session_id: &str) -> Result<Vec<StoredArtifact>> {
        ensure_safe_segment(session_id)?;
        let prefix = ObjectPath::from(format!("{UPLOADS_PREFIX}/{session_id}"));

        let mut artifacts = Vec::new();
        let mut seen = std::collections::HashSet::new();

        if let Backend::Azure { store, .. } = &self.backend {
            let mut stream = store.list(Some(&prefix));
            while let Some(meta) = stream.try_next().await? {
                if let Some(entry) = self.listing_entry(&meta.location, meta.size as u64).await {
                    if seen.insert(entry.artifact_id.clone()) {
                        artifacts.push(entry);
                    }
                }
            }
        }

        let mut stream = self.fallback.list(Some(&prefix));
        while let Some(meta) = stream.try_next().await? {
            let path = meta.location.clone();
            let size = meta.size as u64;
            if let Some((artifact_id, name)) = split_artifact_path(&path) {
                if seen.insert(artifact_id.clone()) {
                    artifacts.push(StoredArtifact {
                        artifact_id,
                        name,
                        uri: self.local_uri(&path),
                        size,
                        status: ArtifactStatus::Uploaded,
                    });
                }
            }
        }

        artifacts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(artifacts)
    }

    async fn listing_entry(&self, path: &ObjectPath, size: u64) -> Option<StoredArtifact> {
        let (artifact_id, name) = split_artifact_path(path)?;
        let uri = self.backend_uri(path).await.ok()?;
        Some(StoredArtifact {
            artifact_id,
            name,
            uri,
            size,
            status: ArtifactStatus::Uploaded,
        })
    }

    async fn backend_uri(&self, path: &ObjectPath) -> Result<String> {
        match &self.backend {
            Backend::Azure {
                store,
                account,
                container,
                managed_identity,
            } => {
                if *managed_identity {
                    // No key material to sign with; the container ACL must
                    // grant the reader.
                    Ok(format!(
                        "https://{account}.blob.core.windows.net/{container}/{path}"
                    ))
                } else {
                    let url = store
                        .signed_url(Method::GET, path, self.sas_ttl)
                        .await
                        .context("failed to sign blob url")?;
                    Ok(url.to_string())
                }
            }
            Backend::Local { .. } => Ok(self.local_uri(path)),
        }
    }

    fn local_uri(&self, path: &ObjectPath) -> String {
        format!("{}/{}", self.fallback_public_base, path)
    }
}

async fn delete_prefix(store: &dyn ObjectStore, prefix: &ObjectPath) {
    let mut stream = store.list(Some(prefix));
    loop {
        match stream.try_next().await {
            Ok(Some(meta)) => {
                if let Err(err) = store.delete(&meta.location).await {
                    if !matches!(err, object_store::Error::NotFound { .. }) {
                        tracing::warn!("failed to delete {}: {err}", meta.location);
                    }
                }
            }
            Ok(None) => break,
            Err(object_store::Error::NotFound { .. }) => break,
            Err(err) => {
                tracing::warn!("listing {prefix} for delete failed: {err}");
                break;
            }
        }
    }
}

fn ensure_safe_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment.contains('/') || segment.contains("..") {
        return Err(anyhow!("unsafe path segment: {segment:?}"));
    }
    Ok(())
}

fn sanitize_name(name: &str) -> Result<String> {
    let name = name.rsplit('/').next().unwrap_or(name).trim();
    if name.is_empty() || name.contains("..") {
        return Err(anyhow!("unsafe artifact name: {name:?}"));
    }
    Ok(name.to_string())
}

/// `uploads/{session}/{artifact_id}/{name}` → (artifact_id, name)
fn split_artifact_path(path: &ObjectPath) -> Option<(String, String)> {
    let parts: Vec<&str> = path.as_ref().split('/').collect();
    match parts.as_slice() {
        [UPLOADS_PREFIX, _session, artifact_id, name @ ..] if !name.is_empty() => {
            Some((artifact_id.to_string(), name.join("/")))
        }
        _ => None,
    }
}

/// Recover the backend object path from any URI form the store has handed
/// out: a signed Azure URL, an unsigned backend URL, or a local
/// `/uploads/...` path.
fn object_path_of_uri(uri: &str) -> Option<ObjectPath> {
    let without_query = uri.split('?').next().unwrap_or(uri);
    if let Some(stripped) = without_query.strip_prefix(&format!("{UPLOADS_PREFIX}/")) {
        return Some(ObjectPath::from(format!("{UPLOADS_PREFIX}/{stripped}")));
    }
    let marker = format!("/{UPLOADS_PREFIX}/");
    let idx = without_query.find(&marker)?;
    Some(ObjectPath::from(&without_query[idx + 1..]))
}
