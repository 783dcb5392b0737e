use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use object_store::azure::{MicrosoftAzure, MicrosoftAzureBuilder};
use object_store::local::LocalFileSystem;
use relay_types::HostConfig;

/// Blob backend the artifact store writes through. The local filesystem
/// variant doubles as the degraded-mode fallback when the cloud backend
/// rejects a write.
#[derive(Debug, Clone)]
pub enum Backend {
    Azure {
        store: Arc<MicrosoftAzure>,
        account: String,
        container: String,
        /// Managed identity: no key material, so URLs are returned unsigned
        /// and the container ACL is the caller's responsibility.
        managed_identity: bool,
    },
    Local {
        store: Arc<LocalFileSystem>,
        /// Prefix for public URIs, e.g. an externally reachable base URL.
        /// Empty means relative `/uploads/...` URIs.
        public_base: String,
    },
}

pub fn build_backend(config: &HostConfig) -> Result<Backend> {
    if let Some(connection_string) = &config.azure_connection_string {
        let fields = parse_connection_string(connection_string);
        let account = fields
            .get("AccountName")
            .ok_or_else(|| anyhow!("connection string has no AccountName"))?
            .clone();
        let key = fields
            .get("AccountKey")
            .ok_or_else(|| anyhow!("connection string has no AccountKey"))?;
        let store = MicrosoftAzureBuilder::new()
            .with_account(&account)
            .with_access_key(key)
            .with_container_name(&config.azure_container)
            .build()
            .context("failed to build azure object store from connection string")?;
        return Ok(Backend::Azure {
            store: Arc::new(store),
            account,
            container: config.azure_container.clone(),
            managed_identity: false,
        });
    }

    if let Some(account) = &config.azure_account_name {
        let store = MicrosoftAzureBuilder::new()
            .with_account(account)
            .with_container_name(&config.azure_container)
            .build()
            .context("failed to build azure object store with managed identity")?;
        return Ok(Backend::Azure {
            store: Arc::new(store),
            account: account.clone(),
            container: config.azure_container.clone(),
            managed_identity: true,
        });
    }

    Ok(build_local_backend(config)?)
}

pub fn build_local_backend(config: &HostConfig) -> Result<Backend> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {}", config.data_dir))?;
    let store = LocalFileSystem::new_with_prefix(&config.data_dir)
        .with_context(|| format!("failed to open local object store at {}", config.data_dir))?;
    Ok(Backend::Local {
        store: Arc::new(store),
        public_base: config
            .websocket_server_url
            .clone()
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or_default(),
    })
}

/// `AccountName=...;AccountKey=...;EndpointSuffix=...` key/value pairs.
fn parse_connection_string(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_azure_connection_string() {
        let fields = parse_connection_string(
            "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=a2V5;EndpointSuffix=core.windows.net",
        );
        assert_eq!(fields.get("AccountName").map(String::as_str), Some("acct"));
        assert_eq!(fields.get("AccountKey").map(String::as_str), Some("a2V5"));
    }

    #[test]
    fn local_backend_when_no_azure_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig {
            data_dir: dir.path().to_string_lossy().to_string(),
            ..HostConfig::default()
        };
        match build_backend(&config).unwrap() {
            Backend::Local { public_base, .. } => assert!(public_base.is_empty()),
            other => panic!("expected local backend, got {other:?}"),
        }
    }
}
