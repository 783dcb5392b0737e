use std::time::Duration;

/// Host configuration resolved from the environment at process start.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub host: String,
    pub port: u16,
    /// SQL-backed repos when set; JSON files under `data_dir` otherwise.
    pub database_url: Option<String>,
    pub data_dir: String,
    pub azure_connection_string: Option<String>,
    pub azure_account_name: Option<String>,
    pub azure_container: String,
    pub websocket_server_url: Option<String>,
    pub force_azure_blob: bool,
    /// Payloads below this many bytes may stay local even when the blob
    /// backend is configured.
    pub azure_blob_size_threshold: u64,
    pub sas_duration: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            host: "0.0.0.0".to_string(),
            port: 12000,
            database_url: None,
            data_dir: "./data".to_string(),
            azure_connection_string: None,
            azure_account_name: None,
            azure_container: "relay-artifacts".to_string(),
            websocket_server_url: None,
            force_azure_blob: false,
            azure_blob_size_threshold: 0,
            sas_duration: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl HostConfig {
    pub fn from_env() -> Self {
        let mut cfg = HostConfig::default();
        if let Ok(host) = std::env::var("A2A_UI_HOST") {
            cfg.host = host;
        }
        if let Ok(port) = std::env::var("A2A_UI_PORT") {
            if let Ok(port) = port.parse() {
                cfg.port = port;
            }
        }
        cfg.database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        cfg.azure_connection_string = std::env::var("AZURE_STORAGE_CONNECTION_STRING")
            .ok()
            .filter(|v| !v.is_empty());
        cfg.azure_account_name = std::env::var("AZURE_STORAGE_ACCOUNT_NAME")
            .ok()
            .filter(|v| !v.is_empty());
        if let Ok(container) = std::env::var("AZURE_BLOB_CONTAINER") {
            if !container.is_empty() {
                cfg.azure_container = container;
            }
        }
        cfg.websocket_server_url = std::env::var("WEBSOCKET_SERVER_URL").ok();
        cfg.force_azure_blob = std::env::var("FORCE_AZURE_BLOB")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if let Ok(threshold) = std::env::var("AZURE_BLOB_SIZE_THRESHOLD") {
            if let Ok(threshold) = threshold.parse() {
                cfg.azure_blob_size_threshold = threshold;
            }
        }
        if let Ok(minutes) = std::env::var("AZURE_BLOB_SAS_DURATION_MINUTES") {
            if let Ok(minutes) = minutes.parse::<u64>() {
                cfg.sas_duration = Duration::from_secs(minutes * 60);
            }
        }
        cfg
    }

    /// Managed identity applies when only the account name is configured;
    /// the store then returns unsigned backend URLs.
    pub fn azure_uses_managed_identity(&self) -> bool {
        self.azure_connection_string.is_none() && self.azure_account_name.is_some()
    }

    pub fn azure_configured(&self) -> bool {
        self.azure_connection_string.is_some() || self.azure_account_name.is_some()
    }
}

/// Per-operation timeout defaults (seconds). All overridable per call.
pub mod timeouts {
    use std::time::Duration;

    pub const CONNECT: Duration = Duration::from_secs(60);
    pub const READ: Duration = Duration::from_secs(180);
    pub const LLM_TURN: Duration = Duration::from_secs(300);
    pub const SCHEDULED_WORKFLOW: Duration = Duration::from_secs(120);
    pub const AGENT_PING: Duration = Duration::from_secs(10);
    pub const HUMAN_ESCALATION: Duration = Duration::from_secs(1800);
    pub const SLOW_SUBSCRIBER: Duration = Duration::from_secs(10);
}
