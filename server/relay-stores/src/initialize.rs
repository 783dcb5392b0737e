use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::json::{
    JsonActiveWorkflowRepo, JsonAgentFileRepo, JsonScheduleRepo, JsonUserRepo, JsonWorkflowRepo,
};
use crate::traits::{ActiveWorkflowRepo, AgentFileRepo, ScheduleRepo, UserRepo, WorkflowRepo};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// SQL connection string. The SQL backend lives behind the repo traits
    /// and is provided by the deployment; when set but unavailable the host
    /// falls back to JSON files with a warning.
    pub database_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            data_dir: PathBuf::from("./data"),
            database_url: None,
        }
    }
}

/// All repositories the host needs, initialized once at process start.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserRepo>,
    pub workflows: Arc<dyn WorkflowRepo>,
    pub schedules: Arc<dyn ScheduleRepo>,
    pub active_workflows: Arc<dyn ActiveWorkflowRepo>,
    pub agent_files: Arc<dyn AgentFileRepo>,
}

pub fn initialize_stores(config: &StoreConfig) -> Result<Stores> {
    if config.database_url.is_some() {
        tracing::warn!(
            "DATABASE_URL is set but no SQL backend is linked into this build; \
             using JSON storage under {}",
            config.data_dir.display()
        );
    } else {
        tracing::info!(
            "no DATABASE_URL - using local JSON storage under {}",
            config.data_dir.display()
        );
    }

    let dir = config.data_dir.as_path();
    Ok(Stores {
        users: Arc::new(JsonUserRepo::open(dir)?),
        workflows: Arc::new(JsonWorkflowRepo::open(dir)?),
        schedules: Arc::new(JsonScheduleRepo::open(dir)?),
        active_workflows: Arc::new(JsonActiveWorkflowRepo::open(dir)?),
        agent_files: Arc::new(JsonAgentFileRepo::open(dir)?),
    })
}
