use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use relay_artifacts::{ArtifactDeleteHook, ArtifactStore};
use relay_core::{
    AgentRegistry, EventBus, HostOrchestrator, Scheduler, SessionRegistry, Transport,
    WorkflowExecutor,
};
use relay_core::llm::{LlmExecutor, OpenAiExecutor};
use relay_stores::{initialize_stores, AgentFileRepo, StoreConfig, Stores};
use relay_types::HostConfig;

use crate::auth::AuthService;

/// Everything the HTTP handlers share, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: HostConfig,
    pub stores: Stores,
    pub bus: EventBus,
    pub agents: Arc<AgentRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub orchestrator: Arc<HostOrchestrator>,
    pub executor: Arc<WorkflowExecutor>,
    pub scheduler: Arc<Scheduler>,
    pub artifacts: Arc<ArtifactStore>,
    pub auth: AuthService,
}

impl AppState {
    pub fn build(config: HostConfig) -> Result<Self> {
        let llm: Arc<dyn LlmExecutor> =
            Arc::new(OpenAiExecutor::new(std::env::var("A2A_HOST_MODEL").ok()));
        Self::build_with_llm(config, llm)
    }

    pub fn build_with_llm(config: HostConfig, llm: Arc<dyn LlmExecutor>) -> Result<Self> {
        let stores = initialize_stores(&StoreConfig {
            data_dir: config.data_dir.clone().into(),
            database_url: config.database_url.clone(),
        })?;

        let bus = EventBus::default();
        let artifacts = Arc::new(
            ArtifactStore::from_config(&config)?
                .with_delete_hook(Arc::new(FileRegistryPurge {
                    agent_files: stores.agent_files.clone(),
                })),
        );

        let agents = Arc::new(AgentRegistry::new());
        let sessions = Arc::new(SessionRegistry::new());
        let transport = Arc::new(Transport::new(bus.clone(), artifacts.clone()));
        let orchestrator = Arc::new(HostOrchestrator::new(
            llm,
            transport,
            sessions.clone(),
            bus.clone(),
        ));
        let executor = Arc::new(WorkflowExecutor::new(
            orchestrator.clone(),
            agents.clone(),
            bus.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            stores.schedules.clone(),
            stores.workflows.clone(),
            executor.clone(),
            bus.clone(),
        ));
        let auth = AuthService::new(stores.users.clone());

        Ok(AppState {
            config,
            stores,
            bus,
            agents,
            sessions,
            orchestrator,
            executor,
            scheduler,
            artifacts,
            auth,
        })
    }
}

/// Purges the file registry (and with it the derived vector records) when
/// an artifact is deleted.
struct FileRegistryPurge {
    agent_files: Arc<dyn AgentFileRepo>,
}

#[async_trait]
impl ArtifactDeleteHook for FileRegistryPurge {
    async fn on_artifact_deleted(&self, session_id: &str, artifact_id: &str) -> Result<()> {
        self.agent_files.remove(session_id, artifact_id).await
    }
}
