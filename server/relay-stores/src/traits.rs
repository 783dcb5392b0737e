use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_types::{RunRecord, Schedule, User, Workflow};
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, user: User) -> anyhow::Result<()>;
    async fn get(&self, user_id: &str) -> anyhow::Result<Option<User>>;
    async fn get_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn update(&self, user: User) -> anyhow::Result<()>;
}

#[async_trait]
pub trait WorkflowRepo: Send + Sync {
    async fn store(&self, workflow: Workflow) -> anyhow::Result<()>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<Workflow>>;
    async fn list_for_owner(&self, owner_id: &str) -> anyhow::Result<Vec<Workflow>>;
    async fn list_all(&self) -> anyhow::Result<Vec<Workflow>>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ScheduleRepo: Send + Sync {
    async fn create(&self, schedule: Schedule) -> anyhow::Result<()>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<Schedule>>;
    async fn list(&self) -> anyhow::Result<Vec<Schedule>>;
    async fn update(&self, schedule: Schedule) -> anyhow::Result<()>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
    async fn record_run(&self, record: RunRecord) -> anyhow::Result<()>;
    /// Most recent first. `schedule_id` of `None` returns history across
    /// all schedules of the session.
    async fn history(
        &self,
        schedule_id: Option<&str>,
        session_id: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<RunRecord>>;
}

/// Per-session active-workflow state: one pinned workflow, plus the
/// multi-workflow list the routing orchestrator selects from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveWorkflow {
    #[serde(default)]
    pub workflow: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub goal: String,
}

#[async_trait]
pub trait ActiveWorkflowRepo: Send + Sync {
    async fn get(&self, session_id: &str) -> anyhow::Result<ActiveWorkflow>;
    async fn set(&self, session_id: &str, active: ActiveWorkflow) -> anyhow::Result<()>;
    async fn clear(&self, session_id: &str) -> anyhow::Result<()>;

    async fn get_list(&self, session_id: &str) -> anyhow::Result<Vec<serde_json::Value>>;
    async fn set_list(
        &self,
        session_id: &str,
        workflows: Vec<serde_json::Value>,
    ) -> anyhow::Result<Vec<serde_json::Value>>;
    async fn add_to_list(
        &self,
        session_id: &str,
        workflow: serde_json::Value,
    ) -> anyhow::Result<Vec<serde_json::Value>>;
    async fn remove_from_list(
        &self,
        session_id: &str,
        workflow_id: &str,
    ) -> anyhow::Result<Vec<serde_json::Value>>;
    async fn clear_list(&self, session_id: &str) -> anyhow::Result<()>;
}

/// Metadata for files uploaded into a session, used to annotate listings
/// and to purge derived vector-store records on delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFileRecord {
    pub session_id: String,
    pub file_id: String,
    pub name: String,
    pub uri: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(default)]
    pub analyzed: bool,
    pub uploaded_at: DateTime<Utc>,
}

#[async_trait]
pub trait AgentFileRepo: Send + Sync {
    async fn register(&self, record: AgentFileRecord) -> anyhow::Result<()>;
    async fn get(&self, session_id: &str, file_id: &str) -> anyhow::Result<Option<AgentFileRecord>>;
    async fn list_for_session(&self, session_id: &str) -> anyhow::Result<Vec<AgentFileRecord>>;
    async fn mark_analyzed(&self, session_id: &str, file_id: &str) -> anyhow::Result<()>;
    async fn remove(&self, session_id: &str, file_id: &str) -> anyhow::Result<()>;
}
