mod initialize;
mod json;
mod traits;

pub use initialize::{initialize_stores, StoreConfig, Stores};
pub use json::{
    JsonActiveWorkflowRepo, JsonAgentFileRepo, JsonScheduleRepo, JsonUserRepo, JsonWorkflowRepo,
};
pub use traits::{
    ActiveWorkflow, ActiveWorkflowRepo, AgentFileRecord, AgentFileRepo, ScheduleRepo, UserRepo,
    WorkflowRepo,
};
