pub mod agent;
pub mod config;
pub mod errors;
pub mod events;
pub mod schedule;
pub mod session;
pub mod user;
pub mod workflow;

pub use agent::{AgentDescriptor, AgentSkill, AgentUrls, EnabledAgent, ToolApprovalPolicy};
pub use config::HostConfig;
pub use errors::HostError;
pub use events::{Event, EventType};
pub use schedule::{RunRecord, RunStatus, Schedule, ScheduleSpec};
pub use session::ContextId;
pub use user::User;
pub use workflow::{Edge, EdgeCondition, Step, Workflow, EVALUATE_AGENT};
