pub mod bus;
pub mod compiler;
pub mod executor;
pub mod llm;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod tests;

pub use bus::{EventBus, EventReceiver, Subscription};
pub use compiler::{compile, BranchOf, ExecutionPlan, PlanEntry};
pub use executor::{ExecuteOptions, StepOutcome, StepStatus, WorkflowExecutor, WorkflowRunResult};
pub use llm::{ChatMessage, DispatchCall, LlmExecutor, LlmTurn, OpenAiExecutor};
pub use orchestrator::{HostOrchestrator, TurnOutcome, TurnRequest};
pub use registry::{AgentRegistry, SessionRegistry};
pub use scheduler::Scheduler;
pub use transport::{AgentReply, OutboundAttachment, SendOptions, Transport, TranscriptLine};
