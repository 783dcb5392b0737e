use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_a2a::{FilePart, WorkflowListing};
use relay_types::config::timeouts;
use relay_types::{Event, EventType, HostError, Workflow};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::compiler::{compile, ExecutionPlan};
use crate::orchestrator::{DispatchObserver, HostOrchestrator, TurnRequest};
use crate::registry::AgentRegistry;
use crate::transport::OutboundAttachment;

#[derive(Clone)]
pub struct ExecuteOptions {
    pub user_message: String,
    pub conversation_id: Option<String>,
    pub attachments: Vec<OutboundAttachment>,
    pub available_workflows: Option<Vec<WorkflowListing>>,
    pub timeout: Duration,
    /// Scheduled runs synthesize enablement from the global registry with
    /// production URLs instead of using a live user session.
    pub scheduled: bool,
    pub cancel: CancellationToken,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        ExecuteOptions {
            user_message: String::new(),
            conversation_id: None,
            attachments: Vec::new(),
            available_workflows: None,
            timeout: timeouts::LLM_TURN,
            scheduled: false,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StepOutcome {
    pub label: String,
    pub agent_name: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone)]
pub struct WorkflowRunResult {
    pub final_text: String,
    pub artifacts: Vec<FilePart>,
    pub steps: Vec<StepOutcome>,
    pub success: bool,
}

/// Compiles a workflow and drives the orchestrator through its plan,
/// reporting per-step progress on the bus.
pub struct WorkflowExecutor {
    orchestrator: Arc<HostOrchestrator>,
    agents: Arc<AgentRegistry>,
    bus: EventBus,
}

impl WorkflowExecutor {
    pub fn new(
        orchestrator: Arc<HostOrchestrator>,
        agents: Arc<AgentRegistry>,
        bus: EventBus,
    ) -> Self {
        WorkflowExecutor {
            orchestrator,
            agents,
            bus,
        }
    }

    pub fn orchestrator(&self) -> &Arc<HostOrchestrator> {
        &self.orchestrator
    }

    pub async fn execute(
        &self,
        workflow: &Workflow,
        session_id: &str,
        opts: ExecuteOptions,
    ) -> Result<WorkflowRunResult, HostError> {
        let plan = compile(&workflow.steps, &workflow.edges)?;
        self.ensure_agents(workflow, session_id, opts.scheduled)
            .await?;

        let conversation_id = opts
            .conversation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let context_id = format!("{session_id}::{conversation_id}");

        let tracker = Arc::new(StepTracker::new(
            plan.clone(),
            self.bus.clone(),
            context_id.clone(),
        ));

        let mut request = TurnRequest::new(session_id, &conversation_id, &opts.user_message);
        request.attachments = opts.attachments.clone();
        request.workflow_text = Some(plan.to_prompt_text());
        request.workflow_goal = if workflow.goal.is_empty() {
            None
        } else {
            Some(workflow.goal.clone())
        };
        request.available_workflows = opts.available_workflows.clone();
        request.timeout = opts.timeout;
        request.cancel = opts.cancel.clone();
        request.observer = Some(tracker.clone() as Arc<dyn DispatchObserver>);

        let turn = self.orchestrator.run_turn(request).await?;
        let steps = tracker.finalize();
        let success = steps
            .iter()
            .all(|s| s.status != StepStatus::Failed);

        Ok(WorkflowRunResult {
            final_text: turn.text,
            artifacts: turn.artifacts,
            steps,
            success,
        })
    }

    /// Interactive runs require the session to have every agent enabled;
    /// scheduled runs resolve agents against the global registry and pin
    /// production URLs.
    async fn ensure_agents(
        &self,
        workflow: &Workflow,
        session_id: &str,
        scheduled: bool,
    ) -> Result<(), HostError> {
        let sessions = self.orchestrator.sessions();
        if scheduled {
            for name in workflow.required_agents() {
                let descriptor = self.agents.get(name).ok_or_else(|| {
                    HostError::NotFound(format!(
                        "workflow {} needs unregistered agent {name}",
                        workflow.name
                    ))
                })?;
                let url = descriptor
                    .production_url()
                    .ok_or_else(|| {
                        HostError::Validation(format!("agent {name} has no usable URL"))
                    })?
                    .to_string();
                sessions.enable(session_id, descriptor, url).await;
            }
            return Ok(());
        }

        let snapshot = sessions.snapshot(session_id);
        for name in workflow.required_agents() {
            if !snapshot.contains_key(name) {
                return Err(HostError::Validation(format!(
                    "agent {name} is not enabled for session {session_id}"
                )));
            }
        }
        Ok(())
    }
}

/// Ties orchestrator dispatches back to plan entries: each dispatch to an
/// agent consumes that agent's next unexecuted plan entry.
struct StepTracker {
    plan: ExecutionPlan,
    bus: EventBus,
    context_id: String,
    inner: Mutex<TrackerInner>,
}

struct TrackerInner {
    pending: HashMap<String, VecDeque<String>>,
    in_flight: HashMap<String, Vec<String>>,
    statuses: HashMap<String, StepStatus>,
}

impl StepTracker {
    fn new(plan: ExecutionPlan, bus: EventBus, context_id: String) -> Self {
        let mut pending: HashMap<String, VecDeque<String>> = HashMap::new();
        for entry in &plan.entries {
            pending
                .entry(entry.agent_name.clone())
                .or_default()
                .push_back(entry.label.clone());
        }
        StepTracker {
            plan,
            bus,
            context_id,
            inner: Mutex::new(TrackerInner {
                pending,
                in_flight: HashMap::new(),
                statuses: HashMap::new(),
            }),
        }
    }

    fn finalize(&self) -> Vec<StepOutcome> {
        let inner = self.inner.lock().expect("step tracker poisoned");
        self.plan
            .entries
            .iter()
            .map(|entry| {
                let status = inner
                    .statuses
                    .get(&entry.label)
                    .copied()
                    .unwrap_or_else(|| {
                        if entry.agent_name.eq_ignore_ascii_case("EVALUATE") {
                            // The host answers EVALUATE steps inline.
                            StepStatus::Completed
                        } else {
                            StepStatus::Skipped
                        }
                    });
                StepOutcome {
                    label: entry.label.clone(),
                    agent_name: entry.agent_name.clone(),
                    status,
                }
            })
            .collect()
    }
}

impl DispatchObserver for StepTracker {
    fn dispatch_started(&self, agent_name: &str) {
        let label = {
            let mut inner = self.inner.lock().expect("step tracker poisoned");
            let label = inner
                .pending
                .get_mut(agent_name)
                .and_then(VecDeque::pop_front);
            if let Some(label) = &label {
                inner
                    .in_flight
                    .entry(agent_name.to_string())
                    .or_default()
                    .push(label.clone());
            }
            label
        };
        if let Some(label) = label {
            self.bus.publish(Event::new(
                EventType::WorkflowStepStarted,
                self.context_id.clone(),
                json!({ "step": label, "agentName": agent_name }),
            ));
        }
    }

    fn dispatch_finished(&self, agent_name: &str, success: bool) {
        let label = {
            let mut inner = self.inner.lock().expect("step tracker poisoned");
            let label = inner
                .in_flight
                .get_mut(agent_name)
                .and_then(|labels| (!labels.is_empty()).then(|| labels.remove(0)));
            if let Some(label) = &label {
                inner.statuses.insert(
                    label.clone(),
                    if success {
                        StepStatus::Completed
                    } else {
                        StepStatus::Failed
                    },
                );
            }
            label
        };
        if let Some(label) = label {
            self.bus.publish(Event::new(
                EventType::WorkflowStepCompleted,
                self.context_id.clone(),
                json!({ "step": label, "agentName": agent_name, "success": success }),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::{Edge, EdgeCondition, Step};

    fn step(id: &str, order: u32, agent: &str) -> Step {
        Step {
            id: id.to_string(),
            order,
            agent_name: agent.to_string(),
            description: format!("run {agent}"),
        }
    }

    fn tracker_for(steps: &[Step], edges: &[Edge]) -> StepTracker {
        let plan = compile(steps, edges).unwrap();
        StepTracker::new(plan, EventBus::default(), "s::c".to_string())
    }

    #[test]
    fn dispatches_consume_plan_entries_in_order() {
        let steps = vec![
            step("1", 0, "research"),
            step("2", 1, "writer"),
            step("3", 2, "research"),
        ];
        let edges = vec![
            Edge {
                from_step_id: "1".into(),
                to_step_id: "2".into(),
                condition: None,
            },
            Edge {
                from_step_id: "2".into(),
                to_step_id: "3".into(),
                condition: None,
            },
        ];
        let tracker = tracker_for(&steps, &edges);

        tracker.dispatch_started("research");
        tracker.dispatch_finished("research", true);
        tracker.dispatch_started("writer");
        tracker.dispatch_finished("writer", false);
        tracker.dispatch_started("research");
        tracker.dispatch_finished("research", true);

        let outcomes = tracker.finalize();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].status, StepStatus::Completed);
        assert_eq!(outcomes[1].status, StepStatus::Failed);
        assert_eq!(outcomes[2].status, StepStatus::Completed);
    }

    #[test]
    fn untaken_branch_is_reported_skipped() {
        let steps = vec![
            step("1", 0, "intake"),
            step("eval", 1, "EVALUATE"),
            step("yes", 2, "pager"),
            step("no", 3, "email"),
        ];
        let edges = vec![
            Edge {
                from_step_id: "1".into(),
                to_step_id: "eval".into(),
                condition: None,
            },
            Edge {
                from_step_id: "eval".into(),
                to_step_id: "yes".into(),
                condition: Some(EdgeCondition::True),
            },
            Edge {
                from_step_id: "eval".into(),
                to_step_id: "no".into(),
                condition: Some(EdgeCondition::False),
            },
        ];
        let tracker = tracker_for(&steps, &edges);

        tracker.dispatch_started("intake");
        tracker.dispatch_finished("intake", true);
        // Evaluation resolved true: only the pager branch runs.
        tracker.dispatch_started("pager");
        tracker.dispatch_finished("pager", true);

        let outcomes = tracker.finalize();
        let by_agent: HashMap<&str, StepStatus> = outcomes
            .iter()
            .map(|o| (o.agent_name.as_str(), o.status))
            .collect();
        assert_eq!(by_agent["intake"], StepStatus::Completed);
        assert_eq!(by_agent["EVALUATE"], StepStatus::Completed);
        assert_eq!(by_agent["pager"], StepStatus::Completed);
        assert_eq!(by_agent["email"], StepStatus::Skipped);
    }
}
