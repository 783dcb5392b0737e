use serde::{Deserialize, Serialize};

/// Reserved step agent name whose boolean verdict picks a true/false branch.
pub const EVALUATE_AGENT: &str = "EVALUATE";

/// User-authored workflow: a DAG of steps persisted per owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub category: Option<String>,
    pub owner_id: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Workflow {
    /// Agent names this workflow needs, excluding the reserved EVALUATE step
    /// (evaluated by the host itself).
    pub fn required_agents(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .steps
            .iter()
            .map(|s| s.agent_name.as_str())
            .filter(|n| !n.eq_ignore_ascii_case(EVALUATE_AGENT))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub order: u32,
    pub agent_name: String,
    #[serde(default)]
    pub description: String,
}

impl Step {
    pub fn is_evaluate(&self) -> bool {
        self.agent_name.eq_ignore_ascii_case(EVALUATE_AGENT)
    }

    pub fn display_description(&self) -> String {
        if self.description.is_empty() {
            format!("Use the {} agent", self.agent_name)
        } else {
            self.description.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from_step_id: String,
    pub to_step_id: String,
    /// `None` = unconditional; conditional edges may only leave EVALUATE steps.
    #[serde(default)]
    pub condition: Option<EdgeCondition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeCondition {
    #[serde(rename = "true")]
    True,
    #[serde(rename = "false")]
    False,
}

impl EdgeCondition {
    pub fn as_bool(self) -> bool {
        matches!(self, EdgeCondition::True)
    }
}
