use serde::{Deserialize, Serialize};

/// Lifecycle of a task dispatched to a remote agent.
///
/// ```text
///  submitted ──▶ running ──▶ completed
///      │           │  ▲         │
///      │           │  └─ input_required ─▶ (human/tool response) ─┘
///      │           ├─▶ failed
///      └───────────┴─▶ canceled
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Submitted,
    Running,
    InputRequired,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }

    /// Valid transitions per the dispatch state machine. `InputRequired`
    /// must be resumable back into `Running`.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Submitted, Running) | (Submitted, Canceled) | (Submitted, Failed) => true,
            (Running, Completed) | (Running, Failed) | (Running, Canceled) => true,
            (Running, InputRequired) => true,
            (InputRequired, Running) | (InputRequired, Failed) | (InputRequired, Canceled) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(!TaskState::InputRequired.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[test]
    fn input_required_resumes_to_running() {
        assert!(TaskState::Running.can_transition_to(TaskState::InputRequired));
        assert!(TaskState::InputRequired.can_transition_to(TaskState::Running));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Running));
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskState::InputRequired).unwrap(),
            "\"input_required\""
        );
    }
}
