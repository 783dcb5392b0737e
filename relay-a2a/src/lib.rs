mod envelope;
mod normalize;
mod task;

pub use envelope::*;
pub use normalize::*;
pub use task::*;

/// Exact textual reply a remote agent emits to request a human operator.
/// Kept on the wire as a compatibility hint; the host models the condition
/// as the `InputRequired` task state.
pub const HUMAN_ESCALATION_SENTINEL: &str = "HUMAN_ESCALATION_REQUIRED";
