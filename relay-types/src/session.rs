use serde::{Deserialize, Serialize};

use crate::errors::HostError;

pub const CONTEXT_SEPARATOR: &str = "::";

/// Routing key for one chat thread: `session::conversation`.
/// The session prefix is the event partition key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// Session ids may themselves contain the separator (scheduler runs
    /// synthesize `scheduler::<schedule>::<nonce>`), so the conversation
    /// id is always the last segment and must not contain it.
    pub fn new(session_id: &str, conversation_id: &str) -> Result<Self, HostError> {
        if session_id.is_empty() {
            return Err(HostError::Validation("empty session id".into()));
        }
        if conversation_id.is_empty() || conversation_id.contains(CONTEXT_SEPARATOR) {
            return Err(HostError::Validation(format!(
                "invalid conversation id: {conversation_id:?}"
            )));
        }
        Ok(ContextId(format!(
            "{session_id}{CONTEXT_SEPARATOR}{conversation_id}"
        )))
    }

    /// Parse a full `session::conversation` string.
    pub fn parse(raw: &str) -> Result<Self, HostError> {
        let (session, conversation) = raw
            .rsplit_once(CONTEXT_SEPARATOR)
            .ok_or_else(|| HostError::Validation(format!("not a context id: {raw:?}")))?;
        Self::new(session, conversation)
    }

    pub fn session_id(&self) -> &str {
        self.0
            .rsplit_once(CONTEXT_SEPARATOR)
            .map(|(s, _)| s)
            .unwrap_or(&self.0)
    }

    pub fn conversation_id(&self) -> &str {
        self.0
            .rsplit_once(CONTEXT_SEPARATOR)
            .map(|(_, c)| c)
            .unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session part of either a bare session id or a full context id. The
/// conversation segment is the one after the last separator.
pub fn session_of(context_or_session: &str) -> &str {
    context_or_session
        .rsplit_once(CONTEXT_SEPARATOR)
        .map(|(s, _)| s)
        .unwrap_or(context_or_session)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_id_round_trip() {
        let ctx = ContextId::new("sess1", "conv9").unwrap();
        assert_eq!(ctx.as_str(), "sess1::conv9");
        assert_eq!(ctx.session_id(), "sess1");
        assert_eq!(ctx.conversation_id(), "conv9");
        assert_eq!(ContextId::parse("sess1::conv9").unwrap(), ctx);
    }

    #[test]
    fn scheduler_sessions_keep_their_separators() {
        let ctx = ContextId::new("scheduler::sch1::a1b2", "conv").unwrap();
        assert_eq!(ctx.session_id(), "scheduler::sch1::a1b2");
        assert_eq!(ctx.conversation_id(), "conv");
    }

    #[test]
    fn conversation_id_may_not_contain_separator() {
        assert!(ContextId::new("sess", "a::b").is_err());
    }

    #[test]
    fn session_of_handles_both_forms() {
        assert_eq!(session_of("sess1::conv9"), "sess1");
        assert_eq!(session_of("sess1"), "sess1");
        assert_eq!(session_of("scheduler::sch1::n::conv"), "scheduler::sch1::n");
    }
}
