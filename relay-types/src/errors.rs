/// Error taxonomy for the host. Kinds, not concrete causes: each maps to
/// an HTTP status for the synchronous surface and a stable kind string for
/// the `{ success:false, error:"<kind>: <detail>" }` body and `error`
/// events.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("agent unreachable: {0}")]
    AgentUnreachable(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("quota exceeded: {0}")]
    Quota(String),
    #[error("human escalation timed out: {0}")]
    EscalationTimeout(String),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HostError {
    pub fn kind(&self) -> &'static str {
        match self {
            HostError::Validation(_) => "ValidationError",
            HostError::Auth(_) => "AuthError",
            HostError::NotFound(_) => "NotFound",
            HostError::Conflict(_) => "Conflict",
            HostError::AgentUnreachable(_) => "AgentUnreachable",
            HostError::Timeout(_) => "TimeoutError",
            HostError::Protocol(_) => "ProtocolError",
            HostError::Store(_) => "StoreError",
            HostError::Quota(_) => "QuotaError",
            HostError::EscalationTimeout(_) => "HumanEscalationTimeout",
            HostError::Serde(_) => "ProtocolError",
            HostError::Other(_) => "InternalError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            HostError::Validation(_) | HostError::Serde(_) => 400,
            HostError::Auth(_) => 401,
            HostError::NotFound(_) => 404,
            HostError::Conflict(_) => 409,
            HostError::Timeout(_) => 408,
            HostError::Quota(_) => 429,
            HostError::AgentUnreachable(_)
            | HostError::Protocol(_)
            | HostError::Store(_)
            | HostError::EscalationTimeout(_)
            | HostError::Other(_) => 500,
        }
    }

    fn detail(&self) -> String {
        match self {
            HostError::Validation(d)
            | HostError::Auth(d)
            | HostError::NotFound(d)
            | HostError::Conflict(d)
            | HostError::AgentUnreachable(d)
            | HostError::Timeout(d)
            | HostError::Protocol(d)
            | HostError::Store(d)
            | HostError::Quota(d)
            | HostError::EscalationTimeout(d) => d.clone(),
            HostError::Serde(e) => e.to_string(),
            HostError::Other(e) => e.to_string(),
        }
    }

    /// Wire form used by `/api/query` failures and `error` events.
    pub fn user_message(&self) -> String {
        format!("{}: {}", self.kind(), self.detail())
    }

    /// Recoverable kinds are retried or degraded locally instead of being
    /// surfaced to the orchestrator.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HostError::AgentUnreachable(_) | HostError::Quota(_) | HostError::Store(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(HostError::Validation("x".into()).http_status(), 400);
        assert_eq!(HostError::Auth("x".into()).http_status(), 401);
        assert_eq!(HostError::NotFound("x".into()).http_status(), 404);
        assert_eq!(HostError::Conflict("x".into()).http_status(), 409);
        assert_eq!(HostError::Timeout("x".into()).http_status(), 408);
        assert_eq!(HostError::Quota("x".into()).http_status(), 429);
    }

    #[test]
    fn user_message_carries_kind_prefix() {
        let err = HostError::Timeout("query timed out after 300 seconds".into());
        assert_eq!(
            err.user_message(),
            "TimeoutError: query timed out after 300 seconds"
        );
    }
}
