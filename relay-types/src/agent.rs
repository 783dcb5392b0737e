use serde::{Deserialize, Serialize};

/// Globally registered remote agent. Registration is explicit; the host
/// never discovers agents from the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub urls: AgentUrls,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    #[serde(default)]
    pub input_modes: Vec<String>,
    #[serde(default)]
    pub output_modes: Vec<String>,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub tool_approval: ToolApprovalPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentUrls {
    #[serde(default)]
    pub dev: Option<String>,
    #[serde(default)]
    pub production: Option<String>,
}

impl AgentDescriptor {
    /// Interactive sessions prefer the dev URL; scheduled runs must use
    /// production when present.
    pub fn dev_url(&self) -> Option<&str> {
        self.urls.dev.as_deref().or(self.urls.production.as_deref())
    }

    pub fn production_url(&self) -> Option<&str> {
        self.urls.production.as_deref().or(self.urls.dev.as_deref())
    }

    pub fn capability_line(&self) -> String {
        if self.description.is_empty() {
            let skills: Vec<&str> = self.skills.iter().map(|s| s.name.as_str()).collect();
            format!("{}: {}", self.name, skills.join(", "))
        } else {
            format!("{}: {}", self.name, self.description)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// How the transport answers a remote agent's tool-approval request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolApprovalPolicy {
    #[default]
    AutoApprove,
    Deny,
}

/// A descriptor enabled for one session, pinned to the URL chosen at
/// enable time. Instances are never shared across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnabledAgent {
    pub descriptor: AgentDescriptor,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(dev: Option<&str>, prod: Option<&str>) -> AgentDescriptor {
        AgentDescriptor {
            name: "a".into(),
            description: String::new(),
            urls: AgentUrls {
                dev: dev.map(String::from),
                production: prod.map(String::from),
            },
            skills: vec![],
            input_modes: vec![],
            output_modes: vec![],
            streaming: true,
            tool_approval: ToolApprovalPolicy::default(),
        }
    }

    #[test]
    fn url_preference_by_environment() {
        let d = descriptor(Some("http://dev"), Some("http://prod"));
        assert_eq!(d.dev_url(), Some("http://dev"));
        assert_eq!(d.production_url(), Some("http://prod"));

        let dev_only = descriptor(Some("http://dev"), None);
        assert_eq!(dev_only.production_url(), Some("http://dev"));

        let prod_only = descriptor(None, Some("http://prod"));
        assert_eq!(prod_only.dev_url(), Some("http://prod"));
    }
}
