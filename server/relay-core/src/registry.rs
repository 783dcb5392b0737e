use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use relay_types::{AgentDescriptor, EnabledAgent, HostError};
use tokio::sync::Mutex;

/// Process-wide agent registry, initialized once at startup and mutated
/// through the agents API. Read-mostly: readers take the lock briefly and
/// clone descriptors out.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentDescriptor>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: AgentDescriptor) -> Result<(), HostError> {
        let mut agents = self.agents.write().expect("agent registry poisoned");
        if agents.contains_key(&descriptor.name) {
            return Err(HostError::Conflict(format!(
                "agent already registered: {}",
                descriptor.name
            )));
        }
        agents.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn upsert(&self, descriptor: AgentDescriptor) {
        let mut agents = self.agents.write().expect("agent registry poisoned");
        agents.insert(descriptor.name.clone(), descriptor);
    }

    pub fn update(&self, descriptor: AgentDescriptor) -> Result<(), HostError> {
        let mut agents = self.agents.write().expect("agent registry poisoned");
        if !agents.contains_key(&descriptor.name) {
            return Err(HostError::NotFound(format!(
                "unknown agent: {}",
                descriptor.name
            )));
        }
        agents.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<(), HostError> {
        let mut agents = self.agents.write().expect("agent registry poisoned");
        agents
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| HostError::NotFound(format!("unknown agent: {name}")))
    }

    pub fn get(&self, name: &str) -> Option<AgentDescriptor> {
        self.agents
            .read()
            .expect("agent registry poisoned")
            .get(name)
            .cloned()
    }

    pub fn list(&self) -> Vec<AgentDescriptor> {
        let mut agents: Vec<AgentDescriptor> = self
            .agents
            .read()
            .expect("agent registry poisoned")
            .values()
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }
}

struct SessionEntry {
    /// Serializes mutations per session; readers never take it.
    write_lock: Mutex<()>,
    /// Copy-on-write: writers build a new map and swap the Arc, so a reader
    /// snapshot stays consistent for as long as it is held.
    enabled: RwLock<Arc<HashMap<String, EnabledAgent>>>,
}

/// Per-session enabled-agent state. No two sessions ever share an
/// [`EnabledAgent`] instance, and no cross-session locks exist.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, session_id: &str) -> Arc<SessionEntry> {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(SessionEntry {
                    write_lock: Mutex::new(()),
                    enabled: RwLock::new(Arc::new(HashMap::new())),
                })
            })
            .clone()
    }

    pub async fn enable(&self, session_id: &str, descriptor: AgentDescriptor, url: String) {
        let entry = self.entry(session_id);
        let _guard = entry.write_lock.lock().await;
        let mut next = (**entry.enabled.read().expect("session entry poisoned")).clone();
        next.insert(
            descriptor.name.clone(),
            EnabledAgent { descriptor, url },
        );
        *entry.enabled.write().expect("session entry poisoned") = Arc::new(next);
    }

    pub async fn disable(&self, session_id: &str, agent_name: &str) {
        let entry = self.entry(session_id);
        let _guard = entry.write_lock.lock().await;
        let mut next = (**entry.enabled.read().expect("session entry poisoned")).clone();
        next.remove(agent_name);
        *entry.enabled.write().expect("session entry poisoned") = Arc::new(next);
    }

    /// Consistent snapshot of the session's enabled agents.
    pub fn snapshot(&self, session_id: &str) -> Arc<HashMap<String, EnabledAgent>> {
        match self.sessions.get(session_id) {
            Some(entry) => entry.enabled.read().expect("session entry poisoned").clone(),
            None => Arc::new(HashMap::new()),
        }
    }

    pub fn drop_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::AgentUrls;

    fn descriptor(name: &str) -> AgentDescriptor {
        AgentDescriptor {
            name: name.to_string(),
            description: String::new(),
            urls: AgentUrls {
                dev: Some(format!("http://dev/{name}")),
                production: Some(format!("http://prod/{name}")),
            },
            skills: vec![],
            input_modes: vec![],
            output_modes: vec![],
            streaming: true,
            tool_approval: Default::default(),
        }
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let registry = AgentRegistry::new();
        registry.register(descriptor("a")).unwrap();
        assert!(matches!(
            registry.register(descriptor("a")),
            Err(HostError::Conflict(_))
        ));
        registry.upsert(descriptor("a"));
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let sessions = SessionRegistry::new();
        sessions
            .enable("a", descriptor("writer"), "http://dev/writer".into())
            .await;

        // Arbitrary mutations on session a never show up in session b.
        for i in 0..20 {
            if i % 2 == 0 {
                sessions
                    .enable("a", descriptor("extra"), "http://dev/extra".into())
                    .await;
            } else {
                sessions.disable("a", "extra").await;
            }
            assert!(sessions.snapshot("b").is_empty());
        }
        assert_eq!(sessions.snapshot("a").len(), 1);
    }

    #[tokio::test]
    async fn snapshot_is_immutable_under_later_writes() {
        let sessions = SessionRegistry::new();
        sessions
            .enable("a", descriptor("one"), "u1".into())
            .await;
        let snapshot = sessions.snapshot("a");
        sessions
            .enable("a", descriptor("two"), "u2".into())
            .await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(sessions.snapshot("a").len(), 2);
    }
}
