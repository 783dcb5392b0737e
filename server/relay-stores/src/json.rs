use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_types::{RunRecord, Schedule, User, Workflow};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::traits::{
    ActiveWorkflow, ActiveWorkflowRepo, AgentFileRecord, AgentFileRepo, ScheduleRepo, UserRepo,
    WorkflowRepo,
};

/// One JSON file holding a keyed table, loaded eagerly and rewritten
/// atomically on every mutation. Small-deployment storage; SQL slots in
/// behind the same repo traits.
struct JsonTable<V> {
    path: PathBuf,
    map: RwLock<HashMap<String, V>>,
}

impl<V> JsonTable<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    fn open(dir: &Path, file: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data dir {}", dir.display()))?;
        let path = dir.join(file);
        let map = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("corrupt store file {}", path.display()))?
            }
        } else {
            HashMap::new()
        };
        Ok(JsonTable {
            path,
            map: RwLock::new(map),
        })
    }

    async fn get(&self, key: &str) -> Option<V> {
        self.map.read().await.get(key).cloned()
    }

    async fn values(&self) -> Vec<V> {
        self.map.read().await.values().cloned().collect()
    }

    async fn find<F: Fn(&V) -> bool>(&self, pred: F) -> Option<V> {
        self.map.read().await.values().find(|v| pred(v)).cloned()
    }

    async fn insert(&self, key: String, value: V) -> Result<()> {
        let mut map = self.map.write().await;
        map.insert(key, value);
        self.persist(&map).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.map.write().await;
        map.remove(key);
        self.persist(&map).await
    }

    async fn update_with<F>(&self, key: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut V),
    {
        let mut map = self.map.write().await;
        let Some(value) = map.get_mut(key) else {
            return Ok(false);
        };
        f(value);
        self.persist(&map).await?;
        Ok(true)
    }

    async fn persist(&self, map: &HashMap<String, V>) -> Result<()> {
        let raw = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &raw)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

pub struct JsonUserRepo {
    table: JsonTable<User>,
}

impl JsonUserRepo {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(JsonUserRepo {
            table: JsonTable::open(dir, "users.json")?,
        })
    }
}

#[async_trait]
impl UserRepo for JsonUserRepo {
    async fn create(&self, user: User) -> Result<()> {
        self.table.insert(user.user_id.clone(), user).await
    }

    async fn get(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.table.get(user_id).await)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .table
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .await)
    }

    async fn update(&self, user: User) -> Result<()> {
        self.table.insert(user.user_id.clone(), user).await
    }
}

pub struct JsonWorkflowRepo {
    table: JsonTable<Workflow>,
}

impl JsonWorkflowRepo {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(JsonWorkflowRepo {
            table: JsonTable::open(dir, "workflows.json")?,
        })
    }
}

#[async_trait]
impl WorkflowRepo for JsonWorkflowRepo {
    async fn store(&self, workflow: Workflow) -> Result<()> {
        self.table.insert(workflow.id.clone(), workflow).await
    }

    async fn get(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.table.get(id).await)
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Workflow>> {
        let mut workflows: Vec<Workflow> = self
            .table
            .values()
            .await
            .into_iter()
            .filter(|w| w.owner_id == owner_id)
            .collect();
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(workflows)
    }

    async fn list_all(&self) -> Result<Vec<Workflow>> {
        let mut workflows = self.table.values().await;
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(workflows)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.table.remove(id).await
    }
}

pub struct JsonScheduleRepo {
    schedules: JsonTable<Schedule>,
    history: JsonTable<Vec<RunRecord>>,
}

impl JsonScheduleRepo {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(JsonScheduleRepo {
            schedules: JsonTable::open(dir, "schedules.json")?,
            history: JsonTable::open(dir, "schedule_history.json")?,
        })
    }
}

#[async_trait]
impl ScheduleRepo for JsonScheduleRepo {
    async fn create(&self, schedule: Schedule) -> Result<()> {
        self.schedules.insert(schedule.id.clone(), schedule).await
    }

    async fn get(&self, id: &str) -> Result<Option<Schedule>> {
        Ok(self.schedules.get(id).await)
    }

    async fn list(&self) -> Result<Vec<Schedule>> {
        let mut schedules = self.schedules.values().await;
        schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(schedules)
    }

    async fn update(&self, schedule: Schedule) -> Result<()> {
        self.schedules.insert(schedule.id.clone(), schedule).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.schedules.remove(id).await?;
        self.history.remove(id).await
    }

    async fn record_run(&self, record: RunRecord) -> Result<()> {
        let key = record.schedule_id.clone();
        let mut runs = self.history.get(&key).await.unwrap_or_default();
        runs.push(record);
        self.history.insert(key, runs).await
    }

    async fn history(
        &self,
        schedule_id: Option<&str>,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RunRecord>> {
        let mut records: Vec<RunRecord> = match schedule_id {
            Some(id) => self.history.get(id).await.unwrap_or_default(),
            None => self
                .history
                .values()
                .await
                .into_iter()
                .flatten()
                .collect(),
        };
        if let Some(session_id) = session_id {
            records.retain(|r| r.session_id == session_id);
        }
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.truncate(limit);
        Ok(records)
    }
}

pub struct JsonActiveWorkflowRepo {
    singles: JsonTable<ActiveWorkflow>,
    lists: JsonTable<Vec<serde_json::Value>>,
}

impl JsonActiveWorkflowRepo {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(JsonActiveWorkflowRepo {
            singles: JsonTable::open(dir, "active_workflow.json")?,
            lists: JsonTable::open(dir, "active_workflows.json")?,
        })
    }
}

#[async_trait]
impl ActiveWorkflowRepo for JsonActiveWorkflowRepo {
    async fn get(&self, session_id: &str) -> Result<ActiveWorkflow> {
        Ok(self.singles.get(session_id).await.unwrap_or_default())
    }

    async fn set(&self, session_id: &str, active: ActiveWorkflow) -> Result<()> {
        self.singles.insert(session_id.to_string(), active).await
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        self.singles.remove(session_id).await
    }

    async fn get_list(&self, session_id: &str) -> Result<Vec<serde_json::Value>> {
        Ok(self.lists.get(session_id).await.unwrap_or_default())
    }

    async fn set_list(
        &self,
        session_id: &str,
        workflows: Vec<serde_json::Value>,
    ) -> Result<Vec<serde_json::Value>> {
        self.lists
            .insert(session_id.to_string(), workflows.clone())
            .await?;
        Ok(workflows)
    }

    async fn add_to_list(
        &self,
        session_id: &str,
        workflow: serde_json::Value,
    ) -> Result<Vec<serde_json::Value>> {
        let mut list = self.get_list(session_id).await?;
        list.push(workflow);
        self.set_list(session_id, list).await
    }

    async fn remove_from_list(
        &self,
        session_id: &str,
        workflow_id: &str,
    ) -> Result<Vec<serde_json::Value>> {
        let mut list = self.get_list(session_id).await?;
        list.retain(|w| {
            w.get("id").and_then(serde_json::Value::as_str) != Some(workflow_id)
        });
        self.set_list(session_id, list).await
    }

    async fn clear_list(&self, session_id: &str) -> Result<()> {
        self.lists.remove(session_id).await
    }
}

pub struct JsonAgentFileRepo {
    table: JsonTable<AgentFileRecord>,
}

impl JsonAgentFileRepo {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(JsonAgentFileRepo {
            table: JsonTable::open(dir, "agent_files.json")?,
        })
    }

    fn key(session_id: &str, file_id: &str) -> String {
        format!("{session_id}/{file_id}")
    }
}

#[async_trait]
impl AgentFileRepo for JsonAgentFileRepo {
    async fn register(&self, record: AgentFileRecord) -> Result<()> {
        let key = Self::key(&record.session_id, &record.file_id);
        self.table.insert(key, record).await
    }

    async fn get(&self, session_id: &str, file_id: &str) -> Result<Option<AgentFileRecord>> {
        Ok(self.table.get(&Self::key(session_id, file_id)).await)
    }

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<AgentFileRecord>> {
        let mut records: Vec<AgentFileRecord> = self
            .table
            .values()
            .await
            .into_iter()
            .filter(|r| r.session_id == session_id)
            .collect();
        records.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(records)
    }

    async fn mark_analyzed(&self, session_id: &str, file_id: &str) -> Result<()> {
        self.table
            .update_with(&Self::key(session_id, file_id), |r| r.analyzed = true)
            .await?;
        Ok(())
    }

    async fn remove(&self, session_id: &str, file_id: &str) -> Result<()> {
        self.table.remove(&Self::key(session_id, file_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_types::{RunStatus, ScheduleSpec};

    fn sample_user(id: &str, email: &str) -> User {
        User {
            user_id: id.to_string(),
            email: email.to_string(),
            password_hash: "sha256$s$h".into(),
            name: "Test".into(),
            role: "member".into(),
            description: String::new(),
            skills: vec![],
            color: None,
            created_at: Utc::now(),
            last_login: None,
        }
    }

    #[tokio::test]
    async fn users_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repo = JsonUserRepo::open(dir.path()).unwrap();
            repo.create(sample_user("u1", "a@b.c")).await.unwrap();
        }
        let repo = JsonUserRepo::open(dir.path()).unwrap();
        let user = repo.get_by_email("A@B.C").await.unwrap().unwrap();
        assert_eq!(user.user_id, "u1");
    }

    #[tokio::test]
    async fn schedule_history_is_most_recent_first_and_limited() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonScheduleRepo::open(dir.path()).unwrap();

        for i in 0..5 {
            repo.record_run(RunRecord {
                schedule_id: "sch1".into(),
                session_id: "scheduler::sch1::n".into(),
                started_at: Utc::now() + chrono::Duration::seconds(i),
                completed_at: None,
                status: RunStatus::Success,
                execution_time_s: 1.0,
                result_excerpt: Some(format!("run {i}")),
                error: None,
            })
            .await
            .unwrap();
        }

        let history = repo.history(Some("sch1"), None, 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].result_excerpt.as_deref(), Some("run 4"));
    }

    #[tokio::test]
    async fn schedule_crud_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonScheduleRepo::open(dir.path()).unwrap();

        let schedule = Schedule {
            id: "sch1".into(),
            workflow_id: "wf1".into(),
            workflow_name: "daily report".into(),
            session_id: "user_3".into(),
            spec: ScheduleSpec::Interval {
                interval_minutes: 5,
            },
            timezone: "UTC".into(),
            enabled: true,
            run_count: 0,
            max_runs: Some(2),
            timeout_s: 120,
            retry_on_failure: false,
            max_retries: 3,
            created_at: Utc::now(),
            last_run_at: None,
        };
        repo.create(schedule.clone()).await.unwrap();
        assert!(repo.get("sch1").await.unwrap().is_some());

        repo.delete("sch1").await.unwrap();
        assert!(repo.get("sch1").await.unwrap().is_none());
        assert!(repo.history(Some("sch1"), None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_workflow_list_add_remove() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonActiveWorkflowRepo::open(dir.path()).unwrap();

        repo.add_to_list("s1", serde_json::json!({"id": "w1", "name": "one"}))
            .await
            .unwrap();
        repo.add_to_list("s1", serde_json::json!({"id": "w2", "name": "two"}))
            .await
            .unwrap();

        let after_remove = repo.remove_from_list("s1", "w1").await.unwrap();
        assert_eq!(after_remove.len(), 1);
        assert_eq!(after_remove[0]["id"], "w2");
    }
}
