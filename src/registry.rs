//! Registry of configured agents.
//!
//! Each record sits behind its own mutex, so outcome bookkeeping for one
//! agent is a single serialized read-modify-write while different agents
//! update independently.
//!
//! A registry built with [`AgentRegistry::load`] is backed by the store.
//! Every change is written as a narrow update while the record's lock is
//! held, and [`AgentRegistry::resolve`] re-reads the stored row, so changes
//! made by other processes (an agent disabled from the CLI while `run
//! --watch` is going) are seen before the next dispatch.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{Result, ScoutError};
use crate::models::{AgentRecord, Performance, SearchScheduleEntry};

type Slot = Arc<Mutex<AgentRecord>>;

pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Slot>>,
    store: Option<Arc<Database>>,
}

impl AgentRegistry {
    /// A registry that lives in memory only.
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Build a store-backed registry from the persisted agent records.
    ///
    /// Rows that cannot be read are skipped with a warning; using one of
    /// those agents later fails with the row's own error.
    pub async fn load(db: Arc<Database>) -> Result<Self> {
        let mut agents = HashMap::new();
        for name in db.agent_names().await? {
            match db.load_agent(&name).await {
                Ok(Some(record)) => {
                    agents.insert(name, Arc::new(Mutex::new(record)));
                }
                Ok(None) => {}
                Err(e) => warn!(agent = %name, "Skipping stored agent: {}", e),
            }
        }
        debug!("Loaded {} agents", agents.len());
        Ok(Self {
            agents: RwLock::new(agents),
            store: Some(db),
        })
    }

    pub async fn register(&self, record: AgentRecord) -> Result<()> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&record.name) {
            return Err(ScoutError::DuplicateName(record.name));
        }
        if let Some(db) = &self.store {
            if !db.insert_agent(&record).await? {
                return Err(ScoutError::DuplicateName(record.name));
            }
        }
        debug!(agent = %record.name, agent_type = %record.agent_type, "Registered agent");
        agents.insert(record.name.clone(), Arc::new(Mutex::new(record)));
        Ok(())
    }

    /// Remove an agent. Refuses while any of `valid_schedules` still points at it.
    pub async fn unregister(
        &self,
        name: &str,
        valid_schedules: &[SearchScheduleEntry],
    ) -> Result<()> {
        let referencing: Vec<i64> = valid_schedules
            .iter()
            .filter(|s| s.agent_name == name)
            .map(|s| s.id)
            .collect();
        if !referencing.is_empty() {
            return Err(ScoutError::InvalidScheduleState(format!(
                "agent '{}' is still used by schedule(s) {:?}",
                name, referencing
            )));
        }

        let mut agents = self.agents.write().await;
        let removed = agents.remove(name).is_some();
        // The stored row goes too, even if it could not be loaded
        let deleted = match &self.store {
            Some(db) => db.delete_agent(name).await?,
            None => false,
        };
        if !removed && !deleted {
            return Err(ScoutError::not_found("agent", name));
        }
        Ok(())
    }

    async fn slot(&self, name: &str) -> Result<Slot> {
        if let Some(slot) = self.agents.read().await.get(name).cloned() {
            return Ok(slot);
        }

        // Possibly registered by another process after load
        let db = self.store.as_ref().ok_or_else(|| ScoutError::not_found("agent", name))?;
        let record = db
            .load_agent(name)
            .await?
            .ok_or_else(|| ScoutError::not_found("agent", name))?;
        let mut agents = self.agents.write().await;
        Ok(agents
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(record)))
            .clone())
    }

    /// Snapshot of an agent. With `require_active`, inactive agents are refused.
    pub async fn resolve(&self, name: &str, require_active: bool) -> Result<AgentRecord> {
        let slot = self.slot(name).await?;
        let mut record = slot.lock().await;
        if let Some(db) = &self.store {
            match db.load_agent(name).await? {
                Some(stored) => *record = stored,
                None => {
                    drop(record);
                    self.agents.write().await.remove(name);
                    return Err(ScoutError::not_found("agent", name));
                }
            }
        }
        if require_active && !record.is_active {
            return Err(ScoutError::Inactive(name.to_string()));
        }
        Ok(record.clone())
    }

    pub async fn record_outcome(
        &self,
        name: &str,
        elapsed_ms: u64,
        succeeded: bool,
    ) -> Result<Performance> {
        let slot = self.slot(name).await?;
        let mut record = slot.lock().await;
        match &self.store {
            Some(db) => {
                record.performance = db.record_agent_outcome(name, elapsed_ms, succeeded).await?;
            }
            None => record.performance.record(elapsed_ms, succeeded),
        }
        Ok(record.performance.clone())
    }

    pub async fn mark_run(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        let slot = self.slot(name).await?;
        let mut record = slot.lock().await;
        if let Some(db) = &self.store {
            db.mark_agent_run(name, at).await?;
        }
        record.last_run_at = Some(at);
        Ok(())
    }

    pub async fn set_active(&self, name: &str, active: bool) -> Result<AgentRecord> {
        let slot = self.slot(name).await?;
        let mut record = slot.lock().await;
        if let Some(db) = &self.store {
            db.set_agent_active(name, active).await?;
        }
        record.is_active = active;
        Ok(record.clone())
    }

    pub async fn list(&self) -> Vec<AgentRecord> {
        let slots: Vec<_> = self.agents.read().await.values().cloned().collect();
        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            records.push(slot.lock().await.clone());
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub async fn count(&self) -> usize {
        self.agents.read().await.len()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentType, ApiBinding, ScheduleSpec, SearchCriteria};

    fn agent(name: &str) -> AgentRecord {
        AgentRecord::new(name, AgentType::JobDiscovery, ApiBinding::default())
    }

    fn schedule_for(agent_name: &str) -> SearchScheduleEntry {
        SearchScheduleEntry {
            id: 11,
            user_id: 1,
            resume_id: None,
            agent_name: agent_name.to_string(),
            search_type: "weekly_ai_discovery".to_string(),
            search_approach: None,
            quality_level: None,
            criteria: SearchCriteria::default(),
            schedule: ScheduleSpec::weekly(),
            jobs_found: vec![],
            last_run_at: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_name() {
        let registry = AgentRegistry::new();
        registry.register(agent("discovery")).await.unwrap();
        let err = registry.register(agent("discovery")).await.unwrap_err();
        assert!(matches!(err, ScoutError::DuplicateName(ref n) if n == "discovery"));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_resolve_missing_and_inactive() {
        let registry = AgentRegistry::new();
        assert!(matches!(
            registry.resolve("ghost", false).await,
            Err(ScoutError::NotFound { .. })
        ));

        let mut record = agent("sleepy");
        record.is_active = false;
        registry.register(record).await.unwrap();

        assert!(matches!(
            registry.resolve("sleepy", true).await,
            Err(ScoutError::Inactive(_))
        ));
        assert!(registry.resolve("sleepy", false).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_outcomes_are_not_lost() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(agent("busy")).await.unwrap();

        let total: u64 = 200;
        let mut handles = Vec::new();
        for i in 0..total {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.record_outcome("busy", 10, i % 4 != 0).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let perf = registry.resolve("busy", false).await.unwrap().performance;
        assert_eq!(perf.total_runs, total);
        assert_eq!(perf.success_count, 150);
        assert!((perf.success_rate - 150.0 / total as f64).abs() < 1e-9);
        assert!((perf.error_rate - 50.0 / total as f64).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unregister_refuses_referenced_agent() {
        let registry = AgentRegistry::new();
        registry.register(agent("discovery")).await.unwrap();

        let err = registry
            .unregister("discovery", &[schedule_for("discovery")])
            .await
            .unwrap_err();
        assert!(matches!(err, ScoutError::InvalidScheduleState(_)));

        registry
            .unregister("discovery", &[schedule_for("other")])
            .await
            .unwrap();
        assert_eq!(registry.count().await, 0);
        assert!(matches!(
            registry.unregister("discovery", &[]).await,
            Err(ScoutError::NotFound { .. })
        ));
    }

    async fn store() -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        db.init().await.unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn test_store_backed_changes_are_persisted() {
        let db = store().await;
        db.insert_agent(&agent("discovery")).await.unwrap();

        let registry = AgentRegistry::load(db.clone()).await.unwrap();
        registry.record_outcome("discovery", 50, true).await.unwrap();
        registry.mark_run("discovery", Utc::now()).await.unwrap();
        registry.register(agent("second")).await.unwrap();

        let stored = db.load_agent("discovery").await.unwrap().unwrap();
        assert_eq!(stored.performance.total_runs, 1);
        assert!(stored.last_run_at.is_some());
        assert!(db.load_agent("second").await.unwrap().is_some());

        registry.unregister("second", &[]).await.unwrap();
        assert!(db.load_agent("second").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_agent_is_skipped_on_load() {
        let db = store().await;
        db.insert_agent(&agent("discovery")).await.unwrap();
        let mut broken = agent("broken");
        broken.agent_type = AgentType::JobMatching;
        db.insert_agent(&broken).await.unwrap();
        db.execute_raw("UPDATE agents SET agent_type = 'telepathy' WHERE name = 'broken'")
            .await;

        let registry = AgentRegistry::load(db.clone()).await.unwrap();
        assert_eq!(registry.count().await, 1);
        assert!(registry.resolve("discovery", true).await.is_ok());
        assert!(matches!(
            registry.resolve("broken", true).await,
            Err(ScoutError::UnsupportedAgentType(_))
        ));

        // The bad row can still be removed
        registry.unregister("broken", &[]).await.unwrap();
        assert_eq!(db.agent_names().await.unwrap(), vec!["discovery"]);
    }

    #[tokio::test]
    async fn test_changes_from_another_process_are_not_undone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scout.db");
        let admin_db = Arc::new(Database::open(&path).unwrap());
        admin_db.init().await.unwrap();
        admin_db.insert_agent(&agent("discovery")).await.unwrap();
        let watcher_db = Arc::new(Database::open(&path).unwrap());

        let admin = AgentRegistry::load(admin_db.clone()).await.unwrap();
        let watcher = AgentRegistry::load(watcher_db).await.unwrap();
        assert!(watcher.resolve("discovery", true).await.is_ok());

        admin.record_outcome("discovery", 100, true).await.unwrap();
        admin.set_active("discovery", false).await.unwrap();

        // The watcher's copy is stale; its outcome must neither re-enable the
        // agent nor drop the admin's run
        let perf = watcher.record_outcome("discovery", 300, false).await.unwrap();
        assert_eq!(perf.total_runs, 2);
        assert!(matches!(
            watcher.resolve("discovery", true).await,
            Err(ScoutError::Inactive(_))
        ));

        let stored = admin_db.load_agent("discovery").await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.performance.total_runs, 2);
        assert_eq!(stored.performance.success_count, 1);

        // Agents registered elsewhere after load are found too
        admin.register(agent("late")).await.unwrap();
        assert!(watcher.resolve("late", true).await.is_ok());
    }
}
