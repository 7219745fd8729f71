use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::core::{
    domain::{Conversation, Run, RunResult},
    error::{Error, Result},
    ports::RunRepository,
};

#[derive(Default)]
struct Tables {
    runs: HashMap<String, Run>,
    results: HashMap<String, Vec<RunResult>>,
    conversations: HashMap<String, Vec<Conversation>>,
}

/// Process-local store for throwaway runs (`--in-memory`).
#[derive(Default)]
pub struct InMemoryRunStore {
    tables: Mutex<Tables>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RunRepository for InMemoryRunStore {
    async fn save_run(&self, run: &Run) -> Result<()> {
        self.tables().runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<Run>> {
        Ok(self.tables().runs.get(run_id).cloned())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self.tables().runs.values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn append_result(&self, result: &RunResult) -> Result<()> {
        let mut tables = self.tables();
        let results = tables.results.entry(result.run_id.clone()).or_default();
        if results.iter().any(|stored| stored.id == result.id) {
            return Err(Error::Persistence(format!("result {} already exists", result.id)));
        }
        results.push(result.clone());
        Ok(())
    }

    async fn update_result(&self, result: &RunResult) -> Result<()> {
        let mut tables = self.tables();
        let stored = tables
            .results
            .get_mut(&result.run_id)
            .and_then(|results| results.iter_mut().find(|stored| stored.id == result.id))
            .ok_or_else(|| Error::NotFound(format!("result {}", result.id)))?;
        *stored = result.clone();
        Ok(())
    }

    async fn load_results(&self, run_id: &str) -> Result<Vec<RunResult>> {
        let mut results = self.tables().results.get(run_id).cloned().unwrap_or_default();
        results.sort_by_key(|result| result.position);
        Ok(results)
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut tables = self.tables();
        let conversations = tables
            .conversations
            .entry(conversation.run_id.clone())
            .or_default();
        match conversations
            .iter_mut()
            .find(|stored| stored.id == conversation.id)
        {
            Some(stored) => *stored = conversation.clone(),
            None => conversations.push(conversation.clone()),
        }
        Ok(())
    }

    async fn load_conversations(&self, run_id: &str) -> Result<Vec<Conversation>> {
        let mut conversations = self
            .tables()
            .conversations
            .get(run_id)
            .cloned()
            .unwrap_or_default();
        conversations.sort_by_key(|conversation| conversation.order_index);
        Ok(conversations)
    }
}
