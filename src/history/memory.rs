//! In-memory history store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::HistoryStore;
use crate::domain::{HistoryEntry, Run, RunHistory, RunSummary};
use crate::error::{Result, WorkflowError};
use crate::id::entry_id;

#[derive(Debug)]
struct RunLog {
    snapshots: Vec<Run>,
    entries: Vec<HistoryEntry>,
}

impl RunLog {
    fn latest(&self) -> Option<&Run> {
        self.snapshots.last()
    }
}

/// Keeps every run in process memory. Each run has its own lock so appends
/// to different runs never contend.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    runs: RwLock<HashMap<String, Arc<Mutex<RunLog>>>>,
}

fn poisoned<E: std::fmt::Display>(e: E) -> WorkflowError {
    WorkflowError::Storage(format!("lock poisoned: {}", e))
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, run_id: &str) -> Result<Arc<Mutex<RunLog>>> {
        self.runs
            .read()
            .map_err(poisoned)?
            .get(run_id)
            .cloned()
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()))
    }

    fn summaries(&self) -> Result<Vec<RunSummary>> {
        let logs: Vec<Arc<Mutex<RunLog>>> = self.runs.read().map_err(poisoned)?.values().cloned().collect();
        let mut summaries = Vec::with_capacity(logs.len());
        for log in logs {
            if let Some(run) = log.lock().map_err(poisoned)?.latest() {
                summaries.push(RunSummary::from(run));
            }
        }
        Ok(summaries)
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn create_run(&self, run: &Run) -> Result<bool> {
        let mut runs = self.runs.write().map_err(poisoned)?;
        if runs.contains_key(&run.id) {
            return Ok(false);
        }
        runs.insert(
            run.id.clone(),
            Arc::new(Mutex::new(RunLog {
                snapshots: vec![run.clone()],
                entries: Vec::new(),
            })),
        );
        Ok(true)
    }

    fn save_run(&self, run: &Run) -> Result<()> {
        let log = self.log(&run.id)?;
        log.lock().map_err(poisoned)?.snapshots.push(run.clone());
        Ok(())
    }

    fn append(&self, mut entry: HistoryEntry) -> Result<HistoryEntry> {
        let log = self.log(&entry.run_id)?;
        let mut log = log.lock().map_err(poisoned)?;
        entry.seq = log.entries.len() as u64 + 1;
        entry.id = entry_id(&entry.run_id, entry.seq);
        log.entries.push(entry.clone());
        Ok(entry)
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunHistory>> {
        let log = match self.log(run_id) {
            Ok(log) => log,
            Err(WorkflowError::RunNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let log = log.lock().map_err(poisoned)?;
        Ok(log.latest().map(|run| RunHistory {
            run: run.clone(),
            entries: log.entries.clone(),
        }))
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut summaries = self.summaries()?;
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        summaries.truncate(limit);
        Ok(summaries)
    }

    fn list_between(&self, from_ms: i64, to_ms: i64) -> Result<Vec<RunSummary>> {
        let mut summaries: Vec<RunSummary> = self
            .summaries()?
            .into_iter()
            .filter(|s| s.created_at >= from_ms && s.created_at < to_ms)
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }
}
