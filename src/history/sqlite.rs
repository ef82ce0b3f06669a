//! SQLite-backed history store.
//!
//! Three append-only tables:
//! - `runs`: one row per run id, written once
//! - `run_snapshots`: every saved version of the run record (JSON)
//! - `history_entries`: stage entries keyed by (run_id, seq)

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, Transaction, params};

use super::HistoryStore;
use crate::domain::{HistoryEntry, Run, RunHistory, RunSummary};
use crate::error::{Result, WorkflowError};
use crate::id::entry_id;

/// rusqlite's Connection is not Sync, so it sits behind a Mutex.
pub struct SqliteHistoryStore {
    db: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteHistoryStore").finish_non_exhaustive()
    }
}

impl SqliteHistoryStore {
    /// Open or create a database file, creating parent directories
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)
            .map_err(|e| WorkflowError::Storage(format!("Failed to open {}: {}", path.display(), e)))?;
        Self::init(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS run_snapshots (
                run_id TEXT NOT NULL REFERENCES runs(id),
                version INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                json_data TEXT NOT NULL,
                PRIMARY KEY (run_id, version)
            );

            CREATE TABLE IF NOT EXISTS history_entries (
                run_id TEXT NOT NULL REFERENCES runs(id),
                seq INTEGER NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                json_data TEXT NOT NULL,
                PRIMARY KEY (run_id, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_runs_created ON runs(created_at);
            "#,
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| WorkflowError::Storage(format!("lock poisoned: {}", e)))
    }

    fn insert_snapshot(tx: &Transaction<'_>, run: &Run) -> Result<()> {
        let json = serde_json::to_string(run)?;
        tx.execute(
            r#"
            INSERT INTO run_snapshots (run_id, version, updated_at, json_data)
            VALUES (?1, (SELECT COALESCE(MAX(version), 0) + 1 FROM run_snapshots WHERE run_id = ?1), ?2, ?3)
            "#,
            params![run.id, run.updated_at, json],
        )?;
        Ok(())
    }

    fn latest_snapshot(db: &Connection, run_id: &str) -> Result<Option<Run>> {
        let json: Option<String> = db
            .query_row(
                "SELECT json_data FROM run_snapshots WHERE run_id = ?1 ORDER BY version DESC LIMIT 1",
                [run_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(WorkflowError::from))
            .transpose()
    }

    fn summaries(db: &Connection, sql: &str, args: &[i64]) -> Result<Vec<RunSummary>> {
        let mut stmt = db.prepare(sql)?;
        let ids = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(run) = Self::latest_snapshot(db, &id)? {
                summaries.push(RunSummary::from(&run));
            }
        }
        Ok(summaries)
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn create_run(&self, run: &Run) -> Result<bool> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO runs (id, created_at) VALUES (?1, ?2)",
            params![run.id, run.created_at],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        Self::insert_snapshot(&tx, run)?;
        tx.commit()?;
        Ok(true)
    }

    fn save_run(&self, run: &Run) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let exists: Option<String> = tx
            .query_row("SELECT id FROM runs WHERE id = ?1", [&run.id], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(WorkflowError::RunNotFound(run.id.clone()));
        }
        Self::insert_snapshot(&tx, run)?;
        tx.commit()?;
        Ok(())
    }

    fn append(&self, mut entry: HistoryEntry) -> Result<HistoryEntry> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let exists: Option<String> = tx
            .query_row("SELECT id FROM runs WHERE id = ?1", [&entry.run_id], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(WorkflowError::RunNotFound(entry.run_id.clone()));
        }

        let last: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM history_entries WHERE run_id = ?1",
            [&entry.run_id],
            |row| row.get(0),
        )?;
        entry.seq = last as u64 + 1;
        entry.id = entry_id(&entry.run_id, entry.seq);

        tx.execute(
            r#"
            INSERT INTO history_entries (run_id, seq, stage, status, timestamp, json_data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                entry.run_id,
                entry.seq as i64,
                entry.stage.as_str(),
                entry.status.as_str(),
                entry.timestamp,
                serde_json::to_string(&entry)?,
            ],
        )?;
        tx.commit()?;
        Ok(entry)
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunHistory>> {
        let db = self.conn()?;
        let Some(run) = Self::latest_snapshot(&db, run_id)? else {
            return Ok(None);
        };

        let mut stmt = db.prepare("SELECT json_data FROM history_entries WHERE run_id = ?1 ORDER BY seq")?;
        let rows = stmt.query_map([run_id], |row| row.get::<_, String>(0))?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(serde_json::from_str(&row?)?);
        }
        Ok(Some(RunHistory { run, entries }))
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let db = self.conn()?;
        Self::summaries(
            &db,
            "SELECT id FROM runs ORDER BY created_at DESC, id DESC LIMIT ?1",
            &[limit as i64],
        )
    }

    fn list_between(&self, from_ms: i64, to_ms: i64) -> Result<Vec<RunSummary>> {
        let db = self.conn()?;
        Self::summaries(
            &db,
            "SELECT id FROM runs WHERE created_at >= ?1 AND created_at < ?2 ORDER BY created_at, id",
            &[from_ms, to_ms],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntryStatus, RunOptions, RunState, StageName};
    use serde_json::json;
    use tempfile::TempDir;

    fn run(id: &str, created_at: i64) -> Run {
        let mut run = Run::new(id, RunOptions::default());
        run.created_at = created_at;
        run
    }

    #[test]
    fn test_create_run_once() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        assert!(store.create_run(&run("run-1", 1)).unwrap());
        assert!(!store.create_run(&run("run-1", 2)).unwrap());
        assert_eq!(store.get_run("run-1").unwrap().unwrap().run.created_at, 1);
    }

    #[test]
    fn test_entries_roundtrip_in_order() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        store.create_run(&run("run-1", 1)).unwrap();
        store
            .append(HistoryEntry::retrying("run-1", StageName::Publishing, 1, "503"))
            .unwrap();
        let ok = store
            .append(
                HistoryEntry::ok("run-1", StageName::Publishing)
                    .with_attempt(2)
                    .with_fingerprint("abc")
                    .with_result(json!({ "post_id": "post-1" })),
            )
            .unwrap();
        assert_eq!(ok.seq, 2);

        let history = store.get_run("run-1").unwrap().unwrap();
        assert_eq!(history.entries.len(), 2);
        assert_eq!(history.entries[0].status, EntryStatus::Retrying);
        assert_eq!(history.entries[1], ok);
        assert_eq!(
            history.latest_ok(StageName::Publishing).unwrap().result_str("post_id"),
            Some("post-1")
        );
    }

    #[test]
    fn test_append_and_save_require_run() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        assert!(matches!(
            store.append(HistoryEntry::ok("ghost", StageName::Created)),
            Err(WorkflowError::RunNotFound(_))
        ));
        assert!(matches!(store.save_run(&run("ghost", 1)), Err(WorkflowError::RunNotFound(_))));
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("history.db");

        {
            let store = SqliteHistoryStore::open(&path).unwrap();
            let mut r = run("run-1", 1);
            store.create_run(&r).unwrap();
            r.transition(RunState::Completed);
            r.post_id = Some("post-9".to_string());
            store.save_run(&r).unwrap();
            store.append(HistoryEntry::ok("run-1", StageName::Created)).unwrap();
        }

        let store = SqliteHistoryStore::open(&path).unwrap();
        let history = store.get_run("run-1").unwrap().unwrap();
        assert_eq!(history.run.state, RunState::Completed);
        assert_eq!(history.run.post_id.as_deref(), Some("post-9"));
        assert_eq!(history.entries.len(), 1);

        let next = store.append(HistoryEntry::ok("run-1", StageName::Engaging)).unwrap();
        assert_eq!(next.seq, 2);
    }

    #[test]
    fn test_listing() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        for (id, ts) in [("a", 100), ("b", 300), ("c", 200)] {
            store.create_run(&run(id, ts)).unwrap();
        }
        let recent: Vec<String> = store.list_recent(2).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(recent, vec!["b", "c"]);

        let between: Vec<String> = store
            .list_between(150, 301)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(between, vec!["c", "b"]);
    }

    #[test]
    fn test_concurrent_appends_number_each_run_without_gaps() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(SqliteHistoryStore::open(dir.path().join("history.db")).unwrap());
        store.create_run(&run("run-1", 1)).unwrap();
        store.create_run(&run("run-2", 2)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                let run_id = if i % 2 == 0 { "run-1" } else { "run-2" };
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        store.append(HistoryEntry::ok(run_id, StageName::Engaging)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for run_id in ["run-1", "run-2"] {
            let history = store.get_run(run_id).unwrap().unwrap();
            let seqs: Vec<u64> = history.entries.iter().map(|e| e.seq).collect();
            assert_eq!(seqs, (1..=100).collect::<Vec<u64>>());
        }
    }
}
