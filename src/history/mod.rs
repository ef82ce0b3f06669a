//! History Store - durable record of runs and their stage entries.
//!
//! Entries are append-only: they are never rewritten or deleted. The run
//! record itself is persisted as a sequence of snapshots; readers see the
//! latest one.

pub mod memory;
pub mod sqlite;

use crate::domain::{HistoryEntry, Run, RunHistory, RunSummary};
use crate::error::Result;

pub use memory::MemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;

/// Persistence interface used by the orchestrator.
///
/// Implementations must be safe to share across tasks. Appends for one run
/// are serialized so sequence numbers are strictly increasing with no gaps.
pub trait HistoryStore: Send + Sync {
    /// Persist a new run. Returns false (and writes nothing) if a run with
    /// this id already exists.
    fn create_run(&self, run: &Run) -> Result<bool>;

    /// Persist the current state of an existing run
    fn save_run(&self, run: &Run) -> Result<()>;

    /// Append an entry, assigning its id and sequence number
    fn append(&self, entry: HistoryEntry) -> Result<HistoryEntry>;

    /// Latest run snapshot plus all entries in sequence order
    fn get_run(&self, run_id: &str) -> Result<Option<RunHistory>>;

    /// Most recently created runs first
    fn list_recent(&self, limit: usize) -> Result<Vec<RunSummary>>;

    /// Runs created in `[from_ms, to_ms)`, oldest first
    fn list_between(&self, from_ms: i64, to_ms: i64) -> Result<Vec<RunSummary>>;
}
