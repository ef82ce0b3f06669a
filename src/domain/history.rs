//! History entry types - the durable audit trail of a run.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::content::preview;
use super::run::{PostId, Run, RunState, RunStatus};
use crate::id::now_ms;

/// Stage names as recorded in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Run record created
    Created,
    ReadingSource,
    GeneratingContent,
    GeneratingImage,
    Drafting,
    Publishing,
    Engaging,
    /// Cancel request recorded against the run
    Cancellation,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Created => "created",
            StageName::ReadingSource => "reading_source",
            StageName::GeneratingContent => "generating_content",
            StageName::GeneratingImage => "generating_image",
            StageName::Drafting => "drafting",
            StageName::Publishing => "publishing",
            StageName::Engaging => "engaging",
            StageName::Cancellation => "cancellation",
        }
    }

    /// The run state a stage call moves the run into while it executes
    pub fn state(&self) -> Option<RunState> {
        match self {
            StageName::ReadingSource => Some(RunState::ReadingSource),
            StageName::GeneratingContent => Some(RunState::GeneratingContent),
            StageName::GeneratingImage => Some(RunState::GeneratingImage),
            StageName::Drafting => Some(RunState::Drafting),
            StageName::Publishing => Some(RunState::Publishing),
            StageName::Engaging => Some(RunState::Engaging),
            StageName::Created | StageName::Cancellation => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(Value::String(s.to_string())).ok()
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Ok,
    Error,
    Retrying,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Ok => "ok",
            EntryStatus::Error => "error",
            EntryStatus::Retrying => "retrying",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Assigned by the store on append
    pub id: String,
    pub run_id: String,
    /// Per-run sequence number, assigned by the store on append (1-based)
    pub seq: u64,
    pub stage: StageName,
    pub status: EntryStatus,
    /// Attempt number within the stage call (1-based, 0 when not applicable)
    pub attempt: u32,
    /// Engagement unit key, for per-target entries
    pub target: Option<String>,
    /// Payload fingerprint of the stage call that produced this entry
    pub fingerprint: Option<String>,
    /// Stage result (draft id, post id, sent text, ...)
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
}

impl HistoryEntry {
    pub fn new(run_id: &str, stage: StageName, status: EntryStatus) -> Self {
        Self {
            id: String::new(),
            run_id: run_id.to_string(),
            seq: 0,
            stage,
            status,
            attempt: 0,
            target: None,
            fingerprint: None,
            result: None,
            error: None,
            timestamp: now_ms(),
        }
    }

    pub fn ok(run_id: &str, stage: StageName) -> Self {
        Self::new(run_id, stage, EntryStatus::Ok)
    }

    pub fn retrying(run_id: &str, stage: StageName, attempt: u32, error: impl Into<String>) -> Self {
        Self::new(run_id, stage, EntryStatus::Retrying)
            .with_attempt(attempt)
            .with_error(error)
    }

    pub fn error(run_id: &str, stage: StageName, attempt: u32, error: impl Into<String>) -> Self {
        Self::new(run_id, stage, EntryStatus::Error)
            .with_attempt(attempt)
            .with_error(error)
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// String field from the result payload
    pub fn result_str(&self, field: &str) -> Option<&str> {
        self.result.as_ref()?.get(field)?.as_str()
    }
}

/// A run plus its ordered entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    pub run: Run,
    pub entries: Vec<HistoryEntry>,
}

impl RunHistory {
    /// Most recent run-level `ok` entry for a stage
    pub fn latest_ok(&self, stage: StageName) -> Option<&HistoryEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.stage == stage && e.status == EntryStatus::Ok && e.target.is_none())
    }

    /// `ok` entry for one engagement unit
    pub fn ok_for_target(&self, stage: StageName, target: &str) -> Option<&HistoryEntry> {
        self.entries.iter().rev().find(|e| {
            e.stage == stage && e.status == EntryStatus::Ok && e.target.as_deref() == Some(target)
        })
    }

    pub fn cancel_request(&self) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.stage == StageName::Cancellation)
    }

    pub fn count(&self, stage: StageName, status: EntryStatus) -> usize {
        self.entries
            .iter()
            .filter(|e| e.stage == stage && e.status == status)
            .count()
    }

    pub fn stages(&self) -> Vec<StageName> {
        self.entries.iter().map(|e| e.stage).collect()
    }
}

/// Row for recent-run listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub state: RunState,
    pub status: RunStatus,
    pub post_id: Option<PostId>,
    /// First 100 characters of the current content
    pub preview: Option<String>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id.clone(),
            state: run.state,
            status: run.status,
            post_id: run.post_id.clone(),
            preview: run.current_content().map(|c| preview(&c.text, 100)),
            last_error: run.last_error.clone(),
            created_at: run.created_at,
            updated_at: run.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::RunOptions;
    use serde_json::json;

    fn history(entries: Vec<HistoryEntry>) -> RunHistory {
        RunHistory {
            run: Run::new("run-1", RunOptions::default()),
            entries,
        }
    }

    #[test]
    fn test_entry_builders() {
        let entry = HistoryEntry::retrying("run-1", StageName::Publishing, 2, "503");
        assert_eq!(entry.status, EntryStatus::Retrying);
        assert_eq!(entry.attempt, 2);
        assert_eq!(entry.error.as_deref(), Some("503"));
        assert!(entry.timestamp > 0);

        let ok = HistoryEntry::ok("run-1", StageName::Drafting).with_result(json!({ "draft_id": "d-1" }));
        assert_eq!(ok.result_str("draft_id"), Some("d-1"));
        assert_eq!(ok.result_str("post_id"), None);
    }

    #[test]
    fn test_latest_ok_ignores_unit_entries() {
        let h = history(vec![
            HistoryEntry::ok("run-1", StageName::Engaging).with_target("comment:1"),
            HistoryEntry::ok("run-1", StageName::Publishing).with_result(json!({ "post_id": "p-1" })),
        ]);
        assert!(h.latest_ok(StageName::Engaging).is_none());
        assert!(h.ok_for_target(StageName::Engaging, "comment:1").is_some());
        assert_eq!(
            h.latest_ok(StageName::Publishing).unwrap().result_str("post_id"),
            Some("p-1")
        );
    }

    #[test]
    fn test_count_by_status() {
        let h = history(vec![
            HistoryEntry::retrying("run-1", StageName::ReadingSource, 1, "timeout"),
            HistoryEntry::retrying("run-1", StageName::ReadingSource, 2, "timeout"),
            HistoryEntry::ok("run-1", StageName::ReadingSource),
        ]);
        assert_eq!(h.count(StageName::ReadingSource, EntryStatus::Retrying), 2);
        assert_eq!(h.count(StageName::ReadingSource, EntryStatus::Ok), 1);
        assert_eq!(h.count(StageName::ReadingSource, EntryStatus::Error), 0);
    }

    #[test]
    fn test_stage_name_roundtrip() {
        assert_eq!(StageName::parse("generating_image"), Some(StageName::GeneratingImage));
        assert_eq!(StageName::parse("nope"), None);
        assert_eq!(StageName::Drafting.state(), Some(RunState::Drafting));
        assert_eq!(StageName::Cancellation.state(), None);
    }

    #[test]
    fn test_summary_preview() {
        let mut run = Run::new("run-1", RunOptions::default());
        run.contents.push(crate::domain::GeneratedContent::new(
            "run-1",
            1,
            crate::domain::ContentKind::Post,
            crate::domain::GeneratedText::plain("x".repeat(150)),
        ));
        let summary = RunSummary::from(&run);
        assert!(summary.preview.unwrap().ends_with("..."));
    }
}
