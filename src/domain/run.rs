//! Run record and related types
//!
//! A Run is one end-to-end workflow instance. Its identifier doubles as the
//! idempotency key for every irreversible action taken on its behalf.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::content::GeneratedContent;
use super::engagement::UnitOutcome;
use crate::id::now_ms;

/// LinkedIn-side draft identifier
pub type DraftId = String;

/// LinkedIn-side published post identifier
pub type PostId = String;

/// The kinds of source the pipeline can read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    AppleNotes,
    GoogleDocs,
    PlainText,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::AppleNotes => "apple-notes",
            SourceKind::GoogleDocs => "google-docs",
            SourceKind::PlainText => "plain-text",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to read source text from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SourceDescriptor {
    /// A note in Apple Notes, looked up by title
    AppleNotes { note_title: String },
    /// A Google Doc, by URL or bare document id
    GoogleDocs { locator: String },
    /// Raw text supplied inline
    PlainText { text: String },
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::AppleNotes { .. } => SourceKind::AppleNotes,
            SourceDescriptor::GoogleDocs { .. } => SourceKind::GoogleDocs,
            SourceDescriptor::PlainText { .. } => SourceKind::PlainText,
        }
    }

    /// Short human-readable locator, never the full inline text
    pub fn describe(&self) -> String {
        match self {
            SourceDescriptor::AppleNotes { note_title } => format!("note \"{}\"", note_title),
            SourceDescriptor::GoogleDocs { locator } => format!("doc {}", locator),
            SourceDescriptor::PlainText { text } => format!("{} chars of text", text.chars().count()),
        }
    }
}

/// Orchestrator state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    ReadingSource,
    GeneratingContent,
    GeneratingImage,
    Drafting,
    Publishing,
    Engaging,
    Completed,
    Failed,
    PartiallyFailed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Created => "created",
            RunState::ReadingSource => "reading_source",
            RunState::GeneratingContent => "generating_content",
            RunState::GeneratingImage => "generating_image",
            RunState::Drafting => "drafting",
            RunState::Publishing => "publishing",
            RunState::Engaging => "engaging",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::PartiallyFailed => "partially_failed",
        }
    }

    /// Failed is absorbing; nothing leaves it.
    pub fn is_absorbing(&self) -> bool {
        matches!(self, RunState::Failed)
    }

    /// The post exists: only engagement may follow.
    pub fn is_published(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::PartiallyFailed | RunState::Engaging
        )
    }

    /// Status a run carries while sitting in this state
    pub fn status(&self) -> RunStatus {
        match self {
            RunState::Created => RunStatus::Pending,
            RunState::Completed => RunStatus::Succeeded,
            RunState::Failed => RunStatus::Failed,
            RunState::PartiallyFailed => RunStatus::PartiallyFailed,
            _ => RunStatus::Running,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    PartiallyFailed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::PartiallyFailed => "partially-failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if no further core stage will execute
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::PartiallyFailed | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run choices fixed at creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Produce an image for the post
    pub generate_image: bool,
    /// Reply to comments / message likers after publishing
    pub auto_engage: bool,
}

/// The central Run record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    //=== Identity ===
    /// Idempotency key, client- or server-generated
    pub id: String,

    pub options: RunOptions,

    //=== Lifecycle ===
    pub state: RunState,
    pub status: RunStatus,

    //=== Stage results ===
    pub source_kind: Option<SourceKind>,
    pub source_text: Option<String>,

    /// All generated content, oldest first. Later revisions supersede earlier ones.
    pub contents: Vec<GeneratedContent>,

    pub draft_id: Option<DraftId>,
    pub post_id: Option<PostId>,

    /// Engagement unit results, appended across engage calls
    pub engagement: Vec<UnitOutcome>,

    /// Detail of the failure that ended the run, if any
    pub last_error: Option<String>,

    //=== Timestamps ===
    pub created_at: i64,
    pub updated_at: i64,
}

impl Run {
    pub fn new(id: impl Into<String>, options: RunOptions) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            options,
            state: RunState::Created,
            status: RunStatus::Pending,
            source_kind: None,
            source_text: None,
            contents: Vec::new(),
            draft_id: None,
            post_id: None,
            engagement: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new state, deriving status from it
    pub fn transition(&mut self, state: RunState) {
        self.state = state;
        self.status = state.status();
        self.touch();
    }

    /// Move to Failed and remember why
    pub fn fail(&mut self, detail: impl Into<String>) {
        self.last_error = Some(detail.into());
        self.transition(RunState::Failed);
    }

    /// Mark cancelled; the state is left where the run stopped
    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
        self.status = RunStatus::Cancelled;
        self.touch();
    }

    /// Latest content of any kind
    pub fn current_content(&self) -> Option<&GeneratedContent> {
        self.contents.last()
    }

    /// Revision number the next content record will carry
    pub fn next_revision(&self) -> u32 {
        self.contents.len() as u32 + 1
    }

    /// Update the timestamp
    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::{ContentKind, GeneratedText};

    #[test]
    fn test_new_run_is_pending() {
        let run = Run::new("run-1", RunOptions::default());
        assert_eq!(run.state, RunState::Created);
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.contents.is_empty());
        assert!(run.draft_id.is_none());
        assert!(run.post_id.is_none());
    }

    #[test]
    fn test_transition_derives_status() {
        let mut run = Run::new("run-1", RunOptions::default());
        run.transition(RunState::ReadingSource);
        assert_eq!(run.status, RunStatus::Running);
        run.transition(RunState::Completed);
        assert_eq!(run.status, RunStatus::Succeeded);
        run.transition(RunState::PartiallyFailed);
        assert_eq!(run.status, RunStatus::PartiallyFailed);
    }

    #[test]
    fn test_fail_records_detail() {
        let mut run = Run::new("run-1", RunOptions::default());
        run.transition(RunState::ReadingSource);
        run.fail("note missing");
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.last_error.as_deref(), Some("note missing"));
    }

    #[test]
    fn test_cancel_keeps_state() {
        let mut run = Run::new("run-1", RunOptions::default());
        run.transition(RunState::GeneratingContent);
        run.cancel("user stop");
        assert_eq!(run.state, RunState::GeneratingContent);
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.status.is_terminal());
    }

    #[test]
    fn test_current_content_is_newest_revision() {
        let mut run = Run::new("run-1", RunOptions::default());
        let text = |t: &str| GeneratedText {
            text: t.to_string(),
            hashtags: vec![],
            image_prompt: None,
        };
        run.contents
            .push(GeneratedContent::new("run-1", 1, ContentKind::Post, text("first")));
        run.contents
            .push(GeneratedContent::new("run-1", 2, ContentKind::Comment, text("reply")));
        run.contents
            .push(GeneratedContent::new("run-1", 3, ContentKind::Post, text("second")));

        assert_eq!(run.current_content().unwrap().text, "second");
        assert_eq!(run.next_revision(), 4);
    }

    #[test]
    fn test_state_flags() {
        assert!(RunState::Failed.is_absorbing());
        assert!(!RunState::PartiallyFailed.is_absorbing());
        assert!(RunState::Completed.is_published());
        assert!(!RunState::Drafting.is_published());
    }

    #[test]
    fn test_source_descriptor_serialization() {
        let desc = SourceDescriptor::PlainText {
            text: "Launch announcement".to_string(),
        };
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["kind"], "plain-text");
        assert_eq!(json["text"], "Launch announcement");
        assert_eq!(desc.kind(), SourceKind::PlainText);
        assert_eq!(desc.describe(), "19 chars of text");
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&RunStatus::PartiallyFailed).unwrap(),
            "\"partially-failed\""
        );
        assert_eq!(
            serde_json::to_string(&RunState::ReadingSource).unwrap(),
            "\"reading_source\""
        );
    }

    #[test]
    fn test_run_serialization_roundtrip() {
        let mut run = Run::new("run-1", RunOptions { generate_image: true, auto_engage: false });
        run.transition(RunState::Drafting);
        run.draft_id = Some("draft-9".to_string());
        let json = serde_json::to_string(&run).unwrap();
        let parsed: Run = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, run);
    }
}
