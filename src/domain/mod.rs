//! Domain types for linkflow
//!
//! This module contains all core domain types:
//! - Run: one orchestrated execution of the content pipeline
//! - GeneratedContent: immutable generator output, superseded on regeneration
//! - Comment / Liker / UnitOutcome: engagement targets and their results
//! - HistoryEntry: append-only audit record of every stage attempt

pub mod content;
pub mod engagement;
pub mod history;
pub mod run;

pub use content::{ContentKind, GeneratedContent, GeneratedText, ImageRef, StyleHints, preview};
pub use engagement::{Comment, EngagementReport, EngagementTarget, Liker, UnitKind, UnitOutcome, UnitStatus};
pub use history::{EntryStatus, HistoryEntry, RunHistory, RunSummary, StageName};
pub use run::{DraftId, PostId, Run, RunOptions, RunState, RunStatus, SourceDescriptor, SourceKind};
