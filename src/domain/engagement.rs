//! Engagement entities and per-unit outcomes.
//!
//! Each reply or message is an independent unit keyed by (run id, target key).

use serde::{Deserialize, Serialize};

/// A comment on a published post (read-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub text: String,
}

/// Someone who liked a published post (read-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liker {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub profile_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Reply,
    Message,
}

/// One engagement action to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngagementTarget {
    Reply(Comment),
    Message(Liker),
}

impl EngagementTarget {
    /// Dedup key within a run
    pub fn key(&self) -> String {
        match self {
            EngagementTarget::Reply(c) => format!("comment:{}", c.id),
            EngagementTarget::Message(l) => format!("liker:{}", l.id),
        }
    }

    pub fn kind(&self) -> UnitKind {
        match self {
            EngagementTarget::Reply(_) => UnitKind::Reply,
            EngagementTarget::Message(_) => UnitKind::Message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Sent during this call
    Sent,
    /// Already sent earlier (by this run or detected remotely)
    AlreadySent,
    Failed,
}

/// Result of one engagement unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub target: String,
    pub kind: UnitKind,
    pub status: UnitStatus,
    /// Text that was sent
    pub text: Option<String>,
    pub error: Option<String>,
}

impl UnitOutcome {
    pub fn sent(target: &EngagementTarget, text: String) -> Self {
        Self {
            target: target.key(),
            kind: target.kind(),
            status: UnitStatus::Sent,
            text: Some(text),
            error: None,
        }
    }

    pub fn already_sent(target: &EngagementTarget, text: Option<String>) -> Self {
        Self {
            target: target.key(),
            kind: target.kind(),
            status: UnitStatus::AlreadySent,
            text,
            error: None,
        }
    }

    pub fn failed(target: &EngagementTarget, error: impl Into<String>) -> Self {
        Self {
            target: target.key(),
            kind: target.kind(),
            status: UnitStatus::Failed,
            text: None,
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == UnitStatus::Failed
    }
}

/// Per-unit outcome list for one engage call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementReport {
    pub run_id: String,
    pub outcomes: Vec<UnitOutcome>,
    /// Failures listing comments or likers; these are not units
    pub listing_errors: Vec<String>,
}

impl EngagementReport {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            ..Default::default()
        }
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.len() - self.failed_count()
    }

    /// True if any unit or listing failed
    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0 || !self.listing_errors.is_empty()
    }
}
