//! Error types for linkflow
//!
//! Centralized error handling using thiserror. Provider-side failures are
//! classified in [`crate::providers::ProviderError`]; this module holds what
//! the orchestrator surfaces to its callers.

use thiserror::Error;

use crate::domain::{RunState, StageName};

/// All error types the orchestrator can surface
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Stage called while the run is not in an allowed prior state.
    /// Signals a client or programming error and is never retried.
    #[error("Invalid transition for run {run_id}: cannot run {stage} from state {state}")]
    InvalidTransition {
        run_id: String,
        stage: StageName,
        state: RunState,
    },

    /// Request payload rejected before any provider was called
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transient provider failure that exhausted the stage's attempt cap
    #[error("Stage {stage} of run {run_id} failed after {attempts} attempts: {detail}")]
    TransientProvider {
        run_id: String,
        stage: StageName,
        attempts: u32,
        detail: String,
    },

    /// Permanent provider failure (never retried)
    #[error("Stage {stage} of run {run_id} failed permanently: {detail}")]
    PermanentProvider {
        run_id: String,
        stage: StageName,
        detail: String,
    },

    /// Run was cancelled before the requested stage could begin
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// Run not found in the history store
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Returns true if this error reflects a stage failure recorded against a run
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            WorkflowError::TransientProvider { .. } | WorkflowError::PermanentProvider { .. }
        )
    }
}

impl From<rusqlite::Error> for WorkflowError {
    fn from(err: rusqlite::Error) -> Self {
        WorkflowError::Storage(err.to_string())
    }
}

/// Result type alias for linkflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_error() {
        let err = WorkflowError::InvalidTransition {
            run_id: "run-1".to_string(),
            stage: StageName::Publishing,
            state: RunState::Created,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for run run-1: cannot run publishing from state created"
        );
    }

    #[test]
    fn test_transient_provider_error() {
        let err = WorkflowError::TransientProvider {
            run_id: "run-1".to_string(),
            stage: StageName::ReadingSource,
            attempts: 3,
            detail: "timed out".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Stage reading_source of run run-1 failed after 3 attempts: timed out"
        );
        assert!(err.is_stage_failure());
    }

    #[test]
    fn test_permanent_provider_error() {
        let err = WorkflowError::PermanentProvider {
            run_id: "run-1".to_string(),
            stage: StageName::GeneratingContent,
            detail: "policy refusal".to_string(),
        };
        assert!(err.to_string().contains("failed permanently"));
        assert!(err.is_stage_failure());
    }

    #[test]
    fn test_not_stage_failures() {
        assert!(!WorkflowError::Cancelled("run-1".to_string()).is_stage_failure());
        assert!(!WorkflowError::RunNotFound("run-1".to_string()).is_stage_failure());
        assert!(!WorkflowError::InvalidRequest("empty".to_string()).is_stage_failure());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: WorkflowError = io_err.into();
        assert!(matches!(err, WorkflowError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: WorkflowError = json_err.into();
        assert!(matches!(err, WorkflowError::Json(_)));
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let err: WorkflowError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, WorkflowError::Storage(_)));
    }
}
