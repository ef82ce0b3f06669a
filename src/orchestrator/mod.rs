//! Workflow Orchestrator - drives runs through their stages.
//!
//! This module provides:
//! - Orchestrator: stage calls, whole-pipeline runs, cancellation, lookups
//! - Retry policies and the injectable clock
//! - The transition table and payload fingerprints used for replay

pub mod engage;
pub mod engine;
pub mod fingerprint;
pub mod policy;
pub mod transitions;

pub use engage::EngageRequest;
pub use engine::{GenerateRequest, IdSource, Orchestrator, OrchestratorConfig, PipelineRequest, Providers};
pub use fingerprint::fingerprint;
pub use policy::{Attempted, Clock, RecordingClock, RetryPolicy, StagePolicies, TokioClock, retry_with};
