//! Linkflow - a workflow orchestrator for LinkedIn content.
//!
//! A run reads source text, generates a post (and optionally an image),
//! drafts and publishes it, then optionally replies to comments and messages
//! likers. Every step is recorded in an append-only history and irreversible
//! actions happen at most once per run.

pub mod domain;
pub mod error;
pub mod history;
pub mod id;
pub mod orchestrator;
pub mod providers;

pub use error::{Result, WorkflowError};
pub use orchestrator::{EngageRequest, GenerateRequest, Orchestrator, OrchestratorConfig, PipelineRequest, Providers};
