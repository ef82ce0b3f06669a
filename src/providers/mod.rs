//! Capability interfaces the orchestrator calls through.
//!
//! This module provides:
//! - SourceAdapter / ContentGenerator / ImageGenerator / EngagementGateway traits
//! - ProviderError, the transient vs. permanent failure classification
//! - GatewayOutcome, which reports actions the remote side had already performed
//! - HTTP-backed implementations, scriptable stubs and a placeholder for
//!   capabilities with no credentials

pub mod gateway;
pub mod http;
pub mod mock;
pub mod openai;
pub mod source;
pub mod unavailable;

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{
    Comment, ContentKind, DraftId, GeneratedContent, GeneratedText, ImageRef, Liker, PostId, SourceDescriptor,
    StyleHints,
};

pub use gateway::{HttpEngagementGateway, HttpGatewayConfig};
pub use mock::{GatewayOp, MockGateway, StubContentGenerator, StubImageGenerator, StubSource};
pub use openai::{OpenAiConfig, OpenAiContentGenerator, OpenAiImageGenerator};
pub use source::{AppleNotesSource, GoogleDocsSource, PlainTextSource, SourceRegistry};
pub use unavailable::Unconfigured;

/// Errors reported by external collaborators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Connectivity or auth problem reaching a source
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The note or document does not exist
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// Generator refused (policy refusal, unusable output)
    #[error("Generation rejected: {0}")]
    GenerationRejected(String),

    #[error("Generation failed: {0}")]
    GenerationTransient(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    /// Call succeeded but its response body could not be read
    #[error("Incomplete response: {0}")]
    IncompleteResponse(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Malformed input or unusable response
    #[error("Invalid: {0}")]
    Invalid(String),
}

impl ProviderError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    /// Transient failures are retried up to the stage's attempt cap
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::SourceUnavailable(_) => true,
            ProviderError::GenerationTransient(_) => true,
            ProviderError::RateLimited { .. } => true,
            ProviderError::Timeout(_) => true,
            ProviderError::Network(_) => true,
            ProviderError::IncompleteResponse(_) => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::SourceNotFound(_) => false,
            ProviderError::GenerationRejected(_) => false,
            ProviderError::MissingCredentials(_) => false,
            ProviderError::Invalid(_) => false,
        }
    }

    /// Server-suggested wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Result of a side-effecting gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome<T> {
    /// The action was performed by this call
    Performed(T),
    /// The remote side had already performed it for this idempotency key
    AlreadyDone(T),
}

impl<T> GatewayOutcome<T> {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, GatewayOutcome::AlreadyDone(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            GatewayOutcome::Performed(v) | GatewayOutcome::AlreadyDone(v) => v,
        }
    }
}

/// Input to a content generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub run_id: String,
    pub source_text: String,
    pub kind: ContentKind,
    pub hints: StyleHints,
}

/// Fetches raw text for a source descriptor. No side effects.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn read(&self, run_id: &str, descriptor: &SourceDescriptor) -> Result<String, ProviderError>;
}

/// Produces platform-specific text
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, ProviderError>;
}

/// Produces an image for a post
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, run_id: &str, prompt: &str) -> Result<ImageRef, ProviderError>;
}

/// All LinkedIn-side effects. Every call carries the run id for correlation;
/// side-effecting calls use it as the remote idempotency key.
#[async_trait]
pub trait EngagementGateway: Send + Sync {
    async fn create_draft(
        &self,
        run_id: &str,
        content: &GeneratedContent,
    ) -> Result<GatewayOutcome<DraftId>, ProviderError>;

    async fn publish(&self, run_id: &str, draft_id: &str) -> Result<GatewayOutcome<PostId>, ProviderError>;

    async fn list_comments(&self, run_id: &str, post_id: &str) -> Result<Vec<Comment>, ProviderError>;

    async fn reply(
        &self,
        run_id: &str,
        post_id: &str,
        comment_id: &str,
        text: &str,
    ) -> Result<GatewayOutcome<()>, ProviderError>;

    async fn list_likers(&self, run_id: &str, post_id: &str) -> Result<Vec<Liker>, ProviderError>;

    async fn message(&self, run_id: &str, liker_id: &str, text: &str) -> Result<GatewayOutcome<()>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_is_retryable() {
        assert!(ProviderError::SourceUnavailable("offline".into()).is_retryable());
        assert!(ProviderError::GenerationTransient("overloaded".into()).is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(
            ProviderError::Api {
                status: 503,
                message: "unavailable".into()
            }
            .is_retryable()
        );
        assert!(
            !ProviderError::Api {
                status: 400,
                message: "bad".into()
            }
            .is_retryable()
        );
        assert!(!ProviderError::SourceNotFound("note".into()).is_retryable());
        assert!(!ProviderError::GenerationRejected("policy".into()).is_retryable());
        assert!(!ProviderError::MissingCredentials("OPENAI_API_KEY".into()).is_retryable());
        assert!(!ProviderError::Invalid("empty".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_only_for_rate_limit() {
        let rl = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(rl.is_rate_limit());
        assert_eq!(rl.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(ProviderError::Network("reset".into()).retry_after(), None);
    }

    #[test]
    fn test_gateway_outcome() {
        let done = GatewayOutcome::AlreadyDone("post-1".to_string());
        assert!(done.is_duplicate());
        assert_eq!(done.into_inner(), "post-1");

        let performed = GatewayOutcome::Performed(());
        assert!(!performed.is_duplicate());
    }
}
