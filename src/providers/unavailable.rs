//! Placeholder for a capability with no credentials configured.
//!
//! Every call fails with a permanent `MissingCredentials` error, so a run that
//! reaches the capability fails immediately with the reason in its history.

use async_trait::async_trait;

use super::{ContentGenerator, EngagementGateway, GatewayOutcome, GenerationRequest, ProviderError};
use crate::domain::{Comment, DraftId, GeneratedContent, GeneratedText, Liker, PostId};

#[derive(Debug, Clone)]
pub struct Unconfigured {
    reason: String,
}

impl Unconfigured {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    fn error(&self) -> ProviderError {
        ProviderError::MissingCredentials(self.reason.clone())
    }
}

#[async_trait]
impl ContentGenerator for Unconfigured {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedText, ProviderError> {
        Err(self.error())
    }
}

#[async_trait]
impl EngagementGateway for Unconfigured {
    async fn create_draft(
        &self,
        _run_id: &str,
        _content: &GeneratedContent,
    ) -> Result<GatewayOutcome<DraftId>, ProviderError> {
        Err(self.error())
    }

    async fn publish(&self, _run_id: &str, _draft_id: &str) -> Result<GatewayOutcome<PostId>, ProviderError> {
        Err(self.error())
    }

    async fn list_comments(&self, _run_id: &str, _post_id: &str) -> Result<Vec<Comment>, ProviderError> {
        Err(self.error())
    }

    async fn reply(
        &self,
        _run_id: &str,
        _post_id: &str,
        _comment_id: &str,
        _text: &str,
    ) -> Result<GatewayOutcome<()>, ProviderError> {
        Err(self.error())
    }

    async fn list_likers(&self, _run_id: &str, _post_id: &str) -> Result<Vec<Liker>, ProviderError> {
        Err(self.error())
    }

    async fn message(&self, _run_id: &str, _liker_id: &str, _text: &str) -> Result<GatewayOutcome<()>, ProviderError> {
        Err(self.error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContentKind, StyleHints};

    #[tokio::test]
    async fn test_every_call_is_permanent_failure() {
        let provider = Unconfigured::new("OPENAI_API_KEY not set");
        let request = GenerationRequest {
            run_id: "run-1".to_string(),
            source_text: "hello".to_string(),
            kind: ContentKind::Post,
            hints: StyleHints::default(),
        };
        let err = provider.generate(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredentials(_)));
        assert!(!err.is_retryable());

        let err = provider.publish("run-1", "draft-1").await.unwrap_err();
        assert_eq!(err, ProviderError::MissingCredentials("OPENAI_API_KEY not set".to_string()));
    }
}
