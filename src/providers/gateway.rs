//! HTTP engagement gateway.
//!
//! Talks to a LinkedIn-facing service over JSON. Side-effecting calls send an
//! `Idempotency-Key` header derived from the run id; a 409 carrying the
//! existing resource id is reported as `GatewayOutcome::AlreadyDone`.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::http::{classify_status, classify_transport, error_body, retry_after};
use super::{EngagementGateway, GatewayOutcome, ProviderError};
use crate::domain::{Comment, DraftId, GeneratedContent, Liker, PostId};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl HttpGatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

pub struct HttpEngagementGateway {
    client: Client,
    config: HttpGatewayConfig,
}

impl HttpEngagementGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Invalid(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a side-effecting request and map 2xx / 409 onto an outcome
    async fn perform(&self, request: RequestBuilder, key: &str) -> Result<GatewayOutcome<Option<String>>, ProviderError> {
        let response = self
            .authorize(request)
            .header(IDEMPOTENCY_HEADER, key)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            debug!("Gateway reports {} already performed", key);
            let id = response.json::<IdResponse>().await.ok().map(|r| r.id);
            return Ok(GatewayOutcome::AlreadyDone(id));
        }
        if !status.is_success() {
            let wait = retry_after(response.headers());
            let body = error_body(response).await;
            return Err(classify_status(status, wait, &body));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(GatewayOutcome::Performed(None));
        }
        match response.json::<IdResponse>().await {
            Ok(body) => Ok(GatewayOutcome::Performed(Some(body.id))),
            Err(e) => {
                debug!("Gateway body for {} unreadable: {}", key, e);
                Ok(GatewayOutcome::Performed(None))
            }
        }
    }

    async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ProviderError> {
        let response = self
            .authorize(self.client.get(self.url(path)))
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let wait = retry_after(response.headers());
            let body = error_body(response).await;
            return Err(classify_status(status, wait, &body));
        }
        let list: ListResponse<T> = response.json().await.map_err(|e| classify_transport(&e))?;
        Ok(list.items)
    }
}

/// Require an id on a create-style outcome.
///
/// A missing id is transient: the retry carries the same idempotency key,
/// so the gateway answers 409 with the id of the action already taken.
fn require_id(outcome: GatewayOutcome<Option<String>>, what: &str) -> Result<GatewayOutcome<String>, ProviderError> {
    let missing = || ProviderError::IncompleteResponse(format!("Gateway response has no {} id", what));
    match outcome {
        GatewayOutcome::Performed(id) => id.map(GatewayOutcome::Performed).ok_or_else(missing),
        GatewayOutcome::AlreadyDone(id) => id.map(GatewayOutcome::AlreadyDone).ok_or_else(missing),
    }
}

fn discard_id(outcome: GatewayOutcome<Option<String>>) -> GatewayOutcome<()> {
    match outcome {
        GatewayOutcome::Performed(_) => GatewayOutcome::Performed(()),
        GatewayOutcome::AlreadyDone(_) => GatewayOutcome::AlreadyDone(()),
    }
}

#[async_trait]
impl EngagementGateway for HttpEngagementGateway {
    async fn create_draft(
        &self,
        run_id: &str,
        content: &GeneratedContent,
    ) -> Result<GatewayOutcome<DraftId>, ProviderError> {
        let body = json!({
            "run_id": run_id,
            "text": content.text,
            "hashtags": content.hashtags,
            "image_url": content.image.as_ref().map(|i| i.url.clone()),
        });
        let outcome = self
            .perform(self.client.post(self.url("drafts")).json(&body), run_id)
            .await?;
        require_id(outcome, "draft")
    }

    async fn publish(&self, run_id: &str, draft_id: &str) -> Result<GatewayOutcome<PostId>, ProviderError> {
        let request = self.client.post(self.url(&format!("drafts/{}/publish", draft_id)));
        let outcome = self.perform(request, &format!("{}:publish", run_id)).await?;
        require_id(outcome, "post")
    }

    async fn list_comments(&self, _run_id: &str, post_id: &str) -> Result<Vec<Comment>, ProviderError> {
        self.list(&format!("posts/{}/comments", post_id)).await
    }

    async fn reply(
        &self,
        run_id: &str,
        post_id: &str,
        comment_id: &str,
        text: &str,
    ) -> Result<GatewayOutcome<()>, ProviderError> {
        let request = self
            .client
            .post(self.url(&format!("posts/{}/comments/{}/replies", post_id, comment_id)))
            .json(&json!({ "text": text }));
        let outcome = self
            .perform(request, &format!("{}:comment:{}", run_id, comment_id))
            .await?;
        Ok(discard_id(outcome))
    }

    async fn list_likers(&self, _run_id: &str, post_id: &str) -> Result<Vec<Liker>, ProviderError> {
        self.list(&format!("posts/{}/likers", post_id)).await
    }

    async fn message(&self, run_id: &str, liker_id: &str, text: &str) -> Result<GatewayOutcome<()>, ProviderError> {
        let request = self
            .client
            .post(self.url("messages"))
            .json(&json!({ "recipient_id": liker_id, "text": text }));
        let outcome = self
            .perform(request, &format!("{}:liker:{}", run_id, liker_id))
            .await?;
        Ok(discard_id(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_id() {
        let ok = require_id(GatewayOutcome::Performed(Some("d-1".to_string())), "draft").unwrap();
        assert_eq!(ok, GatewayOutcome::Performed("d-1".to_string()));

        let dup = require_id(GatewayOutcome::AlreadyDone(Some("d-1".to_string())), "draft").unwrap();
        assert!(dup.is_duplicate());

    }

    #[test]
    fn test_missing_id_is_transient() {
        let err = require_id(GatewayOutcome::Performed(None), "post").unwrap_err();
        assert!(matches!(err, ProviderError::IncompleteResponse(_)));
        assert!(err.is_retryable());

        let err = require_id(GatewayOutcome::AlreadyDone(None), "draft").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_discard_id_keeps_duplicate_flag() {
        assert!(discard_id(GatewayOutcome::AlreadyDone(None)).is_duplicate());
        assert!(!discard_id(GatewayOutcome::Performed(Some("x".to_string()))).is_duplicate());
    }

    #[test]
    fn test_url_joining() {
        let gateway = HttpEngagementGateway::new(HttpGatewayConfig::new("http://localhost:8080/")).unwrap();
        assert_eq!(gateway.url("drafts"), "http://localhost:8080/drafts");
    }

    #[test]
    fn test_list_response_defaults_empty() {
        let parsed: ListResponse<Comment> = serde_json::from_str("{}").unwrap();
        assert!(parsed.items.is_empty());
    }

    /// Serve one canned HTTP response per accepted connection, in order
    async fn scripted_gateway(responses: Vec<(u16, &'static str)>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    request.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&request).to_string();
                    if let Some(end) = text.find("\r\n\r\n") {
                        let length = text
                            .lines()
                            .find_map(|l| {
                                let lower = l.to_ascii_lowercase();
                                let value = lower.strip_prefix("content-length:")?;
                                value.trim().parse::<usize>().ok()
                            })
                            .unwrap_or(0);
                        if request.len() >= end + 4 + length {
                            break;
                        }
                    }
                    if n == 0 {
                        break;
                    }
                }
                let reply = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        format!("http://{}", addr)
    }

    fn content() -> GeneratedContent {
        GeneratedContent {
            run_id: "run-1".to_string(),
            revision: 1,
            kind: crate::domain::ContentKind::Post,
            text: "Launch".to_string(),
            hashtags: vec![],
            image_prompt: None,
            image: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_unreadable_create_body_recovers_id_on_retry() {
        let base = scripted_gateway(vec![(201, "<html>ok</html>"), (409, r#"{"id":"d-7"}"#)]).await;
        let gateway = HttpEngagementGateway::new(HttpGatewayConfig::new(base)).unwrap();

        let err = gateway.create_draft("run-1", &content()).await.unwrap_err();
        assert!(err.is_retryable());

        let outcome = gateway.create_draft("run-1", &content()).await.unwrap();
        assert_eq!(outcome, GatewayOutcome::AlreadyDone("d-7".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_transient() {
        let mut config = HttpGatewayConfig::new("http://127.0.0.1:9");
        config.timeout = Duration::from_secs(2);
        let gateway = HttpEngagementGateway::new(config).unwrap();
        let err = gateway.list_comments("run-1", "p-1").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
