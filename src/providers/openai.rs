//! OpenAI-backed content and image generation.
//!
//! Post generation asks for a JSON payload (`content`, `hashtags`,
//! `image_description`) and falls back to extracting hashtags from plain text
//! when the model ignores the format.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use super::http::{classify_status, classify_transport, error_body, retry_after};
use super::{ContentGenerator, GenerationRequest, ImageGenerator, ProviderError};
use crate::domain::{ContentKind, GeneratedText, ImageRef};

/// OpenAI API base URL
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Default chat model
const DEFAULT_MODEL: &str = "gpt-4";

/// Default image model
const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

/// Used when a post arrives without any hashtags
const DEFAULT_HASHTAGS: [&str; 3] = ["ProfessionalDevelopment", "CareerAdvice", "Leadership"];

const DEFAULT_IMAGE_PROMPT: &str = "Professional LinkedIn post image, business setting, modern design";

const MAX_HASHTAGS: usize = 5;

/// Configuration for the OpenAI clients
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub image_model: String,
    pub image_size: String,
    /// Where downloaded images are saved; None keeps only the remote URL
    pub image_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            image_size: DEFAULT_IMAGE_SIZE.to_string(),
            image_dir: None,
            timeout: Duration::from_secs(120),
        }
    }

    /// Read the API key from an environment variable
    pub fn from_env(env_var: &str) -> Result<Self, ProviderError> {
        let api_key = std::env::var(env_var)
            .map_err(|_| ProviderError::MissingCredentials(format!("{} not set", env_var)))?;
        Ok(Self::new(api_key))
    }

    fn client(&self) -> Result<Client, ProviderError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProviderError::Invalid(format!("Failed to create HTTP client: {}", e)))
    }
}

/// POST a JSON body and return the JSON response, classifying failures
async fn post_json(client: &Client, config: &OpenAiConfig, path: &str, body: &Value) -> Result<Value, ProviderError> {
    let response = client
        .post(format!("{}/{}", config.base_url.trim_end_matches('/'), path))
        .bearer_auth(&config.api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| classify_transport(&e))?;

    let status = response.status();
    if !status.is_success() {
        let wait = retry_after(response.headers());
        let body = error_body(response).await;
        return Err(match classify_status(status, wait, &body) {
            // Content policy refusals come back as 400s
            ProviderError::Api { status: 400, message } if message.contains("content_policy") => {
                ProviderError::GenerationRejected(message)
            }
            ProviderError::Api { status, message } if status >= 500 => {
                ProviderError::GenerationTransient(format!("{}: {}", status, message))
            }
            other => other,
        });
    }

    response.json().await.map_err(|e| classify_transport(&e))
}

/// Chat-completions backed generator
pub struct OpenAiContentGenerator {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiContentGenerator {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: config.client()?,
            config,
        })
    }

    fn build_prompt(request: &GenerationRequest) -> String {
        let context = request
            .hints
            .context
            .as_deref()
            .map(|c| format!("\n\nContext: {}", c))
            .unwrap_or_default();
        let tone = request
            .hints
            .tone
            .as_deref()
            .map(|t| format!("\nTone: {}", t))
            .unwrap_or_default();

        match request.kind {
            ContentKind::Post => format!(
                "Based on the following content, create an engaging LinkedIn post:\n\n{}{}{}\n\n\
                 Return ONLY valid JSON in this exact format:\n\
                 {{\"content\": \"the post content with hashtags\", \"hashtags\": [\"tag1\"], \
                 \"image_description\": \"description for AI image generation\"}}",
                request.source_text, context, tone
            ),
            ContentKind::Comment => format!(
                "Generate a professional, personalized reply to this LinkedIn comment:\n\n\
                 Comment: \"{}\"{}{}",
                request.source_text, context, tone
            ),
            ContentKind::Message => format!(
                "Generate a personalized LinkedIn message ({}).\n\nRecipient context: {}{}{}",
                request.hints.trigger.as_deref().unwrap_or("post_like"),
                request.source_text,
                context,
                tone
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostPayload {
    content: String,
    #[serde(default)]
    hashtags: Vec<String>,
    #[serde(default)]
    image_description: Option<String>,
}

/// Strip a surrounding markdown code fence, if any
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// `#word` tokens in order of appearance, without the `#`
fn extract_hashtags(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter_map(|token| token.strip_prefix('#'))
        .map(|tag| {
            tag.chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|tag| !tag.is_empty())
        .take(MAX_HASHTAGS)
        .collect()
}

/// Turn a raw post completion into text, hashtags and an image prompt
pub fn parse_post_completion(raw: &str) -> GeneratedText {
    let body = strip_code_fence(raw);
    match serde_json::from_str::<PostPayload>(body) {
        Ok(payload) => GeneratedText {
            text: payload.content,
            hashtags: payload
                .hashtags
                .into_iter()
                .map(|t| t.trim_start_matches('#').to_string())
                .collect(),
            image_prompt: payload.image_description.filter(|d| !d.trim().is_empty()),
        },
        Err(e) => {
            debug!("Post completion is not JSON ({}), using raw text", e);
            let mut hashtags = extract_hashtags(body);
            if hashtags.is_empty() {
                hashtags = DEFAULT_HASHTAGS.iter().map(|t| t.to_string()).collect();
            }
            GeneratedText {
                text: body.to_string(),
                hashtags,
                image_prompt: Some(DEFAULT_IMAGE_PROMPT.to_string()),
            }
        }
    }
}

#[async_trait]
impl ContentGenerator for OpenAiContentGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, ProviderError> {
        let body = json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": Self::build_prompt(request) }],
            "temperature": if request.kind == ContentKind::Post { 0.7 } else { 0.8 },
        });

        let response = post_json(&self.client, &self.config, "chat/completions", &body).await?;
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProviderError::GenerationRejected("Empty completion".to_string()))?;

        Ok(match request.kind {
            ContentKind::Post => parse_post_completion(content),
            ContentKind::Comment | ContentKind::Message => GeneratedText::plain(content),
        })
    }
}

/// Images-API backed generator
pub struct OpenAiImageGenerator {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiImageGenerator {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: config.client()?,
            config,
        })
    }

    pub fn enhance_prompt(prompt: &str) -> String {
        format!(
            "Professional LinkedIn post image: {}. Business professional style, clean design, \
             high quality, corporate appropriate, modern aesthetic",
            prompt.trim()
        )
    }

    async fn download(&self, url: &str, run_id: &str) -> Result<Option<PathBuf>, ProviderError> {
        let Some(dir) = &self.config.image_dir else {
            return Ok(None);
        };
        let response = self.client.get(url).send().await.map_err(|e| classify_transport(&e))?;
        if !response.status().is_success() {
            return Err(ProviderError::Network(format!("Image download failed: {}", response.status())));
        }
        let bytes = response.bytes().await.map_err(|e| classify_transport(&e))?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ProviderError::Invalid(format!("Cannot create {}: {}", dir.display(), e)))?;
        let path = dir.join(format!("post_{}.png", run_id));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| ProviderError::Invalid(format!("Cannot write {}: {}", path.display(), e)))?;
        Ok(Some(path))
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, run_id: &str, prompt: &str) -> Result<ImageRef, ProviderError> {
        let body = json!({
            "model": self.config.image_model,
            "prompt": Self::enhance_prompt(prompt),
            "size": self.config.image_size,
            "quality": "standard",
            "n": 1,
        });

        let response = post_json(&self.client, &self.config, "images/generations", &body).await?;
        let url = response["data"][0]["url"]
            .as_str()
            .ok_or_else(|| ProviderError::Invalid("Image response has no url".to_string()))?
            .to_string();

        let local_path = match self.download(&url, run_id).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Run {}: keeping remote image only, download failed: {}", run_id, e);
                None
            }
        };

        Ok(ImageRef { url, local_path })
    }
}
