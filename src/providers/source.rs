//! Source adapters and the per-kind registry.
//!
//! The registry picks the adapter from the descriptor's variant; adapters for
//! kinds that were never registered fail permanently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use super::http::{classify_transport, error_body, retry_after};
use super::{ProviderError, SourceAdapter};
use crate::domain::{SourceDescriptor, SourceKind};

/// Google Docs plain-text export endpoint
const GOOGLE_DOCS_EXPORT_URL: &str = "https://docs.google.com/document/d";

/// Dispatches to one adapter per source kind
#[derive(Default, Clone)]
pub struct SourceRegistry {
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with only the inline plain-text adapter
    pub fn with_plain_text() -> Self {
        Self::new().register(SourceKind::PlainText, Arc::new(PlainTextSource))
    }

    pub fn register(mut self, kind: SourceKind, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub fn supports(&self, kind: SourceKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<SourceKind> {
        let mut kinds: Vec<SourceKind> = self.adapters.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

#[async_trait]
impl SourceAdapter for SourceRegistry {
    async fn read(&self, run_id: &str, descriptor: &SourceDescriptor) -> Result<String, ProviderError> {
        let kind = descriptor.kind();
        let adapter = self
            .adapters
            .get(&kind)
            .ok_or_else(|| ProviderError::Invalid(format!("No adapter configured for {} sources", kind)))?;
        debug!("Run {}: reading {}", run_id, descriptor.describe());
        adapter.read(run_id, descriptor).await
    }
}

/// Inline text, returned as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextSource;

#[async_trait]
impl SourceAdapter for PlainTextSource {
    async fn read(&self, _run_id: &str, descriptor: &SourceDescriptor) -> Result<String, ProviderError> {
        match descriptor {
            SourceDescriptor::PlainText { text } if text.trim().is_empty() => {
                Err(ProviderError::Invalid("Plain text source is empty".to_string()))
            }
            SourceDescriptor::PlainText { text } => Ok(text.clone()),
            other => Err(ProviderError::Invalid(format!(
                "Plain text adapter cannot read {}",
                other.kind()
            ))),
        }
    }
}

/// Reads a note body from Apple Notes through `osascript`
#[derive(Debug, Clone)]
pub struct AppleNotesSource {
    program: String,
}

impl Default for AppleNotesSource {
    fn default() -> Self {
        Self {
            program: "osascript".to_string(),
        }
    }
}

impl AppleNotesSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different interpreter binary
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn script(note_title: &str) -> String {
        let escaped = note_title.replace('\\', "\\\\").replace('"', "\\\"");
        format!(
            "tell application \"Notes\" to get plaintext of note \"{}\"",
            escaped
        )
    }

    fn classify_failure(note_title: &str, stderr: &str) -> ProviderError {
        // AppleScript error -1728: "Can't get note ..."
        if stderr.contains("-1728") || stderr.contains("Can\u{2019}t get") || stderr.contains("Can't get") {
            ProviderError::SourceNotFound(format!("note \"{}\"", note_title))
        } else {
            ProviderError::SourceUnavailable(stderr.trim().to_string())
        }
    }
}

#[async_trait]
impl SourceAdapter for AppleNotesSource {
    async fn read(&self, _run_id: &str, descriptor: &SourceDescriptor) -> Result<String, ProviderError> {
        let SourceDescriptor::AppleNotes { note_title } = descriptor else {
            return Err(ProviderError::Invalid(format!(
                "Apple Notes adapter cannot read {}",
                descriptor.kind()
            )));
        };
        if note_title.trim().is_empty() {
            return Err(ProviderError::Invalid("Note title is required".to_string()));
        }

        let output = tokio::process::Command::new(&self.program)
            .arg("-e")
            .arg(Self::script(note_title))
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ProviderError::Invalid(format!("{} is not available on this host", self.program))
                }
                _ => ProviderError::SourceUnavailable(e.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify_failure(note_title, &stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

/// Reads a Google Doc through the plain-text export endpoint
#[derive(Debug, Clone)]
pub struct GoogleDocsSource {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl GoogleDocsSource {
    pub fn new(access_token: Option<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Invalid(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: GOOGLE_DOCS_EXPORT_URL.to_string(),
            access_token,
        })
    }

    /// Point at a different export host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Extract the document id from a URL, or accept a bare id
    pub fn document_id(locator: &str) -> Option<String> {
        let locator = locator.trim();
        if let Some(rest) = locator.split("/document/d/").nth(1) {
            let id: String = rest.chars().take_while(|c| *c != '/' && *c != '?' && *c != '#').collect();
            return (!id.is_empty()).then_some(id);
        }
        let bare = !locator.is_empty()
            && locator
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        bare.then(|| locator.to_string())
    }
}

#[async_trait]
impl SourceAdapter for GoogleDocsSource {
    async fn read(&self, _run_id: &str, descriptor: &SourceDescriptor) -> Result<String, ProviderError> {
        let SourceDescriptor::GoogleDocs { locator } = descriptor else {
            return Err(ProviderError::Invalid(format!(
                "Google Docs adapter cannot read {}",
                descriptor.kind()
            )));
        };
        let doc_id = Self::document_id(locator)
            .ok_or_else(|| ProviderError::Invalid(format!("Not a Google Docs locator: {}", locator)))?;

        let url = format!("{}/{}/export?format=txt", self.base_url.trim_end_matches('/'), doc_id);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| match classify_transport(&e) {
            ProviderError::Network(msg) => ProviderError::SourceUnavailable(msg),
            other => other,
        })?;

        let status = response.status();
        match status.as_u16() {
            200..=299 => {}
            404 => return Err(ProviderError::SourceNotFound(format!("document {}", doc_id))),
            429 => {
                return Err(ProviderError::RateLimited {
                    retry_after: retry_after(response.headers()),
                });
            }
            _ => {
                let body = error_body(response).await;
                return Err(ProviderError::SourceUnavailable(format!("{}: {}", status, body.trim())));
            }
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::SourceUnavailable(e.to_string()))?;
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_text_returns_text() {
        let desc = SourceDescriptor::PlainText {
            text: "Launch announcement".to_string(),
        };
        let text = PlainTextSource.read("run-1", &desc).await.unwrap();
        assert_eq!(text, "Launch announcement");
    }

    #[tokio::test]
    async fn test_plain_text_empty_is_permanent() {
        let desc = SourceDescriptor::PlainText { text: "   ".to_string() };
        let err = PlainTextSource.read("run-1", &desc).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_registry_dispatches_by_kind() {
        let registry = SourceRegistry::with_plain_text();
        assert!(registry.supports(SourceKind::PlainText));
        assert!(!registry.supports(SourceKind::AppleNotes));

        let desc = SourceDescriptor::PlainText { text: "hello".to_string() };
        assert_eq!(registry.read("run-1", &desc).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_registry_missing_adapter_is_permanent() {
        let registry = SourceRegistry::with_plain_text();
        let desc = SourceDescriptor::AppleNotes {
            note_title: "Ideas".to_string(),
        };
        let err = registry.read("run-1", &desc).await.unwrap_err();
        assert!(matches!(err, ProviderError::Invalid(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_apple_notes_missing_binary_is_permanent() {
        let source = AppleNotesSource::with_program("definitely-not-a-real-osascript");
        let desc = SourceDescriptor::AppleNotes {
            note_title: "Ideas".to_string(),
        };
        let err = source.read("run-1", &desc).await.unwrap_err();
        assert!(matches!(err, ProviderError::Invalid(_)));
    }

    #[test]
    fn test_apple_notes_script_escapes_quotes() {
        let script = AppleNotesSource::script("My \"big\" idea");
        assert!(script.contains("note \"My \\\"big\\\" idea\""));
    }

    #[test]
    fn test_apple_notes_failure_classification() {
        let err = AppleNotesSource::classify_failure(
            "Ideas",
            "execution error: Notes got an error: Can\u{2019}t get note \"Ideas\". (-1728)",
        );
        assert!(matches!(err, ProviderError::SourceNotFound(_)));

        let err = AppleNotesSource::classify_failure("Ideas", "Not authorized to send Apple events (-1743)");
        assert!(matches!(err, ProviderError::SourceUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_google_docs_document_id() {
        assert_eq!(
            GoogleDocsSource::document_id("https://docs.google.com/document/d/abc_123-XYZ/edit?usp=sharing"),
            Some("abc_123-XYZ".to_string())
        );
        assert_eq!(
            GoogleDocsSource::document_id("abc_123-XYZ"),
            Some("abc_123-XYZ".to_string())
        );
        assert_eq!(GoogleDocsSource::document_id("https://example.com/doc"), None);
        assert_eq!(GoogleDocsSource::document_id(""), None);
    }
}
