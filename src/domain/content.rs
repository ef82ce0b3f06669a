//! Generated content types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::id::now_ms;

/// What the content generator is asked to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Post,
    Comment,
    Message,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Post => "post",
            ContentKind::Comment => "comment",
            ContentKind::Message => "message",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-provided hints passed through to the generator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleHints {
    /// Free-form context ("product launch", the post topic, ...)
    pub context: Option<String>,
    /// Desired tone ("warm", "formal", ...)
    pub tone: Option<String>,
    /// Why a message is being sent: "post_like", "comment", "connection"
    pub trigger: Option<String>,
}

impl StyleHints {
    pub fn with_context(context: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
            ..Default::default()
        }
    }

    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }
}

/// A generated or uploaded image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Remote URL returned by the image provider
    pub url: String,
    /// Local copy, when one was downloaded
    pub local_path: Option<PathBuf>,
}

impl ImageRef {
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            local_path: None,
        }
    }
}

/// Raw generator output before it is bound to a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub text: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    /// Description to feed the image generator
    #[serde(default)]
    pub image_prompt: Option<String>,
}

impl GeneratedText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            hashtags: Vec::new(),
            image_prompt: None,
        }
    }
}

/// Immutable content record. Regeneration appends a new revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub run_id: String,
    /// 1-based position in the run's content list
    pub revision: u32,
    pub kind: ContentKind,
    pub text: String,
    pub hashtags: Vec<String>,
    pub image_prompt: Option<String>,
    pub image: Option<ImageRef>,
    pub created_at: i64,
}

impl GeneratedContent {
    pub fn new(run_id: &str, revision: u32, kind: ContentKind, generated: GeneratedText) -> Self {
        Self {
            run_id: run_id.to_string(),
            revision,
            kind,
            text: generated.text,
            hashtags: generated.hashtags,
            image_prompt: generated.image_prompt,
            image: None,
            created_at: now_ms(),
        }
    }

    /// New revision carrying the same text plus an image
    pub fn with_image(&self, revision: u32, image: ImageRef) -> Self {
        Self {
            revision,
            image: Some(image),
            created_at: now_ms(),
            ..self.clone()
        }
    }

    /// Prompt for the image generator: the explicit description, else the text
    pub fn image_prompt_or_text(&self) -> &str {
        self.image_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.text)
    }
}

/// Truncate to `max` characters, appending "..." when cut
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GeneratedContent {
        GeneratedContent::new(
            "run-1",
            1,
            ContentKind::Post,
            GeneratedText {
                text: "We launched!".to_string(),
                hashtags: vec!["Launch".to_string()],
                image_prompt: Some("rocket over city".to_string()),
            },
        )
    }

    #[test]
    fn test_with_image_supersedes() {
        let original = sample();
        let next = original.with_image(2, ImageRef::remote("https://img/1.png"));

        assert_eq!(next.revision, 2);
        assert_eq!(next.text, original.text);
        assert_eq!(next.image.as_ref().unwrap().url, "https://img/1.png");
        assert!(original.image.is_none());
    }

    #[test]
    fn test_image_prompt_falls_back_to_text() {
        let mut content = sample();
        assert_eq!(content.image_prompt_or_text(), "rocket over city");
        content.image_prompt = Some("  ".to_string());
        assert_eq!(content.image_prompt_or_text(), "We launched!");
        content.image_prompt = None;
        assert_eq!(content.image_prompt_or_text(), "We launched!");
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("short", 100), "short");
        let long = "a".repeat(120);
        let p = preview(&long, 100);
        assert_eq!(p.len(), 103);
        assert!(p.ends_with("..."));
    }

    #[test]
    fn test_content_kind_serialization() {
        assert_eq!(serde_json::to_string(&ContentKind::Post).unwrap(), "\"post\"");
        assert_eq!(
            serde_json::from_str::<ContentKind>("\"message\"").unwrap(),
            ContentKind::Message
        );
    }

    #[test]
    fn test_style_hints_builder() {
        let hints = StyleHints::with_context("launch").with_trigger("post_like");
        assert_eq!(hints.context.as_deref(), Some("launch"));
        assert_eq!(hints.trigger.as_deref(), Some("post_like"));
        assert!(hints.tone.is_none());
    }
}
