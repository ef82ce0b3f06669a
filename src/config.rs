use eyre::{Context, Result};
use linkflow::OrchestratorConfig;
use linkflow::orchestrator::{RetryPolicy, StagePolicies};
use linkflow::providers::{HttpGatewayConfig, OpenAiConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub storage: StorageConfig,
    pub stages: StagesConfig,
    pub image: ImageConfig,
    pub engagement: EngagementConfig,
    pub openai: OpenAiSettings,
    pub gateway: GatewaySettings,
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub history_db: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_db: data_dir().join("history.db"),
        }
    }
}

/// Overrides for one stage's retry policy; unset fields keep the default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

impl StageSettings {
    fn apply(&self, mut policy: RetryPolicy) -> RetryPolicy {
        if let Some(n) = self.max_attempts {
            policy = policy.with_max_attempts(n);
        }
        if let Some(ms) = self.base_delay_ms {
            policy.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay_ms {
            policy.max_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timeout_ms {
            policy = policy.with_timeout(Duration::from_millis(ms));
        }
        policy
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    pub source: StageSettings,
    pub content: StageSettings,
    pub image: StageSettings,
    pub draft: StageSettings,
    pub publish: StageSettings,
    pub engagement_network: StageSettings,
    pub engagement_generation: StageSettings,
}

impl StagesConfig {
    pub fn policies(&self) -> StagePolicies {
        let defaults = StagePolicies::default();
        StagePolicies {
            source: self.source.apply(defaults.source),
            content: self.content.apply(defaults.content),
            image: self.image.apply(defaults.image),
            draft: self.draft.apply(defaults.draft),
            publish: self.publish.apply(defaults.publish),
            engagement_network: self.engagement_network.apply(defaults.engagement_network),
            engagement_generation: self.engagement_generation.apply(defaults.engagement_generation),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Continue text-only when image generation fails
    pub publish_without_image: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    pub max_concurrency: usize,
    pub max_likers: usize,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            max_likers: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key_env: String,
    pub base_url: Option<String>,
    pub model: String,
    pub image_model: String,
    pub image_size: String,
    pub image_dir: PathBuf,
    pub timeout_ms: u64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            model: "gpt-4".to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
            image_dir: data_dir().join("images"),
            timeout_ms: 120000,
        }
    }
}

impl OpenAiSettings {
    /// Client settings, or None when the key variable is unset
    pub fn client_config(&self) -> Option<OpenAiConfig> {
        let api_key = std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())?;
        let mut config = OpenAiConfig::new(api_key);
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        config.model = self.model.clone();
        config.image_model = self.image_model.clone();
        config.image_size = self.image_size.clone();
        config.image_dir = Some(self.image_dir.clone());
        config.timeout = Duration::from_millis(self.timeout_ms);
        Some(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub base_url: Option<String>,
    pub token_env: String,
    pub timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: None,
            token_env: "LINKEDIN_ACCESS_TOKEN".to_string(),
            timeout_ms: 30000,
        }
    }
}

impl GatewaySettings {
    /// Client settings, or None when no base url is configured
    pub fn client_config(&self) -> Option<HttpGatewayConfig> {
        let base_url = self.base_url.clone()?;
        let mut config = HttpGatewayConfig::new(base_url);
        config.timeout = Duration::from_millis(self.timeout_ms);
        if let Some(token) = std::env::var(&self.token_env).ok().filter(|t| !t.is_empty()) {
            config = config.with_token(token);
        }
        Some(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Environment variable holding a Google OAuth access token
    pub google_token_env: String,
    pub google_timeout_ms: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            google_token_env: "GOOGLE_ACCESS_TOKEN".to_string(),
            google_timeout_ms: 30000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            storage: StorageConfig::default(),
            stages: StagesConfig::default(),
            image: ImageConfig::default(),
            engagement: EngagementConfig::default(),
            openai: OpenAiSettings::default(),
            gateway: GatewaySettings::default(),
            sources: SourcesConfig::default(),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(env!("CARGO_PKG_NAME"))
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            policies: self.stages.policies(),
            publish_without_image: self.image.publish_without_image,
            engagement_concurrency: self.engagement.max_concurrency.max(1),
            max_likers: self.engagement.max_likers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_orchestrator_defaults() {
        let config = Config::default();
        let orch = config.orchestrator_config();
        assert_eq!(orch.policies, StagePolicies::default());
        assert_eq!(orch.engagement_concurrency, 5);
        assert_eq!(orch.max_likers, 10);
        assert!(!orch.publish_without_image);
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "stages:\n  publish:\n    max_attempts: 5\n    base_delay_ms: 100\nimage:\n  publish_without_image: true\nengagement:\n  max_likers: 3"
        )
        .unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        let orch = config.orchestrator_config();
        assert_eq!(orch.policies.publish.max_attempts, 5);
        assert_eq!(orch.policies.publish.base_delay, Duration::from_millis(100));
        assert_eq!(orch.policies.publish.max_delay, Duration::from_secs(8));
        assert_eq!(orch.policies.content.max_attempts, 2);
        assert!(orch.publish_without_image);
        assert_eq!(orch.max_likers, 3);
        assert_eq!(orch.engagement_concurrency, 5);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let settings = StageSettings {
            max_attempts: Some(0),
            ..Default::default()
        };
        assert_eq!(settings.apply(RetryPolicy::network()).max_attempts, 1);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let path = PathBuf::from("/nonexistent/linkflow.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_gateway_requires_base_url() {
        assert!(GatewaySettings::default().client_config().is_none());
        let settings = GatewaySettings {
            base_url: Some("http://localhost:8080".to_string()),
            token_env: "LINKFLOW_TEST_UNSET_TOKEN".to_string(),
            timeout_ms: 1000,
        };
        let config = settings.client_config().unwrap();
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert!(config.token.is_none());
    }
}
