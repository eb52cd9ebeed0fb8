use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::{Path, PathBuf};

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Language of the harvested documents (locale tag, e.g. "en-US")
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Languages every document is translated into
    #[serde(default = "default_target_languages")]
    pub target_languages: Vec<String>,

    /// Document store location; the user data directory when unset
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Translation provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Target content repository settings
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Scheduling, retry and polling settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Translation provider configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Base URL of the provider API, with trailing slash
    #[serde(default = "default_provider_endpoint")]
    pub endpoint: String,

    /// API key sent as `x-matecat-key`
    #[serde(default = "String::new")]
    pub api_key: String,

    /// Prefix of submitted project names
    #[serde(default = "default_project_name_prefix")]
    pub project_name_prefix: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_provider_endpoint(),
            api_key: String::new(),
            project_name_prefix: default_project_name_prefix(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Target repository configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RepositoryConfig {
    /// Base URL of the repository API
    #[serde(default = "default_repository_endpoint")]
    pub endpoint: String,

    /// Bearer token for record creation
    #[serde(default = "String::new")]
    pub api_token: String,

    /// Name of the harvested source, used as fallback publisher
    #[serde(default = "default_repository_name")]
    pub name: String,

    /// Accept self-signed certificates (local repository instances)
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_repository_endpoint(),
            api_token: String::new(),
            name: default_repository_name(),
            accept_invalid_certs: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Pipeline scheduling settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Maximum number of jobs worked on at once
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,

    /// Shared call budget in requests per minute across provider and repository
    #[serde(default = "default_rate_limit")]
    pub rate_limit: Option<u32>,

    /// Retry count for failed requests
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Backoff multiplier for retries (in milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Delay between poll passes in `run`
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Age after which an unfinished job is abandoned
    #[serde(default = "default_max_poll_duration_secs")]
    pub max_poll_duration_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrent_requests: default_concurrent_requests(),
            rate_limit: default_rate_limit(),
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_duration_secs: default_max_poll_duration_secs(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_source_language() -> String {
    "en-US".to_string()
}

fn default_target_languages() -> Vec<String> {
    vec!["ar-SA".to_string(), "fr-FR".to_string(), "es-ES".to_string()]
}

fn default_provider_endpoint() -> String {
    "https://www.matecat.com/".to_string()
}

fn default_project_name_prefix() -> String {
    "transpub".to_string()
}

fn default_repository_endpoint() -> String {
    "https://127.0.0.1:5000".to_string()
}

fn default_repository_name() -> String {
    "Unknown repository".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_concurrent_requests() -> usize {
    4
}

fn default_rate_limit() -> Option<u32> {
    Some(60) // 60 requests per minute by default
}

fn default_retry_count() -> u32 {
    3 // Default to 3 retries
}

fn default_retry_backoff_ms() -> u64 {
    1000 // 1 second base backoff time, doubled on each retry
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_max_poll_duration_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Config {
    /// Load the configuration file, creating it with defaults when missing
    pub fn load_or_create(path: &Path) -> Result<(Self, bool)> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to open config file: {}", path.display()))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            return Ok((config, false));
        }

        let config = Config::default();
        let config_json = serde_json::to_string_pretty(&config)
            .context("Failed to serialize default config to JSON")?;
        std::fs::write(path, config_json).with_context(|| {
            format!("Failed to write default config to file: {}", path.display())
        })?;

        Ok((config, true))
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        crate::language_utils::validate_locale(&self.source_language)
            .context("Invalid source language")?;

        if self.target_languages.is_empty() {
            return Err(anyhow!("At least one target language is required"));
        }
        for (i, language) in self.target_languages.iter().enumerate() {
            crate::language_utils::validate_locale(language)
                .with_context(|| format!("Invalid target language #{}", i + 1))?;
            if self.target_languages[..i].contains(language) {
                return Err(anyhow!("Target language '{}' is listed twice", language));
            }
            if crate::language_utils::language_codes_match(language, &self.source_language) {
                return Err(anyhow!(
                    "Target language '{}' equals the source language",
                    language
                ));
            }
        }

        url::Url::parse(&self.provider.endpoint)
            .with_context(|| format!("Invalid provider endpoint: {}", self.provider.endpoint))?;
        url::Url::parse(&self.repository.endpoint).with_context(|| {
            format!("Invalid repository endpoint: {}", self.repository.endpoint)
        })?;

        if self.provider.api_key.is_empty() {
            return Err(anyhow!("Translation provider API key is required"));
        }
        if self.repository.api_token.is_empty() {
            return Err(anyhow!("Repository API token is required"));
        }

        if self.pipeline.concurrent_requests == 0 {
            return Err(anyhow!("pipeline.concurrent_requests must be at least 1"));
        }
        if self.pipeline.rate_limit == Some(0) {
            return Err(anyhow!("pipeline.rate_limit must be positive or null"));
        }

        crate::pipeline::routing::RouteTable::standard().validate(&self.target_languages)?;

        Ok(())
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: default_source_language(),
            target_languages: default_target_languages(),
            database_path: None,
            provider: ProviderConfig::default(),
            repository: RepositoryConfig::default(),
            pipeline: PipelineConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}
