/*!
 * Tests for application configuration functionality
 */

use anyhow::Result;
use transpub::app_config::{Config, LogLevel};

use crate::common;

fn valid_config() -> Config {
    let mut config = Config::default();
    config.provider.api_key = "key".to_string();
    config.repository.api_token = "token".to_string();
    config
}

/// Test default configuration values
#[test]
fn test_defaultConfig_shouldHaveCorrectDefaults() {
    let config = Config::default();

    assert_eq!(config.source_language, "en-US");
    assert_eq!(config.target_languages, vec!["ar-SA", "fr-FR", "es-ES"]);
    assert_eq!(config.pipeline.concurrent_requests, 4);
    assert_eq!(config.pipeline.retry_count, 3);
    assert_eq!(config.pipeline.rate_limit, Some(60));
    assert_eq!(config.log_level, LogLevel::Info);
    assert!(config.database_path.is_none());
}

/// Test configuration validation
#[test]
fn test_validate_withVariousConfigs_shouldValidateCorrectly() {
    assert!(valid_config().validate().is_ok());

    // Credentials are required
    assert!(Config::default().validate().is_err());

    let mut config = valid_config();
    config.source_language = "1x".to_string();
    assert!(config.validate().is_err());

    let mut config = valid_config();
    config.target_languages = Vec::new();
    assert!(config.validate().is_err());

    let mut config = valid_config();
    config.target_languages = vec!["fr-FR".to_string(), "fr-FR".to_string()];
    assert!(config.validate().is_err());

    let mut config = valid_config();
    config.target_languages = vec!["en-US".to_string()];
    assert!(config.validate().is_err());

    let mut config = valid_config();
    config.target_languages = vec!["fr-FR".to_string(), "sw-KE".to_string()];
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("sw-KE/file"));

    let mut config = valid_config();
    config.repository.endpoint = "not a url".to_string();
    assert!(config.validate().is_err());

    let mut config = valid_config();
    config.pipeline.concurrent_requests = 0;
    assert!(config.validate().is_err());

    let mut config = valid_config();
    config.pipeline.rate_limit = None;
    assert!(config.validate().is_ok());
}

/// Test that a missing file is created with defaults and read back
#[test]
fn test_loadOrCreate_withMissingFile_shouldWriteDefaults() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = temp_dir.path().join("conf.json");

    let (config, created) = Config::load_or_create(&path)?;
    assert!(created);
    assert!(path.exists());

    let (reloaded, created_again) = Config::load_or_create(&path)?;
    assert!(!created_again);
    assert_eq!(reloaded.target_languages, config.target_languages);

    Ok(())
}

/// Test that partial files fall back to defaults field by field
#[test]
fn test_loadOrCreate_withPartialFile_shouldFillDefaults() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(
        temp_dir.path(),
        "conf.json",
        br#"{"target_languages": ["de-DE"], "pipeline": {"retry_count": 5}, "log_level": "debug"}"#,
    )?;

    let (config, created) = Config::load_or_create(&path)?;

    assert!(!created);
    assert_eq!(config.target_languages, vec!["de-DE"]);
    assert_eq!(config.pipeline.retry_count, 5);
    assert_eq!(config.pipeline.concurrent_requests, 4);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.provider.endpoint, "https://www.matecat.com/");

    Ok(())
}
