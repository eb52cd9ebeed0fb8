/*!
 * Common test utilities for the transpub test suite
 */

#![allow(dead_code)]

use anyhow::Result;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use transpub::database::Repository;
use transpub::database::models::{DocumentRecord, NewDocument};
use transpub::pipeline::{PipelineRunner, RetryPolicy, RunnerSettings};
use transpub::providers::mock::{MockRecordRepository, MockTranslationProvider};

/// Route log output through the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &[u8]) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

pub fn person(name: &str) -> Value {
    json!({ "person_or_org": { "family_name": name, "type": "personal" } })
}

/// Document metadata in the shape produced by harvest intake
pub fn sample_metadata(title: &str, creators: &[&str]) -> Value {
    json!({
        "metadata": {
            "creators": creators.iter().map(|name| person(name)).collect::<Vec<_>>(),
            "description": format!("About {}", title),
            "identifiers": [{ "identifier": "https://repo.example/rec", "scheme": "other" }],
            "publication_date": "2021-03-04",
            "publisher": "P1",
            "contributors": [],
            "resource_type": { "id": "other" },
            "rights": [],
            "subjects": [],
            "title": title
        }
    })
}

pub fn languages(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|code| code.to_string()).collect()
}

/// Insert a plain-text document and read it back
pub async fn insert_text_document(
    store: &Repository,
    identifier: &str,
    file_name: &str,
    body: &str,
    metadata: Value,
) -> DocumentRecord {
    let id = store
        .insert_document(&NewDocument {
            identifier: identifier.to_string(),
            file_name: file_name.to_string(),
            file_type: "txt".to_string(),
            file_data: body.as_bytes().to_vec(),
            metadata,
        })
        .await
        .expect("Failed to insert document");

    store
        .get_document(id)
        .await
        .expect("Failed to read document")
        .expect("Document should exist")
}

/// Settings for fast runs: no rate limit, no backoff, no poll delay
pub fn test_settings(target_languages: &[&str]) -> RunnerSettings {
    RunnerSettings {
        source_language: "en-US".to_string(),
        target_languages: languages(target_languages),
        project_name_prefix: "test".to_string(),
        concurrency: 2,
        rate_limit: None,
        retry: RetryPolicy::new(3, 0),
        poll_interval: Duration::ZERO,
        max_poll_duration: Duration::from_secs(3600),
    }
}

/// A runner over mock services plus handles to script them
pub struct TestPipeline {
    pub store: Repository,
    pub provider: MockTranslationProvider,
    pub repository: MockRecordRepository,
    pub runner: PipelineRunner,
}

pub fn test_pipeline(settings: RunnerSettings) -> TestPipeline {
    test_pipeline_with(MockTranslationProvider::new(), settings)
}

pub fn test_pipeline_with(
    provider: MockTranslationProvider,
    settings: RunnerSettings,
) -> TestPipeline {
    init_logging();
    let store = Repository::new_in_memory().expect("Failed to create store");
    let repository = MockRecordRepository::new();
    let runner = PipelineRunner::new(
        store.clone(),
        Arc::new(provider.clone()),
        Arc::new(repository.clone()),
        settings,
    )
    .expect("Failed to build runner");

    TestPipeline {
        store,
        provider,
        repository,
        runner,
    }
}
