/*!
 * Clients for the external services the pipeline talks to.
 *
 * This module contains:
 * - `matecat`: translation provider (project submission, status, downloads)
 * - `invenio`: target content repository (draft records, file upload, publish)
 * - `mock`: scripted in-memory implementations of both traits
 *
 * Clients make exactly one HTTP call per method. Retries and the shared
 * call budget are applied by `pipeline::retry`.
 */

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

use crate::errors::ProviderError;

/// A file submitted to the provider for one target language
#[derive(Debug, Clone)]
pub struct ProjectSubmission {
    pub project_name: String,
    pub source_language: String,
    pub target_language: String,
    /// Name the provider will hand back in Content-Disposition
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Identifiers of an accepted provider project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedProject {
    pub project_id: String,
    pub project_pass: String,
}

/// One provider job of a finished project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    pub id: String,
    pub password: String,
}

/// Provider view of a project
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectState {
    /// Still being analysed or translated
    InProgress { status: String },
    /// Translation finished; `langpair` looks like `"en-US|fr-FR"`
    Done { langpair: String, jobs: Vec<JobRef> },
    /// Provider reported a failure
    Failed { reason: String },
}

/// Body and name of a downloaded artifact
#[derive(Debug, Clone)]
pub struct DownloadedArtifact {
    pub url: String,
    /// File name from Content-Disposition, if the server sent one
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// Translation provider API
///
/// Absence of an expected key in a response is reported as
/// `ProviderError::ParseError`, never as a transport failure.
#[async_trait]
pub trait TranslationProvider: Send + Sync + Debug {
    /// Submit one file for translation into one language
    async fn create_project(
        &self,
        submission: &ProjectSubmission,
    ) -> Result<SubmittedProject, ProviderError>;

    /// Query the state of a project
    async fn project_status(
        &self,
        project_id: &str,
        project_pass: &str,
    ) -> Result<ProjectState, ProviderError>;

    /// Resolve one download URL per chunk of a finished job
    async fn job_download_urls(&self, job: &JobRef) -> Result<Vec<String>, ProviderError>;

    /// Download an artifact; non-success status is `ProviderError::ApiError`
    async fn download(&self, url: &str) -> Result<DownloadedArtifact, ProviderError>;
}

/// Draft record created in the target repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftRecord {
    pub id: String,
    pub files_link: String,
    pub publish_link: String,
}

/// Per-file links returned when registering a file key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLinks {
    pub content: String,
    pub commit: String,
}

/// Target content repository API
#[async_trait]
pub trait RecordRepository: Send + Sync + Debug {
    /// Create a draft record from the aggregated payload
    async fn create_record(&self, payload: &Value) -> Result<DraftRecord, ProviderError>;

    /// Register a file key with the draft
    async fn register_file(
        &self,
        draft: &DraftRecord,
        key: &str,
    ) -> Result<FileLinks, ProviderError>;

    /// Upload the binary content of a registered file
    async fn upload_content(&self, links: &FileLinks, data: &[u8]) -> Result<(), ProviderError>;

    /// Finalize an uploaded file
    async fn commit_file(&self, links: &FileLinks) -> Result<(), ProviderError>;

    /// Publish the draft, returning the published record id
    async fn publish(&self, draft: &DraftRecord) -> Result<String, ProviderError>;
}

pub mod invenio;
pub mod matecat;
pub mod mock;
