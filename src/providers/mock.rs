/*!
 * Mock provider and repository implementations for testing.
 *
 * `MockTranslationProvider` behaves like a translation service that finishes
 * every project on the first status query unless scripted otherwise:
 * - `fail_submissions_for(lang)` - reject project creation for a language
 * - `push_status_errors(n, code)` - the next n status queries answer `code`
 * - `set_outcome(lang, outcome)` - keep a language pending or fail it
 * - `fail_downloads_with(code)` - every download answers `code`
 * - `fail_chunk_downloads_with(chunk, code)` - downloads of one chunk index
 *   answer `code`
 *
 * With `with_chunks_per_job(n)` a translated file is served in n contiguous
 * parts, while metadata is served whole by every chunk.
 *
 * `MockRecordRepository` records every call and can fail at any publish step.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::errors::{ProviderError, PublishStep};
use crate::providers::{
    DownloadedArtifact, DraftRecord, FileLinks, JobRef, ProjectState, ProjectSubmission,
    RecordRepository, SubmittedProject, TranslationProvider,
};

/// Scripted end state of a language's projects
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    /// Finish on the first status query
    Done,
    /// Stay in progress forever
    Pending,
    /// Report a provider-side failure
    Failed(String),
}

#[derive(Debug)]
struct MockProject {
    submission: ProjectSubmission,
    pass: String,
}

#[derive(Debug, Default)]
struct ProviderState {
    projects: HashMap<String, MockProject>,
    submissions: Vec<ProjectSubmission>,
    rejected_languages: Vec<String>,
    outcomes: HashMap<String, MockOutcome>,
    status_errors: VecDeque<u16>,
    status_calls: usize,
    download_calls: usize,
    download_failure: Option<u16>,
    chunk_failure: Option<(usize, u16)>,
    chunks_per_job: usize,
}

/// In-memory translation provider for testing
#[derive(Debug, Clone)]
pub struct MockTranslationProvider {
    state: Arc<Mutex<ProviderState>>,
    /// Produces the translated bytes of a submission
    translator: fn(&ProjectSubmission) -> Vec<u8>,
}

impl Default for MockTranslationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranslationProvider {
    /// Create a provider that finishes every project immediately
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProviderState {
                chunks_per_job: 1,
                ..Default::default()
            })),
            translator: default_translation,
        }
    }

    /// Set a custom translation function
    pub fn with_translator(mut self, translator: fn(&ProjectSubmission) -> Vec<u8>) -> Self {
        self.translator = translator;
        self
    }

    /// Split every job into `chunks` downloadable parts
    pub fn with_chunks_per_job(self, chunks: usize) -> Self {
        self.state.lock().chunks_per_job = chunks.max(1);
        self
    }

    pub fn fail_submissions_for(&self, language: &str) {
        self.state.lock().rejected_languages.push(language.to_string());
    }

    pub fn accept_submissions_for(&self, language: &str) {
        self.state.lock().rejected_languages.retain(|l| l != language);
    }

    pub fn push_status_errors(&self, count: usize, status_code: u16) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.status_errors.push_back(status_code);
        }
    }

    pub fn set_outcome(&self, language: &str, outcome: MockOutcome) {
        self.state.lock().outcomes.insert(language.to_string(), outcome);
    }

    pub fn fail_downloads_with(&self, status_code: Option<u16>) {
        self.state.lock().download_failure = status_code;
    }

    /// Fail downloads of chunk `chunk` of every job, `None` clears it
    pub fn fail_chunk_downloads_with(&self, failure: Option<(usize, u16)>) {
        self.state.lock().chunk_failure = failure;
    }

    /// Number of project status queries received
    pub fn status_calls(&self) -> usize {
        self.state.lock().status_calls
    }

    /// Number of download requests received
    pub fn download_calls(&self) -> usize {
        self.state.lock().download_calls
    }

    /// All accepted submissions, in order
    pub fn submissions(&self) -> Vec<ProjectSubmission> {
        self.state.lock().submissions.clone()
    }

    fn download_url(project_id: &str, chunk: usize) -> String {
        format!("mock://download/{}/{}", project_id, chunk)
    }
}

/// Suffix titles and descriptions of JSON metadata with the target
/// language, prefix any other content with it
pub fn default_translation(submission: &ProjectSubmission) -> Vec<u8> {
    let lang = &submission.target_language;

    if submission.file_name.ends_with(".json") {
        if let Ok(mut value) = serde_json::from_slice::<Value>(&submission.content) {
            let target = match value.get_mut("metadata") {
                Some(inner) if inner.is_object() => inner,
                _ => &mut value,
            };
            for field in ["title", "description"] {
                if let Some(Value::String(text)) = target.get_mut(field) {
                    text.push_str(&format!(" ({})", lang));
                }
            }
            return serde_json::to_vec(&value).unwrap_or_default();
        }
    }

    let mut translated = format!("[{}] ", lang).into_bytes();
    translated.extend_from_slice(&submission.content);
    translated
}

#[async_trait]
impl TranslationProvider for MockTranslationProvider {
    async fn create_project(
        &self,
        submission: &ProjectSubmission,
    ) -> Result<SubmittedProject, ProviderError> {
        let mut state = self.state.lock();

        if state.rejected_languages.contains(&submission.target_language) {
            return Err(ProviderError::ApiError {
                status_code: 400,
                message: format!("Simulated rejection for {}", submission.target_language),
            });
        }

        let n = state.projects.len() + 1;
        let project_id = format!("{}", 1000 + n);
        let pass = format!("pass{}", n);
        state.projects.insert(
            project_id.clone(),
            MockProject {
                submission: submission.clone(),
                pass: pass.clone(),
            },
        );
        state.submissions.push(submission.clone());

        Ok(SubmittedProject {
            project_id,
            project_pass: pass,
        })
    }

    async fn project_status(
        &self,
        project_id: &str,
        project_pass: &str,
    ) -> Result<ProjectState, ProviderError> {
        let mut state = self.state.lock();
        state.status_calls += 1;

        if let Some(status_code) = state.status_errors.pop_front() {
            return Err(ProviderError::ApiError {
                status_code,
                message: "Simulated status failure".to_string(),
            });
        }

        let project = state
            .projects
            .get(project_id)
            .filter(|p| p.pass == project_pass)
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 404,
                message: format!("Unknown project {}", project_id),
            })?;

        let language = project.submission.target_language.clone();
        let langpair = format!("{}|{}", project.submission.source_language, language);
        let job = JobRef {
            id: project_id.to_string(),
            password: project.pass.clone(),
        };

        match state.outcomes.get(&language).cloned().unwrap_or(MockOutcome::Done) {
            MockOutcome::Done => Ok(ProjectState::Done {
                langpair,
                jobs: vec![job],
            }),
            MockOutcome::Pending => Ok(ProjectState::InProgress {
                status: "ANALYZING".to_string(),
            }),
            MockOutcome::Failed(reason) => Ok(ProjectState::Failed { reason }),
        }
    }

    async fn job_download_urls(&self, job: &JobRef) -> Result<Vec<String>, ProviderError> {
        let state = self.state.lock();
        if !state.projects.contains_key(&job.id) {
            return Err(ProviderError::ParseError(format!("missing job {}", job.id)));
        }
        Ok((0..state.chunks_per_job)
            .map(|chunk| Self::download_url(&job.id, chunk))
            .collect())
    }

    async fn download(&self, url: &str) -> Result<DownloadedArtifact, ProviderError> {
        let mut state = self.state.lock();
        state.download_calls += 1;

        if let Some(status_code) = state.download_failure {
            return Err(ProviderError::ApiError {
                status_code,
                message: "Simulated download failure".to_string(),
            });
        }

        let mut segments = url.strip_prefix("mock://download/").unwrap_or_default().split('/');
        let project_id = segments.next().unwrap_or_default();
        let chunk: usize = segments.next().and_then(|c| c.parse().ok()).unwrap_or(0);

        if let Some((failing, status_code)) = state.chunk_failure {
            if failing == chunk {
                return Err(ProviderError::ApiError {
                    status_code,
                    message: format!("Simulated failure of chunk {}", chunk),
                });
            }
        }

        let project = state.projects.get(project_id).ok_or_else(|| ProviderError::ApiError {
            status_code: 404,
            message: format!("No artifact at {}", url),
        })?;

        let translated = (self.translator)(&project.submission);
        let whole = project.submission.file_name.ends_with(".json") || state.chunks_per_job == 1;
        let bytes = if whole {
            translated
        } else {
            let size = translated.len().div_ceil(state.chunks_per_job).max(1);
            translated
                .chunks(size)
                .nth(chunk)
                .map(<[u8]>::to_vec)
                .unwrap_or_default()
        };

        Ok(DownloadedArtifact {
            url: url.to_string(),
            file_name: Some(project.submission.file_name.clone()),
            bytes,
        })
    }
}

/// One call received by the mock repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryCall {
    Create,
    Register(String),
    Upload(String),
    Commit(String),
    Publish(String),
}

#[derive(Debug, Default)]
struct RepositoryState {
    calls: Vec<RepositoryCall>,
    payloads: Vec<Value>,
    uploads: HashMap<String, Vec<u8>>,
    failure: Option<(PublishStep, Option<String>, u16)>,
    records: usize,
}

/// In-memory target repository for testing
#[derive(Debug, Clone, Default)]
pub struct MockRecordRepository {
    state: Arc<Mutex<RepositoryState>>,
}

impl MockRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `step`, for one file key only when `file` is given
    pub fn fail_at(&self, step: PublishStep, file: Option<&str>, status_code: u16) {
        self.state.lock().failure = Some((step, file.map(str::to_string), status_code));
    }

    pub fn clear_failure(&self) {
        self.state.lock().failure = None;
    }

    pub fn calls(&self) -> Vec<RepositoryCall> {
        self.state.lock().calls.clone()
    }

    /// Payloads received by CREATE, in order
    pub fn payloads(&self) -> Vec<Value> {
        self.state.lock().payloads.clone()
    }

    /// Uploaded content by file key
    pub fn uploaded(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().uploads.get(key).cloned()
    }

    pub fn publish_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| matches!(call, RepositoryCall::Publish(_)))
            .count()
    }

    fn check(&self, step: PublishStep, file: Option<&str>) -> Result<(), ProviderError> {
        let state = self.state.lock();
        match &state.failure {
            Some((failing_step, failing_file, status_code))
                if *failing_step == step
                    && (failing_file.is_none() || failing_file.as_deref() == file) =>
            {
                Err(ProviderError::ApiError {
                    status_code: *status_code,
                    message: format!("Simulated {} failure", step),
                })
            }
            _ => Ok(()),
        }
    }

    fn key_of(links: &FileLinks) -> String {
        links
            .content
            .trim_end_matches("/content")
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl RecordRepository for MockRecordRepository {
    async fn create_record(&self, payload: &Value) -> Result<DraftRecord, ProviderError> {
        self.check(PublishStep::Create, None)?;

        let mut state = self.state.lock();
        state.calls.push(RepositoryCall::Create);
        state.payloads.push(payload.clone());
        state.records += 1;
        let id = format!("rec-{}", state.records);

        Ok(DraftRecord {
            files_link: format!("mock://records/{}/draft/files", id),
            publish_link: format!("mock://records/{}/draft/actions/publish", id),
            id,
        })
    }

    async fn register_file(
        &self,
        draft: &DraftRecord,
        key: &str,
    ) -> Result<FileLinks, ProviderError> {
        self.check(PublishStep::RegisterFiles, Some(key))?;
        self.state.lock().calls.push(RepositoryCall::Register(key.to_string()));

        Ok(FileLinks {
            content: format!("{}/{}/content", draft.files_link, key),
            commit: format!("{}/{}/commit", draft.files_link, key),
        })
    }

    async fn upload_content(&self, links: &FileLinks, data: &[u8]) -> Result<(), ProviderError> {
        let key = Self::key_of(links);
        self.check(PublishStep::Upload, Some(&key))?;

        let mut state = self.state.lock();
        state.calls.push(RepositoryCall::Upload(key.clone()));
        state.uploads.insert(key, data.to_vec());
        Ok(())
    }

    async fn commit_file(&self, links: &FileLinks) -> Result<(), ProviderError> {
        let key = Self::key_of(links);
        self.check(PublishStep::Commit, Some(&key))?;
        self.state.lock().calls.push(RepositoryCall::Commit(key));
        Ok(())
    }

    async fn publish(&self, draft: &DraftRecord) -> Result<String, ProviderError> {
        self.check(PublishStep::Release, None)?;
        self.state.lock().calls.push(RepositoryCall::Publish(draft.id.clone()));
        Ok(draft.id.clone())
    }
}
