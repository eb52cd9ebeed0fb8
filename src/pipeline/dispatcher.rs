/*!
 * Translation dispatch and status polling.
 *
 * A document is submitted twice per target language: its file and its
 * metadata serialized as `<file_name>.json`. Each submission becomes one
 * variant row keyed by `(document, language, kind)`.
 */

use log::{debug, info, warn};
use std::sync::Arc;

use crate::database::Repository;
use crate::database::models::{DocumentRecord, PayloadKind, VariantKey, VariantRecord};
use crate::errors::PipelineError;
use crate::language_utils::target_language_from_langpair;
use crate::pipeline::retry::{CallBudget, RetryPolicy};
use crate::providers::{ProjectState, ProjectSubmission, TranslationProvider};

/// Identifiers of an accepted translation job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub key: VariantKey,
    pub project_id: String,
    pub project_pass: String,
    /// RFC 3339 time of the accepted submission
    pub dispatched_at: Option<String>,
}

impl JobHandle {
    /// Handle of an accepted row, `None` for rows the provider never took
    pub fn from_row(row: &VariantRecord) -> Option<Self> {
        if !row.is_accepted() {
            return None;
        }
        Some(Self {
            key: VariantKey::new(row.document_id, row.language.clone(), row.kind),
            project_id: row.project_id.clone()?,
            project_pass: row.project_pass.clone()?,
            dispatched_at: row.dispatched_at.clone(),
        })
    }
}

/// Download URL of one chunk of a finished job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUrl {
    /// `"<job id>-<job pass>#<chunk index>"`, names the chunk in logs
    pub job_key: String,
    pub url: String,
}

/// Result of a status query
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending,
    Done {
        target_language: String,
        download_urls: Vec<ChunkUrl>,
    },
    Failed {
        reason: String,
    },
}

/// A submission the provider did not accept
#[derive(Debug)]
pub struct DispatchFailure {
    pub language: String,
    pub kind: PayloadKind,
    pub error: PipelineError,
}

/// Outcome of dispatching one document
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Handles of all accepted rows, including ones accepted earlier
    pub handles: Vec<JobHandle>,
    pub failures: Vec<DispatchFailure>,
}

/// Submits documents to the translation provider and polls their jobs
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Repository,
    provider: Arc<dyn TranslationProvider>,
    budget: CallBudget,
    retry: RetryPolicy,
    source_language: String,
    project_name_prefix: String,
}

impl Dispatcher {
    pub fn new(
        store: Repository,
        provider: Arc<dyn TranslationProvider>,
        budget: CallBudget,
        retry: RetryPolicy,
        source_language: impl Into<String>,
        project_name_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            budget,
            retry,
            source_language: source_language.into(),
            project_name_prefix: project_name_prefix.into(),
        }
    }

    fn submission(
        &self,
        document: &DocumentRecord,
        language: &str,
        kind: PayloadKind,
    ) -> Result<ProjectSubmission, PipelineError> {
        let (file_name, content) = match kind {
            PayloadKind::File => (document.file_key(), document.file_data.clone()),
            PayloadKind::Metadata => {
                let content = serde_json::to_vec(&document.metadata).map_err(|e| {
                    PipelineError::DataShape(format!(
                        "Metadata of document {} cannot be serialized: {}",
                        document.id, e
                    ))
                })?;
                (format!("{}.json", document.file_name), content)
            }
        };

        Ok(ProjectSubmission {
            project_name: format!(
                "{}-{}-{}-{}",
                self.project_name_prefix, document.id, language, kind
            ),
            source_language: self.source_language.clone(),
            target_language: language.to_string(),
            file_name,
            content,
        })
    }

    /// Submit a document's file and metadata for every target language
    ///
    /// Rows the provider already accepted are not resubmitted; their handles
    /// are returned alongside the new ones. A rejected submission leaves its
    /// row unaccepted and is reported, so a later call retries it. Only store
    /// failures abort the call.
    pub async fn dispatch(
        &self,
        document: &DocumentRecord,
        target_languages: &[String],
    ) -> Result<DispatchReport, PipelineError> {
        let mut report = DispatchReport::default();

        for language in target_languages {
            for kind in PayloadKind::ALL {
                let key = VariantKey::new(document.id, language.clone(), kind);
                let row = self.store.ensure_variant(&key).await?;

                if let Some(handle) = JobHandle::from_row(&row) {
                    debug!("{} already accepted as project {}", key, handle.project_id);
                    report.handles.push(handle);
                    continue;
                }

                let submission = self.submission(document, language, kind)?;

                // Project creation is not idempotent, so it is attempted once
                // per dispatch and left to the next dispatch on failure
                self.budget.acquire().await;
                match self.provider.create_project(&submission).await {
                    Ok(project) => {
                        self.store
                            .record_dispatch(&key, &project.project_id, &project.project_pass)
                            .await?;
                        info!("Dispatched {} as project {}", key, project.project_id);

                        let row = self.store.get_variant(&key).await?;
                        if let Some(handle) = row.as_ref().and_then(JobHandle::from_row) {
                            report.handles.push(handle);
                        }
                    }
                    Err(e) => {
                        let error = PipelineError::from_provider(e);
                        warn!("Submission of {} failed: {}", key, error);
                        self.store
                            .record_dispatch_failure(&key, &error.to_string())
                            .await?;
                        report.failures.push(DispatchFailure {
                            language: language.clone(),
                            kind,
                            error,
                        });
                    }
                }
            }
        }

        Ok(report)
    }

    /// Query the provider for a job's state
    ///
    /// Transport failures are retried within the policy and then returned
    /// as `PipelineError::Transport`; a provider-reported failure is
    /// `PollStatus::Failed`.
    pub async fn poll_status(&self, handle: &JobHandle) -> Result<PollStatus, PipelineError> {
        let provider = &self.provider;

        let state = self
            .retry
            .run(&self.budget, "Project status query", || {
                provider.project_status(&handle.project_id, &handle.project_pass)
            })
            .await
            .map_err(PipelineError::from_provider)?;

        match state {
            ProjectState::InProgress { status } => {
                debug!("{} is {}", handle.key, status);
                Ok(PollStatus::Pending)
            }
            ProjectState::Failed { reason } => Ok(PollStatus::Failed { reason }),
            ProjectState::Done { langpair, jobs } => {
                let target_language = target_language_from_langpair(&langpair)
                    .map_err(|e| PipelineError::DataShape(format!("{:#}", e)))?;

                if jobs.is_empty() {
                    return Err(PipelineError::DataShape(format!(
                        "Project {} is done but lists no jobs",
                        handle.project_id
                    )));
                }

                let mut download_urls = Vec::new();
                for job in &jobs {
                    let urls = self
                        .retry
                        .run(&self.budget, "Job download lookup", || {
                            provider.job_download_urls(job)
                        })
                        .await
                        .map_err(PipelineError::from_provider)?;

                    download_urls.extend(urls.into_iter().enumerate().map(|(chunk, url)| {
                        ChunkUrl {
                            job_key: format!("{}-{}#{}", job.id, job.password, chunk),
                            url,
                        }
                    }));
                }

                Ok(PollStatus::Done {
                    target_language,
                    download_urls,
                })
            }
        }
    }
}
