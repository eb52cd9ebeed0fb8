/*!
 * Pipeline passes over the document store.
 *
 * All coordination goes through the persisted status fields: a pass reads
 * the rows it has to work on, works on them with a bounded worker pool and
 * writes the results back. Passes can be interrupted and rerun at any time.
 */

use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::Config;
use crate::database::Repository;
use crate::database::models::{
    DocumentRecord, JobStatus, PayloadKind, PublishStatus, VariantKey, VariantRecord,
};
use crate::errors::{ErrorKind, PipelineError};
use crate::extraction::{DefaultExtractor, TextExtractor};
use crate::pipeline::aggregator::Aggregator;
use crate::pipeline::dispatcher::{Dispatcher, JobHandle, PollStatus};
use crate::pipeline::publisher::Publisher;
use crate::pipeline::retriever::Retriever;
use crate::pipeline::retry::{CallBudget, RetryPolicy};
use crate::pipeline::routing::RouteTable;
use crate::providers::{RecordRepository, TranslationProvider};

/// Pipeline stage a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dispatch,
    Poll,
    Retrieve,
    Aggregate,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Dispatch => "dispatch",
            Stage::Poll => "poll",
            Stage::Retrieve => "retrieve",
            Stage::Aggregate => "aggregate",
            Stage::Publish => "publish",
        };
        write!(f, "{}", name)
    }
}

/// A job or document that will not make progress without intervention
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalFailure {
    pub document_id: i64,
    /// `None` for document-level stages
    pub language: Option<String>,
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for TerminalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "document {}", self.document_id)?;
        if let Some(language) = &self.language {
            write!(f, " [{}]", language)?;
        }
        write!(f, " {}: {}: {}", self.stage, self.kind, self.message)
    }
}

/// Summary of one or more passes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Items that made progress: submissions, retrievals, publications
    pub processed: usize,
    /// Retryable failures left for a later pass
    pub deferred: usize,
    pub failures: Vec<TerminalFailure>,
}

impl PassReport {
    pub fn merge(&mut self, other: PassReport) {
        self.processed += other.processed;
        self.deferred += other.deferred;
        self.failures.extend(other.failures);
    }

    fn terminal(&mut self, document_id: i64, language: Option<&str>, stage: Stage, error: &PipelineError) {
        let failure = TerminalFailure {
            document_id,
            language: language.map(str::to_string),
            stage,
            kind: error.kind(),
            message: error.to_string(),
        };
        error!("Terminal failure: {}", failure);
        self.failures.push(failure);
    }
}

/// Outcome of working on one accepted job
#[derive(Debug)]
enum JobProgress {
    Pending,
    Retrieved(usize),
}

/// Scheduling settings of a runner
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub project_name_prefix: String,
    pub concurrency: usize,
    pub rate_limit: Option<u32>,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub max_poll_duration: Duration,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_language: config.source_language.clone(),
            target_languages: config.target_languages.clone(),
            project_name_prefix: config.provider.project_name_prefix.clone(),
            concurrency: config.pipeline.concurrent_requests.max(1),
            rate_limit: config.pipeline.rate_limit,
            retry: RetryPolicy::from_config(&config.pipeline),
            poll_interval: Duration::from_secs(config.pipeline.poll_interval_secs),
            max_poll_duration: Duration::from_secs(config.pipeline.max_poll_duration_secs),
        }
    }
}

/// Runs dispatch, poll, retrieve and publish passes
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    store: Repository,
    dispatcher: Dispatcher,
    retriever: Retriever,
    aggregator: Aggregator,
    publisher: Publisher,
    settings: RunnerSettings,
}

impl PipelineRunner {
    /// Build a runner; fails when the artifact routes do not cover every
    /// target language
    pub fn new(
        store: Repository,
        provider: Arc<dyn TranslationProvider>,
        repository: Arc<dyn RecordRepository>,
        settings: RunnerSettings,
    ) -> anyhow::Result<Self> {
        Self::with_extractor(store, provider, repository, Arc::new(DefaultExtractor), settings)
    }

    pub fn with_extractor(
        store: Repository,
        provider: Arc<dyn TranslationProvider>,
        repository: Arc<dyn RecordRepository>,
        extractor: Arc<dyn TextExtractor>,
        settings: RunnerSettings,
    ) -> anyhow::Result<Self> {
        let routes = RouteTable::standard();
        routes.validate(&settings.target_languages)?;

        let budget = CallBudget::per_minute(settings.rate_limit);

        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::clone(&provider),
            budget.clone(),
            settings.retry.clone(),
            settings.source_language.clone(),
            settings.project_name_prefix.clone(),
        );
        let retriever = Retriever::new(
            store.clone(),
            provider,
            budget.clone(),
            settings.retry.clone(),
            Arc::new(routes),
            extractor,
        );
        let aggregator = Aggregator::new(store.clone());
        let publisher = Publisher::new(store.clone(), repository, budget, settings.retry.clone());

        Ok(Self {
            store,
            dispatcher,
            retriever,
            aggregator,
            publisher,
            settings,
        })
    }

    pub fn store(&self) -> &Repository {
        &self.store
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    fn configured_keys(&self, document_id: i64) -> impl Iterator<Item = VariantKey> + '_ {
        self.settings.target_languages.iter().flat_map(move |language| {
            PayloadKind::ALL
                .into_iter()
                .map(move |kind| VariantKey::new(document_id, language.clone(), kind))
        })
    }

    fn find_row<'a>(rows: &'a [VariantRecord], key: &VariantKey) -> Option<&'a VariantRecord> {
        rows.iter()
            .find(|row| row.language == key.language && row.kind == key.kind)
    }

    /// Submit every unpublished document that still has configured rows the
    /// provider has not accepted
    pub async fn dispatch_pending(&self) -> Result<PassReport, PipelineError> {
        let mut report = PassReport::default();

        for document in self.store.list_unpublished_documents().await? {
            let rows = self.store.list_variants(document.id).await?;
            let needs_dispatch = self
                .configured_keys(document.id)
                .any(|key| !Self::find_row(&rows, &key).is_some_and(VariantRecord::is_accepted));
            if !needs_dispatch {
                continue;
            }

            let accepted_before = rows.iter().filter(|row| row.is_accepted()).count();
            let dispatched = match self
                .dispatcher
                .dispatch(&document, &self.settings.target_languages)
                .await
            {
                Ok(dispatched) => dispatched,
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    report.terminal(document.id, None, Stage::Dispatch, &error);
                    continue;
                }
            };

            report.processed += dispatched.handles.len().saturating_sub(accepted_before);
            for failure in dispatched.failures {
                warn!(
                    "Document {} [{} {}] not accepted, will resubmit: {}",
                    document.id, failure.language, failure.kind, failure.error
                );
                report.deferred += 1;
            }
        }

        info!(
            "Dispatch pass: {} submission(s) accepted, {} rejected",
            report.processed, report.deferred
        );
        Ok(report)
    }

    fn timed_out(&self, handle: &JobHandle) -> bool {
        let Some(dispatched_at) = handle.dispatched_at.as_deref() else {
            return false;
        };
        match chrono::DateTime::parse_from_rfc3339(dispatched_at) {
            Ok(dispatched_at) => (chrono::Utc::now() - dispatched_at.with_timezone(&chrono::Utc))
                .to_std()
                .map(|elapsed| elapsed >= self.settings.max_poll_duration)
                .unwrap_or(false),
            Err(e) => {
                warn!("Unreadable dispatch time '{}' on {}: {}", dispatched_at, handle.key, e);
                false
            }
        }
    }

    async fn abandon(&self, handle: &JobHandle, reason: &str) -> Result<(), PipelineError> {
        self.store
            .update_job_status(&handle.key, JobStatus::Failed, Some(reason))
            .await?;
        Ok(())
    }

    /// Poll one job and retrieve every chunk once it is done
    async fn advance_job(&self, handle: &JobHandle) -> Result<JobProgress, (Stage, PipelineError)> {
        if self.timed_out(handle) {
            let reason = format!(
                "No result within {}s of dispatch",
                self.settings.max_poll_duration.as_secs()
            );
            self.abandon(handle, &reason).await.map_err(|e| (Stage::Poll, e))?;
            return Err((Stage::Poll, PipelineError::ProviderJobFailure(reason)));
        }

        let status = self
            .dispatcher
            .poll_status(handle)
            .await
            .map_err(|e| (Stage::Poll, e))?;

        match status {
            PollStatus::Pending => Ok(JobProgress::Pending),
            PollStatus::Failed { reason } => {
                self.abandon(handle, &reason).await.map_err(|e| (Stage::Poll, e))?;
                Err((Stage::Poll, PipelineError::ProviderJobFailure(reason)))
            }
            PollStatus::Done {
                target_language,
                download_urls,
            } => {
                self.store
                    .update_job_status(&handle.key, JobStatus::Done, None)
                    .await
                    .map_err(|e| (Stage::Poll, PipelineError::from(e)))?;

                let document = self
                    .store
                    .get_document(handle.key.document_id)
                    .await
                    .map_err(|e| (Stage::Retrieve, PipelineError::from(e)))?
                    .ok_or_else(|| {
                        (
                            Stage::Retrieve,
                            PipelineError::Store(format!(
                                "Document {} vanished",
                                handle.key.document_id
                            )),
                        )
                    })?;

                self.retriever
                    .retrieve(handle, &target_language, &download_urls, &document)
                    .await
                    .map_err(|e| (Stage::Retrieve, e))?;
                Ok(JobProgress::Retrieved(download_urls.len()))
            }
        }
    }

    /// Poll every accepted, unfinished job and retrieve finished ones
    ///
    /// Provider failures, timeouts and malformed artifacts abandon the job;
    /// transport and download failures leave it for the next pass.
    pub async fn poll_pending(&self) -> Result<PassReport, PipelineError> {
        let handles: Vec<JobHandle> = self
            .store
            .list_pollable_variants()
            .await?
            .iter()
            .filter_map(JobHandle::from_row)
            .collect();

        debug!("Polling {} job(s)", handles.len());

        let results = stream::iter(handles)
            .map(|handle| async move {
                let result = self.advance_job(&handle).await;
                (handle, result)
            })
            .buffer_unordered(self.settings.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut report = PassReport::default();
        for (handle, result) in results {
            let key = &handle.key;
            match result {
                Ok(JobProgress::Pending) => {}
                Ok(JobProgress::Retrieved(chunks)) => {
                    debug!("{} retrieved in {} chunk(s)", key, chunks);
                    report.processed += 1;
                }
                Err((_, error)) if error.is_fatal() => return Err(error),
                Err((stage, error @ PipelineError::DataShape(_))) => {
                    self.store
                        .update_job_status(key, JobStatus::Failed, Some(&error.to_string()))
                        .await?;
                    report.terminal(key.document_id, Some(&key.language), stage, &error);
                }
                Err((stage, error @ PipelineError::ProviderJobFailure(_))) => {
                    report.terminal(key.document_id, Some(&key.language), stage, &error);
                }
                Err((stage, error)) => {
                    warn!("{} {} deferred: {}", key, stage, error);
                    report.deferred += 1;
                }
            }
        }

        info!(
            "Poll pass: {} job(s) retrieved, {} deferred, {} abandoned",
            report.processed,
            report.deferred,
            report.failures.len()
        );
        Ok(report)
    }

    /// Whether every configured row of a document was accepted and reached
    /// a terminal state
    fn is_ready(&self, document_id: i64, rows: &[VariantRecord]) -> bool {
        self.configured_keys(document_id).all(|key| {
            Self::find_row(rows, &key).is_some_and(|row| row.is_accepted() && row.is_terminal())
        }) && rows
            .iter()
            .filter(|row| row.is_accepted())
            .all(VariantRecord::is_terminal)
    }

    /// Aggregate and publish every unpublished document whose jobs are all
    /// terminal; documents whose last publish failed are skipped unless
    /// `include_failed` is set
    pub async fn publish_ready(&self, include_failed: bool) -> Result<PassReport, PipelineError> {
        let mut report = PassReport::default();

        for document in self.store.list_unpublished_documents().await? {
            if document.publish_status == Some(PublishStatus::Failed) && !include_failed {
                debug!("Skipping document {}: last publish failed", document.id);
                continue;
            }

            let rows = self.store.list_variants(document.id).await?;
            if !self.is_ready(document.id, &rows) {
                debug!("Document {} is not ready to publish", document.id);
                continue;
            }

            match self.publish_document(&document).await {
                Ok(_) => report.processed += 1,
                Err((_, error)) if error.is_fatal() => return Err(error),
                Err((stage, error)) => report.terminal(document.id, None, stage, &error),
            }
        }

        info!(
            "Publish pass: {} document(s) published, {} failed",
            report.processed,
            report.failures.len()
        );
        Ok(report)
    }

    async fn publish_document(
        &self,
        document: &DocumentRecord,
    ) -> Result<String, (Stage, PipelineError)> {
        let payload = self
            .aggregator
            .aggregate(document)
            .await
            .map_err(|e| (Stage::Aggregate, e))?;
        let files = self
            .publisher
            .collect_files(document)
            .await
            .map_err(|e| (Stage::Publish, e))?;
        self.publisher
            .publish(document, &payload, &files)
            .await
            .map_err(|e| (Stage::Publish, e))
    }

    /// Dispatch, then poll every `poll_interval` until no job is pending,
    /// then publish
    ///
    /// `on_pass` receives the pass number and the number of jobs still
    /// pending after it.
    pub async fn run_until_settled<F>(&self, mut on_pass: F) -> Result<PassReport, PipelineError>
    where
        F: FnMut(u32, usize),
    {
        let mut report = self.dispatch_pending().await?;
        let mut pass = 0;

        loop {
            pass += 1;
            report.merge(self.poll_pending().await?);

            let remaining = self.store.list_pollable_variants().await?.len();
            on_pass(pass, remaining);
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        report.merge(self.publish_ready(false).await?);
        Ok(report)
    }
}
