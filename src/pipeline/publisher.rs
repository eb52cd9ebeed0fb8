/*!
 * Publish transaction against the target repository.
 *
 * CREATE → (REGISTER_FILES → UPLOAD → COMMIT per file) → RELEASE, strictly
 * in order. RELEASE only runs after every file committed. Any failure is
 * logged with the draft id, step and file, and persisted so the orphaned
 * draft can be found again.
 */

use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::Arc;

use crate::database::Repository;
use crate::database::models::{DocumentRecord, PayloadKind};
use crate::errors::{PipelineError, ProviderError, PublishStep, PublishStepFailure};
use crate::pipeline::retry::{CallBudget, RetryPolicy};
use crate::providers::RecordRepository;

/// A file attached to the published record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFile {
    pub key: String,
    pub data: Vec<u8>,
}

/// Runs the publish transaction for one document at a time
#[derive(Debug, Clone)]
pub struct Publisher {
    store: Repository,
    repository: Arc<dyn RecordRepository>,
    budget: CallBudget,
    retry: RetryPolicy,
}

impl Publisher {
    pub fn new(
        store: Repository,
        repository: Arc<dyn RecordRepository>,
        budget: CallBudget,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            repository,
            budget,
            retry,
        }
    }

    /// The original file followed by every completed translated file, each
    /// with its own content
    pub async fn collect_files(
        &self,
        document: &DocumentRecord,
    ) -> Result<Vec<PublishFile>, PipelineError> {
        let mut files = vec![PublishFile {
            key: document.file_key(),
            data: document.file_data.clone(),
        }];

        for variant in self
            .store
            .list_completed_variants(document.id, PayloadKind::File)
            .await?
        {
            match (variant.file_name, variant.file_data) {
                (Some(key), Some(data)) => files.push(PublishFile { key, data }),
                _ => warn!(
                    "Completed {} variant of document {} has no content, not attaching it",
                    variant.language, document.id
                ),
            }
        }

        Ok(files)
    }

    /// Log and persist a failed step, returning the error to report
    async fn fail(
        &self,
        document: &DocumentRecord,
        failure: PublishStepFailure,
    ) -> Result<PipelineError, PipelineError> {
        error!(
            "Publishing document {} failed: record={} step={} file={} error={}",
            document.id,
            failure.record_id.as_deref().unwrap_or("-"),
            failure.step,
            failure.file.as_deref().unwrap_or("-"),
            failure.source
        );

        self.store
            .record_publish_failure(
                document.id,
                failure.record_id.as_deref(),
                &failure.step.to_string(),
                failure.file.as_deref(),
                &failure.source.to_string(),
            )
            .await?;

        Ok(PipelineError::PublishStep(failure))
    }

    /// Publish a document and store the resulting record id
    pub async fn publish(
        &self,
        document: &DocumentRecord,
        payload: &Value,
        files: &[PublishFile],
    ) -> Result<String, PipelineError> {
        let repository = &self.repository;

        // A retried CREATE could leave two drafts behind
        self.budget.acquire().await;
        let draft = match repository.create_record(payload).await {
            Ok(draft) => draft,
            Err(source) => {
                let failure = PublishStepFailure {
                    record_id: None,
                    step: PublishStep::Create,
                    file: None,
                    source,
                };
                return Err(self.fail(document, failure).await?);
            }
        };
        debug!("Created draft {} for document {}", draft.id, document.id);

        let step_failure = |step: PublishStep, file: Option<&str>, source: ProviderError| {
            PublishStepFailure {
                record_id: Some(draft.id.clone()),
                step,
                file: file.map(str::to_string),
                source,
            }
        };

        for file in files {
            let key = file.key.as_str();

            let links = match self
                .retry
                .run(&self.budget, "File registration", || {
                    repository.register_file(&draft, key)
                })
                .await
            {
                Ok(links) => links,
                Err(e) => {
                    let failure = step_failure(PublishStep::RegisterFiles, Some(key), e);
                    return Err(self.fail(document, failure).await?);
                }
            };

            if let Err(e) = self
                .retry
                .run(&self.budget, "File upload", || {
                    repository.upload_content(&links, &file.data)
                })
                .await
            {
                let failure = step_failure(PublishStep::Upload, Some(key), e);
                return Err(self.fail(document, failure).await?);
            }

            if let Err(e) = self
                .retry
                .run(&self.budget, "File commit", || repository.commit_file(&links))
                .await
            {
                let failure = step_failure(PublishStep::Commit, Some(key), e);
                return Err(self.fail(document, failure).await?);
            }
        }

        let record_id = match self
            .retry
            .run(&self.budget, "Record publish", || repository.publish(&draft))
            .await
        {
            Ok(record_id) => record_id,
            Err(e) => {
                let failure = step_failure(PublishStep::Release, None, e);
                return Err(self.fail(document, failure).await?);
            }
        };

        self.store.mark_published(document.id, &record_id).await?;
        info!(
            "Published document {} as record {} with {} file(s)",
            document.id,
            record_id,
            files.len()
        );

        Ok(record_id)
    }
}
