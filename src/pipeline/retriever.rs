/*!
 * Artifact retrieval: download, classify, store.
 */

use log::{debug, info, warn};
use std::sync::Arc;

use crate::database::Repository;
use crate::database::models::{CompletedArtifact, DocumentRecord, PayloadKind, VariantKey};
use crate::errors::{PipelineError, ProviderError};
use crate::extraction::TextExtractor;
use crate::language_utils::language_codes_match;
use crate::pipeline::dispatcher::{ChunkUrl, JobHandle};
use crate::pipeline::retry::{CallBudget, RetryPolicy};
use crate::pipeline::routing::{RetrievedArtifact, RouteTable};
use crate::providers::TranslationProvider;

/// What a retrieval wrote to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveOutcome {
    pub key: VariantKey,
    /// Stored file name, `<lang>_<served name>`
    pub file_name: String,
    pub kind: PayloadKind,
    /// The row was already complete, so this was a repeat retrieval
    pub was_complete: bool,
    pub appended_search_text: bool,
}

/// Last path segment of a URL, without query or fragment
fn url_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// One downloaded chunk of a job
#[derive(Debug)]
struct ChunkPart {
    file_name: String,
    bytes: Vec<u8>,
}

/// Join the chunks of one job into a single artifact
///
/// File chunks are parts of one file and are concatenated in chunk order.
/// Metadata cannot be split, so every metadata chunk must carry the same
/// document.
fn join_chunks(language: &str, parts: Vec<ChunkPart>) -> Result<RetrievedArtifact, PipelineError> {
    let mut parts = parts.into_iter();
    let Some(first) = parts.next() else {
        return Err(PipelineError::DataShape("Job has no chunks".to_string()));
    };
    let mut artifact = RetrievedArtifact::new(language, first.file_name, first.bytes);

    for part in parts {
        match artifact.kind() {
            PayloadKind::File => artifact.bytes.extend_from_slice(&part.bytes),
            PayloadKind::Metadata if part.bytes == artifact.bytes => {}
            PayloadKind::Metadata => {
                return Err(PipelineError::DataShape(format!(
                    "Metadata artifact '{}' differs between chunks",
                    artifact.file_name
                )));
            }
        }
    }

    Ok(artifact)
}

/// Downloads finished jobs and writes them into their variant rows
#[derive(Debug, Clone)]
pub struct Retriever {
    store: Repository,
    provider: Arc<dyn TranslationProvider>,
    budget: CallBudget,
    retry: RetryPolicy,
    routes: Arc<RouteTable>,
    extractor: Arc<dyn TextExtractor>,
}

impl Retriever {
    pub fn new(
        store: Repository,
        provider: Arc<dyn TranslationProvider>,
        budget: CallBudget,
        retry: RetryPolicy,
        routes: Arc<RouteTable>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            store,
            provider,
            budget,
            retry,
            routes,
            extractor,
        }
    }

    /// Download every chunk of a finished job and store the joined artifact
    ///
    /// Nothing is written until all chunks are in hand, so a failed chunk
    /// leaves the row pending for the next pass. Retrieving the same job
    /// again updates the same row and does not append its search text a
    /// second time.
    pub async fn retrieve(
        &self,
        handle: &JobHandle,
        target_language: &str,
        chunks: &[ChunkUrl],
        document: &DocumentRecord,
    ) -> Result<RetrieveOutcome, PipelineError> {
        let key = &handle.key;

        if key.document_id != document.id {
            return Err(PipelineError::DataShape(format!(
                "Job for {} handed document {}",
                key, document.id
            )));
        }
        if !language_codes_match(target_language, &key.language) {
            return Err(PipelineError::DataShape(format!(
                "Provider returned language '{}' for {}",
                target_language, key
            )));
        }
        if chunks.is_empty() {
            return Err(PipelineError::DataShape(format!(
                "Finished job for {} has no download URL",
                key
            )));
        }

        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            parts.push(self.download_chunk(key, chunk).await?);
        }
        let artifact = join_chunks(&key.language, parts)?;

        if artifact.kind() != key.kind {
            return Err(PipelineError::DataShape(format!(
                "Artifact '{}' is {} but the job belongs to {}",
                artifact.file_name,
                artifact.kind(),
                key
            )));
        }

        let payload = self.routes.route(&artifact)?;
        let search_text = match key.kind {
            PayloadKind::File => self.extract_text(&artifact).await,
            PayloadKind::Metadata => None,
        };

        let job_key = format!("{}-{}", handle.project_id, handle.project_pass);
        let file_name = format!("{}_{}", key.language, artifact.file_name);
        let completed = CompletedArtifact {
            key: key.clone(),
            job_key,
            file_name: file_name.clone(),
            file_type: artifact.extension.clone(),
            file_size: artifact.bytes.len() as i64,
            payload,
            search_text,
        };

        let outcome = self.store.complete_variant(&completed).await?;
        if outcome.was_complete {
            debug!("Re-retrieved {} from {} chunk(s)", key, chunks.len());
        } else {
            info!("Retrieved {} as '{}'", key, file_name);
        }

        Ok(RetrieveOutcome {
            key: key.clone(),
            file_name,
            kind: key.kind,
            was_complete: outcome.was_complete,
            appended_search_text: outcome.appended_search_text,
        })
    }

    /// Download one chunk, recording a failure on the row
    async fn download_chunk(
        &self,
        key: &VariantKey,
        chunk: &ChunkUrl,
    ) -> Result<ChunkPart, PipelineError> {
        let provider = &self.provider;
        match self
            .retry
            .run(&self.budget, "Artifact download", || provider.download(&chunk.url))
            .await
        {
            Ok(downloaded) => {
                let file_name = downloaded
                    .file_name
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| url_file_name(&chunk.url));
                Ok(ChunkPart {
                    file_name,
                    bytes: downloaded.bytes,
                })
            }
            Err(e) => {
                let error = match e {
                    ProviderError::ApiError { status_code, .. } => PipelineError::Download {
                        status: status_code,
                        url: chunk.url.clone(),
                    },
                    other => PipelineError::from_provider(other),
                };
                warn!("Chunk {} of {} failed: {}", chunk.job_key, key, error);
                self.store.mark_download_failed(key, &error.to_string()).await?;
                Err(error)
            }
        }
    }

    /// Extract searchable text off the async runtime; failures only cost
    /// searchability
    async fn extract_text(&self, artifact: &RetrievedArtifact) -> Option<String> {
        let extractor = Arc::clone(&self.extractor);
        let format = artifact.extension.clone();
        let bytes = artifact.bytes.clone();

        match tokio::task::spawn_blocking(move || extractor.extract(&format, &bytes)).await {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                warn!("No search text for '{}': {:#}", artifact.file_name, e);
                None
            }
            Err(e) => {
                warn!("Text extraction task for '{}' failed: {}", artifact.file_name, e);
                None
            }
        }
    }
}
