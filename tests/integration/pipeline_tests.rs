/*!
 * End-to-end pipeline runs over mock services
 */

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use transpub::ErrorKind;
use transpub::database::Repository;
use transpub::database::models::{JobStatus, PayloadKind, PublishStatus, VariantKey};
use transpub::pipeline::{PipelineRunner, Stage};
use transpub::pipeline::aggregator::TITLE_TYPE;
use transpub::providers::ProjectSubmission;
use transpub::providers::mock::{MockOutcome, MockRecordRepository, MockTranslationProvider};

use crate::common;

/// French translator returning fixed metadata
fn french_translator(submission: &ProjectSubmission) -> Vec<u8> {
    if submission.file_name.ends_with(".json") {
        let translated = json!({ "metadata": {
            "title": "A (fr)",
            "creators": [common::person("Y")],
            "publisher": "P2"
        }});
        serde_json::to_vec(&translated).unwrap_or_default()
    } else {
        b"bonjour".to_vec()
    }
}

/// Test that a full run publishes one record per document
#[tokio::test]
async fn test_runUntilSettled_shouldPublishEveryDocument() -> Result<()> {
    let pipeline = common::test_pipeline(common::test_settings(&["fr-FR", "es-ES"]));
    let alpha = common::insert_text_document(
        &pipeline.store,
        "https://repo.example/records/1",
        "alpha",
        "alpha text",
        common::sample_metadata("Alpha", &["X"]),
    )
    .await;
    common::insert_text_document(
        &pipeline.store,
        "https://repo.example/records/2",
        "beta",
        "beta text",
        common::sample_metadata("Beta", &["Z"]),
    )
    .await;

    let mut passes = Vec::new();
    let report = pipeline
        .runner
        .run_until_settled(|pass, remaining| passes.push((pass, remaining)))
        .await?;

    assert!(report.failures.is_empty());
    assert_eq!(passes, vec![(1, 0)]);
    assert_eq!(pipeline.repository.publish_count(), 2);
    assert_eq!(
        pipeline.repository.uploaded("fr-FR_alpha.txt"),
        Some(b"[fr-FR] alpha text".to_vec())
    );
    assert_eq!(
        pipeline.repository.uploaded("es-ES_beta.txt"),
        Some(b"[es-ES] beta text".to_vec())
    );

    let stored = pipeline.store.get_document(alpha.id).await?.expect("document");
    assert_eq!(stored.publish_status, Some(PublishStatus::Published));
    assert!(stored.searchability.contains("[fr-FR] alpha text"));
    assert!(stored.searchability.contains("[es-ES] alpha text"));

    let payload = &pipeline.repository.payloads()[0];
    assert_eq!(payload["metadata"]["title"], "Alpha");
    assert_eq!(
        payload["metadata"]["additional_titles"],
        json!([
            { "title": "Alpha (es-ES)", "type": { "id": TITLE_TYPE } },
            { "title": "Alpha (fr-FR)", "type": { "id": TITLE_TYPE } }
        ])
    );
    assert_eq!(
        payload["custom_fields"]["invisible_search"],
        stored.searchability.as_str()
    );

    // A second run finds nothing to do
    let rerun = pipeline.runner.run_until_settled(|_, _| {}).await?;
    assert_eq!(rerun.processed, 0);
    assert_eq!(pipeline.repository.publish_count(), 2);

    Ok(())
}

/// Original metadata merged with one French translation
#[tokio::test]
async fn test_runUntilSettled_withFrenchMetadata_shouldMergeIntoRecord() -> Result<()> {
    let provider = MockTranslationProvider::new().with_translator(french_translator);
    let pipeline = common::test_pipeline_with(provider, common::test_settings(&["fr-FR"]));
    common::insert_text_document(
        &pipeline.store,
        "https://repo.example/records/1",
        "d1",
        "hello",
        json!({ "metadata": { "title": "A", "creators": [common::person("X")] } }),
    )
    .await;

    let report = pipeline.runner.run_until_settled(|_, _| {}).await?;

    assert!(report.failures.is_empty());
    let payloads = pipeline.repository.payloads();
    assert_eq!(payloads.len(), 1);
    let meta = &payloads[0]["metadata"];
    assert_eq!(meta["title"], "A");
    assert_eq!(
        meta["creators"],
        json!([common::person("X"), common::person("Y")])
    );
    assert_eq!(
        meta["additional_titles"],
        json!([{ "title": "A (fr)", "type": { "id": "alternative-title" } }])
    );
    assert!(meta["publisher"].as_str().unwrap().contains("P2"));
    assert_eq!(pipeline.repository.uploaded("fr-FR_d1.txt"), Some(b"bonjour".to_vec()));

    Ok(())
}

/// A provider failure for one language does not hold back the others
#[tokio::test]
async fn test_runUntilSettled_withFailedLanguage_shouldPublishRemainingLanguages() -> Result<()> {
    let pipeline = common::test_pipeline(common::test_settings(&["ar-SA", "fr-FR"]));
    pipeline
        .provider
        .set_outcome("ar-SA", MockOutcome::Failed("engine crashed".to_string()));
    let document = common::insert_text_document(
        &pipeline.store,
        "https://repo.example/records/1",
        "doc",
        "Hello",
        common::sample_metadata("A", &["X"]),
    )
    .await;

    let report = pipeline.runner.run_until_settled(|_, _| {}).await?;

    assert_eq!(report.failures.len(), 2);
    for failure in &report.failures {
        assert_eq!(failure.document_id, document.id);
        assert_eq!(failure.language.as_deref(), Some("ar-SA"));
        assert_eq!(failure.stage, Stage::Poll);
        assert_eq!(failure.kind, ErrorKind::ProviderJobFailure);
        assert!(failure.message.contains("engine crashed"));
    }

    assert_eq!(pipeline.repository.publish_count(), 1);
    assert!(pipeline.repository.uploaded("fr-FR_doc.txt").is_some());
    assert!(pipeline.repository.uploaded("ar-SA_doc.txt").is_none());
    let titles = &pipeline.repository.payloads()[0]["metadata"]["additional_titles"];
    assert_eq!(titles.as_array().unwrap().len(), 1);

    let row = pipeline
        .store
        .get_variant(&VariantKey::new(document.id, "ar-SA", PayloadKind::File))
        .await?
        .expect("row exists");
    assert_eq!(row.job_status, Some(JobStatus::Failed));
    assert!(row.is_abandoned());

    Ok(())
}

/// Jobs older than the poll limit are abandoned without querying
#[tokio::test]
async fn test_pollPending_pastMaxPollDuration_shouldAbandonJobs() -> Result<()> {
    let mut settings = common::test_settings(&["fr-FR"]);
    settings.max_poll_duration = Duration::ZERO;
    let pipeline = common::test_pipeline(settings);
    pipeline.provider.set_outcome("fr-FR", MockOutcome::Pending);
    let document = common::insert_text_document(
        &pipeline.store,
        "https://repo.example/records/1",
        "doc",
        "Hello",
        common::sample_metadata("A", &["X"]),
    )
    .await;
    pipeline.runner.dispatch_pending().await?;

    let report = pipeline.runner.poll_pending().await?;

    assert_eq!(report.failures.len(), 2);
    assert!(report
        .failures
        .iter()
        .all(|f| f.stage == Stage::Poll && f.kind == ErrorKind::ProviderJobFailure));
    assert_eq!(pipeline.provider.status_calls(), 0);
    assert!(pipeline.store.list_pollable_variants().await?.is_empty());

    let rows = pipeline.store.list_variants(document.id).await?;
    assert!(rows.iter().all(|row| row.is_abandoned()));

    // Abandoned jobs no longer block publication of the original
    let published = pipeline.runner.publish_ready(false).await?;
    assert_eq!(published.processed, 1);
    assert_eq!(
        pipeline.repository.uploaded("doc.txt"),
        Some(b"Hello".to_vec())
    );

    Ok(())
}

/// An interrupted run resumes from the stored state
#[tokio::test]
async fn test_passes_withPendingJobs_shouldResumeWhereTheyStopped() -> Result<()> {
    let pipeline = common::test_pipeline(common::test_settings(&["fr-FR"]));
    pipeline.provider.set_outcome("fr-FR", MockOutcome::Pending);
    common::insert_text_document(
        &pipeline.store,
        "https://repo.example/records/1",
        "doc",
        "Hello",
        common::sample_metadata("A", &["X"]),
    )
    .await;

    let dispatched = pipeline.runner.dispatch_pending().await?;
    assert_eq!(dispatched.processed, 2);
    let pending = pipeline.runner.poll_pending().await?;
    assert_eq!(pending.processed, 0);
    assert!(pending.failures.is_empty());
    assert_eq!(pipeline.runner.publish_ready(false).await?.processed, 0);

    // Nothing is dispatched twice
    assert_eq!(pipeline.runner.dispatch_pending().await?.processed, 0);
    assert_eq!(pipeline.provider.submissions().len(), 2);

    pipeline.provider.set_outcome("fr-FR", MockOutcome::Done);
    assert_eq!(pipeline.runner.poll_pending().await?.processed, 2);
    assert_eq!(pipeline.runner.publish_ready(false).await?.processed, 1);

    Ok(())
}

/// A rejected submission is counted as deferred and retried on the next run
#[tokio::test]
async fn test_dispatchPending_withRejectedLanguage_shouldDeferDocument() -> Result<()> {
    let pipeline = common::test_pipeline(common::test_settings(&["fr-FR", "es-ES"]));
    pipeline.provider.fail_submissions_for("es-ES");
    common::insert_text_document(
        &pipeline.store,
        "https://repo.example/records/1",
        "doc",
        "Hello",
        common::sample_metadata("A", &["X"]),
    )
    .await;

    let first = pipeline.runner.run_until_settled(|_, _| {}).await?;

    assert_eq!(first.deferred, 2);
    assert_eq!(pipeline.repository.publish_count(), 0);

    pipeline.provider.accept_submissions_for("es-ES");
    let second = pipeline.runner.run_until_settled(|_, _| {}).await?;

    assert!(second.failures.is_empty());
    assert_eq!(pipeline.repository.publish_count(), 1);

    Ok(())
}

/// A document whose jobs arrive in several chunks is published only once
/// every chunk has been retrieved
#[tokio::test]
async fn test_passes_withMissingChunk_shouldHoldBackPublication() -> Result<()> {
    let provider = MockTranslationProvider::new().with_chunks_per_job(2);
    let pipeline = common::test_pipeline_with(provider, common::test_settings(&["fr-FR"]));
    let document = common::insert_text_document(
        &pipeline.store,
        "https://repo.example/records/1",
        "doc",
        "Hello",
        common::sample_metadata("A", &["X"]),
    )
    .await;
    pipeline.runner.dispatch_pending().await?;
    pipeline.provider.fail_chunk_downloads_with(Some((1, 503)));

    let failed_pass = pipeline.runner.poll_pending().await?;

    assert_eq!(failed_pass.processed, 0);
    assert_eq!(failed_pass.deferred, 2);
    assert!(failed_pass.failures.is_empty());
    assert_eq!(pipeline.store.list_pollable_variants().await?.len(), 2);
    assert_eq!(pipeline.runner.publish_ready(false).await?.processed, 0);
    assert_eq!(pipeline.repository.publish_count(), 0);

    pipeline.provider.fail_chunk_downloads_with(None);
    let report = pipeline.runner.run_until_settled(|_, _| {}).await?;

    assert!(report.failures.is_empty());
    assert_eq!(pipeline.repository.publish_count(), 1);
    assert_eq!(
        pipeline.repository.uploaded("fr-FR_doc.txt"),
        Some(b"[fr-FR] Hello".to_vec())
    );
    let stored = pipeline.store.get_document(document.id).await?.expect("document");
    assert_eq!(stored.searchability.matches("[fr-FR] Hello").count(), 1);
    assert_eq!(
        pipeline.repository.payloads()[0]["metadata"]["additional_titles"][0]["title"],
        "A (fr-FR)"
    );

    Ok(())
}

/// A target language without artifact routes is refused before any work
#[test]
fn test_pipelineRunner_withUnroutedLanguage_shouldFailToBuild() -> Result<()> {
    let result = PipelineRunner::new(
        Repository::new_in_memory()?,
        Arc::new(MockTranslationProvider::new()),
        Arc::new(MockRecordRepository::new()),
        common::test_settings(&["fr-FR", "sw-KE"]),
    );

    let Err(error) = result else {
        panic!("Expected the runner to reject sw-KE");
    };
    assert!(error.to_string().contains("sw-KE/file"));

    Ok(())
}
