/*!
 * Integration tests for dispatch, polling and retrieval against the mock
 * translation provider
 */

use anyhow::Result;
use std::sync::Arc;
use transpub::database::Repository;
use transpub::database::models::{DocumentRecord, JobStatus, PayloadKind, TransferStatus, VariantKey};
use transpub::extraction::DefaultExtractor;
use transpub::pipeline::{
    CallBudget, Dispatcher, JobHandle, PollStatus, RetryPolicy, Retriever, RouteTable,
};
use transpub::providers::TranslationProvider;
use transpub::providers::mock::MockTranslationProvider;

use crate::common;

struct Fixture {
    store: Repository,
    provider: MockTranslationProvider,
    dispatcher: Dispatcher,
    retriever: Retriever,
    document: DocumentRecord,
}

async fn fixture(languages: &[&str]) -> Fixture {
    fixture_with(MockTranslationProvider::new(), languages).await
}

async fn fixture_with(provider: MockTranslationProvider, languages: &[&str]) -> Fixture {
    common::init_logging();
    let store = Repository::new_in_memory().expect("Failed to create store");
    let routes = RouteTable::standard();
    routes
        .validate(&common::languages(languages))
        .expect("fixture languages are routed");
    let shared: Arc<dyn TranslationProvider> = Arc::new(provider.clone());
    let retry = RetryPolicy::new(3, 0);

    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::clone(&shared),
        CallBudget::unlimited(),
        retry.clone(),
        "en-US",
        "test",
    );
    let retriever = Retriever::new(
        store.clone(),
        shared,
        CallBudget::unlimited(),
        retry,
        Arc::new(routes),
        Arc::new(DefaultExtractor),
    );
    let document = common::insert_text_document(
        &store,
        "https://repo.example/records/1",
        "doc",
        "Hello",
        common::sample_metadata("A", &["X"]),
    )
    .await;

    Fixture {
        store,
        provider,
        dispatcher,
        retriever,
        document,
    }
}

fn file_handle(handles: &[JobHandle]) -> JobHandle {
    handles
        .iter()
        .find(|handle| handle.key.kind == PayloadKind::File)
        .cloned()
        .expect("file job dispatched")
}

/// Test that a document is submitted as file and metadata per language
#[tokio::test]
async fn test_dispatch_shouldSubmitFileAndMetadataPerLanguage() -> Result<()> {
    let f = fixture(&["fr-FR", "ar-SA"]).await;

    let report = f
        .dispatcher
        .dispatch(&f.document, &common::languages(&["fr-FR", "ar-SA"]))
        .await?;

    assert_eq!(report.handles.len(), 4);
    assert!(report.failures.is_empty());

    let names: Vec<String> = f.provider.submissions().iter().map(|s| s.file_name.clone()).collect();
    assert_eq!(names, vec!["doc.txt", "doc.json", "doc.txt", "doc.json"]);

    // Accepted rows are not resubmitted
    let again = f
        .dispatcher
        .dispatch(&f.document, &common::languages(&["fr-FR", "ar-SA"]))
        .await?;
    assert_eq!(again.handles.len(), 4);
    assert_eq!(f.provider.submissions().len(), 4);

    Ok(())
}

/// Test that a rejected submission leaves its row unaccepted
#[tokio::test]
async fn test_dispatch_withRejection_shouldRecordFailureAndRetryLater() -> Result<()> {
    let f = fixture(&["fr-FR"]).await;
    f.provider.fail_submissions_for("fr-FR");

    let report = f
        .dispatcher
        .dispatch(&f.document, &common::languages(&["fr-FR"]))
        .await?;

    assert!(report.handles.is_empty());
    assert_eq!(report.failures.len(), 2);
    let row = f
        .store
        .get_variant(&VariantKey::new(f.document.id, "fr-FR", PayloadKind::File))
        .await?
        .expect("row created");
    assert!(!row.is_accepted());
    assert!(row.failure_reason.is_some());

    f.provider.accept_submissions_for("fr-FR");
    let retried = f
        .dispatcher
        .dispatch(&f.document, &common::languages(&["fr-FR"]))
        .await?;
    assert_eq!(retried.handles.len(), 2);

    Ok(())
}

/// Three HTTP 500 answers are retried and the fourth query proceeds to
/// retrieval without losing the job
#[tokio::test]
async fn test_pollStatus_withThreeServerErrors_shouldRetryThenRetrieve() -> Result<()> {
    let f = fixture(&["fr-FR"]).await;
    let report = f
        .dispatcher
        .dispatch(&f.document, &common::languages(&["fr-FR"]))
        .await?;
    let handle = file_handle(&report.handles);
    f.provider.push_status_errors(3, 500);

    let status = f.dispatcher.poll_status(&handle).await?;

    assert_eq!(f.provider.status_calls(), 4);
    let PollStatus::Done {
        target_language,
        download_urls,
    } = status
    else {
        panic!("Expected a finished job, got {:?}", status);
    };
    assert_eq!(target_language, "fr-FR");
    assert_eq!(download_urls.len(), 1);

    let outcome = f
        .retriever
        .retrieve(&handle, &target_language, &download_urls, &f.document)
        .await?;

    assert_eq!(outcome.file_name, "fr-FR_doc.txt");
    assert!(!outcome.was_complete);
    assert!(outcome.appended_search_text);

    let row = f.store.get_variant(&handle.key).await?.expect("row exists");
    assert!(row.is_complete());
    assert_eq!(row.job_status, Some(JobStatus::Done));
    assert_eq!(row.download_status, Some(TransferStatus::Done));
    assert_eq!(row.file_data, Some(b"[fr-FR] Hello".to_vec()));

    let document = f.store.get_document(f.document.id).await?.expect("document");
    assert_eq!(document.searchability, "[fr-FR] Hello");

    Ok(())
}

/// Retrieving the same job twice leaves the store as after the first time
#[tokio::test]
async fn test_retrieve_twice_shouldBeIdempotent() -> Result<()> {
    let f = fixture(&["fr-FR"]).await;
    let report = f
        .dispatcher
        .dispatch(&f.document, &common::languages(&["fr-FR"]))
        .await?;
    let handle = file_handle(&report.handles);
    let PollStatus::Done {
        target_language,
        download_urls,
    } = f.dispatcher.poll_status(&handle).await?
    else {
        panic!("Expected a finished job");
    };

    f.retriever
        .retrieve(&handle, &target_language, &download_urls, &f.document)
        .await?;
    let rows_after_first = f.store.list_variants(f.document.id).await?.len();
    let search_after_first = f
        .store
        .get_document(f.document.id)
        .await?
        .expect("document")
        .searchability;

    let second = f
        .retriever
        .retrieve(&handle, &target_language, &download_urls, &f.document)
        .await?;

    assert!(second.was_complete);
    assert!(!second.appended_search_text);
    assert_eq!(f.store.list_variants(f.document.id).await?.len(), rows_after_first);
    assert_eq!(
        f.store
            .get_document(f.document.id)
            .await?
            .expect("document")
            .searchability,
        search_after_first
    );

    Ok(())
}

/// Two workers retrieving the same job at once write one row and one
/// search fragment
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retrieve_concurrentlyOnSameKey_shouldAppendSearchTextOnce() -> Result<()> {
    let f = fixture(&["fr-FR"]).await;
    let report = f
        .dispatcher
        .dispatch(&f.document, &common::languages(&["fr-FR"]))
        .await?;
    let handle = file_handle(&report.handles);
    let PollStatus::Done {
        target_language,
        download_urls,
    } = f.dispatcher.poll_status(&handle).await?
    else {
        panic!("Expected a finished job");
    };

    let (first, second) = tokio::join!(
        f.retriever
            .retrieve(&handle, &target_language, &download_urls, &f.document),
        f.retriever
            .retrieve(&handle, &target_language, &download_urls, &f.document),
    );
    let outcomes = [first?, second?];

    assert_eq!(outcomes.iter().filter(|o| o.appended_search_text).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| !o.was_complete).count(), 1);

    let rows = f.store.list_variants(f.document.id).await?;
    assert_eq!(
        rows.iter()
            .filter(|row| row.language == "fr-FR" && row.kind == PayloadKind::File)
            .count(),
        1
    );

    let document_id = f.document.id;
    let fragments: i64 = f.store.connection().execute(move |conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM search_fragments WHERE document_id = ?1",
            [document_id],
            |row| row.get(0),
        )?)
    })?;
    assert_eq!(fragments, 1);

    let document = f.store.get_document(f.document.id).await?.expect("document");
    assert_eq!(document.searchability, "[fr-FR] Hello");

    Ok(())
}

/// A job served in two chunks is stored only once both chunks arrived
#[tokio::test]
async fn test_retrieve_withFailedSecondChunk_shouldLeaveRowPending() -> Result<()> {
    let f = fixture_with(MockTranslationProvider::new().with_chunks_per_job(2), &["fr-FR"]).await;
    let report = f
        .dispatcher
        .dispatch(&f.document, &common::languages(&["fr-FR"]))
        .await?;
    let handle = file_handle(&report.handles);
    let PollStatus::Done {
        target_language,
        download_urls,
    } = f.dispatcher.poll_status(&handle).await?
    else {
        panic!("Expected a finished job");
    };
    assert_eq!(download_urls.len(), 2);
    f.provider.fail_chunk_downloads_with(Some((1, 503)));

    let error = f
        .retriever
        .retrieve(&handle, &target_language, &download_urls, &f.document)
        .await
        .unwrap_err();

    assert_eq!(error.kind(), transpub::ErrorKind::DownloadError);
    let row = f.store.get_variant(&handle.key).await?.expect("row exists");
    assert!(!row.is_complete());
    assert!(row.file_data.is_none());
    assert_eq!(row.download_status, Some(TransferStatus::Failed));
    assert!(f
        .store
        .list_pollable_variants()
        .await?
        .iter()
        .any(|row| row.document_id == handle.key.document_id && row.kind == PayloadKind::File));
    let document = f.store.get_document(f.document.id).await?.expect("document");
    assert!(document.searchability.is_empty());

    f.provider.fail_chunk_downloads_with(None);
    let outcome = f
        .retriever
        .retrieve(&handle, &target_language, &download_urls, &f.document)
        .await?;

    assert!(!outcome.was_complete);
    let row = f.store.get_variant(&handle.key).await?.expect("row exists");
    assert!(row.is_complete());
    assert_eq!(row.file_data, Some(b"[fr-FR] Hello".to_vec()));
    let document = f.store.get_document(f.document.id).await?.expect("document");
    assert_eq!(document.searchability, "[fr-FR] Hello");

    Ok(())
}

/// Test that retrieved metadata is parsed and stored as JSON
#[tokio::test]
async fn test_retrieve_metadataJob_shouldStoreParsedMetadata() -> Result<()> {
    let f = fixture(&["fr-FR"]).await;
    let report = f
        .dispatcher
        .dispatch(&f.document, &common::languages(&["fr-FR"]))
        .await?;
    let handle = report
        .handles
        .iter()
        .find(|handle| handle.key.kind == PayloadKind::Metadata)
        .cloned()
        .expect("metadata job dispatched");
    let PollStatus::Done {
        target_language,
        download_urls,
    } = f.dispatcher.poll_status(&handle).await?
    else {
        panic!("Expected a finished job");
    };

    let outcome = f
        .retriever
        .retrieve(&handle, &target_language, &download_urls, &f.document)
        .await?;

    assert_eq!(outcome.file_name, "fr-FR_doc.json");
    assert!(!outcome.appended_search_text);
    let row = f.store.get_variant(&handle.key).await?.expect("row exists");
    let metadata = row.metadata.expect("metadata stored");
    assert_eq!(metadata["metadata"]["title"], "A (fr-FR)");
    assert!(row.file_data.is_none());

    Ok(())
}

/// Test that a provider answering in another language is rejected
#[tokio::test]
async fn test_retrieve_withLanguageMismatch_shouldBeDataShapeError() -> Result<()> {
    let f = fixture(&["fr-FR"]).await;
    let report = f
        .dispatcher
        .dispatch(&f.document, &common::languages(&["fr-FR"]))
        .await?;
    let handle = file_handle(&report.handles);
    let PollStatus::Done { download_urls, .. } = f.dispatcher.poll_status(&handle).await? else {
        panic!("Expected a finished job");
    };

    let error = f
        .retriever
        .retrieve(&handle, "es-ES", &download_urls, &f.document)
        .await
        .unwrap_err();

    assert_eq!(error.kind(), transpub::ErrorKind::DataShapeError);
    let row = f.store.get_variant(&handle.key).await?.expect("row exists");
    assert!(!row.is_complete());

    Ok(())
}

/// A completed row never goes back to pending
#[tokio::test]
async fn test_completedVariant_shouldStayComplete() -> Result<()> {
    let f = fixture(&["fr-FR"]).await;
    let report = f
        .dispatcher
        .dispatch(&f.document, &common::languages(&["fr-FR"]))
        .await?;
    let handle = file_handle(&report.handles);
    let PollStatus::Done {
        target_language,
        download_urls,
    } = f.dispatcher.poll_status(&handle).await?
    else {
        panic!("Expected a finished job");
    };
    f.retriever
        .retrieve(&handle, &target_language, &download_urls, &f.document)
        .await?;

    let changed = f
        .store
        .update_job_status(&handle.key, JobStatus::Failed, Some("late failure"))
        .await?;
    assert!(!changed);

    let document_id = f.document.id;
    let reset = f.store.connection().execute(move |conn| {
        conn.execute(
            "UPDATE language_variants SET translate_status = NULL WHERE document_id = ?1 AND kind = 'file'",
            [document_id],
        )?;
        Ok(())
    });
    assert!(reset.is_err());

    let row = f.store.get_variant(&handle.key).await?.expect("row exists");
    assert!(row.is_complete());
    assert_eq!(row.job_status, Some(JobStatus::Done));

    Ok(())
}

/// A failed download is deferred and succeeds on a later pass
#[tokio::test]
async fn test_pollPending_withDownloadFailure_shouldDeferThenRecover() -> Result<()> {
    let pipeline = common::test_pipeline(common::test_settings(&["fr-FR"]));
    let document = common::insert_text_document(
        &pipeline.store,
        "https://repo.example/records/1",
        "doc",
        "Hello",
        common::sample_metadata("A", &["X"]),
    )
    .await;
    pipeline.runner.dispatch_pending().await?;
    pipeline.provider.fail_downloads_with(Some(503));

    let failed_pass = pipeline.runner.poll_pending().await?;

    assert_eq!(failed_pass.processed, 0);
    assert_eq!(failed_pass.deferred, 2);
    assert!(failed_pass.failures.is_empty());
    let row = pipeline
        .store
        .get_variant(&VariantKey::new(document.id, "fr-FR", PayloadKind::File))
        .await?
        .expect("row exists");
    assert_eq!(row.download_status, Some(TransferStatus::Failed));
    assert!(!row.is_complete());

    pipeline.provider.fail_downloads_with(None);
    let recovered_pass = pipeline.runner.poll_pending().await?;

    assert_eq!(recovered_pass.processed, 2);
    assert!(pipeline.store.list_pollable_variants().await?.is_empty());

    Ok(())
}
