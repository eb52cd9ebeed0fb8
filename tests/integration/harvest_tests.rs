/*!
 * Integration tests for harvest intake
 */

use anyhow::Result;
use transpub::database::Repository;
use transpub::harvest::{HarvestRecord, ingest, ingest_directory};

use crate::common;

const RECORD: &[u8] = br#"{
    "creator": ["Doe"],
    "date": ["2020-01-02T00:00:00Z"],
    "description": ["An annual report"],
    "identifier": ["https://repo.example/records/42"],
    "title": ["Annual report"]
}"#;

/// Test that a record directory becomes one stored document
#[tokio::test]
async fn test_ingestDirectory_shouldStoreRecordAndFile() -> Result<()> {
    common::init_logging();
    let temp_dir = common::create_temp_dir()?;
    common::create_test_file(temp_dir.path(), "rec.json", RECORD)?;
    common::create_test_file(temp_dir.path(), "rec.txt", b"Hello world")?;
    let store = Repository::new_in_memory()?;

    let ids = ingest_directory(&store, temp_dir.path(), "Source Repo").await?;

    assert_eq!(ids.len(), 1);
    let document = store.get_document(ids[0]).await?.expect("document stored");
    assert_eq!(document.identifier, "https://repo.example/records/42");
    assert_eq!(document.file_name, "rec");
    assert_eq!(document.file_type, "txt");
    assert_eq!(document.file_key(), "rec.txt");
    assert_eq!(document.file_data, b"Hello world");
    assert_eq!(document.file_size, 11);
    assert_eq!(document.searchability, "");
    assert_eq!(document.metadata["metadata"]["title"], "Annual report");
    assert_eq!(document.metadata["metadata"]["publisher"], "Source Repo");
    assert_eq!(document.metadata["metadata"]["publication_date"], "2020-01-02");
    assert!(document.publish_status.is_none());

    Ok(())
}

/// Test that ingesting the same directory twice keeps one document
#[tokio::test]
async fn test_ingestDirectory_twice_shouldBeIdempotent() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    common::create_test_file(temp_dir.path(), "rec.json", RECORD)?;
    common::create_test_file(temp_dir.path(), "rec.txt", b"Hello world")?;
    let store = Repository::new_in_memory()?;

    let first = ingest_directory(&store, temp_dir.path(), "Source Repo").await?;
    let second = ingest_directory(&store, temp_dir.path(), "Source Repo").await?;

    assert_eq!(first, second);
    assert_eq!(store.list_documents().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_ingest_withoutIdentifier_shouldFail() -> Result<()> {
    let store = Repository::new_in_memory()?;
    let record = HarvestRecord {
        title: vec!["Untitled".to_string()],
        ..Default::default()
    };

    let result = ingest(&store, &record, "x", b"data".to_vec(), "application/pdf", "Repo").await;

    assert!(result.is_err());
    assert!(store.list_documents().await?.is_empty());

    Ok(())
}
