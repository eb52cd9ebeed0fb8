/*!
 * Repository layer for the document store.
 *
 * This module provides the create/read/filter/update contract the pipeline
 * relies on, keyed by document and language. Every mutation of a variant row
 * goes through a single statement or an immediate transaction on its
 * (document, language, kind) key.
 */

use anyhow::{Context, Result, anyhow};
use log::debug;
use rusqlite::{Connection, OptionalExtension, Row, params};
use sha2::{Digest, Sha256};

use super::connection::{DatabaseConnection, DatabaseStats};
use super::models::{
    CompletedArtifact, CompletionOutcome, DocumentRecord, JobStatus, NewDocument, PayloadKind,
    PublishFailureRecord, PublishStatus, TransferStatus, VariantKey, VariantPayload,
    VariantRecord, PROJECT_ACCEPTED, TRANSLATE_COMPLETE,
};

/// Separator placed between text fragments in `documents.searchability`
pub const SEARCH_TEXT_SEPARATOR: &str = ",";

const DOCUMENT_COLUMNS: &str = "id, identifier, file_name, file_type, file_data, file_size, content_hash, \
     searchability, metadata, publish_status, published_record_id, created_at, updated_at";

const VARIANT_COLUMNS: &str = "id, document_id, language, kind, file_name, file_type, file_size, \
     file_data, metadata, project_id, project_pass, project_status, job_status, download_status, \
     upload_status, translate_status, failure_reason, dispatched_at, created_at, updated_at";

/// Repository for document store operations
#[derive(Clone)]
pub struct Repository {
    db: DatabaseConnection,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("path", &self.db.path())
            .finish()
    }
}

impl Repository {
    /// Create a new repository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a repository with an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let db = DatabaseConnection::new_in_memory()?;
        Ok(Self::new(db))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn stats(&self) -> Result<DatabaseStats> {
        self.db.stats_async().await
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Insert a harvested document, or return the id of the one already
    /// stored under the same identifier
    pub async fn insert_document(&self, document: &NewDocument) -> Result<i64> {
        let document = document.clone();
        let now = chrono::Utc::now().to_rfc3339();
        let content_hash = hex_digest(&document.file_data);
        let metadata = serde_json::to_string(&document.metadata)?;

        self.db
            .transaction_async(move |tx| {
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM documents WHERE identifier = ?1",
                        [&document.identifier],
                        |row| row.get(0),
                    )
                    .optional()?;

                if let Some(id) = existing {
                    debug!("Document '{}' already stored as {}", document.identifier, id);
                    return Ok(id);
                }

                tx.execute(
                    r#"
                    INSERT INTO documents (
                        identifier, file_name, file_type, file_data, file_size, content_hash,
                        searchability, metadata, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, '', ?7, ?8, ?8)
                    "#,
                    params![
                        document.identifier,
                        document.file_name,
                        document.file_type,
                        document.file_data,
                        document.file_data.len() as i64,
                        content_hash,
                        metadata,
                        now,
                    ],
                )?;
                Ok(tx.last_insert_rowid())
            })
            .await
    }

    /// Get a document by id
    pub async fn get_document(&self, document_id: i64) -> Result<Option<DocumentRecord>> {
        self.db
            .execute_async(move |conn| {
                let sql = format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS);
                let document = conn
                    .query_row(&sql, [document_id], parse_document_row)
                    .optional()?;
                Ok(document)
            })
            .await
    }

    /// Find a document by its source identifier
    pub async fn find_document_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<DocumentRecord>> {
        let identifier = identifier.to_string();

        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM documents WHERE identifier = ?1",
                    DOCUMENT_COLUMNS
                );
                let document = conn
                    .query_row(&sql, [identifier], parse_document_row)
                    .optional()?;
                Ok(document)
            })
            .await
    }

    /// List all documents in id order
    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        self.db
            .execute_async(|conn| {
                let sql = format!("SELECT {} FROM documents ORDER BY id", DOCUMENT_COLUMNS);
                query_documents(conn, &sql)
            })
            .await
    }

    /// List documents that have not been published yet
    pub async fn list_unpublished_documents(&self) -> Result<Vec<DocumentRecord>> {
        self.db
            .execute_async(|conn| {
                let sql = format!(
                    "SELECT {} FROM documents WHERE publish_status IS NULL OR publish_status != 'published' ORDER BY id",
                    DOCUMENT_COLUMNS
                );
                query_documents(conn, &sql)
            })
            .await
    }

    /// Record a successful publication
    pub async fn mark_published(&self, document_id: i64, record_id: &str) -> Result<()> {
        let record_id = record_id.to_string();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .transaction_async(move |tx| {
                tx.execute(
                    "UPDATE documents SET publish_status = ?1, published_record_id = ?2, updated_at = ?3 WHERE id = ?4",
                    params![PublishStatus::Published.to_string(), record_id, now, document_id],
                )?;
                tx.execute(
                    "UPDATE language_variants SET upload_status = ?1, updated_at = ?2
                     WHERE document_id = ?3 AND kind = 'file' AND translate_status = 'complete'",
                    params![TransferStatus::Done.to_string(), now, document_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Record a failed publication together with the identifying details
    /// needed to clean up an orphaned draft
    pub async fn record_publish_failure(
        &self,
        document_id: i64,
        record_id: Option<&str>,
        step: &str,
        file_key: Option<&str>,
        message: &str,
    ) -> Result<()> {
        let record_id = record_id.map(str::to_string);
        let step = step.to_string();
        let file_key = file_key.map(str::to_string);
        let message = message.to_string();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .transaction_async(move |tx| {
                tx.execute(
                    "INSERT INTO publish_failures (document_id, record_id, step, file_key, message, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![document_id, record_id, step, file_key, message, now],
                )?;
                tx.execute(
                    "UPDATE documents SET publish_status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![PublishStatus::Failed.to_string(), now, document_id],
                )?;
                Ok(())
            })
            .await
    }

    /// List the publish failures recorded for a document, oldest first
    pub async fn list_publish_failures(
        &self,
        document_id: i64,
    ) -> Result<Vec<PublishFailureRecord>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, document_id, record_id, step, file_key, message, created_at
                     FROM publish_failures WHERE document_id = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([document_id], |row| {
                        Ok(PublishFailureRecord {
                            id: row.get(0)?,
                            document_id: row.get(1)?,
                            record_id: row.get(2)?,
                            step: row.get(3)?,
                            file_key: row.get(4)?,
                            message: row.get(5)?,
                            created_at: row.get(6)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    // =========================================================================
    // Language variants
    // =========================================================================

    /// Get the variant row for a key
    pub async fn get_variant(&self, key: &VariantKey) -> Result<Option<VariantRecord>> {
        let key = key.clone();

        self.db
            .execute_async(move |conn| get_variant_sync(conn, &key))
            .await
    }

    /// List a document's variants in ascending language order, files first
    pub async fn list_variants(&self, document_id: i64) -> Result<Vec<VariantRecord>> {
        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM language_variants WHERE document_id = ?1 ORDER BY language ASC, kind ASC",
                    VARIANT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([document_id], parse_variant_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    /// List completed variants of one kind in ascending language order
    pub async fn list_completed_variants(
        &self,
        document_id: i64,
        kind: PayloadKind,
    ) -> Result<Vec<VariantRecord>> {
        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM language_variants
                     WHERE document_id = ?1 AND kind = ?2 AND translate_status = ?3
                     ORDER BY language ASC",
                    VARIANT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        params![document_id, kind.to_string(), TRANSLATE_COMPLETE],
                        parse_variant_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    /// List rows that were accepted by the provider and still await an
    /// artifact
    pub async fn list_pollable_variants(&self) -> Result<Vec<VariantRecord>> {
        self.db
            .execute_async(|conn| {
                let sql = format!(
                    "SELECT {} FROM language_variants
                     WHERE project_status = ?1
                       AND translate_status IS NULL
                       AND (job_status IS NULL OR job_status != 'FAILED')
                     ORDER BY document_id ASC, language ASC, kind ASC",
                    VARIANT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([PROJECT_ACCEPTED], parse_variant_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    /// Create the row for a key if it does not exist yet
    pub async fn ensure_variant(&self, key: &VariantKey) -> Result<VariantRecord> {
        let key = key.clone();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .transaction_async(move |tx| {
                insert_variant_if_missing(tx, &key, &now)?;
                get_variant_sync(tx, &key)?
                    .ok_or_else(|| anyhow!("Variant row vanished for {}", key))
            })
            .await
    }

    /// Store the job identifiers of an accepted submission
    pub async fn record_dispatch(
        &self,
        key: &VariantKey,
        project_id: &str,
        project_pass: &str,
    ) -> Result<()> {
        let key = key.clone();
        let project_id = project_id.to_string();
        let project_pass = project_pass.to_string();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .transaction_async(move |tx| {
                insert_variant_if_missing(tx, &key, &now)?;
                tx.execute(
                    r#"
                    UPDATE language_variants
                    SET project_id = ?1, project_pass = ?2, project_status = ?3, job_status = ?4,
                        failure_reason = NULL, dispatched_at = ?5, updated_at = ?5
                    WHERE document_id = ?6 AND language = ?7 AND kind = ?8
                    "#,
                    params![
                        project_id,
                        project_pass,
                        PROJECT_ACCEPTED,
                        JobStatus::Pending.to_string(),
                        now,
                        key.document_id,
                        key.language,
                        key.kind.to_string(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Remember why a submission was not accepted; `project_status` stays
    /// unset so a later dispatch retries it
    pub async fn record_dispatch_failure(&self, key: &VariantKey, reason: &str) -> Result<()> {
        let key = key.clone();
        let reason = reason.to_string();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .transaction_async(move |tx| {
                insert_variant_if_missing(tx, &key, &now)?;
                tx.execute(
                    "UPDATE language_variants SET failure_reason = ?1, updated_at = ?2
                     WHERE document_id = ?3 AND language = ?4 AND kind = ?5 AND project_status IS NULL",
                    params![reason, now, key.document_id, key.language, key.kind.to_string()],
                )?;
                Ok(())
            })
            .await
    }

    /// Update the provider-side job state of a pending row
    ///
    /// Completed rows are left alone, so a late status never overrides a
    /// retrieved artifact.
    pub async fn update_job_status(
        &self,
        key: &VariantKey,
        status: JobStatus,
        reason: Option<&str>,
    ) -> Result<bool> {
        let key = key.clone();
        let reason = reason.map(str::to_string);
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .execute_async(move |conn| {
                let changed = conn.execute(
                    r#"
                    UPDATE language_variants
                    SET job_status = ?1, failure_reason = COALESCE(?2, failure_reason), updated_at = ?3
                    WHERE document_id = ?4 AND language = ?5 AND kind = ?6 AND translate_status IS NULL
                    "#,
                    params![
                        status.to_string(),
                        reason,
                        now,
                        key.document_id,
                        key.language,
                        key.kind.to_string(),
                    ],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    /// Mark a download attempt as failed without touching the job state
    pub async fn mark_download_failed(&self, key: &VariantKey, reason: &str) -> Result<()> {
        let key = key.clone();
        let reason = reason.to_string();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE language_variants SET download_status = ?1, failure_reason = ?2, updated_at = ?3
                     WHERE document_id = ?4 AND language = ?5 AND kind = ?6 AND translate_status IS NULL",
                    params![
                        TransferStatus::Failed.to_string(),
                        reason,
                        now,
                        key.document_id,
                        key.language,
                        key.kind.to_string(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Write a retrieved artifact into its row and append its search text
    ///
    /// Runs as one immediate transaction on the variant key. Writing the same
    /// artifact twice leaves the store as after the first write: the row is updated
    /// in place and the search text of a provider project is appended once.
    pub async fn complete_variant(&self, artifact: &CompletedArtifact) -> Result<CompletionOutcome> {
        let artifact = artifact.clone();
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .transaction_async(move |tx| {
                let key = &artifact.key;
                if artifact.payload.kind() != key.kind {
                    return Err(anyhow!(
                        "Payload kind {} does not match row {}",
                        artifact.payload.kind(),
                        key
                    ));
                }

                insert_variant_if_missing(tx, key, &now)?;
                let was_complete = get_variant_sync(tx, key)?
                    .map(|row| row.is_complete())
                    .unwrap_or(false);

                let (file_data, metadata) = match &artifact.payload {
                    VariantPayload::File(bytes) => (Some(bytes.clone()), None),
                    VariantPayload::Metadata(value) => (None, Some(serde_json::to_string(value)?)),
                };

                tx.execute(
                    r#"
                    UPDATE language_variants
                    SET file_name = ?1, file_type = ?2, file_size = ?3, file_data = ?4, metadata = ?5,
                        translate_status = ?6, job_status = ?7, download_status = ?8,
                        failure_reason = NULL, updated_at = ?9
                    WHERE document_id = ?10 AND language = ?11 AND kind = ?12
                    "#,
                    params![
                        artifact.file_name,
                        artifact.file_type,
                        artifact.file_size,
                        file_data,
                        metadata,
                        TRANSLATE_COMPLETE,
                        JobStatus::Done.to_string(),
                        TransferStatus::Done.to_string(),
                        now,
                        key.document_id,
                        key.language,
                        key.kind.to_string(),
                    ],
                )?;

                let mut appended_search_text = false;
                if let Some(text) = artifact.search_text.as_deref() {
                    let inserted = tx.execute(
                        "INSERT OR IGNORE INTO search_fragments (document_id, job_key, created_at) VALUES (?1, ?2, ?3)",
                        params![key.document_id, artifact.job_key, now],
                    )?;
                    if inserted > 0 && !text.trim().is_empty() {
                        tx.execute(
                            r#"
                            UPDATE documents
                            SET searchability = CASE WHEN searchability = '' THEN ?1
                                                     ELSE searchability || ?2 || ?1 END,
                                updated_at = ?3
                            WHERE id = ?4
                            "#,
                            params![text, SEARCH_TEXT_SEPARATOR, now, key.document_id],
                        )?;
                        appended_search_text = true;
                    }
                }

                Ok(CompletionOutcome {
                    was_complete,
                    appended_search_text,
                })
            })
            .await
            .context("Failed to store retrieved artifact")
    }
}

fn insert_variant_if_missing(conn: &Connection, key: &VariantKey, now: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO language_variants (document_id, language, kind, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![key.document_id, key.language, key.kind.to_string(), now],
    )?;
    Ok(())
}

fn get_variant_sync(conn: &Connection, key: &VariantKey) -> Result<Option<VariantRecord>> {
    let sql = format!(
        "SELECT {} FROM language_variants WHERE document_id = ?1 AND language = ?2 AND kind = ?3",
        VARIANT_COLUMNS
    );
    let row = conn
        .query_row(
            &sql,
            params![key.document_id, key.language, key.kind.to_string()],
            parse_variant_row,
        )
        .optional()?;
    Ok(row)
}

fn query_documents(conn: &Connection, sql: &str) -> Result<Vec<DocumentRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], parse_document_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn parse_json_column(text: Option<String>) -> serde_json::Value {
    text.and_then(|t| serde_json::from_str(&t).ok())
        .unwrap_or(serde_json::Value::Null)
}

fn parse_document_row(row: &Row) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get(0)?,
        identifier: row.get(1)?,
        file_name: row.get(2)?,
        file_type: row.get(3)?,
        file_data: row.get(4)?,
        file_size: row.get(5)?,
        content_hash: row.get(6)?,
        searchability: row.get(7)?,
        metadata: parse_json_column(row.get(8)?),
        publish_status: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| s.parse().ok()),
        published_record_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn parse_variant_row(row: &Row) -> rusqlite::Result<VariantRecord> {
    let metadata: Option<String> = row.get(8)?;
    Ok(VariantRecord {
        id: row.get(0)?,
        document_id: row.get(1)?,
        language: row.get(2)?,
        kind: row
            .get::<_, String>(3)?
            .parse()
            .unwrap_or(PayloadKind::File),
        file_name: row.get(4)?,
        file_type: row.get(5)?,
        file_size: row.get(6)?,
        file_data: row.get(7)?,
        metadata: metadata.map(|m| parse_json_column(Some(m))),
        project_id: row.get(9)?,
        project_pass: row.get(10)?,
        project_status: row.get(11)?,
        job_status: row
            .get::<_, Option<String>>(12)?
            .and_then(|s| s.parse().ok()),
        download_status: row
            .get::<_, Option<String>>(13)?
            .and_then(|s| s.parse().ok()),
        upload_status: row
            .get::<_, Option<String>>(14)?
            .and_then(|s| s.parse().ok()),
        translate_status: row.get(15)?,
        failure_reason: row.get(16)?,
        dispatched_at: row.get(17)?,
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

fn hex_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
