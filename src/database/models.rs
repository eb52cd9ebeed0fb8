/*!
 * Database entity models.
 *
 * These structures map directly to the `documents`, `language_variants`
 * and `publish_failures` tables.
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Value stored in `translate_status` once an artifact has been retrieved
pub const TRANSLATE_COMPLETE: &str = "complete";

/// Value stored in `project_status` once the provider accepted the source
pub const PROJECT_ACCEPTED: &str = "OK";

/// Payload carried by a language variant row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// Translated binary document (LanguageVariant)
    File,
    /// Translated JSON metadata (LanguageMetadata)
    Metadata,
}

impl PayloadKind {
    pub const ALL: [PayloadKind; 2] = [PayloadKind::File, PayloadKind::Metadata];

    /// Classify an artifact by its file extension
    pub fn from_extension(extension: &str) -> Self {
        if extension.eq_ignore_ascii_case("json") {
            PayloadKind::Metadata
        } else {
            PayloadKind::File
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::File => write!(f, "file"),
            PayloadKind::Metadata => write!(f, "metadata"),
        }
    }
}

impl std::str::FromStr for PayloadKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(PayloadKind::File),
            "metadata" => Ok(PayloadKind::Metadata),
            _ => Err(anyhow::anyhow!("Invalid payload kind: {}", s)),
        }
    }
}

/// Provider-side state of a translation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Submitted, not finished yet
    Pending,
    /// Provider reports the translation as done
    Done,
    /// Provider failure or poll timeout; the job is abandoned
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Done => write!(f, "DONE"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "DONE" => Ok(JobStatus::Done),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// Local transfer progress for downloads and uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Done,
    Failed,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Done => write!(f, "done"),
            TransferStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "done" => Ok(TransferStatus::Done),
            "failed" => Ok(TransferStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid transfer status: {}", s)),
        }
    }
}

/// Publication state of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Published,
    Failed,
}

impl fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishStatus::Published => write!(f, "published"),
            PublishStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for PublishStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "published" => Ok(PublishStatus::Published),
            "failed" => Ok(PublishStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid publish status: {}", s)),
        }
    }
}

/// Store key of a language variant row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantKey {
    pub document_id: i64,
    pub language: String,
    pub kind: PayloadKind,
}

impl VariantKey {
    pub fn new(document_id: i64, language: impl Into<String>, kind: PayloadKind) -> Self {
        Self {
            document_id,
            language: language.into(),
            kind,
        }
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "document {} / {} / {}", self.document_id, self.language, self.kind)
    }
}

/// Translated content written back to a variant row
#[derive(Debug, Clone, PartialEq)]
pub enum VariantPayload {
    File(Vec<u8>),
    Metadata(Value),
}

impl VariantPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            VariantPayload::File(_) => PayloadKind::File,
            VariantPayload::Metadata(_) => PayloadKind::Metadata,
        }
    }
}

/// A retrieved artifact ready to be stored
#[derive(Debug, Clone)]
pub struct CompletedArtifact {
    pub key: VariantKey,
    /// Provider project the artifact came from, `"<id>-<pass>"`
    pub job_key: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub payload: VariantPayload,
    /// Extracted text to append to the document, file artifacts only
    pub search_text: Option<String>,
}

/// Effect of storing a completed artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionOutcome {
    /// The row was already complete before this write
    pub was_complete: bool,
    /// Search text was appended to the document by this write
    pub appended_search_text: bool,
}

/// Input for inserting a harvested document
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Source identifier (usually the landing page URL)
    pub identifier: String,
    pub file_name: String,
    pub file_type: String,
    pub file_data: Vec<u8>,
    pub metadata: Value,
}

/// Original source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: i64,
    pub identifier: String,
    /// File name without extension
    pub file_name: String,
    pub file_type: String,
    #[serde(skip)]
    pub file_data: Vec<u8>,
    pub file_size: i64,
    /// SHA256 of `file_data`
    pub content_hash: String,
    /// Accumulated extracted text of all translated files
    pub searchability: String,
    pub metadata: Value,
    pub publish_status: Option<PublishStatus>,
    pub published_record_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl DocumentRecord {
    /// Key under which the original file is uploaded
    pub fn file_key(&self) -> String {
        if self.file_type.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}.{}", self.file_name, self.file_type)
        }
    }
}

/// One target language's translated file or metadata for a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantRecord {
    pub id: i64,
    pub document_id: i64,
    pub language: String,
    pub kind: PayloadKind,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    /// Translated binary (file kind only)
    #[serde(skip)]
    pub file_data: Option<Vec<u8>>,
    /// Translated metadata (metadata kind only)
    pub metadata: Option<Value>,
    pub project_id: Option<String>,
    pub project_pass: Option<String>,
    pub project_status: Option<String>,
    pub job_status: Option<JobStatus>,
    pub download_status: Option<TransferStatus>,
    pub upload_status: Option<TransferStatus>,
    /// `None` while pending, `Some("complete")` once retrieved
    pub translate_status: Option<String>,
    pub failure_reason: Option<String>,
    pub dispatched_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl VariantRecord {
    pub fn is_accepted(&self) -> bool {
        self.project_status.as_deref() == Some(PROJECT_ACCEPTED)
    }

    pub fn is_complete(&self) -> bool {
        self.translate_status.as_deref() == Some(TRANSLATE_COMPLETE)
    }

    pub fn is_abandoned(&self) -> bool {
        self.job_status == Some(JobStatus::Failed) && !self.is_complete()
    }

    /// Complete or abandoned rows no longer block publication
    pub fn is_terminal(&self) -> bool {
        self.is_complete() || self.is_abandoned()
    }
}

/// Identifying data of a failed publish, kept for cleanup and retry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishFailureRecord {
    pub id: i64,
    pub document_id: i64,
    pub record_id: Option<String>,
    pub step: String,
    pub file_key: Option<String>,
    pub message: String,
    pub created_at: String,
}
