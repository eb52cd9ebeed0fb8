/*!
 * Harvest intake: turns source metadata records into stored documents.
 *
 * Records follow the Dublin Core shape of the harvesting collaborator: every
 * field is a list of strings and any of them may be missing.
 */

use anyhow::{Result, anyhow};
use chrono::NaiveDateTime;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;

use crate::database::Repository;
use crate::database::models::NewDocument;
use crate::file_utils::FileManager;

/// Placeholder used for missing creator names and titles
pub const NOT_AVAILABLE: &str = "N/A";

/// Timestamp layout used by the harvest source for dates
const SOURCE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A raw source metadata record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestRecord {
    pub creator: Vec<String>,
    pub date: Vec<String>,
    pub contributor: Vec<String>,
    pub description: Vec<String>,
    pub identifier: Vec<String>,
    pub title: Vec<String>,
    pub rights: Vec<String>,
    pub subject: Vec<String>,
    pub publisher: Vec<String>,
}

impl HarvestRecord {
    /// First identifier that is a URL
    pub fn landing_url(&self) -> Option<&str> {
        first_link(&self.identifier)
    }

    /// Stable key of the record: its landing URL, else its first identifier
    pub fn source_identifier(&self) -> Option<&str> {
        self.landing_url()
            .or_else(|| self.identifier.first().map(String::as_str))
            .filter(|id| !id.is_empty())
    }

    /// Short file name: first word of the title plus the last segment of the
    /// landing URL
    pub fn short_file_name(&self) -> String {
        let title_word = self
            .title
            .first()
            .and_then(|title| title.split_whitespace().next())
            .unwrap_or("document");
        let url_tail = self
            .landing_url()
            .and_then(|url| url.trim_end_matches('/').rsplit('/').next())
            .unwrap_or_default();
        format!("{}{}", title_word, url_tail)
    }
}

fn first_link(values: &[String]) -> Option<&str> {
    values
        .iter()
        .map(String::as_str)
        .find(|value| value.starts_with("http"))
}

fn personal(name: &str) -> Value {
    json!({ "person_or_org": { "family_name": name, "type": "personal" } })
}

/// Normalize a source date to `%Y-%m-%d`, keeping values in other layouts
pub fn normalize_date(raw: &str) -> String {
    NaiveDateTime::parse_from_str(raw, SOURCE_DATE_FORMAT)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Build the canonical metadata object stored with a document
pub fn canonical_metadata(record: &HarvestRecord, repository_name: &str) -> Value {
    let creators: Vec<Value> = if record.creator.is_empty() {
        vec![personal(NOT_AVAILABLE)]
    } else {
        record.creator.iter().map(|name| personal(name)).collect()
    };

    let contributors: Vec<Value> = record
        .contributor
        .iter()
        .map(|name| {
            json!({
                "person_or_org": { "type": "personal", "name": name, "family_name": name },
                "role": { "id": "other" }
            })
        })
        .collect();

    let rights: Vec<Value> = match record.rights.first() {
        Some(title) => vec![json!({
            "title": { "en": title },
            "link": first_link(&record.rights).unwrap_or_default()
        })],
        None => Vec::new(),
    };

    let subjects: Vec<Value> = record
        .subject
        .iter()
        .map(|subject| json!({ "subject": subject }))
        .collect();

    json!({
        "metadata": {
            "creators": creators,
            "description": record.description.first().cloned().unwrap_or_default(),
            "identifiers": [{
                "identifier": record.landing_url().unwrap_or_default(),
                "scheme": "other"
            }],
            "publication_date": record.date.first().map(|d| normalize_date(d)).unwrap_or_default(),
            "publisher": record.publisher.first().map(String::as_str).unwrap_or(repository_name),
            "contributors": contributors,
            "resource_type": { "id": "other" },
            "rights": rights,
            "subjects": subjects,
            "title": record.title.first().map(String::as_str).unwrap_or(NOT_AVAILABLE),
        }
    })
}

/// MIME types whose subtype is not the usual file extension
const KNOWN_CONTENT_TYPES: [(&str, &str); 4] = [
    ("text/plain", "txt"),
    ("application/vnd.openxmlformats-officedocument.wordprocessingml.document", "docx"),
    ("application/vnd.openxmlformats-officedocument.presentationml.presentation", "pptx"),
    ("application/msword", "doc"),
];

/// File extension from a Content-Type header value: `application/pdf;
/// charset=binary` yields `pdf`
pub fn extension_from_content_type(content_type: &str) -> String {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    if let Some((_, extension)) = KNOWN_CONTENT_TYPES.iter().find(|(known, _)| *known == mime) {
        return extension.to_string();
    }

    mime.rsplit('/').next().unwrap_or_default().to_string()
}

/// Content-Type for a file extension, the inverse of
/// `extension_from_content_type`
pub fn content_type_for_extension(extension: &str) -> String {
    let extension = extension.to_lowercase();
    KNOWN_CONTENT_TYPES
        .iter()
        .find(|(_, known)| *known == extension)
        .map(|(mime, _)| mime.to_string())
        .unwrap_or_else(|| format!("application/{}", extension))
}

/// Store a harvested record and its file, returning the document id
///
/// Ingesting a record whose identifier is already stored returns the
/// existing document unchanged.
pub async fn ingest(
    store: &Repository,
    record: &HarvestRecord,
    file_name: &str,
    bytes: Vec<u8>,
    content_type: &str,
    repository_name: &str,
) -> Result<i64> {
    let identifier = record
        .source_identifier()
        .ok_or_else(|| anyhow!("Harvest record has no identifier"))?
        .to_string();

    let file_type = extension_from_content_type(content_type);
    if file_type.is_empty() {
        return Err(anyhow!(
            "Cannot derive a file type from content type '{}'",
            content_type
        ));
    }

    let document = NewDocument {
        identifier: identifier.clone(),
        file_name: file_name.to_string(),
        file_type,
        file_data: bytes,
        metadata: canonical_metadata(record, repository_name),
    };

    let id = store.insert_document(&document).await?;
    debug!("Ingested '{}' as document {}", identifier, id);
    Ok(id)
}

/// Ingest every `<name>.json` record with a sibling `<name>.<ext>` file
/// found under `dir`; returns the document ids in path order
pub async fn ingest_directory(
    store: &Repository,
    dir: &Path,
    repository_name: &str,
) -> Result<Vec<i64>> {
    let pairs = FileManager::find_harvest_pairs(dir)?;
    info!("Found {} harvested record(s) in {:?}", pairs.len(), dir);

    let mut ids = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let record: HarvestRecord =
            serde_json::from_str(&FileManager::read_to_string(&pair.record_path)?)?;
        let bytes = FileManager::read_bytes(&pair.file_path)?;
        let content_type = content_type_for_extension(
            &pair
                .file_path
                .extension()
                .map(|ext| ext.to_string_lossy().to_string())
                .unwrap_or_default(),
        );

        let file_name = pair
            .file_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| record.short_file_name());

        ids.push(ingest(store, &record, &file_name, bytes, &content_type, repository_name).await?);
    }

    Ok(ids)
}
