/*!
 * Metadata aggregation.
 *
 * Merges a document's own metadata with the metadata of every completed
 * translation into the single multilingual record sent to the repository.
 * Translations are merged in ascending language order, and serde_json maps
 * are ordered, so the same store state always yields the same bytes.
 */

use log::warn;
use serde_json::{Map, Value, json};

use crate::database::Repository;
use crate::database::models::{DocumentRecord, PayloadKind};
use crate::errors::PipelineError;

/// `additional_descriptions` type for translated descriptions
pub const DESCRIPTION_TYPE: &str = "other";

/// `additional_titles` type for translated titles
pub const TITLE_TYPE: &str = "alternative-title";

/// Record version sent with every payload
pub const RECORD_VERSION: &str = "v1";

/// Fields copied from the document's own metadata
const PRIMARY_FIELDS: [&str; 10] = [
    "creators",
    "description",
    "identifiers",
    "publication_date",
    "publisher",
    "contributors",
    "resource_type",
    "rights",
    "subjects",
    "title",
];

/// The object holding the record fields: `value.metadata` when present,
/// else `value` itself
fn record_fields(value: &Value) -> Option<&Map<String, Value>> {
    match value.get("metadata") {
        Some(Value::Object(inner)) => Some(inner),
        _ => value.as_object(),
    }
}

fn append_list(target: &mut Vec<Value>, fields: &Map<String, Value>, name: &str, language: &str) {
    match fields.get(name) {
        Some(Value::Array(items)) => target.extend(items.iter().cloned()),
        None | Some(Value::Null) => {}
        Some(_) => warn!("Ignoring {} of '{}' metadata: not a list", name, language),
    }
}

fn list_field(fields: &Map<String, Value>, name: &str) -> Vec<Value> {
    match fields.get(name) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            warn!("Ignoring {} of the original metadata: not a list", name);
            Vec::new()
        }
    }
}

/// Merge original metadata with translated metadata
///
/// `translations` pairs a language code with that language's metadata; it is
/// processed in ascending language order whatever order it comes in. Fields
/// with an unexpected shape are skipped with a warning.
pub fn build_payload(
    original: &Value,
    translations: &[(String, Value)],
    searchability: &str,
) -> Value {
    let empty = Map::new();
    let primary = record_fields(original).unwrap_or(&empty);

    let mut metadata = Map::new();
    for field in PRIMARY_FIELDS {
        if let Some(value) = primary.get(field) {
            metadata.insert(field.to_string(), value.clone());
        }
    }

    let mut creators = list_field(primary, "creators");
    let mut contributors = list_field(primary, "contributors");
    let mut rights = list_field(primary, "rights");
    let mut additional_descriptions = Vec::new();
    let mut additional_titles = Vec::new();
    let mut publisher = primary
        .get("publisher")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut ordered: Vec<&(String, Value)> = translations.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));

    for (language, value) in ordered {
        let Some(fields) = record_fields(value) else {
            warn!("Ignoring '{}' metadata: not a JSON object", language);
            continue;
        };

        append_list(&mut creators, fields, "creators", language);
        append_list(&mut contributors, fields, "contributors", language);
        append_list(&mut rights, fields, "rights", language);

        match fields.get("description") {
            Some(Value::String(description)) => additional_descriptions.push(json!({
                "description": description,
                "type": { "id": DESCRIPTION_TYPE }
            })),
            None | Some(Value::Null) => {}
            Some(_) => warn!("Ignoring description of '{}' metadata: not a string", language),
        }

        match fields.get("title") {
            Some(Value::String(title)) => additional_titles.push(json!({
                "title": title,
                "type": { "id": TITLE_TYPE }
            })),
            None | Some(Value::Null) => {}
            Some(_) => warn!("Ignoring title of '{}' metadata: not a string", language),
        }

        match fields.get("publisher") {
            Some(Value::String(extra)) if !extra.is_empty() => {
                if !publisher.is_empty() {
                    publisher.push(' ');
                }
                publisher.push_str(extra);
            }
            Some(Value::String(_)) | None | Some(Value::Null) => {}
            Some(_) => warn!("Ignoring publisher of '{}' metadata: not a string", language),
        }
    }

    metadata.insert("creators".to_string(), Value::Array(creators));
    metadata.insert("contributors".to_string(), Value::Array(contributors));
    metadata.insert("rights".to_string(), Value::Array(rights));
    metadata.insert("publisher".to_string(), Value::String(publisher));
    metadata.insert(
        "additional_descriptions".to_string(),
        Value::Array(additional_descriptions),
    );
    metadata.insert("additional_titles".to_string(), Value::Array(additional_titles));
    metadata.insert("version".to_string(), Value::String(RECORD_VERSION.to_string()));

    json!({
        "access": { "files": "public", "record": "public" },
        "files": { "enabled": true },
        "metadata": metadata,
        "custom_fields": { "invisible_search": searchability },
        "pids": {}
    })
}

/// Reads a document and its completed translations from the store
#[derive(Debug, Clone)]
pub struct Aggregator {
    store: Repository,
}

impl Aggregator {
    pub fn new(store: Repository) -> Self {
        Self { store }
    }

    /// Build the publish payload of a document from the current store state
    pub async fn aggregate(&self, document: &DocumentRecord) -> Result<Value, PipelineError> {
        let translations: Vec<(String, Value)> = self
            .store
            .list_completed_variants(document.id, PayloadKind::Metadata)
            .await?
            .into_iter()
            .filter_map(|row| row.metadata.map(|metadata| (row.language, metadata)))
            .collect();

        Ok(build_payload(
            &document.metadata,
            &translations,
            &document.searchability,
        ))
    }
}
