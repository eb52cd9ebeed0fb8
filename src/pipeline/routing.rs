/*!
 * Table-driven routing of retrieved artifacts.
 *
 * Every `(language, kind)` pair a run can produce maps to one handler that
 * turns the downloaded bytes into a store payload. The standard table covers
 * `ROUTED_LANGUAGES`; configured target languages outside it are rejected
 * before any work starts.
 */

use anyhow::{Result, anyhow};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::database::models::{PayloadKind, VariantPayload};
use crate::errors::PipelineError;

/// A downloaded artifact before it is written to the store
#[derive(Debug, Clone)]
pub struct RetrievedArtifact {
    pub language: String,
    /// File name as served by the provider, without language prefix
    pub file_name: String,
    /// Lowercase extension of `file_name`, empty when it has none
    pub extension: String,
    pub bytes: Vec<u8>,
}

impl RetrievedArtifact {
    pub fn new(language: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        Self {
            language: language.into(),
            file_name,
            extension,
            bytes,
        }
    }

    pub fn kind(&self) -> PayloadKind {
        PayloadKind::from_extension(&self.extension)
    }
}

/// Target languages the standard table has routes for
pub const ROUTED_LANGUAGES: &[&str] = &[
    "ar-SA", "de-DE", "en-GB", "en-US", "es-ES", "fr-FR", "it-IT", "ja-JP", "pt-BR", "pt-PT",
    "ru-RU", "zh-CN",
];

/// Converts an artifact into the payload of its variant row
pub type RouteHandler = fn(&RetrievedArtifact) -> Result<VariantPayload, PipelineError>;

/// `(language, kind)` to handler map
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: BTreeMap<(String, PayloadKind), RouteHandler>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table storing binaries as files and parsing JSON as metadata for
    /// every routed language
    pub fn standard() -> Self {
        let mut table = Self::new();
        for language in ROUTED_LANGUAGES {
            table.register(language, PayloadKind::File, store_file);
            table.register(language, PayloadKind::Metadata, parse_metadata);
        }
        table
    }

    pub fn register(&mut self, language: &str, kind: PayloadKind, handler: RouteHandler) {
        self.routes.insert((language.to_string(), kind), handler);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Check that every language has a handler for every payload kind
    pub fn validate(&self, languages: &[String]) -> Result<()> {
        let missing: Vec<String> = languages
            .iter()
            .flat_map(|language| PayloadKind::ALL.iter().map(move |kind| (language, *kind)))
            .filter(|(language, kind)| !self.routes.contains_key(&(language.to_string(), *kind)))
            .map(|(language, kind)| format!("{}/{}", language, kind))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("No artifact route for: {}", missing.join(", ")))
        }
    }

    /// Classify and convert an artifact
    pub fn route(&self, artifact: &RetrievedArtifact) -> Result<VariantPayload, PipelineError> {
        let kind = artifact.kind();
        let handler = self
            .routes
            .get(&(artifact.language.clone(), kind))
            .ok_or_else(|| {
                PipelineError::DataShape(format!(
                    "No route for language '{}' and kind {}",
                    artifact.language, kind
                ))
            })?;
        handler(artifact)
    }
}

/// Keep the translated binary as is
pub fn store_file(artifact: &RetrievedArtifact) -> Result<VariantPayload, PipelineError> {
    Ok(VariantPayload::File(artifact.bytes.clone()))
}

/// Parse translated metadata, which must be a JSON object
pub fn parse_metadata(artifact: &RetrievedArtifact) -> Result<VariantPayload, PipelineError> {
    let value: Value = serde_json::from_slice(&artifact.bytes).map_err(|e| {
        PipelineError::DataShape(format!(
            "Metadata artifact '{}' is not JSON: {}",
            artifact.file_name, e
        ))
    })?;

    if !value.is_object() {
        return Err(PipelineError::DataShape(format!(
            "Metadata artifact '{}' is not a JSON object",
            artifact.file_name
        )));
    }

    Ok(VariantPayload::Metadata(value))
}
