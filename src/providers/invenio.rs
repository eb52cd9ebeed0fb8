use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, header};
use serde_json::{Value, json};
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{DraftRecord, FileLinks, RecordRepository};

/// Invenio client for the target content repository
#[derive(Debug)]
pub struct Invenio {
    /// HTTP client for API requests
    client: Client,
    /// Bearer token
    api_token: String,
    /// Repository base URL, without trailing slash
    endpoint: String,
}

impl Invenio {
    /// Create a new Invenio client
    ///
    /// Local repository instances commonly run with self-signed
    /// certificates, hence `accept_invalid_certs`.
    pub fn new(
        endpoint: impl Into<String>,
        api_token: impl Into<String>,
        accept_invalid_certs: bool,
        timeout_secs: u64,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();

        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .danger_accept_invalid_certs(accept_invalid_certs)
                .build()
                .unwrap_or_default(),
            api_token: api_token.into(),
            endpoint,
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(header::ACCEPT, "application/json")
            .bearer_auth(&self.api_token)
    }

    async fn send_json(&self, builder: RequestBuilder) -> Result<Value, ProviderError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            return Err(ProviderError::from_status(status.as_u16(), error_text));
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl RecordRepository for Invenio {
    async fn create_record(&self, payload: &Value) -> Result<DraftRecord, ProviderError> {
        let url = format!("{}/api/records", self.endpoint);
        debug!("Creating draft record at {}", url);

        let body = self
            .send_json(self.authorized(self.client.post(&url)).json(payload))
            .await?;
        parse_draft_record(&body)
    }

    async fn register_file(
        &self,
        draft: &DraftRecord,
        key: &str,
    ) -> Result<FileLinks, ProviderError> {
        let body = self
            .send_json(
                self.authorized(self.client.post(&draft.files_link))
                    .json(&json!([{ "key": key }])),
            )
            .await?;
        Ok(parse_file_links(&body, &draft.files_link, key))
    }

    async fn upload_content(&self, links: &FileLinks, data: &[u8]) -> Result<(), ProviderError> {
        self.send_json(
            self.authorized(self.client.put(&links.content))
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(data.to_vec()),
        )
        .await?;
        Ok(())
    }

    async fn commit_file(&self, links: &FileLinks) -> Result<(), ProviderError> {
        self.send_json(self.authorized(self.client.post(&links.commit)))
            .await?;
        Ok(())
    }

    async fn publish(&self, draft: &DraftRecord) -> Result<String, ProviderError> {
        let body = self
            .send_json(self.authorized(self.client.post(&draft.publish_link)))
            .await?;

        Ok(body
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| draft.id.clone()))
    }
}

/// Parse the record creation response
pub fn parse_draft_record(body: &Value) -> Result<DraftRecord, ProviderError> {
    let link = |name: &str| {
        body.pointer(&format!("/links/{}", name))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::ParseError(format!("missing 'links.{}'", name)))
    };

    let files_link = link("files")?;
    let publish_link = link("publish")?;
    let id = body
        .get("id")
        .and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| files_link.clone());

    Ok(DraftRecord {
        id,
        files_link,
        publish_link,
    })
}

/// Read per-file links from a registration response
///
/// Repositories that omit them follow the `{files}/{key}/content` layout.
pub fn parse_file_links(body: &Value, files_link: &str, key: &str) -> FileLinks {
    let entry_links = body
        .pointer("/entries/0/links")
        .or_else(|| body.pointer("/0/links"));
    let link = |name: &str, fallback: String| {
        entry_links
            .and_then(|links| links.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(fallback)
    };

    let base = files_link.trim_end_matches('/');
    FileLinks {
        content: link("content", format!("{}/{}/content", base, key)),
        commit: link("commit", format!("{}/{}/commit", base, key)),
    }
}
