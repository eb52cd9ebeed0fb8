use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, multipart};
use serde_json::Value;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{
    DownloadedArtifact, JobRef, ProjectState, ProjectSubmission, SubmittedProject,
    TranslationProvider,
};

static CONTENT_DISPOSITION_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"filename="(.+?)""#).expect("valid filename regex"));

/// Provider statuses that mean the project will never finish
const FAILED_STATUSES: [&str; 3] = ["FAIL", "ERROR", "CANCELLED"];

/// MateCat client for interacting with the translation provider API
#[derive(Debug)]
pub struct Matecat {
    /// Base URL of the API, ending with '/'
    base_url: String,
    /// API key sent as `x-matecat-key`
    api_key: String,
    /// HTTP client for making requests
    client: Client,
}

impl Matecat {
    /// Create a new client
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Self {
            base_url,
            api_key: api_key.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let response = self
            .client
            .get(url)
            .header("accept", "application/json")
            .header("x-matecat-key", &self.api_key)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            return Err(ProviderError::from_status(status.as_u16(), error_text));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl TranslationProvider for Matecat {
    async fn create_project(
        &self,
        submission: &ProjectSubmission,
    ) -> Result<SubmittedProject, ProviderError> {
        let url = format!("{}api/v1/new", self.base_url);
        debug!(
            "Submitting '{}' to {} for {}",
            submission.file_name, url, submission.target_language
        );

        let file_part = multipart::Part::bytes(submission.content.clone())
            .file_name(submission.file_name.clone());
        let form = multipart::Form::new()
            .part("files", file_part)
            .text("project_name", submission.project_name.clone())
            .text("source_lang", submission.source_language.clone())
            .text("target_lang", submission.target_language.clone());

        let response = self
            .client
            .post(&url)
            .header("accept", "application/json")
            .header("x-matecat-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            return Err(ProviderError::from_status(status.as_u16(), error_text));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        parse_new_project(&body, status.as_u16())
    }

    async fn project_status(
        &self,
        project_id: &str,
        project_pass: &str,
    ) -> Result<ProjectState, ProviderError> {
        let url = format!("{}api/status/", self.base_url);
        let body = self
            .get_json(&url, &[("id_project", project_id), ("project_pass", project_pass)])
            .await?;
        parse_project_status(&body)
    }

    async fn job_download_urls(&self, job: &JobRef) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}api/v2/jobs/{}/{}", self.base_url, job.id, job.password);
        let body = self.get_json(&url, &[]).await?;
        parse_job_download_urls(&body)
    }

    async fn download(&self, url: &str) -> Result<DownloadedArtifact, ProviderError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), error_text));
        }

        let file_name = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(filename_from_content_disposition);

        let bytes = response.bytes().await?;

        Ok(DownloadedArtifact {
            url: url.to_string(),
            file_name,
            bytes: bytes.to_vec(),
        })
    }
}

/// Read the quoted file name out of a Content-Disposition header
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    CONTENT_DISPOSITION_FILENAME
        .captures(header)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|name| !name.is_empty())
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse the answer to a project submission
pub fn parse_new_project(body: &Value, http_status: u16) -> Result<SubmittedProject, ProviderError> {
    let status = body.get("status").and_then(Value::as_str).unwrap_or("");
    if status != "OK" {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("project was not accepted");
        return Err(ProviderError::ApiError {
            status_code: http_status,
            message: format!("{} ({})", message, status),
        });
    }

    let project_id = body
        .get("id_project")
        .and_then(id_to_string)
        .ok_or_else(|| ProviderError::ParseError("missing 'id_project'".to_string()))?;
    let project_pass = body
        .get("project_pass")
        .and_then(id_to_string)
        .ok_or_else(|| ProviderError::ParseError("missing 'project_pass'".to_string()))?;

    Ok(SubmittedProject {
        project_id,
        project_pass,
    })
}

/// Parse the project status document
pub fn parse_project_status(body: &Value) -> Result<ProjectState, ProviderError> {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::ParseError("missing 'status'".to_string()))?;

    let reported_error = body
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
        .map(|error| {
            error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string())
        });

    if FAILED_STATUSES.contains(&status) || (status != "DONE" && reported_error.is_some()) {
        return Ok(ProjectState::Failed {
            reason: reported_error.unwrap_or_else(|| format!("provider status {}", status)),
        });
    }

    if status != "DONE" {
        return Ok(ProjectState::InProgress {
            status: status.to_string(),
        });
    }

    let langpair = body
        .pointer("/jobs/langpairs")
        .and_then(Value::as_object)
        .and_then(|pairs| pairs.values().next())
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::ParseError("missing 'jobs.langpairs'".to_string()))?
        .to_string();

    let job_map = body
        .pointer("/data/jobs")
        .and_then(Value::as_object)
        .ok_or_else(|| ProviderError::ParseError("missing 'data.jobs'".to_string()))?;

    let mut jobs = Vec::with_capacity(job_map.len());
    for (job_id, details) in job_map {
        let password = details
            .get("totals")
            .and_then(Value::as_object)
            .and_then(|totals| totals.keys().next())
            .ok_or_else(|| {
                ProviderError::ParseError(format!("missing 'totals' for job {}", job_id))
            })?;
        jobs.push(JobRef {
            id: job_id.clone(),
            password: password.clone(),
        });
    }

    Ok(ProjectState::Done { langpair, jobs })
}

/// Parse a job document into one download URL per chunk
pub fn parse_job_download_urls(body: &Value) -> Result<Vec<String>, ProviderError> {
    let chunks = body
        .pointer("/job/chunks")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::ParseError("missing 'job.chunks'".to_string()))?;

    let urls = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            chunk
                .pointer("/urls/translation_download_url")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    ProviderError::ParseError(format!(
                        "missing 'urls.translation_download_url' in chunk {}",
                        i
                    ))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if urls.is_empty() {
        return Err(ProviderError::ParseError("job has no chunks".to_string()));
    }

    Ok(urls)
}
