/*!
 * Error types for the transpub pipeline.
 *
 * `ProviderError` describes what went wrong talking to an external API.
 * `PipelineError` classifies a failure the way the scheduler acts on it:
 * retry, mark the job terminal, skip a field, or abort the publish.
 */

use std::fmt;
use thiserror::Error;

/// Errors that can occur when talking to the translation provider or the
/// target repository
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The request never produced a response
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// The response body could not be decoded or lacked expected keys
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// The API answered with a non-success status
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
}

impl ProviderError {
    /// Whether repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RequestFailed(_) | ProviderError::ConnectionError(_) => true,
            ProviderError::ApiError { status_code, .. } => {
                *status_code >= 500 || *status_code == 429 || *status_code == 408
            }
            ProviderError::ParseError(_) | ProviderError::AuthenticationError(_) => false,
        }
    }

    /// Build an error from a non-success HTTP status
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status_code == 401 || status_code == 403 {
            ProviderError::AuthenticationError(message)
        } else {
            ProviderError::ApiError { status_code, message }
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() || error.is_timeout() {
            ProviderError::ConnectionError(error.to_string())
        } else if error.is_decode() {
            ProviderError::ParseError(error.to_string())
        } else if let Some(status) = error.status() {
            ProviderError::from_status(status.as_u16(), error.to_string())
        } else {
            ProviderError::RequestFailed(error.to_string())
        }
    }
}

/// Steps of the publish transaction, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStep {
    Create,
    RegisterFiles,
    Upload,
    Commit,
    Release,
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishStep::Create => write!(f, "CREATE"),
            PublishStep::RegisterFiles => write!(f, "REGISTER_FILES"),
            PublishStep::Upload => write!(f, "UPLOAD"),
            PublishStep::Commit => write!(f, "COMMIT"),
            PublishStep::Release => write!(f, "RELEASE"),
        }
    }
}

/// A failed publish step with enough context to clean up the draft record
#[derive(Debug)]
pub struct PublishStepFailure {
    /// Draft record id, `None` when CREATE itself failed
    pub record_id: Option<String>,
    pub step: PublishStep,
    /// File key being processed when the step failed
    pub file: Option<String>,
    pub source: ProviderError,
}

impl fmt::Display for PublishStepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}", self.step)?;
        if let Some(record_id) = &self.record_id {
            write!(f, " on record {}", record_id)?;
        }
        if let Some(file) = &self.file {
            write!(f, " for file '{}'", file)?;
        }
        write!(f, ": {}", self.source)
    }
}

/// Classification used when reporting terminal failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransportError,
    ProviderJobFailure,
    DataShapeError,
    DownloadError,
    PublishStepFailure,
    StoreError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::TransportError => "TransportError",
            ErrorKind::ProviderJobFailure => "ProviderJobFailure",
            ErrorKind::DataShapeError => "DataShapeError",
            ErrorKind::DownloadError => "DownloadError",
            ErrorKind::PublishStepFailure => "PublishStepFailure",
            ErrorKind::StoreError => "StoreError",
        };
        write!(f, "{}", name)
    }
}

/// Errors raised by pipeline components
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Network or HTTP-layer failure, retryable
    #[error("Transport error: {0}")]
    Transport(#[from] ProviderError),

    /// The provider reported the job as failed; terminal for that job only
    #[error("Provider job failure: {0}")]
    ProviderJobFailure(String),

    /// Provider or metadata payload had an unexpected shape
    #[error("Malformed payload: {0}")]
    DataShape(String),

    /// Artifact download answered with a non-success status
    #[error("Download of {url} failed with status {status}")]
    Download { status: u16, url: String },

    /// A step of the publish transaction failed
    #[error("Publish failed at {0}")]
    PublishStep(PublishStepFailure),

    /// The document store could not be read or written
    #[error("Store error: {0}")]
    Store(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Transport(_) => ErrorKind::TransportError,
            PipelineError::ProviderJobFailure(_) => ErrorKind::ProviderJobFailure,
            PipelineError::DataShape(_) => ErrorKind::DataShapeError,
            PipelineError::Download { .. } => ErrorKind::DownloadError,
            PipelineError::PublishStep(_) => ErrorKind::PublishStepFailure,
            PipelineError::Store(_) => ErrorKind::StoreError,
        }
    }

    /// Store failures abort the whole run, everything else stays per item
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Store(_))
    }

    /// Classify a provider error: missing keys are a data problem, anything
    /// else happened on the wire
    pub fn from_provider(error: ProviderError) -> Self {
        match error {
            ProviderError::ParseError(message) => PipelineError::DataShape(message),
            other => PipelineError::Transport(other),
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(error: anyhow::Error) -> Self {
        Self::Store(format!("{:#}", error))
    }
}

impl From<PublishStepFailure> for PipelineError {
    fn from(failure: PublishStepFailure) -> Self {
        Self::PublishStep(failure)
    }
}
