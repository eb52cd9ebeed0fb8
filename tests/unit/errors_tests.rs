/*!
 * Tests for error classification
 */

use transpub::errors::{ErrorKind, PipelineError, ProviderError, PublishStep, PublishStepFailure};

fn api_error(status_code: u16) -> ProviderError {
    ProviderError::ApiError {
        status_code,
        message: "x".to_string(),
    }
}

#[test]
fn test_isRetryable_shouldOnlyRetryTransientFailures() {
    assert!(api_error(500).is_retryable());
    assert!(api_error(503).is_retryable());
    assert!(api_error(429).is_retryable());
    assert!(ProviderError::ConnectionError("reset".to_string()).is_retryable());

    assert!(!api_error(400).is_retryable());
    assert!(!api_error(404).is_retryable());
    assert!(!ProviderError::ParseError("missing".to_string()).is_retryable());
    assert!(!ProviderError::AuthenticationError("denied".to_string()).is_retryable());
}

#[test]
fn test_fromStatus_withAuthCodes_shouldBeAuthenticationError() {
    assert!(matches!(
        ProviderError::from_status(401, "no"),
        ProviderError::AuthenticationError(_)
    ));
    assert!(matches!(
        ProviderError::from_status(502, "bad gateway"),
        ProviderError::ApiError { status_code: 502, .. }
    ));
}

#[test]
fn test_fromProvider_shouldSeparateDataShapeFromTransport() {
    let shape = PipelineError::from_provider(ProviderError::ParseError("missing 'status'".to_string()));
    let transport = PipelineError::from_provider(api_error(500));

    assert_eq!(shape.kind(), ErrorKind::DataShapeError);
    assert_eq!(transport.kind(), ErrorKind::TransportError);
}

#[test]
fn test_isFatal_shouldOnlyHoldForStoreErrors() {
    let store: PipelineError = anyhow::anyhow!("disk I/O error").into();

    assert!(store.is_fatal());
    assert_eq!(store.kind(), ErrorKind::StoreError);
    assert!(!PipelineError::ProviderJobFailure("x".to_string()).is_fatal());
    assert!(
        !PipelineError::Download {
            status: 404,
            url: "u".to_string()
        }
        .is_fatal()
    );
}

#[test]
fn test_publishStepFailure_display_shouldNameRecordStepAndFile() {
    let failure = PublishStepFailure {
        record_id: Some("rec-7".to_string()),
        step: PublishStep::Upload,
        file: Some("fr-FR_report.docx".to_string()),
        source: api_error(500),
    };

    let text = PipelineError::from(failure).to_string();

    assert!(text.contains("UPLOAD"));
    assert!(text.contains("rec-7"));
    assert!(text.contains("fr-FR_report.docx"));
}
