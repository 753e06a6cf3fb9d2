use axum::http::StatusCode;

use invoice_copilot::application::ports::RepositoryError;
use invoice_copilot::application::services::LedgerError;
use invoice_copilot::domain::JobId;
use invoice_copilot::presentation::handlers::ApiError;

#[test]
fn given_missing_job_when_mapping_then_not_found() {
    let error: ApiError = LedgerError::NotFound(JobId::new()).into();

    assert_eq!(error.status, StatusCode::NOT_FOUND);
}

#[test]
fn given_lost_connection_when_mapping_then_service_unavailable() {
    let error: ApiError = RepositoryError::ConnectionFailed("reset".to_string()).into();

    assert_eq!(error.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error.code, "storage_unavailable");
}
