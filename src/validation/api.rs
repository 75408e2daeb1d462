use axum::extract::{Path, State};

use crate::api::{ApiResponse, AppError, AppState};
use crate::session::{read_session, with_session};
use crate::validation::model::ValidationOutcome;
use crate::validation::service::validate_execution;

/// Validates a test execution and, when it checks out, stores the snapshot
/// and reclassifies whatever files are already selected. Invalid executions
/// are a structured `valid:false` outcome, not an error response.
pub async fn validate(
    Path(key): Path<String>,
    State(app_state): State<AppState>,
) -> Result<ApiResponse<ValidationOutcome>, AppError> {
    let import_running =
        read_session(&app_state.session, |session| session.import_running());
    if import_running {
        return Err(AppError::Processing(
            "an import is in progress".to_string(),
        ));
    }
    if !app_state.config.has_credentials() {
        return Err(AppError::Validation(
            "Xray Cloud credentials are not configured; set XRAY_BASE_URL, XRAY_CLIENT_ID and XRAY_CLIENT_SECRET"
                .to_string(),
        ));
    }
    let key = key.trim().to_uppercase();
    if key.is_empty() {
        return Err(AppError::Validation(
            "test execution key is required".to_string(),
        ));
    }
    let (outcome, snapshot) = validate_execution(app_state.xray.as_ref(), &key).await;
    if let Some(snapshot) = snapshot {
        with_session(&app_state.session, |session| {
            session
                .set_validation(&app_state.classifier, snapshot)
                .map_err(AppError::from)
        })?;
    }
    Ok(ApiResponse(outcome))
}
