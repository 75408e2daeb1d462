use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::api::{ApiResponse, AppError, AppState};
use crate::classifier::model::{SelectionReport, UploadFile};
use crate::session::{read_session, with_session};

/// Replaces the current selection with the uploaded files and classifies
/// them against the validated execution (when there is one).
pub async fn upload_files(
    State(app_state): State<AppState>,
    mut multipart: Multipart,
) -> Result<ApiResponse<SelectionReport>, AppError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| AppError::Validation(format!("unreadable multipart field: {}", error)))?
    {
        let name = field
            .file_name()
            .map(str::to_string)
            .or_else(|| field.name().map(str::to_string));
        let Some(name) = name else { continue };
        let data = field
            .bytes()
            .await
            .map_err(|error| AppError::Internal(format!("failed to read {}: {}", name, error)))?;
        files.push(UploadFile::from_bytes(name, data.to_vec()));
    }
    if files.is_empty() {
        return Err(AppError::Validation("no files provided".to_string()));
    }
    with_session(&app_state.session, |session| {
        session
            .set_selection(&app_state.classifier, files)
            .map_err(AppError::from)?;
        Ok(ApiResponse(session.selection_report()))
    })
}

pub async fn get_files(State(app_state): State<AppState>) -> ApiResponse<SelectionReport> {
    ApiResponse(read_session(&app_state.session, |session| {
        session.selection_report()
    }))
}

pub async fn clear_files(State(app_state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    with_session(&app_state.session, |session| {
        session.clear_selection().map_err(AppError::from)
    })?;
    Ok(StatusCode::NO_CONTENT)
}
