use axum::extract::State;
use axum::Json;
use uuid::Uuid;

use crate::api::{ApiResponse, AppError, AppState};
use crate::import::model::{ImportStarted, ImportState, ImportStatusView};
use crate::import::service::{run_import, spawn_display_ticker, ImportCommand};
use crate::session::{read_session, with_session};

pub async fn start_import(
    State(app_state): State<AppState>,
) -> Result<ApiResponse<ImportStarted>, AppError> {
    if !app_state.config.has_credentials() {
        return Err(AppError::Validation(
            "Xray Cloud credentials are not configured; set XRAY_BASE_URL, XRAY_CLIENT_ID and XRAY_CLIENT_SECRET"
                .to_string(),
        ));
    }
    let command = with_session(&app_state.session, |session| {
        if session.import_running() {
            return Err(AppError::Processing(
                "an import is already in progress".to_string(),
            ));
        }
        let snapshot = session
            .validation()
            .cloned()
            .ok_or_else(|| AppError::Validation("validate a test execution first".to_string()))?;
        let groups = session
            .classification()
            .map(|classification| classification.groups.clone())
            .unwrap_or_default();
        if groups.is_empty() {
            return Err(AppError::Validation(
                "no valid files to import".to_string(),
            ));
        }
        let total = groups.len();
        session
            .begin_import(total)
            .map_err(AppError::from)?;
        let execution_key = snapshot.execution.key.clone();
        Ok(ImportCommand {
            import_id: Uuid::new_v4().to_string(),
            summary: format!("Evidence and status upload for {}", execution_key),
            execution_key,
            groups,
            snapshot,
        })
    })?;

    let started = ImportStarted {
        import_id: command.import_id.clone(),
        total_runs: command.groups.len(),
    };
    spawn_display_ticker(app_state.session.clone());
    let gateway = app_state.xray.clone();
    let session = app_state.session.clone();
    tokio::spawn(async move {
        run_import(gateway.as_ref(), session, command).await;
    });
    Ok(ApiResponse(started))
}

pub async fn import_progress(State(app_state): State<AppState>) -> Json<ImportStatusView> {
    let view = read_session(&app_state.session, |session| {
        ImportStatusView::from(session.import_state())
    });
    Json(view)
}

pub async fn dismiss_import(State(app_state): State<AppState>) -> Result<ApiResponse<ImportStatusView>, AppError> {
    with_session(&app_state.session, |session| {
        if matches!(session.import_state(), ImportState::Idle) {
            return Err(AppError::NotFound(
                "no finished import to dismiss".to_string(),
            ));
        }
        session.dismiss_import().map_err(AppError::from)?;
        Ok(ApiResponse(ImportStatusView::from(session.import_state())))
    })
}
