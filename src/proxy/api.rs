use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::AppState;
use crate::proxy::service::UpstreamError;
use crate::xray::model::{TestRunUpdate, UpdateTestRunsResponse};

/// Relay failure body: `{error, details?}` with the upstream status code
/// passed through.
pub struct RelayFailure {
    status: StatusCode,
    error: String,
    details: Option<String>,
}

impl RelayFailure {
    fn bad_request(message: String) -> RelayFailure {
        RelayFailure {
            status: StatusCode::BAD_REQUEST,
            error: message,
            details: None,
        }
    }
}

impl From<UpstreamError> for RelayFailure {
    fn from(error: UpstreamError) -> RelayFailure {
        match error {
            UpstreamError::Upstream {
                status,
                error,
                details,
            } => RelayFailure {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                error,
                details,
            },
            UpstreamError::Transport(message) => RelayFailure {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                error: "Internal server error".to_string(),
                details: Some(message),
            },
        }
    }
}

impl IntoResponse for RelayFailure {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.error });
        if let Some(details) = self.details {
            body["details"] = Value::String(details);
        }
        (self.status, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatePayload {
    xray_base_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

pub async fn authenticate(
    State(app_state): State<AppState>,
    Json(payload): Json<AuthenticatePayload>,
) -> Result<Json<Value>, RelayFailure> {
    let (Some(base_url), Some(client_id), Some(client_secret)) = (
        payload.xray_base_url,
        payload.client_id,
        payload.client_secret,
    ) else {
        return Err(RelayFailure::bad_request(
            "Missing required parameters: xrayBaseUrl, clientId, clientSecret".to_string(),
        ));
    };
    let token = app_state
        .upstream
        .authenticate(&base_url, &client_id, &client_secret)
        .await?;
    Ok(Json(json!({ "token": token })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPayload {
    xray_base_url: Option<String>,
    token: Option<String>,
    import_data: Option<Value>,
}

pub async fn import_execution(
    State(app_state): State<AppState>,
    Json(payload): Json<ImportPayload>,
) -> Result<Json<Value>, RelayFailure> {
    let mut missing = Vec::new();
    if payload.xray_base_url.is_none() {
        missing.push("xrayBaseUrl");
    }
    if payload.token.is_none() {
        missing.push("token");
    }
    if payload.import_data.is_none() {
        missing.push("importData");
    }
    if !missing.is_empty() {
        return Err(RelayFailure::bad_request(format!(
            "Missing required parameters: {}",
            missing.join(", ")
        )));
    }
    let response = app_state
        .upstream
        .import_execution(
            &payload.xray_base_url.unwrap(),
            &payload.token.unwrap(),
            &payload.import_data.unwrap(),
        )
        .await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTestRunsPayload {
    xray_base_url: Option<String>,
    token: Option<String>,
    test_run_updates: Option<Vec<TestRunUpdate>>,
}

pub async fn update_test_runs(
    State(app_state): State<AppState>,
    Json(payload): Json<UpdateTestRunsPayload>,
) -> Result<Json<UpdateTestRunsResponse>, RelayFailure> {
    let (Some(base_url), Some(token), Some(updates)) = (
        payload.xray_base_url,
        payload.token,
        payload.test_run_updates,
    ) else {
        return Err(RelayFailure::bad_request(
            "Missing required parameters: xrayBaseUrl, token, testRunUpdates (array)".to_string(),
        ));
    };
    let response = app_state
        .upstream
        .update_test_runs(&base_url, &token, &updates)
        .await;
    Ok(Json(response))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePayload {
    xray_base_url: Option<String>,
    token: Option<String>,
    test_execution_key: Option<String>,
}

pub async fn validate_test_execution(
    State(app_state): State<AppState>,
    Json(payload): Json<ValidatePayload>,
) -> Result<Response, RelayFailure> {
    let mut missing = Vec::new();
    if payload.xray_base_url.is_none() {
        missing.push("xrayBaseUrl");
    }
    if payload.token.is_none() {
        missing.push("token");
    }
    if payload.test_execution_key.is_none() {
        missing.push("testExecutionKey");
    }
    if !missing.is_empty() {
        return Err(RelayFailure::bad_request(format!(
            "Missing required parameters: {}",
            missing.join(", ")
        )));
    }
    let (status, body) = app_state
        .upstream
        .validate_test_execution(
            &payload.xray_base_url.unwrap(),
            &payload.token.unwrap(),
            &payload.test_execution_key.unwrap(),
        )
        .await?;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    Ok((status, Json(body)).into_response())
}
