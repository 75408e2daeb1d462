use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;

use crate::classifier;
use crate::classifier::service::Classifier;
use crate::config::AppConfig;
use crate::import;
use crate::proxy;
use crate::proxy::service::UpstreamClient;
use crate::session::{Session, SharedSession, StateError};
use crate::validation;
use crate::xray::client::XrayClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub classifier: Arc<Classifier>,
    pub xray: Arc<XrayClient>,
    pub upstream: Arc<UpstreamClient>,
    pub session: SharedSession,
}

pub async fn build_api(config: AppConfig) -> Router {
    tracing_subscriber::fmt::init();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let classifier = Arc::new(Classifier::new(&config.project_key));
    let xray = Arc::new(XrayClient::new(&config));
    let app_state = AppState {
        config: Arc::new(config),
        classifier,
        xray,
        upstream: Arc::new(UpstreamClient::new()),
        session: Arc::new(RwLock::new(Session::default())),
    };

    Router::new()
        .route("/executions/:key/validate", post(validation::api::validate))
        .route(
            "/files",
            post(classifier::api::upload_files)
                .get(classifier::api::get_files)
                .delete(classifier::api::clear_files),
        )
        .route(
            "/import",
            post(import::api::start_import).delete(import::api::dismiss_import),
        )
        .route("/import/progress", get(import::api::import_progress))
        .route("/api/xray/authenticate", post(proxy::api::authenticate))
        .route("/api/xray/import", post(proxy::api::import_execution))
        .route(
            "/api/xray/update-test-runs-graphql",
            post(proxy::api::update_test_runs),
        )
        .route(
            "/api/xray/validate-test-execution",
            post(proxy::api::validate_test_execution),
        )
        .route("/health", get(health))
        .layer(cors)
        .layer(DefaultBodyLimit::max(104857600))
        .layer(TraceLayer::new_for_http()
            .make_span_with(
                DefaultMakeSpan::new().include_headers(true))
            .on_request(
                DefaultOnRequest::new()
                    .level(Level::INFO))
            .on_response(
                DefaultOnResponse::new()
                    .level(Level::INFO)
                    .latency_unit(LatencyUnit::Micros)
            ))
        .with_state(app_state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub struct ApiResponse<T>(pub T);

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        match serde_json::to_string(&self.0) {
            Ok(json) => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(json.into())
                .unwrap(),
            Err(_) => Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body("Failed to serialize response".into())
                .unwrap(),
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Validation(String),
    Processing(String),
    Internal(String),
}

impl From<StateError> for AppError {
    fn from(error: StateError) -> AppError {
        match error {
            StateError::ImportInProgress => {
                AppError::Processing("an import is in progress".to_string())
            }
        }
    }
}

#[derive(Deserialize, Serialize, Clone)]
pub struct ErrorBody {
    pub message: String,
}

impl Into<Body> for ErrorBody {
    fn into(self) -> Body {
        Body::from(serde_json::to_string(&self).unwrap())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound(message) => {
                Response::builder()
                    .status(404)
                    .header("Content-Type", "application/json")
                    .body(ErrorBody { message }.into())
                    .unwrap()
            }
            AppError::Validation(message) => {
                Response::builder()
                    .status(400)
                    .header("Content-Type", "application/json")
                    .body(ErrorBody { message }.into())
                    .unwrap()
            }
            AppError::Processing(message) => {
                Response::builder()
                    .status(422)
                    .header("Content-Type", "application/json")
                    .body(ErrorBody { message }.into())
                    .unwrap()
            }
            AppError::Internal(message) => {
                tracing::error!("{}", message);
                Response::builder()
                    .status(500)
                    .header("Content-Type", "application/json")
                    .body(ErrorBody { message: "Internal server error".to_string() }.into())
                    .unwrap()
            }
        }
    }
}
