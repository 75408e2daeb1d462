use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::config::AppConfig;
use crate::xray::model::{
    AuthenticateBody, ImportBody, ImportData, RelayError, TokenResponse, UpdateTestRunsBody,
    UpdateTestRunsResponse, TestRunUpdate, ValidateBody, ValidateResponse,
};

#[derive(Error, Debug, Clone)]
pub enum XrayError {
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Transport(String),
    #[error("Xray Cloud credentials are not configured")]
    MissingCredentials,
}

impl XrayError {
    /// Structured status check first, message-substring fallback second.
    pub fn is_payload_too_large(&self) -> bool {
        match self {
            XrayError::Status { status, message } => {
                *status == StatusCode::PAYLOAD_TOO_LARGE.as_u16() || payload_message(message)
            }
            XrayError::Transport(message) => payload_message(message),
            XrayError::MissingCredentials => false,
        }
    }
}

fn payload_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("payload too large")
        || lowered.contains("payloadtoolarge")
        || lowered.contains("request entity too large")
}

impl From<reqwest::Error> for XrayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            XrayError::Transport(format!("request timed out: {}", error))
        } else if error.is_connect() {
            XrayError::Transport(format!("could not reach the backend: {}", error))
        } else {
            XrayError::Transport(error.to_string())
        }
    }
}

/// Client for the four relay operations the pipeline consumes.
pub trait XrayGateway {
    async fn authenticate(&self) -> Result<String, XrayError>;
    async fn import_execution(&self, token: &str, data: &ImportData) -> Result<Value, XrayError>;
    async fn update_test_runs(
        &self,
        token: &str,
        updates: &[TestRunUpdate],
    ) -> Result<UpdateTestRunsResponse, XrayError>;
    async fn validate_test_execution(
        &self,
        token: &str,
        key: &str,
    ) -> Result<ValidateResponse, XrayError>;
}

#[derive(Clone)]
pub struct XrayClient {
    client: Client,
    backend_url: String,
    xray_base_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl XrayClient {
    pub fn new(config: &AppConfig) -> Self {
        XrayClient {
            client: Client::new(),
            backend_url: config.backend_url.trim_end_matches('/').to_string(),
            xray_base_url: config.xray_base_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    fn credentials(&self) -> Result<(String, String, String), XrayError> {
        match (&self.xray_base_url, &self.client_id, &self.client_secret) {
            (Some(base_url), Some(id), Some(secret)) => {
                Ok((base_url.clone(), id.clone(), secret.clone()))
            }
            _ => Err(XrayError::MissingCredentials),
        }
    }

    fn base_url(&self) -> Result<String, XrayError> {
        self.xray_base_url.clone().ok_or(XrayError::MissingCredentials)
    }

    async fn post<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, XrayError> {
        let url = format!("{}{}", self.backend_url, path);
        info!("calling relay: {}", url);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            serde_json::from_str(&text).map_err(|error| {
                XrayError::Transport(format!("invalid response from {}: {}", path, error))
            })
        } else {
            info!("relay call failed: {} {}", status, text);
            Err(XrayError::Status {
                status: status.as_u16(),
                message: relay_message(status, &text),
            })
        }
    }
}

fn relay_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<RelayError>(body) {
        Ok(relayed) => match relayed.details {
            Some(details) => format!("{} ({})", relayed.error, details),
            None => relayed.error,
        },
        Err(_) => format!("HTTP {}: {}", status.as_u16(), truncate(body, 200)),
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

impl XrayGateway for XrayClient {
    async fn authenticate(&self) -> Result<String, XrayError> {
        let (xray_base_url, client_id, client_secret) = self.credentials()?;
        let body = AuthenticateBody {
            xray_base_url,
            client_id,
            client_secret,
        };
        let response: TokenResponse = self.post("/api/xray/authenticate", &body).await?;
        Ok(response.token)
    }

    async fn import_execution(&self, token: &str, data: &ImportData) -> Result<Value, XrayError> {
        let body = ImportBody {
            xray_base_url: self.base_url()?,
            token: token.to_string(),
            import_data: serde_json::to_value(data)
                .map_err(|error| XrayError::Transport(error.to_string()))?,
        };
        self.post("/api/xray/import", &body).await
    }

    async fn update_test_runs(
        &self,
        token: &str,
        updates: &[TestRunUpdate],
    ) -> Result<UpdateTestRunsResponse, XrayError> {
        let body = UpdateTestRunsBody {
            xray_base_url: self.base_url()?,
            token: token.to_string(),
            test_run_updates: updates.to_vec(),
        };
        self.post("/api/xray/update-test-runs-graphql", &body).await
    }

    async fn validate_test_execution(
        &self,
        token: &str,
        key: &str,
    ) -> Result<ValidateResponse, XrayError> {
        let body = ValidateBody {
            xray_base_url: self.base_url()?,
            token: token.to_string(),
            test_execution_key: key.to_string(),
        };
        let url = format!("{}/api/xray/validate-test-execution", self.backend_url);
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        // A known-invalid execution comes back as a validate response with
        // valid=false (404 for a missing key), not as a relay failure.
        if let Ok(parsed) = serde_json::from_str::<ValidateResponse>(&text) {
            return Ok(parsed);
        }
        if status.is_success() {
            return Err(XrayError::Transport(
                "invalid response from /api/xray/validate-test-execution".to_string(),
            ));
        }
        Err(XrayError::Status {
            status: status.as_u16(),
            message: relay_message(status, &text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_too_large_by_status() {
        let error = XrayError::Status {
            status: 413,
            message: "Import failed: 413 Payload Too Large".to_string(),
        };
        assert!(error.is_payload_too_large());
    }

    #[test]
    fn payload_too_large_by_message() {
        let error = XrayError::Status {
            status: 500,
            message: "upstream said: request entity too large".to_string(),
        };
        assert!(error.is_payload_too_large());
        let error = XrayError::Transport("PayloadTooLargeError: body limit".to_string());
        assert!(error.is_payload_too_large());
    }

    #[test]
    fn generic_errors_are_not_payload_too_large() {
        let error = XrayError::Status {
            status: 500,
            message: "Internal server error".to_string(),
        };
        assert!(!error.is_payload_too_large());
        assert!(!XrayError::MissingCredentials.is_payload_too_large());
    }

    #[test]
    fn relay_message_prefers_structured_body() {
        let message = relay_message(
            StatusCode::BAD_GATEWAY,
            r#"{"error":"Import failed: 502 Bad Gateway","details":"upstream"}"#,
        );
        assert_eq!(message, "Import failed: 502 Bad Gateway (upstream)");
        let message = relay_message(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert_eq!(message, "HTTP 502: <html>oops</html>");
    }
}
