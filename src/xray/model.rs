use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::evidence::model::Evidence;

/// Body of `POST /api/xray/authenticate`.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateBody {
    pub xray_base_url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TokenResponse {
    pub token: String,
}

/// Error body relayed by the backend, carrying the upstream status.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RelayError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Body of `POST /api/xray/import`. The relay treats `import_data` as
/// opaque JSON and forwards it verbatim.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ImportBody {
    pub xray_base_url: String,
    pub token: String,
    pub import_data: Value,
}

/// The Xray multipart-execution import payload.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ImportData {
    pub test_execution_key: String,
    pub info: ImportInfo,
    pub tests: Vec<TestResult>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ImportInfo {
    pub summary: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_key: String,
    pub status: String,
    pub start: String,
    pub finish: String,
    pub evidences: Vec<Evidence>,
}

/// Body of `POST /api/xray/update-test-runs-graphql`.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTestRunsBody {
    pub xray_base_url: String,
    pub token: String,
    pub test_run_updates: Vec<TestRunUpdate>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestRunUpdate {
    pub test_run_id: String,
    pub status: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TestRunAck {
    pub test_run_id: String,
    pub success: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TestRunFault {
    pub test_run_id: String,
    pub error: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UpdateSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UpdateTestRunsResponse {
    pub success: bool,
    #[serde(default)]
    pub results: Vec<TestRunAck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<TestRunFault>>,
    pub summary: UpdateSummary,
}

/// Body of `POST /api/xray/validate-test-execution`.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ValidateBody {
    pub xray_base_url: String,
    pub token: String,
    pub test_execution_key: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ExecutionInfo {
    pub key: String,
    pub summary: String,
    pub status: Option<String>,
}

/// One test run as normalized by the relay's validate operation.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub status_color: String,
    #[serde(default)]
    pub status_description: String,
    pub assignee_id: Option<String>,
    pub executed_by_id: Option<String>,
    pub started_on: Option<String>,
    pub finished_on: Option<String>,
    pub comment: Option<String>,
    pub test: TestInfo,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TestInfo {
    pub key: String,
    pub summary: String,
    pub test_type: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TestRunPage {
    pub total: usize,
    pub results: Vec<TestRun>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusEntry {
    pub id: String,
    pub test_key: String,
    pub status: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_execution: Option<ExecutionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_runs: Option<TestRunPage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_ids_and_statuses: Option<Vec<RunStatusEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_summary: Option<BTreeMap<String, u32>>,
}

impl ValidateResponse {
    pub fn failure(error: String) -> ValidateResponse {
        ValidateResponse {
            valid: false,
            error: Some(error),
            test_execution: None,
            test_runs: None,
            test_ids_and_statuses: None,
            status_summary: None,
        }
    }
}
