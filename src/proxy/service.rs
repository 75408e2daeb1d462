use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::xray::model::{
    ExecutionInfo, RunStatusEntry, TestInfo, TestRun, TestRunAck, TestRunFault, TestRunPage,
    TestRunUpdate, UpdateSummary, UpdateTestRunsResponse, ValidateResponse,
};

pub const TEST_RUN_PAGE_SIZE: usize = 100;
const REQUIRED_EXECUTION_STATUS: &str = "In Progress";
const RUN_FIELDS: &str = "id status { name color description } assigneeId executedById startedOn finishedOn comment test { jira(fields: [\"key\", \"summary\"]) testType { name } }";

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("{error}")]
    Upstream {
        status: u16,
        error: String,
        details: Option<String>,
    },
    #[error("{0}")]
    Transport(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(error: reqwest::Error) -> Self {
        UpstreamError::Transport(error.to_string())
    }
}

/// Stateless forwarding client for the Xray Cloud REST/GraphQL endpoints.
pub struct UpstreamClient {
    client: Client,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        UpstreamClient::new()
    }
}

impl UpstreamClient {
    pub fn new() -> UpstreamClient {
        UpstreamClient {
            client: Client::new(),
        }
    }

    pub async fn authenticate(
        &self,
        base_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<String, UpstreamError> {
        let url = format!("{}/api/v2/authenticate", base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&json!({ "client_id": client_id, "client_secret": client_secret }))
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(UpstreamError::Upstream {
                status: status.as_u16(),
                error: format!("Authentication failed: {} {}", status.as_u16(), reason(status)),
                details: Some(text),
            });
        }
        Ok(parse_token(&text))
    }

    pub async fn import_execution(
        &self,
        base_url: &str,
        token: &str,
        import_data: &Value,
    ) -> Result<Value, UpstreamError> {
        let url = format!(
            "{}/api/v2/import/execution",
            base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(import_data)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            warn!("upstream import failed: {} {}", status, text);
            return Err(UpstreamError::Upstream {
                status: status.as_u16(),
                error: format!("Import failed: {} {}", status.as_u16(), reason(status)),
                details: Some(text),
            });
        }
        serde_json::from_str(&text)
            .map_err(|error| UpstreamError::Transport(format!("invalid import response: {}", error)))
    }

    /// Two-tier status update: one aliased mutation for the whole set, and
    /// only if that call is rejected outright, one call per update with each
    /// outcome recorded independently.
    pub async fn update_test_runs(
        &self,
        base_url: &str,
        token: &str,
        updates: &[TestRunUpdate],
    ) -> UpdateTestRunsResponse {
        if updates.is_empty() {
            return assemble(Vec::new(), Vec::new(), 0);
        }
        let mut results = Vec::new();
        let mut errors = Vec::new();
        match self.graphql(base_url, token, &build_combined_mutation(updates)).await {
            Ok((status, text)) if status.is_success() => {
                match serde_json::from_str::<Value>(&text) {
                    Ok(envelope) => {
                        let (acks, faults) = combined_outcomes(updates, &envelope);
                        results = acks;
                        errors = faults;
                    }
                    Err(parse_error) => {
                        let message = format!("unparseable GraphQL response: {}", parse_error);
                        errors = faults_for_all(updates, &message);
                    }
                }
            }
            Ok((status, _)) => {
                info!(
                    "combined update rejected ({}), falling back to per-run calls",
                    status
                );
                for update in updates {
                    match self.update_single(base_url, token, update).await {
                        Ok(()) => results.push(TestRunAck {
                            test_run_id: update.test_run_id.clone(),
                            success: true,
                        }),
                        Err(message) => errors.push(TestRunFault {
                            test_run_id: update.test_run_id.clone(),
                            error: message,
                        }),
                    }
                }
            }
            Err(transport) => {
                errors = faults_for_all(updates, &transport.to_string());
            }
        }
        assemble(results, errors, updates.len())
    }

    async fn update_single(
        &self,
        base_url: &str,
        token: &str,
        update: &TestRunUpdate,
    ) -> Result<(), String> {
        match self.graphql(base_url, token, &build_single_mutation(update)).await {
            Ok((status, text)) if status.is_success() => {
                match serde_json::from_str::<Value>(&text) {
                    Ok(envelope) => match envelope.get("errors") {
                        Some(graphql_errors) => Err(format!("GraphQL error: {}", graphql_errors)),
                        None => Ok(()),
                    },
                    Err(parse_error) => {
                        Err(format!("unparseable GraphQL response: {}", parse_error))
                    }
                }
            }
            Ok((status, text)) => Err(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )),
            Err(transport) => Err(transport.to_string()),
        }
    }

    /// Looks the execution up by key, pulls every test run page, and
    /// normalizes the result. Pagination failures keep what was fetched.
    pub async fn validate_test_execution(
        &self,
        base_url: &str,
        token: &str,
        key: &str,
    ) -> Result<(u16, ValidateResponse), UpstreamError> {
        let (status, text) = self.graphql(base_url, token, &initial_query(key)).await?;
        if !status.is_success() {
            return Err(UpstreamError::Upstream {
                status: status.as_u16(),
                error: format!(
                    "GraphQL request failed: {} {}",
                    status.as_u16(),
                    reason(status)
                ),
                details: Some(text),
            });
        }
        let envelope: GraphqlEnvelope = serde_json::from_str(&text).map_err(|error| {
            UpstreamError::Transport(format!("unparseable GraphQL response: {}", error))
        })?;
        let Some(raw) = envelope
            .data
            .and_then(|data| data.get_test_executions)
            .and_then(|wrapper| wrapper.results.into_iter().next())
        else {
            return Ok((
                404,
                ValidateResponse::failure(format!("Test Execution {} not found", key)),
            ));
        };

        let jira = parse_jira(raw.jira);
        let total = raw
            .test_runs
            .as_ref()
            .and_then(|page| page.total)
            .unwrap_or(0);
        let mut all_runs = raw
            .test_runs
            .and_then(|page| page.results)
            .unwrap_or_default();

        if total > TEST_RUN_PAGE_SIZE {
            let total_pages = (total + TEST_RUN_PAGE_SIZE - 1) / TEST_RUN_PAGE_SIZE;
            for page in 1..total_pages {
                let start = page * TEST_RUN_PAGE_SIZE;
                let Ok((page_status, page_text)) =
                    self.graphql(base_url, token, &page_query(key, start)).await
                else {
                    break;
                };
                if !page_status.is_success() {
                    break;
                }
                let Ok(page_envelope) = serde_json::from_str::<GraphqlEnvelope>(&page_text) else {
                    break;
                };
                if page_envelope.errors.is_some() {
                    break;
                }
                let page_runs = page_envelope
                    .data
                    .and_then(|data| data.get_test_executions)
                    .and_then(|wrapper| wrapper.results.into_iter().next())
                    .and_then(|execution| execution.test_runs)
                    .and_then(|page| page.results)
                    .unwrap_or_default();
                let short_page = page_runs.len() < TEST_RUN_PAGE_SIZE;
                all_runs.extend(page_runs);
                if short_page {
                    break;
                }
            }
        }

        let execution_key = jira
            .get("key")
            .and_then(Value::as_str)
            .unwrap_or(key)
            .to_string();
        let summary = jira
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let status_name = execution_status_name(&jira);
        if status_name.as_deref() != Some(REQUIRED_EXECUTION_STATUS) {
            let current = status_name.clone().unwrap_or_else(|| "Unknown".to_string());
            let mut failure = ValidateResponse::failure(format!(
                "The test execution must be in \"{}\" status to receive evidence; current status is \"{}\"",
                REQUIRED_EXECUTION_STATUS, current
            ));
            failure.test_execution = Some(ExecutionInfo {
                key: execution_key,
                summary,
                status: status_name,
            });
            return Ok((200, failure));
        }

        let runs: Vec<TestRun> = all_runs.into_iter().map(normalize_run).collect();
        let entries: Vec<RunStatusEntry> = runs
            .iter()
            .map(|run| RunStatusEntry {
                id: run.id.clone(),
                test_key: run.test.key.clone(),
                status: run.status.clone(),
            })
            .collect();
        let status_summary = summarize_statuses(&runs);
        Ok((
            200,
            ValidateResponse {
                valid: true,
                error: None,
                test_execution: Some(ExecutionInfo {
                    key: execution_key,
                    summary,
                    status: status_name,
                }),
                test_runs: Some(TestRunPage {
                    total: total.max(runs.len()),
                    results: runs,
                }),
                test_ids_and_statuses: Some(entries),
                status_summary: Some(status_summary),
            },
        ))
    }

    async fn graphql(
        &self,
        base_url: &str,
        token: &str,
        body: &Value,
    ) -> Result<(StatusCode, String), UpstreamError> {
        let url = format!("{}/api/v2/graphql", base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }
}

fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("")
}

fn parse_token(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::String(token)) => token,
        Ok(Value::Object(map)) => map
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.trim_matches('"').to_string()),
        _ => body.trim_matches('"').to_string(),
    }
}

pub fn build_combined_mutation(updates: &[TestRunUpdate]) -> Value {
    let mut parts = Vec::new();
    let mut defs = Vec::new();
    let mut variables = Map::new();
    for (index, update) in updates.iter().enumerate() {
        parts.push(format!(
            "update{index}: updateTestRunStatus(id: $id{index}, status: $status{index})"
        ));
        defs.push(format!("$id{index}: String!, $status{index}: String!"));
        variables.insert(format!("id{index}"), Value::String(update.test_run_id.clone()));
        variables.insert(format!("status{index}"), Value::String(update.status.clone()));
    }
    json!({
        "query": format!("mutation ({}) {{ {} }}", defs.join(", "), parts.join(" ")),
        "variables": Value::Object(variables),
    })
}

fn build_single_mutation(update: &TestRunUpdate) -> Value {
    json!({
        "query": "mutation ($id: String!, $status: String!) { updateTestRunStatus(id: $id, status: $status) }",
        "variables": { "id": update.test_run_id, "status": update.status },
    })
}

/// Per-alias outcomes of the combined mutation. A top-level GraphQL error
/// fails the whole set; a null alias fails that run only.
pub fn combined_outcomes(
    updates: &[TestRunUpdate],
    envelope: &Value,
) -> (Vec<TestRunAck>, Vec<TestRunFault>) {
    if let Some(graphql_errors) = envelope.get("errors") {
        let message = format!("GraphQL error: {}", graphql_errors);
        return (Vec::new(), faults_for_all(updates, &message));
    }
    let data = envelope.get("data");
    let mut acks = Vec::new();
    let mut faults = Vec::new();
    for (index, update) in updates.iter().enumerate() {
        let alias = format!("update{index}");
        match data.and_then(|value| value.get(&alias)) {
            Some(value) if !value.is_null() => acks.push(TestRunAck {
                test_run_id: update.test_run_id.clone(),
                success: true,
            }),
            _ => faults.push(TestRunFault {
                test_run_id: update.test_run_id.clone(),
                error: "No result returned from GraphQL".to_string(),
            }),
        }
    }
    (acks, faults)
}

fn faults_for_all(updates: &[TestRunUpdate], message: &str) -> Vec<TestRunFault> {
    updates
        .iter()
        .map(|update| TestRunFault {
            test_run_id: update.test_run_id.clone(),
            error: message.to_string(),
        })
        .collect()
}

fn assemble(
    results: Vec<TestRunAck>,
    errors: Vec<TestRunFault>,
    total: usize,
) -> UpdateTestRunsResponse {
    UpdateTestRunsResponse {
        success: !results.is_empty() || total == 0,
        summary: UpdateSummary {
            total,
            successful: results.len(),
            failed: errors.len(),
        },
        errors: if errors.is_empty() { None } else { Some(errors) },
        results,
    }
}

fn initial_query(key: &str) -> Value {
    json!({
        "query": format!(
            "query ($jql: String!, $limit: Int!, $trLimit: Int!) {{ getTestExecutions(jql: $jql, limit: $limit) {{ results {{ jira(fields: [\"key\", \"summary\", \"status\"]) testRuns(limit: $trLimit) {{ total results {{ {} }} }} }} }} }}",
            RUN_FIELDS
        ),
        "variables": { "jql": format!("key={}", key), "limit": 1, "trLimit": TEST_RUN_PAGE_SIZE },
    })
}

fn page_query(key: &str, start: usize) -> Value {
    json!({
        "query": format!(
            "query ($jql: String!, $limit: Int!, $trLimit: Int!, $trStart: Int!) {{ getTestExecutions(jql: $jql, limit: $limit) {{ results {{ testRuns(limit: $trLimit, start: $trStart) {{ results {{ {} }} }} }} }} }}",
            RUN_FIELDS
        ),
        "variables": { "jql": format!("key={}", key), "limit": 1, "trLimit": TEST_RUN_PAGE_SIZE, "trStart": start },
    })
}

/// The `jira` field arrives either as a JSON object or as a JSON string.
fn parse_jira(raw: Option<Value>) -> Value {
    match raw {
        Some(Value::String(text)) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        Some(value) => value,
        None => Value::Null,
    }
}

fn execution_status_name(jira: &Value) -> Option<String> {
    match jira.get("status") {
        Some(Value::Object(map)) => map.get("name").and_then(Value::as_str).map(str::to_string),
        Some(Value::String(status)) => Some(status.clone()),
        _ => None,
    }
}

fn normalize_run(raw: RawTestRun) -> TestRun {
    let status = raw.status.unwrap_or_default();
    let test = raw.test.unwrap_or_default();
    let test_jira = parse_jira(test.jira);
    TestRun {
        id: raw.id,
        status: status.name.unwrap_or_else(|| "UNKNOWN".to_string()),
        status_color: status.color.unwrap_or_default(),
        status_description: status.description.unwrap_or_default(),
        assignee_id: raw.assignee_id,
        executed_by_id: raw.executed_by_id,
        started_on: raw.started_on,
        finished_on: raw.finished_on,
        comment: raw.comment,
        test: TestInfo {
            key: test_jira
                .get("key")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            summary: test_jira
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            test_type: test.test_type.and_then(|kind| kind.name).unwrap_or_default(),
        },
    }
}

fn summarize_statuses(runs: &[TestRun]) -> BTreeMap<String, u32> {
    let mut summary = BTreeMap::new();
    for run in runs {
        *summary.entry(run.status.clone()).or_insert(0) += 1;
    }
    summary
}

#[derive(Deserialize)]
struct GraphqlEnvelope {
    data: Option<GraphqlData>,
    errors: Option<Value>,
}

#[derive(Deserialize)]
struct GraphqlData {
    #[serde(rename = "getTestExecutions")]
    get_test_executions: Option<ExecutionResults>,
}

#[derive(Deserialize)]
struct ExecutionResults {
    #[serde(default)]
    results: Vec<RawExecution>,
}

#[derive(Deserialize)]
struct RawExecution {
    jira: Option<Value>,
    #[serde(rename = "testRuns")]
    test_runs: Option<RawTestRunPage>,
}

#[derive(Deserialize)]
struct RawTestRunPage {
    total: Option<usize>,
    results: Option<Vec<RawTestRun>>,
}

#[derive(Deserialize)]
struct RawTestRun {
    id: String,
    status: Option<RawStatus>,
    #[serde(rename = "assigneeId")]
    assignee_id: Option<String>,
    #[serde(rename = "executedById")]
    executed_by_id: Option<String>,
    #[serde(rename = "startedOn")]
    started_on: Option<String>,
    #[serde(rename = "finishedOn")]
    finished_on: Option<String>,
    comment: Option<String>,
    test: Option<RawTest>,
}

#[derive(Deserialize, Default)]
struct RawStatus {
    name: Option<String>,
    color: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize, Default)]
struct RawTest {
    jira: Option<Value>,
    #[serde(rename = "testType")]
    test_type: Option<RawTestType>,
}

#[derive(Deserialize)]
struct RawTestType {
    name: Option<String>,
}
