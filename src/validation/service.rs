use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

use crate::validation::model::{
    is_executing_status, RunRef, ValidationOutcome, ValidationSnapshot,
};
use crate::xray::client::XrayGateway;
use crate::xray::model::{RunStatusEntry, TestRun, ValidateResponse};

/// Authenticates and validates one test execution. Failures of any kind
/// come back as an invalid outcome with a message; nothing is thrown past
/// this boundary and no partial run data escapes.
pub async fn validate_execution<G: XrayGateway>(
    gateway: &G,
    key: &str,
) -> (ValidationOutcome, Option<ValidationSnapshot>) {
    let token = match gateway.authenticate().await {
        Ok(token) => token,
        Err(auth_error) => return (ValidationOutcome::failure(auth_error.to_string()), None),
    };
    let response = match gateway.validate_test_execution(&token, key).await {
        Ok(response) => response,
        Err(validate_error) => {
            return (ValidationOutcome::failure(validate_error.to_string()), None)
        }
    };
    if !response.valid {
        let message = response
            .error
            .unwrap_or_else(|| format!("Test execution {} failed validation", key));
        return (ValidationOutcome::failure(message), None);
    }
    match build_snapshot(response) {
        Some(snapshot) => {
            info!(
                "validated {}: {} runs, {} executing",
                key,
                snapshot.test_runs.len(),
                snapshot.executing_count()
            );
            let outcome = ValidationOutcome::builder()
                .valid(true)
                .execution(snapshot.execution.clone())
                .total_runs(snapshot.test_runs.len())
                .executing_runs(snapshot.executing_count())
                .test_runs(snapshot.test_runs.clone())
                .run_statuses(snapshot.run_statuses.clone())
                .status_summary(snapshot.status_summary.clone())
                .build();
            (outcome, Some(snapshot))
        }
        None => (
            ValidationOutcome::failure(format!("Malformed validation response for {}", key)),
            None,
        ),
    }
}

pub fn build_snapshot(response: ValidateResponse) -> Option<ValidationSnapshot> {
    let execution = response.test_execution?;
    let runs = response
        .test_runs
        .map(|page| page.results)
        .unwrap_or_default();
    let run_statuses = response.test_ids_and_statuses.unwrap_or_else(|| {
        runs.iter()
            .map(|run| RunStatusEntry {
                id: run.id.clone(),
                test_key: run.test.key.clone(),
                status: run.status.clone(),
            })
            .collect()
    });
    let status_summary = response
        .status_summary
        .unwrap_or_else(|| summarize_statuses(&runs));
    let mut executing_run_ids = HashSet::new();
    let mut runs_by_number = HashMap::new();
    for run in &runs {
        if is_executing_status(&run.status) {
            executing_run_ids.insert(run.id.clone());
        }
        if let Some(number) = run_number_from_key(&run.test.key) {
            runs_by_number.insert(
                number,
                RunRef {
                    id: run.id.clone(),
                    test_key: run.test.key.clone(),
                    status: run.status.clone(),
                    started_on: run.started_on.clone(),
                },
            );
        }
    }
    Some(
        ValidationSnapshot::builder()
            .execution(execution)
            .test_runs(runs)
            .run_statuses(run_statuses)
            .status_summary(status_summary)
            .executing_run_ids(executing_run_ids)
            .runs_by_number(runs_by_number)
            .build(),
    )
}

/// `UAAS-123` -> `123`; anything without a trailing digit group is skipped.
pub fn run_number_from_key(key: &str) -> Option<String> {
    let digits = key.rsplit('-').next()?;
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(digits.to_string())
    } else {
        None
    }
}

pub fn summarize_statuses(runs: &[TestRun]) -> BTreeMap<String, u32> {
    let mut summary = BTreeMap::new();
    for run in runs {
        *summary.entry(run.status.clone()).or_insert(0) += 1;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xray::model::{ExecutionInfo, TestInfo, TestRunPage};

    fn wire_run(number: u32, status: &str) -> TestRun {
        TestRun {
            id: format!("5acc7ab0-{}", number),
            status: status.to_string(),
            status_color: "#ffab00".to_string(),
            status_description: String::new(),
            assignee_id: Some("abc123".to_string()),
            executed_by_id: None,
            started_on: Some("2026-03-02T10:15:00Z".to_string()),
            finished_on: None,
            comment: None,
            test: TestInfo {
                key: format!("UAAS-{}", number),
                summary: format!("test {}", number),
                test_type: "Manual".to_string(),
            },
        }
    }

    fn wire_response(runs: Vec<TestRun>) -> ValidateResponse {
        ValidateResponse {
            valid: true,
            error: None,
            test_execution: Some(ExecutionInfo {
                key: "UAAS-100".to_string(),
                summary: "regression cycle".to_string(),
                status: Some("In Progress".to_string()),
            }),
            test_runs: Some(TestRunPage {
                total: runs.len(),
                results: runs,
            }),
            test_ids_and_statuses: None,
            status_summary: None,
        }
    }

    #[test]
    fn snapshot_collects_both_executing_synonyms() {
        let response = wire_response(vec![
            wire_run(1, "EXECUTING"),
            wire_run(2, "A EXECUTAR"),
            wire_run(3, "PASSED"),
        ]);
        let snapshot = build_snapshot(response).unwrap();
        assert_eq!(snapshot.executing_count(), 2);
        assert!(snapshot.is_executing_number("1"));
        assert!(snapshot.is_executing_number("2"));
        assert!(!snapshot.is_executing_number("3"));
        assert!(!snapshot.is_executing_number("999"));
    }

    #[test]
    fn snapshot_maps_run_numbers_to_platform_ids_and_start_times() {
        let response = wire_response(vec![wire_run(42, "EXECUTING")]);
        let snapshot = build_snapshot(response).unwrap();
        let run = snapshot.run_by_number("42").unwrap();
        assert_eq!(run.id, "5acc7ab0-42");
        assert_eq!(run.test_key, "UAAS-42");
        assert_eq!(run.started_on.as_deref(), Some("2026-03-02T10:15:00Z"));
    }

    #[test]
    fn status_summary_is_computed_when_the_relay_omits_it() {
        let response = wire_response(vec![
            wire_run(1, "EXECUTING"),
            wire_run(2, "PASSED"),
            wire_run(3, "PASSED"),
        ]);
        let snapshot = build_snapshot(response).unwrap();
        assert_eq!(snapshot.status_summary["PASSED"], 2);
        assert_eq!(snapshot.status_summary["EXECUTING"], 1);
        assert_eq!(snapshot.run_statuses.len(), 3);
    }

    #[test]
    fn missing_execution_data_is_malformed() {
        let response = ValidateResponse {
            valid: true,
            error: None,
            test_execution: None,
            test_runs: None,
            test_ids_and_statuses: None,
            status_summary: None,
        };
        assert!(build_snapshot(response).is_none());
    }

    #[test]
    fn run_numbers_come_from_the_trailing_digit_group() {
        assert_eq!(run_number_from_key("UAAS-123").as_deref(), Some("123"));
        assert_eq!(run_number_from_key("PROJ-007").as_deref(), Some("007"));
        assert_eq!(run_number_from_key("UAAS"), None);
        assert_eq!(run_number_from_key("UAAS-12a"), None);
        assert_eq!(run_number_from_key(""), None);
    }
}
