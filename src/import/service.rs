use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};

use crate::classifier::model::FileGroup;
use crate::evidence;
use crate::import::model::{
    ImportProgress, ImportResult, ImportStage, PreparedRun, RunFailure, BATCH_SIZE,
    DEFAULT_RUN_STATUS, NOT_PROCESSED_ERROR,
};
use crate::session::{with_session, SharedSession};
use crate::validation::model::ValidationSnapshot;
use crate::xray::client::{XrayError, XrayGateway};
use crate::xray::model::{ImportData, ImportInfo, TestResult, TestRunUpdate};

pub struct ImportCommand {
    pub import_id: String,
    pub execution_key: String,
    pub summary: String,
    pub groups: FileGroup,
    pub snapshot: ValidationSnapshot,
}

/// Drives one full import: encode, batch, upload each batch through the
/// REST phase then the GraphQL status phase, and record the terminal result
/// on the session.
pub async fn run_import<G: XrayGateway>(
    gateway: &G,
    session: SharedSession,
    command: ImportCommand,
) -> ImportResult {
    let finish_stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let prepared = prepare_runs(&command.groups, &command.snapshot, &finish_stamp);
    let total = prepared.len();
    let batches = partition(prepared, BATCH_SIZE);
    let batch_count = batches.len();
    publish(&session, |progress| {
        progress.total = total;
        progress.batch_count = batch_count;
    });

    let token = match gateway.authenticate().await {
        Ok(token) => token,
        Err(auth_error) => {
            error!("import aborted before upload: {}", auth_error);
            let result = fatal_result(&command.import_id, total, &auth_error);
            with_session(&session, |state| state.finish_import(result.clone()));
            return result;
        }
    };

    let mut completed: Vec<String> = Vec::new();
    let mut failures: Vec<RunFailure> = Vec::new();
    let mut aborted = false;

    let mut index = 0;
    while index < batches.len() {
        let batch = &batches[index];
        let keys: Vec<String> = batch.iter().map(|run| run.test_key.clone()).collect();
        publish(&session, |progress| {
            progress.stage = ImportStage::Rest;
            progress.current_batch = index + 1;
            progress.in_flight = keys.clone();
        });

        let data = ImportData {
            test_execution_key: command.execution_key.clone(),
            info: ImportInfo {
                summary: command.summary.clone(),
            },
            tests: batch.iter().map(|run| run.result.clone()).collect(),
        };
        info!(
            "importing batch {}/{} ({} runs)",
            index + 1,
            batch_count,
            batch.len()
        );
        match gateway.import_execution(&token, &data).await {
            Err(import_error) => {
                let message = import_error.to_string();
                for run in batch {
                    failures.push(RunFailure {
                        test_key: run.test_key.clone(),
                        error: message.clone(),
                    });
                }
                if import_error.is_payload_too_large() {
                    error!("batch {} exceeded the payload limit, aborting", index + 1);
                    aborted = true;
                    for skipped in batches.iter().skip(index + 1) {
                        for run in skipped {
                            failures.push(RunFailure {
                                test_key: run.test_key.clone(),
                                error: NOT_PROCESSED_ERROR.to_string(),
                            });
                        }
                    }
                }
            }
            Ok(_) => {
                publish(&session, |progress| progress.stage = ImportStage::Graphql);
                let updates: Vec<TestRunUpdate> = batch
                    .iter()
                    .map(|run| TestRunUpdate {
                        test_run_id: run.test_run_id.clone(),
                        status: DEFAULT_RUN_STATUS.to_string(),
                    })
                    .collect();
                match gateway.update_test_runs(&token, &updates).await {
                    Err(update_error) => {
                        let message = update_error.to_string();
                        for run in batch {
                            failures.push(RunFailure {
                                test_key: run.test_key.clone(),
                                error: message.clone(),
                            });
                        }
                    }
                    Ok(response) => {
                        let faults: HashMap<String, String> = response
                            .errors
                            .unwrap_or_default()
                            .into_iter()
                            .map(|fault| (fault.test_run_id, fault.error))
                            .collect();
                        for run in batch {
                            match faults.get(&run.test_run_id) {
                                Some(reason) => failures.push(RunFailure {
                                    test_key: run.test_key.clone(),
                                    error: reason.clone(),
                                }),
                                None => completed.push(run.test_key.clone()),
                            }
                        }
                    }
                }
            }
        }

        publish(&session, |progress| {
            progress.in_flight.clear();
            progress.completed = completed.clone();
            progress.failed = failures.clone();
        });
        if aborted {
            break;
        }
        index += 1;
    }

    let result = summarize(&command.import_id, total, completed.len(), failures, aborted);
    info!("import {} finished: {}", command.import_id, result.message);
    with_session(&session, |state| state.finish_import(result.clone()));
    result
}

/// Builds the per-run upload records. The start timestamp captured at
/// validation is preserved; only the finish time is stamped now.
pub fn prepare_runs(
    groups: &FileGroup,
    snapshot: &ValidationSnapshot,
    finish: &str,
) -> Vec<PreparedRun> {
    groups
        .iter()
        .filter_map(|(number, files)| {
            let run = snapshot.run_by_number(number)?;
            let evidences = files.iter().map(evidence::service::encode).collect();
            Some(PreparedRun {
                test_key: run.test_key.clone(),
                test_run_id: run.id.clone(),
                result: TestResult {
                    test_key: run.test_key.clone(),
                    status: DEFAULT_RUN_STATUS.to_string(),
                    start: run.started_on.clone().unwrap_or_else(|| finish.to_string()),
                    finish: finish.to_string(),
                    evidences,
                },
            })
        })
        .collect()
}

pub fn partition<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut batches = Vec::new();
    let mut current = Vec::with_capacity(size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == size {
            batches.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

pub fn summarize(
    import_id: &str,
    total: usize,
    completed: usize,
    failures: Vec<RunFailure>,
    aborted: bool,
) -> ImportResult {
    let failed = failures.len();
    let success = completed > 0 && failed == 0;
    let message = if aborted && completed == 0 {
        "Import aborted: a batch exceeded the platform payload limit; no test runs were updated"
            .to_string()
    } else if failed == 0 && completed > 0 {
        format!("All {} test runs imported successfully", completed)
    } else if completed > 0 {
        format!(
            "{} of {} test runs imported, {} failed",
            completed, total, failed
        )
    } else {
        "Import failed for all test runs".to_string()
    };
    ImportResult::builder()
        .import_id(import_id.to_string())
        .success(success)
        .message(message)
        .total(total)
        .completed(completed)
        .failed(failed)
        .failures(failures)
        .build()
}

fn fatal_result(import_id: &str, total: usize, error: &XrayError) -> ImportResult {
    ImportResult::builder()
        .import_id(import_id.to_string())
        .success(false)
        .message(format!("Import failed: {}", error))
        .total(total)
        .completed(0)
        .failed(0)
        .build()
}

fn publish(session: &SharedSession, update: impl FnOnce(&mut ImportProgress)) {
    with_session(session, |state| {
        if let Some(progress) = state.progress_mut() {
            update(progress);
        }
    });
}

/// Cosmetic progress: tracks real progress but keeps moving between
/// updates, capped below completion until the result is known.
pub fn advance_display(current: f32, real: f32) -> f32 {
    let floor = real * 90.0;
    let crawl = current + (95.0 - current) * 0.02;
    crawl.max(floor).min(95.0).max(current)
}

/// Presentation-only ticker; reads published progress, never produces it.
pub fn spawn_display_ticker(session: SharedSession) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(250));
        loop {
            interval.tick().await;
            let running = with_session(&session, |state| match state.progress_mut() {
                Some(progress) => {
                    let real = progress.real_fraction();
                    progress.display_percent = advance_display(progress.display_percent, real);
                    true
                }
                None => false,
            });
            if !running {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::model::UploadFile;
    use crate::import::model::ImportState;
    use crate::session::{read_session, Session};
    use crate::validation::model::RunRef;
    use crate::xray::model::{
        ExecutionInfo, TestRunAck, TestRunFault, UpdateSummary, UpdateTestRunsResponse,
        ValidateResponse,
    };
    use serde_json::{json, Value};
    use std::collections::{BTreeMap, HashSet, VecDeque};
    use std::sync::{Arc, Mutex, RwLock};

    #[derive(Default)]
    struct MockGateway {
        fail_auth: Option<XrayError>,
        import_plan: Mutex<VecDeque<Result<(), XrayError>>>,
        import_calls: Mutex<Vec<usize>>,
        update_plan: Mutex<VecDeque<Result<UpdateTestRunsResponse, XrayError>>>,
        update_calls: Mutex<Vec<usize>>,
    }

    impl XrayGateway for MockGateway {
        async fn authenticate(&self) -> Result<String, XrayError> {
            match &self.fail_auth {
                Some(auth_error) => Err(auth_error.clone()),
                None => Ok("token".to_string()),
            }
        }

        async fn import_execution(
            &self,
            _token: &str,
            data: &ImportData,
        ) -> Result<Value, XrayError> {
            self.import_calls.lock().unwrap().push(data.tests.len());
            match self.import_plan.lock().unwrap().pop_front() {
                Some(Ok(())) => Ok(json!({})),
                Some(Err(import_error)) => Err(import_error),
                None => Ok(json!({})),
            }
        }

        async fn update_test_runs(
            &self,
            _token: &str,
            updates: &[TestRunUpdate],
        ) -> Result<UpdateTestRunsResponse, XrayError> {
            self.update_calls.lock().unwrap().push(updates.len());
            match self.update_plan.lock().unwrap().pop_front() {
                Some(planned) => planned,
                None => Ok(ok_update(updates)),
            }
        }

        async fn validate_test_execution(
            &self,
            _token: &str,
            _key: &str,
        ) -> Result<ValidateResponse, XrayError> {
            unimplemented!("the orchestrator never validates")
        }
    }

    fn ok_update(updates: &[TestRunUpdate]) -> UpdateTestRunsResponse {
        UpdateTestRunsResponse {
            success: true,
            results: updates
                .iter()
                .map(|update| TestRunAck {
                    test_run_id: update.test_run_id.clone(),
                    success: true,
                })
                .collect(),
            errors: None,
            summary: UpdateSummary {
                total: updates.len(),
                successful: updates.len(),
                failed: 0,
            },
        }
    }

    fn fixture(count: usize) -> (ImportCommand, SharedSession) {
        let mut groups = FileGroup::new();
        let mut runs_by_number = std::collections::HashMap::new();
        let mut executing_run_ids = HashSet::new();
        for i in 1..=count {
            let number = format!("{:03}", i);
            groups.insert(
                number.clone(),
                vec![UploadFile::from_bytes(
                    format!("UAAS-{}.txt", number),
                    vec![b'a'],
                )],
            );
            let id = format!("run-{}", number);
            executing_run_ids.insert(id.clone());
            runs_by_number.insert(
                number.clone(),
                RunRef {
                    id,
                    test_key: format!("UAAS-{}", number),
                    status: "EXECUTING".to_string(),
                    started_on: Some("2026-02-01T08:00:00.000Z".to_string()),
                },
            );
        }
        let snapshot = ValidationSnapshot::builder()
            .execution(ExecutionInfo {
                key: "UAAS-100".to_string(),
                summary: "cycle".to_string(),
                status: None,
            })
            .test_runs(Vec::new())
            .run_statuses(Vec::new())
            .status_summary(BTreeMap::new())
            .executing_run_ids(executing_run_ids)
            .runs_by_number(runs_by_number)
            .build();
        let command = ImportCommand {
            import_id: "imp-1".to_string(),
            execution_key: "UAAS-100".to_string(),
            summary: "Evidence and status upload for UAAS-100".to_string(),
            groups,
            snapshot,
        };
        let session: SharedSession = Arc::new(RwLock::new(Session::default()));
        with_session(&session, |state| state.begin_import(count).unwrap());
        (command, session)
    }

    #[tokio::test]
    async fn twenty_five_runs_make_three_sequential_batches() {
        let (command, session) = fixture(25);
        let gateway = MockGateway::default();
        let result = run_import(&gateway, session.clone(), command).await;
        assert_eq!(*gateway.import_calls.lock().unwrap(), vec![10, 10, 5]);
        assert_eq!(*gateway.update_calls.lock().unwrap(), vec![10, 10, 5]);
        assert!(result.success);
        assert_eq!(result.completed, 25);
        assert_eq!(result.failed, 0);
        assert!(result.message.contains("All 25"));
        read_session(&session, |state| {
            assert!(matches!(state.import_state(), ImportState::Done(_)));
        });
    }

    #[tokio::test]
    async fn generic_batch_failure_does_not_stop_later_batches() {
        let (command, session) = fixture(25);
        let gateway = MockGateway::default();
        *gateway.import_plan.lock().unwrap() = VecDeque::from(vec![
            Ok(()),
            Err(XrayError::Status {
                status: 500,
                message: "upstream exploded".to_string(),
            }),
            Ok(()),
        ]);
        let result = run_import(&gateway, session, command).await;
        assert_eq!(gateway.import_calls.lock().unwrap().len(), 3);
        assert_eq!(result.completed, 15);
        assert_eq!(result.failed, 10);
        assert!(!result.success);
        assert!(result.message.contains("15 of 25"));
        assert!(result
            .failures
            .iter()
            .all(|failure| failure.error == "upstream exploded"));
    }

    #[tokio::test]
    async fn payload_too_large_aborts_remaining_batches() {
        let (command, session) = fixture(25);
        let gateway = MockGateway::default();
        *gateway.import_plan.lock().unwrap() = VecDeque::from(vec![Err(XrayError::Status {
            status: 413,
            message: "Import failed: 413 Payload Too Large".to_string(),
        })]);
        let result = run_import(&gateway, session, command).await;
        assert_eq!(gateway.import_calls.lock().unwrap().len(), 1);
        assert!(gateway.update_calls.lock().unwrap().is_empty());
        assert_eq!(result.completed, 0);
        assert_eq!(result.failed, 25);
        let not_processed = result
            .failures
            .iter()
            .filter(|failure| failure.error == NOT_PROCESSED_ERROR)
            .count();
        assert_eq!(not_processed, 15);
        assert!(result.message.contains("payload"));
    }

    #[tokio::test]
    async fn run_level_faults_come_from_the_graphql_response() {
        let (command, session) = fixture(2);
        let gateway = MockGateway::default();
        *gateway.update_plan.lock().unwrap() =
            VecDeque::from(vec![Ok(UpdateTestRunsResponse {
                success: true,
                results: vec![TestRunAck {
                    test_run_id: "run-001".to_string(),
                    success: true,
                }],
                errors: Some(vec![TestRunFault {
                    test_run_id: "run-002".to_string(),
                    error: "timer already stopped".to_string(),
                }]),
                summary: UpdateSummary {
                    total: 2,
                    successful: 1,
                    failed: 1,
                },
            })]);
        let result = run_import(&gateway, session, command).await;
        assert_eq!(result.completed, 1);
        assert_eq!(result.failed, 1);
        assert!(!result.success);
        assert_eq!(result.failures[0].test_key, "UAAS-002");
        assert_eq!(result.failures[0].error, "timer already stopped");
    }

    #[tokio::test]
    async fn graphql_call_failure_fails_the_whole_batch() {
        let (command, session) = fixture(3);
        let gateway = MockGateway::default();
        *gateway.update_plan.lock().unwrap() = VecDeque::from(vec![Err(XrayError::Transport(
            "request timed out: graphql".to_string(),
        ))]);
        let result = run_import(&gateway, session, command).await;
        assert_eq!(result.completed, 0);
        assert_eq!(result.failed, 3);
        assert!(result
            .failures
            .iter()
            .all(|failure| failure.error.contains("timed out")));
    }

    #[tokio::test]
    async fn auth_failure_is_a_single_top_level_error() {
        let (command, session) = fixture(5);
        let gateway = MockGateway {
            fail_auth: Some(XrayError::Transport(
                "could not reach the backend: connection refused".to_string(),
            )),
            ..MockGateway::default()
        };
        let result = run_import(&gateway, session.clone(), command).await;
        assert!(gateway.import_calls.lock().unwrap().is_empty());
        assert!(!result.success);
        assert!(result.failures.is_empty());
        assert!(result.message.contains("could not reach"));
        read_session(&session, |state| {
            assert!(matches!(state.import_state(), ImportState::Done(_)));
        });
    }

    #[test]
    fn partition_makes_ceil_n_over_size_batches() {
        for (count, expected) in [(0usize, 0usize), (1, 1), (10, 1), (11, 2), (25, 3)] {
            let batches = partition((0..count).collect::<Vec<_>>(), BATCH_SIZE);
            assert_eq!(batches.len(), expected, "count {}", count);
            assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), count);
            assert!(batches.iter().all(|batch| batch.len() <= BATCH_SIZE));
        }
    }

    #[test]
    fn success_requires_completions_and_zero_failures() {
        assert!(summarize("i", 3, 3, vec![], false).success);
        assert!(!summarize("i", 3, 0, vec![], false).success);
        let failure = vec![RunFailure {
            test_key: "UAAS-1".to_string(),
            error: "x".to_string(),
        }];
        assert!(!summarize("i", 3, 2, failure, false).success);
        assert!(summarize("i", 3, 0, vec![], false)
            .message
            .contains("failed for all"));
    }

    #[test]
    fn display_percent_crawls_monotonically_below_the_cap() {
        let mut current = 0.0_f32;
        for _ in 0..200 {
            let next = advance_display(current, 0.0);
            assert!(next >= current);
            assert!(next < 95.001);
            current = next;
        }
        assert!(current > 50.0);
        assert!(advance_display(10.0, 1.0) >= 90.0);
    }

    #[test]
    fn prepared_runs_keep_original_start_and_file_order() {
        let (command, _) = fixture(1);
        let mut groups = command.groups.clone();
        groups.get_mut("001").unwrap().push(UploadFile::from_bytes(
            "UAAS-001-second.txt".to_string(),
            vec![b'b'],
        ));
        let prepared = prepare_runs(&groups, &command.snapshot, "2026-02-01T09:00:00.000Z");
        assert_eq!(prepared.len(), 1);
        let record = &prepared[0].result;
        assert_eq!(record.status, DEFAULT_RUN_STATUS);
        assert_eq!(record.start, "2026-02-01T08:00:00.000Z");
        assert_eq!(record.finish, "2026-02-01T09:00:00.000Z");
        assert_eq!(record.evidences.len(), 2);
        assert_eq!(record.evidences[0].filename, "UAAS-001.txt");
        assert_eq!(record.evidences[1].filename, "UAAS-001-second.txt");
    }
}
