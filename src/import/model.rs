use bon::Builder;
use serde::Serialize;

use crate::xray::model::TestResult;

pub const BATCH_SIZE: usize = 10;
pub const DEFAULT_RUN_STATUS: &str = "PASSED";
pub const NOT_PROCESSED_ERROR: &str =
    "not processed: an earlier batch exceeded the payload limit";

/// One test run ready for upload: the wire record plus the platform id
/// needed for the status-update phase.
#[derive(Clone)]
pub struct PreparedRun {
    pub test_key: String,
    pub test_run_id: String,
    pub result: TestResult,
}

#[derive(Serialize, Clone, Copy, Debug, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ImportStage {
    Encoding,
    Rest,
    Graphql,
}

#[derive(Serialize, Clone, Debug)]
pub struct RunFailure {
    pub test_key: String,
    pub error: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct ImportProgress {
    pub total: usize,
    pub completed: Vec<String>,
    pub failed: Vec<RunFailure>,
    pub in_flight: Vec<String>,
    pub stage: ImportStage,
    pub current_batch: usize,
    pub batch_count: usize,
    pub display_percent: f32,
}

impl ImportProgress {
    pub fn new(total: usize) -> ImportProgress {
        ImportProgress {
            total,
            completed: Vec::new(),
            failed: Vec::new(),
            in_flight: Vec::new(),
            stage: ImportStage::Encoding,
            current_batch: 0,
            batch_count: 0,
            display_percent: 0.0,
        }
    }

    pub fn processed(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    pub fn real_fraction(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.processed() as f32 / self.total as f32
        }
    }
}

#[derive(Serialize, Clone, Debug, Builder)]
pub struct ImportResult {
    pub import_id: String,
    pub success: bool,
    pub message: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    #[builder(default)]
    pub failures: Vec<RunFailure>,
}

#[derive(Clone, Default)]
pub enum ImportState {
    #[default]
    Idle,
    Running(ImportProgress),
    Done(ImportResult),
}

/// Serialized shape of `GET /import/progress`.
#[derive(Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ImportStatusView {
    Idle,
    Running { progress: ImportProgress },
    Done { result: ImportResult },
}

impl From<&ImportState> for ImportStatusView {
    fn from(state: &ImportState) -> ImportStatusView {
        match state {
            ImportState::Idle => ImportStatusView::Idle,
            ImportState::Running(progress) => ImportStatusView::Running {
                progress: progress.clone(),
            },
            ImportState::Done(result) => ImportStatusView::Done {
                result: result.clone(),
            },
        }
    }
}

#[derive(Serialize)]
pub struct ImportStarted {
    pub import_id: String,
    pub total_runs: usize,
}
