use bon::Builder;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::xray::model::{ExecutionInfo, RunStatusEntry, TestRun};

/// The two status names treated as "work in progress". Runs in any other
/// status cannot receive evidence. Hardcoded vocabulary; extending it means
/// touching this list.
pub const EXECUTING_STATUSES: [&str; 2] = ["EXECUTING", "A EXECUTAR"];

pub fn is_executing_status(status: &str) -> bool {
    EXECUTING_STATUSES.contains(&status)
}

/// Per-run data the pipeline needs after validation.
#[derive(Clone, Debug)]
pub struct RunRef {
    pub id: String,
    pub test_key: String,
    pub status: String,
    pub started_on: Option<String>,
}

/// Everything one validation call produced. Replaced wholesale on each
/// validation; never merged with a previous snapshot.
#[derive(Clone, Builder)]
pub struct ValidationSnapshot {
    pub execution: ExecutionInfo,
    pub test_runs: Vec<TestRun>,
    pub run_statuses: Vec<RunStatusEntry>,
    pub status_summary: BTreeMap<String, u32>,
    pub executing_run_ids: HashSet<String>,
    pub runs_by_number: HashMap<String, RunRef>,
}

impl ValidationSnapshot {
    pub fn run_by_number(&self, number: &str) -> Option<&RunRef> {
        self.runs_by_number.get(number)
    }

    pub fn is_executing_number(&self, number: &str) -> bool {
        self.run_by_number(number)
            .map(|run| self.executing_run_ids.contains(&run.id))
            .unwrap_or(false)
    }

    pub fn executing_count(&self) -> usize {
        self.executing_run_ids.len()
    }
}

/// What the validate endpoint reports back to the caller.
#[derive(Serialize, Clone, Builder)]
pub struct ValidationOutcome {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_runs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executing_runs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_runs: Option<Vec<TestRun>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_statuses: Option<Vec<RunStatusEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_summary: Option<BTreeMap<String, u32>>,
}

impl ValidationOutcome {
    pub fn failure(error: String) -> ValidationOutcome {
        ValidationOutcome::builder().valid(false).error(error).build()
    }
}
