use regex::Regex;

use crate::classifier::model::{
    Classification, IgnoreReason, IgnoredFile, UploadFile,
};
use crate::validation::model::ValidationSnapshot;

pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

enum Admission {
    Accepted(String),
    Dropped,
    Ignored(IgnoredFile),
}

/// Groups selected files by the run number embedded in their filenames.
pub struct Classifier {
    pattern: Regex,
    project_key: String,
}

impl Classifier {
    pub fn new(project_key: &str) -> Classifier {
        let pattern = Regex::new(&format!(
            r"(?i)^(?:{}-)?(\d+)(?:-.*)?\.",
            regex::escape(project_key)
        ))
        .expect("run number pattern");
        Classifier {
            pattern,
            project_key: project_key.to_string(),
        }
    }

    /// `UAAS-42.png`, `uaas-42-retry.png`, `42.png` all yield `42`.
    pub fn extract_run_number(&self, filename: &str) -> Option<String> {
        self.pattern
            .captures(filename)
            .map(|caps| caps[1].to_string())
    }

    pub fn classify(&self, files: &[UploadFile], snapshot: &ValidationSnapshot) -> Classification {
        let mut classification = Classification::default();
        for file in files {
            match self.admit(file, snapshot) {
                Admission::Accepted(number) => {
                    classification
                        .groups
                        .entry(number)
                        .or_default()
                        .push(file.clone());
                }
                Admission::Dropped => {}
                Admission::Ignored(ignored) => classification.ignored.push(ignored),
            }
        }
        classification
    }

    fn admit(&self, file: &UploadFile, snapshot: &ValidationSnapshot) -> Admission {
        if is_system_file(&file.name) {
            return Admission::Dropped;
        }
        if file.size > MAX_FILE_SIZE {
            return Admission::Ignored(self.ignored(
                file,
                IgnoreReason::FileTooLarge,
                "file exceeds the 10 MB limit".to_string(),
            ));
        }
        let number = match self.extract_run_number(&file.name) {
            Some(number) => number,
            None => {
                return Admission::Ignored(self.ignored(
                    file,
                    IgnoreReason::InvalidFormat,
                    format!(
                        "filename does not match {}-<number>.<extension>",
                        self.project_key
                    ),
                ));
            }
        };
        let run = match snapshot.run_by_number(&number) {
            Some(run) => run,
            None => {
                return Admission::Ignored(self.ignored(
                    file,
                    IgnoreReason::RunNotFound,
                    format!(
                        "{}-{} is not part of the validated test execution",
                        self.project_key, number
                    ),
                ));
            }
        };
        if !snapshot.is_executing_number(&number) {
            return Admission::Ignored(self.ignored(
                file,
                IgnoreReason::RunNotExecuting,
                format!("{} has status {}", run.test_key, run.status),
            ));
        }
        Admission::Accepted(number)
    }

    fn ignored(&self, file: &UploadFile, reason: IgnoreReason, detail: String) -> IgnoredFile {
        IgnoredFile {
            filename: file.name.clone(),
            reason,
            detail,
        }
    }
}

fn is_system_file(name: &str) -> bool {
    name == ".DS_Store"
        || name.eq_ignore_ascii_case("Thumbs.db")
        || name.eq_ignore_ascii_case("desktop.ini")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::model::RunRef;
    use crate::xray::model::{ExecutionInfo, RunStatusEntry, TestInfo, TestRun};
    use std::collections::{BTreeMap, HashMap, HashSet};

    fn run(number: u32, status: &str) -> TestRun {
        TestRun {
            id: format!("run-{}", number),
            status: status.to_string(),
            status_color: String::new(),
            status_description: String::new(),
            assignee_id: None,
            executed_by_id: None,
            started_on: Some("2026-01-10T09:00:00Z".to_string()),
            finished_on: None,
            comment: None,
            test: TestInfo {
                key: format!("UAAS-{}", number),
                summary: format!("test {}", number),
                test_type: "Manual".to_string(),
            },
        }
    }

    fn snapshot(runs: Vec<TestRun>) -> ValidationSnapshot {
        let mut executing_run_ids = HashSet::new();
        let mut runs_by_number = HashMap::new();
        let run_statuses = runs
            .iter()
            .map(|r| RunStatusEntry {
                id: r.id.clone(),
                test_key: r.test.key.clone(),
                status: r.status.clone(),
            })
            .collect();
        for r in &runs {
            if crate::validation::model::is_executing_status(&r.status) {
                executing_run_ids.insert(r.id.clone());
            }
            let number = r.test.key.rsplit('-').next().unwrap().to_string();
            runs_by_number.insert(
                number,
                RunRef {
                    id: r.id.clone(),
                    test_key: r.test.key.clone(),
                    status: r.status.clone(),
                    started_on: r.started_on.clone(),
                },
            );
        }
        ValidationSnapshot::builder()
            .execution(ExecutionInfo {
                key: "UAAS-100".to_string(),
                summary: "cycle".to_string(),
                status: Some("In Progress".to_string()),
            })
            .test_runs(runs)
            .run_statuses(run_statuses)
            .status_summary(BTreeMap::new())
            .executing_run_ids(executing_run_ids)
            .runs_by_number(runs_by_number)
            .build()
    }

    fn file(name: &str) -> UploadFile {
        UploadFile::from_bytes(name.to_string(), vec![1, 2, 3])
    }

    #[test]
    fn extracts_the_digit_group_regardless_of_prefix_or_suffix() {
        let classifier = Classifier::new("UAAS");
        for name in ["UAAS-42.png", "uaas-42-foo.png", "42.png", "42-foo.jpg"] {
            assert_eq!(
                classifier.extract_run_number(name).as_deref(),
                Some("42"),
                "{}",
                name
            );
        }
    }

    #[test]
    fn rejects_names_without_a_run_number() {
        let classifier = Classifier::new("UAAS");
        for name in ["notes.txt", "UAAS-.png", "UAAS-abc.png", "screenshot"] {
            assert_eq!(classifier.extract_run_number(name), None, "{}", name);
        }
    }

    #[test]
    fn groups_files_by_run_and_reports_unknown_runs() {
        let classifier = Classifier::new("UAAS");
        let snapshot = snapshot(vec![run(101, "EXECUTING"), run(102, "A EXECUTAR")]);
        let files = vec![
            file("UAAS-101.png"),
            file("UAAS-101-retry.png"),
            file("UAAS-102.jpg"),
            file("UAAS-999.png"),
        ];
        let classification = classifier.classify(&files, &snapshot);
        assert_eq!(classification.groups.len(), 2);
        assert_eq!(classification.groups["101"].len(), 2);
        assert_eq!(classification.groups["102"].len(), 1);
        assert_eq!(classification.ignored.len(), 1);
        assert_eq!(classification.ignored[0].filename, "UAAS-999.png");
        assert_eq!(classification.ignored[0].reason, IgnoreReason::RunNotFound);
    }

    #[test]
    fn non_executing_runs_cannot_receive_files() {
        let classifier = Classifier::new("UAAS");
        let snapshot = snapshot(vec![run(7, "PASSED")]);
        let classification = classifier.classify(&[file("UAAS-7.png")], &snapshot);
        assert!(classification.groups.is_empty());
        assert_eq!(
            classification.ignored[0].reason,
            IgnoreReason::RunNotExecuting
        );
        assert!(classification.ignored[0].detail.contains("PASSED"));
    }

    #[test]
    fn system_files_are_dropped_silently() {
        let classifier = Classifier::new("UAAS");
        let snapshot = snapshot(vec![run(7, "EXECUTING")]);
        let files = vec![file(".DS_Store"), file("thumbs.db"), file("UAAS-7.png")];
        let classification = classifier.classify(&files, &snapshot);
        assert_eq!(classification.groups["7"].len(), 1);
        assert!(classification.ignored.is_empty());
    }

    #[test]
    fn oversized_files_are_rejected_before_format_checks() {
        let classifier = Classifier::new("UAAS");
        let snapshot = snapshot(vec![run(7, "EXECUTING")]);
        let mut big = file("not-a-match");
        big.size = MAX_FILE_SIZE + 1;
        let classification = classifier.classify(&[big], &snapshot);
        assert_eq!(classification.ignored[0].reason, IgnoreReason::FileTooLarge);
    }

    #[test]
    fn reclassifying_the_same_snapshot_is_stable() {
        let classifier = Classifier::new("UAAS");
        let snapshot = snapshot(vec![run(101, "EXECUTING"), run(102, "PASSED")]);
        let files = vec![file("UAAS-101.png"), file("UAAS-102.png")];
        let first = classifier.classify(&files, &snapshot);
        let second = classifier.classify(&files, &snapshot);
        assert_eq!(
            first.groups.keys().collect::<Vec<_>>(),
            second.groups.keys().collect::<Vec<_>>()
        );
        assert_eq!(first.ignored.len(), second.ignored.len());
        assert_eq!(first.ignored[0].reason, second.ignored[0].reason);
    }
}
