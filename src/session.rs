use std::sync::{Arc, RwLock};

use crate::classifier::model::{Classification, GroupView, SelectionReport, UploadFile};
use crate::classifier::service::Classifier;
use crate::import::model::{ImportProgress, ImportResult, ImportState};
use crate::validation::model::ValidationSnapshot;

/// Single owner of the mutable pipeline state: the file selection, its
/// classification, the validation snapshot and the import state. Everything
/// goes through the transition methods below; handlers never poke fields.
#[derive(Default)]
pub struct Session {
    files: Vec<UploadFile>,
    classification: Option<Classification>,
    validation: Option<ValidationSnapshot>,
    import: ImportState,
}

pub type SharedSession = Arc<RwLock<Session>>;

#[derive(Debug, Eq, PartialEq)]
pub enum StateError {
    ImportInProgress,
}

impl Session {
    pub fn import_running(&self) -> bool {
        matches!(self.import, ImportState::Running(_))
    }

    pub fn validation(&self) -> Option<&ValidationSnapshot> {
        self.validation.as_ref()
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    pub fn import_state(&self) -> &ImportState {
        &self.import
    }

    pub fn set_selection(
        &mut self,
        classifier: &Classifier,
        files: Vec<UploadFile>,
    ) -> Result<(), StateError> {
        self.guard_idle()?;
        self.files = files;
        self.reclassify(classifier);
        Ok(())
    }

    pub fn clear_selection(&mut self) -> Result<(), StateError> {
        self.guard_idle()?;
        self.files.clear();
        self.classification = None;
        Ok(())
    }

    pub fn set_validation(
        &mut self,
        classifier: &Classifier,
        snapshot: ValidationSnapshot,
    ) -> Result<(), StateError> {
        self.guard_idle()?;
        self.validation = Some(snapshot);
        self.reclassify(classifier);
        Ok(())
    }

    pub fn begin_import(&mut self, total: usize) -> Result<(), StateError> {
        self.guard_idle()?;
        self.import = ImportState::Running(ImportProgress::new(total));
        Ok(())
    }

    pub fn progress_mut(&mut self) -> Option<&mut ImportProgress> {
        match &mut self.import {
            ImportState::Running(progress) => Some(progress),
            _ => None,
        }
    }

    /// Terminal transition. A successful import consumes the selection so
    /// the next upload starts from an empty state.
    pub fn finish_import(&mut self, result: ImportResult) {
        if result.success {
            self.files.clear();
            self.classification = None;
        }
        self.import = ImportState::Done(result);
    }

    pub fn dismiss_import(&mut self) -> Result<(), StateError> {
        match self.import {
            ImportState::Running(_) => Err(StateError::ImportInProgress),
            _ => {
                self.import = ImportState::Idle;
                Ok(())
            }
        }
    }

    pub fn selection_report(&self) -> SelectionReport {
        let groups = match (&self.classification, &self.validation) {
            (Some(classification), Some(snapshot)) => classification
                .groups
                .iter()
                .map(|(number, files)| GroupView {
                    run_number: number.clone(),
                    test_key: snapshot
                        .run_by_number(number)
                        .map(|run| run.test_key.clone())
                        .unwrap_or_else(|| number.clone()),
                    files: files.iter().map(|file| file.name.clone()).collect(),
                })
                .collect(),
            _ => Vec::new(),
        };
        SelectionReport {
            total_files: self.files.len(),
            requires_validation: self.validation.is_none(),
            groups,
            ignored: self
                .classification
                .as_ref()
                .map(|classification| classification.ignored.clone())
                .unwrap_or_default(),
        }
    }

    fn guard_idle(&self) -> Result<(), StateError> {
        if self.import_running() {
            Err(StateError::ImportInProgress)
        } else {
            Ok(())
        }
    }

    fn reclassify(&mut self, classifier: &Classifier) {
        self.classification = self
            .validation
            .as_ref()
            .map(|snapshot| classifier.classify(&self.files, snapshot));
    }
}

pub fn with_session<T>(session: &SharedSession, action: impl FnOnce(&mut Session) -> T) -> T {
    let mut guard = session.write().expect("session lock");
    action(&mut guard)
}

pub fn read_session<T>(session: &SharedSession, action: impl FnOnce(&Session) -> T) -> T {
    let guard = session.read().expect("session lock");
    action(&guard)
}
