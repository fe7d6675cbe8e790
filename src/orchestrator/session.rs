//! Session state: run history, selection, and the single-run lock.
//!
//! All mutation goes through [`Session`] methods. Records that are not running ignore
//! log appends and step advances, so a late tick can never touch a finished run.

use crate::model::{derive_title, RunId, RunRecord, RunStatus, Stage, StepStatus};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown run {0}")]
    UnknownRun(RunId),
    #[error("run {0} is not the selected run")]
    NotSelected(RunId),
}

/// Sidebar entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: RunId,
    pub title: String,
    pub status: RunStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// What the UI shows for the selected run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedRun {
    pub id: RunId,
    pub title: String,
    pub content: String,
    pub log: Vec<String>,
    pub status: RunStatus,
    pub is_running: bool,
    pub current_step: Option<Stage>,
    pub stages: Vec<(Stage, StepStatus)>,
    pub result_branch: Option<String>,
    pub repo_url: Option<String>,
}

/// Read-only projection of the session for presentation layers.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub history: Vec<HistoryItem>,
    pub selected: Option<SelectedRun>,
    pub running: bool,
}

#[derive(Debug)]
pub struct Session {
    /// Most recent first.
    runs: Vec<RunRecord>,
    selected: Option<RunId>,
    running: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::with_draft(crate::model::PLACEHOLDER_SOW)
    }
}

impl Session {
    /// A session holding one selected, editable draft.
    pub fn with_draft(content: impl Into<String>) -> Self {
        let draft = RunRecord::draft(content);
        let selected = Some(draft.id.clone());
        Self {
            runs: vec![draft],
            selected,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn get(&self, id: &RunId) -> Option<&RunRecord> {
        self.runs.iter().find(|r| &r.id == id)
    }

    fn get_mut(&mut self, id: &RunId) -> Option<&mut RunRecord> {
        self.runs.iter_mut().find(|r| &r.id == id)
    }

    fn running_mut(&mut self, id: &RunId) -> Option<&mut RunRecord> {
        self.get_mut(id).filter(|r| r.status == RunStatus::Running)
    }

    pub fn selected_id(&self) -> Option<&RunId> {
        self.selected.as_ref()
    }

    pub fn selected(&self) -> Option<&RunRecord> {
        self.selected.as_ref().and_then(|id| self.get(id))
    }

    /// Start a run from the selected record's working content.
    ///
    /// Returns `None` without touching anything when a run is already active.
    pub fn start(&mut self, repo_url: Option<&str>) -> Option<RunId> {
        if self.running {
            return None;
        }
        let snapshot = self
            .selected()
            .map(|r| r.working_sow.clone())
            .unwrap_or_default();
        let mut record = RunRecord::draft(snapshot);
        record.status = RunStatus::Running;
        record.current_step = Some(Stage::first());
        record.repo_url = repo_url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        let id = record.id.clone();
        self.runs.insert(0, record);
        self.selected = Some(id.clone());
        self.running = true;
        Some(id)
    }

    /// Change the selection. Unknown ids are ignored.
    pub fn select(&mut self, id: &RunId) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.selected = Some(id.clone());
        true
    }

    /// Replace the working SOW of the selected record and re-derive its title.
    ///
    /// A run's `sow_snapshot` is never changed once it has started; only idle drafts
    /// keep snapshot and working content in step.
    pub fn edit_sow(&mut self, id: &RunId, content: impl Into<String>) -> Result<(), SessionError> {
        if self.get(id).is_none() {
            return Err(SessionError::UnknownRun(id.clone()));
        }
        if self.selected.as_ref() != Some(id) {
            return Err(SessionError::NotSelected(id.clone()));
        }
        let content = content.into();
        let record = self
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownRun(id.clone()))?;
        if let Some(title) = derive_title(&content) {
            record.title = title;
        }
        if record.status == RunStatus::Idle {
            record.sow_snapshot = content.clone();
        }
        record.working_sow = content;
        record.touch();
        Ok(())
    }

    /// Move a running record to the next stage. Returns the stage entered, or `None`
    /// at the last stage or when the record is not running.
    pub fn advance(&mut self, id: &RunId) -> Option<Stage> {
        let record = self.running_mut(id)?;
        let next = record.current_step?.next()?;
        record.current_step = Some(next);
        record.touch();
        Some(next)
    }

    /// Append a line to a running record's log.
    pub fn append_log(&mut self, id: &RunId, line: impl Into<String>) -> bool {
        let Some(record) = self.running_mut(id) else {
            return false;
        };
        record.log.push(line.into());
        record.touch();
        true
    }

    /// Record the executor's exit code on a running record.
    pub fn set_exit_code(&mut self, id: &RunId, code: Option<i32>) {
        if let Some(record) = self.running_mut(id) {
            record.exit_code = code;
        }
    }

    /// Terminal transition: sets the status, clears the step, releases the lock.
    pub fn finish(&mut self, id: &RunId, status: RunStatus, branch: Option<String>) -> bool {
        let status = if status.is_terminal() {
            status
        } else {
            RunStatus::Failed
        };
        let finished = match self.running_mut(id) {
            Some(record) => {
                record.status = status;
                record.current_step = None;
                record.result_branch = if status == RunStatus::Succeeded {
                    branch
                } else {
                    None
                };
                record.touch();
                true
            }
            None => false,
        };
        if finished {
            self.running = false;
        }
        finished
    }

    pub fn history(&self) -> Vec<HistoryItem> {
        self.runs
            .iter()
            .map(|r| HistoryItem {
                id: r.id.clone(),
                title: r.title.clone(),
                status: r.status,
                updated_at: r.updated_at,
            })
            .collect()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            history: self.history(),
            selected: self.selected().map(|r| SelectedRun {
                id: r.id.clone(),
                title: r.title.clone(),
                content: r.working_sow.clone(),
                log: r.log.clone(),
                status: r.status,
                is_running: r.is_running(),
                current_step: r.current_step,
                stages: r.stage_statuses().to_vec(),
                result_branch: r.result_branch.clone(),
                repo_url: r.repo_url.clone(),
            }),
            running: self.running,
        }
    }
}
