use crate::model::{RunId, SessionEvent, TargetConfig};
use crate::orchestrator::SessionView;
use crossterm::event::KeyCode;
use std::path::PathBuf;

pub const TAB_DASHBOARD: usize = 0;
pub const TAB_HELP: usize = 1;
pub const TAB_COUNT: usize = 2;

#[derive(Default)]
pub struct UiState {
    pub tab: usize,
    pub info: String,
    /// Latest projection published by the controller.
    pub view: SessionView,
    pub history_selected: usize, // Index into view.history (0 = most recent)
    /// Source file for the `o` reload key.
    pub sow_path: Option<PathBuf>,
    /// Lines scrolled up from the bottom of the log pane.
    pub log_scroll: usize,
    /// Where the next run goes, as last sent to the controller.
    pub target: TargetConfig,
    /// Repository URL being typed; `Some` while the prompt is open.
    pub url_input: Option<String>,
}

impl UiState {
    /// Replace the view and keep the sidebar cursor on the selected run.
    pub fn set_view(&mut self, view: SessionView) {
        let previous = self.selected_id().cloned();
        self.view = view;
        if let Some(pos) = self
            .view
            .selected
            .as_ref()
            .and_then(|s| self.view.history.iter().position(|h| h.id == s.id))
        {
            self.history_selected = pos;
        } else {
            self.history_selected = self
                .history_selected
                .min(self.view.history.len().saturating_sub(1));
        }
        if self.selected_id() != previous.as_ref() {
            self.log_scroll = 0;
        }
    }

    pub fn selected_id(&self) -> Option<&RunId> {
        self.view.history.get(self.history_selected).map(|h| &h.id)
    }

    /// Move the sidebar cursor; returns the newly highlighted run when it changed.
    pub fn move_selection(&mut self, delta: isize) -> Option<RunId> {
        if self.view.history.is_empty() {
            return None;
        }
        let max = self.view.history.len() - 1;
        let next = self.history_selected.saturating_add_signed(delta).min(max);
        if next == self.history_selected {
            return None;
        }
        self.history_selected = next;
        self.log_scroll = 0;
        self.selected_id().cloned()
    }

    pub fn begin_target_edit(&mut self) {
        self.url_input = Some(self.target.repo_url.clone());
    }

    /// Feed a key to the open URL prompt. Returns the new target once applied.
    pub fn input_key(&mut self, code: KeyCode) -> Option<TargetConfig> {
        let input = self.url_input.as_mut()?;
        match code {
            KeyCode::Char(c) => input.push(c),
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Esc => {
                self.url_input = None;
                self.info = "Target unchanged".into();
            }
            KeyCode::Enter => {
                let url = self.url_input.take().unwrap_or_default();
                self.target.repo_url = url.trim().to_string();
                return Some(self.target.clone());
            }
            _ => {}
        }
        None
    }

    pub fn toggle_auto_push(&mut self) -> TargetConfig {
        self.target.auto_push = !self.target.auto_push;
        self.target.clone()
    }

    pub fn apply_event(&mut self, ev: SessionEvent) {
        match ev {
            SessionEvent::RunStarted { title, .. } => {
                self.info = format!("Started: {title}");
            }
            SessionEvent::StepEntered { stage, .. } => {
                self.info = stage.label().to_string();
            }
            SessionEvent::RunFinished { status, branch, .. } => {
                self.info = match branch {
                    Some(branch) => format!("Run {} (branch {branch})", status.as_str()),
                    None => format!("Run {}", status.as_str()),
                };
            }
            SessionEvent::Info(info) => self.info = info,
            SessionEvent::LogLine { .. } => {}
        }
    }
}
