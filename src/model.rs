use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Title used when a SOW has no heading line.
pub const DEFAULT_TITLE: &str = "Untitled SOW";

/// Template content for a fresh draft.
pub const PLACEHOLDER_SOW: &str = "# Statement of Work

## Objective
Describe the scope and deliverables for this engagement.

## Requirements
- Clear acceptance criteria
- Timeline and milestones
- Success metrics

## Notes
Add any context that helps the agent understand your needs.
";

/// Opaque run identifier, unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a random identifier.
    pub fn generate() -> Self {
        let mut b = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut b);
        Self(format!("{:016x}", u64::from_le_bytes(b)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The fixed pipeline stages, in order. Used for progress reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Auditor,
    Bridge,
    Architect,
    Artisan,
    Qa,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Auditor,
        Stage::Bridge,
        Stage::Architect,
        Stage::Artisan,
        Stage::Qa,
    ];

    pub fn first() -> Stage {
        Self::ALL[0]
    }

    pub fn index(self) -> usize {
        match self {
            Stage::Auditor => 0,
            Stage::Bridge => 1,
            Stage::Architect => 2,
            Stage::Artisan => 3,
            Stage::Qa => 4,
        }
    }

    /// The stage after this one, or `None` for the last stage.
    pub fn next(self) -> Option<Stage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn key(self) -> &'static str {
        match self {
            Stage::Auditor => "auditor",
            Stage::Bridge => "bridge",
            Stage::Architect => "architect",
            Stage::Artisan => "artisan",
            Stage::Qa => "qa",
        }
    }

    /// User-facing description shown on the progress timeline.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Auditor => "Understanding your requirements...",
            Stage::Bridge => "Checking your current code...",
            Stage::Architect => "Designing the solution...",
            Stage::Artisan => "Applying the magic (Writing code)...",
            Stage::Qa => "Double-checking everything...",
        }
    }

    /// Feedback lines appended while a real executor call is in flight.
    pub fn progress_lines(self) -> &'static [&'static str] {
        match self {
            Stage::Auditor => &["[auditor] Parsing SOW requirements"],
            Stage::Bridge => &[
                "[bridge] Fetching target repository",
                "[bridge] Mapping requirements to source files",
            ],
            Stage::Architect => &["[architect] Planning changes"],
            Stage::Artisan => &["[artisan] Generating patches"],
            Stage::Qa => &["[qa] Running compliance checks"],
        }
    }

    /// Deterministic line for the offline fallback progression.
    pub fn canned_line(self) -> &'static str {
        match self {
            Stage::Auditor => "[auditor] Requirements extracted from SOW (demo)",
            Stage::Bridge => "[bridge] Codebase scanned (demo)",
            Stage::Architect => "[architect] Change plan drafted (demo)",
            Stage::Artisan => "[artisan] Patches written (demo)",
            Stage::Qa => "[qa] All checks passed (demo)",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

/// Per-stage display status on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Idle,
    Active,
    Done,
}

/// Timeline status of `stage` given the run's current step.
pub fn step_status(current: Option<Stage>, stage: Stage) -> StepStatus {
    let Some(current) = current else {
        return StepStatus::Idle;
    };
    if stage.index() < current.index() {
        StepStatus::Done
    } else if stage == current {
        StepStatus::Active
    } else {
        StepStatus::Idle
    }
}

/// Title from the first markdown (ATX) heading line of a SOW, if any.
///
/// A heading is one to six `#` followed by whitespace and non-empty text.
pub fn derive_title(content: &str) -> Option<String> {
    content.lines().find_map(heading_text)
}

fn heading_text(line: &str) -> Option<String> {
    let line = line.trim();
    let level = line.bytes().take_while(|b| *b == b'#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    // A closing run of `#` after whitespace is decoration, as in `## Title ##`.
    let text = rest.trim();
    let unclosed = text.trim_end_matches('#');
    let text = if unclosed.is_empty() || unclosed.ends_with(char::is_whitespace) {
        unclosed.trim_end()
    } else {
        text
    };
    (!text.is_empty()).then(|| text.to_string())
}

/// One run attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: RunId,
    pub title: String,
    /// SOW text captured when the run started.
    pub sow_snapshot: String,
    /// Editable content; seeds the snapshot of the next run started from this record.
    pub working_sow: String,
    pub log: Vec<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub current_step: Option<Stage>,
    #[serde(default)]
    pub result_branch: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl RunRecord {
    /// An editable draft that has not been run.
    pub fn draft(content: impl Into<String>) -> Self {
        let content = content.into();
        let now = OffsetDateTime::now_utc();
        Self {
            id: RunId::generate(),
            title: derive_title(&content).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            sow_snapshot: content.clone(),
            working_sow: content,
            log: Vec::new(),
            status: RunStatus::Idle,
            current_step: None,
            result_branch: None,
            repo_url: None,
            exit_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Timeline status for every stage, in order.
    pub fn stage_statuses(&self) -> [(Stage, StepStatus); 5] {
        Stage::ALL.map(|stage| {
            let status = if self.status == RunStatus::Succeeded {
                StepStatus::Done
            } else {
                step_status(self.current_step, stage)
            };
            (stage, status)
        })
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}

/// Where runs are sent. An empty repository URL selects the offline fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    pub repo_url: String,
    pub auto_push: bool,
}

impl TargetConfig {
    pub fn is_configured(&self) -> bool {
        !self.repo_url.trim().is_empty()
    }
}

impl fmt::Display for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_configured() {
            return f.write_str("offline demo");
        }
        let push = if self.auto_push { "on" } else { "off" };
        write!(f, "{} (push {push})", self.repo_url.trim())
    }
}

/// Body of a run request sent to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub sow_content: String,
    #[serde(default)]
    pub auto_push: bool,
}

/// Result of one executor invocation. A non-zero exit is `success: false`, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub success: bool,
    pub log: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Error body returned by the executor host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Events emitted by the session controller for presentation layers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    RunStarted { id: RunId, title: String },
    StepEntered { id: RunId, stage: Stage },
    LogLine { id: RunId, line: String },
    RunFinished {
        id: RunId,
        status: RunStatus,
        branch: Option<String>,
    },
    Info(String),
}
