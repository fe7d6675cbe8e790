//! Text summary builder for CLI output.
//!
//! Formats a finished run record into human-readable lines for text mode.

use crate::model::{RunRecord, StepStatus};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn step_marker(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Done => "[x]",
        StepStatus::Active => "[>]",
        StepStatus::Idle => "[ ]",
    }
}

/// Build a text summary for a run record.
pub(crate) fn build_text_summary(record: &RunRecord) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Run: {} ({})", record.title, record.id));
    lines.push(format!("Status: {}", record.status.as_str()));
    match record.repo_url.as_deref() {
        Some(url) => lines.push(format!("Repository: {url}")),
        None => lines.push("Repository: - (offline demo)".to_string()),
    }

    let timeline = record
        .stage_statuses()
        .iter()
        .map(|(stage, status)| format!("{} {}", step_marker(*status), stage.key()))
        .collect::<Vec<_>>()
        .join("  ");
    lines.push(format!("Stages: {timeline}"));

    if let Some(branch) = record.result_branch.as_deref() {
        lines.push(format!("Branch: {branch}"));
    }
    if let Some(code) = record.exit_code {
        lines.push(format!("Exit code: {code}"));
    }
    lines.push(format!("Log lines: {}", record.log.len()));

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunStatus, Stage};

    #[test]
    fn summary_for_successful_run() {
        let mut record = RunRecord::draft("# Update Auth Module\n");
        record.status = RunStatus::Succeeded;
        record.repo_url = Some("https://github.com/acme/app".into());
        record.result_branch = Some("feature/auth".into());
        record.exit_code = Some(0);
        record.log = vec!["a".into(), "b".into()];

        let summary = build_text_summary(&record);
        assert_eq!(summary.lines[1], "Status: succeeded");
        assert!(summary.lines.contains(&"Branch: feature/auth".to_string()));
        assert!(summary.lines.contains(&"Exit code: 0".to_string()));
        assert_eq!(summary.lines.last().unwrap(), "Log lines: 2");
        assert!(summary.lines[3].contains("[x] qa"));
    }

    #[test]
    fn summary_marks_active_stage() {
        let mut record = RunRecord::draft("no heading");
        record.status = RunStatus::Running;
        record.current_step = Some(Stage::Architect);

        let summary = build_text_summary(&record);
        assert_eq!(summary.lines[2], "Repository: - (offline demo)");
        assert_eq!(
            summary.lines[3],
            "Stages: [x] auditor  [x] bridge  [>] architect  [ ] artisan  [ ] qa"
        );
        assert!(!summary.lines.iter().any(|l| l.starts_with("Branch:")));
    }
}
