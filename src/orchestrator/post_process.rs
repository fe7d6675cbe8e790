//! Post-run processing: folds the executor's authoritative answer into the record.

use super::dispatch::DispatchError;
use super::session::Session;
use crate::model::{RunId, RunOutcome, RunStatus};

/// Marks where the captured executor output begins in a run log.
pub(crate) const OUTPUT_SEPARATOR: &str = "---- executor output ----";

/// Final state of a completed run, ready for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProcessedRun {
    pub status: RunStatus,
    pub branch: Option<String>,
    /// Lines appended to the record, in order.
    pub appended: Vec<String>,
}

/// Apply the result of a dispatched run and close it out.
///
/// The synthesized progress lines stay in place; the captured output is appended
/// after them so the log is never reordered.
pub(crate) fn process_run_completion(
    session: &mut Session,
    id: &RunId,
    result: Result<RunOutcome, DispatchError>,
) -> ProcessedRun {
    let mut appended = Vec::new();
    let (status, branch) = match result {
        Ok(outcome) => {
            appended.push(OUTPUT_SEPARATOR.to_string());
            appended.extend(outcome.log.lines().map(str::to_string));
            session.set_exit_code(id, outcome.exit_code);
            if outcome.success {
                appended.push(match outcome.branch.as_deref() {
                    Some(branch) => format!("[DONE] Run succeeded (branch {branch})"),
                    None => "[DONE] Run succeeded".to_string(),
                });
                (RunStatus::Succeeded, outcome.branch)
            } else {
                appended.push(match outcome.exit_code {
                    Some(code) => format!("[FAILED] Executor exited with code {code}"),
                    None => "[FAILED] Executor terminated by signal".to_string(),
                });
                (RunStatus::Failed, None)
            }
        }
        Err(e) => {
            appended.push(format!("[ERROR] {e}"));
            (RunStatus::Failed, None)
        }
    };

    for line in &appended {
        session.append_log(id, line.clone());
    }
    session.finish(id, status, branch.clone());

    ProcessedRun {
        status,
        branch,
        appended,
    }
}
