//! Run Executor: stages a SOW into a scratch directory, runs the external agent
//! pipeline against a repository, and reports its merged output.

mod branch;
mod capture;
mod scratch;

pub use branch::extract_branch;

use crate::model::{RunOutcome, RunRequest};
use capture::MergedCapture;
use scratch::ScratchDir;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Name of the SOW file written into the scratch directory.
pub const SOW_FILE_NAME: &str = "sow_reference.md";

/// Environment variable carrying the push credential.
pub const CREDENTIAL_ENV: &str = "GITHUB_TOKEN";

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{0}")]
    Validation(String),
    #[error("failed to prepare scratch workspace: {0}")]
    Scratch(#[source] io::Error),
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("executor i/o failed: {0}")]
    Io(#[source] io::Error),
}

impl ExecutorError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ExecutorError::Validation(_))
    }

    /// Short label suitable for an error response.
    pub fn label(&self) -> &'static str {
        match self {
            ExecutorError::Validation(_) => "invalid request",
            _ => "Run failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Program to launch, e.g. `python3`.
    pub program: PathBuf,
    /// Arguments placed before the run arguments, e.g. the runner script.
    pub program_args: Vec<String>,
    /// Working directory for the child; inherited when `None`.
    pub working_dir: Option<PathBuf>,
    /// Shared workspace root handed to the executable for its own checkouts.
    pub workspace_root: PathBuf,
    /// Parent directory for scratch directories; the system temp dir when `None`.
    pub scratch_parent: Option<PathBuf>,
    /// Push credential, forwarded only when a push is requested.
    pub credential: Option<String>,
}

pub struct RunExecutor {
    config: ExecutorConfig,
}

impl RunExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Run the external executable once.
    ///
    /// A non-zero exit is reported as `success: false`. Errors are reserved for bad
    /// input and for failures to prepare or supervise the process. The scratch
    /// directory is gone when this returns, and also if the future is dropped early.
    pub async fn execute(&self, request: &RunRequest) -> Result<RunOutcome, ExecutorError> {
        let repo_url = request.repo_url.trim();
        if repo_url.is_empty() {
            return Err(ExecutorError::Validation("repoUrl is required".into()));
        }

        let parent = self
            .config
            .scratch_parent
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let mut scratch = ScratchDir::create(&parent).map_err(ExecutorError::Scratch)?;
        let result = self.run_in(&scratch, repo_url, request).await;
        scratch.release();
        result
    }

    async fn run_in(
        &self,
        scratch: &ScratchDir,
        repo_url: &str,
        request: &RunRequest,
    ) -> Result<RunOutcome, ExecutorError> {
        let sow_path = scratch.path().join(SOW_FILE_NAME);
        tokio::fs::write(&sow_path, request.sow_content.as_bytes())
            .await
            .map_err(ExecutorError::Scratch)?;

        let mut cmd = self.command(repo_url, &sow_path, request.auto_push);
        let program = self.config.program.display().to_string();
        debug!(program = %program, repo_url, auto_push = request.auto_push, "spawning executor");

        let mut child = cmd
            .spawn()
            .map_err(|source| ExecutorError::Spawn { program, source })?;
        let capture = MergedCapture::spawn(child.stdout.take(), child.stderr.take());

        let status = child.wait().await.map_err(ExecutorError::Io)?;
        let log = capture.finish().await.map_err(ExecutorError::Io)?;

        let exit_code = status.code();
        let success = exit_code == Some(0);
        let branch = extract_branch(&log);
        info!(
            repo_url,
            exit_code = exit_code.unwrap_or(-1),
            success,
            branch = branch.as_deref().unwrap_or("-"),
            "executor finished"
        );

        Ok(RunOutcome {
            success,
            log,
            branch,
            exit_code,
        })
    }

    /// `<program> [program_args..] <repo> --sow <file> --workspace-dir <root> [--push]`
    fn command(&self, repo_url: &str, sow_path: &Path, auto_push: bool) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.program_args)
            .arg(repo_url)
            .arg("--sow")
            .arg(sow_path)
            .arg("--workspace-dir")
            .arg(&self.config.workspace_root);
        if auto_push {
            cmd.arg("--push");
        }
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        match (auto_push, self.config.credential.as_deref()) {
            (true, Some(token)) => {
                cmd.env(CREDENTIAL_ENV, token);
            }
            _ => {
                cmd.env_remove(CREDENTIAL_ENV);
            }
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        scratch_parent: TempDir,
        executor: RunExecutor,
    }

    fn fixture(script: &str, credential: Option<&str>) -> Fixture {
        let scratch_parent = tempfile::tempdir().unwrap();
        let executor = RunExecutor::new(ExecutorConfig {
            program: PathBuf::from("sh"),
            program_args: vec!["-c".into(), script.into(), "runner".into()],
            working_dir: None,
            workspace_root: PathBuf::from("/srv/sow/workspaces"),
            scratch_parent: Some(scratch_parent.path().to_path_buf()),
            credential: credential.map(str::to_string),
        });
        Fixture {
            scratch_parent,
            executor,
        }
    }

    fn request(repo_url: &str) -> RunRequest {
        RunRequest {
            repo_url: repo_url.into(),
            sow_content: "# Update Auth Module\n".into(),
            auto_push: false,
        }
    }

    fn scratch_entries(fx: &Fixture) -> usize {
        std::fs::read_dir(fx.scratch_parent.path()).unwrap().count()
    }

    #[tokio::test]
    async fn empty_repo_url_is_rejected_before_anything_is_allocated() {
        let fx = fixture("touch \"$0.spawned\"", None);
        let err = fx.executor.execute(&request("   ")).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "repoUrl is required");
        assert_eq!(scratch_entries(&fx), 0);
    }

    #[tokio::test]
    async fn zero_exit_reports_success_and_log() {
        let fx = fixture("printf done", None);
        let outcome = fx
            .executor
            .execute(&request("https://github.com/acme/app"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RunOutcome {
                success: true,
                log: "done".into(),
                branch: None,
                exit_code: Some(0),
            }
        );
        assert_eq!(scratch_entries(&fx), 0);
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_outcome_not_an_error() {
        let fx = fixture("echo 'QA: FAIL: missing tests'; exit 1", None);
        let outcome = fx
            .executor
            .execute(&request("https://github.com/acme/app"))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(1));
        assert_eq!(outcome.log, "QA: FAIL: missing tests\n");
        assert_eq!(scratch_entries(&fx), 0);
    }

    #[tokio::test]
    async fn branch_is_extracted_from_output() {
        let fx = fixture("echo 'Pushed to branch: feature/x'", None);
        let outcome = fx
            .executor
            .execute(&request("https://github.com/acme/app"))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.branch.as_deref(), Some("feature/x"));
    }

    #[tokio::test]
    async fn passes_fixed_argument_contract() {
        let fx = fixture("printf '%s\\n' \"$@\"", None);
        let mut req = request("  https://github.com/acme/app  ");
        req.auto_push = true;
        let outcome = fx.executor.execute(&req).await.unwrap();
        let args: Vec<&str> = outcome.log.lines().collect();
        assert_eq!(args.len(), 6);
        assert_eq!(args[0], "https://github.com/acme/app");
        assert_eq!(args[1], "--sow");
        assert!(args[2].ends_with(SOW_FILE_NAME));
        assert!(args[2].starts_with(fx.scratch_parent.path().to_str().unwrap()));
        assert_eq!(args[3], "--workspace-dir");
        assert_eq!(args[4], "/srv/sow/workspaces");
        assert_eq!(args[5], "--push");
    }

    #[tokio::test]
    async fn sow_file_holds_request_content_and_is_removed_afterwards() {
        let fx = fixture("cat \"$3\"; echo \"$3\" >&2", None);
        let outcome = fx
            .executor
            .execute(&request("https://github.com/acme/app"))
            .await
            .unwrap();
        assert!(outcome.log.contains("# Update Auth Module\n"));
        let sow_path = outcome
            .log
            .lines()
            .find(|line| line.ends_with(SOW_FILE_NAME))
            .unwrap()
            .to_string();
        assert!(!Path::new(&sow_path).exists());
        assert!(!Path::new(&sow_path).parent().unwrap().exists());
    }

    #[tokio::test]
    async fn streams_are_merged_in_arrival_order() {
        let fx = fixture(
            "echo one; sleep 0.2; echo two >&2; sleep 0.2; echo three; sleep 0.2; echo four >&2",
            None,
        );
        let outcome = fx
            .executor
            .execute(&request("https://github.com/acme/app"))
            .await
            .unwrap();
        assert_eq!(outcome.log, "one\ntwo\nthree\nfour\n");
    }

    #[tokio::test]
    async fn credential_is_forwarded_only_for_push() {
        let script = "printf '%s' \"${GITHUB_TOKEN:-none}\"";
        let fx = fixture(script, Some("ghp_secret"));

        let outcome = fx
            .executor
            .execute(&request("https://github.com/acme/app"))
            .await
            .unwrap();
        assert_eq!(outcome.log, "none");

        let mut req = request("https://github.com/acme/app");
        req.auto_push = true;
        let outcome = fx.executor.execute(&req).await.unwrap();
        assert_eq!(outcome.log, "ghp_secret");
    }

    #[tokio::test]
    async fn push_without_credential_is_silent() {
        let fx = fixture("printf '%s' \"${GITHUB_TOKEN:-none}\"", None);
        let mut req = request("https://github.com/acme/app");
        req.auto_push = true;
        let outcome = fx.executor.execute(&req).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.log, "none");
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error_and_cleans_up() {
        let scratch_parent = tempfile::tempdir().unwrap();
        let executor = RunExecutor::new(ExecutorConfig {
            program: PathBuf::from("/nonexistent/sow-runner"),
            program_args: Vec::new(),
            working_dir: None,
            workspace_root: PathBuf::from("workspaces"),
            scratch_parent: Some(scratch_parent.path().to_path_buf()),
            credential: None,
        });
        let err = executor
            .execute(&request("https://github.com/acme/app"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn { .. }));
        assert_eq!(err.label(), "Run failed");
        assert_eq!(std::fs::read_dir(scratch_parent.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_scratch_parent_is_an_infrastructure_error() {
        let executor = RunExecutor::new(ExecutorConfig {
            program: PathBuf::from("sh"),
            program_args: vec!["-c".into(), "true".into()],
            working_dir: None,
            workspace_root: PathBuf::from("workspaces"),
            scratch_parent: Some(PathBuf::from("/nonexistent/scratch/parent")),
            credential: None,
        });
        let err = executor
            .execute(&request("https://github.com/acme/app"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Scratch(_)));
    }

    #[tokio::test]
    async fn concurrent_invocations_use_separate_scratch_directories() {
        let fx = fixture("dirname \"$3\"; sleep 0.2", None);
        let req = request("https://github.com/acme/app");
        let (a, b) = tokio::join!(fx.executor.execute(&req), fx.executor.execute(&req));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.log, b.log);
        assert_eq!(scratch_entries(&fx), 0);
    }
}
