use crate::executor::{ExecutorConfig, RunExecutor};
use crate::model::{RunRequest, RunStatus, SessionEvent, TargetConfig, PLACEHOLDER_SOW};
use crate::orchestrator::{
    ControllerConfig, HttpDispatcher, LocalDispatcher, RunDispatcher, Session, SessionCommand,
    SessionController,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "sow-dashboard",
    version,
    about = "Statement-of-Work run dashboard with an agent pipeline executor"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub runner: RunnerArgs,

    /// Run once and print the final record as JSON (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Run once and print a text summary (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Initial SOW content for the draft record
    #[arg(long)]
    pub sow: Option<PathBuf>,

    /// Target repository; runs fall back to the offline demo when unset
    #[arg(long)]
    pub repo_url: Option<String>,

    /// Ask the executor to push its result branch
    #[arg(long)]
    pub auto_push: bool,

    /// Use a remote executor host (e.g. http://127.0.0.1:3000) instead of running in-process
    #[arg(long)]
    pub executor_url: Option<String>,

    /// Spacing between progress steps
    #[arg(long, default_value = "1400ms")]
    pub tick_interval: humantime::Duration,

    /// Export the finished run record as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Log file used while the dashboard owns the terminal
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Host the run executor over HTTP
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:3000")]
        listen: SocketAddr,

        /// Ceiling for a single run; the child is killed when it elapses
        #[arg(long, default_value = "5m")]
        max_duration: humantime::Duration,
    },
    /// Invoke the run executor once and print its result as JSON
    Exec {
        /// Repository the pipeline operates on
        repo_url: String,

        /// SOW file to stage (the placeholder template when omitted)
        #[arg(long)]
        sow: Option<PathBuf>,

        /// Ask the executor to push its result branch
        #[arg(long)]
        auto_push: bool,
    },
}

/// How the agent pipeline executable is launched.
#[derive(Debug, Args, Clone)]
pub struct RunnerArgs {
    /// Program that runs the agent pipeline
    #[arg(long, global = true, default_value = "python3")]
    pub runner: PathBuf,

    /// Argument passed to the runner before the run arguments (repeatable)
    #[arg(
        long = "runner-arg",
        global = true,
        value_name = "ARG",
        default_value = "runner.py",
        allow_hyphen_values = true
    )]
    pub runner_args: Vec<String>,

    /// Working directory for the runner
    #[arg(long, global = true)]
    pub runner_dir: Option<PathBuf>,

    /// Shared workspace root handed to the runner
    #[arg(long, global = true)]
    pub workspace_dir: Option<PathBuf>,

    /// Parent directory for per-run scratch directories
    #[arg(long, global = true)]
    pub scratch_dir: Option<PathBuf>,

    /// Push credential, forwarded to the runner only for pushing runs
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub push_token: Option<String>,
}

impl Cli {
    /// Whether the dashboard will own the terminal.
    pub fn is_tui(&self) -> bool {
        self.command.is_none() && !self.json && !self.text && cfg!(feature = "tui")
    }
}

/// Run the selected mode. `Ok(false)` means the run itself did not succeed.
pub async fn run(args: Cli) -> Result<bool> {
    match args.command.clone() {
        Some(Command::Serve {
            listen,
            max_duration,
        }) => {
            let executor = Arc::new(RunExecutor::new(build_executor_config(&args.runner)));
            crate::server::serve(listen, executor, Duration::from(max_duration)).await?;
            Ok(true)
        }
        Some(Command::Exec {
            repo_url,
            sow,
            auto_push,
        }) => run_exec(&args.runner, repo_url, sow.as_deref(), auto_push).await,
        None => {
            if !args.json && !args.text {
                #[cfg(feature = "tui")]
                {
                    crate::tui::run(args).await?;
                    return Ok(true);
                }
            }
            run_session(args).await
        }
    }
}

/// Read SOW content from a file, or use the placeholder template.
pub fn load_sow(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p).with_context(|| format!("read SOW {}", p.display())),
        None => Ok(PLACEHOLDER_SOW.to_string()),
    }
}

/// Build an `ExecutorConfig` from CLI arguments.
pub fn build_executor_config(args: &RunnerArgs) -> ExecutorConfig {
    ExecutorConfig {
        program: args.runner.clone(),
        program_args: args.runner_args.clone(),
        working_dir: args.runner_dir.clone(),
        workspace_root: args
            .workspace_dir
            .clone()
            .unwrap_or_else(crate::storage::default_workspace_dir),
        scratch_parent: args.scratch_dir.clone(),
        credential: args.push_token.clone().filter(|t| !t.is_empty()),
    }
}

/// Remote executor when `--executor-url` is set, otherwise in-process.
pub fn build_dispatcher(args: &Cli) -> Arc<dyn RunDispatcher> {
    match args.executor_url.as_deref() {
        Some(url) => {
            let dispatcher = HttpDispatcher::new(url);
            tracing::info!(endpoint = dispatcher.endpoint(), "using remote executor");
            Arc::new(dispatcher)
        }
        None => Arc::new(LocalDispatcher::new(Arc::new(RunExecutor::new(
            build_executor_config(&args.runner),
        )))),
    }
}

pub fn build_controller_config(args: &Cli) -> ControllerConfig {
    ControllerConfig {
        tick_interval: Duration::from(args.tick_interval),
        target: TargetConfig {
            repo_url: args.repo_url.clone().unwrap_or_default(),
            auto_push: args.auto_push,
        },
    }
}

async fn run_exec(
    runner: &RunnerArgs,
    repo_url: String,
    sow: Option<&Path>,
    auto_push: bool,
) -> Result<bool> {
    let executor = RunExecutor::new(build_executor_config(runner));
    let request = RunRequest {
        repo_url,
        sow_content: load_sow(sow)?,
        auto_push,
    };
    let outcome = executor.execute(&request).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(outcome.success)
}

/// One session run without the dashboard: stream progress, then print the result.
async fn run_session(args: Cli) -> Result<bool> {
    let session = Session::with_draft(load_sow(args.sow.as_deref())?);
    let (out_tx, out_handle) = spawn_output_writer();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<SessionCommand>();

    let (controller, _view_rx) = SessionController::new(
        session,
        build_controller_config(&args),
        Some(build_dispatcher(&args)),
        event_tx,
    );
    let handle = tokio::spawn(controller.run(cmd_rx));
    let _ = cmd_tx.send(SessionCommand::Start);
    let _ = cmd_tx.send(SessionCommand::Quit);

    // The controller drops its event sender when it returns.
    while let Some(ev) = event_rx.recv().await {
        if args.json {
            continue;
        }
        match ev {
            SessionEvent::RunStarted { title, .. } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("== {title} ==")));
            }
            SessionEvent::StepEntered { stage, .. } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("-- {}", stage.label())));
            }
            SessionEvent::LogLine { line, .. } => {
                let _ = out_tx.send(OutputLine::Stderr(line));
            }
            SessionEvent::Info(info) => {
                let _ = out_tx.send(OutputLine::Stderr(info));
            }
            SessionEvent::RunFinished { .. } => {}
        }
    }

    let session = handle.await.context("session controller task failed")??;
    let record = session
        .selected()
        .cloned()
        .context("session finished without a run")?;

    if let Some(p) = args.export_json.as_deref() {
        crate::storage::export_json(p, &record)?;
        let _ = out_tx.send(OutputLine::Stderr(format!("Exported: {}", p.display())));
    }

    if args.json {
        let out = serde_json::to_string_pretty(&record)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        for line in crate::text_summary::build_text_summary(&record).lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(record.status == RunStatus::Succeeded)
}
