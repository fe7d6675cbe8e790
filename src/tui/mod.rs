mod editor;
mod export;
mod help;
mod state;

use crate::cli::{build_controller_config, build_dispatcher, load_sow, Cli};
use crate::model::{RunStatus, SessionEvent, StepStatus, TargetConfig};
use crate::orchestrator::{Session, SessionCommand, SessionController, SessionView};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{UiState, TAB_COUNT, TAB_DASHBOARD, TAB_HELP};
use std::path::PathBuf;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

/// How the UI loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UiExit {
    /// Quit once no run was active.
    Finished,
    /// Ctrl-C while a run was active.
    Aborted,
}

pub async fn run(args: Cli) -> Result<()> {
    let session = Session::with_draft(load_sow(args.sow.as_deref())?);
    // Unbounded channels keep the controller from ever waiting on the UI.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<SessionCommand>();

    let config = build_controller_config(&args);
    let target = config.target.clone();
    let (controller, view_rx) = SessionController::new(
        session,
        config,
        Some(build_dispatcher(&args)),
        event_tx,
    );
    let controller_task = tokio::spawn(controller.run(cmd_rx));

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let sow_path = args.sow.clone();
    let ui_handle =
        std::thread::spawn(move || run_threaded(sow_path, target, view_rx, event_rx, cmd_tx));

    let exit = match tokio::task::spawn_blocking(move || ui_handle.join()).await {
        Ok(Ok(res)) => res,
        Ok(Err(_)) => Err(anyhow::anyhow!("TUI thread panicked")),
        Err(e) => Err(anyhow::anyhow!("TUI join failed: {e}")),
    };

    match exit {
        Ok(UiExit::Finished) => {
            controller_task
                .await
                .context("session controller task failed")??;
            Ok(())
        }
        Ok(UiExit::Aborted) => {
            // Dropping the controller drops the in-flight call; the child is killed on drop.
            controller_task.abort();
            Ok(())
        }
        Err(e) => {
            controller_task.abort();
            Err(e)
        }
    }
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    sow_path: Option<PathBuf>,
    target: TargetConfig,
    mut view_rx: watch::Receiver<SessionView>,
    mut event_rx: UnboundedReceiver<SessionEvent>,
    cmd_tx: UnboundedSender<SessionCommand>,
) -> Result<UiExit> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        sow_path,
        target,
        info: "Press s to start a run, ? for help".into(),
        ..Default::default()
    };
    state.set_view(view_rx.borrow_and_update().clone());

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();
    let mut quit_pending = false;

    let res = loop {
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }
        match view_rx.has_changed() {
            Ok(true) => state.set_view(view_rx.borrow_and_update().clone()),
            Ok(false) => {}
            // Controller is gone; nothing left to show.
            Err(_) => break Ok(UiExit::Finished),
        }
        if quit_pending && !state.view.running {
            break Ok(UiExit::Finished);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if state.url_input.is_some()
                    && !(k.modifiers == KeyModifiers::CONTROL && k.code == KeyCode::Char('c'))
                {
                    if let Some(target) = state.input_key(k.code) {
                        send_target(&mut state, &cmd_tx, target);
                    }
                    continue;
                }
                match (k.modifiers, k.code) {
                    (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(SessionCommand::Quit);
                        if state.view.running {
                            break Ok(UiExit::Aborted);
                        }
                        break Ok(UiExit::Finished);
                    }
                    (_, KeyCode::Char('q')) => {
                        let _ = cmd_tx.send(SessionCommand::Quit);
                        if !state.view.running {
                            break Ok(UiExit::Finished);
                        }
                        quit_pending = true;
                        state.info =
                            "Quitting after the active run finishes (Ctrl-C to abort)".into();
                    }
                    (_, KeyCode::Char('s')) | (_, KeyCode::Enter) => {
                        if state.view.running {
                            state.info = "A run is already in progress".into();
                        } else {
                            let _ = cmd_tx.send(SessionCommand::Start);
                        }
                    }
                    (_, KeyCode::Char('o')) => reload_sow(&mut state, &cmd_tx),
                    (_, KeyCode::Char('e')) => {
                        if let Err(e) = edit_selected_sow(&mut terminal, &mut state, &cmd_tx) {
                            state.info = format!("Edit failed: {e:#}");
                        }
                    }
                    (_, KeyCode::Char('u')) => state.begin_target_edit(),
                    (_, KeyCode::Char('a')) => {
                        let target = state.toggle_auto_push();
                        send_target(&mut state, &cmd_tx, target);
                    }
                    (_, KeyCode::Char('x')) => {
                        let target = state.selected_id().cloned();
                        match (target, export::export_dir()) {
                            (Some(id), Ok(dir)) => {
                                let _ = cmd_tx.send(SessionCommand::Export { id, dir });
                            }
                            (None, _) => state.info = "No run selected".into(),
                            (_, Err(e)) => state.info = format!("JSON export failed: {e:#}"),
                        }
                    }
                    (_, KeyCode::Char('y')) => match state.view.selected.as_ref() {
                        Some(selected) if !selected.log.is_empty() => {
                            state.info = match export::copy_to_clipboard(&export::log_text(
                                &selected.log,
                            )) {
                                Ok(()) => format!(
                                    "✓ Copied {} log line(s) to clipboard",
                                    selected.log.len()
                                ),
                                Err(e) => format!("Clipboard copy failed: {e:#}"),
                            };
                        }
                        _ => state.info = "Nothing to copy: the selected log is empty".into(),
                    },
                    (_, KeyCode::Tab) => {
                        state.tab = (state.tab + 1) % TAB_COUNT;
                    }
                    (_, KeyCode::Char('?')) => {
                        state.tab = TAB_HELP;
                    }
                    (_, KeyCode::Up) | (_, KeyCode::Char('k')) => {
                        if let Some(id) = state.move_selection(-1) {
                            let _ = cmd_tx.send(SessionCommand::Select(id));
                        }
                    }
                    (_, KeyCode::Down) | (_, KeyCode::Char('j')) => {
                        if let Some(id) = state.move_selection(1) {
                            let _ = cmd_tx.send(SessionCommand::Select(id));
                        }
                    }
                    (_, KeyCode::PageUp) => {
                        state.log_scroll = state.log_scroll.saturating_add(10);
                    }
                    (_, KeyCode::PageDown) => {
                        state.log_scroll = state.log_scroll.saturating_sub(10);
                    }
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn send_target(state: &mut UiState, cmd_tx: &UnboundedSender<SessionCommand>, target: TargetConfig) {
    if cmd_tx.send(SessionCommand::Configure(target)).is_err() {
        state.info = "Session controller is gone".into();
    }
}

/// Open the selected SOW in `$VISUAL`/`$EDITOR` and send back the saved text.
fn edit_selected_sow<W: io::Write>(
    terminal: &mut Terminal<CrosstermBackend<W>>,
    state: &mut UiState,
    cmd_tx: &UnboundedSender<SessionCommand>,
) -> Result<()> {
    let Some((id, content)) = state
        .view
        .selected
        .as_ref()
        .map(|s| (s.id.clone(), s.content.clone()))
    else {
        state.info = "No run selected".into();
        return Ok(());
    };
    let Some(editor) = editor::editor_from_env() else {
        state.info = "Set $VISUAL or $EDITOR to edit the SOW".into();
        return Ok(());
    };

    // Hand the terminal to the editor, then take it back whatever happened.
    disable_raw_mode().ok();
    execute!(io::stdout(), LeaveAlternateScreen).ok();
    let edited = editor::edit_text(&editor, &content);
    enable_raw_mode().context("enable raw mode")?;
    execute!(io::stdout(), EnterAlternateScreen).ok();
    terminal.clear().ok();

    match edited? {
        Some(content) => {
            let _ = cmd_tx.send(SessionCommand::EditSow { id, content });
            state.info = "SOW updated".into();
        }
        None => state.info = "SOW unchanged".into(),
    }
    Ok(())
}

/// Replace the selected record's SOW with the `--sow` file's current content.
fn reload_sow(state: &mut UiState, cmd_tx: &UnboundedSender<SessionCommand>) {
    let Some(path) = state.sow_path.clone() else {
        state.info = "No SOW file configured (start with --sow <FILE>)".into();
        return;
    };
    let Some(id) = state.selected_id().cloned() else {
        state.info = "No run selected".into();
        return;
    };
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let _ = cmd_tx.send(SessionCommand::EditSow { id, content });
            state.info = format!("Reloaded SOW from {}", path.display());
        }
        Err(e) => {
            state.info = format!("Reload failed: {}: {e}", path.display());
        }
    }
}

fn status_color(status: RunStatus) -> Color {
    match status {
        RunStatus::Idle => Color::Gray,
        RunStatus::Running => Color::Yellow,
        RunStatus::Succeeded => Color::Green,
        RunStatus::Failed => Color::Red,
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![Line::from("Dashboard"), Line::from("Help")])
        .select(state.tab)
        .block(Block::default().borders(Borders::ALL).title("sow-dashboard"))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        TAB_DASHBOARD => draw_dashboard(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }

    let line = match state.url_input.as_deref() {
        Some(input) => Line::from(vec![
            Span::styled("Repository URL: ", Style::default().fg(Color::Yellow)),
            Span::raw(format!("{input}_")),
            Span::styled(
                "  (Enter to apply, empty for offline demo, Esc to cancel)",
                Style::default().fg(Color::DarkGray),
            ),
        ]),
        None => Line::from(vec![
            Span::styled("Target: ", Style::default().fg(Color::Gray)),
            Span::styled(state.target.to_string(), Style::default().fg(Color::Cyan)),
            Span::styled(" | Info: ", Style::default().fg(Color::Gray)),
            Span::raw(state.info.as_str()),
        ]),
    };
    let status = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
    f.render_widget(status, chunks[2]);
}

fn draw_dashboard(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(34), Constraint::Min(0)].as_ref())
        .split(area);
    draw_history(columns[0], f, state);

    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(7),      // Stage timeline
                Constraint::Percentage(35), // SOW
                Constraint::Min(0),         // Log
            ]
            .as_ref(),
        )
        .split(columns[1]);
    draw_timeline(main[0], f, state);
    draw_sow(main[1], f, state);
    draw_log(main[2], f, state);
}

fn draw_history(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let time_format = time::macros::format_description!("[hour]:[minute]:[second]");
    let visible = (area.height as usize).saturating_sub(2).max(1);
    let offset = state.history_selected.saturating_sub(visible - 1);
    let title_width = (area.width as usize).saturating_sub(16).max(4);

    let lines: Vec<Line> = state
        .view
        .history
        .iter()
        .enumerate()
        .skip(offset)
        .take(visible)
        .map(|(i, item)| {
            let title: String = item.title.chars().take(title_width).collect();
            let updated = item
                .updated_at
                .format(&time_format)
                .unwrap_or_default();
            let mut title_style = Style::default();
            if i == state.history_selected {
                title_style = title_style.add_modifier(Modifier::REVERSED);
            }
            Line::from(vec![
                Span::styled("● ", Style::default().fg(status_color(item.status))),
                Span::styled(title, title_style),
                Span::styled(format!(" {updated}"), Style::default().fg(Color::DarkGray)),
            ])
        })
        .collect();

    let p = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("History ({}) UTC", state.view.history.len())),
    );
    f.render_widget(p, area);
}

fn draw_timeline(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let Some(selected) = state.view.selected.as_ref() else {
        f.render_widget(Block::default().borders(Borders::ALL).title("Progress"), area);
        return;
    };
    let lines: Vec<Line> = selected
        .stages
        .iter()
        .map(|(stage, status)| {
            let (marker, style) = match status {
                StepStatus::Done => ("✓", Style::default().fg(Color::Green)),
                StepStatus::Active => (
                    "▶",
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                ),
                StepStatus::Idle => ("·", Style::default().fg(Color::DarkGray)),
            };
            Line::from(vec![
                Span::styled(format!(" {marker} "), style),
                Span::styled(stage.label(), style),
            ])
        })
        .collect();

    let title = Line::from(vec![
        Span::raw("Progress "),
        Span::styled(
            selected.status.as_str(),
            Style::default().fg(status_color(selected.status)),
        ),
    ]);
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn draw_sow(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let (title, content) = match state.view.selected.as_ref() {
        Some(selected) => (selected.title.as_str(), selected.content.as_str()),
        None => ("SOW", ""),
    };
    let p = Paragraph::new(content)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn draw_log(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let Some(selected) = state.view.selected.as_ref() else {
        f.render_widget(Block::default().borders(Borders::ALL).title("Log"), area);
        return;
    };
    let visible = (area.height as usize).saturating_sub(2);
    let end = selected.log.len().saturating_sub(state.log_scroll);
    let start = end.saturating_sub(visible);
    let lines: Vec<Line> = selected.log[start..end]
        .iter()
        .map(|line| {
            let style = if line.starts_with("[ERROR]") || line.starts_with("[FAILED]") {
                Style::default().fg(Color::Red)
            } else if line.starts_with("[DONE]") {
                Style::default().fg(Color::Green)
            } else {
                Style::default()
            };
            Line::from(Span::styled(line.as_str(), style))
        })
        .collect();

    let mut title = vec![Span::raw(format!("Log ({} lines)", selected.log.len()))];
    if let Some(repo) = selected.repo_url.as_deref() {
        title.push(Span::styled(
            format!(" {repo}"),
            Style::default().fg(Color::Cyan),
        ));
    }
    if let Some(branch) = selected.result_branch.as_deref() {
        title.push(Span::styled(
            format!(" branch {branch}"),
            Style::default().fg(Color::Green),
        ));
    }
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(Line::from(title)));
    f.render_widget(p, area);
}
