//! Application-level orchestration.
//!
//! This module owns the session (run history, selection, the single-active-run lock),
//! run lifecycle control, and post-run processing. UI/CLI layers send commands and
//! read views; they never mutate records directly.

mod controller;
mod dispatch;
mod post_process;
mod session;

pub use controller::{ControllerConfig, SessionCommand, SessionController, DEFAULT_TICK_INTERVAL};
pub use dispatch::{DispatchError, HttpDispatcher, LocalDispatcher, RunDispatcher};
pub use session::{HistoryItem, SelectedRun, Session, SessionError, SessionView};
