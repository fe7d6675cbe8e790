//! HTTP host for the Run Executor.
//!
//! The host owns the overall time ceiling; the executor itself never times out.

use crate::executor::RunExecutor;
use crate::model::{ErrorBody, RunRequest};
use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    executor: Arc<RunExecutor>,
    max_duration: Duration,
}

pub fn router(executor: Arc<RunExecutor>, max_duration: Duration) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/run", post(run))
        .with_state(AppState {
            executor,
            max_duration,
        })
}

async fn health() -> &'static str {
    "ok"
}

fn error_response(status: StatusCode, error: &str, detail: Option<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            detail,
        }),
    )
        .into_response()
}

async fn run(
    State(state): State<AppState>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Response {
    // Unreadable bodies get the same error contract as a failed run.
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "unreadable run request");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Run failed",
                Some(rejection.body_text()),
            );
        }
    };
    let started = std::time::Instant::now();
    // Dropping the execute future on timeout kills the child and removes the scratch dir.
    match tokio::time::timeout(state.max_duration, state.executor.execute(&request)).await {
        Ok(Ok(outcome)) => {
            info!(
                success = outcome.success,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "run completed"
            );
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Ok(Err(e)) if e.is_validation() => {
            error_response(StatusCode::BAD_REQUEST, &e.to_string(), None)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "run failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.label(),
                Some(e.to_string()),
            )
        }
        Err(_) => {
            warn!(max_duration = ?state.max_duration, "run exceeded time ceiling");
            error_response(
                StatusCode::GATEWAY_TIMEOUT,
                "Run timed out",
                Some(format!(
                    "no result within {}",
                    humantime::format_duration(state.max_duration)
                )),
            )
        }
    }
}

/// Serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, executor: Arc<RunExecutor>, max_duration: Duration) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    let local = listener.local_addr().context("listener address")?;
    info!(addr = %local, "executor host listening");
    axum::serve(listener, router(executor, max_duration))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serve executor host")?;
    Ok(())
}
