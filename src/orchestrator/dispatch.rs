//! How the session reaches the Run Executor.

use crate::executor::RunExecutor;
use crate::model::{ErrorBody, RunOutcome, RunRequest};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The executor could not be reached or answered with something unreadable.
    #[error("{0}")]
    Transport(String),
    /// The executor refused or could not prepare the run.
    #[error("{label}: {detail}")]
    Rejected { label: String, detail: String },
}

/// Narrow request/response contract to the executor.
#[async_trait]
pub trait RunDispatcher: Send + Sync {
    async fn dispatch(&self, request: RunRequest) -> Result<RunOutcome, DispatchError>;
}

/// Calls the executor in-process.
pub struct LocalDispatcher {
    executor: Arc<RunExecutor>,
}

impl LocalDispatcher {
    pub fn new(executor: Arc<RunExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl RunDispatcher for LocalDispatcher {
    async fn dispatch(&self, request: RunRequest) -> Result<RunOutcome, DispatchError> {
        self.executor
            .execute(&request)
            .await
            .map_err(|e| DispatchError::Rejected {
                label: e.label().to_string(),
                detail: e.to_string(),
            })
    }
}

/// Calls an executor host over HTTP (`POST <base>/api/run`).
pub struct HttpDispatcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDispatcher {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/api/run", base_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RunDispatcher for HttpDispatcher {
    async fn dispatch(&self, request: RunRequest) -> Result<RunOutcome, DispatchError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(format!("request to {} failed: {e}", self.endpoint)))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<RunOutcome>()
                .await
                .map_err(|e| DispatchError::Transport(format!("invalid executor response: {e}")));
        }

        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(DispatchError::Rejected {
                label: body.error,
                detail: body.detail.unwrap_or_else(|| status.to_string()),
            }),
            Err(_) => Err(DispatchError::Transport(format!(
                "executor returned {status}: {}",
                text.trim()
            ))),
        }
    }
}
