//! Inbound ports (use-case ports) define the application service interface that
//! driving adapters (CLI, HTTP server) consume.

use std::pin::Pin;

use async_trait::async_trait;
use serde::Serialize;
use tokio_stream::Stream;

use crate::core::{
    domain::{
        Conversation, EvaluationUpdate, ProgressEvent, Run, RunComparison, RunResult, RunStatsReport,
        RunStatus,
    },
    error::Result,
};

/// Live tail of a run's progress events; ends after the terminal event.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Request to start a run of a configured test.
#[derive(Debug, Clone)]
pub struct StartRunRequest {
    pub test_id: String,
    /// Caller-chosen id; generated when absent.
    pub run_id: Option<String>,
}

/// A run that has been accepted and is executing in the background.
pub struct StartedRun {
    pub run_id: String,
    pub events: ProgressStream,
}

/// What a cancel request did to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The executing task was signaled and stops at its next checkpoint.
    Signaled,
    /// No task owned the run, so it was moved to `canceled` immediately.
    CanceledDirectly,
    /// The run was already terminal; nothing changed.
    AlreadyFinished,
}

impl CancelOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelOutcome::Signaled => "signaled",
            CancelOutcome::CanceledDirectly => "canceled_directly",
            CancelOutcome::AlreadyFinished => "already_finished",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAck {
    pub run_id: String,
    /// Status as observed when the request was handled.
    pub status: RunStatus,
    pub outcome: CancelOutcome,
}

/// Everything known about a run, with stats recomputed on read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetail {
    pub run: Run,
    pub results: Vec<RunResult>,
    pub conversations: Vec<Conversation>,
    pub stats: RunStatsReport,
}

/// The primary application service trait that driving adapters consume.
#[async_trait]
pub trait RunService: Send + Sync {
    /// Start a run; the returned stream is attached before any event is published.
    async fn start_run(&self, request: StartRunRequest) -> Result<StartedRun>;

    /// Signal cancellation. Idempotent.
    async fn cancel_run(&self, run_id: &str) -> Result<CancelAck>;

    /// Diff two completed runs.
    async fn compare_runs(&self, left_run_id: &str, right_run_id: &str) -> Result<RunComparison>;

    async fn get_run(&self, run_id: &str) -> Result<Option<RunDetail>>;

    async fn list_runs(&self, limit: usize) -> Result<Vec<Run>>;

    /// Attach to a live run; `None` once the run has finished or if it is unknown.
    fn subscribe(&self, run_id: &str) -> Option<ProgressStream>;

    async fn evaluate_result(
        &self,
        run_id: &str,
        result_id: &str,
        update: EvaluationUpdate,
    ) -> Result<Run>;

    async fn evaluate_conversation(
        &self,
        run_id: &str,
        conversation_id: &str,
        update: EvaluationUpdate,
    ) -> Result<Run>;
}
