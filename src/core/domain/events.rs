use serde::Serialize;

use crate::core::domain::{
    run::{ConversationStatus, RunResult, TestType},
    stats::{ConversationRunStats, RunStats},
};

/// Payload shared by `turn:user` and `turn:agent`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnEvent {
    pub run_id: String,
    pub scenario_id: Option<String>,
    pub conversation_id: String,
    pub turn_index: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<i64>,
}

/// Live progress for one run. Serialized with a `type` tag matching [`ProgressEvent::name`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    #[serde(rename = "run_start", rename_all = "camelCase")]
    RunStart {
        run_id: String,
        test_type: TestType,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_questions: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_scenarios: Option<usize>,
    },
    #[serde(rename = "result")]
    ResultRecorded(RunResult),
    #[serde(rename = "scenario:start", rename_all = "camelCase")]
    ScenarioStart {
        run_id: String,
        scenario_id: Option<String>,
        scenario_name: String,
        conversation_id: String,
        order_index: usize,
        max_turns: usize,
    },
    #[serde(rename = "turn:user")]
    UserTurn(TurnEvent),
    #[serde(rename = "turn:agent")]
    AgentTurn(TurnEvent),
    #[serde(rename = "scenario:end", rename_all = "camelCase")]
    ScenarioEnd {
        run_id: String,
        scenario_id: Option<String>,
        scenario_name: String,
        conversation_id: String,
        status: ConversationStatus,
        end_reason: Option<String>,
        goal_achieved: bool,
        turn_count: usize,
    },
    #[serde(rename = "summary:generated", rename_all = "camelCase")]
    SummaryGenerated {
        run_id: String,
        scenario_id: Option<String>,
        conversation_id: String,
        summary: String,
    },
    #[serde(rename = "complete", rename_all = "camelCase")]
    Complete { run_id: String, stats: RunStats },
    #[serde(rename = "error", rename_all = "camelCase")]
    Error { run_id: String, message: String },
    #[serde(rename = "canceled", rename_all = "camelCase")]
    Canceled { run_id: String },
    #[serde(rename = "run:complete", rename_all = "camelCase")]
    RunComplete {
        run_id: String,
        stats: ConversationRunStats,
    },
    #[serde(rename = "run:error", rename_all = "camelCase")]
    RunError {
        run_id: String,
        error_message: String,
    },
}

impl ProgressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::RunStart { .. } => "run_start",
            ProgressEvent::ResultRecorded(_) => "result",
            ProgressEvent::ScenarioStart { .. } => "scenario:start",
            ProgressEvent::UserTurn(_) => "turn:user",
            ProgressEvent::AgentTurn(_) => "turn:agent",
            ProgressEvent::ScenarioEnd { .. } => "scenario:end",
            ProgressEvent::SummaryGenerated { .. } => "summary:generated",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::Canceled { .. } => "canceled",
            ProgressEvent::RunComplete { .. } => "run:complete",
            ProgressEvent::RunError { .. } => "run:error",
        }
    }

    /// Terminal events close the run's channel.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. }
                | ProgressEvent::Error { .. }
                | ProgressEvent::Canceled { .. }
                | ProgressEvent::RunComplete { .. }
                | ProgressEvent::RunError { .. }
        )
    }
}
