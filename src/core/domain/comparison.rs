use serde::Serialize;

use crate::core::domain::run::{HumanEvaluation, TestType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Improved,
    Regressed,
    Unchanged,
    New,
    Removed,
}

/// One side of an aligned pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparedItem {
    pub id: String,
    pub evaluation: Option<HumanEvaluation>,
    pub execution_time_ms: Option<i64>,
    pub is_error: bool,
    /// Answer text for Q&A, final status for conversations.
    pub outcome: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    /// Question text or scenario name used for alignment.
    pub key: String,
    pub left: Option<ComparedItem>,
    pub right: Option<ComparedItem>,
    pub change_type: ChangeType,
    pub execution_time_change: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunComparisonSummary {
    pub total: usize,
    pub improved: usize,
    pub regressed: usize,
    pub unchanged: usize,
    pub new: usize,
    pub removed: usize,
    pub left_accuracy: Option<f64>,
    pub right_accuracy: Option<f64>,
    pub accuracy_delta: Option<f64>,
    pub avg_latency_delta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunComparison {
    pub left_run_id: String,
    pub right_run_id: String,
    pub test_type: TestType,
    pub items: Vec<ComparisonResult>,
    pub summary: RunComparisonSummary,
}
