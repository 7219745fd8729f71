use serde::{Deserialize, Serialize};

use crate::core::{
    domain::test::{Scenario, TestDefinition},
    error::{Error, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    Qa,
    Conversation,
}

impl TestType {
    pub fn as_str(self) -> &'static str {
        match self {
            TestType::Qa => "qa",
            TestType::Conversation => "conversation",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "qa" => Some(TestType::Qa),
            "conversation" => Some(TestType::Conversation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "canceled" => Some(RunStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Canceled
        )
    }

    /// `pending -> failed` covers configuration errors detected before any work starts.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Pending, RunStatus::Canceled)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Canceled)
        )
    }
}

/// One execution of a test against its configured agent flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub test_id: String,
    pub test_name: String,
    pub test_type: TestType,
    pub status: RunStatus,
    pub total_questions: usize,
    pub completed_questions: usize,
    pub total_scenarios: usize,
    pub completed_scenarios: usize,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
    pub is_fully_evaluated: bool,
}

impl Run {
    pub fn new(id: impl Into<String>, test: &TestDefinition, created_at: i64) -> Self {
        let test_type = test.test_type();
        let total = test.total_items();
        let (total_questions, total_scenarios) = match test_type {
            TestType::Qa => (total, 0),
            TestType::Conversation => (0, total),
        };
        Self {
            id: id.into(),
            test_id: test.id.clone(),
            test_name: test.name.clone(),
            test_type,
            status: RunStatus::Pending,
            total_questions,
            completed_questions: 0,
            total_scenarios,
            completed_scenarios: 0,
            created_at,
            started_at: None,
            completed_at: None,
            error_message: None,
            is_fully_evaluated: false,
        }
    }

    pub fn transition(&mut self, next: RunStatus, at: i64) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "run {} cannot move from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        if next == RunStatus::Running {
            self.started_at = Some(at);
        } else if next.is_terminal() {
            self.completed_at = Some(at);
        }
        self.status = next;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>, at: i64) -> Result<()> {
        self.transition(RunStatus::Failed, at)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    pub fn total_items(&self) -> usize {
        match self.test_type {
            TestType::Qa => self.total_questions,
            TestType::Conversation => self.total_scenarios,
        }
    }

    pub fn completed_items(&self) -> usize {
        match self.test_type {
            TestType::Qa => self.completed_questions,
            TestType::Conversation => self.completed_scenarios,
        }
    }

    /// Bumps the completed counter for the run's type, never past the total.
    pub fn record_item_completed(&mut self) -> Result<()> {
        if self.status != RunStatus::Running {
            return Err(Error::InvalidState(format!(
                "run {} is {}, items can only complete while running",
                self.id,
                self.status.as_str()
            )));
        }
        let (completed, total) = match self.test_type {
            TestType::Qa => (&mut self.completed_questions, self.total_questions),
            TestType::Conversation => (&mut self.completed_scenarios, self.total_scenarios),
        };
        if *completed >= total {
            return Err(Error::InvalidState(format!(
                "run {} already completed all {total} items",
                self.id
            )));
        }
        *completed += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanEvaluation {
    Correct,
    Incorrect,
    Partial,
}

impl HumanEvaluation {
    pub fn as_str(self) -> &'static str {
        match self {
            HumanEvaluation::Correct => "correct",
            HumanEvaluation::Incorrect => "incorrect",
            HumanEvaluation::Partial => "partial",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "correct" => Some(HumanEvaluation::Correct),
            "incorrect" => Some(HumanEvaluation::Incorrect),
            "partial" => Some(HumanEvaluation::Partial),
            _ => None,
        }
    }

    /// Ordering used by run comparison: incorrect < partial < correct.
    pub fn rank(self) -> u8 {
        match self {
            HumanEvaluation::Incorrect => 0,
            HumanEvaluation::Partial => 1,
            HumanEvaluation::Correct => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "critical" => Some(Severity::Critical),
            "major" => Some(Severity::Major),
            "minor" => Some(Severity::Minor),
            _ => None,
        }
    }
}

/// Post-hoc human verdict applied to a result or conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationUpdate {
    pub evaluation: Option<HumanEvaluation>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Outcome of one question in a Q&A run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub id: String,
    pub run_id: String,
    pub position: usize,
    pub question_id: Option<String>,
    pub question: String,
    pub answer: Option<String>,
    pub expected_answer: Option<String>,
    pub session_id: String,
    pub execution_time_ms: Option<i64>,
    pub is_error: bool,
    pub error_message: Option<String>,
    pub human_evaluation: Option<HumanEvaluation>,
    pub severity: Option<Severity>,
    pub evaluation_note: Option<String>,
    pub llm_judge_score: Option<f64>,
    pub llm_judge_reasoning: Option<String>,
    pub created_at: i64,
}

impl RunResult {
    pub fn apply_evaluation(&mut self, update: &EvaluationUpdate) {
        self.human_evaluation = update.evaluation;
        self.severity = update.severity;
        self.evaluation_note = update.note.clone();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Running,
    Completed,
    GoalAchieved,
    GoalNotAchieved,
    MaxTurnsReached,
    Error,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Running => "running",
            ConversationStatus::Completed => "completed",
            ConversationStatus::GoalAchieved => "goal_achieved",
            ConversationStatus::GoalNotAchieved => "goal_not_achieved",
            ConversationStatus::MaxTurnsReached => "max_turns_reached",
            ConversationStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Agent,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub index: usize,
    pub role: TurnRole,
    pub message: String,
    pub timestamp: i64,
    pub execution_time_ms: Option<i64>,
}

/// Transcript and outcome of one scenario within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub run_id: String,
    pub scenario_id: Option<String>,
    pub scenario_name: String,
    pub order_index: usize,
    pub status: ConversationStatus,
    pub turns: Vec<ConversationTurn>,
    pub summary: Option<String>,
    pub end_reason: Option<String>,
    pub goal_achieved: bool,
    pub human_evaluation: Option<HumanEvaluation>,
    pub severity: Option<Severity>,
    pub evaluation_note: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

impl Conversation {
    pub fn start(
        id: impl Into<String>,
        run_id: impl Into<String>,
        scenario: &Scenario,
        started_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            run_id: run_id.into(),
            scenario_id: Some(scenario.id.clone()),
            scenario_name: scenario.name.clone(),
            order_index: scenario.order_index,
            status: ConversationStatus::Running,
            turns: Vec::new(),
            summary: None,
            end_reason: None,
            goal_achieved: false,
            human_evaluation: None,
            severity: None,
            evaluation_note: None,
            started_at,
            completed_at: None,
        }
    }

    /// Appends a turn; indices stay contiguous from zero.
    pub fn push_turn(
        &mut self,
        role: TurnRole,
        message: impl Into<String>,
        timestamp: i64,
        execution_time_ms: Option<i64>,
    ) -> &ConversationTurn {
        let index = self.turns.len();
        self.turns.push(ConversationTurn {
            index,
            role,
            message: message.into(),
            timestamp,
            execution_time_ms,
        });
        &self.turns[index]
    }

    pub fn user_turns(&self) -> usize {
        self.turns
            .iter()
            .filter(|turn| turn.role == TurnRole::User)
            .count()
    }

    pub fn finish(&mut self, status: ConversationStatus, end_reason: Option<String>, at: i64) {
        self.status = status;
        self.goal_achieved = status == ConversationStatus::GoalAchieved;
        self.end_reason = end_reason;
        self.completed_at = Some(at);
    }

    pub fn is_error(&self) -> bool {
        self.status == ConversationStatus::Error
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at.map(|end| end - self.started_at)
    }

    pub fn apply_evaluation(&mut self, update: &EvaluationUpdate) {
        self.human_evaluation = update.evaluation;
        self.severity = update.severity;
        self.evaluation_note = update.note.clone();
    }
}

/// A run together with everything it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub run: Run,
    pub results: Vec<RunResult>,
    pub conversations: Vec<Conversation>,
}

impl RunSnapshot {
    /// True iff every non-error item carries a human evaluation.
    pub fn is_fully_evaluated(&self) -> bool {
        match self.run.test_type {
            TestType::Qa => self
                .results
                .iter()
                .filter(|result| !result.is_error)
                .all(|result| result.human_evaluation.is_some()),
            TestType::Conversation => self
                .conversations
                .iter()
                .filter(|conversation| !conversation.is_error())
                .all(|conversation| conversation.human_evaluation.is_some()),
        }
    }
}
