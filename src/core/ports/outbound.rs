use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::core::{
    domain::{
        Conversation, ConversationTurn, FlowConfig, Run, RunResult, Scenario, SimulatedUserModel,
        TestDefinition, WebhookEvent,
    },
    error::Result,
};

/// Reply from the agent endpoint under evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub answer: String,
    pub execution_time_ms: i64,
}

/// Abstraction over the agent endpoint being evaluated.
///
/// Timeouts are the implementation's concern and surface as [`crate::core::Error::Invocation`].
#[async_trait]
pub trait AgentFlowClient: Send + Sync {
    async fn invoke(
        &self,
        flow: &FlowConfig,
        session_id: &str,
        message: &str,
        input_variables: &BTreeMap<String, String>,
    ) -> Result<AgentResponse>;
}

/// What the simulated user wants to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatedTurn {
    Message(String),
    GoalAchieved,
    /// The simulated user concluded the goal cannot be reached.
    GoalAbandoned(String),
}

/// LLM-driven stand-in for a human pursuing a scenario goal.
#[async_trait]
pub trait SimulatedUser: Send + Sync {
    /// Fails with a configuration error when the model cannot be used at all.
    fn check_model(&self, _model: &SimulatedUserModel) -> Result<()> {
        Ok(())
    }

    async fn next_turn(
        &self,
        scenario: &Scenario,
        transcript: &[ConversationTurn],
        model: &SimulatedUserModel,
    ) -> Result<SimulatedTurn>;

    async fn summarize(
        &self,
        scenario: &Scenario,
        transcript: &[ConversationTurn],
        model: &SimulatedUserModel,
    ) -> Result<String>;
}

/// Source of runnable test definitions.
pub trait TestCatalog: Send + Sync {
    /// Fails with `NotFound` for unknown ids. Dangling references inside a known test
    /// are left unresolved for the orchestrator to reject.
    fn resolve_test(&self, test_id: &str) -> Result<TestDefinition>;

    fn test_ids(&self) -> Vec<String>;
}

/// Append/update sink for run records, keyed by run id.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Insert or update a run.
    async fn save_run(&self, run: &Run) -> Result<()>;
    async fn load_run(&self, run_id: &str) -> Result<Option<Run>>;
    /// Most recently created first.
    async fn list_runs(&self, limit: usize) -> Result<Vec<Run>>;
    async fn append_result(&self, result: &RunResult) -> Result<()>;
    async fn update_result(&self, result: &RunResult) -> Result<()>;
    /// Ordered by position.
    async fn load_results(&self, run_id: &str) -> Result<Vec<RunResult>>;
    /// Insert or update a conversation including its turns.
    async fn save_conversation(&self, conversation: &Conversation) -> Result<()>;
    /// Ordered by scenario order index.
    async fn load_conversations(&self, run_id: &str) -> Result<Vec<Conversation>>;
}

/// Fully rendered outbound webhook call.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub webhook_id: String,
    pub event: WebhookEvent,
    pub run_id: String,
    pub method: String,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Transport for webhook calls; retries are its own business.
#[async_trait]
pub trait WebhookDelivery: Send + Sync {
    async fn deliver(&self, request: &WebhookRequest) -> Result<()>;
}

/// Abstraction for rendering `{{variable}}` templates.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, data: &serde_json::Value) -> Result<String>;
}

/// Abstraction for getting the current time.
pub trait Clock: Send + Sync {
    /// Current UTC timestamp in milliseconds.
    fn now_ms(&self) -> i64;
}
