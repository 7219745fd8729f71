//! Scripted collaborators shared by the application tests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicI64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    application::{orchestrator::RunOrchestrator, webhooks::WebhookDispatcher},
    core::{
        domain::{
            Conversation, ConversationConfig, ConversationTurn, ExecutionMode, FlowConfig, QaConfig,
            Question, Run, RunResult, Scenario, SimulatedUserModel, TestDefinition, TestKind,
            TurnRole, WebhookConfig, WebhookEvent,
        },
        error::{Error, Result},
        ports::{
            AgentFlowClient, AgentResponse, Clock, RunRepository, SimulatedTurn, SimulatedUser,
            TemplateRenderer, WebhookDelivery, WebhookRequest,
        },
    },
};

pub fn flow() -> FlowConfig {
    FlowConfig {
        id: "support-bot".into(),
        name: "Support bot".into(),
        endpoint: "http://agent.test/invoke".into(),
        headers: BTreeMap::new(),
        timeout_ms: 1_000,
        response_field: "answer".into(),
        input_variables: BTreeMap::new(),
    }
}

pub fn qa_test(questions: usize) -> TestDefinition {
    TestDefinition {
        id: "faq".into(),
        name: "FAQ".into(),
        flow_id: "support-bot".into(),
        flow: Some(flow()),
        webhook: None,
        kind: TestKind::Qa(QaConfig {
            questions: (0..questions)
                .map(|idx| Question {
                    id: format!("q{idx}"),
                    question: format!("question {idx}"),
                    expected_answer: Some("expected".into()),
                    input_variables: BTreeMap::new(),
                })
                .collect(),
            multi_step_evaluation: false,
        }),
    }
}

pub fn conversation_test(scenarios: usize, max_turns: usize) -> TestDefinition {
    TestDefinition {
        id: "journeys".into(),
        name: "Customer journeys".into(),
        flow_id: "support-bot".into(),
        flow: Some(flow()),
        webhook: None,
        kind: TestKind::Conversation(ConversationConfig {
            scenarios: (0..scenarios)
                .map(|idx| Scenario {
                    id: format!("s{idx}"),
                    name: format!("scenario {idx}"),
                    persona_id: None,
                    persona: None,
                    goal: format!("goal {idx}"),
                    max_turns,
                    order_index: idx,
                })
                .collect(),
            execution_mode: ExecutionMode::Sequential,
            max_concurrency: 1,
            delay_between_turns_ms: 0,
            simulated_user: SimulatedUserModel {
                provider: "openai".into(),
                model: "gpt-test".into(),
                temperature: None,
            },
        }),
    }
}

pub fn set_multi_step(test: &mut TestDefinition, enabled: bool) {
    if let TestKind::Qa(config) = &mut test.kind {
        config.multi_step_evaluation = enabled;
    }
}

pub fn set_parallel(test: &mut TestDefinition, max_concurrency: usize) {
    if let TestKind::Conversation(config) = &mut test.kind {
        config.execution_mode = ExecutionMode::Parallel;
        config.max_concurrency = max_concurrency;
    }
}

pub fn set_turn_delay(test: &mut TestDefinition, delay_ms: u64) {
    if let TestKind::Conversation(config) = &mut test.kind {
        config.delay_between_turns_ms = delay_ms;
    }
}

pub fn webhook(events: &[WebhookEvent]) -> WebhookConfig {
    WebhookConfig {
        id: "ci".into(),
        url: "https://hooks.test/runs".into(),
        method: "post".into(),
        headers: BTreeMap::new(),
        query_params: BTreeMap::new(),
        body_template: None,
        secret: None,
        events: events.to_vec(),
    }
}

/// Agent that echoes the message back, optionally slow or failing on given messages.
#[derive(Default)]
pub struct ScriptedAgent {
    delay: Duration,
    failing: Vec<String>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    sessions: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, message: &str) -> Self {
        self.failing.push(message.to_string());
        self
    }

    /// Session ids in call order.
    pub fn sessions(&self) -> Vec<String> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentFlowClient for ScriptedAgent {
    async fn invoke(
        &self,
        _flow: &FlowConfig,
        session_id: &str,
        message: &str,
        _input_variables: &BTreeMap<String, String>,
    ) -> Result<AgentResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().unwrap().push(session_id.to_string());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.iter().any(|m| m == message) {
            return Err(Error::Invocation("agent unavailable".into()));
        }
        Ok(AgentResponse {
            answer: format!("echo: {message}"),
            execution_time_ms: 42,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    KeepTalking,
    AchieveAfter(usize),
    AbandonAfter(usize),
    Fail,
}

/// Simulated user whose messages are `"<scenario name> turn <n>"`.
pub struct ScriptedUser {
    default: Behaviour,
    overrides: HashMap<String, Behaviour>,
    summaries: bool,
    accepts_model: bool,
}

impl ScriptedUser {
    pub fn never_satisfied() -> Self {
        Self {
            default: Behaviour::KeepTalking,
            overrides: HashMap::new(),
            summaries: true,
            accepts_model: true,
        }
    }

    pub fn rejecting_model() -> Self {
        Self {
            accepts_model: false,
            ..Self::never_satisfied()
        }
    }

    pub fn for_scenario(mut self, name: &str, behaviour: Behaviour) -> Self {
        self.overrides.insert(name.to_string(), behaviour);
        self
    }

    pub fn without_summaries(mut self) -> Self {
        self.summaries = false;
        self
    }
}

#[async_trait]
impl SimulatedUser for ScriptedUser {
    fn check_model(&self, model: &SimulatedUserModel) -> Result<()> {
        if self.accepts_model {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "model '{}' is not available",
                model.model
            )))
        }
    }

    async fn next_turn(
        &self,
        scenario: &Scenario,
        transcript: &[ConversationTurn],
        _model: &SimulatedUserModel,
    ) -> Result<SimulatedTurn> {
        let sent = transcript
            .iter()
            .filter(|turn| turn.role == TurnRole::User)
            .count();
        let behaviour = self
            .overrides
            .get(&scenario.name)
            .copied()
            .unwrap_or(self.default);
        match behaviour {
            Behaviour::AchieveAfter(n) if sent >= n => Ok(SimulatedTurn::GoalAchieved),
            Behaviour::AbandonAfter(n) if sent >= n => {
                Ok(SimulatedTurn::GoalAbandoned("cannot be done".into()))
            }
            Behaviour::Fail => Err(Error::SimulatedUser("llm offline".into())),
            _ => Ok(SimulatedTurn::Message(format!("{} turn {sent}", scenario.name))),
        }
    }

    async fn summarize(
        &self,
        _scenario: &Scenario,
        transcript: &[ConversationTurn],
        _model: &SimulatedUserModel,
    ) -> Result<String> {
        if self.summaries {
            Ok(format!("summary of {} turns", transcript.len()))
        } else {
            Err(Error::SimulatedUser("summary model timed out".into()))
        }
    }
}

/// Repository kept in memory, with an optional append failure for error paths
/// and optionally stale, slow reads for interleaving tests.
#[derive(Default)]
pub struct MemoryRepository {
    runs: Mutex<Vec<Run>>,
    results: Mutex<Vec<RunResult>>,
    conversations: Mutex<Vec<Conversation>>,
    append_budget: Mutex<Option<usize>>,
    read_delay: Mutex<Duration>,
}

impl MemoryRepository {
    pub fn fail_appends_after(&self, successful: usize) {
        *self.append_budget.lock().unwrap() = Some(successful);
    }

    /// Run and item reads copy the stored rows, then wait `delay` before returning.
    pub fn slow_reads(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = delay;
    }

    async fn stall(&self) {
        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RunRepository for MemoryRepository {
    async fn save_run(&self, run: &Run) -> Result<()> {
        let mut runs = self.runs.lock().unwrap();
        match runs.iter_mut().find(|stored| stored.id == run.id) {
            Some(stored) => *stored = run.clone(),
            None => runs.push(run.clone()),
        }
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<Run>> {
        let run = self
            .runs
            .lock()
            .unwrap()
            .iter()
            .find(|run| run.id == run_id)
            .cloned();
        self.stall().await;
        Ok(run)
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let mut runs = self.runs.lock().unwrap().clone();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn append_result(&self, result: &RunResult) -> Result<()> {
        if let Some(budget) = self.append_budget.lock().unwrap().as_mut() {
            if *budget == 0 {
                return Err(Error::Persistence("disk full".into()));
            }
            *budget -= 1;
        }
        self.results.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn update_result(&self, result: &RunResult) -> Result<()> {
        let mut results = self.results.lock().unwrap();
        let stored = results
            .iter_mut()
            .find(|stored| stored.id == result.id)
            .ok_or_else(|| Error::NotFound(format!("result {}", result.id)))?;
        *stored = result.clone();
        Ok(())
    }

    async fn load_results(&self, run_id: &str) -> Result<Vec<RunResult>> {
        let mut results: Vec<RunResult> = self
            .results
            .lock()
            .unwrap()
            .iter()
            .filter(|result| result.run_id == run_id)
            .cloned()
            .collect();
        results.sort_by_key(|result| result.position);
        self.stall().await;
        Ok(results)
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut conversations = self.conversations.lock().unwrap();
        match conversations
            .iter_mut()
            .find(|stored| stored.id == conversation.id)
        {
            Some(stored) => *stored = conversation.clone(),
            None => conversations.push(conversation.clone()),
        }
        Ok(())
    }

    async fn load_conversations(&self, run_id: &str) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .filter(|conversation| conversation.run_id == run_id)
            .cloned()
            .collect();
        conversations.sort_by_key(|conversation| conversation.order_index);
        self.stall().await;
        Ok(conversations)
    }
}

/// Records delivered webhooks.
#[derive(Default)]
pub struct RecordingDelivery {
    fail: bool,
    requests: Mutex<Vec<WebhookRequest>>,
}

impl RecordingDelivery {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Waits until at least `count` deliveries were attempted, then returns all of them.
    pub async fn wait_for(&self, count: usize) -> Vec<WebhookRequest> {
        for _ in 0..200 {
            {
                let requests = self.requests.lock().unwrap();
                if requests.len() >= count {
                    return requests.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookDelivery for RecordingDelivery {
    async fn deliver(&self, request: &WebhookRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(Error::Webhook("connection refused".into()));
        }
        Ok(())
    }
}

/// Substitutes `{{name}}` with the matching top-level value.
pub struct PlaceholderRenderer;

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, data: &serde_json::Value) -> Result<String> {
        let mut rendered = template.to_string();
        if let Some(map) = data.as_object() {
            for (key, value) in map {
                let text = match value {
                    serde_json::Value::String(text) => text.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                rendered = rendered.replace(&format!("{{{{{key}}}}}"), &text);
            }
        }
        Ok(rendered)
    }
}

/// Clock that advances one millisecond per reading.
pub struct StepClock(AtomicI64);

impl StepClock {
    pub fn starting_at(ms: i64) -> Self {
        Self(AtomicI64::new(ms))
    }
}

impl Clock for StepClock {
    fn now_ms(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

pub struct TestEnv {
    pub orchestrator: RunOrchestrator,
    pub agent: Arc<ScriptedAgent>,
    pub repository: Arc<MemoryRepository>,
    pub delivery: Arc<RecordingDelivery>,
    pub webhooks: Arc<WebhookDispatcher>,
}

impl TestEnv {
    pub fn new(agent: ScriptedAgent) -> Self {
        Self::with_user(agent, ScriptedUser::never_satisfied())
    }

    pub fn with_user(agent: ScriptedAgent, user: ScriptedUser) -> Self {
        let agent = Arc::new(agent);
        let repository = Arc::new(MemoryRepository::default());
        let delivery = Arc::new(RecordingDelivery::default());
        let clock: Arc<dyn Clock> = Arc::new(StepClock::starting_at(1_000));
        let webhooks = Arc::new(WebhookDispatcher::new(
            Arc::new(PlaceholderRenderer),
            delivery.clone(),
            Arc::clone(&clock),
        ));
        let orchestrator = RunOrchestrator::new(
            agent.clone(),
            Arc::new(user),
            repository.clone(),
            Arc::clone(&webhooks),
            clock,
        );
        Self {
            orchestrator,
            agent,
            repository,
            delivery,
            webhooks,
        }
    }
}
