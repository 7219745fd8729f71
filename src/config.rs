use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result, anyhow, ensure};
use serde::Deserialize;
use tracing::warn;

use crate::core::{
    domain::{
        ConversationConfig, ExecutionMode, FlowConfig, Persona, QaConfig, Question, Scenario,
        SimulatedUserModel, TestDefinition, TestKind, WebhookConfig, WebhookEvent,
    },
    error::{Error as CoreError, Result as CoreResult},
    ports::TestCatalog,
};

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_RESPONSE_FIELD: &str = "text";
pub const DEFAULT_MAX_TURNS: usize = 10;
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

const WEBHOOK_METHODS: [&str; 4] = ["GET", "POST", "PUT", "PATCH"];

/// Everything flowbench needs to run tests: targets, personas, webhooks and the tests
/// themselves, loaded from a single YAML file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FlowbenchConfig {
    #[serde(default)]
    pub flows: BTreeMap<String, FlowEntry>,
    #[serde(default)]
    pub personas: BTreeMap<String, PersonaEntry>,
    #[serde(default)]
    pub webhooks: BTreeMap<String, WebhookEntry>,
    #[serde(default)]
    pub simulated_user: SimulatedUserSettings,
    #[serde(default)]
    pub execution: ExecutionDefaults,
    pub tests: BTreeMap<String, TestEntry>,
}

impl FlowbenchConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let raw = fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read config file at {}", path_ref.display()))?;
        let mut config = Self::from_yaml_str(&raw)
            .with_context(|| format!("Invalid configuration in {}", path_ref.display()))?;
        let base_dir = path_ref.parent().unwrap_or_else(|| Path::new("."));
        config
            .hydrate_templates(base_dir)
            .with_context(|| format!("Failed to hydrate templates for {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("Unable to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.tests.is_empty(),
            "Configuration must contain at least one test"
        );
        self.simulated_user.validate()?;
        self.execution.validate()?;
        for (id, flow) in &self.flows {
            flow.validate(id)
                .with_context(|| format!("Flow '{id}' failed validation"))?;
        }
        for (id, persona) in &self.personas {
            ensure!(
                !persona.name.trim().is_empty(),
                "Persona '{id}' must define a name"
            );
        }
        for (id, webhook) in &self.webhooks {
            webhook
                .validate(id)
                .with_context(|| format!("Webhook '{id}' failed validation"))?;
        }
        for (id, test) in &self.tests {
            test.validate(id)
                .with_context(|| format!("Test '{id}' failed validation"))?;
        }
        Ok(())
    }

    /// Builds the runnable definition of `test_id`. Flow and persona references that
    /// do not resolve are left empty so the run itself reports them.
    pub fn resolve(&self, test_id: &str) -> Option<TestDefinition> {
        let entry = self.tests.get(test_id)?;
        let flow = self
            .flows
            .get(&entry.flow)
            .map(|flow| flow.to_domain(&entry.flow, &self.execution));
        let webhook = entry.webhook.as_ref().and_then(|webhook_id| {
            let found = self
                .webhooks
                .get(webhook_id)
                .map(|webhook| webhook.to_domain(webhook_id));
            if found.is_none() {
                warn!(test = test_id, webhook = %webhook_id, "webhook is not configured; run will not notify");
            }
            found
        });
        let kind = match &entry.kind {
            TestKindEntry::Qa(qa) => TestKind::Qa(qa.to_domain()),
            TestKindEntry::Conversation(conversation) => TestKind::Conversation(
                conversation.to_domain(&self.personas, &self.simulated_user, &self.execution),
            ),
        };
        Some(TestDefinition {
            id: test_id.to_string(),
            name: entry.name.clone().unwrap_or_else(|| test_id.to_string()),
            flow_id: entry.flow.clone(),
            flow,
            webhook,
            kind,
        })
    }

    fn hydrate_templates(&mut self, base_dir: &Path) -> Result<()> {
        for (id, webhook) in self.webhooks.iter_mut() {
            if let Some(template) = &webhook.body_template {
                let resolved = resolve_template(template, base_dir)
                    .with_context(|| format!("Webhook '{id}' body_template"))?;
                webhook.body_template = Some(resolved);
            }
        }
        Ok(())
    }
}

impl FromStr for FlowbenchConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_yaml_str(s)
    }
}

impl TestCatalog for FlowbenchConfig {
    fn resolve_test(&self, test_id: &str) -> CoreResult<TestDefinition> {
        self.resolve(test_id)
            .ok_or_else(|| CoreError::NotFound(format!("test '{test_id}' is not configured")))
    }

    fn test_ids(&self) -> Vec<String> {
        self.tests.keys().cloned().collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlowEntry {
    #[serde(default)]
    pub name: Option<String>,
    pub endpoint: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub response_field: Option<String>,
    #[serde(default)]
    pub input_variables: BTreeMap<String, String>,
}

impl FlowEntry {
    fn validate(&self, id: &str) -> Result<()> {
        ensure!(
            !self.endpoint.trim().is_empty(),
            "Flow '{id}' must define an endpoint"
        );
        if let Some(timeout) = self.timeout_ms {
            ensure!(timeout > 0, "Flow '{id}' timeout_ms must be > 0");
        }
        Ok(())
    }

    fn to_domain(&self, id: &str, defaults: &ExecutionDefaults) -> FlowConfig {
        FlowConfig {
            id: id.to_string(),
            name: self.name.clone().unwrap_or_else(|| id.to_string()),
            endpoint: self.endpoint.clone(),
            headers: self.headers.clone(),
            timeout_ms: self.timeout_ms.unwrap_or(defaults.timeout_ms),
            response_field: self
                .response_field
                .clone()
                .unwrap_or_else(|| defaults.response_field.clone()),
            input_variables: self.input_variables.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersonaEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookEntry {
    pub url: String,
    #[serde(default = "default_webhook_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    /// Inline template or a path (relative to the config file) to one.
    #[serde(default)]
    pub body_template: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

impl WebhookEntry {
    fn validate(&self, id: &str) -> Result<()> {
        ensure!(
            !self.url.trim().is_empty(),
            "Webhook '{id}' must define a url"
        );
        let method = self.method.to_ascii_uppercase();
        ensure!(
            WEBHOOK_METHODS.contains(&method.as_str()),
            "Webhook '{id}' method '{}' is not one of {}",
            self.method,
            WEBHOOK_METHODS.join(", ")
        );
        Ok(())
    }

    fn to_domain(&self, id: &str) -> WebhookConfig {
        WebhookConfig {
            id: id.to_string(),
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            query_params: self.query_params.clone(),
            body_template: self.body_template.clone(),
            secret: self
                .secret
                .clone()
                .filter(|secret| !secret.trim().is_empty()),
            events: self.events.clone(),
        }
    }
}

/// Model driving the simulated user, plus how many LLM calls may be in flight.
#[derive(Debug, Deserialize, Clone)]
pub struct SimulatedUserSettings {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for SimulatedUserSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: None,
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl SimulatedUserSettings {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.max_concurrent > 0,
            "simulated_user.max_concurrent must be > 0"
        );
        if let Some(temperature) = self.temperature {
            ensure!(
                (0.0..=2.0).contains(&temperature),
                "simulated_user.temperature must be within 0.0..=2.0"
            );
        }
        Ok(())
    }

    fn model(&self) -> SimulatedUserModel {
        SimulatedUserModel {
            provider: self.provider.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionDefaults {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_response_field")]
    pub response_field: String,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub delay_between_turns_ms: u64,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_response_field() -> String {
    DEFAULT_RESPONSE_FIELD.to_string()
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            response_field: default_response_field(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            delay_between_turns_ms: 0,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

impl ExecutionDefaults {
    fn validate(&self) -> Result<()> {
        ensure!(self.timeout_ms > 0, "execution.timeout_ms must be > 0");
        ensure!(
            self.max_concurrency > 0,
            "execution.max_concurrency must be > 0"
        );
        ensure!(
            !self.response_field.trim().is_empty(),
            "execution.response_field must not be blank"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TestEntry {
    #[serde(default)]
    pub name: Option<String>,
    pub flow: String,
    #[serde(default)]
    pub webhook: Option<String>,
    #[serde(flatten)]
    pub kind: TestKindEntry,
}

impl TestEntry {
    fn validate(&self, id: &str) -> Result<()> {
        ensure!(
            !self.flow.trim().is_empty(),
            "Test '{id}' must reference a flow"
        );
        match &self.kind {
            TestKindEntry::Qa(_) => Ok(()),
            TestKindEntry::Conversation(conversation) => conversation.validate(id),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestKindEntry {
    Qa(QaEntry),
    Conversation(ConversationEntry),
}

#[derive(Debug, Deserialize, Clone)]
pub struct QaEntry {
    #[serde(default)]
    pub multi_step_evaluation: bool,
    #[serde(default)]
    pub questions: Vec<QuestionEntry>,
}

impl QaEntry {
    fn to_domain(&self) -> QaConfig {
        QaConfig {
            questions: self
                .questions
                .iter()
                .enumerate()
                .map(|(idx, question)| Question {
                    id: question
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("q{}", idx + 1)),
                    question: question.question.clone(),
                    expected_answer: question.expected_answer.clone(),
                    input_variables: question.input_variables.clone(),
                })
                .collect(),
            multi_step_evaluation: self.multi_step_evaluation,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuestionEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub question: String,
    #[serde(default)]
    pub expected_answer: Option<String>,
    #[serde(default)]
    pub input_variables: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationEntry {
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub delay_between_turns_ms: Option<u64>,
    #[serde(default)]
    pub simulated_user: Option<SimulatedUserOverride>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioEntry>,
}

impl ConversationEntry {
    fn validate(&self, id: &str) -> Result<()> {
        if let Some(limit) = self.max_concurrency {
            ensure!(limit > 0, "Test '{id}' max_concurrency must be > 0");
        }
        for (idx, scenario) in self.scenarios.iter().enumerate() {
            ensure!(
                !scenario.goal.trim().is_empty(),
                "Test '{id}' scenarios[{idx}] must define a goal"
            );
        }
        Ok(())
    }

    fn to_domain(
        &self,
        personas: &BTreeMap<String, PersonaEntry>,
        simulated_user: &SimulatedUserSettings,
        defaults: &ExecutionDefaults,
    ) -> ConversationConfig {
        let scenarios = self
            .scenarios
            .iter()
            .enumerate()
            .map(|(idx, scenario)| {
                let persona = scenario.persona.as_ref().and_then(|persona_id| {
                    personas.get(persona_id).map(|persona| Persona {
                        id: persona_id.clone(),
                        name: persona.name.clone(),
                        description: persona.description.clone(),
                    })
                });
                Scenario {
                    id: scenario
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("s{}", idx + 1)),
                    name: scenario
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("Scenario {}", idx + 1)),
                    persona_id: scenario.persona.clone(),
                    persona,
                    goal: scenario.goal.clone(),
                    max_turns: scenario.max_turns.unwrap_or(defaults.max_turns),
                    order_index: idx,
                }
            })
            .collect();

        let mut model = simulated_user.model();
        if let Some(overrides) = &self.simulated_user {
            if let Some(provider) = &overrides.provider {
                model.provider = provider.clone();
            }
            if let Some(name) = &overrides.model {
                model.model = name.clone();
            }
            if overrides.temperature.is_some() {
                model.temperature = overrides.temperature;
            }
        }

        ConversationConfig {
            scenarios,
            execution_mode: self.execution_mode,
            max_concurrency: self.max_concurrency.unwrap_or(defaults.max_concurrency),
            delay_between_turns_ms: self
                .delay_between_turns_ms
                .unwrap_or(defaults.delay_between_turns_ms),
            simulated_user: model,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SimulatedUserOverride {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScenarioEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
    pub goal: String,
    #[serde(default)]
    pub max_turns: Option<usize>,
}

fn resolve_template(raw: &str, base_dir: &Path) -> Result<String> {
    if raw.contains('\n') {
        return Ok(raw.to_string());
    }

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let candidate = Path::new(trimmed);
    let joined: PathBuf = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    };

    if joined.is_file() {
        return fs::read_to_string(&joined)
            .with_context(|| format!("Failed to read template {}", joined.display()));
    }

    if looks_like_template_path(trimmed) {
        return Err(anyhow!(
            "Template '{}' was not found relative to {}",
            trimmed,
            base_dir.display()
        ));
    }

    Ok(raw.to_string())
}

fn looks_like_template_path(value: &str) -> bool {
    !value.starts_with('{')
        && (value.contains('/')
            || value.contains('\\')
            || value.ends_with(".hbs")
            || value.ends_with(".handlebars")
            || value.ends_with(".json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
flows:
  support-bot:
    endpoint: "http://localhost:3000/api/v1/prediction/abc"
    headers:
      Authorization: "Bearer token"
    input_variables:
      locale: "en"
personas:
  impatient:
    name: "Impatient customer"
    description: "Wants answers fast"
webhooks:
  ci:
    url: "https://ci.example.com/hooks/{{runId}}"
    secret: "s3cret"
    events: ["run.completed", "run.failed"]
simulated_user:
  provider: anthropic
  model: claude-3-5-haiku-latest
  temperature: 0.4
execution:
  timeout_ms: 5000
tests:
  faq:
    name: "FAQ"
    type: qa
    flow: support-bot
    webhook: ci
    multi_step_evaluation: true
    questions:
      - question: "How do I reset my password?"
        expected_answer: "Use the reset link"
      - id: billing
        question: "Where are my invoices?"
        input_variables:
          plan: "pro"
  journeys:
    type: conversation
    flow: support-bot
    execution_mode: parallel
    max_concurrency: 2
    scenarios:
      - name: "Refund"
        persona: impatient
        goal: "Get a refund for order 42"
        max_turns: 4
      - goal: "Change the delivery address"
"#;

    #[test]
    fn loads_config_from_str() {
        let config = FlowbenchConfig::from_yaml_str(SAMPLE).expect("valid config");
        assert_eq!(config.test_ids(), vec!["faq", "journeys"]);
        assert_eq!(config.webhooks["ci"].method, "POST");
        assert_eq!(config.simulated_user.max_concurrent, 4);
    }

    #[test]
    fn resolves_qa_test_with_defaults() {
        let config = FlowbenchConfig::from_yaml_str(SAMPLE).unwrap();
        let test = config.resolve_test("faq").expect("faq resolves");
        assert_eq!(test.name, "FAQ");
        let flow = test.flow.expect("flow resolved");
        assert_eq!(flow.timeout_ms, 5000);
        assert_eq!(flow.response_field, DEFAULT_RESPONSE_FIELD);
        assert_eq!(flow.input_variables["locale"], "en");
        let webhook = test.webhook.expect("webhook resolved");
        assert_eq!(
            webhook.events,
            vec![WebhookEvent::RunCompleted, WebhookEvent::RunFailed]
        );
        match test.kind {
            TestKind::Qa(qa) => {
                assert!(qa.multi_step_evaluation);
                assert_eq!(qa.questions[0].id, "q1");
                assert_eq!(qa.questions[1].id, "billing");
                assert_eq!(qa.questions[1].input_variables["plan"], "pro");
            }
            other => panic!("expected qa test, got {other:?}"),
        }
    }

    #[test]
    fn resolves_conversation_test_with_personas_and_model() {
        let config = FlowbenchConfig::from_yaml_str(SAMPLE).unwrap();
        let test = config.resolve_test("journeys").unwrap();
        assert_eq!(test.name, "journeys");
        let TestKind::Conversation(conversation) = test.kind else {
            panic!("expected conversation test");
        };
        assert_eq!(conversation.execution_mode, ExecutionMode::Parallel);
        assert_eq!(conversation.max_concurrency, 2);
        assert_eq!(conversation.simulated_user.provider, "anthropic");
        assert_eq!(conversation.simulated_user.temperature, Some(0.4));
        let refund = &conversation.scenarios[0];
        assert_eq!(refund.persona.as_ref().unwrap().name, "Impatient customer");
        assert_eq!(refund.max_turns, 4);
        let address = &conversation.scenarios[1];
        assert_eq!(address.id, "s2");
        assert_eq!(address.name, "Scenario 2");
        assert_eq!(address.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(address.order_index, 1);
    }

    #[test]
    fn dangling_references_resolve_leniently() {
        let yaml = r#"
tests:
  orphan:
    type: conversation
    flow: missing-flow
    webhook: missing-hook
    scenarios:
      - persona: ghost
        goal: "anything"
"#;
        let config = FlowbenchConfig::from_yaml_str(yaml).unwrap();
        let test = config.resolve_test("orphan").unwrap();
        assert!(test.flow.is_none());
        assert_eq!(test.flow_id, "missing-flow");
        assert!(test.webhook.is_none());
        let TestKind::Conversation(conversation) = test.kind else {
            panic!("expected conversation test");
        };
        assert_eq!(conversation.scenarios[0].persona_id.as_deref(), Some("ghost"));
        assert!(conversation.scenarios[0].persona.is_none());
    }

    #[test]
    fn unknown_test_is_not_found() {
        let config = FlowbenchConfig::from_yaml_str(SAMPLE).unwrap();
        let err = config.resolve_test("nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn rejects_unknown_webhook_method() {
        let yaml = r#"
webhooks:
  ci:
    url: "https://ci.example.com"
    method: "DELETE"
tests:
  faq:
    type: qa
    flow: bot
"#;
        let err = FlowbenchConfig::from_yaml_str(yaml).unwrap_err();
        let messages: Vec<String> = err.chain().map(|cause| cause.to_string()).collect();
        assert!(
            messages.iter().any(|msg| msg.contains("DELETE")),
            "error chain missing method context: {messages:?}"
        );
    }

    #[test]
    fn rejects_unknown_test_type() {
        let yaml = r#"
tests:
  faq:
    type: survey
    flow: bot
"#;
        assert!(FlowbenchConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn from_path_hydrates_body_templates() {
        let temp = tempdir().unwrap();
        let templates = temp.path().join("templates");
        fs::create_dir(&templates).unwrap();
        fs::write(
            templates.join("notify.hbs"),
            r#"{"text": "run {{runId}} is {{status}}"}"#,
        )
        .unwrap();

        let config_path = temp.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
flows:
  bot:
    endpoint: "http://localhost:9"
webhooks:
  chat:
    url: "https://chat.example.com"
    body_template: "templates/notify.hbs"
tests:
  faq:
    type: qa
    flow: bot
    webhook: chat
    questions:
      - question: "hi"
"#,
        )
        .unwrap();

        let config = FlowbenchConfig::from_path(&config_path).expect("config loads");
        assert_eq!(
            config.webhooks["chat"].body_template.as_deref(),
            Some(r#"{"text": "run {{runId}} is {{status}}"}"#)
        );
    }

    #[test]
    fn from_path_reports_missing_template_file() {
        let temp = tempdir().unwrap();
        let config_path = temp.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
webhooks:
  chat:
    url: "https://chat.example.com"
    body_template: "templates/missing.hbs"
tests:
  faq:
    type: qa
    flow: bot
"#,
        )
        .unwrap();

        let err = FlowbenchConfig::from_path(&config_path).unwrap_err();
        let messages: Vec<String> = err.chain().map(|cause| cause.to_string()).collect();
        assert!(
            messages.iter().any(|msg| msg.contains("missing.hbs")),
            "error chain missing template path: {messages:?}"
        );
    }
}
