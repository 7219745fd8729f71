//! LLM-backed simulated user built on `rig`.

use std::{cmp::max, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use rig::client::{ProviderValue, builder::DynClientBuilder};
use rig::completion::Prompt;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::core::{
    domain::{ConversationTurn, Scenario, SimulatedUserModel, TurnRole},
    error::{Error, Result},
    ports::{SimulatedTurn, SimulatedUser, TemplateRenderer},
};

pub const GOAL_ACHIEVED_MARKER: &str = "[GOAL_ACHIEVED]";
pub const GOAL_ABANDONED_MARKER: &str = "[GOAL_ABANDONED]";

const NEXT_TURN_TEMPLATE: &str = r#"You are role-playing a human user who is chatting with an AI assistant.
{{#if persona}}
You are {{persona.name}}. {{persona.description}}
{{/if}}
Your goal: {{goal}}

Conversation so far:
{{#each transcript}}
{{this.role}}: {{this.message}}
{{else}}
(no messages yet, you start the conversation)
{{/each}}

Write the next message you would send to the assistant. Reply with the message text only.
If the assistant has fully accomplished your goal, reply with exactly {{achieved_marker}}.
If the goal clearly cannot be reached, reply with {{abandoned_marker}} followed by a short reason."#;

const SUMMARY_TEMPLATE: &str = r#"Summarize the following conversation between a user and an AI assistant in two or three sentences.
The user's goal was: {{goal}}
State whether the goal was reached.

{{#each transcript}}
{{this.role}}: {{this.message}}
{{/each}}"#;

/// Providers the simulated user can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmProvider {
    Openai,
    Anthropic,
    Gemini,
    Grok,
}

impl LlmProvider {
    pub const ALL: [LlmProvider; 4] = [
        LlmProvider::Openai,
        LlmProvider::Anthropic,
        LlmProvider::Gemini,
        LlmProvider::Grok,
    ];

    pub fn provider_id(self) -> &'static str {
        match self {
            LlmProvider::Openai => rig::client::builder::DefaultProviders::OPENAI,
            LlmProvider::Anthropic => rig::client::builder::DefaultProviders::ANTHROPIC,
            LlmProvider::Gemini => rig::client::builder::DefaultProviders::GEMINI,
            LlmProvider::Grok => rig::client::builder::DefaultProviders::XAI,
        }
    }

    pub fn env_var(self) -> &'static str {
        match self {
            LlmProvider::Openai => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
            LlmProvider::Grok => "XAI_API_KEY",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LlmProvider::Openai => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Gemini => "gemini",
            LlmProvider::Grok => "grok",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(LlmProvider::Openai),
            "anthropic" => Some(LlmProvider::Anthropic),
            "gemini" => Some(LlmProvider::Gemini),
            "grok" | "xai" => Some(LlmProvider::Grok),
            _ => None,
        }
    }
}

/// Simulated user that prompts the configured model for every turn.
#[derive(Clone)]
pub struct RigSimulatedUser {
    inner: Arc<RigSimulatedUserInner>,
}

struct RigSimulatedUserInner {
    api_keys: HashMap<LlmProvider, String>,
    renderer: Arc<dyn TemplateRenderer>,
    semaphore: Arc<Semaphore>,
}

impl RigSimulatedUser {
    pub fn new(
        api_keys: HashMap<LlmProvider, String>,
        renderer: Arc<dyn TemplateRenderer>,
        max_concurrent: usize,
    ) -> Self {
        let api_keys = api_keys
            .into_iter()
            .filter(|(_, key)| !key.trim().is_empty())
            .collect();
        Self {
            inner: Arc::new(RigSimulatedUserInner {
                api_keys,
                renderer,
                semaphore: Arc::new(Semaphore::new(max(1, max_concurrent))),
            }),
        }
    }

    fn resolve(&self, model: &SimulatedUserModel) -> Result<(LlmProvider, &str)> {
        let provider = LlmProvider::from_name(&model.provider).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown simulated-user provider '{}'",
                model.provider
            ))
        })?;
        if model.model.trim().is_empty() {
            return Err(Error::Configuration(
                "simulated-user model identifier may not be empty".into(),
            ));
        }
        let key = self.inner.api_keys.get(&provider).ok_or_else(|| {
            Error::Configuration(format!(
                "no API key for {}; set {} or pass --api-key",
                provider.as_str(),
                provider.env_var()
            ))
        })?;
        Ok((provider, key))
    }

    fn render(
        &self,
        template: &str,
        scenario: &Scenario,
        transcript: &[ConversationTurn],
    ) -> Result<String> {
        let data = json!({
            "goal": scenario.goal,
            "persona": scenario.persona.as_ref().map(|p| json!({
                "name": p.name,
                "description": p.description,
            })),
            "transcript": transcript
                .iter()
                .map(|turn| json!({
                    "role": match turn.role {
                        TurnRole::User => "User",
                        TurnRole::Agent => "Assistant",
                    },
                    "message": turn.message,
                }))
                .collect::<Vec<_>>(),
            "achieved_marker": GOAL_ACHIEVED_MARKER,
            "abandoned_marker": GOAL_ABANDONED_MARKER,
        });
        self.inner.renderer.render(template, &data)
    }

    async fn prompt_once(&self, model: &SimulatedUserModel, prompt: &str) -> Result<String> {
        let (provider, api_key) = self.resolve(model)?;
        let _permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::System(format!("Semaphore error: {e}")))?;

        let agent = {
            let builder = DynClientBuilder::new();
            let mut agent_builder = builder
                .agent_with_api_key_val(
                    provider.provider_id(),
                    &model.model,
                    ProviderValue::Simple(api_key.to_string()),
                )
                .map_err(|err| {
                    Error::SimulatedUser(format!(
                        "{}: failed to create agent: {err}",
                        provider.as_str()
                    ))
                })?;
            if let Some(temp) = model.temperature {
                agent_builder = agent_builder.temperature(f64::from(temp));
            }
            agent_builder.build()
        };

        agent
            .prompt(prompt)
            .await
            .map_err(|err| Error::SimulatedUser(format!("{}: {err}", provider.as_str())))
    }
}

impl std::fmt::Debug for RigSimulatedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<&str> = self.inner.api_keys.keys().map(|p| p.as_str()).collect();
        providers.sort_unstable();
        f.debug_struct("RigSimulatedUser")
            .field("providers", &providers)
            .finish()
    }
}

#[async_trait]
impl SimulatedUser for RigSimulatedUser {
    fn check_model(&self, model: &SimulatedUserModel) -> Result<()> {
        self.resolve(model).map(|_| ())
    }

    async fn next_turn(
        &self,
        scenario: &Scenario,
        transcript: &[ConversationTurn],
        model: &SimulatedUserModel,
    ) -> Result<SimulatedTurn> {
        let prompt = self.render(NEXT_TURN_TEMPLATE, scenario, transcript)?;
        let reply = self.prompt_once(model, &prompt).await?;
        debug!(scenario = %scenario.name, chars = reply.len(), "Simulated user replied");
        parse_turn(&reply)
    }

    async fn summarize(
        &self,
        scenario: &Scenario,
        transcript: &[ConversationTurn],
        model: &SimulatedUserModel,
    ) -> Result<String> {
        let prompt = self.render(SUMMARY_TEMPLATE, scenario, transcript)?;
        let summary = self.prompt_once(model, &prompt).await?;
        Ok(summary.trim().to_string())
    }
}

/// Interprets a raw model reply, honouring the goal markers anywhere in the text.
pub fn parse_turn(reply: &str) -> Result<SimulatedTurn> {
    let reply = reply.trim();
    if reply.contains(GOAL_ACHIEVED_MARKER) {
        return Ok(SimulatedTurn::GoalAchieved);
    }
    if let Some(idx) = reply.find(GOAL_ABANDONED_MARKER) {
        let reason = reply[idx + GOAL_ABANDONED_MARKER.len()..]
            .trim()
            .trim_start_matches([':', '-'])
            .trim();
        let reason = if reason.is_empty() {
            "simulated user gave up".to_string()
        } else {
            reason.to_string()
        };
        return Ok(SimulatedTurn::GoalAbandoned(reason));
    }
    if reply.is_empty() {
        return Err(Error::SimulatedUser("model returned an empty message".into()));
    }
    Ok(SimulatedTurn::Message(reply.to_string()))
}
