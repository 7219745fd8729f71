//! Simulated multi-turn conversations, one per scenario.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    application::{
        cancellation::{DelayOutcome, cancellable_delay},
        orchestrator::{ExecutionStrategy, RunContext, StrategyOutcome},
    },
    core::{
        domain::{
            Conversation, ConversationConfig, ConversationStatus, ExecutionMode, ProgressEvent, Run,
            Scenario, SimulatedUserModel, TurnEvent, TurnRole,
        },
        error::{Error, Result},
        ports::{SimulatedTurn, SimulatedUser},
    },
};

pub const CANCELED_END_REASON: &str = "canceled";

pub struct ConversationStrategy {
    config: ConversationConfig,
    simulated_user: Arc<dyn SimulatedUser>,
}

impl ConversationStrategy {
    pub fn new(config: ConversationConfig, simulated_user: Arc<dyn SimulatedUser>) -> Self {
        Self {
            config,
            simulated_user,
        }
    }

    fn ordered_scenarios(&self) -> Vec<Scenario> {
        let mut scenarios = self.config.scenarios.clone();
        scenarios.sort_by_key(|scenario| scenario.order_index);
        scenarios
    }

    async fn run_sequential(
        &self,
        run: &mut Run,
        ctx: &RunContext,
        runner: &ScenarioRunner,
    ) -> Result<bool> {
        let mut interrupted = false;
        for scenario in self.ordered_scenarios() {
            if ctx.is_cancelled() {
                info!(scenario = %scenario.name, "Skipping scenario after cancellation");
                interrupted = true;
                break;
            }
            let conversation = runner.run(scenario).await?;
            interrupted |= was_interrupted(&conversation);
            record_finished(run, ctx).await?;
        }
        Ok(interrupted)
    }

    async fn run_parallel(
        &self,
        run: &mut Run,
        ctx: &RunContext,
        runner: &ScenarioRunner,
    ) -> Result<bool> {
        let limit = self.config.max_concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut workers = JoinSet::new();
        debug!(limit, scenarios = self.config.scenarios.len(), "Dispatching scenarios to pool");

        for scenario in self.ordered_scenarios() {
            let semaphore = Arc::clone(&semaphore);
            let runner = runner.clone();
            workers.spawn(
                async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(err) => {
                            return Err(Error::System(format!("scenario pool closed: {err}")));
                        }
                    };
                    if runner.ctx.is_cancelled() {
                        info!(scenario = %scenario.name, "Skipping scenario after cancellation");
                        return Ok(None);
                    }
                    runner.run(scenario).await.map(Some)
                }
                .in_current_span(),
            );
        }

        let mut interrupted = false;
        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(Some(conversation))) => {
                    interrupted |= was_interrupted(&conversation);
                    if let Err(err) = record_finished(run, ctx).await {
                        first_error.get_or_insert(err);
                    }
                }
                Ok(Ok(None)) => interrupted = true,
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(join_err) => {
                    first_error.get_or_insert(Error::System(format!(
                        "scenario task failed: {join_err}"
                    )));
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(interrupted),
        }
    }
}

fn was_interrupted(conversation: &Conversation) -> bool {
    conversation.status == ConversationStatus::Completed
        && conversation.end_reason.as_deref() == Some(CANCELED_END_REASON)
}

/// Only the coordinating task touches the run counters.
async fn record_finished(run: &mut Run, ctx: &RunContext) -> Result<()> {
    run.record_item_completed()?;
    ctx.repository.save_run(run).await
}

#[async_trait]
impl ExecutionStrategy for ConversationStrategy {
    async fn execute(&self, run: &mut Run, ctx: &RunContext) -> Result<StrategyOutcome> {
        let runner = ScenarioRunner {
            ctx: ctx.clone(),
            simulated_user: Arc::clone(&self.simulated_user),
            model: self.config.simulated_user.clone(),
            delay: Duration::from_millis(self.config.delay_between_turns_ms),
        };
        let interrupted = match self.config.execution_mode {
            ExecutionMode::Sequential => self.run_sequential(run, ctx, &runner).await?,
            ExecutionMode::Parallel => self.run_parallel(run, ctx, &runner).await?,
        };
        Ok(if interrupted {
            StrategyOutcome::Canceled
        } else {
            StrategyOutcome::Completed
        })
    }
}

/// Drives a single scenario; cheap to clone into worker tasks.
#[derive(Clone)]
struct ScenarioRunner {
    ctx: RunContext,
    simulated_user: Arc<dyn SimulatedUser>,
    model: SimulatedUserModel,
    delay: Duration,
}

impl ScenarioRunner {
    /// Errors from the agent or the simulated user end the conversation, not the run.
    /// Only persistence failures are returned.
    async fn run(&self, scenario: Scenario) -> Result<Conversation> {
        let ctx = &self.ctx;
        let mut conversation =
            Conversation::start(Uuid::new_v4().to_string(), &ctx.run_id, &scenario, ctx.now());
        let span = info_span!("scenario", scenario = %scenario.name, conversation_id = %conversation.id);

        async move {
            ctx.repository.save_conversation(&conversation).await?;
            ctx.publish(ProgressEvent::ScenarioStart {
                run_id: ctx.run_id.clone(),
                scenario_id: conversation.scenario_id.clone(),
                scenario_name: scenario.name.clone(),
                conversation_id: conversation.id.clone(),
                order_index: scenario.order_index,
                max_turns: scenario.max_turns,
            });

            let (status, end_reason) = self.converse(&scenario, &mut conversation).await?;
            conversation.finish(status, end_reason, ctx.now());
            ctx.repository.save_conversation(&conversation).await?;
            info!(
                status = status.as_str(),
                turns = conversation.turns.len(),
                "Scenario finished"
            );
            ctx.publish(ProgressEvent::ScenarioEnd {
                run_id: ctx.run_id.clone(),
                scenario_id: conversation.scenario_id.clone(),
                scenario_name: conversation.scenario_name.clone(),
                conversation_id: conversation.id.clone(),
                status,
                end_reason: conversation.end_reason.clone(),
                goal_achieved: conversation.goal_achieved,
                turn_count: conversation.turns.len(),
            });

            self.summarize(&scenario, &mut conversation).await?;
            Ok(conversation)
        }
        .instrument(span)
        .await
    }

    async fn converse(
        &self,
        scenario: &Scenario,
        conversation: &mut Conversation,
    ) -> Result<(ConversationStatus, Option<String>)> {
        let ctx = &self.ctx;
        let session_id = Uuid::new_v4().to_string();
        let interrupted = || {
            (
                ConversationStatus::Completed,
                Some(CANCELED_END_REASON.to_string()),
            )
        };

        loop {
            if conversation.user_turns() >= scenario.max_turns {
                return Ok((ConversationStatus::MaxTurnsReached, None));
            }
            if ctx.is_cancelled() {
                return Ok(interrupted());
            }

            let next = self
                .simulated_user
                .next_turn(scenario, &conversation.turns, &self.model)
                .await;
            let message = match next {
                Ok(SimulatedTurn::Message(message)) => message,
                Ok(SimulatedTurn::GoalAchieved) => {
                    return Ok((ConversationStatus::GoalAchieved, None));
                }
                Ok(SimulatedTurn::GoalAbandoned(reason)) => {
                    return Ok((ConversationStatus::GoalNotAchieved, Some(reason)));
                }
                Err(err) => {
                    warn!(error = %err, "Simulated user failed");
                    return Ok((ConversationStatus::Error, Some(err.to_string())));
                }
            };

            if !conversation.turns.is_empty()
                && cancellable_delay(&ctx.cancel, self.delay).await == DelayOutcome::Cancelled
            {
                return Ok(interrupted());
            }

            let user_index = conversation
                .push_turn(TurnRole::User, message, ctx.now(), None)
                .index;
            ctx.repository.save_conversation(conversation).await?;
            ctx.publish(ProgressEvent::UserTurn(self.turn_event(conversation, user_index)));

            let reply = ctx
                .agent
                .invoke(
                    &ctx.flow,
                    &session_id,
                    &conversation.turns[user_index].message,
                    &ctx.flow.input_variables,
                )
                .await;
            match reply {
                Ok(response) => {
                    let agent_index = conversation
                        .push_turn(
                            TurnRole::Agent,
                            response.answer,
                            ctx.now(),
                            Some(response.execution_time_ms),
                        )
                        .index;
                    ctx.repository.save_conversation(conversation).await?;
                    ctx.publish(ProgressEvent::AgentTurn(
                        self.turn_event(conversation, agent_index),
                    ));
                }
                Err(err) => {
                    warn!(error = %err, "Agent call failed");
                    return Ok((ConversationStatus::Error, Some(err.to_string())));
                }
            }
        }
    }

    fn turn_event(&self, conversation: &Conversation, turn_index: usize) -> TurnEvent {
        let turn = &conversation.turns[turn_index];
        TurnEvent {
            run_id: self.ctx.run_id.clone(),
            scenario_id: conversation.scenario_id.clone(),
            conversation_id: conversation.id.clone(),
            turn_index,
            message: turn.message.clone(),
            execution_time_ms: turn.execution_time_ms,
        }
    }

    /// Best effort: a failed summary is logged and leaves the conversation as is.
    async fn summarize(&self, scenario: &Scenario, conversation: &mut Conversation) -> Result<()> {
        if conversation.turns.is_empty() || was_interrupted(conversation) {
            return Ok(());
        }
        match self
            .simulated_user
            .summarize(scenario, &conversation.turns, &self.model)
            .await
        {
            Ok(summary) => {
                conversation.summary = Some(summary.clone());
                self.ctx.repository.save_conversation(conversation).await?;
                self.ctx.publish(ProgressEvent::SummaryGenerated {
                    run_id: self.ctx.run_id.clone(),
                    scenario_id: conversation.scenario_id.clone(),
                    conversation_id: conversation.id.clone(),
                    summary,
                });
            }
            Err(err) => warn!(error = %err, "Conversation summary failed"),
        }
        Ok(())
    }
}
