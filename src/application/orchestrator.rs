//! Run lifecycle: validation, state transitions, strategy dispatch and terminal events.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    application::{
        cancellation::CancellationRegistry,
        conversation::ConversationStrategy,
        event_bus::{ProgressEventBus, RunEventStream},
        qa::QaStrategy,
        webhooks::WebhookDispatcher,
    },
    core::{
        domain::{
            ConversationRunStats, FlowConfig, ProgressEvent, Run, RunSnapshot, RunStats, RunStatus,
            TestDefinition, TestKind, TestType, WebhookEvent,
        },
        error::{Error, Result},
        ports::{AgentFlowClient, CancelAck, CancelOutcome, Clock, RunRepository, SimulatedUser},
    },
};

/// How a strategy stopped when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyOutcome {
    Completed,
    Canceled,
}

/// Everything a strategy needs to execute one run.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub flow: Arc<FlowConfig>,
    pub agent: Arc<dyn AgentFlowClient>,
    pub repository: Arc<dyn RunRepository>,
    pub bus: Arc<ProgressEventBus>,
    pub cancel: CancellationToken,
    pub clock: Arc<dyn Clock>,
}

impl RunContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn publish(&self, event: ProgressEvent) {
        self.bus.publish(&self.run_id, event);
    }

    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }
}

/// Executes the items of one run type.
///
/// Implementations bump the run's completed counter and persist the run after every
/// item. An `Err` fails the run; partial results stay in the repository.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    async fn execute(&self, run: &mut Run, ctx: &RunContext) -> Result<StrategyOutcome>;
}

/// A run executing in the background.
pub struct RunHandle {
    pub run_id: String,
    pub events: RunEventStream,
    pub join: JoinHandle<Run>,
}

#[derive(Clone)]
pub struct RunOrchestrator {
    agent: Arc<dyn AgentFlowClient>,
    simulated_user: Arc<dyn SimulatedUser>,
    repository: Arc<dyn RunRepository>,
    bus: Arc<ProgressEventBus>,
    cancellations: Arc<CancellationRegistry>,
    webhooks: Arc<WebhookDispatcher>,
    clock: Arc<dyn Clock>,
}

impl RunOrchestrator {
    pub fn new(
        agent: Arc<dyn AgentFlowClient>,
        simulated_user: Arc<dyn SimulatedUser>,
        repository: Arc<dyn RunRepository>,
        webhooks: Arc<WebhookDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            agent,
            simulated_user,
            repository,
            bus: Arc::new(ProgressEventBus::default()),
            cancellations: Arc::new(CancellationRegistry::new()),
            webhooks,
            clock,
        }
    }

    pub fn bus(&self) -> &Arc<ProgressEventBus> {
        &self.bus
    }

    /// Creates the run and drives it on a background task.
    ///
    /// The returned stream is attached before the first event is published.
    pub async fn start(&self, test: TestDefinition, run_id: Option<String>) -> Result<RunHandle> {
        let (run, token) = self.prepare(&test, run_id).await?;
        let run_id = run.id.clone();
        let events = self.bus.subscribe(&run_id).ok_or_else(|| {
            Error::InvalidState(format!("event channel for run {run_id} closed before start"))
        })?;
        let this = self.clone();
        let span = info_span!("run", run_id = %run_id, test_id = %test.id);
        let join = tokio::spawn(async move { this.drive(test, run, token).await }.instrument(span));
        Ok(RunHandle {
            run_id,
            events,
            join,
        })
    }

    /// Same as [`RunOrchestrator::start`] but awaited inline.
    pub async fn execute(&self, test: TestDefinition, run_id: Option<String>) -> Result<Run> {
        let (run, token) = self.prepare(&test, run_id).await?;
        let span = info_span!("run", run_id = %run.id, test_id = %test.id);
        Ok(self.drive(test, run, token).instrument(span).await)
    }

    /// Signals cancellation. Idempotent and a no-op for terminal runs.
    ///
    /// A live token is signaled before the run is read. The drive task releases its
    /// token only after persisting the terminal state, so a run loaded without a live
    /// token is either terminal or orphaned by an earlier process.
    pub async fn cancel(&self, run_id: &str) -> Result<CancelAck> {
        if self.cancellations.cancel(run_id) {
            info!(run_id, "Cancellation requested");
            // The run row may not be written yet while `prepare` is still running.
            let status = self
                .repository
                .load_run(run_id)
                .await?
                .map_or(RunStatus::Pending, |run| run.status);
            return Ok(CancelAck {
                run_id: run_id.to_string(),
                status,
                outcome: CancelOutcome::Signaled,
            });
        }

        let mut run = self
            .repository
            .load_run(run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("run {run_id}")))?;
        if run.status.is_terminal() {
            return Ok(CancelAck {
                run_id: run.id,
                status: run.status,
                outcome: CancelOutcome::AlreadyFinished,
            });
        }

        warn!(run_id, status = run.status.as_str(), "Canceling orphaned run");
        run.transition(RunStatus::Canceled, self.clock.now_ms())?;
        self.repository.save_run(&run).await?;
        self.bus.publish(&run.id, ProgressEvent::Canceled {
            run_id: run.id.clone(),
        });
        Ok(CancelAck {
            run_id: run.id,
            status: run.status,
            outcome: CancelOutcome::CanceledDirectly,
        })
    }

    async fn prepare(
        &self,
        test: &TestDefinition,
        run_id: Option<String>,
    ) -> Result<(Run, CancellationToken)> {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.repository.load_run(&run_id).await?.is_some() {
            return Err(Error::InvalidState(format!("run {run_id} already exists")));
        }
        let run = Run::new(run_id, test, self.clock.now_ms());
        let token = self.cancellations.register(&run.id);
        if let Err(err) = self.repository.save_run(&run).await {
            self.cancellations.release(&run.id);
            return Err(err);
        }
        self.bus.open(&run.id);
        info!(run_id = %run.id, test_id = %test.id, test_type = run.test_type.as_str(), "Run created");
        Ok((run, token))
    }

    async fn drive(&self, test: TestDefinition, mut run: Run, token: CancellationToken) -> Run {
        self.drive_inner(&test, &mut run, token).await;
        self.cancellations.release(&run.id);
        run
    }

    async fn drive_inner(&self, test: &TestDefinition, run: &mut Run, token: CancellationToken) {
        let (flow, strategy) = match self.validate(test) {
            Ok(validated) => validated,
            Err(err) => {
                warn!(error = %err, "Run configuration rejected");
                self.finish_failed(test, run, err.to_string()).await;
                return;
            }
        };

        if token.is_cancelled() {
            self.finish_canceled(run).await;
            return;
        }

        if let Err(err) = run.transition(RunStatus::Running, self.clock.now_ms()) {
            error!(error = %err, "Run could not start");
            return;
        }
        if let Err(err) = self.repository.save_run(run).await {
            self.finish_failed(test, run, err.to_string()).await;
            return;
        }
        self.webhooks
            .on_transition(test.webhook.as_ref(), run, WebhookEvent::RunRunning);
        let (total_questions, total_scenarios) = match run.test_type {
            TestType::Qa => (Some(run.total_questions), None),
            TestType::Conversation => (None, Some(run.total_scenarios)),
        };
        self.bus.publish(&run.id, ProgressEvent::RunStart {
            run_id: run.id.clone(),
            test_type: run.test_type,
            total_questions,
            total_scenarios,
        });
        info!(total_items = run.total_items(), "Run started");

        let ctx = RunContext {
            run_id: run.id.clone(),
            flow: Arc::new(flow),
            agent: Arc::clone(&self.agent),
            repository: Arc::clone(&self.repository),
            bus: Arc::clone(&self.bus),
            cancel: token,
            clock: Arc::clone(&self.clock),
        };

        match strategy.execute(run, &ctx).await {
            Ok(StrategyOutcome::Completed) => self.finish_completed(test, run).await,
            Ok(StrategyOutcome::Canceled) => self.finish_canceled(run).await,
            Err(err) => {
                error!(error = %err, "Run failed");
                self.finish_failed(test, run, err.to_string()).await;
            }
        }
    }

    fn validate(&self, test: &TestDefinition) -> Result<(FlowConfig, Box<dyn ExecutionStrategy>)> {
        let flow = test.flow.clone().ok_or_else(|| {
            Error::Configuration(format!(
                "flow '{}' referenced by test '{}' is not configured",
                test.flow_id, test.id
            ))
        })?;
        if flow.endpoint.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "flow '{}' has no endpoint",
                flow.id
            )));
        }

        let strategy: Box<dyn ExecutionStrategy> = match &test.kind {
            TestKind::Qa(qa) => {
                if qa.questions.is_empty() {
                    return Err(Error::Configuration(format!(
                        "test '{}' has no questions",
                        test.id
                    )));
                }
                if let Some(blank) = qa.questions.iter().find(|q| q.question.trim().is_empty()) {
                    return Err(Error::Configuration(format!(
                        "question '{}' in test '{}' is empty",
                        blank.id, test.id
                    )));
                }
                Box::new(QaStrategy::new(qa.clone()))
            }
            TestKind::Conversation(conversation) => {
                if conversation.scenarios.is_empty() {
                    return Err(Error::Configuration(format!(
                        "test '{}' has no scenarios",
                        test.id
                    )));
                }
                for scenario in &conversation.scenarios {
                    if scenario.max_turns == 0 {
                        return Err(Error::Configuration(format!(
                            "scenario '{}' must allow at least one turn",
                            scenario.id
                        )));
                    }
                    if let (Some(persona_id), None) = (&scenario.persona_id, &scenario.persona) {
                        return Err(Error::Configuration(format!(
                            "persona '{persona_id}' referenced by scenario '{}' is not configured",
                            scenario.id
                        )));
                    }
                }
                self.simulated_user
                    .check_model(&conversation.simulated_user)?;
                Box::new(ConversationStrategy::new(
                    conversation.clone(),
                    Arc::clone(&self.simulated_user),
                ))
            }
        };
        Ok((flow, strategy))
    }

    async fn finish_completed(&self, test: &TestDefinition, run: &mut Run) {
        let terminal = match self.completion_event(run).await {
            Ok(event) => event,
            Err(err) => {
                self.finish_failed(test, run, err.to_string()).await;
                return;
            }
        };
        let mut completed = run.clone();
        if let Err(err) = completed.transition(RunStatus::Completed, self.clock.now_ms()) {
            error!(error = %err, "Run could not complete");
            return;
        }
        if let Err(err) = self.repository.save_run(&completed).await {
            self.finish_failed(test, run, err.to_string()).await;
            return;
        }
        *run = completed;
        info!(
            completed_items = run.completed_items(),
            total_items = run.total_items(),
            "Run completed"
        );
        self.bus.publish(&run.id, terminal);
        self.webhooks
            .on_transition(test.webhook.as_ref(), run, WebhookEvent::RunCompleted);
    }

    /// Stats are always recomputed from the stored items.
    async fn completion_event(&self, run: &mut Run) -> Result<ProgressEvent> {
        let results = self.repository.load_results(&run.id).await?;
        let conversations = self.repository.load_conversations(&run.id).await?;
        let snapshot = RunSnapshot {
            run: run.clone(),
            results,
            conversations,
        };
        run.is_fully_evaluated = snapshot.is_fully_evaluated();
        Ok(match run.test_type {
            TestType::Qa => ProgressEvent::Complete {
                run_id: run.id.clone(),
                stats: RunStats::from_results(&snapshot.results),
            },
            TestType::Conversation => ProgressEvent::RunComplete {
                run_id: run.id.clone(),
                stats: ConversationRunStats::from_conversations(
                    run.total_scenarios,
                    &snapshot.conversations,
                ),
            },
        })
    }

    async fn finish_canceled(&self, run: &mut Run) {
        if let Err(err) = run.transition(RunStatus::Canceled, self.clock.now_ms()) {
            error!(error = %err, "Run could not be canceled");
            return;
        }
        if let Err(err) = self.repository.save_run(run).await {
            error!(error = %err, "Failed to persist canceled run");
        }
        info!(completed_items = run.completed_items(), "Run canceled");
        self.bus.publish(&run.id, ProgressEvent::Canceled {
            run_id: run.id.clone(),
        });
    }

    async fn finish_failed(&self, test: &TestDefinition, run: &mut Run, message: String) {
        if let Err(err) = run.fail(message.clone(), self.clock.now_ms()) {
            error!(error = %err, "Run could not be marked failed");
            return;
        }
        if let Err(err) = self.repository.save_run(run).await {
            error!(error = %err, "Failed to persist failed run");
        }
        let event = match run.test_type {
            TestType::Qa => ProgressEvent::Error {
                run_id: run.id.clone(),
                message,
            },
            TestType::Conversation => ProgressEvent::RunError {
                run_id: run.id.clone(),
                error_message: message,
            },
        };
        self.bus.publish(&run.id, event);
        self.webhooks
            .on_transition(test.webhook.as_ref(), run, WebhookEvent::RunFailed);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, time::Duration};

    use tokio_stream::StreamExt;

    use super::*;
    use crate::application::test_support::*;

    #[tokio::test]
    async fn qa_run_moves_through_lifecycle_and_fires_webhooks() {
        let env = TestEnv::new(ScriptedAgent::echo());
        let mut test = qa_test(3);
        test.webhook = Some(webhook(&[]));

        let handle = env.orchestrator.start(test, Some("run-1".into())).await.unwrap();
        let events: Vec<ProgressEvent> = handle.events.collect().await;
        let run = handle.join.await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.completed_questions, 3);
        assert!(run.started_at.is_some() && run.completed_at.is_some());
        let names: Vec<&str> = events.iter().map(ProgressEvent::name).collect();
        assert_eq!(
            names,
            vec!["run_start", "result", "result", "result", "complete"]
        );
        match events.last() {
            Some(ProgressEvent::Complete { stats, .. }) => {
                assert_eq!(stats.total, 3);
                assert_eq!(stats.unevaluated, 3);
            }
            other => panic!("unexpected terminal event {other:?}"),
        }

        let delivered = env.delivery.wait_for(2).await;
        let fired: Vec<WebhookEvent> = delivered.iter().map(|r| r.event).collect();
        assert_eq!(fired, vec![WebhookEvent::RunRunning, WebhookEvent::RunCompleted]);
        assert_eq!(env.repository.load_run("run-1").await.unwrap(), Some(run));
    }

    #[tokio::test]
    async fn missing_flow_fails_before_any_work() {
        let env = TestEnv::new(ScriptedAgent::echo());
        let mut test = qa_test(2);
        test.webhook = Some(webhook(&[WebhookEvent::RunFailed]));
        test.flow = None;

        let handle = env.orchestrator.start(test, None).await.unwrap();
        let events: Vec<ProgressEvent> = handle.events.collect().await;
        let run = handle.join.await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.started_at, None);
        assert!(run.error_message.unwrap().contains("flow 'support-bot'"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "error");
        assert_eq!(env.agent.calls.load(Ordering::SeqCst), 0);
        assert!(env.repository.load_results(&run.id).await.unwrap().is_empty());
        let delivered = env.delivery.wait_for(1).await;
        assert_eq!(delivered[0].event, WebhookEvent::RunFailed);
    }

    #[tokio::test]
    async fn dangling_persona_fails_conversation_run() {
        let env = TestEnv::new(ScriptedAgent::echo());
        let mut test = conversation_test(2, 2);
        if let TestKind::Conversation(config) = &mut test.kind {
            config.scenarios[1].persona_id = Some("ghost".into());
        }
        let run = env.orchestrator.execute(test, None).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_message.unwrap().contains("persona 'ghost'"));
        assert!(env.repository.load_conversations(&run.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unusable_simulated_user_model_is_a_configuration_error() {
        let env = TestEnv::with_user(ScriptedAgent::echo(), ScriptedUser::rejecting_model());
        let run = env
            .orchestrator
            .execute(conversation_test(1, 2), None)
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_message.unwrap().contains("model"));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_ignores_terminal_runs() {
        let env = TestEnv::new(ScriptedAgent::echo().with_delay(Duration::from_millis(30)));
        let handle = env
            .orchestrator
            .start(qa_test(50), Some("run-1".into()))
            .await
            .unwrap();
        let mut events = handle.events;
        // Wait for the first result so the run is known to be executing.
        while let Some(event) = events.next().await {
            if event.name() == "result" {
                break;
            }
        }
        let first = env.orchestrator.cancel("run-1").await.unwrap();
        let second = env.orchestrator.cancel("run-1").await.unwrap();
        assert_eq!(first.outcome, CancelOutcome::Signaled);
        assert_eq!(second.outcome, CancelOutcome::Signaled);

        let run = handle.join.await.unwrap();
        assert_eq!(run.status, RunStatus::Canceled);
        assert!(run.completed_questions < 50);
        let remaining: Vec<_> = events.collect().await;
        assert_eq!(remaining.last().map(ProgressEvent::name), Some("canceled"));

        let after = env.orchestrator.cancel("run-1").await.unwrap();
        assert_eq!(after.outcome, CancelOutcome::AlreadyFinished);
        assert_eq!(after.status, RunStatus::Canceled);
        assert!(env.orchestrator.cancel("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn orphaned_runs_are_canceled_directly() {
        let env = TestEnv::new(ScriptedAgent::echo());
        let mut orphan = Run::new("orphan", &qa_test(2), 1);
        orphan.transition(RunStatus::Running, 2).unwrap();
        env.repository.save_run(&orphan).await.unwrap();

        let ack = env.orchestrator.cancel("orphan").await.unwrap();
        assert_eq!(ack.status, RunStatus::Canceled);
        assert_eq!(ack.outcome, CancelOutcome::CanceledDirectly);
        let stored = env.repository.load_run("orphan").await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Canceled);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_racing_completion_never_rewrites_a_finished_run() {
        let env = TestEnv::new(ScriptedAgent::echo().with_delay(Duration::from_millis(100)));
        let handle = env
            .orchestrator
            .start(qa_test(1), Some("run-1".into()))
            .await
            .unwrap();
        // Reads return the row as it was, then stall past the run's completion.
        env.repository.slow_reads(Duration::from_millis(300));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ack = env.orchestrator.cancel("run-1").await.unwrap();
        let run = handle.join.await.unwrap();

        assert_eq!(ack.outcome, CancelOutcome::Signaled);
        assert_eq!(run.status, RunStatus::Completed);
        let stored = env.repository.load_run("run-1").await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.completed_questions, 1);
    }

    #[tokio::test]
    async fn duplicate_run_ids_are_rejected() {
        let env = TestEnv::new(ScriptedAgent::echo());
        env.orchestrator
            .execute(qa_test(1), Some("run-1".into()))
            .await
            .unwrap();
        let err = env
            .orchestrator
            .execute(qa_test(1), Some("run-1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn persistence_failure_mid_run_fails_the_run() {
        let env = TestEnv::new(ScriptedAgent::echo());
        env.repository.fail_appends_after(1);
        let run = env.orchestrator.execute(qa_test(3), None).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.completed_questions, 1);
        assert_eq!(env.repository.load_results(&run.id).await.unwrap().len(), 1);
    }
}
