//! Application service implementing `RunService`.
//! This is the use-case port implementation that the CLI and HTTP server consume.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::{
    application::{comparison, orchestrator::RunOrchestrator, webhooks::WebhookDispatcher},
    core::{
        domain::{
            ConversationRunStats, EvaluationUpdate, Run, RunComparison, RunSnapshot, RunStats,
            RunStatsReport, TestType, WebhookEvent,
        },
        error::{Error, Result},
        ports::{
            CancelAck, Clock, ProgressStream, RunDetail, RunRepository, RunService,
            StartRunRequest, StartedRun, TestCatalog,
        },
    },
};

pub struct AppService {
    catalog: Arc<dyn TestCatalog>,
    orchestrator: RunOrchestrator,
    repository: Arc<dyn RunRepository>,
    webhooks: Arc<WebhookDispatcher>,
    clock: Arc<dyn Clock>,
    /// Serializes evaluation load, update and flag refresh per run.
    evaluation_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AppService {
    pub fn new(
        catalog: Arc<dyn TestCatalog>,
        orchestrator: RunOrchestrator,
        repository: Arc<dyn RunRepository>,
        webhooks: Arc<WebhookDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            orchestrator,
            repository,
            webhooks,
            clock,
            evaluation_locks: Mutex::default(),
        }
    }

    async fn lock_evaluations(&self, run_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .evaluation_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(run_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    async fn snapshot(&self, run_id: &str) -> Result<Option<RunSnapshot>> {
        let Some(run) = self.repository.load_run(run_id).await? else {
            return Ok(None);
        };
        let (results, conversations) = match run.test_type {
            TestType::Qa => (self.repository.load_results(run_id).await?, Vec::new()),
            TestType::Conversation => (
                Vec::new(),
                self.repository.load_conversations(run_id).await?,
            ),
        };
        Ok(Some(RunSnapshot {
            run,
            results,
            conversations,
        }))
    }

    async fn require_snapshot(&self, run_id: &str) -> Result<RunSnapshot> {
        self.snapshot(run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("run {run_id}")))
    }

    async fn evaluable_snapshot(&self, run_id: &str) -> Result<RunSnapshot> {
        let snapshot = self.require_snapshot(run_id).await?;
        if !snapshot.run.status.is_terminal() {
            return Err(Error::InvalidState(format!(
                "run {run_id} is still {}; evaluate it once it has finished",
                snapshot.run.status.as_str()
            )));
        }
        Ok(snapshot)
    }

    /// Recomputes the evaluation flag and notifies when it first becomes true.
    async fn refresh_evaluation(&self, mut snapshot: RunSnapshot) -> Result<Run> {
        let was_evaluated = snapshot.run.is_fully_evaluated;
        let now_evaluated = snapshot.is_fully_evaluated();
        if was_evaluated != now_evaluated {
            snapshot.run.is_fully_evaluated = now_evaluated;
            self.repository.save_run(&snapshot.run).await?;
        }
        if now_evaluated && !was_evaluated {
            info!(run_id = %snapshot.run.id, "Run fully evaluated");
            match self.catalog.resolve_test(&snapshot.run.test_id) {
                Ok(test) => self.webhooks.on_transition(
                    test.webhook.as_ref(),
                    &snapshot.run,
                    WebhookEvent::RunEvaluated,
                ),
                Err(err) => warn!(
                    run_id = %snapshot.run.id,
                    test_id = %snapshot.run.test_id,
                    error = %err,
                    "Test no longer configured; skipping evaluation webhook"
                ),
            }
        }
        Ok(snapshot.run)
    }
}

fn stats_for(snapshot: &RunSnapshot) -> RunStatsReport {
    match snapshot.run.test_type {
        TestType::Qa => RunStatsReport::Qa(RunStats::from_results(&snapshot.results)),
        TestType::Conversation => RunStatsReport::Conversation(
            ConversationRunStats::from_conversations(
                snapshot.run.total_scenarios,
                &snapshot.conversations,
            ),
        ),
    }
}

#[async_trait]
impl RunService for AppService {
    async fn start_run(&self, request: StartRunRequest) -> Result<StartedRun> {
        let test = self.catalog.resolve_test(&request.test_id)?;
        let handle = self.orchestrator.start(test, request.run_id).await?;
        // The run owns its task; dropping the join handle detaches it.
        Ok(StartedRun {
            run_id: handle.run_id,
            events: Box::pin(handle.events),
        })
    }

    async fn cancel_run(&self, run_id: &str) -> Result<CancelAck> {
        self.orchestrator.cancel(run_id).await
    }

    async fn compare_runs(&self, left_run_id: &str, right_run_id: &str) -> Result<RunComparison> {
        let left = self.require_snapshot(left_run_id).await?;
        let right = self.require_snapshot(right_run_id).await?;
        comparison::compare(&left, &right)
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunDetail>> {
        Ok(self.snapshot(run_id).await?.map(|snapshot| {
            let stats = stats_for(&snapshot);
            RunDetail {
                run: snapshot.run,
                results: snapshot.results,
                conversations: snapshot.conversations,
                stats,
            }
        }))
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        self.repository.list_runs(limit.max(1)).await
    }

    fn subscribe(&self, run_id: &str) -> Option<ProgressStream> {
        let stream = self.orchestrator.bus().subscribe(run_id)?;
        Some(Box::pin(stream))
    }

    async fn evaluate_result(
        &self,
        run_id: &str,
        result_id: &str,
        update: EvaluationUpdate,
    ) -> Result<Run> {
        let _guard = self.lock_evaluations(run_id).await;
        let mut snapshot = self.evaluable_snapshot(run_id).await?;
        let result = snapshot
            .results
            .iter_mut()
            .find(|result| result.id == result_id)
            .ok_or_else(|| Error::NotFound(format!("result {result_id} in run {run_id}")))?;
        result.apply_evaluation(&update);
        self.repository.update_result(result).await?;
        info!(
            run_id,
            result_id,
            evaluation = update.evaluation.map(|e| e.as_str()),
            at = self.clock.now_ms(),
            "Result evaluated"
        );
        self.refresh_evaluation(snapshot).await
    }

    async fn evaluate_conversation(
        &self,
        run_id: &str,
        conversation_id: &str,
        update: EvaluationUpdate,
    ) -> Result<Run> {
        let _guard = self.lock_evaluations(run_id).await;
        let mut snapshot = self.evaluable_snapshot(run_id).await?;
        let conversation = snapshot
            .conversations
            .iter_mut()
            .find(|conversation| conversation.id == conversation_id)
            .ok_or_else(|| {
                Error::NotFound(format!("conversation {conversation_id} in run {run_id}"))
            })?;
        conversation.apply_evaluation(&update);
        self.repository.save_conversation(conversation).await?;
        info!(
            run_id,
            conversation_id,
            evaluation = update.evaluation.map(|e| e.as_str()),
            at = self.clock.now_ms(),
            "Conversation evaluated"
        );
        self.refresh_evaluation(snapshot).await
    }
}
