//! Sequential question/answer execution.

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    application::orchestrator::{ExecutionStrategy, RunContext, StrategyOutcome},
    core::{
        domain::{ProgressEvent, QaConfig, Question, Run, RunResult},
        error::Result,
    },
};

/// Sends each question to the agent in order and records one result per question.
///
/// With `multi_step_evaluation` every question shares a single session id so the
/// agent sees them as one dialogue; otherwise each question gets a fresh session.
pub struct QaStrategy {
    config: QaConfig,
}

impl QaStrategy {
    pub fn new(config: QaConfig) -> Self {
        Self { config }
    }

    async fn ask(
        &self,
        ctx: &RunContext,
        position: usize,
        question: &Question,
        session_id: String,
    ) -> RunResult {
        let mut variables = ctx.flow.input_variables.clone();
        variables.extend(question.input_variables.clone());

        let mut result = RunResult {
            id: Uuid::new_v4().to_string(),
            run_id: ctx.run_id.clone(),
            position,
            question_id: Some(question.id.clone()),
            question: question.question.clone(),
            answer: None,
            expected_answer: question.expected_answer.clone(),
            session_id,
            execution_time_ms: None,
            is_error: false,
            error_message: None,
            human_evaluation: None,
            severity: None,
            evaluation_note: None,
            llm_judge_score: None,
            llm_judge_reasoning: None,
            created_at: 0,
        };
        match ctx
            .agent
            .invoke(&ctx.flow, &result.session_id, &question.question, &variables)
            .await
        {
            Ok(response) => {
                debug!(position, ms = response.execution_time_ms, "Question answered");
                result.answer = Some(response.answer);
                result.execution_time_ms = Some(response.execution_time_ms);
            }
            Err(err) => {
                warn!(position, question_id = %question.id, error = %err, "Question failed");
                result.is_error = true;
                result.error_message = Some(err.to_string());
            }
        }
        result.created_at = ctx.now();
        result
    }
}

#[async_trait]
impl ExecutionStrategy for QaStrategy {
    async fn execute(&self, run: &mut Run, ctx: &RunContext) -> Result<StrategyOutcome> {
        let shared_session = self
            .config
            .multi_step_evaluation
            .then(|| Uuid::new_v4().to_string());

        for (position, question) in self.config.questions.iter().enumerate() {
            if ctx.is_cancelled() {
                info!(answered = position, "Stopping Q&A run on cancellation");
                return Ok(StrategyOutcome::Canceled);
            }
            let session_id = shared_session
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let result = self.ask(ctx, position, question, session_id).await;

            ctx.repository.append_result(&result).await?;
            run.record_item_completed()?;
            ctx.repository.save_run(run).await?;
            ctx.publish(ProgressEvent::ResultRecorded(result));
        }
        Ok(StrategyOutcome::Completed)
    }
}
