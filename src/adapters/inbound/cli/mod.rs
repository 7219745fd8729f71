//! CLI inbound adapter that translates command-line arguments into `RunService` calls.

mod definitions;

pub use definitions::*;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::info;

use crate::core::{
    domain::{
        ChangeType, EvaluationUpdate, ProgressEvent, RunComparison, RunStatsReport, RunStatus,
    },
    ports::{RunDetail, RunService, StartRunRequest},
};

/// CLI adapter that consumes the `RunService` to execute commands.
pub struct CliAdapter {
    service: Arc<dyn RunService>,
}

impl CliAdapter {
    pub fn new(service: Arc<dyn RunService>) -> Self {
        Self { service }
    }

    /// Execute a CLI command by dispatching to the appropriate service method.
    pub async fn execute(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Run(args) => self.run_command(args).await,
            Commands::Status(args) => self.status_command(args).await,
            Commands::Compare(args) => self.compare_command(args).await,
            Commands::Evaluate(args) => self.evaluate_command(args).await,
            Commands::Serve(_) => Err(anyhow!(
                "Serve command should be handled by the composition root"
            )),
        }
    }

    async fn run_command(&self, args: RunArgs) -> Result<()> {
        let started = self
            .service
            .start_run(StartRunRequest {
                test_id: args.test.clone(),
                run_id: args.run_id.clone(),
            })
            .await?;
        let run_id = started.run_id;
        let mut events = started.events;
        if !args.json {
            println!("Run {run_id} started (test: {})", args.test);
        }

        let mut cancel_requested = false;
        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else { break };
                    if args.json {
                        println!("{}", serde_json::to_string(&event)?);
                    } else if let Some(line) = describe_event(&event) {
                        println!("{line}");
                    }
                }
                signal = tokio::signal::ctrl_c(), if !cancel_requested => {
                    signal.context("Failed to listen for Ctrl-C")?;
                    cancel_requested = true;
                    let ack = self.service.cancel_run(&run_id).await?;
                    info!(run_id = %ack.run_id, outcome = ack.outcome.as_str(), "Cancellation requested");
                }
            }
        }

        let detail = self
            .service
            .get_run(&run_id)
            .await?
            .ok_or_else(|| anyhow!("Run {run_id} was not recorded"))?;
        if !args.json {
            print_run_detail(&detail);
        }
        match detail.run.status {
            RunStatus::Failed => Err(anyhow!(
                "Run {run_id} failed: {}",
                detail.run.error_message.as_deref().unwrap_or("unknown error")
            )),
            _ => Ok(()),
        }
    }

    async fn status_command(&self, args: StatusArgs) -> Result<()> {
        if let Some(id) = args.run_id {
            let detail = self
                .service
                .get_run(&id)
                .await?
                .ok_or_else(|| anyhow!("Run {id} not found"))?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                print_run_detail(&detail);
            }
            return Ok(());
        }

        let runs = self.service.list_runs(args.limit.max(1)).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&json!({ "runs": runs }))?);
        } else if runs.is_empty() {
            println!("No runs recorded yet.");
        } else {
            println!("Recent runs:");
            for run in runs {
                println!(
                    "- {} [{}] test={} type={} progress={}/{} created={}",
                    run.id,
                    run.status.as_str(),
                    run.test_id,
                    run.test_type.as_str(),
                    run.completed_items(),
                    run.total_items(),
                    run.created_at
                );
            }
        }
        Ok(())
    }

    async fn compare_command(&self, args: CompareArgs) -> Result<()> {
        let comparison = self.service.compare_runs(&args.left, &args.right).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&comparison)?);
        } else {
            print_comparison(&comparison);
        }
        Ok(())
    }

    async fn evaluate_command(&self, args: EvaluateArgs) -> Result<()> {
        let update = EvaluationUpdate {
            evaluation: args.evaluation.map(Into::into),
            severity: args.severity.map(Into::into),
            note: args.note.clone(),
        };
        let run = match (&args.result, &args.conversation) {
            (Some(result_id), None) => {
                self.service
                    .evaluate_result(&args.run_id, result_id, update)
                    .await?
            }
            (None, Some(conversation_id)) => {
                self.service
                    .evaluate_conversation(&args.run_id, conversation_id, update)
                    .await?
            }
            _ => return Err(anyhow!("Pass exactly one of --result or --conversation")),
        };
        println!(
            "Run {} evaluation saved (fully evaluated: {})",
            run.id, run.is_fully_evaluated
        );
        Ok(())
    }
}

/// One human-readable line per progress event; `None` for events not worth printing.
pub fn describe_event(event: &ProgressEvent) -> Option<String> {
    let line = match event {
        ProgressEvent::RunStart {
            total_questions,
            total_scenarios,
            ..
        } => match (total_questions, total_scenarios) {
            (Some(questions), _) => format!("Running {questions} questions"),
            (_, Some(scenarios)) => format!("Running {scenarios} scenarios"),
            _ => return None,
        },
        ProgressEvent::ResultRecorded(result) => {
            let outcome = if result.is_error {
                format!(
                    "ERROR {}",
                    result.error_message.as_deref().unwrap_or("unknown error")
                )
            } else {
                result.answer.clone().unwrap_or_default()
            };
            let timing = result
                .execution_time_ms
                .map(|ms| format!(" ({ms} ms)"))
                .unwrap_or_default();
            format!(
                "[{}] {} -> {}{timing}",
                result.position + 1,
                result.question,
                outcome
            )
        }
        ProgressEvent::ScenarioStart {
            scenario_name,
            max_turns,
            ..
        } => format!("Scenario '{scenario_name}' started (max {max_turns} turns)"),
        ProgressEvent::UserTurn(turn) => format!("  user: {}", turn.message),
        ProgressEvent::AgentTurn(turn) => format!("  agent: {}", turn.message),
        ProgressEvent::ScenarioEnd {
            scenario_name,
            status,
            turn_count,
            end_reason,
            ..
        } => {
            let reason = end_reason
                .as_deref()
                .map(|reason| format!(" - {reason}"))
                .unwrap_or_default();
            format!(
                "Scenario '{scenario_name}' finished: {} after {turn_count} turns{reason}",
                status.as_str()
            )
        }
        ProgressEvent::SummaryGenerated { summary, .. } => format!("  summary: {summary}"),
        ProgressEvent::Complete { .. } | ProgressEvent::RunComplete { .. } => {
            "Run completed".to_string()
        }
        ProgressEvent::Error { message, .. } => format!("Run failed: {message}"),
        ProgressEvent::RunError { error_message, .. } => format!("Run failed: {error_message}"),
        ProgressEvent::Canceled { .. } => "Run canceled".to_string(),
    };
    Some(line)
}

fn print_run_detail(detail: &RunDetail) {
    let run = &detail.run;
    println!("Run: {}", run.id);
    println!("Test: {} ({})", run.test_name, run.test_id);
    println!("Type: {}", run.test_type.as_str());
    println!("Status: {}", run.status.as_str());
    println!("Progress: {}/{}", run.completed_items(), run.total_items());
    println!("Created: {}", run.created_at);
    if let Some(error) = &run.error_message {
        println!("Error: {error}");
    }
    println!("Fully evaluated: {}", run.is_fully_evaluated);
    match &detail.stats {
        RunStatsReport::Qa(stats) => {
            println!(
                "Results: {} total, {} errors, {} correct, {} partial, {} incorrect, {} unevaluated",
                stats.total,
                stats.errors,
                stats.correct,
                stats.partial,
                stats.incorrect,
                stats.unevaluated
            );
            if let Some(accuracy) = stats.accuracy {
                println!("Accuracy: {accuracy:.1}%");
            }
            if let Some(perf) = &stats.performance {
                println!(
                    "Latency: avg {:.0} ms, p50 {} ms, p95 {} ms",
                    perf.avg_ms, perf.p50_ms, perf.p95_ms
                );
            }
        }
        RunStatsReport::Conversation(stats) => {
            println!(
                "Scenarios: {}/{} finished, {} achieved, {} not achieved, {} max turns, {} errors",
                stats.finished,
                stats.total_scenarios,
                stats.goal_achieved,
                stats.goal_not_achieved,
                stats.max_turns_reached,
                stats.errors
            );
            println!("Average turns: {:.1}", stats.average_turns);
            if let Some(rate) = stats.goal_achievement_rate {
                println!("Goal achievement: {rate:.1}%");
            }
            if let Some(accuracy) = stats.accuracy {
                println!("Accuracy: {accuracy:.1}%");
            }
        }
    }
}

fn print_comparison(comparison: &RunComparison) {
    let summary = &comparison.summary;
    println!(
        "Comparing {} -> {} ({})",
        comparison.left_run_id,
        comparison.right_run_id,
        comparison.test_type.as_str()
    );
    println!(
        "{} items: {} improved, {} regressed, {} unchanged, {} new, {} removed",
        summary.total,
        summary.improved,
        summary.regressed,
        summary.unchanged,
        summary.new,
        summary.removed
    );
    if let Some(delta) = summary.accuracy_delta {
        println!("Accuracy delta: {delta:+.1} points");
    }
    if let Some(delta) = summary.avg_latency_delta {
        println!("Average latency delta: {delta:+.0} ms");
    }
    for item in &comparison.items {
        if item.change_type == ChangeType::Unchanged {
            continue;
        }
        println!("- {:?}: {}", item.change_type, item.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        domain::{
            Conversation, ConversationStatus, Run, RunComparison, RunResult, RunStats, TestType,
        },
        error::{Error as CoreError, Result as CoreResult},
        ports::{CancelAck, CancelOutcome, ProgressStream, StartedRun},
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn run(id: &str, status: RunStatus) -> Run {
        Run {
            id: id.into(),
            test_id: "faq".into(),
            test_name: "FAQ".into(),
            test_type: TestType::Qa,
            status,
            total_questions: 1,
            completed_questions: 1,
            total_scenarios: 0,
            completed_scenarios: 0,
            created_at: 1,
            started_at: Some(2),
            completed_at: Some(3),
            error_message: (status == RunStatus::Failed).then(|| "flow down".to_string()),
            is_fully_evaluated: false,
        }
    }

    struct CannedService {
        final_status: RunStatus,
        events: Vec<ProgressEvent>,
        evaluated: Mutex<Vec<(String, EvaluationUpdate)>>,
    }

    impl CannedService {
        fn new(final_status: RunStatus, events: Vec<ProgressEvent>) -> Self {
            Self {
                final_status,
                events,
                evaluated: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RunService for CannedService {
        async fn start_run(&self, request: StartRunRequest) -> CoreResult<StartedRun> {
            Ok(StartedRun {
                run_id: request.run_id.unwrap_or_else(|| "generated".into()),
                events: Box::pin(tokio_stream::iter(self.events.clone())),
            })
        }

        async fn cancel_run(&self, run_id: &str) -> CoreResult<CancelAck> {
            Ok(CancelAck {
                run_id: run_id.into(),
                status: RunStatus::Running,
                outcome: CancelOutcome::Signaled,
            })
        }

        async fn compare_runs(&self, left: &str, _right: &str) -> CoreResult<RunComparison> {
            Err(CoreError::NotFound(format!("run {left}")))
        }

        async fn get_run(&self, run_id: &str) -> CoreResult<Option<RunDetail>> {
            Ok(Some(RunDetail {
                run: run(run_id, self.final_status),
                results: Vec::<RunResult>::new(),
                conversations: Vec::<Conversation>::new(),
                stats: RunStatsReport::Qa(RunStats::from_results(&[])),
            }))
        }

        async fn list_runs(&self, _limit: usize) -> CoreResult<Vec<Run>> {
            Ok(vec![run("a", RunStatus::Completed)])
        }

        fn subscribe(&self, _run_id: &str) -> Option<ProgressStream> {
            None
        }

        async fn evaluate_result(
            &self,
            run_id: &str,
            result_id: &str,
            update: EvaluationUpdate,
        ) -> CoreResult<Run> {
            self.evaluated
                .lock()
                .unwrap()
                .push((result_id.to_string(), update));
            Ok(run(run_id, RunStatus::Completed))
        }

        async fn evaluate_conversation(
            &self,
            run_id: &str,
            _conversation_id: &str,
            _update: EvaluationUpdate,
        ) -> CoreResult<Run> {
            Err(CoreError::NotFound(format!("conversation in run {run_id}")))
        }
    }

    fn run_args(run_id: &str) -> RunArgs {
        RunArgs {
            test: "faq".into(),
            run_id: Some(run_id.into()),
            api_key: None,
            json: false,
            log_file: false,
        }
    }

    #[tokio::test]
    async fn run_command_drains_events_and_succeeds() {
        let service = Arc::new(CannedService::new(
            RunStatus::Completed,
            vec![ProgressEvent::Complete {
                run_id: "r1".into(),
                stats: RunStats::from_results(&[]),
            }],
        ));
        let adapter = CliAdapter::new(service);
        adapter
            .execute(Commands::Run(run_args("r1")))
            .await
            .expect("completed run succeeds");
    }

    #[tokio::test]
    async fn run_command_reports_failed_runs() {
        let service = Arc::new(CannedService::new(
            RunStatus::Failed,
            vec![ProgressEvent::Error {
                run_id: "r2".into(),
                message: "flow down".into(),
            }],
        ));
        let adapter = CliAdapter::new(service);
        let err = adapter
            .execute(Commands::Run(run_args("r2")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("flow down"), "{err}");
    }

    #[tokio::test]
    async fn evaluate_command_forwards_the_verdict() {
        let service = Arc::new(CannedService::new(RunStatus::Completed, Vec::new()));
        let adapter = CliAdapter::new(service.clone());
        adapter
            .execute(Commands::Evaluate(EvaluateArgs {
                run_id: "r1".into(),
                result: Some("res-1".into()),
                conversation: None,
                evaluation: Some(EvaluationArg::Correct),
                severity: None,
                note: Some("fine".into()),
            }))
            .await
            .unwrap();
        let evaluated = service.evaluated.lock().unwrap();
        assert_eq!(evaluated.len(), 1);
        assert_eq!(evaluated[0].0, "res-1");
        assert_eq!(evaluated[0].1.note.as_deref(), Some("fine"));
    }

    #[tokio::test]
    async fn compare_command_surfaces_missing_runs() {
        let service = Arc::new(CannedService::new(RunStatus::Completed, Vec::new()));
        let adapter = CliAdapter::new(service);
        let err = adapter
            .execute(Commands::Compare(CompareArgs {
                left: "old".into(),
                right: "new".into(),
                json: false,
            }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("old"));
    }

    #[test]
    fn describes_scenario_end_with_reason() {
        let line = describe_event(&ProgressEvent::ScenarioEnd {
            run_id: "r".into(),
            scenario_id: Some("s1".into()),
            scenario_name: "Refund".into(),
            conversation_id: "c1".into(),
            status: ConversationStatus::Error,
            end_reason: Some("agent unavailable".into()),
            goal_achieved: false,
            turn_count: 3,
        })
        .unwrap();
        assert_eq!(
            line,
            "Scenario 'Refund' finished: error after 3 turns - agent unavailable"
        );
    }
}
