//! Derived statistics. Always recomputed from stored results, never persisted.

use serde::Serialize;

use crate::core::domain::run::{Conversation, ConversationStatus, HumanEvaluation, RunResult};

/// Accuracy in percent with half credit for `partial`:
/// `(correct + 0.5 * partial) / (correct + partial + incorrect) * 100`.
///
/// `None` when nothing has been evaluated.
pub fn accuracy(correct: usize, partial: usize, incorrect: usize) -> Option<f64> {
    let evaluated = correct + partial + incorrect;
    if evaluated == 0 {
        return None;
    }
    let credit = correct as f64 + partial as f64 * 0.5;
    Some(credit / evaluated as f64 * 100.0)
}

/// Latency distribution over a set of execution times.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: i64,
    pub max_ms: i64,
    pub p50_ms: i64,
    pub p95_ms: i64,
}

impl PerformanceStats {
    pub fn from_samples(samples: &[i64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let sum: i64 = sorted.iter().sum();
        Some(Self {
            count: sorted.len(),
            avg_ms: sum as f64 / sorted.len() as f64,
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            p50_ms: nearest_rank(&sorted, 50.0),
            p95_ms: nearest_rank(&sorted, 95.0),
        })
    }
}

fn nearest_rank(sorted: &[i64], percentile: f64) -> i64 {
    let rank = (percentile / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationCounts {
    pub correct: usize,
    pub partial: usize,
    pub incorrect: usize,
    pub unevaluated: usize,
}

impl EvaluationCounts {
    fn record(&mut self, evaluation: Option<HumanEvaluation>) {
        match evaluation {
            Some(HumanEvaluation::Correct) => self.correct += 1,
            Some(HumanEvaluation::Partial) => self.partial += 1,
            Some(HumanEvaluation::Incorrect) => self.incorrect += 1,
            None => self.unevaluated += 1,
        }
    }

    pub fn evaluated(&self) -> usize {
        self.correct + self.partial + self.incorrect
    }

    pub fn accuracy(&self) -> Option<f64> {
        accuracy(self.correct, self.partial, self.incorrect)
    }
}

/// Aggregates for a Q&A run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub total: usize,
    pub errors: usize,
    pub correct: usize,
    pub partial: usize,
    pub incorrect: usize,
    pub unevaluated: usize,
    pub accuracy: Option<f64>,
    pub performance: Option<PerformanceStats>,
}

impl RunStats {
    pub fn from_results(results: &[RunResult]) -> Self {
        let mut counts = EvaluationCounts::default();
        let mut errors = 0;
        let mut latencies = Vec::new();
        for result in results {
            if result.is_error {
                errors += 1;
                continue;
            }
            counts.record(result.human_evaluation);
            if let Some(ms) = result.execution_time_ms {
                latencies.push(ms);
            }
        }
        Self {
            total: results.len(),
            errors,
            correct: counts.correct,
            partial: counts.partial,
            incorrect: counts.incorrect,
            unevaluated: counts.unevaluated,
            accuracy: counts.accuracy(),
            performance: PerformanceStats::from_samples(&latencies),
        }
    }
}

/// Aggregates for a conversation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRunStats {
    pub total_scenarios: usize,
    pub finished: usize,
    pub goal_achieved: usize,
    pub goal_not_achieved: usize,
    pub max_turns_reached: usize,
    pub errors: usize,
    pub interrupted: usize,
    pub average_turns: f64,
    /// Share of finished, non-error conversations that reached their goal.
    pub goal_achievement_rate: Option<f64>,
    pub evaluations: EvaluationCounts,
    pub accuracy: Option<f64>,
    /// Latency of agent replies across all conversations.
    pub agent_latency: Option<PerformanceStats>,
}

impl ConversationRunStats {
    pub fn from_conversations(total_scenarios: usize, conversations: &[Conversation]) -> Self {
        let mut stats = Self {
            total_scenarios,
            finished: 0,
            goal_achieved: 0,
            goal_not_achieved: 0,
            max_turns_reached: 0,
            errors: 0,
            interrupted: 0,
            average_turns: 0.0,
            goal_achievement_rate: None,
            evaluations: EvaluationCounts::default(),
            accuracy: None,
            agent_latency: None,
        };
        let mut latencies = Vec::new();
        let mut turn_total = 0usize;
        for conversation in conversations {
            match conversation.status {
                ConversationStatus::Running => continue,
                ConversationStatus::GoalAchieved => stats.goal_achieved += 1,
                ConversationStatus::GoalNotAchieved => stats.goal_not_achieved += 1,
                ConversationStatus::MaxTurnsReached => stats.max_turns_reached += 1,
                ConversationStatus::Error => stats.errors += 1,
                ConversationStatus::Completed => stats.interrupted += 1,
            }
            stats.finished += 1;
            turn_total += conversation.turns.len();
            latencies.extend(
                conversation
                    .turns
                    .iter()
                    .filter_map(|turn| turn.execution_time_ms),
            );
            if !conversation.is_error() {
                stats.evaluations.record(conversation.human_evaluation);
            }
        }
        if stats.finished > 0 {
            stats.average_turns = turn_total as f64 / stats.finished as f64;
        }
        let judged = stats.finished - stats.errors;
        if judged > 0 {
            stats.goal_achievement_rate = Some(stats.goal_achieved as f64 / judged as f64 * 100.0);
        }
        stats.accuracy = stats.evaluations.accuracy();
        stats.agent_latency = PerformanceStats::from_samples(&latencies);
        stats
    }
}

/// Stats for either run type, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunStatsReport {
    Qa(RunStats),
    Conversation(ConversationRunStats),
}
