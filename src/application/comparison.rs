//! Item-by-item diff of two completed runs of the same type.

use std::collections::HashMap;

use crate::core::{
    domain::{
        ChangeType, ComparedItem, ComparisonResult, HumanEvaluation, RunComparison,
        RunComparisonSummary, RunSnapshot, RunStatus, TestType, accuracy,
    },
    error::{Error, Result},
};

/// Aligns Q&A results by question text and conversations by scenario name.
/// Repeated keys are paired by occurrence.
pub fn compare(left: &RunSnapshot, right: &RunSnapshot) -> Result<RunComparison> {
    for snapshot in [left, right] {
        if snapshot.run.status != RunStatus::Completed {
            return Err(Error::InvalidState(format!(
                "run {} is {}; only completed runs can be compared",
                snapshot.run.id,
                snapshot.run.status.as_str()
            )));
        }
    }
    if left.run.test_type != right.run.test_type {
        return Err(Error::InvalidState(format!(
            "cannot compare a {} run with a {} run",
            left.run.test_type.as_str(),
            right.run.test_type.as_str()
        )));
    }

    let left_items = keyed_items(left);
    let right_items = keyed_items(right);
    let items = align(&left_items, &right_items);
    let summary = summarize(&items, &left_items, &right_items);

    Ok(RunComparison {
        left_run_id: left.run.id.clone(),
        right_run_id: right.run.id.clone(),
        test_type: left.run.test_type,
        items,
        summary,
    })
}

fn keyed_items(snapshot: &RunSnapshot) -> Vec<(String, ComparedItem)> {
    match snapshot.run.test_type {
        TestType::Qa => snapshot
            .results
            .iter()
            .map(|result| {
                (
                    result.question.clone(),
                    ComparedItem {
                        id: result.id.clone(),
                        evaluation: result.human_evaluation,
                        execution_time_ms: result.execution_time_ms,
                        is_error: result.is_error,
                        outcome: result.answer.clone(),
                    },
                )
            })
            .collect(),
        TestType::Conversation => snapshot
            .conversations
            .iter()
            .map(|conversation| {
                (
                    conversation.scenario_name.clone(),
                    ComparedItem {
                        id: conversation.id.clone(),
                        evaluation: conversation.human_evaluation,
                        execution_time_ms: conversation.duration_ms(),
                        is_error: conversation.is_error(),
                        outcome: Some(conversation.status.as_str().to_string()),
                    },
                )
            })
            .collect(),
    }
}

fn align(
    left: &[(String, ComparedItem)],
    right: &[(String, ComparedItem)],
) -> Vec<ComparisonResult> {
    let mut right_by_key: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, (key, _)) in right.iter().enumerate() {
        right_by_key.entry(key.as_str()).or_default().push(idx);
    }
    let mut matched = vec![false; right.len()];
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    let mut items = Vec::with_capacity(left.len().max(right.len()));

    for (key, left_item) in left {
        let occurrence = occurrences.entry(key.as_str()).or_default();
        let partner = right_by_key
            .get(key.as_str())
            .and_then(|indices| indices.get(*occurrence))
            .copied();
        *occurrence += 1;
        match partner {
            Some(idx) => {
                matched[idx] = true;
                items.push(pair(key, left_item.clone(), right[idx].1.clone()));
            }
            None => items.push(ComparisonResult {
                key: key.clone(),
                left: Some(left_item.clone()),
                right: None,
                change_type: ChangeType::Removed,
                execution_time_change: None,
            }),
        }
    }
    for (idx, (key, right_item)) in right.iter().enumerate() {
        if !matched[idx] {
            items.push(ComparisonResult {
                key: key.clone(),
                left: None,
                right: Some(right_item.clone()),
                change_type: ChangeType::New,
                execution_time_change: None,
            });
        }
    }
    items
}

fn pair(key: &str, left: ComparedItem, right: ComparedItem) -> ComparisonResult {
    let change_type = classify(left.evaluation, right.evaluation);
    let execution_time_change = left
        .execution_time_ms
        .zip(right.execution_time_ms)
        .map(|(before, after)| after - before);
    ComparisonResult {
        key: key.to_string(),
        left: Some(left),
        right: Some(right),
        change_type,
        execution_time_change,
    }
}

/// Unevaluated on either side counts as unchanged.
fn classify(left: Option<HumanEvaluation>, right: Option<HumanEvaluation>) -> ChangeType {
    match (left, right) {
        (Some(before), Some(after)) if after.rank() > before.rank() => ChangeType::Improved,
        (Some(before), Some(after)) if after.rank() < before.rank() => ChangeType::Regressed,
        _ => ChangeType::Unchanged,
    }
}

fn summarize(
    items: &[ComparisonResult],
    left: &[(String, ComparedItem)],
    right: &[(String, ComparedItem)],
) -> RunComparisonSummary {
    let mut summary = RunComparisonSummary {
        total: items.len(),
        ..Default::default()
    };
    for item in items {
        match item.change_type {
            ChangeType::Improved => summary.improved += 1,
            ChangeType::Regressed => summary.regressed += 1,
            ChangeType::Unchanged => summary.unchanged += 1,
            ChangeType::New => summary.new += 1,
            ChangeType::Removed => summary.removed += 1,
        }
    }
    summary.left_accuracy = side_accuracy(left);
    summary.right_accuracy = side_accuracy(right);
    summary.accuracy_delta = summary
        .left_accuracy
        .zip(summary.right_accuracy)
        .map(|(before, after)| after - before);
    summary.avg_latency_delta = average_latency(left)
        .zip(average_latency(right))
        .map(|(before, after)| after - before);
    summary
}

fn side_accuracy(items: &[(String, ComparedItem)]) -> Option<f64> {
    let (mut correct, mut partial, mut incorrect) = (0, 0, 0);
    for (_, item) in items.iter().filter(|(_, item)| !item.is_error) {
        match item.evaluation {
            Some(HumanEvaluation::Correct) => correct += 1,
            Some(HumanEvaluation::Partial) => partial += 1,
            Some(HumanEvaluation::Incorrect) => incorrect += 1,
            None => {}
        }
    }
    accuracy(correct, partial, incorrect)
}

fn average_latency(items: &[(String, ComparedItem)]) -> Option<f64> {
    let timed: Vec<i64> = items
        .iter()
        .filter(|(_, item)| !item.is_error)
        .filter_map(|(_, item)| item.execution_time_ms)
        .collect();
    if timed.is_empty() {
        return None;
    }
    Some(timed.iter().sum::<i64>() as f64 / timed.len() as f64)
}
