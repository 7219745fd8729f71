//! Cancellation tokens for live runs.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the run's token, creating it on first registration.
    pub fn register(&self, run_id: &str) -> CancellationToken {
        self.tokens()
            .entry(run_id.to_string())
            .or_default()
            .clone()
    }

    /// Signals the run. Returns false when no live token exists.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.tokens().get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.tokens().contains_key(run_id)
    }

    pub fn is_cancelled(&self, run_id: &str) -> bool {
        self.tokens()
            .get(run_id)
            .is_some_and(CancellationToken::is_cancelled)
    }

    pub fn release(&self, run_id: &str) {
        self.tokens().remove(run_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayOutcome {
    Elapsed,
    Cancelled,
}

/// Sleeps for `duration` unless the token fires first.
pub async fn cancellable_delay(token: &CancellationToken, duration: Duration) -> DelayOutcome {
    if duration.is_zero() {
        return if token.is_cancelled() {
            DelayOutcome::Cancelled
        } else {
            DelayOutcome::Elapsed
        };
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => DelayOutcome::Cancelled,
        _ = tokio::time::sleep(duration) => DelayOutcome::Elapsed,
    }
}
