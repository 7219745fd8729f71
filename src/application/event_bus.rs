//! Per-run live progress channels.
//!
//! Each run gets its own broadcast channel. Subscribers only see events published
//! after they attach; there is no replay. Publishing a terminal event drops the
//! sender so every stream ends right after yielding it.

use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Mutex, MutexGuard},
    task::{Context, Poll, ready},
};

use tokio::sync::broadcast;
use tokio_stream::{
    Stream,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tracing::{debug, warn};

use crate::core::domain::ProgressEvent;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub struct ProgressEventBus {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl Default for ProgressEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ProgressEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<ProgressEvent>>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens the channel for a run. Reopening an open run keeps existing subscribers.
    pub fn open(&self, run_id: &str) {
        self.channels()
            .entry(run_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
    }

    pub fn is_open(&self, run_id: &str) -> bool {
        self.channels().contains_key(run_id)
    }

    pub fn publish(&self, run_id: &str, event: ProgressEvent) {
        let sender = if event.is_terminal() {
            self.channels().remove(run_id)
        } else {
            self.channels().get(run_id).cloned()
        };
        let Some(sender) = sender else {
            debug!(run_id, event = event.name(), "No open channel; dropping event");
            return;
        };
        // An error only means nobody is listening right now.
        let _ = sender.send(event);
    }

    /// `None` when the run is unknown or its channel already closed.
    pub fn subscribe(&self, run_id: &str) -> Option<RunEventStream> {
        let receiver = self.channels().get(run_id)?.subscribe();
        Some(RunEventStream {
            run_id: run_id.to_string(),
            inner: BroadcastStream::new(receiver),
            finished: false,
        })
    }
}

/// Stream of one run's events, ending after the terminal event.
pub struct RunEventStream {
    run_id: String,
    inner: BroadcastStream<ProgressEvent>,
    finished: bool,
}

impl Stream for RunEventStream {
    type Item = ProgressEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        loop {
            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(event)) => {
                    if event.is_terminal() {
                        this.finished = true;
                    }
                    return Poll::Ready(Some(event));
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(run_id = %this.run_id, skipped, "Progress subscriber lagged; events dropped");
                }
                None => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}
