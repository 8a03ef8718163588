//! Progress channels for long-running background tasks.
//!
//! Each task gets a `watch` channel: producers overwrite the latest event and
//! never wait for a consumer. At most one consumer is attached to a channel at
//! a time. A terminal event deregisters the channel and closes it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

pub type TaskId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: TaskStatus,
    pub percent_complete: u8,
    pub message: String,
}

impl ProgressEvent {
    pub fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            percent_complete: 0,
            message: "Waiting to start".to_string(),
        }
    }

    pub fn running(percent_complete: u8, message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Running,
            percent_complete: percent_complete.min(100),
            message: message.into(),
        }
    }

    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Completed,
            percent_complete: 100,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            percent_complete: 100,
            message: message.into(),
        }
    }

    pub fn cancelled(percent_complete: u8, message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Cancelled,
            percent_complete,
            message: message.into(),
        }
    }
}

struct Channel {
    rx: watch::Receiver<ProgressEvent>,
    attached: Arc<AtomicBool>,
}

/// Concurrent map from task id to its progress channel.
#[derive(Clone, Default)]
pub struct ProgressRegistry {
    channels: Arc<Mutex<HashMap<TaskId, Channel>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<TaskId, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a channel for a new task, starting in `Pending`.
    pub fn register(&self) -> ProgressReporter {
        let id = Uuid::new_v4();
        let (tx, rx) = watch::channel(ProgressEvent::pending());
        self.channels().insert(
            id,
            Channel {
                rx,
                attached: Arc::new(AtomicBool::new(false)),
            },
        );
        debug!(task_id = %id, "Registered progress channel");

        ProgressReporter {
            id,
            tx: Some(tx),
            registry: self.clone(),
        }
    }

    /// Attach the single consumer of a task's progress. Returns `None` if the
    /// task is unknown, finished, or already has a consumer.
    pub fn subscribe(&self, id: TaskId) -> Option<ProgressSubscription> {
        let channels = self.channels();
        let channel = channels.get(&id)?;
        if channel.attached.swap(true, Ordering::AcqRel) {
            return None;
        }

        let mut rx = channel.rx.clone();
        let current = rx.borrow_and_update().clone();
        Some(ProgressSubscription {
            rx,
            attached: channel.attached.clone(),
            pending: Some(current),
            finished: false,
        })
    }

    /// Latest event for polling consumers; `None` once the task has finished.
    pub fn latest(&self, id: TaskId) -> Option<ProgressEvent> {
        self.channels().get(&id).map(|c| c.rx.borrow().clone())
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.channels().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.channels().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels().is_empty()
    }

    fn deregister(&self, id: TaskId) {
        if self.channels().remove(&id).is_some() {
            debug!(task_id = %id, "Deregistered progress channel");
        }
    }
}

/// Producer side of a task's progress channel.
pub struct ProgressReporter {
    id: TaskId,
    tx: Option<watch::Sender<ProgressEvent>>,
    registry: ProgressRegistry,
}

impl ProgressReporter {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Publish an event. Never blocks; a terminal event closes the channel and
    /// later reports are ignored.
    pub fn report(&mut self, event: ProgressEvent) {
        let Some(tx) = &self.tx else { return };
        let terminal = event.status.is_terminal();
        tx.send_replace(event);

        if terminal {
            self.registry.deregister(self.id);
            self.tx = None;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.report(ProgressEvent::failed("Task ended without reporting a result"));
        }
    }
}

/// The attached consumer of a task's progress.
pub struct ProgressSubscription {
    rx: watch::Receiver<ProgressEvent>,
    attached: Arc<AtomicBool>,
    pending: Option<ProgressEvent>,
    finished: bool,
}

impl ProgressSubscription {
    /// Next event, starting with the one current at subscription time.
    /// Intermediate events may be skipped; the terminal one is always delivered.
    /// Returns `None` after the terminal event.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }

        let event = match self.pending.take() {
            Some(event) => event,
            None => {
                if self.rx.changed().await.is_err() {
                    self.finished = true;
                    return None;
                }
                self.rx.borrow_and_update().clone()
            }
        };

        if event.status.is_terminal() {
            self.finished = true;
        }
        Some(event)
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> {
        stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.attached.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_register_and_poll() {
        let registry = ProgressRegistry::new();
        let mut reporter = registry.register();
        let id = reporter.id();

        assert_eq!(registry.latest(id).unwrap().status, TaskStatus::Pending);
        reporter.report(ProgressEvent::running(40, "working"));
        reporter.report(ProgressEvent::running(60, "working"));
        assert_eq!(registry.latest(id).unwrap().percent_complete, 60);

        reporter.report(ProgressEvent::completed("done"));
        assert!(reporter.is_closed());
        assert!(registry.latest(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_single_consumer() {
        let registry = ProgressRegistry::new();
        let reporter = registry.register();
        let id = reporter.id();

        let first = registry.subscribe(id);
        assert!(first.is_some());
        assert!(registry.subscribe(id).is_none());

        drop(first);
        assert!(registry.subscribe(id).is_some());
    }

    #[test]
    fn test_dropped_reporter_fails_and_deregisters() {
        let registry = ProgressRegistry::new();
        let reporter = registry.register();
        let id = reporter.id();
        drop(reporter);
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn test_subscription_sees_terminal_event() {
        let registry = ProgressRegistry::new();
        let mut reporter = registry.register();
        let sub = registry.subscribe(reporter.id()).unwrap();

        reporter.report(ProgressEvent::running(10, "a"));
        reporter.report(ProgressEvent::running(90, "b"));
        reporter.report(ProgressEvent::cancelled(90, "stopped"));

        let events: Vec<ProgressEvent> = sub.into_stream().collect().await;
        // Latest-value channel: the pending snapshot, then the terminal event
        assert_eq!(events.first().unwrap().status, TaskStatus::Pending);
        assert_eq!(events.last().unwrap().status, TaskStatus::Cancelled);
    }
}
