//! Tracking for spawned per-frame work.
//!
//! Each forwarded frame runs as its own tokio task. The pool hands out
//! ids, collects completion events over an mpsc channel, and on shutdown
//! waits a bounded time for stragglers before aborting them.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TaskError;

pub type TaskId = u64;
pub type TaskEventSender = mpsc::Sender<TaskEvent>;

#[derive(Debug)]
pub enum TaskEvent {
    Finished(TaskId),
    Error(TaskId, TaskError),
}

impl TaskEvent {
    pub fn id(&self) -> TaskId {
        match self {
            TaskEvent::Finished(id) | TaskEvent::Error(id, _) => *id,
        }
    }
}

/// Outcome of [`TaskPool::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: u64,
    pub failed: u64,
    pub abandoned: u64,
}

#[derive(Debug)]
pub struct TaskPool {
    tasks: HashMap<TaskId, JoinHandle<()>>,
    next_id: TaskId,
    pool_rx: mpsc::Receiver<TaskEvent>,
    pool_tx: TaskEventSender,
    completed: u64,
    failed: u64,
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskPool {
    pub fn new() -> Self {
        let (pool_tx, pool_rx) = mpsc::channel(1024);
        Self {
            tasks: HashMap::new(),
            next_id: 0,
            pool_rx,
            pool_tx,
            completed: 0,
            failed: 0,
        }
    }

    /// Spawn `fut` on the runtime and track it until it reports back.
    pub fn spawn<Fut>(&mut self, fut: Fut) -> TaskId
    where
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        let event_tx = self.pool_tx.clone();
        let handle = tokio::spawn(async move {
            let event = match fut.await {
                Ok(()) => TaskEvent::Finished(id),
                Err(e) => TaskEvent::Error(id, e),
            };
            let _ = event_tx.send(event).await;
        });
        self.tasks.insert(id, handle);
        id
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Process every event already queued, without waiting.
    pub fn try_reap(&mut self) -> Vec<TaskEvent> {
        let mut reaped = Vec::new();
        while let Ok(event) = self.pool_rx.try_recv() {
            self.process_event(&event);
            reaped.push(event);
        }
        reaped
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        let event = self.pool_rx.recv().await?;
        self.process_event(&event);
        Some(event)
    }

    fn process_event(&mut self, event: &TaskEvent) {
        self.tasks.remove(&event.id());
        match event {
            TaskEvent::Finished(_) => self.completed += 1,
            TaskEvent::Error(id, e) => {
                self.failed += 1;
                warn!("Task {} failed: {}", id, e);
            }
        }
    }

    /// Wait up to `timeout` for all tracked tasks, then abort the rest.
    pub async fn drain(&mut self, timeout: Duration) -> DrainReport {
        let (completed_before, failed_before) = (self.completed, self.failed);
        let deadline = tokio::time::Instant::now() + timeout;

        while !self.tasks.is_empty() {
            match tokio::time::timeout_at(deadline, self.pool_rx.recv()).await {
                Ok(Some(event)) => self.process_event(&event),
                Ok(None) => break,
                Err(_) => break,
            }
        }

        let abandoned = self.abort_all();
        if abandoned > 0 {
            debug!("Abandoned {} in-flight task(s) after {:?}", abandoned, timeout);
        }
        DrainReport {
            completed: self.completed - completed_before,
            failed: self.failed - failed_before,
            abandoned,
        }
    }

    /// Abort every tracked task. Returns how many were still tracked.
    pub fn abort_all(&mut self) -> u64 {
        let count = self.tasks.len() as u64;
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
        count
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.abort_all();
    }
}
