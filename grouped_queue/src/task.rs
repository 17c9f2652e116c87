use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::trace;
use uuid::Uuid;

use crate::{error::TaskError, scheduler::GroupedQueue};

/// What a task's future resolves to.
pub type TaskResult = Result<(), TaskError>;

/// A unit of work queued in a lane.
///
/// Closures of the shape `|ctx| async move { ... }` implement this trait, so most
/// callers never implement it by hand.
#[async_trait]
pub trait Task: Send + 'static {
    async fn run(self: Box<Self>, ctx: TaskContext) -> TaskResult;
}

#[async_trait]
impl<F, Fut> Task for F
where
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    async fn run(self: Box<Self>, ctx: TaskContext) -> TaskResult {
        (*self)(ctx).await
    }
}

/// How a task settled.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed,
    Halted(TaskError),
    Paused,
}

/// Options accepted by `GroupedQueue::add`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Dedup key: the task is dropped if one with the same key is already pending in the lane.
    pub once: Option<String>,
    /// Trigger a run cycle after adding. `None` falls back to the queue's `run_on_add`.
    pub run: Option<bool>,
}

impl AddOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn once(mut self, key: impl Into<String>) -> Self {
        self.once = Some(key.into());
        self
    }

    pub fn run(mut self, run: bool) -> Self {
        self.run = Some(run);
        self
    }
}

pub struct TaskEntry {
    pub id: Uuid,
    pub once: Option<String>,
    pub(crate) task: Box<dyn Task>,
}

impl TaskEntry {
    pub fn new(task: Box<dyn Task>, once: Option<String>) -> Self {
        Self { id: Uuid::new_v4(), once, task }
    }
}

impl std::fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEntry")
            .field("id", &self.id)
            .field("once", &self.once)
            .finish_non_exhaustive()
    }
}

// single-shot: the first settle wins, everything after is ignored
pub(crate) struct Settlement {
    tx: Mutex<Option<oneshot::Sender<TaskOutcome>>>,
}

impl Settlement {
    pub(crate) fn new(tx: oneshot::Sender<TaskOutcome>) -> Self {
        Self { tx: Mutex::new(Some(tx)) }
    }

    pub(crate) fn settle(&self, outcome: TaskOutcome) -> bool {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        match tx {
            Some(tx) => {
                // the receiver lives as long as the lane is waiting on the task
                let _ = tx.send(outcome);
                true
            }
            None => {
                trace!(?outcome, "task already settled, ignoring");
                false
            }
        }
    }
}

/// Handles passed to a running task.
///
/// Cloning is cheap. Once every clone is dropped and the task's future has
/// returned `Ok(())`, the task counts as completed even if no handle was called.
/// A clone dropped while its thread is panicking halts the task instead.
#[derive(Clone)]
pub struct TaskContext {
    id: Uuid,
    lane: Arc<str>,
    queue: GroupedQueue,
    settlement: Arc<Settlement>,
}

impl TaskContext {
    pub(crate) fn new(id: Uuid, lane: Arc<str>, queue: GroupedQueue, settlement: Arc<Settlement>) -> Self {
        Self { id, lane, queue, settlement }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn lane(&self) -> &str {
        &self.lane
    }

    /// The queue running this task, for adding work or sub-queues from inside it.
    pub fn queue(&self) -> &GroupedQueue {
        &self.queue
    }

    /// Marks the task as done. Returns `false` if it had already settled.
    pub fn complete(&self) -> bool {
        self.settlement.settle(TaskOutcome::Completed)
    }

    /// Stops the current cycle with `error`.
    pub fn halt(&self, error: impl Into<TaskError>) -> bool {
        self.settlement.settle(TaskOutcome::Halted(error.into()))
    }

    /// Settles the task and pauses the queue before the next task starts.
    pub fn pause(&self) -> bool {
        self.settlement.settle(TaskOutcome::Paused)
    }
}

impl Drop for TaskContext {
    fn drop(&mut self) {
        // a job unwinding with the context in hand must not read as success
        if std::thread::panicking() {
            self.settlement
                .settle(TaskOutcome::Halted(TaskError::msg("task context dropped during panic")));
        }
    }
}
