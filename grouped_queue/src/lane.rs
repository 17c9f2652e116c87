use std::{
    collections::VecDeque,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures_lite::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::{
    error::TaskError,
    scheduler::GroupedQueue,
    task::{Settlement, Task, TaskContext, TaskEntry, TaskOutcome},
};

/// Result of asking a lane to run its next task.
#[derive(Debug)]
pub enum LaneStep {
    Empty,
    Ran(TaskOutcome),
}

/// A named FIFO sub-queue.
pub struct Lane {
    name: Arc<str>,
    entries: Mutex<VecDeque<TaskEntry>>,
}

impl Lane {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into(), entries: Mutex::new(VecDeque::new()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<TaskEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a task. With a `once` key already pending in this lane the task is
    /// dropped and `false` is returned.
    pub fn push(&self, task: Box<dyn Task>, once: Option<String>) -> bool {
        let mut entries = self.entries();

        if let Some(key) = once.as_deref() {
            if entries.iter().any(|e| e.once.as_deref() == Some(key)) {
                debug!(lane = %self.name, once = key, "task already planned, skipping");
                return false;
            }
        }

        let entry = TaskEntry::new(task, once);
        trace!(lane = %self.name, task_id = %entry.id, queued = entries.len(), "enqueue");
        entries.push_back(entry);
        true
    }

    pub fn take_next(&self) -> Option<TaskEntry> {
        self.entries().pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Runs the oldest task, or yields once to the runtime and reports `Empty`.
    pub async fn run_next(&self, queue: &GroupedQueue) -> LaneStep {
        let Some(entry) = self.take_next() else {
            tokio::task::yield_now().await;
            return LaneStep::Empty;
        };

        LaneStep::Ran(execute(entry, Arc::clone(&self.name), queue.clone()).await)
    }
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lane")
            .field("name", &self.name)
            .field("pending", &self.len())
            .finish()
    }
}

async fn execute(entry: TaskEntry, lane: Arc<str>, queue: GroupedQueue) -> TaskOutcome {
    let TaskEntry { id, task, .. } = entry;
    debug!(lane = %lane, task_id = %id, "running task");

    let (tx, rx) = oneshot::channel();
    let settlement = Arc::new(Settlement::new(tx));
    let ctx = TaskContext::new(id, Arc::clone(&lane), queue, Arc::clone(&settlement));

    // building the future runs user code too, so it sits inside the catch
    let result = AssertUnwindSafe(async move { task.run(ctx).await })
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            settlement.settle(TaskOutcome::Halted(error));
        }
        Err(panic) => {
            settlement.settle(TaskOutcome::Halted(TaskError::from_panic(panic)));
        }
    }
    drop(settlement);

    // a closed channel means every context was dropped without settling
    let outcome = rx.await.unwrap_or(TaskOutcome::Completed);
    debug!(lane = %lane, task_id = %id, ?outcome, "task settled");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop() -> Box<dyn Task> {
        Box::new(|_ctx: TaskContext| async move { TaskResult::Ok(()) })
    }

    fn explode() -> TaskResult {
        panic!("thrown")
    }

    #[test]
    fn push_and_take_fifo() {
        let lane = Lane::new("before");
        assert!(lane.is_empty());

        assert!(lane.push(noop(), None));
        assert!(lane.push(noop(), Some("b".into())));
        assert_eq!(lane.len(), 2);

        let first = lane.take_next().expect("first entry");
        assert_eq!(first.once, None);
        let second = lane.take_next().expect("second entry");
        assert_eq!(second.once.as_deref(), Some("b"));
        assert!(lane.take_next().is_none());
    }

    #[test]
    fn once_key_only_pending_once() {
        let lane = Lane::new("default");
        assert!(lane.push(noop(), Some("done".into())));
        assert!(!lane.push(noop(), Some("done".into())));
        assert!(lane.push(noop(), Some("other".into())));
        assert_eq!(lane.len(), 2);

        // once the keyed entry leaves the lane the key is free again
        lane.take_next();
        assert!(lane.push(noop(), Some("done".into())));
        assert_eq!(lane.len(), 2);
    }

    #[tokio::test]
    async fn run_next_on_empty_lane() {
        let queue = GroupedQueue::new::<&str>(&[], false);
        let lane = Lane::new("empty");
        assert!(matches!(lane.run_next(&queue).await, LaneStep::Empty));
    }

    #[tokio::test]
    async fn run_next_reports_outcomes() {
        let queue = GroupedQueue::new::<&str>(&[], false);
        let lane = Lane::new("work");
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        lane.push(
            Box::new(move |ctx: TaskContext| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(ctx.lane(), "work");
                ctx.complete();
                TaskResult::Ok(())
            }),
            None,
        );
        lane.push(Box::new(|ctx: TaskContext| async move {
            ctx.halt(TaskError::msg("stop"));
            TaskResult::Ok(())
        }), None);
        lane.push(Box::new(|_ctx: TaskContext| async move {
            TaskResult::Err(TaskError::msg("returned"))
        }), None);
        lane.push(Box::new(|_ctx: TaskContext| async move { explode() }), None);
        lane.push(Box::new(|ctx: TaskContext| async move {
            ctx.pause();
            TaskResult::Ok(())
        }), None);

        assert!(matches!(lane.run_next(&queue).await, LaneStep::Ran(TaskOutcome::Completed)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        match lane.run_next(&queue).await {
            LaneStep::Ran(TaskOutcome::Halted(err)) => assert_eq!(err.to_string(), "stop"),
            other => panic!("unexpected step: {:?}", other),
        }
        match lane.run_next(&queue).await {
            LaneStep::Ran(TaskOutcome::Halted(err)) => assert_eq!(err.to_string(), "returned"),
            other => panic!("unexpected step: {:?}", other),
        }
        match lane.run_next(&queue).await {
            LaneStep::Ran(TaskOutcome::Halted(err)) => {
                assert_eq!(err.to_string(), "task panicked: thrown")
            }
            other => panic!("unexpected step: {:?}", other),
        }
        assert!(matches!(lane.run_next(&queue).await, LaneStep::Ran(TaskOutcome::Paused)));
        assert!(lane.is_empty());
    }

    #[tokio::test]
    async fn first_settlement_wins() {
        let queue = GroupedQueue::new::<&str>(&[], false);
        let lane = Lane::new("work");
        lane.push(Box::new(|ctx: TaskContext| async move {
            assert!(ctx.complete());
            assert!(!ctx.halt(TaskError::msg("too late")));
            TaskResult::Err(TaskError::msg("also too late"))
        }), None);

        assert!(matches!(lane.run_next(&queue).await, LaneStep::Ran(TaskOutcome::Completed)));
    }

    #[tokio::test]
    async fn completion_can_come_from_a_spawned_job() {
        let queue = GroupedQueue::new::<&str>(&[], false);
        let lane = Lane::new("work");
        let (go_tx, go_rx) = oneshot::channel::<()>();

        lane.push(Box::new(move |ctx: TaskContext| async move {
            tokio::spawn(async move {
                let _ = go_rx.await;
                ctx.complete();
            });
            TaskResult::Ok(())
        }), None);

        let step = tokio::spawn(async move { lane.run_next(&queue).await });
        tokio::task::yield_now().await;
        assert!(!step.is_finished());

        go_tx.send(()).expect("job is waiting");
        let step = step.await.expect("lane task joins");
        assert!(matches!(step, LaneStep::Ran(TaskOutcome::Completed)));
    }

    #[tokio::test]
    async fn spawned_job_panicking_with_the_context_halts() {
        let queue = GroupedQueue::new::<&str>(&[], false);
        let lane = Lane::new("work");

        lane.push(Box::new(|ctx: TaskContext| async move {
            tokio::spawn(async move {
                let _held = ctx;
                panic!("job failed before settling");
            });
            TaskResult::Ok(())
        }), None);

        match lane.run_next(&queue).await {
            LaneStep::Ran(TaskOutcome::Halted(err)) => {
                assert_eq!(err.to_string(), "task context dropped during panic")
            }
            other => panic!("unexpected step: {:?}", other),
        }
    }

    #[tokio::test]
    async fn each_run_gets_its_own_id() {
        let queue = GroupedQueue::new::<&str>(&[], false);
        let lane = Lane::new("work");
        let ids = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let ids = Arc::clone(&ids);
            lane.push(Box::new(move |ctx: TaskContext| async move {
                ids.lock().unwrap().push(ctx.id());
                TaskResult::Ok(())
            }), None);
        }
        lane.run_next(&queue).await;
        lane.run_next(&queue).await;

        let ids = ids.lock().unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert!(!ids[0].is_nil());
    }
}
