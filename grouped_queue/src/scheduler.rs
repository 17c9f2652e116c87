use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::{runtime::Handle, sync::broadcast};
use tracing::{debug, trace, warn};

use crate::{
    config::QueueConfig,
    error::{QueueError, TaskError},
    events::QueueEvent,
    lane::LaneStep,
    state::{QueueState, DEFAULT_LANE},
    task::{AddOptions, Task, TaskOutcome},
};

/// A priority queue of named FIFO sub-queues.
///
/// Lanes are scanned highest priority first and the scan restarts from the top
/// after every completed task, so work added to a higher lane always runs next.
/// One task runs at a time. Clones share the same queue.
#[derive(Clone)]
pub struct GroupedQueue {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<QueueState>,
    events: broadcast::Sender<QueueEvent>,
    run_on_add: bool,
}

enum Stop {
    End,
    Error(TaskError),
    Paused,
}

impl GroupedQueue {
    pub fn new<S: AsRef<str>>(lane_names: &[S], run_on_add: bool) -> Self {
        Self::build(lane_names, run_on_add, QueueConfig::default().event_capacity)
    }

    pub fn from_config(config: QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self::build(&config.lanes, config.run_on_add, config.event_capacity))
    }

    fn build<S: AsRef<str>>(lane_names: &[S], run_on_add: bool, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::new(lane_names)),
                events,
                run_on_add,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receives `End`, `Error` and `Paused` for every cycle stopping after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Lane names in priority order.
    pub fn queue_names(&self) -> Vec<String> {
        self.state().names()
    }

    /// Number of tasks waiting in `lane`, `None` for an unknown lane.
    pub fn pending(&self, lane: &str) -> Option<usize> {
        self.state().lane(lane).map(|lane| lane.len())
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    /// Adds an empty lane right before `before`, or last if `before` is `None` or unknown.
    /// Adding a name that already exists does nothing.
    pub fn add_sub_queue(&self, name: &str, before: Option<&str>) {
        if self.state().insert_lane(name, before) {
            debug!(lane = name, before = ?before, "sub-queue added");
        } else {
            trace!(lane = name, "sub-queue already exists");
        }
    }

    pub fn add<T: Task>(&self, lane: &str, task: T, options: AddOptions) -> Result<(), QueueError> {
        let target = self
            .state()
            .lane(lane)
            .cloned()
            .ok_or_else(|| QueueError::UnknownLane(lane.to_string()))?;

        let run = options.run.unwrap_or(self.inner.run_on_add);
        // fail before touching the lane so an error always means "not added"
        if run {
            Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        }

        target.push(Box::new(task), options.once);

        if run {
            self.start()?;
        }
        Ok(())
    }

    pub fn add_default<T: Task>(&self, task: T, options: AddOptions) -> Result<(), QueueError> {
        self.add(DEFAULT_LANE, task, options)
    }

    /// Schedules `run()` on the runtime instead of calling it inline, so that a
    /// burst of `add` calls starts a single cycle.
    pub fn start(&self) -> Result<(), QueueError> {
        let handle = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

        {
            let mut state = self.state();
            if state.trigger_pending {
                return Ok(());
            }
            state.trigger_pending = true;
        }

        let queue = self.clone();
        handle.spawn(async move {
            queue.state().trigger_pending = false;
            if let Err(e) = queue.run() {
                warn!(error = %e, "deferred run failed");
            }
        });
        Ok(())
    }

    /// Starts a run cycle unless one is already active. After a pause or an
    /// error this resumes scanning from the highest-priority lane.
    pub fn run(&self) -> Result<(), QueueError> {
        let handle = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

        {
            let mut state = self.state();
            if state.running {
                trace!("run cycle already active");
                return Ok(());
            }
            state.running = true;
            state.paused = false;
            state.pause_requested = false;
        }

        debug!("run cycle started");
        let queue = self.clone();
        handle.spawn(async move { queue.scan().await });
        Ok(())
    }

    /// Lets the current task finish, then stops the cycle with `Paused`.
    pub fn pause(&self) {
        let mut state = self.state();
        if state.running {
            state.pause_requested = true;
        } else {
            trace!("pause ignored, queue is idle");
        }
    }

    async fn scan(self) {
        let mut cursor = 0;

        loop {
            let lane = {
                let mut state = self.state();

                if state.pause_requested {
                    self.stop(&mut state, Stop::Paused);
                    return;
                }

                match state.lane_at(cursor) {
                    Some(lane) => lane,
                    None if state.has_pending() => {
                        // something landed in a lane the cursor had already passed
                        cursor = 0;
                        continue;
                    }
                    None => {
                        self.stop(&mut state, Stop::End);
                        return;
                    }
                }
            };

            match lane.run_next(&self).await {
                LaneStep::Empty => cursor += 1,
                LaneStep::Ran(TaskOutcome::Completed) => cursor = 0,
                LaneStep::Ran(TaskOutcome::Paused) => {
                    self.state().pause_requested = true;
                }
                LaneStep::Ran(TaskOutcome::Halted(error)) => {
                    let mut state = self.state();
                    self.stop(&mut state, Stop::Error(error));
                    return;
                }
            }
        }
    }

    // state is updated before publishing so listeners may call run() right away
    fn stop(&self, state: &mut QueueState, reason: Stop) {
        state.running = false;
        state.pause_requested = false;

        let event = match reason {
            Stop::End => QueueEvent::End,
            Stop::Paused => {
                state.paused = true;
                QueueEvent::Paused
            }
            Stop::Error(error) => {
                warn!(error = %error, "task halted the queue");
                QueueEvent::Error(error)
            }
        };

        debug!(event = event.name(), "run cycle stopped");
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

impl std::fmt::Debug for GroupedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("GroupedQueue")
            .field("lanes", &state.names())
            .field("running", &state.running)
            .field("paused", &state.paused)
            .field("run_on_add", &self.inner.run_on_add)
            .finish()
    }
}
