use crate::error::TaskError;

/// Signals published by a `GroupedQueue` when a run cycle stops.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// Every lane was observed empty.
    End,
    /// A task halted the cycle with this error.
    Error(TaskError),
    /// A pause was requested; `run()` resumes from the top lane.
    Paused,
}

impl QueueEvent {
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::End => "end",
            QueueEvent::Error(_) => "error",
            QueueEvent::Paused => "paused",
        }
    }
}
