// a cooperative priority queue: named FIFO sub-queues drained highest priority first, one task at a time
pub mod config;
pub mod error;
pub mod events;
pub mod lane;
pub mod scheduler;
mod state;
pub mod task;

pub use config::QueueConfig;
pub use error::{QueueError, TaskError};
pub use events::QueueEvent;
pub use scheduler::GroupedQueue;
pub use state::DEFAULT_LANE;
pub use task::{AddOptions, Task, TaskContext, TaskOutcome, TaskResult};
