use std::{any::Any, error::Error, fmt::{self, Display}, sync::Arc};
use thiserror::Error;

/// Errors raised by the queue itself, as opposed to errors produced by tasks.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Unknown sub-queue: {0}")]
    UnknownLane(String),

    #[error("No tokio runtime available to run the queue")]
    NoRuntime,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

/// The value a task halts the queue with.
///
/// Wraps the original error in an `Arc` so the same allocation can be handed to
/// every subscriber of the `Error` event. Anything implementing
/// `std::error::Error` converts into it, which lets tasks use `?` directly.
#[derive(Clone)]
pub struct TaskError {
    inner: Arc<dyn Error + Send + Sync + 'static>,
}

impl TaskError {
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self { inner: Arc::new(error) }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::msg(format!("task panicked: {}", detail))
    }

    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// True when both values wrap the very same error allocation.
    pub fn same_as(&self, other: &TaskError) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.inner) as *const (),
            Arc::as_ptr(&other.inner) as *const (),
        )
    }

    pub fn as_error(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

impl<E> From<E> for TaskError
where
    E: Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskError").field(&self.inner).finish()
    }
}
