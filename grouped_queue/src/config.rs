use serde::{Deserialize, Serialize};

use crate::error::QueueError;

pub const LANES_VAR: &str = "GROUPED_QUEUE_LANES";
pub const RUN_ON_ADD_VAR: &str = "GROUPED_QUEUE_RUN_ON_ADD";
pub const EVENT_CAPACITY_VAR: &str = "GROUPED_QUEUE_EVENT_CAPACITY";

/// Construction settings for a `GroupedQueue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Sub-queue names, highest priority first. `default` is appended unless listed.
    pub lanes: Vec<String>,
    /// Whether `add` triggers a run cycle when its options don't say otherwise.
    pub run_on_add: bool,
    /// Buffer size of the event channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lanes: Vec::new(),
            run_on_add: true,
            event_capacity: 64,
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lanes<I, S>(mut self, lanes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lanes = lanes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_run_on_add(mut self, run_on_add: bool) -> Self {
        self.run_on_add = run_on_add;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Reads the `GROUPED_QUEUE_*` variables, loading a `.env` file first if present.
    pub fn from_env() -> Result<Self, QueueError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, QueueError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(lanes) = lookup(LANES_VAR) {
            config.lanes = lanes
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(raw) = lookup(RUN_ON_ADD_VAR) {
            config.run_on_add = raw.trim().parse().map_err(|_| {
                QueueError::Config(format!("{} must be true or false, got {:?}", RUN_ON_ADD_VAR, raw))
            })?;
        }

        if let Some(raw) = lookup(EVENT_CAPACITY_VAR) {
            config.event_capacity = raw.trim().parse().map_err(|_| {
                QueueError::Config(format!("{} must be a positive integer, got {:?}", EVENT_CAPACITY_VAR, raw))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, QueueError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.event_capacity == 0 {
            return Err(QueueError::Config("event capacity must be greater than zero".to_string()));
        }
        if self.lanes.iter().any(|name| name.trim().is_empty()) {
            return Err(QueueError::Config("sub-queue names must not be empty".to_string()));
        }
        Ok(())
    }
}
