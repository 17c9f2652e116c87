use std::sync::Arc;

use crate::lane::Lane;

pub const DEFAULT_LANE: &str = "default";

/// Lane map plus run flags, guarded as one unit by the queue's mutex.
///
/// `lanes` is kept in priority order, highest first.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    lanes: Vec<Arc<Lane>>,
    pub running: bool,
    pub paused: bool,
    pub pause_requested: bool,
    pub trigger_pending: bool,
}

impl QueueState {
    pub fn new<S: AsRef<str>>(lane_names: &[S]) -> Self {
        let mut state = Self::default();
        for name in lane_names {
            state.insert_lane(name.as_ref(), None);
        }
        if state.lane(DEFAULT_LANE).is_none() {
            state.insert_lane(DEFAULT_LANE, None);
        }
        state
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.lanes.iter().position(|lane| lane.name() == name)
    }

    pub fn lane(&self, name: &str) -> Option<&Arc<Lane>> {
        self.position(name).map(|idx| &self.lanes[idx])
    }

    pub fn lane_at(&self, idx: usize) -> Option<Arc<Lane>> {
        self.lanes.get(idx).cloned()
    }

    /// Inserts an empty lane before `before` if that lane exists, at the end
    /// otherwise. Returns `false` when `name` is already taken.
    pub fn insert_lane(&mut self, name: &str, before: Option<&str>) -> bool {
        if self.position(name).is_some() {
            return false;
        }

        let lane = Arc::new(Lane::new(name));
        match before.and_then(|b| self.position(b)) {
            Some(idx) => self.lanes.insert(idx, lane),
            None => self.lanes.push(lane),
        }
        true
    }

    pub fn names(&self) -> Vec<String> {
        self.lanes.iter().map(|lane| lane.name().to_string()).collect()
    }

    pub fn has_pending(&self) -> bool {
        self.lanes.iter().any(|lane| !lane.is_empty())
    }
}
