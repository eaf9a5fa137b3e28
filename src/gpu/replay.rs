//! Recorded frames in flight between the main and render worlds.
//!
//! The main world swaps its double buffers as it records, so every recorded
//! frame has to execute exactly once and in order. Frames stay queued here
//! until the render world reports them executed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bevy::prelude::Resource;

/// Frames not yet executed, oldest first. Ids start at 1, so an executed
/// count of 0 means nothing has run.
#[derive(Debug, Clone)]
pub struct FrameBacklog<T> {
    frames: VecDeque<(u64, T)>,
    next: u64,
}

impl<T> Default for FrameBacklog<T> {
    fn default() -> Self {
        Self {
            frames: VecDeque::new(),
            next: 1,
        }
    }
}

impl<T> FrameBacklog<T> {
    pub fn push(&mut self, frame: T) -> u64 {
        let id = self.next;
        self.next += 1;
        self.frames.push_back((id, frame));
        id
    }

    /// Drops every frame up to and including `through`.
    pub fn acknowledge(&mut self, through: u64) {
        while self.frames.front().is_some_and(|(id, _)| *id <= through) {
            self.frames.pop_front();
        }
    }

    /// Frames newer than `executed`, oldest first.
    pub fn pending(&self, executed: u64) -> impl Iterator<Item = (u64, &T)> {
        self.frames
            .iter()
            .filter(move |(id, _)| *id > executed)
            .map(|(id, frame)| (*id, frame))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Render-world progress, readable from the main world. Both worlds hold a
/// clone of the same counters.
#[derive(Resource, Clone, Debug, Default)]
pub struct ReplayProgress {
    executed: Arc<AtomicU64>,
    ready: Arc<AtomicBool>,
}

impl ReplayProgress {
    /// Id of the newest frame whose passes were encoded.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Acquire)
    }

    pub fn mark_executed(&self, through: u64) {
        self.executed.fetch_max(through, Ordering::AcqRel);
    }

    /// Every queued pipeline has compiled.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_wait_until_acknowledged() {
        let mut backlog = FrameBacklog::default();
        let first = backlog.push("seed");
        let second = backlog.push("step");
        assert_eq!((first, second), (1, 2));

        // nothing executed yet, both stay queued across any number of checks
        for _ in 0..3 {
            let pending: Vec<_> = backlog.pending(0).map(|(_, f)| *f).collect();
            assert_eq!(pending, ["seed", "step"]);
        }

        backlog.acknowledge(first);
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog.pending(0).next(), Some((2, &"step")));
    }

    #[test]
    fn executed_frames_are_skipped_before_they_are_pruned() {
        let mut backlog = FrameBacklog::default();
        for frame in 0..4 {
            backlog.push(frame);
        }
        let ids: Vec<_> = backlog.pending(2).map(|(id, _)| id).collect();
        assert_eq!(ids, [3, 4]);

        backlog.acknowledge(4);
        assert!(backlog.is_empty());
        assert_eq!(backlog.push(9), 5);
    }

    #[test]
    fn progress_is_shared_and_never_goes_back() {
        let main = ReplayProgress::default();
        let render = main.clone();
        assert!(!main.ready());

        render.mark_executed(3);
        render.mark_executed(2);
        render.set_ready(true);
        assert_eq!(main.executed(), 3);
        assert!(main.ready());
    }
}
