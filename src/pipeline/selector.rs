//! Policies for picking the next task to run.
//!
//! The runner consults a selector whenever no cached task is available. Returning `None` tells
//! the runner there is no work it wants to schedule, which ends the run.

use atomic_float::AtomicF64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::runner::RunStatus;
use super::tasks::{TaskGraph, TaskId};
use super::RenderContext;

/// Picks runnable tasks for the runner.
pub trait TaskSelector: Send {
    /// Return a task whose status is [`RunStatus::Runnable`], or `None` when there is no work to
    /// schedule right now.
    fn select(
        &mut self,
        graph: &TaskGraph,
        run_statuses: &[RunStatus],
        ctx: &RenderContext,
    ) -> Option<TaskId>;
}

/// Runs tasks in construction order. Since the builder lays tasks out track by track and phrase
/// by phrase, this renders the score front to back.
pub struct FifoSelector;

impl TaskSelector for FifoSelector {
    fn select(
        &mut self,
        _graph: &TaskGraph,
        run_statuses: &[RunStatus],
        _ctx: &RenderContext,
    ) -> Option<TaskId> {
        run_statuses
            .iter()
            .position(|&status| status == RunStatus::Runnable)
    }
}

/// Prefers work for the phrases closest to the playhead, so the part the user is about to hear
/// becomes audible first. The playhead position is shared with the host through an atomic and can
/// move while a render is in flight; each pick sees the latest value.
///
/// Track-level timing adjustments carry no position of their own and gate every pitch task of
/// their track, so they always win over phrase tasks.
pub struct PlayheadProximitySelector {
    playhead_seconds: Arc<AtomicF64>,
}

impl PlayheadProximitySelector {
    pub fn new(playhead_seconds: Arc<AtomicF64>) -> Self {
        PlayheadProximitySelector { playhead_seconds }
    }

    /// The shared playhead position, for the host to update during playback.
    pub fn playhead_handle(&self) -> Arc<AtomicF64> {
        self.playhead_seconds.clone()
    }
}

impl TaskSelector for PlayheadProximitySelector {
    fn select(
        &mut self,
        graph: &TaskGraph,
        run_statuses: &[RunStatus],
        ctx: &RenderContext,
    ) -> Option<TaskId> {
        let playhead = self.playhead_seconds.load(Ordering::Relaxed);

        let mut best: Option<(TaskId, f64)> = None;
        for (task_id, &status) in run_statuses.iter().enumerate() {
            if status != RunStatus::Runnable {
                continue;
            }
            let distance = match graph.task(task_id).kind.phrase_key() {
                Some(phrase_key) => ctx
                    .phrase_start_time(phrase_key)
                    .map(|start_time| (start_time - playhead).abs())
                    .unwrap_or(f64::INFINITY),
                // Track-level tasks gate a whole track's phrases
                None => -1.0,
            };
            // Strictly-less keeps the earliest task on ties
            if best.map_or(true, |(_, best_distance)| distance < best_distance) {
                best = Some((task_id, distance));
            }
        }

        best.map(|(task_id, _)| task_id)
    }
}
