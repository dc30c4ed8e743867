//! The cache-aware DAG runner.
//!
//! The runner drives a [`TaskGraph`] to completion one task at a time. Tasks whose artifacts are
//! already cached are preferred (they are cheap and unblock downstream work); everything else is
//! picked by an injected [`TaskSelector`] so hosts can rank work however they like, e.g. by
//! playhead proximity. A failed task never stalls its siblings: its descendants are skipped
//! according to their skip policy and the rest of the graph keeps going.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::selector::TaskSelector;
use super::tasks::{SkipPolicy, Task, TaskGraph, TaskId, TaskOutput};
use super::RenderContext;

/// Where a task currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    AwaitingDependencies,
    Runnable,
    Running,
    Success,
    Failed,
    Skipped,
}

impl RunStatus {
    /// Whether the task has reached a terminal state.
    pub fn is_settled(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed | RunStatus::Skipped)
    }

    fn is_failed_or_skipped(self) -> bool {
        matches!(self, RunStatus::Failed | RunStatus::Skipped)
    }
}

/// Whether a task's output was found in cache. Checked once, when the task becomes runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Unchecked,
    Cached,
    NotCached,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No work was left: every task settled or the selector had nothing more to offer.
    Completed,
    /// An interruption request was observed between tasks.
    Interrupted,
}

/// Executes a single task's stage logic. This is the seam between the runner and the engine-bound
/// stage implementations, and what tests replace with scripted outcomes.
pub trait StageExecutor {
    /// Whether the task's output can be served from cache. Only called for cacheable task kinds,
    /// and only once the task's dependencies have settled (so its content key is computable).
    fn is_cached(&self, task_id: TaskId, task: &Task, ctx: &RenderContext) -> bool;

    /// Run the task to completion. Cache probing and population happen inside.
    fn execute(&self, task_id: TaskId, task: &Task, ctx: &RenderContext)
        -> anyhow::Result<TaskOutput>;
}

/// Observes task lifecycle transitions. The renderer facade adapts these into the public event
/// stream.
pub trait RunObserver {
    fn task_started(&mut self, _task_id: TaskId, _task: &Task, _is_cached: bool) {}

    fn task_finished(
        &mut self,
        _task_id: TaskId,
        _task: &Task,
        _is_cached: bool,
        _result: &Result<TaskOutput, Arc<anyhow::Error>>,
    ) {
    }

    fn run_finished(&mut self, _outcome: RunOutcome) {}
}

/// An observer for runs nothing needs to watch.
impl RunObserver for () {}

pub struct DagRunner<'graph> {
    graph: &'graph TaskGraph,
    run_statuses: Vec<RunStatus>,
    cache_statuses: Vec<CacheStatus>,
    /// Runnable tasks whose cache status hasn't been probed yet, oldest first.
    pending_cache_checks: VecDeque<TaskId>,
    /// Runnable tasks known to be cached, most recently discovered on top.
    cached_runnable: Vec<TaskId>,
    prioritize_cached_tasks: bool,
}

impl<'graph> DagRunner<'graph> {
    pub fn new(graph: &'graph TaskGraph, prioritize_cached_tasks: bool) -> Self {
        let mut run_statuses = vec![RunStatus::AwaitingDependencies; graph.len()];
        let mut pending_cache_checks = VecDeque::new();
        for root in graph.roots() {
            run_statuses[root] = RunStatus::Runnable;
            pending_cache_checks.push_back(root);
        }

        DagRunner {
            graph,
            run_statuses,
            cache_statuses: vec![CacheStatus::Unchecked; graph.len()],
            pending_cache_checks,
            cached_runnable: Vec::new(),
            prioritize_cached_tasks,
        }
    }

    pub fn run_statuses(&self) -> &[RunStatus] {
        &self.run_statuses
    }

    /// Drive the graph until it completes or an interruption request is observed. The
    /// interruption flag is checked between tasks only; a task that is already executing always
    /// runs to completion first.
    pub fn run(
        &mut self,
        ctx: &RenderContext,
        executor: &dyn StageExecutor,
        selector: &mut dyn TaskSelector,
        observer: &mut dyn RunObserver,
        interruption_requested: &AtomicBool,
    ) -> RunOutcome {
        let outcome = loop {
            if interruption_requested.load(Ordering::Relaxed) {
                log::info!("rendering interrupted");
                break RunOutcome::Interrupted;
            }

            while let Some(task_id) = self.pending_cache_checks.pop_front() {
                let task = self.graph.task(task_id);
                self.cache_statuses[task_id] = if task.kind.is_cacheable()
                    && executor.is_cached(task_id, task, ctx)
                {
                    self.cached_runnable.push(task_id);
                    CacheStatus::Cached
                } else {
                    CacheStatus::NotCached
                };
            }

            let next = if self.prioritize_cached_tasks {
                self.cached_runnable.pop()
            } else {
                None
            };
            let next =
                next.or_else(|| selector.select(self.graph, &self.run_statuses, ctx));
            let Some(task_id) = next else {
                break RunOutcome::Completed;
            };
            assert!(
                self.run_statuses[task_id] == RunStatus::Runnable,
                "the selector returned task {task_id}, which is not runnable"
            );

            let task = self.graph.task(task_id);
            let is_cached = self.cache_statuses[task_id] == CacheStatus::Cached;
            self.run_statuses[task_id] = RunStatus::Running;
            log::debug!("task {task_id} started (cached: {is_cached}): {:?}", task.kind);
            observer.task_started(task_id, task, is_cached);

            let result = executor.execute(task_id, task, ctx).map_err(Arc::new);
            match &result {
                Ok(_) => {
                    self.run_statuses[task_id] = RunStatus::Success;
                    log::debug!("task {task_id} finished");
                }
                Err(error) => {
                    self.run_statuses[task_id] = RunStatus::Failed;
                    log::warn!("task {task_id} failed: {error:#}");
                }
            }
            observer.task_finished(task_id, task, is_cached, &result);

            match result {
                Ok(_) => self.propagate_success(task_id),
                Err(_) => self.propagate_failure(task_id),
            }
        };

        // Whatever couldn't run (or wasn't picked) counts as skipped
        for status in &mut self.run_statuses {
            if matches!(
                status,
                RunStatus::AwaitingDependencies | RunStatus::Runnable
            ) {
                *status = RunStatus::Skipped;
            }
        }
        observer.run_finished(outcome);
        outcome
    }

    /// A task succeeded: every waiting child whose parents have all settled becomes runnable.
    fn propagate_success(&mut self, task_id: TaskId) {
        for &child in self.graph.children(task_id) {
            if self.run_statuses[child] != RunStatus::AwaitingDependencies {
                continue;
            }
            if self
                .graph
                .parents(child)
                .iter()
                .all(|&parent| self.run_statuses[parent].is_settled())
            {
                self.run_statuses[child] = RunStatus::Runnable;
                self.pending_cache_checks.push_back(child);
            }
        }
    }

    /// A task failed or was skipped: walk its descendants, skipping each one whose skip policy
    /// triggers. A child that survives its policy with all parents settled becomes runnable
    /// instead.
    fn propagate_failure(&mut self, task_id: TaskId) {
        let mut stack = vec![task_id];
        while let Some(current) = stack.pop() {
            for &child in self.graph.children(current) {
                if self.run_statuses[child] != RunStatus::AwaitingDependencies {
                    continue;
                }
                let parents = self.graph.parents(child);
                let skip = match self.graph.task(child).kind.skip_policy() {
                    SkipPolicy::AnyDependencyFailedOrSkipped => parents
                        .iter()
                        .any(|&parent| self.run_statuses[parent].is_failed_or_skipped()),
                    SkipPolicy::AllDependenciesFailedOrSkipped => parents
                        .iter()
                        .all(|&parent| self.run_statuses[parent].is_failed_or_skipped()),
                };

                if skip {
                    self.run_statuses[child] = RunStatus::Skipped;
                    stack.push(child);
                } else if parents
                    .iter()
                    .all(|&parent| self.run_statuses[parent].is_settled())
                {
                    self.run_statuses[child] = RunStatus::Runnable;
                    self.pending_cache_checks.push_back(child);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{PhraseKey, PhraseKeySource};
    use crate::pipeline::selector::FifoSelector;
    use crate::renderer::{RenderCaches, RenderConfig};
    use crate::score::{Snapshot, Tempo, TempoMap, TrackId};
    use parking_lot::Mutex;
    use std::collections::HashSet;

    fn phrase_key(tag: i64) -> PhraseKey {
        PhraseKeySource {
            first_rest_duration: tag,
            notes: &[],
            start_time: 0.0,
            track_id: &TrackId::from("track-1"),
        }
        .hash()
    }

    fn query_task(tag: i64, dependencies: Vec<TaskId>) -> Task {
        Task {
            kind: super::super::tasks::TaskKind::QueryGeneration {
                phrase_key: phrase_key(tag),
            },
            dependencies,
        }
    }

    fn adjustment_task(dependencies: Vec<TaskId>) -> Task {
        Task {
            kind: super::super::tasks::TaskKind::PhonemeTimingAdjustment {
                track_id: TrackId::from("track-1"),
                phrase_keys: Vec::new(),
            },
            dependencies,
        }
    }

    fn empty_snapshot() -> Snapshot {
        Snapshot {
            tempo_map: TempoMap::new(
                480,
                vec![Tempo {
                    position: 0,
                    bpm: 120.0,
                }],
            )
            .unwrap(),
            tracks: Vec::new(),
            engine_frame_rates: Default::default(),
            editor_frame_rate: 93.75,
        }
    }

    /// Succeeds or fails tasks by id, optionally reporting some as cached, and records the
    /// execution order.
    struct ScriptedExecutor {
        failing: HashSet<TaskId>,
        cached: HashSet<TaskId>,
        executed: Mutex<Vec<TaskId>>,
        /// Raised after each listed task finishes, to test interruption.
        interrupt_after: Option<(TaskId, Arc<AtomicBool>)>,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            ScriptedExecutor {
                failing: HashSet::new(),
                cached: HashSet::new(),
                executed: Mutex::new(Vec::new()),
                interrupt_after: None,
            }
        }
    }

    impl StageExecutor for ScriptedExecutor {
        fn is_cached(&self, task_id: TaskId, _task: &Task, _ctx: &RenderContext) -> bool {
            self.cached.contains(&task_id)
        }

        fn execute(
            &self,
            task_id: TaskId,
            _task: &Task,
            _ctx: &RenderContext,
        ) -> anyhow::Result<TaskOutput> {
            self.executed.lock().push(task_id);
            if let Some((after, flag)) = &self.interrupt_after {
                if *after == task_id {
                    flag.store(true, Ordering::Relaxed);
                }
            }
            if self.failing.contains(&task_id) {
                anyhow::bail!("scripted failure");
            }
            Ok(TaskOutput::TimingAdjustment {
                track_id: TrackId::from("track-1"),
            })
        }
    }

    fn run_graph(
        graph: &TaskGraph,
        executor: &ScriptedExecutor,
        prioritize_cached: bool,
    ) -> (RunOutcome, Vec<RunStatus>, Vec<TaskId>) {
        let snapshot = empty_snapshot();
        let config = RenderConfig::default();
        let caches = RenderCaches::default();
        let ctx = RenderContext {
            snapshot: &snapshot,
            config: &config,
            caches: &caches,
            phrases: Mutex::new(Default::default()),
        };

        let mut runner = DagRunner::new(graph, prioritize_cached);
        let outcome = runner.run(
            &ctx,
            executor,
            &mut FifoSelector,
            &mut (),
            &AtomicBool::new(false),
        );
        (
            outcome,
            runner.run_statuses().to_vec(),
            executor.executed.lock().clone(),
        )
    }

    #[test]
    fn test_chain_runs_in_dependency_order() {
        let graph = TaskGraph::new(vec![
            query_task(0, vec![]),
            query_task(1, vec![0]),
            query_task(2, vec![1]),
        ])
        .unwrap();
        let (outcome, statuses, executed) = run_graph(&graph, &ScriptedExecutor::new(), true);

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(executed, vec![0, 1, 2]);
        assert!(statuses.iter().all(|&status| status == RunStatus::Success));
    }

    #[test]
    fn test_failure_skips_descendants() {
        let mut executor = ScriptedExecutor::new();
        executor.failing.insert(0);
        let graph = TaskGraph::new(vec![
            query_task(0, vec![]),
            query_task(1, vec![0]),
            query_task(2, vec![1]),
            query_task(3, vec![]),
        ])
        .unwrap();
        let (outcome, statuses, executed) = run_graph(&graph, &executor, true);

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(executed, vec![0, 3]);
        assert_eq!(statuses[0], RunStatus::Failed);
        assert_eq!(statuses[1], RunStatus::Skipped);
        assert_eq!(statuses[2], RunStatus::Skipped);
        assert_eq!(statuses[3], RunStatus::Success);
    }

    #[test]
    fn test_all_policy_runs_on_partial_failure() {
        let mut executor = ScriptedExecutor::new();
        executor.failing.insert(0);
        let graph = TaskGraph::new(vec![
            query_task(0, vec![]),
            query_task(1, vec![]),
            adjustment_task(vec![0, 1]),
        ])
        .unwrap();
        let (_, statuses, executed) = run_graph(&graph, &executor, true);

        assert!(executed.contains(&2));
        assert_eq!(statuses[2], RunStatus::Success);
    }

    #[test]
    fn test_all_policy_skipped_when_every_dependency_fails() {
        let mut executor = ScriptedExecutor::new();
        executor.failing.insert(0);
        executor.failing.insert(1);
        let graph = TaskGraph::new(vec![
            query_task(0, vec![]),
            query_task(1, vec![]),
            adjustment_task(vec![0, 1]),
        ])
        .unwrap();
        let (_, statuses, executed) = run_graph(&graph, &executor, true);

        assert!(!executed.contains(&2));
        assert_eq!(statuses[2], RunStatus::Skipped);
    }

    #[test]
    fn test_any_policy_skips_even_when_other_dependency_succeeds() {
        // The shape of a pitch task: depends on its own query and the track adjustment
        let mut executor = ScriptedExecutor::new();
        executor.failing.insert(0);
        let graph = TaskGraph::new(vec![
            query_task(0, vec![]),
            query_task(1, vec![]),
            adjustment_task(vec![0, 1]),
            query_task(3, vec![0, 2]),
        ])
        .unwrap();
        let (_, statuses, executed) = run_graph(&graph, &executor, true);

        assert_eq!(statuses[2], RunStatus::Success);
        assert!(!executed.contains(&3));
        assert_eq!(statuses[3], RunStatus::Skipped);
    }

    #[test]
    fn test_cached_tasks_run_first() {
        let mut executor = ScriptedExecutor::new();
        executor.cached.insert(2);
        let graph = TaskGraph::new(vec![
            query_task(0, vec![]),
            query_task(1, vec![]),
            query_task(2, vec![]),
        ])
        .unwrap();
        let (_, _, executed) = run_graph(&graph, &executor, true);

        assert_eq!(executed, vec![2, 0, 1]);
    }

    #[test]
    fn test_cache_priority_can_be_disabled() {
        let mut executor = ScriptedExecutor::new();
        executor.cached.insert(2);
        let graph = TaskGraph::new(vec![
            query_task(0, vec![]),
            query_task(1, vec![]),
            query_task(2, vec![]),
        ])
        .unwrap();
        let (_, _, executed) = run_graph(&graph, &executor, false);

        assert_eq!(executed, vec![0, 1, 2]);
    }

    #[test]
    fn test_interruption_stops_between_tasks() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut executor = ScriptedExecutor::new();
        executor.interrupt_after = Some((0, flag.clone()));
        let graph = TaskGraph::new(vec![query_task(0, vec![]), query_task(1, vec![])]).unwrap();

        let snapshot = empty_snapshot();
        let config = RenderConfig::default();
        let caches = RenderCaches::default();
        let ctx = RenderContext {
            snapshot: &snapshot,
            config: &config,
            caches: &caches,
            phrases: Mutex::new(Default::default()),
        };
        let mut runner = DagRunner::new(&graph, true);
        let outcome = runner.run(&ctx, &executor, &mut FifoSelector, &mut (), &flag);

        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(*executor.executed.lock(), vec![0]);
        // The first task still settled; the unstarted one is swept
        assert_eq!(runner.run_statuses()[0], RunStatus::Success);
        assert_eq!(runner.run_statuses()[1], RunStatus::Skipped);
    }

    #[test]
    fn test_observer_sees_start_and_finish_in_order() {
        #[derive(Default)]
        struct RecordingObserver {
            events: Vec<(TaskId, &'static str, bool)>,
            outcome: Option<RunOutcome>,
        }
        impl RunObserver for RecordingObserver {
            fn task_started(&mut self, task_id: TaskId, _task: &Task, is_cached: bool) {
                self.events.push((task_id, "started", is_cached));
            }
            fn task_finished(
                &mut self,
                task_id: TaskId,
                _task: &Task,
                is_cached: bool,
                _result: &Result<TaskOutput, Arc<anyhow::Error>>,
            ) {
                self.events.push((task_id, "finished", is_cached));
            }
            fn run_finished(&mut self, outcome: RunOutcome) {
                self.outcome = Some(outcome);
            }
        }

        let mut executor = ScriptedExecutor::new();
        executor.cached.insert(0);
        let graph = TaskGraph::new(vec![query_task(0, vec![]), query_task(1, vec![0])]).unwrap();

        let snapshot = empty_snapshot();
        let config = RenderConfig::default();
        let caches = RenderCaches::default();
        let ctx = RenderContext {
            snapshot: &snapshot,
            config: &config,
            caches: &caches,
            phrases: Mutex::new(Default::default()),
        };
        let mut observer = RecordingObserver::default();
        let mut runner = DagRunner::new(&graph, true);
        runner.run(
            &ctx,
            &executor,
            &mut FifoSelector,
            &mut observer,
            &AtomicBool::new(false),
        );

        assert_eq!(
            observer.events,
            vec![
                (0, "started", true),
                (0, "finished", true),
                (1, "started", false),
                (1, "finished", false),
            ]
        );
        assert_eq!(observer.outcome, Some(RunOutcome::Completed));
    }
}
