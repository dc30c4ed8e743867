//! Task descriptions and the validated task graph.
//!
//! Every unit of rendering work is a [`Task`]: one of five kinds, with dependencies on other
//! tasks. The five kinds form a small DAG per track; the runner executes it with cache probes and
//! failure isolation.

use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

use crate::engine::Voice;
use crate::keys::{PhraseKey, PitchKey, QueryKey, VoiceKey, VolumeKey};
use crate::query::Query;
use crate::score::TrackId;

/// Index of a task within its [`TaskGraph`]. Ids are assigned in construction order.
pub type TaskId = usize;

/// Decides what happens to a task when some of its dependencies fail or get skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipPolicy {
    /// Skip the task as soon as any dependency fails or is skipped. Used by the per-phrase chain
    /// so one broken stage short-circuits the rest of that phrase.
    AnyDependencyFailedOrSkipped,
    /// Skip the task only when every dependency failed or was skipped. Used by the per-track
    /// phoneme timing adjustment, which can work with any subset of successful queries.
    AllDependenciesFailedOrSkipped,
}

/// What a task does. The kind also determines its cache behavior and skip policy.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// Ask the engine for the phrase's initial frame audio query.
    QueryGeneration { phrase_key: PhraseKey },
    /// Apply the user's phoneme timing edits across all of a track's successful queries.
    /// `phrase_keys` lists the track's phrases in time order.
    PhonemeTimingAdjustment {
        track_id: TrackId,
        phrase_keys: Vec<PhraseKey>,
    },
    /// Generate the phrase's f0 curve.
    PitchGeneration { phrase_key: PhraseKey },
    /// Generate the phrase's volume curve.
    VolumeGeneration { phrase_key: PhraseKey },
    /// Synthesize the phrase's waveform.
    VoiceSynthesis { phrase_key: PhraseKey },
}

impl TaskKind {
    /// Whether this task's output is content-addressed and can be served from cache. The timing
    /// adjustment is pure bookkeeping over already-cached queries, so caching it buys nothing.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, TaskKind::PhonemeTimingAdjustment { .. })
    }

    pub fn skip_policy(&self) -> SkipPolicy {
        match self {
            TaskKind::PhonemeTimingAdjustment { .. } => SkipPolicy::AllDependenciesFailedOrSkipped,
            _ => SkipPolicy::AnyDependencyFailedOrSkipped,
        }
    }

    /// The phrase this task renders, if it is a per-phrase task.
    pub fn phrase_key(&self) -> Option<&PhraseKey> {
        match self {
            TaskKind::QueryGeneration { phrase_key }
            | TaskKind::PitchGeneration { phrase_key }
            | TaskKind::VolumeGeneration { phrase_key }
            | TaskKind::VoiceSynthesis { phrase_key } => Some(phrase_key),
            TaskKind::PhonemeTimingAdjustment { .. } => None,
        }
    }
}

/// A node in the task graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub kind: TaskKind,
    /// Ids of the tasks that must settle before this one can run.
    pub dependencies: Vec<TaskId>,
}

/// What a successfully executed task produced. Carried in the runner's task-finished
/// notifications so the facade can translate them into the public event stream.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    Query {
        phrase_key: PhraseKey,
        key: QueryKey,
        query: Arc<Query>,
    },
    TimingAdjustment {
        track_id: TrackId,
    },
    Pitch {
        phrase_key: PhraseKey,
        key: PitchKey,
        pitch: Arc<Vec<f64>>,
    },
    Volume {
        phrase_key: PhraseKey,
        key: VolumeKey,
        volume: Arc<Vec<f64>>,
    },
    Voice {
        phrase_key: PhraseKey,
        key: VoiceKey,
        voice: Arc<Voice>,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskGraphError {
    #[error("task {task} depends on {dependency}, which is not in the graph")]
    UnknownDependency { task: TaskId, dependency: TaskId },
    #[error("task {task} lists dependency {dependency} twice")]
    DuplicateDependency { task: TaskId, dependency: TaskId },
    #[error("the tasks contain a dependency cycle")]
    Cycle,
}

/// A validated set of tasks with parent and child lookups.
#[derive(Debug)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    children: Vec<Vec<TaskId>>,
}

impl TaskGraph {
    /// Validate and index a task set: every dependency must be in the set and appear once, and
    /// the dependencies must be acyclic.
    pub fn new(tasks: Vec<Task>) -> Result<Self, TaskGraphError> {
        let mut children: Vec<Vec<TaskId>> = vec![Vec::new(); tasks.len()];
        for (id, task) in tasks.iter().enumerate() {
            for (index, &dependency) in task.dependencies.iter().enumerate() {
                if dependency >= tasks.len() {
                    return Err(TaskGraphError::UnknownDependency {
                        task: id,
                        dependency,
                    });
                }
                if task.dependencies[..index].contains(&dependency) {
                    return Err(TaskGraphError::DuplicateDependency {
                        task: id,
                        dependency,
                    });
                }
                children[dependency].push(id);
            }
        }

        // Kahn's algorithm. The builder always constructs dependencies on earlier ids, but the
        // graph doesn't trust its callers on that.
        let mut indegrees: Vec<usize> = tasks.iter().map(|task| task.dependencies.len()).collect();
        let mut queue: VecDeque<TaskId> = indegrees
            .iter()
            .enumerate()
            .filter(|(_, &indegree)| indegree == 0)
            .map(|(id, _)| id)
            .collect();
        let mut visited = 0;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for &child in &children[id] {
                indegrees[child] -= 1;
                if indegrees[child] == 0 {
                    queue.push_back(child);
                }
            }
        }
        if visited != tasks.len() {
            return Err(TaskGraphError::Cycle);
        }

        Ok(TaskGraph { tasks, children })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id]
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn parents(&self, id: TaskId) -> &[TaskId] {
        &self.tasks[id].dependencies
    }

    pub fn children(&self, id: TaskId) -> &[TaskId] {
        &self.children[id]
    }

    /// Ids of the tasks with no dependencies, in construction order.
    pub fn roots(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| task.dependencies.is_empty())
            .map(|(id, _)| id)
    }
}
