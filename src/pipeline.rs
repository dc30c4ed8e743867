//! The rendering pipeline: task construction, selection, stage logic, and the DAG runner.
//!
//! For every track the builder instantiates the task DAG below, with one column per phrase:
//!
//! ```text
//!                    ┌─ PitchGeneration ─ VolumeGeneration ─ VoiceSynthesis
//! QueryGeneration ───┼─ PitchGeneration ─ VolumeGeneration ─ VoiceSynthesis
//!         │          └─ …
//!         └──────► PhonemeTimingAdjustment (per track, feeds every PitchGeneration)
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::keys::PhraseKey;
use crate::phrase::Phrase;
use crate::renderer::{RenderCaches, RenderConfig};
use crate::score::Snapshot;

pub mod runner;
pub mod selector;
pub mod stages;
pub mod tasks;

use self::tasks::{Task, TaskGraph, TaskKind};

/// Everything one render call shares between its tasks. The phrase map is behind a mutex because
/// stages release it while waiting on the engine.
pub struct RenderContext<'a> {
    pub snapshot: &'a Snapshot,
    pub config: &'a RenderConfig,
    pub caches: &'a RenderCaches,
    pub phrases: Mutex<HashMap<PhraseKey, Phrase>>,
}

impl RenderContext<'_> {
    /// The start time of a phrase, for selectors that rank work by score position.
    pub fn phrase_start_time(&self, phrase_key: &PhraseKey) -> Option<f64> {
        self.phrases
            .lock()
            .get(phrase_key)
            .map(|phrase| phrase.start_time)
    }
}

/// Instantiate the rendering tasks for every phrase that has a singer, wired per the DAG above.
/// Phrases without a singer produce no tasks at all.
pub fn build_task_graph(
    snapshot: &Snapshot,
    phrases: &HashMap<PhraseKey, Phrase>,
) -> TaskGraph {
    let mut graph_tasks = Vec::new();

    for track in &snapshot.tracks {
        let mut track_phrases: Vec<(&PhraseKey, &Phrase)> = phrases
            .iter()
            .filter(|(_, phrase)| phrase.track_id == track.id && phrase.singer.is_some())
            .collect();
        if track_phrases.is_empty() {
            continue;
        }
        track_phrases.sort_by_key(|(_, phrase)| phrase.start_ticks);

        let query_ids: Vec<usize> = track_phrases
            .iter()
            .map(|(phrase_key, _)| {
                graph_tasks.push(Task {
                    kind: TaskKind::QueryGeneration {
                        phrase_key: (*phrase_key).clone(),
                    },
                    dependencies: Vec::new(),
                });
                graph_tasks.len() - 1
            })
            .collect();

        graph_tasks.push(Task {
            kind: TaskKind::PhonemeTimingAdjustment {
                track_id: track.id.clone(),
                phrase_keys: track_phrases
                    .iter()
                    .map(|(phrase_key, _)| (*phrase_key).clone())
                    .collect(),
            },
            dependencies: query_ids.clone(),
        });
        let adjustment_id = graph_tasks.len() - 1;

        for ((phrase_key, _), &query_id) in track_phrases.iter().zip(&query_ids) {
            graph_tasks.push(Task {
                kind: TaskKind::PitchGeneration {
                    phrase_key: (*phrase_key).clone(),
                },
                dependencies: vec![query_id, adjustment_id],
            });
            let pitch_id = graph_tasks.len() - 1;

            graph_tasks.push(Task {
                kind: TaskKind::VolumeGeneration {
                    phrase_key: (*phrase_key).clone(),
                },
                dependencies: vec![pitch_id],
            });
            let volume_id = graph_tasks.len() - 1;

            graph_tasks.push(Task {
                kind: TaskKind::VoiceSynthesis {
                    phrase_key: (*phrase_key).clone(),
                },
                dependencies: vec![volume_id],
            });
        }
    }

    TaskGraph::new(graph_tasks).expect("the builder only wires dependencies on earlier tasks")
}
