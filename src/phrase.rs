//! Phrase extraction.
//!
//! A phrase is a maximal contiguous run of a track's notes, rendered as a unit. The extractor
//! walks each track's notes, cuts a new phrase at every tick gap, and attaches a bounded leading
//! rest so the engine has room to articulate the first phoneme.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::Voice;
use crate::keys::{PhraseKey, PhraseKeySource, PitchKey, QueryKey, VoiceKey, VolumeKey};
use crate::query::Query;
use crate::score::{Note, Singer, Snapshot, TempoMap, Track, TrackId};

/// A contiguous run of notes plus the artifacts rendered for it. The artifact slots start out
/// empty and are each written at most once while the pipeline runs.
#[derive(Debug, Clone)]
pub struct Phrase {
    pub singer: Option<Singer>,
    /// Length of the leading rest in ticks. At least 1.
    pub first_rest_duration: i64,
    pub notes: Vec<Note>,
    /// First tick of the leading rest. May be negative when the rest reaches before the score.
    pub start_ticks: i64,
    /// The tick right after the last note.
    pub end_ticks: i64,
    /// Wall-clock time of `start_ticks`, in seconds.
    pub start_time: f64,
    pub track_id: TrackId,

    pub query_key: Option<QueryKey>,
    pub query: Option<Arc<Query>>,
    /// The query with the user's phoneme timing edits applied.
    pub timing_adjusted_query: Option<Arc<Query>>,
    pub pitch_key: Option<PitchKey>,
    pub pitch: Option<Arc<Vec<f64>>>,
    pub volume_key: Option<VolumeKey>,
    pub volume: Option<Arc<Vec<f64>>>,
    pub voice_key: Option<VoiceKey>,
    pub voice: Option<Arc<Voice>>,
    /// Set when any of the phrase's rendering tasks failed or was skipped.
    pub error_occurred: bool,
}

impl Phrase {
    /// The phrase's content key, recomputable from its own fields at any time.
    pub fn key(&self) -> PhraseKey {
        PhraseKeySource {
            first_rest_duration: self.first_rest_duration,
            notes: &self.notes,
            start_time: self.start_time,
            track_id: &self.track_id,
        }
        .hash()
    }

    /// Whether all four artifacts have been rendered.
    pub fn is_fully_rendered(&self) -> bool {
        self.query.is_some() && self.pitch.is_some() && self.volume.is_some() && self.voice.is_some()
    }
}

/// Compute the leading rest for a phrase starting at `first_note_position`. The raw gap towards
/// the previous phrase (or the score start) is capped at one quarter note, then raised to the
/// configured minimum duration, then floored to a single tick.
fn first_rest_duration(
    tempo_map: &TempoMap,
    first_note_position: i64,
    previous_phrase_end: Option<i64>,
    min_duration_seconds: f64,
) -> i64 {
    let gap = match previous_phrase_end {
        Some(end) => first_note_position - end,
        None => first_note_position,
    };
    let capped = gap.min(tempo_map.tpqn());

    let note_start_time = tempo_map.tick_to_second(first_note_position);
    let min_rest_ticks = first_note_position as f64
        - tempo_map.second_to_tick(note_start_time - min_duration_seconds);

    ((capped as f64).max(min_rest_ticks).round() as i64).max(1)
}

/// Split one track into phrases. Overlapping notes are dropped first; a new phrase starts at
/// every tick gap between the remaining notes.
fn extract_track_phrases(
    tempo_map: &TempoMap,
    track: &Track,
    first_rest_min_duration_seconds: f64,
) -> Vec<Phrase> {
    let notes: Vec<&Note> = track
        .notes
        .iter()
        .filter(|note| !track.overlapping_note_ids.contains(&note.id))
        .collect();

    let mut phrases = Vec::new();
    let mut run_start = 0;
    let mut previous_phrase_end = None;

    for index in 0..notes.len() {
        let is_last_of_run = match notes.get(index + 1) {
            Some(next) => next.position != notes[index].end(),
            None => true,
        };
        if !is_last_of_run {
            continue;
        }

        let run: Vec<Note> = notes[run_start..=index].iter().map(|&n| n.clone()).collect();
        let first_rest = first_rest_duration(
            tempo_map,
            run[0].position,
            previous_phrase_end,
            first_rest_min_duration_seconds,
        );
        let start_ticks = run[0].position - first_rest;
        let end_ticks = run.last().expect("runs are never empty").end();

        previous_phrase_end = Some(end_ticks);
        run_start = index + 1;

        phrases.push(Phrase {
            singer: track.singer.clone(),
            first_rest_duration: first_rest,
            start_ticks,
            end_ticks,
            start_time: tempo_map.tick_to_second(start_ticks),
            track_id: track.id.clone(),
            notes: run,
            query_key: None,
            query: None,
            timing_adjusted_query: None,
            pitch_key: None,
            pitch: None,
            volume_key: None,
            volume: None,
            voice_key: None,
            voice: None,
            error_occurred: false,
        });
    }

    phrases
}

/// Split every track of the snapshot into phrases, keyed by phrase content.
pub fn extract_phrases(
    snapshot: &Snapshot,
    first_rest_min_duration_seconds: f64,
) -> HashMap<PhraseKey, Phrase> {
    let mut phrases = HashMap::new();
    for track in &snapshot.tracks {
        for phrase in
            extract_track_phrases(&snapshot.tempo_map, track, first_rest_min_duration_seconds)
        {
            phrases.insert(phrase.key(), phrase);
        }
    }

    log::debug!("extracted {} phrases", phrases.len());
    phrases
}
