//! The read-only score snapshot the pipeline renders from.
//!
//! A [`Snapshot`] is taken by the editor whenever rendering (re)starts. It carries everything the
//! pipeline needs to compute phrases and artifact keys: the tempo map, the tracks with their notes
//! and per-track adjustments, the user's pitch and phoneme timing edits, and the frame rates of
//! the engines involved. The snapshot is never mutated by the pipeline.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// The sentinel stored in a track's dense pitch edit vector for frames the user hasn't edited.
/// Edited frames hold the replacement f0 value, which is always positive.
pub const NO_PITCH_EDIT: f64 = -1.0;

/// Identifies a note within a track. Stable across edits that don't delete the note.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NoteId(pub String);

/// Identifies a track within the score.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TrackId(pub String);

/// Identifies a synthesis engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EngineId(pub String);

/// Identifies a voice style within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StyleId(pub u32);

impl From<&str> for NoteId {
    fn from(id: &str) -> Self {
        NoteId(id.to_owned())
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        TrackId(id.to_owned())
    }
}

impl From<&str> for EngineId {
    fn from(id: &str) -> Self {
        EngineId(id.to_owned())
    }
}

/// A note in the score. Positions and durations are in ticks, resolution given by the tempo map's
/// ticks per quarter note.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub id: NoteId,
    pub position: i64,
    pub duration: i64,
    /// The note's MIDI key number, from 0 to 127.
    pub note_number: u8,
    pub lyric: String,
}

impl Note {
    /// The tick right after the note's last tick.
    pub fn end(&self) -> i64 {
        self.position + self.duration
    }
}

/// The singer assigned to a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Singer {
    pub engine_id: EngineId,
    pub style_id: StyleId,
}

/// A tempo change. The first tempo of a map always sits at tick 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tempo {
    pub position: i64,
    pub bpm: f64,
}

/// An error raised while constructing a [`TempoMap`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TempoMapError {
    #[error("the tempo map contains no tempos")]
    Empty,
    #[error("the first tempo must be at tick 0")]
    MissingInitialTempo,
    #[error("tempo positions must be strictly increasing")]
    UnsortedTempos,
    #[error("tempos must have a positive BPM")]
    NonPositiveBpm,
    #[error("ticks per quarter note must be positive")]
    NonPositiveTpqn,
}

/// Maps between the score's rational time (ticks) and wall-clock time (seconds) across tempo
/// changes.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    tpqn: i64,
    tempos: Vec<Tempo>,
}

impl TempoMap {
    pub fn new(tpqn: i64, tempos: Vec<Tempo>) -> Result<Self, TempoMapError> {
        if tpqn <= 0 {
            return Err(TempoMapError::NonPositiveTpqn);
        }
        let first = tempos.first().ok_or(TempoMapError::Empty)?;
        if first.position != 0 {
            return Err(TempoMapError::MissingInitialTempo);
        }
        if tempos.windows(2).any(|w| w[0].position >= w[1].position) {
            return Err(TempoMapError::UnsortedTempos);
        }
        if tempos.iter().any(|tempo| tempo.bpm <= 0.0) {
            return Err(TempoMapError::NonPositiveBpm);
        }

        Ok(TempoMap { tpqn, tempos })
    }

    /// The number of ticks in one quarter note.
    pub fn tpqn(&self) -> i64 {
        self.tpqn
    }

    /// Seconds taken by one tick at the given tempo.
    fn seconds_per_tick(&self, bpm: f64) -> f64 {
        60.0 / (bpm * self.tpqn as f64)
    }

    /// The wall-clock time of a tick position. Negative positions extrapolate backwards using the
    /// initial tempo; they occur when a phrase's leading rest reaches before the start of the
    /// score.
    pub fn tick_to_second(&self, ticks: i64) -> f64 {
        let mut time = 0.0;
        let mut segment_start = 0;
        let mut segment_bpm = self.tempos[0].bpm;

        if ticks <= 0 {
            return ticks as f64 * self.seconds_per_tick(segment_bpm);
        }

        for tempo in &self.tempos[1..] {
            if tempo.position >= ticks {
                break;
            }
            time += (tempo.position - segment_start) as f64 * self.seconds_per_tick(segment_bpm);
            segment_start = tempo.position;
            segment_bpm = tempo.bpm;
        }

        time + (ticks - segment_start) as f64 * self.seconds_per_tick(segment_bpm)
    }

    /// The (fractional) tick position of a wall-clock time. The inverse of
    /// [`tick_to_second()`][Self::tick_to_second()].
    pub fn second_to_tick(&self, seconds: f64) -> f64 {
        let mut segment_time = 0.0;
        let mut segment_start = 0;
        let mut segment_bpm = self.tempos[0].bpm;

        if seconds <= 0.0 {
            return seconds / self.seconds_per_tick(segment_bpm);
        }

        for tempo in &self.tempos[1..] {
            let tempo_time = segment_time
                + (tempo.position - segment_start) as f64 * self.seconds_per_tick(segment_bpm);
            if tempo_time >= seconds {
                break;
            }
            segment_time = tempo_time;
            segment_start = tempo.position;
            segment_bpm = tempo.bpm;
        }

        segment_start as f64 + (seconds - segment_time) / self.seconds_per_tick(segment_bpm)
    }
}

/// A user edit that moves the onset of one phoneme of one note by a fixed amount of time.
#[derive(Debug, Clone, PartialEq)]
pub struct PhonemeTimingEdit {
    pub note_id: NoteId,
    /// Which of the note's phonemes to move, counted within the note.
    pub phoneme_index: usize,
    /// Positive values delay the phoneme's onset, negative values advance it.
    pub offset_seconds: f64,
}

/// One track of the score, together with the per-track settings that feed rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    /// The singer rendering this track. A track without a singer is laid out into phrases for
    /// display purposes but produces no rendering work.
    pub singer: Option<Singer>,
    /// The track's notes, ordered by position.
    pub notes: Vec<Note>,
    /// Transposition applied around engine calls, in semitones.
    pub key_range_adjustment: i32,
    /// Gain applied to generated volume curves, in decibels.
    pub volume_range_adjustment: f64,
    /// Dense f0 overrides indexed by editor frame. Frames without an edit hold
    /// [`NO_PITCH_EDIT`].
    pub pitch_edits: Vec<f64>,
    pub phoneme_timing_edits: Vec<PhonemeTimingEdit>,
    /// Notes that overlap a neighbour. These are excluded from every phrase.
    pub overlapping_note_ids: HashSet<NoteId>,
}

/// A read-only snapshot of everything rendering depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub tempo_map: TempoMap,
    pub tracks: Vec<Track>,
    /// Output frame rate per engine, in frames per second.
    pub engine_frame_rates: HashMap<EngineId, f64>,
    /// The frame rate pitch edits are sampled at.
    pub editor_frame_rate: f64,
}

impl Snapshot {
    pub fn track(&self, track_id: &TrackId) -> Option<&Track> {
        self.tracks.iter().find(|track| &track.id == track_id)
    }

    pub fn engine_frame_rate(&self, engine_id: &EngineId) -> Option<f64> {
        self.engine_frame_rates.get(engine_id).copied()
    }
}
