//! The seam between the pipeline and the synthesis engine.
//!
//! The pipeline depends on exactly four engine operations. They are modelled as a trait so the
//! transport (an HTTP API in the editor, a mock in tests) stays out of the core. Every operation
//! may fail; failures are caught by the task runner and turned into per-task failures instead of
//! stopping the render.

use anyhow::Result;
use serde::Serialize;

use crate::query::Query;
use crate::score::{EngineId, NoteId, StyleId};

/// A note as sent to the engine. Unlike score notes these are positioned implicitly: each note
/// starts where the previous one ends, and silences are explicit notes without a key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineNote {
    /// The score note this engine note was derived from. `None` for inserted silences.
    pub id: Option<NoteId>,
    /// The MIDI key number, or `None` for a silence.
    pub key: Option<u8>,
    pub frame_length: usize,
    pub lyric: String,
}

impl EngineNote {
    /// A silent note spanning the given number of frames.
    pub fn rest(frame_length: usize) -> Self {
        EngineNote {
            id: None,
            key: None,
            frame_length,
            lyric: String::new(),
        }
    }
}

/// An encoded audio blob returned by voice synthesis. The pipeline treats the contents as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice(pub Vec<u8>);

/// The four engine operations the pipeline drives.
///
/// Implementations take and return plain values; the pipeline performs all key-range and
/// volume-range adjustments itself so engines always see unshifted material.
pub trait SynthesisEngine {
    /// Build the initial frame audio query for a run of notes: phoneme assignment, phoneme
    /// timings, and initial f0/volume estimates.
    fn fetch_frame_audio_query(
        &self,
        engine_id: &EngineId,
        style_id: StyleId,
        frame_rate: f64,
        notes: &[EngineNote],
    ) -> Result<Query>;

    /// Generate an f0 curve for the query, one value per frame.
    fn fetch_sing_frame_f0(
        &self,
        engine_id: &EngineId,
        style_id: StyleId,
        notes: &[EngineNote],
        query: &Query,
    ) -> Result<Vec<f64>>;

    /// Generate a volume curve for the query, one value per frame.
    fn fetch_sing_frame_volume(
        &self,
        engine_id: &EngineId,
        style_id: StyleId,
        notes: &[EngineNote],
        query: &Query,
    ) -> Result<Vec<f64>>;

    /// Synthesize the query into an encoded waveform.
    fn frame_synthesis(
        &self,
        engine_id: &EngineId,
        style_id: StyleId,
        query: &Query,
    ) -> Result<Voice>;
}
