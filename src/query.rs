//! The frame audio query, the engine's per-phrase working structure.
//!
//! A query holds one entry per phoneme with its length in frames, plus dense f0 and volume arrays
//! with one value per frame. All four rendering stages either produce or transform queries.

use serde::Serialize;
use thiserror::Error;

use crate::score::NoteId;

/// The silence phoneme. Every query starts and ends with one; the volume fade-out relies on the
/// trailing one.
pub const PAU: &str = "pau";

/// A phoneme spanning a run of frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FramePhoneme {
    pub phoneme: String,
    /// How many frames the phoneme spans. Always at least 1.
    pub frame_length: usize,
    /// The note this phoneme belongs to. `None` for the leading and trailing silences.
    pub note_id: Option<NoteId>,
}

/// An invariant violation in a [`Query`]. These fail the stage that observed them without
/// stopping the rest of the render.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("the query contains no phonemes")]
    EmptyPhonemes,
    #[error("phoneme at index {index} has a zero frame length")]
    ZeroLengthPhoneme { index: usize },
    #[error("phoneme frames total {phoneme_frames} but f0 holds {f0_frames} values")]
    F0LengthMismatch {
        phoneme_frames: usize,
        f0_frames: usize,
    },
    #[error("phoneme frames total {phoneme_frames} but volume holds {volume_frames} values")]
    VolumeLengthMismatch {
        phoneme_frames: usize,
        volume_frames: usize,
    },
    #[error("the query does not end with a {PAU} phoneme")]
    MissingTrailingPau,
}

/// A frame audio query as returned by the engine and refined by the pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub frame_phonemes: Vec<FramePhoneme>,
    /// Frames per second of the arrays below.
    pub frame_rate: f64,
    /// Fundamental frequency per frame, in Hz.
    pub f0: Vec<f64>,
    /// Volume per frame, as a linear gain.
    pub volume: Vec<f64>,
}

impl Query {
    /// The total number of frames spanned by the query's phonemes.
    pub fn frame_count(&self) -> usize {
        self.frame_phonemes
            .iter()
            .map(|phoneme| phoneme.frame_length)
            .sum()
    }

    /// Check the query's structural invariants: at least one phoneme, every phoneme at least one
    /// frame long, f0 and volume exactly one value per frame, and a trailing silence.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.frame_phonemes.is_empty() {
            return Err(QueryError::EmptyPhonemes);
        }
        if let Some(index) = self
            .frame_phonemes
            .iter()
            .position(|phoneme| phoneme.frame_length == 0)
        {
            return Err(QueryError::ZeroLengthPhoneme { index });
        }

        let phoneme_frames = self.frame_count();
        if self.f0.len() != phoneme_frames {
            return Err(QueryError::F0LengthMismatch {
                phoneme_frames,
                f0_frames: self.f0.len(),
            });
        }
        if self.volume.len() != phoneme_frames {
            return Err(QueryError::VolumeLengthMismatch {
                phoneme_frames,
                volume_frames: self.volume.len(),
            });
        }
        if self
            .frame_phonemes
            .last()
            .map_or(true, |phoneme| phoneme.phoneme != PAU)
        {
            return Err(QueryError::MissingTrailingPau);
        }

        Ok(())
    }

    /// The frame range `[start, start + length)` of the trailing silence.
    pub fn trailing_pau_range(&self) -> Option<(usize, usize)> {
        let last = self.frame_phonemes.last()?;
        if last.phoneme != PAU {
            return None;
        }

        let start = self.frame_count() - last.frame_length;
        Some((start, last.frame_length))
    }
}
