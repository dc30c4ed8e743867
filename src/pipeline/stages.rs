//! Per-stage logic: inputs → engine call → post-processing.
//!
//! Every stage follows the same outline. Derive the stage's content key from its logical inputs,
//! serve the artifact from cache when the key is known, otherwise call the engine and
//! post-process its output, then publish the artifact to the cache and the phrase's slot. The
//! engine always sees material with the track's key-range adjustment removed; the adjustment is
//! reapplied to whatever comes back.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::engine::{EngineNote, SynthesisEngine};
use crate::keys::{
    PhraseKey, PitchKeySource, QueryKeySource, VoiceKeySource, VolumeKeySource,
};
use crate::phrase::Phrase;
use crate::query::{Query, QueryError};
use crate::score::{EngineId, NoteId, PhonemeTimingEdit, Singer, TempoMap, Track, TrackId};
use crate::util::{db_to_gain, linear_interpolation, seconds_to_frame, semitones_to_ratio};

use super::tasks::TaskOutput;
use super::RenderContext;

/// An input invariant violation observed by a stage. Fails the task without stopping the render.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("the phrase has no singer")]
    MissingSinger,
    #[error("no frame rate is known for engine {0:?}")]
    UnknownEngineFrameRate(EngineId),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("the engine returned {actual} f0 values for {expected} frames")]
    GeneratedPitchLength { expected: usize, actual: usize },
    #[error("the engine returned {actual} volume values for {expected} frames")]
    GeneratedVolumeLength { expected: usize, actual: usize },
}

/// Transform a phrase's notes into the engine's implicitly-positioned note list: a leading
/// silence covering the phrase's rest, one note per score note, and a fixed trailing silence.
/// Frame lengths come from differences of rounded absolute frame positions, so adjacent notes
/// never gain or lose frames to rounding. A left-to-right repair pass then guarantees every note
/// at least one frame by stealing the deficit from its successor.
pub fn notes_for_engine(
    phrase: &Phrase,
    tempo_map: &TempoMap,
    frame_rate: f64,
    last_rest_duration_seconds: f64,
) -> Vec<EngineNote> {
    let mut notes = Vec::with_capacity(phrase.notes.len() + 2);
    let mut lengths: Vec<i64> = Vec::with_capacity(phrase.notes.len() + 2);

    let first_note_start = tempo_map.tick_to_second(phrase.notes[0].position);
    notes.push(EngineNote::rest(0));
    lengths.push(
        seconds_to_frame(first_note_start, frame_rate)
            - seconds_to_frame(phrase.start_time, frame_rate),
    );

    for note in &phrase.notes {
        let start = tempo_map.tick_to_second(note.position);
        let end = tempo_map.tick_to_second(note.end());
        notes.push(EngineNote {
            id: Some(note.id.clone()),
            key: Some(note.note_number),
            frame_length: 0,
            lyric: note.lyric.clone(),
        });
        lengths.push(seconds_to_frame(end, frame_rate) - seconds_to_frame(start, frame_rate));
    }

    notes.push(EngineNote::rest(0));
    lengths.push(seconds_to_frame(last_rest_duration_seconds, frame_rate));

    // Repair pass: a note squeezed below one frame takes the deficit out of its successor, which
    // may cascade.
    for index in 0..lengths.len() {
        if lengths[index] < 1 {
            let deficit = 1 - lengths[index];
            lengths[index] = 1;
            if index + 1 < lengths.len() {
                lengths[index + 1] -= deficit;
            }
        }
    }

    for (note, length) in notes.iter_mut().zip(&lengths) {
        note.frame_length = *length as usize;
    }
    notes
}

/// Transpose every keyed note by `semitones`, clamped to the MIDI range.
fn shift_note_keys(notes: &[EngineNote], semitones: i32) -> Vec<EngineNote> {
    notes
        .iter()
        .map(|note| EngineNote {
            key: note
                .key
                .map(|key| (key as i32 + semitones).clamp(0, 127) as u8),
            ..note.clone()
        })
        .collect()
}

fn scale_f0(f0: &mut [f64], ratio: f64) {
    for value in f0 {
        *value *= ratio;
    }
}

/// Overwrite f0 values with the user's pitch edits. The edits are a dense vector sampled at the
/// editor frame rate; each engine frame reads the editor frame its midpoint-rounded absolute time
/// falls on. Frames before the score start or past the edited range keep their generated value.
pub fn apply_pitch_edits(
    query: &mut Query,
    phrase_start_time: f64,
    pitch_edits: &[f64],
    editor_frame_rate: f64,
) {
    for (frame, f0) in query.f0.iter_mut().enumerate() {
        let time = phrase_start_time + frame as f64 / query.frame_rate;
        let editor_frame = seconds_to_frame(time, editor_frame_rate);
        if editor_frame < 0 {
            continue;
        }
        match pitch_edits.get(editor_frame as usize) {
            Some(&edit) if edit > 0.0 => *f0 = edit,
            _ => {}
        }
    }
}

/// Apply the user's phoneme timing edits to a track's queries, in phrase order.
///
/// Each query's phonemes are converted to a boundary vector; an edit moves the onset boundary of
/// the addressed phoneme by its offset. Boundaries are then clamped so they stay strictly
/// increasing with at least one frame per phoneme, and a phrase's outer boundaries never move, so
/// the phrase keeps its frame total (and with it the validity of its f0/volume arrays) and can
/// never reach into a neighbouring phrase.
pub fn apply_phoneme_timing_edits(
    queries: &[(f64, Arc<Query>)],
    edits: &[PhonemeTimingEdit],
) -> Vec<Query> {
    let offsets: HashMap<(NoteId, usize), f64> = edits
        .iter()
        .map(|edit| {
            (
                (edit.note_id.clone(), edit.phoneme_index),
                edit.offset_seconds,
            )
        })
        .collect();

    queries
        .iter()
        .map(|(_, query)| {
            let mut adjusted = (**query).clone();
            let phoneme_count = adjusted.frame_phonemes.len();
            if phoneme_count < 2 {
                return adjusted;
            }

            // Absolute frame boundaries; boundaries[j] is the onset of phoneme j
            let mut boundaries: Vec<i64> = Vec::with_capacity(phoneme_count + 1);
            boundaries.push(0);
            for phoneme in &adjusted.frame_phonemes {
                boundaries.push(boundaries.last().unwrap() + phoneme.frame_length as i64);
            }
            let frame_total = boundaries[phoneme_count];

            let mut phoneme_indices_within_note: HashMap<&NoteId, usize> = HashMap::new();
            for (index, phoneme) in adjusted.frame_phonemes.iter().enumerate() {
                let Some(note_id) = &phoneme.note_id else {
                    continue;
                };
                let within_note = {
                    let counter = phoneme_indices_within_note.entry(note_id).or_insert(0);
                    let value = *counter;
                    *counter += 1;
                    value
                };
                if index == 0 {
                    // The onset of the first phoneme is the phrase start and never moves
                    continue;
                }
                if let Some(&offset) = offsets.get(&(note_id.clone(), within_note)) {
                    boundaries[index] += (offset * adjusted.frame_rate).round() as i64;
                }
            }

            // Clamp: left to right for the one-frame minimum, right to left against the fixed
            // phrase end. Both passes keep the outer boundaries untouched.
            for index in 1..phoneme_count {
                boundaries[index] = boundaries[index].max(boundaries[index - 1] + 1);
            }
            for index in (1..phoneme_count).rev() {
                boundaries[index] = boundaries[index].min(boundaries[index + 1] - 1);
            }
            debug_assert_eq!(boundaries[phoneme_count], frame_total);

            for (index, phoneme) in adjusted.frame_phonemes.iter_mut().enumerate() {
                phoneme.frame_length = (boundaries[index + 1] - boundaries[index]) as usize;
            }
            adjusted
        })
        .collect()
}

/// Fade out and mute the query's trailing silence. The first `fade` frames of the trailing `pau`
/// get a linear ramp from full volume down to zero; everything after them is zeroed outright. A
/// single-frame fade halves that frame instead.
pub fn mute_last_pau(
    volume: &mut [f64],
    query: &Query,
    fade_out_duration_seconds: f64,
) -> Result<(), StageError> {
    let frame_total = query.frame_count();
    if volume.len() != frame_total {
        return Err(QueryError::VolumeLengthMismatch {
            phoneme_frames: frame_total,
            volume_frames: volume.len(),
        }
        .into());
    }
    let (start, length) = query
        .trailing_pau_range()
        .ok_or(QueryError::MissingTrailingPau)?;

    let fade = ((fade_out_duration_seconds * query.frame_rate).round() as i64)
        .clamp(0, length as i64) as usize;
    if fade == 1 {
        volume[start] *= 0.5;
    } else {
        for offset in 0..fade {
            volume[start + offset] *=
                linear_interpolation(0.0, 1.0, (fade - 1) as f64, 0.0, offset as f64);
        }
    }
    for value in &mut volume[start + fade..start + length] {
        *value = 0.0;
    }

    Ok(())
}

/// Executes stage logic against a [`SynthesisEngine`].
pub struct EngineStages<'a, E: SynthesisEngine> {
    engine: &'a E,
}

/// Per-phrase inputs shared by every stage plan.
struct PhraseInputs {
    phrase: Phrase,
    singer: Singer,
    track: Track,
    frame_rate: f64,
}

impl<'a, E: SynthesisEngine> EngineStages<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        EngineStages { engine }
    }

    fn phrase_inputs(
        &self,
        ctx: &RenderContext,
        phrase_key: &PhraseKey,
    ) -> Result<PhraseInputs, StageError> {
        let phrase = ctx
            .phrases
            .lock()
            .get(phrase_key)
            .cloned()
            .expect("tasks only reference phrases from this render's phrase map");
        let singer = phrase.singer.clone().ok_or(StageError::MissingSinger)?;
        let track = ctx
            .snapshot
            .track(&phrase.track_id)
            .cloned()
            .expect("phrases only reference tracks from this render's snapshot");
        let frame_rate = ctx
            .snapshot
            .engine_frame_rate(&singer.engine_id)
            .ok_or_else(|| StageError::UnknownEngineFrameRate(singer.engine_id.clone()))?;

        Ok(PhraseInputs {
            phrase,
            singer,
            track,
            frame_rate,
        })
    }

    fn engine_notes(&self, ctx: &RenderContext, inputs: &PhraseInputs) -> Vec<EngineNote> {
        notes_for_engine(
            &inputs.phrase,
            &ctx.snapshot.tempo_map,
            inputs.frame_rate,
            ctx.config.last_rest_duration_seconds,
        )
    }

    pub fn is_query_cached(&self, ctx: &RenderContext, phrase_key: &PhraseKey) -> bool {
        self.query_plan(ctx, phrase_key)
            .map(|(_, _, key)| ctx.caches.query(&key).is_some())
            .unwrap_or(false)
    }

    fn query_plan(
        &self,
        ctx: &RenderContext,
        phrase_key: &PhraseKey,
    ) -> Result<(PhraseInputs, Vec<EngineNote>, crate::keys::QueryKey), StageError> {
        let inputs = self.phrase_inputs(ctx, phrase_key)?;
        let engine_notes = self.engine_notes(ctx, &inputs);
        let key = QueryKeySource {
            engine_id: &inputs.singer.engine_id,
            style_id: ctx.config.singing_teacher_style_id,
            frame_rate: inputs.frame_rate,
            notes: &engine_notes,
            key_range_adjustment: inputs.track.key_range_adjustment,
        }
        .hash();
        Ok((inputs, engine_notes, key))
    }

    pub fn generate_query(
        &self,
        ctx: &RenderContext,
        phrase_key: &PhraseKey,
    ) -> anyhow::Result<TaskOutput> {
        let (inputs, engine_notes, key) = self.query_plan(ctx, phrase_key)?;
        let key_adjustment = inputs.track.key_range_adjustment;

        let query = match ctx.caches.query(&key) {
            Some(cached) => cached,
            None => {
                let shifted_notes = shift_note_keys(&engine_notes, -key_adjustment);
                let mut query = self.engine.fetch_frame_audio_query(
                    &inputs.singer.engine_id,
                    ctx.config.singing_teacher_style_id,
                    inputs.frame_rate,
                    &shifted_notes,
                )?;
                query.validate().map_err(StageError::from)?;
                // The engine saw transposed notes; bring its f0 estimate back up
                scale_f0(&mut query.f0, semitones_to_ratio(key_adjustment as f64));

                let query = Arc::new(query);
                ctx.caches.store_query(key.clone(), query.clone());
                query
            }
        };

        let mut phrases = ctx.phrases.lock();
        let slot = phrases
            .get_mut(phrase_key)
            .expect("tasks only reference phrases from this render's phrase map");
        slot.query_key = Some(key.clone());
        slot.query = Some(query.clone());

        Ok(TaskOutput::Query {
            phrase_key: phrase_key.clone(),
            key,
            query,
        })
    }

    pub fn adjust_phoneme_timing(
        &self,
        ctx: &RenderContext,
        track_id: &TrackId,
        phrase_keys: &[PhraseKey],
    ) -> anyhow::Result<TaskOutput> {
        let track = ctx
            .snapshot
            .track(track_id)
            .cloned()
            .expect("tasks only reference tracks from this render's snapshot");

        // Phrases whose query failed have nothing to adjust and simply stay skipped
        let queries: Vec<(PhraseKey, f64, Arc<Query>)> = {
            let phrases = ctx.phrases.lock();
            phrase_keys
                .iter()
                .filter_map(|key| {
                    let phrase = phrases.get(key)?;
                    let query = phrase.query.clone()?;
                    Some((key.clone(), phrase.start_time, query))
                })
                .collect()
        };

        let timed: Vec<(f64, Arc<Query>)> = queries
            .iter()
            .map(|(_, start_time, query)| (*start_time, query.clone()))
            .collect();
        let adjusted = apply_phoneme_timing_edits(&timed, &track.phoneme_timing_edits);

        let mut phrases = ctx.phrases.lock();
        for ((phrase_key, _, _), adjusted_query) in queries.iter().zip(adjusted) {
            let slot = phrases
                .get_mut(phrase_key)
                .expect("tasks only reference phrases from this render's phrase map");
            slot.timing_adjusted_query = Some(Arc::new(adjusted_query));
        }

        Ok(TaskOutput::TimingAdjustment {
            track_id: track_id.clone(),
        })
    }

    pub fn is_pitch_cached(&self, ctx: &RenderContext, phrase_key: &PhraseKey) -> bool {
        self.pitch_plan(ctx, phrase_key)
            .map(|(_, _, key)| ctx.caches.pitch(&key).is_some())
            .unwrap_or(false)
    }

    fn pitch_plan(
        &self,
        ctx: &RenderContext,
        phrase_key: &PhraseKey,
    ) -> Result<(PhraseInputs, Vec<EngineNote>, crate::keys::PitchKey), StageError> {
        let inputs = self.phrase_inputs(ctx, phrase_key)?;
        let engine_notes = self.engine_notes(ctx, &inputs);
        let adjusted_query = inputs
            .phrase
            .timing_adjusted_query
            .as_ref()
            .expect("pitch generation only runs after the timing adjustment succeeded");
        let key = PitchKeySource {
            engine_id: &inputs.singer.engine_id,
            style_id: ctx.config.singing_teacher_style_id,
            notes: &engine_notes,
            query: adjusted_query,
            key_range_adjustment: inputs.track.key_range_adjustment,
        }
        .hash();
        Ok((inputs, engine_notes, key))
    }

    pub fn generate_pitch(
        &self,
        ctx: &RenderContext,
        phrase_key: &PhraseKey,
    ) -> anyhow::Result<TaskOutput> {
        let (inputs, engine_notes, key) = self.pitch_plan(ctx, phrase_key)?;
        let key_adjustment = inputs.track.key_range_adjustment;
        let adjusted_query = inputs
            .phrase
            .timing_adjusted_query
            .clone()
            .expect("pitch generation only runs after the timing adjustment succeeded");

        let pitch = match ctx.caches.pitch(&key) {
            Some(cached) => cached,
            None => {
                let shifted_notes = shift_note_keys(&engine_notes, -key_adjustment);
                let mut f0 = self.engine.fetch_sing_frame_f0(
                    &inputs.singer.engine_id,
                    ctx.config.singing_teacher_style_id,
                    &shifted_notes,
                    &adjusted_query,
                )?;
                let expected = adjusted_query.frame_count();
                if f0.len() != expected {
                    return Err(StageError::GeneratedPitchLength {
                        expected,
                        actual: f0.len(),
                    }
                    .into());
                }
                scale_f0(&mut f0, semitones_to_ratio(key_adjustment as f64));

                let pitch = Arc::new(f0);
                ctx.caches.store_pitch(key.clone(), pitch.clone());
                pitch
            }
        };

        let mut phrases = ctx.phrases.lock();
        let slot = phrases
            .get_mut(phrase_key)
            .expect("tasks only reference phrases from this render's phrase map");
        slot.pitch_key = Some(key.clone());
        slot.pitch = Some(pitch.clone());

        Ok(TaskOutput::Pitch {
            phrase_key: phrase_key.clone(),
            key,
            pitch,
        })
    }

    pub fn is_volume_cached(&self, ctx: &RenderContext, phrase_key: &PhraseKey) -> bool {
        self.volume_plan(ctx, phrase_key)
            .map(|plan| ctx.caches.volume(&plan.2).is_some())
            .unwrap_or(false)
    }

    fn volume_plan(
        &self,
        ctx: &RenderContext,
        phrase_key: &PhraseKey,
    ) -> Result<(PhraseInputs, VolumeWork, crate::keys::VolumeKey), StageError> {
        let inputs = self.phrase_inputs(ctx, phrase_key)?;
        let engine_notes = self.engine_notes(ctx, &inputs);

        let query = inputs
            .phrase
            .query
            .as_ref()
            .expect("volume generation only runs after query generation succeeded");
        let pitch = inputs
            .phrase
            .pitch
            .as_ref()
            .expect("volume generation only runs after pitch generation succeeded");

        // The working query carries the pitch the user will actually hear: the generated curve
        // with their manual edits on top
        let mut working_query = (**query).clone();
        working_query.f0 = (**pitch).clone();
        apply_pitch_edits(
            &mut working_query,
            inputs.phrase.start_time,
            &inputs.track.pitch_edits,
            ctx.snapshot.editor_frame_rate,
        );

        let key = VolumeKeySource {
            engine_id: &inputs.singer.engine_id,
            style_id: ctx.config.singing_teacher_style_id,
            notes: &engine_notes,
            query: &working_query,
            key_range_adjustment: inputs.track.key_range_adjustment,
            volume_range_adjustment: inputs.track.volume_range_adjustment,
            fade_out_duration_seconds: ctx.config.fade_out_duration_seconds,
        }
        .hash();

        Ok((
            inputs,
            VolumeWork {
                engine_notes,
                working_query,
            },
            key,
        ))
    }

    pub fn generate_volume(
        &self,
        ctx: &RenderContext,
        phrase_key: &PhraseKey,
    ) -> anyhow::Result<TaskOutput> {
        let (inputs, work, key) = self.volume_plan(ctx, phrase_key)?;
        let key_adjustment = inputs.track.key_range_adjustment;

        let volume = match ctx.caches.volume(&key) {
            Some(cached) => cached,
            None => {
                // The engine expects unshifted material, so transpose both the notes and the
                // working query's f0 down before the call
                let shifted_notes = shift_note_keys(&work.engine_notes, -key_adjustment);
                let mut engine_query = work.working_query.clone();
                scale_f0(
                    &mut engine_query.f0,
                    semitones_to_ratio(-key_adjustment as f64),
                );

                let mut volume = self.engine.fetch_sing_frame_volume(
                    &inputs.singer.engine_id,
                    ctx.config.singing_teacher_style_id,
                    &shifted_notes,
                    &engine_query,
                )?;
                let expected = work.working_query.frame_count();
                if volume.len() != expected {
                    return Err(StageError::GeneratedVolumeLength {
                        expected,
                        actual: volume.len(),
                    }
                    .into());
                }

                let gain = db_to_gain(inputs.track.volume_range_adjustment);
                for value in &mut volume {
                    *value *= gain;
                }
                mute_last_pau(
                    &mut volume,
                    &work.working_query,
                    ctx.config.fade_out_duration_seconds,
                )?;

                let volume = Arc::new(volume);
                ctx.caches.store_volume(key.clone(), volume.clone());
                volume
            }
        };

        let mut phrases = ctx.phrases.lock();
        let slot = phrases
            .get_mut(phrase_key)
            .expect("tasks only reference phrases from this render's phrase map");
        slot.volume_key = Some(key.clone());
        slot.volume = Some(volume.clone());

        Ok(TaskOutput::Volume {
            phrase_key: phrase_key.clone(),
            key,
            volume,
        })
    }

    pub fn is_voice_cached(&self, ctx: &RenderContext, phrase_key: &PhraseKey) -> bool {
        self.voice_plan(ctx, phrase_key)
            .map(|(_, _, key)| ctx.caches.voice(&key).is_some())
            .unwrap_or(false)
    }

    fn voice_plan(
        &self,
        ctx: &RenderContext,
        phrase_key: &PhraseKey,
    ) -> Result<(PhraseInputs, Query, crate::keys::VoiceKey), StageError> {
        let inputs = self.phrase_inputs(ctx, phrase_key)?;

        let query = inputs
            .phrase
            .query
            .as_ref()
            .expect("voice synthesis only runs after query generation succeeded");
        let pitch = inputs
            .phrase
            .pitch
            .as_ref()
            .expect("voice synthesis only runs after pitch generation succeeded");
        let volume = inputs
            .phrase
            .volume
            .as_ref()
            .expect("voice synthesis only runs after volume generation succeeded");

        let mut synthesis_query = (**query).clone();
        synthesis_query.f0 = (**pitch).clone();
        synthesis_query.volume = (**volume).clone();
        apply_pitch_edits(
            &mut synthesis_query,
            inputs.phrase.start_time,
            &inputs.track.pitch_edits,
            ctx.snapshot.editor_frame_rate,
        );

        // Synthesis is the one call made with the singer's own style: this is where the actual
        // voice comes from
        let key = VoiceKeySource {
            engine_id: &inputs.singer.engine_id,
            style_id: inputs.singer.style_id,
            query: &synthesis_query,
        }
        .hash();

        Ok((inputs, synthesis_query, key))
    }

    pub fn synthesize_voice(
        &self,
        ctx: &RenderContext,
        phrase_key: &PhraseKey,
    ) -> anyhow::Result<TaskOutput> {
        let (inputs, synthesis_query, key) = self.voice_plan(ctx, phrase_key)?;

        let voice = match ctx.caches.voice(&key) {
            Some(cached) => cached,
            None => {
                let voice = Arc::new(self.engine.frame_synthesis(
                    &inputs.singer.engine_id,
                    inputs.singer.style_id,
                    &synthesis_query,
                )?);
                ctx.caches.store_voice(key.clone(), voice.clone());
                voice
            }
        };

        let mut phrases = ctx.phrases.lock();
        let slot = phrases
            .get_mut(phrase_key)
            .expect("tasks only reference phrases from this render's phrase map");
        slot.voice_key = Some(key.clone());
        slot.voice = Some(voice.clone());

        Ok(TaskOutput::Voice {
            phrase_key: phrase_key.clone(),
            key,
            voice,
        })
    }
}

struct VolumeWork {
    engine_notes: Vec<EngineNote>,
    working_query: Query,
}

impl<E: SynthesisEngine> super::runner::StageExecutor for EngineStages<'_, E> {
    fn is_cached(
        &self,
        _task_id: super::tasks::TaskId,
        task: &super::tasks::Task,
        ctx: &RenderContext,
    ) -> bool {
        use super::tasks::TaskKind;
        match &task.kind {
            TaskKind::QueryGeneration { phrase_key } => self.is_query_cached(ctx, phrase_key),
            TaskKind::PhonemeTimingAdjustment { .. } => false,
            TaskKind::PitchGeneration { phrase_key } => self.is_pitch_cached(ctx, phrase_key),
            TaskKind::VolumeGeneration { phrase_key } => self.is_volume_cached(ctx, phrase_key),
            TaskKind::VoiceSynthesis { phrase_key } => self.is_voice_cached(ctx, phrase_key),
        }
    }

    fn execute(
        &self,
        _task_id: super::tasks::TaskId,
        task: &super::tasks::Task,
        ctx: &RenderContext,
    ) -> anyhow::Result<TaskOutput> {
        use super::tasks::TaskKind;
        match &task.kind {
            TaskKind::QueryGeneration { phrase_key } => self.generate_query(ctx, phrase_key),
            TaskKind::PhonemeTimingAdjustment {
                track_id,
                phrase_keys,
            } => self.adjust_phoneme_timing(ctx, track_id, phrase_keys),
            TaskKind::PitchGeneration { phrase_key } => self.generate_pitch(ctx, phrase_key),
            TaskKind::VolumeGeneration { phrase_key } => self.generate_volume(ctx, phrase_key),
            TaskKind::VoiceSynthesis { phrase_key } => self.synthesize_voice(ctx, phrase_key),
        }
    }
}
