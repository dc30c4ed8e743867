//! The rendering facade.
//!
//! [`PhraseRenderer`] owns the four artifact caches, the event bus, and the mutual exclusion
//! around renders. One call to [`render()`][PhraseRenderer::render()] takes a score snapshot,
//! extracts phrases, builds the task graph, and drives the DAG runner to completion, translating
//! task lifecycle transitions into the public [`RenderEvent`] stream along the way.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::events::{
    EventBus, EventBusError, ListenerId, PitchOutcome, QueryOutcome, RenderEvent, StageOutcome,
    VoiceOutcome, VolumeOutcome,
};
use crate::engine::SynthesisEngine;
use crate::keys::PhraseKey;
use crate::phrase::{extract_phrases, Phrase};
use crate::pipeline::runner::{DagRunner, RunObserver, RunOutcome};
use crate::pipeline::selector::{FifoSelector, TaskSelector};
use crate::pipeline::stages::EngineStages;
use crate::pipeline::tasks::{Task, TaskId, TaskKind, TaskOutput};
use crate::pipeline::{build_task_graph, RenderContext};
use crate::score::{Snapshot, TrackId};

mod cache;
mod config;

pub use self::cache::RenderCaches;
pub use self::config::RenderConfig;

/// A usage error raised to the caller. These never affect an in-flight render.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("a render is already in progress")]
    AlreadyRendering,
    #[error("no render is in progress")]
    NotRendering,
}

/// What a render call produced.
#[derive(Debug)]
pub enum RenderResult {
    /// Every task settled. The map holds all extracted phrases; fully rendered ones carry their
    /// four artifacts, failed ones carry the error flag instead.
    Complete {
        phrases: HashMap<PhraseKey, Phrase>,
    },
    /// The render observed an interruption request and stopped early. Artifacts of tasks that
    /// finished in time are already cached for the next render.
    Interrupted,
}

/// Translates runner-level task transitions into the public event stream: per-track grouping of
/// query generation, per-phrase events for the other stages, and the cache-load phase.
struct EventAdapter<'a> {
    events: &'a EventBus,
    phrase_tracks: HashMap<PhraseKey, TrackId>,
    query_totals: HashMap<TrackId, usize>,
    query_results: HashMap<TrackId, Vec<(PhraseKey, QueryOutcome)>>,
    started_tracks: HashSet<TrackId>,
    /// Whether every task started so far was served from cache. The prefix of cached tasks is
    /// the cache-load phase; it ends at the first fresh task.
    in_cache_load: bool,
    cache_loaded_keys: HashSet<PhraseKey>,
}

impl<'a> EventAdapter<'a> {
    fn new(
        events: &'a EventBus,
        tasks: &[Task],
        phrases: &HashMap<PhraseKey, Phrase>,
    ) -> Self {
        let phrase_tracks: HashMap<PhraseKey, TrackId> = phrases
            .iter()
            .map(|(key, phrase)| (key.clone(), phrase.track_id.clone()))
            .collect();

        let mut query_totals: HashMap<TrackId, usize> = HashMap::new();
        for task in tasks {
            if let TaskKind::QueryGeneration { phrase_key } = &task.kind {
                let track_id = phrase_tracks[phrase_key].clone();
                *query_totals.entry(track_id).or_insert(0) += 1;
            }
        }

        EventAdapter {
            events,
            phrase_tracks,
            query_totals,
            query_results: HashMap::new(),
            started_tracks: HashSet::new(),
            in_cache_load: true,
            cache_loaded_keys: HashSet::new(),
        }
    }

    fn finish_cache_load(&mut self) {
        if self.in_cache_load {
            self.in_cache_load = false;
            self.events.emit(&RenderEvent::CacheLoadFinished {
                phrase_keys: std::mem::take(&mut self.cache_loaded_keys),
            });
        }
    }

    fn stage_outcome<K: Clone, A: Clone>(
        result: &Result<TaskOutput, Arc<anyhow::Error>>,
        unpack: impl FnOnce(&TaskOutput) -> (K, A),
    ) -> StageOutcome<K, A> {
        match result {
            Ok(output) => {
                let (key, artifact) = unpack(output);
                StageOutcome::Success { key, artifact }
            }
            Err(cause) => StageOutcome::Error {
                cause: cause.clone(),
            },
        }
    }
}

impl RunObserver for EventAdapter<'_> {
    fn task_started(&mut self, _task_id: TaskId, task: &Task, is_cached: bool) {
        if !is_cached {
            self.finish_cache_load();
        }

        match &task.kind {
            TaskKind::QueryGeneration { phrase_key } => {
                let track_id = self.phrase_tracks[phrase_key].clone();
                if self.started_tracks.insert(track_id.clone()) {
                    self.events
                        .emit(&RenderEvent::TrackQueryGenerationStarted { track_id });
                }
            }
            TaskKind::PhonemeTimingAdjustment { .. } => {}
            TaskKind::PitchGeneration { phrase_key } => {
                self.events.emit(&RenderEvent::PitchGenerationStarted {
                    phrase_key: phrase_key.clone(),
                });
            }
            TaskKind::VolumeGeneration { phrase_key } => {
                self.events.emit(&RenderEvent::VolumeGenerationStarted {
                    phrase_key: phrase_key.clone(),
                });
            }
            TaskKind::VoiceSynthesis { phrase_key } => {
                self.events.emit(&RenderEvent::VoiceSynthesisStarted {
                    phrase_key: phrase_key.clone(),
                });
            }
        }
    }

    fn task_finished(
        &mut self,
        _task_id: TaskId,
        task: &Task,
        is_cached: bool,
        result: &Result<TaskOutput, Arc<anyhow::Error>>,
    ) {
        if self.in_cache_load && is_cached && result.is_ok() {
            if let Some(phrase_key) = task.kind.phrase_key() {
                self.cache_loaded_keys.insert(phrase_key.clone());
            }
        }

        match &task.kind {
            TaskKind::QueryGeneration { phrase_key } => {
                let outcome: QueryOutcome = Self::stage_outcome(result, |output| match output {
                    TaskOutput::Query { key, query, .. } => (key.clone(), query.clone()),
                    _ => unreachable!("query tasks produce query outputs"),
                });

                let track_id = self.phrase_tracks[phrase_key].clone();
                let results = self.query_results.entry(track_id.clone()).or_default();
                results.push((phrase_key.clone(), outcome));
                if results.len() == self.query_totals[&track_id] {
                    let results = self.query_results.remove(&track_id).unwrap_or_default();
                    self.events
                        .emit(&RenderEvent::TrackQueryGenerationFinished { track_id, results });
                }
            }
            TaskKind::PhonemeTimingAdjustment { .. } => {}
            TaskKind::PitchGeneration { phrase_key } => {
                let result: PitchOutcome = Self::stage_outcome(result, |output| match output {
                    TaskOutput::Pitch { key, pitch, .. } => (key.clone(), pitch.clone()),
                    _ => unreachable!("pitch tasks produce pitch outputs"),
                });
                self.events.emit(&RenderEvent::PitchGenerationFinished {
                    phrase_key: phrase_key.clone(),
                    result,
                });
            }
            TaskKind::VolumeGeneration { phrase_key } => {
                let result: VolumeOutcome = Self::stage_outcome(result, |output| match output {
                    TaskOutput::Volume { key, volume, .. } => (key.clone(), volume.clone()),
                    _ => unreachable!("volume tasks produce volume outputs"),
                });
                self.events.emit(&RenderEvent::VolumeGenerationFinished {
                    phrase_key: phrase_key.clone(),
                    result,
                });
            }
            TaskKind::VoiceSynthesis { phrase_key } => {
                let result: VoiceOutcome = Self::stage_outcome(result, |output| match output {
                    TaskOutput::Voice { key, voice, .. } => (key.clone(), voice.clone()),
                    _ => unreachable!("voice tasks produce voice outputs"),
                });
                self.events.emit(&RenderEvent::VoiceSynthesisFinished {
                    phrase_key: phrase_key.clone(),
                    result,
                });
            }
        }
    }

    fn run_finished(&mut self, outcome: RunOutcome) {
        if outcome == RunOutcome::Completed {
            self.finish_cache_load();
        }
    }
}

/// Resets the rendering flag when a render call unwinds.
struct RenderingGuard<'a>(&'a AtomicBool);

impl Drop for RenderingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The entry point to the rendering pipeline.
pub struct PhraseRenderer<E: SynthesisEngine> {
    engine: E,
    config: RenderConfig,
    caches: RenderCaches,
    events: EventBus,
    selector: Mutex<Box<dyn TaskSelector>>,
    is_rendering: AtomicBool,
    interruption_requested: AtomicBool,
}

impl<E: SynthesisEngine> PhraseRenderer<E> {
    pub fn new(engine: E, config: RenderConfig) -> Self {
        Self::with_selector(engine, config, Box::new(FifoSelector))
    }

    /// Create a renderer with a custom scheduling policy for non-cached tasks.
    pub fn with_selector(
        engine: E,
        config: RenderConfig,
        selector: Box<dyn TaskSelector>,
    ) -> Self {
        PhraseRenderer {
            engine,
            config,
            caches: RenderCaches::default(),
            events: EventBus::default(),
            selector: Mutex::new(selector),
            is_rendering: AtomicBool::new(false),
            interruption_requested: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn caches(&self) -> &RenderCaches {
        &self.caches
    }

    pub fn add_listener(&self, listener: impl Fn(&RenderEvent) + Send + 'static) -> ListenerId {
        self.events.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<(), EventBusError> {
        self.events.remove_listener(id)
    }

    /// Ask the in-flight render to stop. The currently executing task finishes first; its
    /// artifact stays cached for the next render.
    pub fn request_interruption(&self) -> Result<(), RenderError> {
        if !self.is_rendering.load(Ordering::SeqCst) {
            return Err(RenderError::NotRendering);
        }
        self.interruption_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Render every phrase of the snapshot. Only one render may be in flight at a time.
    pub fn render(&self, snapshot: &Snapshot) -> Result<RenderResult, RenderError> {
        if self.is_rendering.swap(true, Ordering::SeqCst) {
            return Err(RenderError::AlreadyRendering);
        }
        let _guard = RenderingGuard(&self.is_rendering);
        self.interruption_requested.store(false, Ordering::SeqCst);

        log::info!("rendering started");
        self.events.emit(&RenderEvent::RenderingStarted);

        let phrases = extract_phrases(snapshot, self.config.first_rest_min_duration_seconds);
        let graph = build_task_graph(snapshot, &phrases);
        let mut adapter = EventAdapter::new(&self.events, graph.tasks(), &phrases);
        let ctx = RenderContext {
            snapshot,
            config: &self.config,
            caches: &self.caches,
            phrases: Mutex::new(phrases),
        };
        let stages = EngineStages::new(&self.engine);

        let outcome = {
            let mut selector = self.selector.lock();
            let mut runner = DagRunner::new(&graph, self.config.prioritize_cached_tasks);
            runner.run(
                &ctx,
                &stages,
                selector.as_mut(),
                &mut adapter,
                &self.interruption_requested,
            )
        };

        match outcome {
            RunOutcome::Interrupted => Ok(RenderResult::Interrupted),
            RunOutcome::Completed => {
                let mut phrases = ctx.phrases.into_inner();
                for phrase in phrases.values_mut() {
                    if phrase.singer.is_some() && !phrase.is_fully_rendered() {
                        phrase.error_occurred = true;
                    }
                }

                log::info!("rendering completed ({} phrases)", phrases.len());
                self.events.emit(&RenderEvent::RenderingCompleted);
                Ok(RenderResult::Complete { phrases })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineNote, Voice};
    use crate::query::{FramePhoneme, Query, PAU};
    use crate::score::{
        EngineId, Note, NoteId, Singer, StyleId, Tempo, TempoMap, Track, TrackId,
    };
    use anyhow::Result;
    use std::sync::atomic::AtomicUsize;

    /// A deterministic in-process engine. Queries get one phoneme per engine note; curves are
    /// derived from the notes so different phrases produce different artifacts.
    #[derive(Default)]
    struct MockEngine {
        calls: AtomicUsize,
        /// Fail query generation for phrases containing this note.
        failing_query_note: Option<NoteId>,
    }

    impl MockEngine {
        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn key_to_hz(key: u8) -> f64 {
        440.0 * 2.0f64.powf((key as f64 - 69.0) / 12.0)
    }

    impl SynthesisEngine for MockEngine {
        fn fetch_frame_audio_query(
            &self,
            _engine_id: &EngineId,
            _style_id: StyleId,
            frame_rate: f64,
            notes: &[EngineNote],
        ) -> Result<Query> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(failing) = &self.failing_query_note {
                if notes.iter().any(|note| note.id.as_ref() == Some(failing)) {
                    anyhow::bail!("transport error");
                }
            }

            let frame_phonemes: Vec<FramePhoneme> = notes
                .iter()
                .map(|note| FramePhoneme {
                    phoneme: if note.key.is_some() {
                        "a".to_owned()
                    } else {
                        PAU.to_owned()
                    },
                    frame_length: note.frame_length,
                    note_id: note.id.clone(),
                })
                .collect();
            let f0: Vec<f64> = notes
                .iter()
                .flat_map(|note| {
                    let hz = note.key.map(key_to_hz).unwrap_or(0.0);
                    std::iter::repeat(hz).take(note.frame_length)
                })
                .collect();
            let volume = vec![1.0; f0.len()];

            Ok(Query {
                frame_phonemes,
                frame_rate,
                f0,
                volume,
            })
        }

        fn fetch_sing_frame_f0(
            &self,
            _engine_id: &EngineId,
            _style_id: StyleId,
            notes: &[EngineNote],
            _query: &Query,
        ) -> Result<Vec<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(notes
                .iter()
                .flat_map(|note| {
                    let hz = note.key.map(key_to_hz).unwrap_or(0.0);
                    std::iter::repeat(hz).take(note.frame_length)
                })
                .collect())
        }

        fn fetch_sing_frame_volume(
            &self,
            _engine_id: &EngineId,
            _style_id: StyleId,
            _notes: &[EngineNote],
            query: &Query,
        ) -> Result<Vec<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0; query.frame_count()])
        }

        fn frame_synthesis(
            &self,
            _engine_id: &EngineId,
            _style_id: StyleId,
            query: &Query,
        ) -> Result<Voice> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let fingerprint: f64 = query.f0.iter().sum::<f64>() + query.volume.iter().sum::<f64>();
            Ok(Voice(fingerprint.to_le_bytes().to_vec()))
        }
    }

    fn note(id: &str, position: i64, duration: i64, note_number: u8) -> Note {
        Note {
            id: NoteId::from(id),
            position,
            duration,
            note_number,
            lyric: "ら".to_owned(),
        }
    }

    fn singer() -> Singer {
        Singer {
            engine_id: EngineId::from("engine-1"),
            style_id: StyleId(1),
        }
    }

    fn snapshot_with_tracks(tracks: Vec<Track>) -> Snapshot {
        Snapshot {
            tempo_map: TempoMap::new(
                480,
                vec![Tempo {
                    position: 0,
                    bpm: 120.0,
                }],
            )
            .unwrap(),
            tracks,
            engine_frame_rates: HashMap::from([(EngineId::from("engine-1"), 93.75)]),
            editor_frame_rate: 93.75,
        }
    }

    fn track(id: &str, singer: Option<Singer>, notes: Vec<Note>) -> Track {
        Track {
            id: TrackId::from(id),
            singer,
            notes,
            key_range_adjustment: 0,
            volume_range_adjustment: 0.0,
            pitch_edits: Vec::new(),
            phoneme_timing_edits: Vec::new(),
            overlapping_note_ids: Default::default(),
        }
    }

    /// One track, four contiguous quarter notes C4 D4 E4 F4 at 120 BPM.
    fn single_phrase_snapshot() -> Snapshot {
        snapshot_with_tracks(vec![track(
            "track-1",
            Some(singer()),
            vec![
                note("n1", 0, 480, 60),
                note("n2", 480, 480, 62),
                note("n3", 960, 480, 64),
                note("n4", 1440, 480, 65),
            ],
        )])
    }

    fn event_label(event: &RenderEvent) -> String {
        match event {
            RenderEvent::RenderingStarted => "renderingStarted".to_owned(),
            RenderEvent::CacheLoadFinished { phrase_keys } => {
                format!("cacheLoadFinished({})", phrase_keys.len())
            }
            RenderEvent::TrackQueryGenerationStarted { .. } => {
                "trackQueryGenerationStarted".to_owned()
            }
            RenderEvent::TrackQueryGenerationFinished { .. } => {
                "trackQueryGenerationFinished".to_owned()
            }
            RenderEvent::PitchGenerationStarted { .. } => "pitchGenerationStarted".to_owned(),
            RenderEvent::PitchGenerationFinished { .. } => "pitchGenerationFinished".to_owned(),
            RenderEvent::VolumeGenerationStarted { .. } => "volumeGenerationStarted".to_owned(),
            RenderEvent::VolumeGenerationFinished { .. } => "volumeGenerationFinished".to_owned(),
            RenderEvent::VoiceSynthesisStarted { .. } => "voiceSynthesisStarted".to_owned(),
            RenderEvent::VoiceSynthesisFinished { .. } => "voiceSynthesisFinished".to_owned(),
            RenderEvent::RenderingCompleted => "renderingCompleted".to_owned(),
        }
    }

    fn record_events(renderer: &PhraseRenderer<MockEngine>) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        renderer.add_listener(move |event| sink.lock().push(event_label(event)));
        log
    }

    fn rendered_phrases(result: RenderResult) -> HashMap<PhraseKey, Phrase> {
        match result {
            RenderResult::Complete { phrases } => phrases,
            RenderResult::Interrupted => panic!("expected a completed render"),
        }
    }

    #[test]
    fn test_track_without_singer_renders_no_artifacts() {
        let snapshot = snapshot_with_tracks(vec![track(
            "track-1",
            None,
            vec![
                note("n1", 0, 480, 60),
                note("n2", 480, 480, 62),
                note("n3", 960, 480, 64),
                note("n4", 1440, 480, 65),
            ],
        )]);
        let renderer = PhraseRenderer::new(MockEngine::default(), RenderConfig::default());
        let events = record_events(&renderer);

        let phrases = rendered_phrases(renderer.render(&snapshot).unwrap());

        // Phrases exist for display purposes, but nothing was rendered and nothing failed
        assert_eq!(phrases.len(), 1);
        for phrase in phrases.values() {
            assert!(phrase.query.is_none());
            assert!(phrase.pitch.is_none());
            assert!(phrase.volume.is_none());
            assert!(phrase.voice.is_none());
            assert!(!phrase.error_occurred);
        }
        assert_eq!(renderer.engine.call_count(), 0);
        assert_eq!(
            *events.lock(),
            vec![
                "renderingStarted",
                "cacheLoadFinished(0)",
                "renderingCompleted"
            ]
        );
    }

    #[test]
    fn test_single_phrase_cold_cache_event_order() {
        let renderer = PhraseRenderer::new(MockEngine::default(), RenderConfig::default());
        let events = record_events(&renderer);

        let phrases = rendered_phrases(renderer.render(&single_phrase_snapshot()).unwrap());

        assert_eq!(phrases.len(), 1);
        let phrase = phrases.values().next().unwrap();
        assert!(phrase.is_fully_rendered());
        assert!(!phrase.error_occurred);

        assert_eq!(
            *events.lock(),
            vec![
                "renderingStarted",
                "cacheLoadFinished(0)",
                "trackQueryGenerationStarted",
                "trackQueryGenerationFinished",
                "pitchGenerationStarted",
                "pitchGenerationFinished",
                "volumeGenerationStarted",
                "volumeGenerationFinished",
                "voiceSynthesisStarted",
                "voiceSynthesisFinished",
                "renderingCompleted"
            ]
        );

        assert_eq!(renderer.caches.query_count(), 1);
        assert_eq!(renderer.caches.pitch_count(), 1);
        assert_eq!(renderer.caches.volume_count(), 1);
        assert_eq!(renderer.caches.voice_count(), 1);
        // One engine call per stage
        assert_eq!(renderer.engine.call_count(), 4);
    }

    #[test]
    fn test_warm_cache_rerender_issues_no_engine_calls() {
        let renderer = PhraseRenderer::new(MockEngine::default(), RenderConfig::default());
        let snapshot = single_phrase_snapshot();

        let first = rendered_phrases(renderer.render(&snapshot).unwrap());
        let calls_after_first = renderer.engine.call_count();

        let loaded = Arc::new(Mutex::new(HashSet::new()));
        let sink = loaded.clone();
        renderer.add_listener(move |event| {
            if let RenderEvent::CacheLoadFinished { phrase_keys } = event {
                sink.lock().extend(phrase_keys.iter().cloned());
            }
        });

        let second = rendered_phrases(renderer.render(&snapshot).unwrap());

        assert_eq!(renderer.engine.call_count(), calls_after_first);
        assert_eq!(first.len(), second.len());
        for (key, phrase) in &first {
            let rerendered = &second[key];
            assert_eq!(phrase.query_key, rerendered.query_key);
            assert_eq!(phrase.pitch_key, rerendered.pitch_key);
            assert_eq!(phrase.volume_key, rerendered.volume_key);
            assert_eq!(phrase.voice_key, rerendered.voice_key);
            assert_eq!(phrase.voice, rerendered.voice);
        }
        // The cache-load set names every phrase
        assert_eq!(*loaded.lock(), first.keys().cloned().collect::<HashSet<_>>());
    }

    #[test]
    fn test_appending_a_note_forms_a_new_phrase() {
        let renderer = PhraseRenderer::new(MockEngine::default(), RenderConfig::default());
        let first = rendered_phrases(renderer.render(&single_phrase_snapshot()).unwrap());
        let calls_after_first = renderer.engine.call_count();
        let old_key = first.keys().next().unwrap().clone();

        // Glue a fifth note to the end of the run
        let snapshot = snapshot_with_tracks(vec![track(
            "track-1",
            Some(singer()),
            vec![
                note("n1", 0, 480, 60),
                note("n2", 480, 480, 62),
                note("n3", 960, 480, 64),
                note("n4", 1440, 480, 65),
                note("n5", 1920, 480, 67),
            ],
        )]);
        let second = rendered_phrases(renderer.render(&snapshot).unwrap());

        assert_eq!(second.len(), 1);
        assert!(!second.contains_key(&old_key));
        // The old artifacts stay cached but unused; exactly one new artifact per stage was
        // generated
        assert_eq!(renderer.caches.query_count(), 2);
        assert_eq!(renderer.caches.pitch_count(), 2);
        assert_eq!(renderer.caches.volume_count(), 2);
        assert_eq!(renderer.caches.voice_count(), 2);
        assert_eq!(renderer.engine.call_count(), calls_after_first + 4);
    }

    #[test]
    fn test_failing_query_is_isolated_to_its_phrase() {
        let engine = MockEngine {
            failing_query_note: Some(NoteId::from("p1n1")),
            ..Default::default()
        };
        let renderer = PhraseRenderer::new(engine, RenderConfig::default());

        let query_results = Arc::new(Mutex::new(Vec::new()));
        let sink = query_results.clone();
        renderer.add_listener(move |event| {
            if let RenderEvent::TrackQueryGenerationFinished { results, .. } = event {
                sink.lock()
                    .extend(results.iter().map(|(_, outcome)| outcome.is_success()));
            }
        });

        // Two phrases in one track; the first one's query will fail
        let snapshot = snapshot_with_tracks(vec![track(
            "track-1",
            Some(singer()),
            vec![note("p1n1", 0, 480, 60), note("p2n1", 1920, 480, 64)],
        )]);
        let phrases = rendered_phrases(renderer.render(&snapshot).unwrap());

        assert_eq!(phrases.len(), 2);
        let failed: Vec<&Phrase> = phrases.values().filter(|p| p.error_occurred).collect();
        let succeeded: Vec<&Phrase> = phrases.values().filter(|p| !p.error_occurred).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(succeeded.len(), 1);

        // The failed phrase got nothing past its query; the other one completed, which also
        // proves the timing adjustment still ran
        assert!(failed[0].query.is_none());
        assert!(failed[0].pitch.is_none());
        assert!(failed[0].voice.is_none());
        assert!(succeeded[0].is_fully_rendered());
        assert!(succeeded[0].timing_adjusted_query.is_some());

        let results = query_results.lock();
        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().filter(|&&success| success).count(), 1);
    }

    #[test]
    fn test_interruption_keeps_finished_artifacts() {
        let renderer = Arc::new(PhraseRenderer::new(
            MockEngine::default(),
            RenderConfig::default(),
        ));

        // Interrupt as soon as voice synthesis starts; the in-flight task still finishes
        let handle = renderer.clone();
        let listener = renderer.add_listener(move |event| {
            if matches!(event, RenderEvent::VoiceSynthesisStarted { .. }) {
                handle.request_interruption().unwrap();
            }
        });

        let result = renderer.render(&single_phrase_snapshot()).unwrap();
        assert!(matches!(result, RenderResult::Interrupted));
        renderer.remove_listener(listener).unwrap();

        assert_eq!(renderer.caches.query_count(), 1);
        assert_eq!(renderer.caches.pitch_count(), 1);
        assert_eq!(renderer.caches.volume_count(), 1);
        assert_eq!(renderer.caches.voice_count(), 1);

        // A later render works normally and reuses everything
        let calls_before = renderer.engine.call_count();
        let phrases = rendered_phrases(renderer.render(&single_phrase_snapshot()).unwrap());
        assert!(phrases.values().all(|phrase| phrase.is_fully_rendered()));
        assert_eq!(renderer.engine.call_count(), calls_before);
    }

    #[test]
    fn test_artifact_keys_are_stable_under_track_permutation() {
        let track_a = track(
            "track-a",
            Some(singer()),
            vec![note("a1", 0, 480, 60), note("a2", 480, 480, 62)],
        );
        let track_b = track(
            "track-b",
            Some(singer()),
            vec![note("b1", 960, 480, 64), note("b2", 1440, 480, 65)],
        );

        let forward = snapshot_with_tracks(vec![track_a.clone(), track_b.clone()]);
        let reversed = snapshot_with_tracks(vec![track_b, track_a]);

        let first = rendered_phrases(
            PhraseRenderer::new(MockEngine::default(), RenderConfig::default())
                .render(&forward)
                .unwrap(),
        );
        let second = rendered_phrases(
            PhraseRenderer::new(MockEngine::default(), RenderConfig::default())
                .render(&reversed)
                .unwrap(),
        );

        assert_eq!(
            first.keys().cloned().collect::<HashSet<_>>(),
            second.keys().cloned().collect::<HashSet<_>>()
        );
        for (key, phrase) in &first {
            assert_eq!(phrase.query_key, second[key].query_key);
            assert_eq!(phrase.pitch_key, second[key].pitch_key);
            assert_eq!(phrase.volume_key, second[key].volume_key);
            assert_eq!(phrase.voice_key, second[key].voice_key);
        }
    }

    #[test]
    fn test_artifact_keys_recompute_from_final_phrase_fields() {
        let renderer = PhraseRenderer::new(MockEngine::default(), RenderConfig::default());
        let phrases = rendered_phrases(renderer.render(&single_phrase_snapshot()).unwrap());

        for (key, phrase) in &phrases {
            assert_eq!(key, &phrase.key());
            assert!(phrase.query_key.is_some());
            assert!(phrase.pitch_key.is_some());
            assert!(phrase.volume_key.is_some());
            assert!(phrase.voice_key.is_some());
        }
    }

    #[test]
    fn test_render_during_render_is_rejected() {
        let renderer = Arc::new(PhraseRenderer::new(
            MockEngine::default(),
            RenderConfig::default(),
        ));

        let handle = renderer.clone();
        let reentrant_result = Arc::new(Mutex::new(None));
        let sink = reentrant_result.clone();
        renderer.add_listener(move |event| {
            if matches!(event, RenderEvent::RenderingStarted) {
                *sink.lock() = Some(handle.render(&single_phrase_snapshot()));
            }
        });

        renderer.render(&single_phrase_snapshot()).unwrap();

        assert!(matches!(
            reentrant_result.lock().take(),
            Some(Err(RenderError::AlreadyRendering))
        ));
    }

    #[test]
    fn test_interruption_while_idle_is_rejected() {
        let renderer = PhraseRenderer::new(MockEngine::default(), RenderConfig::default());
        assert_eq!(
            renderer.request_interruption(),
            Err(RenderError::NotRendering)
        );
    }

    #[test]
    fn test_volume_fades_out_over_the_trailing_rest() {
        let renderer = PhraseRenderer::new(MockEngine::default(), RenderConfig::default());
        let phrases = rendered_phrases(renderer.render(&single_phrase_snapshot()).unwrap());

        let phrase = phrases.values().next().unwrap();
        let query = phrase.query.as_ref().unwrap();
        let volume = phrase.volume.as_ref().unwrap();
        let (start, length) = query.trailing_pau_range().unwrap();

        // 0.15 s at 93.75 fps rounds to 14 fade frames
        let fade = 14;
        assert!(length >= fade);
        assert_eq!(volume[start], 1.0);
        for window in volume[start..start + fade].windows(2) {
            assert!(window[1] < window[0]);
        }
        for &value in &volume[start + fade..start + length] {
            assert_eq!(value, 0.0);
        }
    }
}
