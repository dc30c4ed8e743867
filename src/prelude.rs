pub use crate::engine::{EngineNote, SynthesisEngine, Voice};
pub use crate::events::{
    EventBus, EventBusError, ListenerId, PitchOutcome, QueryOutcome, RenderEvent, StageOutcome,
    VoiceOutcome, VolumeOutcome,
};
pub use crate::keys::{PhraseKey, PitchKey, QueryKey, VoiceKey, VolumeKey};
pub use crate::phrase::{extract_phrases, Phrase};
pub use crate::pipeline::runner::{CacheStatus, RunOutcome, RunStatus};
pub use crate::pipeline::selector::{FifoSelector, PlayheadProximitySelector, TaskSelector};
pub use crate::pipeline::tasks::{SkipPolicy, Task, TaskGraph, TaskId, TaskKind};
pub use crate::query::{FramePhoneme, Query, QueryError, PAU};
pub use crate::renderer::{
    PhraseRenderer, RenderCaches, RenderConfig, RenderError, RenderResult,
};
pub use crate::score::{
    EngineId, Note, NoteId, PhonemeTimingEdit, Singer, Snapshot, StyleId, Tempo, TempoMap,
    TempoMapError, Track, TrackId, NO_PITCH_EDIT,
};
