//! The four artifact caches.
//!
//! Each cache maps a content key to the artifact a task produced for it. Entries are written only
//! after a stage fully succeeds and are never evicted within a process, so any artifact generated
//! once can be reused by every later render that derives the same key.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::Voice;
use crate::keys::{PitchKey, QueryKey, VoiceKey, VolumeKey};
use crate::query::Query;

#[derive(Debug, Default)]
pub struct RenderCaches {
    queries: Mutex<HashMap<QueryKey, Arc<Query>>>,
    pitches: Mutex<HashMap<PitchKey, Arc<Vec<f64>>>>,
    volumes: Mutex<HashMap<VolumeKey, Arc<Vec<f64>>>>,
    voices: Mutex<HashMap<VoiceKey, Arc<Voice>>>,
}

impl RenderCaches {
    pub fn query(&self, key: &QueryKey) -> Option<Arc<Query>> {
        self.queries.lock().get(key).cloned()
    }

    pub fn store_query(&self, key: QueryKey, query: Arc<Query>) {
        self.queries.lock().insert(key, query);
    }

    pub fn pitch(&self, key: &PitchKey) -> Option<Arc<Vec<f64>>> {
        self.pitches.lock().get(key).cloned()
    }

    pub fn store_pitch(&self, key: PitchKey, pitch: Arc<Vec<f64>>) {
        self.pitches.lock().insert(key, pitch);
    }

    pub fn volume(&self, key: &VolumeKey) -> Option<Arc<Vec<f64>>> {
        self.volumes.lock().get(key).cloned()
    }

    pub fn store_volume(&self, key: VolumeKey, volume: Arc<Vec<f64>>) {
        self.volumes.lock().insert(key, volume);
    }

    pub fn voice(&self, key: &VoiceKey) -> Option<Arc<Voice>> {
        self.voices.lock().get(key).cloned()
    }

    pub fn store_voice(&self, key: VoiceKey, voice: Arc<Voice>) {
        self.voices.lock().insert(key, voice);
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn pitch_count(&self) -> usize {
        self.pitches.lock().len()
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.lock().len()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.lock().len()
    }
}
