//! Content-addressed keys for rendering artifacts.
//!
//! Every artifact the pipeline produces is addressed by the SHA-256 hash of a canonical
//! serialization of its logical inputs. Two runs that feed a stage the same inputs therefore
//! produce the same key, which is what lets the caches skip unchanged work across renders.
//!
//! Canonical form: JSON of a dedicated source struct. Serde serializes struct fields in
//! declaration order and `serde_json` prints floats in their shortest round-trippable form, so
//! value-equal inputs always serialize to identical bytes.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::engine::EngineNote;
use crate::query::Query;
use crate::score::{EngineId, Note, StyleId, TrackId};

fn content_hash<T: Serialize>(source: &T) -> String {
    let json = serde_json::to_string(source)
        .expect("key sources contain only finite numbers, strings, and sequences");
    format!("{:x}", Sha256::digest(json.as_bytes()))
}

macro_rules! artifact_key {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// The key's hex digest.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

artifact_key!(
    /// Identifies a phrase by its musical content and placement. Two phrases with the same key
    /// are interchangeable.
    PhraseKey
);
artifact_key!(
    /// Addresses a generated frame audio query.
    QueryKey
);
artifact_key!(
    /// Addresses a generated f0 curve.
    PitchKey
);
artifact_key!(
    /// Addresses a generated volume curve.
    VolumeKey
);
artifact_key!(
    /// Addresses a synthesized voice blob.
    VoiceKey
);

/// The inputs that identify a phrase. Everything else about a phrase is derived from these.
#[derive(Serialize)]
pub struct PhraseKeySource<'a> {
    pub first_rest_duration: i64,
    pub notes: &'a [Note],
    pub start_time: f64,
    pub track_id: &'a TrackId,
}

impl PhraseKeySource<'_> {
    pub fn hash(&self) -> PhraseKey {
        PhraseKey(content_hash(self))
    }
}

/// The logical inputs of query generation. The engine notes already encode the tempo map's effect
/// on note timings, so a tempo change naturally produces different keys.
#[derive(Serialize)]
pub struct QueryKeySource<'a> {
    pub engine_id: &'a EngineId,
    pub style_id: StyleId,
    pub frame_rate: f64,
    pub notes: &'a [EngineNote],
    pub key_range_adjustment: i32,
}

impl QueryKeySource<'_> {
    pub fn hash(&self) -> QueryKey {
        QueryKey(content_hash(self))
    }
}

/// The logical inputs of pitch generation. `query` is the phoneme-timing-adjusted query, so both
/// engine output changes and user timing edits show up in the key.
#[derive(Serialize)]
pub struct PitchKeySource<'a> {
    pub engine_id: &'a EngineId,
    pub style_id: StyleId,
    pub notes: &'a [EngineNote],
    pub query: &'a Query,
    pub key_range_adjustment: i32,
}

impl PitchKeySource<'_> {
    pub fn hash(&self) -> PitchKey {
        PitchKey(content_hash(self))
    }
}

/// The logical inputs of volume generation. `query` is the working query whose f0 already holds
/// the generated pitch with the user's pitch edits applied, so those feed the key without being
/// listed separately.
#[derive(Serialize)]
pub struct VolumeKeySource<'a> {
    pub engine_id: &'a EngineId,
    pub style_id: StyleId,
    pub notes: &'a [EngineNote],
    pub query: &'a Query,
    pub key_range_adjustment: i32,
    pub volume_range_adjustment: f64,
    pub fade_out_duration_seconds: f64,
}

impl VolumeKeySource<'_> {
    pub fn hash(&self) -> VolumeKey {
        VolumeKey(content_hash(self))
    }
}

/// The logical inputs of voice synthesis. `query` is the fully assembled query: generated pitch
/// plus pitch edits in f0, generated volume in volume.
#[derive(Serialize)]
pub struct VoiceKeySource<'a> {
    pub engine_id: &'a EngineId,
    pub style_id: StyleId,
    pub query: &'a Query,
}

impl VoiceKeySource<'_> {
    pub fn hash(&self) -> VoiceKey {
        VoiceKey(content_hash(self))
    }
}
