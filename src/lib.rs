//! An incremental, cache-aware phrase rendering pipeline for singing voice editors.
//!
//! Every edit to a score invalidates some of the audio needed to preview it. This crate
//! recomputes exactly the invalidated parts: it splits each track into phrases, derives
//! content-addressed keys for every intermediate artifact, and drives a task DAG of four engine
//! stages per phrase (query, pitch, volume, voice) with a four-tier cache, per-phrase failure
//! isolation, interruption support, and a progress event stream for UI layers.
//!
//! The synthesis engine itself is out of scope; it is consumed through the
//! [`SynthesisEngine`][engine::SynthesisEngine] trait. The typical entry point is
//! [`PhraseRenderer`][renderer::PhraseRenderer].

/// Everything you'd need to use the pipeline. Import this with `use melisma::prelude::*;`.
pub mod prelude;

pub mod engine;
pub mod events;
pub mod keys;
pub mod phrase;
pub mod pipeline;
pub mod query;
pub mod renderer;
pub mod score;
pub mod util;
