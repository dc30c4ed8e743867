//! Rendering configuration.

use crate::score::StyleId;

/// Tuning knobs for the rendering pipeline. The defaults match the editor's shipped behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    /// The style used for query, f0, and volume generation. Voice synthesis uses each phrase
    /// singer's own style; this one shapes phoneme timings and curves.
    pub singing_teacher_style_id: StyleId,
    /// Lower bound on a phrase's leading rest. Gives the engine room to articulate the first
    /// consonant even when the previous phrase ends right before this one starts.
    pub first_rest_min_duration_seconds: f64,
    /// The fixed silence appended after a phrase's last note.
    pub last_rest_duration_seconds: f64,
    /// Length of the linear fade applied at the start of the trailing silence.
    pub fade_out_duration_seconds: f64,
    /// Run cache-served tasks before consulting the selector. Cache hits are cheap and unblock
    /// downstream work, so finishing them first shortens the path to the first audible frame.
    pub prioritize_cached_tasks: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            singing_teacher_style_id: StyleId(6000),
            first_rest_min_duration_seconds: 0.12,
            last_rest_duration_seconds: 0.5,
            fade_out_duration_seconds: 0.15,
            prioritize_cached_tasks: true,
        }
    }
}
