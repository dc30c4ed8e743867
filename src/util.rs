//! General conversion functions used throughout the rendering pipeline.

pub const MINUS_INFINITY_DB: f64 = -100.0;

/// Convert decibels to a voltage gain ratio, treating anything below -100 dB as minus infinity.
/// Track volume-range adjustments are specified in decibels and applied as a gain ratio.
pub fn db_to_gain(dbs: f64) -> f64 {
    if dbs > MINUS_INFINITY_DB {
        10.0f64.powf(dbs * 0.05)
    } else {
        0.0
    }
}

/// Convert a voltage gain ratio to decibels. Gain ratios that aren't positive will be treated as
/// [`MINUS_INFINITY_DB`].
pub fn gain_to_db(gain: f64) -> f64 {
    if gain > 0.0 {
        gain.log10() * 20.0
    } else {
        MINUS_INFINITY_DB
    }
}

/// Convert a transposition in semitones to a frequency ratio. Key-range adjustments are applied to
/// f0 curves by multiplying with this ratio.
pub fn semitones_to_ratio(semitones: f64) -> f64 {
    2.0f64.powf(semitones / 12.0)
}

/// Linearly interpolate the value at `x` on the line through `(x1, y1)` and `(x2, y2)`.
pub fn linear_interpolation(x1: f64, y1: f64, x2: f64, y2: f64, x: f64) -> f64 {
    if x2 == x1 {
        y1
    } else {
        y1 + (y2 - y1) * (x - x1) / (x2 - x1)
    }
}

/// The frame index a point in time falls on at the given frame rate. Frame counts for spans are
/// computed as differences of these so adjacent spans never gain or lose frames to rounding.
pub fn seconds_to_frame(seconds: f64, frame_rate: f64) -> i64 {
    (seconds * frame_rate).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_to_gain_positive() {
        assert!((db_to_gain(6.0) - 1.9952623149688795).abs() < 1e-12);
    }

    #[test]
    fn test_db_to_gain_negative() {
        assert!((db_to_gain(-6.0) - 1.9952623149688795f64.recip()).abs() < 1e-12);
    }

    #[test]
    fn test_db_to_gain_minus_infinity() {
        assert_eq!(db_to_gain(-100.0), 0.0);
    }

    #[test]
    fn test_gain_to_db_positive() {
        assert!((gain_to_db(4.0) - 12.041199826559248).abs() < 1e-12);
    }

    #[test]
    fn test_gain_to_db_minus_infinity_zero() {
        assert_eq!(gain_to_db(0.0), MINUS_INFINITY_DB);
    }

    #[test]
    fn test_gain_to_db_minus_infinity_negative() {
        assert_eq!(gain_to_db(-2.0), MINUS_INFINITY_DB);
    }

    #[test]
    fn test_semitones_to_ratio_octave() {
        assert_eq!(semitones_to_ratio(12.0), 2.0);
        assert_eq!(semitones_to_ratio(-12.0), 0.5);
        assert_eq!(semitones_to_ratio(0.0), 1.0);
    }

    #[test]
    fn test_linear_interpolation() {
        assert_eq!(linear_interpolation(0.0, 1.0, 4.0, 0.0, 1.0), 0.75);
        assert_eq!(linear_interpolation(0.0, 1.0, 4.0, 0.0, 4.0), 0.0);
        // A degenerate interval just returns the left value instead of dividing by zero
        assert_eq!(linear_interpolation(2.0, 5.0, 2.0, 9.0, 2.0), 5.0);
    }

    #[test]
    fn test_seconds_to_frame_rounds() {
        assert_eq!(seconds_to_frame(1.0, 93.75), 94);
        assert_eq!(seconds_to_frame(0.0, 93.75), 0);
        assert_eq!(seconds_to_frame(0.5, 93.75), 47);
    }
}
