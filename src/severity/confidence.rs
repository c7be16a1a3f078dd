//! Heuristic confidence for a categorized score.
//!
//! Confidence grows with the distance to the nearest category boundary:
//! a score sitting on a threshold is a coin toss between two categories.

use super::thresholds::CATEGORY_BOUNDARIES;

/// Confidence at zero distance from a boundary.
const BASE_CONFIDENCE: f64 = 0.5;

/// Confidence gained per unit of REGCDI distance from the nearest boundary.
const CONFIDENCE_PER_UNIT: f64 = 0.25;

/// Returns a confidence in `[0.5, 1.0]` for a REGCDI score.
pub fn confidence_score(regcdi: f64) -> f64 {
    let nearest = CATEGORY_BOUNDARIES
        .iter()
        .map(|b| (regcdi - b).abs())
        .fold(f64::INFINITY, f64::min);
    if !nearest.is_finite() {
        return if regcdi.is_nan() { BASE_CONFIDENCE } else { 1.0 };
    }
    (BASE_CONFIDENCE + nearest * CONFIDENCE_PER_UNIT).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_boundary_is_half() {
        for b in CATEGORY_BOUNDARIES {
            assert_eq!(confidence_score(b), 0.5);
        }
    }

    #[test]
    fn test_grows_with_distance_and_caps_at_one() {
        // -0.25 is 0.25 from both 0.0 and -0.5
        assert!((confidence_score(-0.25) - 0.5625).abs() < 1e-12);
        assert_eq!(confidence_score(2.5), 1.0);
        assert_eq!(confidence_score(-5.0), 1.0);
    }

    #[test]
    fn test_non_finite_inputs_stay_in_range() {
        assert_eq!(confidence_score(f64::INFINITY), 1.0);
        assert_eq!(confidence_score(f64::NAN), 0.5);
    }
}
