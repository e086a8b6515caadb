//! Distance-to-similarity mapping and score fusion.
//!
//! Every component maps its normalized DTW distance through `exp(-alpha d)`.
//! The alpha constants below were calibrated on the synthetic fixtures in
//! `tests/scenarios.rs`: a self-comparison lands at 1.0, an octave pitch
//! error lands well under 0.5, and white noise against a tone collapses
//! toward zero.

use crate::config::FusionWeights;

/// Alpha for per-dimension z-normalized MFCC sequences under squared
/// Euclidean cost.
pub const ALPHA_MFCC: f64 = 0.09;
/// Alpha for pitch contours expressed as ratios of the master's mean f0.
pub const ALPHA_PITCH: f64 = 1.5;
/// Alpha for centroid trajectories expressed as ratios of the master's
/// mean centroid.
pub const ALPHA_HARMONIC: f64 = 2.0;
/// Alpha for onset sequences rescaled to [0, 1].
pub const ALPHA_CADENCE: f64 = 3.0;
/// Alpha for level deltas in dB inside the realtime scorer.
pub const ALPHA_VOLUME: f64 = 0.12;

/// Map a non-negative alignment distance to a similarity in [0, 1].
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn similarity_from_distance(distance: f64, alpha: f64) -> f32 {
    if !distance.is_finite() {
        return 0.;
    }
    ((-alpha * distance.max(0.)).exp() as f32).clamp(0., 1.)
}

/// One component's contribution to the fused result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentOutcome {
    pub score: f32,
    pub confidence: f32,
    pub weight: f32,
}

/// Fused (overall, confidence) over the present components.
///
/// Weights are renormalized over the components actually supplied, so a
/// disabled analyzer redistributes its share instead of zeroing the
/// result. Confidence is the weight-weighted geometric mean of the
/// component confidences.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn fuse(outcomes: &[ComponentOutcome]) -> (f32, f32) {
    let total_weight: f32 = outcomes.iter().map(|o| o.weight).sum();
    if total_weight <= 0. {
        return (0., 0.);
    }
    let mut overall = 0.0f64;
    let mut log_confidence = 0.0f64;
    for outcome in outcomes {
        let weight = f64::from(outcome.weight / total_weight);
        overall += weight * f64::from(outcome.score.clamp(0., 1.));
        log_confidence += weight * f64::from(outcome.confidence.clamp(1e-6, 1.)).ln();
    }
    (
        (overall as f32).clamp(0., 1.),
        (log_confidence.exp() as f32).clamp(0., 1.),
    )
}

/// Convenience for building the fused outcome list from optional
/// component scores.
#[must_use]
pub fn outcomes_from(
    weights: &FusionWeights,
    mfcc: Option<(f32, f32)>,
    pitch: Option<(f32, f32)>,
    harmonic: Option<(f32, f32)>,
    cadence: Option<(f32, f32)>,
) -> Vec<ComponentOutcome> {
    let mut outcomes = Vec::with_capacity(4);
    let mut push = |entry: Option<(f32, f32)>, weight: f32| {
        if let Some((score, confidence)) = entry {
            outcomes.push(ComponentOutcome {
                score,
                confidence,
                weight,
            });
        }
    };
    push(mfcc, weights.mfcc);
    push(pitch, weights.pitch);
    push(harmonic, weights.harmonic);
    push(cadence, weights.cadence);
    outcomes
}
