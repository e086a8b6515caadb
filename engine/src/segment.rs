//! Best-segment selection.
//!
//! Each voiced segment is scored by the MFCC-DTW distance of its frame
//! slice against the full master sequence; the lowest distance wins.
//! Exact ties fall back to higher VAD confidence, then longer duration,
//! then earlier start, then lowest index.

use std::ops::Range;

use huntmaster_analysis::{
    dtw_distance_frames, normalize_by_reference, reference_stats, DtwParams, VoicedSegment,
};

/// A segment together with its selection key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SegmentScore {
    pub segment: VoicedSegment,
    pub mfcc_distance: f64,
}

/// MFCC frame indices covered by a segment.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn frame_range(segment: &VoicedSegment, frame_period_sec: f32, total_frames: usize) -> Range<usize> {
    let start = ((segment.start_sec / frame_period_sec).floor() as usize).min(total_frames);
    let end = ((segment.end_sec / frame_period_sec).ceil() as usize).clamp(start, total_frames);
    if start == end && start < total_frames {
        start..start + 1
    } else {
        start..end
    }
}

/// Score every segment against the master MFCC sequence.
pub(crate) fn score_segments(
    segments: &[VoicedSegment],
    user_mfcc: &[Vec<f32>],
    frame_period_sec: f32,
    master_mfcc: &[Vec<f32>],
    params: &DtwParams,
) -> Vec<SegmentScore> {
    // Both sides are normalized by the master's per-dimension statistics
    // so a user segment that genuinely differs from the master keeps its
    // distance instead of being whitened away.
    let stats = reference_stats(master_mfcc);
    let mut master = master_mfcc.to_vec();
    normalize_by_reference(&mut master, &stats);
    segments
        .iter()
        .map(|&segment| {
            let range = frame_range(&segment, frame_period_sec, user_mfcc.len());
            let mut user = user_mfcc[range].to_vec();
            normalize_by_reference(&mut user, &stats);
            let mfcc_distance = if user.is_empty() || master.is_empty() {
                params.early_stop
            } else {
                dtw_distance_frames(&user, &master, params).unwrap_or(params.early_stop)
            };
            SegmentScore {
                segment,
                mfcc_distance,
            }
        })
        .collect()
}

/// Index of the best-scoring segment, if any.
pub(crate) fn select_best(scores: &[SegmentScore]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, candidate) in scores.iter().enumerate() {
        let Some(current) = best else {
            best = Some(index);
            continue;
        };
        if beats(candidate, &scores[current]) {
            best = Some(index);
        }
    }
    best
}

/// Strict "candidate is better than incumbent" under the tie-break chain.
fn beats(candidate: &SegmentScore, incumbent: &SegmentScore) -> bool {
    if candidate.mfcc_distance != incumbent.mfcc_distance {
        return candidate.mfcc_distance < incumbent.mfcc_distance;
    }
    if candidate.segment.confidence != incumbent.segment.confidence {
        return candidate.segment.confidence > incumbent.segment.confidence;
    }
    let candidate_duration = candidate.segment.duration_sec();
    let incumbent_duration = incumbent.segment.duration_sec();
    if candidate_duration != incumbent_duration {
        return candidate_duration > incumbent_duration;
    }
    // Earlier start wins; equal starts keep the incumbent (lowest index)
    candidate.segment.start_sec < incumbent.segment.start_sec
}
